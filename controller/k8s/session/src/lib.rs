#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
pub mod convert;
pub mod locate;
mod metrics;
pub mod mutation;
mod reconcile;
mod workload;

#[cfg(test)]
mod tests;

pub use self::{
    controller::run,
    locate::{Locator, WorkloadLocator},
    metrics::ReconcileMetrics,
    mutation::{Mutator, WorkloadMutator},
    reconcile::{Manipulators, ReconcileError, Reconciler},
    workload::Workload,
};
