#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod model;
pub mod naming;
pub mod route;
pub mod strategy;

pub use self::{
    model::{Condition, LocatedResource, Ref, ResourceAction, ResourceStatus, SessionContext},
    route::{ParseRouteError, Route},
};
