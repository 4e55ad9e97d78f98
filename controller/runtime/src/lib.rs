#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use ike_controller_core as core;
pub use ike_controller_k8s_api as k8s;
pub use ike_controller_k8s_session as session;

mod args;

pub use self::args::Args;
