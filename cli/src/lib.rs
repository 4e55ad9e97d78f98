#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod session;

pub use self::session::{create_or_join, leave, Error, Joined, Options, State};
