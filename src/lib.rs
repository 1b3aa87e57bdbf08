#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod container;
mod context;
mod error;
mod factory;
mod lock;
mod monitor;
mod registry;
mod runtime;
mod schema;
mod value;

pub use container::*;
pub use context::*;
pub use error::*;
pub use lock::*;
pub use registry::*;
pub use runtime::*;
pub use schema::*;
pub use value::*;
