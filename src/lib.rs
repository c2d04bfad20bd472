//! Convoy - dependency-ordered compose orchestration
//!
//! Convoy reads compose files and drives a project's services through a
//! container backend. Every project command is a concurrent walk over the
//! service dependency graph:
//!
//! - Dependencies start before the services that need them
//! - Dependents stop before the services they need
//! - Independent services run in parallel
//! - The first failure or a cancelled context stops the walk

pub mod backend;
pub mod compose;
pub mod container;
pub mod context;
pub mod error;

pub use context::Context;
pub use error::{ConvoyError, Result};
