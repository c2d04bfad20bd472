//! Container management module
//!
//! Containers are records in a local store; starting one marks it running
//! and reports its healthcheck as passing.

pub mod config;
pub mod lifecycle;
pub mod runtime;

pub use config::{ContainerConfig, ContainerStatus, Health};
pub use lifecycle::ContainerManager;
pub use runtime::Container;
