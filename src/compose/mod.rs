//! Compose project orchestration
//!
//! Compose files are parsed into a [`Project`], whose services form a
//! dependency [`Graph`]. The [`Walker`] runs an operation on every service in
//! dependency order, concurrently where the graph allows it, and the
//! [`ComposeOrchestrator`] builds the project commands on top of it.

pub mod config;
pub mod graph;
pub mod operation;
pub mod orchestrator;
pub mod parser;
pub mod project;
pub mod walker;

pub use config::{ComposeConfig, DependencyCondition, ServiceConfig};
pub use graph::{build_graph, BareService, Graph, GraphBuilder, Node, ServiceDescriptor};
pub use operation::{Outcome, Recorder, ServiceOperation};
pub use orchestrator::{ComposeOrchestrator, OrchestratorOptions};
pub use parser::ComposeParser;
pub use project::Project;
pub use walker::{in_dependency_order, in_reverse_dependency_order, walk, Direction, Walker};
