//! Container backends
//!
//! The orchestrator talks to containers only through [`Backend`]. The local
//! backend keeps containers in an on-disk store; the dry-run backend only
//! logs what it would do.

pub mod dry_run;
pub mod local;

use crate::compose::config::ServiceConfig;
use crate::container::{ContainerConfig, ContainerStatus, Health};
use crate::context::Context;
use crate::error::Result;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

pub use dry_run::DryRunBackend;
pub use local::LocalBackend;

/// Boxed future returned by backend calls
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What the orchestrator knows about one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    /// Container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Service the container belongs to
    pub service: String,
    /// Image reference
    pub image: String,
    /// Lifecycle status
    pub status: ContainerStatus,
    /// Healthcheck state
    pub health: Health,
    /// Exit code once the container has stopped
    pub exit_code: Option<i32>,
}

impl ContainerSummary {
    /// Status column for `ps`
    pub fn state(&self) -> String {
        match (self.status, self.health) {
            (ContainerStatus::Running, Health::None) => "running".to_string(),
            (ContainerStatus::Running, health) => format!("running ({})", health),
            (ContainerStatus::Stopped, _) => {
                format!("exited ({})", self.exit_code.unwrap_or_default())
            }
            (status, _) => status.to_string(),
        }
    }
}

impl From<&ContainerConfig> for ContainerSummary {
    fn from(config: &ContainerConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            service: config.service().unwrap_or_default().to_string(),
            image: config.image.clone(),
            status: config.status,
            health: config.health,
            exit_code: config.exit_code,
        }
    }
}

/// Name of replica `number` of `service`
pub fn container_name(project: &str, service: &ServiceConfig, number: u32) -> String {
    match &service.container_name {
        Some(name) if service.replicas() <= 1 => name.clone(),
        _ => format!("{}-{}-{}", project, service.name, number),
    }
}

/// Container operations the orchestrator needs
pub trait Backend: Send + Sync {
    /// Make `image` available
    fn pull<'a>(&'a self, ctx: &'a Context, image: &'a str) -> BackendFuture<'a, ()>;

    /// Build the image of `service`, returning its reference
    fn build<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        working_dir: &'a Path,
    ) -> BackendFuture<'a, String>;

    /// Ensure replica `number` of `service` exists and is running
    fn create_and_start<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        number: u32,
    ) -> BackendFuture<'a, ContainerSummary>;

    /// Stop a container; stopping a stopped container is a no-op
    fn stop<'a>(&'a self, ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()>;

    /// Remove a stopped container
    fn remove<'a>(&'a self, ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()>;

    /// Containers of one service
    fn status<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a str,
    ) -> BackendFuture<'a, Vec<ContainerSummary>>;

    /// Containers of the whole project
    fn list<'a>(&'a self, ctx: &'a Context, project: &'a str)
        -> BackendFuture<'a, Vec<ContainerSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name() {
        let mut service = ServiceConfig {
            name: "web".to_string(),
            ..Default::default()
        };
        assert_eq!(container_name("demo", &service, 2), "demo-web-2");

        service.container_name = Some("frontend".to_string());
        assert_eq!(container_name("demo", &service, 1), "frontend");
    }

    #[test]
    fn test_state_column() {
        let mut summary = ContainerSummary {
            id: "abc".to_string(),
            name: "demo-db-1".to_string(),
            service: "db".to_string(),
            image: "postgres".to_string(),
            status: ContainerStatus::Running,
            health: Health::Healthy,
            exit_code: None,
        };
        assert_eq!(summary.state(), "running (healthy)");

        summary.status = ContainerStatus::Stopped;
        summary.exit_code = Some(0);
        assert_eq!(summary.state(), "exited (0)");
    }
}
