//! Container state transitions

use super::config::{ContainerConfig, ContainerStatus, Health};
use crate::error::{ConvoyError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Container instance tracked by the local store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Container configuration and state
    pub config: ContainerConfig,
}

impl Container {
    /// Create a new container
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Get container ID
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Get container name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get container status
    pub fn status(&self) -> ContainerStatus {
        self.config.status
    }

    /// Check if container is running
    pub fn is_running(&self) -> bool {
        self.config.status == ContainerStatus::Running
    }

    /// Start the container; starting a running container is a no-op
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.config.status = ContainerStatus::Running;
        self.config.started_at = Some(Utc::now());
        self.config.finished_at = None;
        self.config.exit_code = None;
        // Local containers never run a healthcheck command, so a configured check passes at once
        self.config.health = if self.config.has_healthcheck {
            Health::Healthy
        } else {
            Health::None
        };

        Ok(())
    }

    /// Stop the container
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(ConvoyError::ContainerNotRunning(self.config.id.clone()));
        }

        self.config.status = ContainerStatus::Stopped;
        self.config.finished_at = Some(Utc::now());
        self.config.exit_code = Some(0);
        self.config.health = Health::None;

        Ok(())
    }

    /// Check the container can be removed
    pub fn ensure_removable(&self) -> Result<()> {
        if self.is_running() {
            return Err(ConvoyError::Container(format!(
                "Cannot remove running container {}",
                self.config.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut container = Container::new(ContainerConfig::new("web", "nginx"));
        assert_eq!(container.status(), ContainerStatus::Created);

        container.start().unwrap();
        assert!(container.is_running());
        assert!(container.ensure_removable().is_err());

        container.stop().unwrap();
        assert_eq!(container.status(), ContainerStatus::Stopped);
        assert_eq!(container.config.exit_code, Some(0));
        assert!(matches!(container.stop(), Err(ConvoyError::ContainerNotRunning(_))));
        assert!(container.ensure_removable().is_ok());
    }

    #[test]
    fn test_healthcheck_reports_healthy_once_started() {
        let mut config = ContainerConfig::new("db", "postgres");
        config.has_healthcheck = true;
        let mut container = Container::new(config);

        container.start().unwrap();
        assert_eq!(container.config.health, Health::Healthy);

        container.stop().unwrap();
        assert_eq!(container.config.health, Health::None);
    }
}
