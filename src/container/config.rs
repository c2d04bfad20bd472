//! Container configuration and status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Label carrying the compose project name
pub const PROJECT_LABEL: &str = "com.docker.compose.project";
/// Label carrying the compose service name
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
/// Label carrying the replica number
pub const NUMBER_LABEL: &str = "com.docker.compose.container-number";

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container was stopped
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Healthcheck state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// No healthcheck configured
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::None => write!(f, ""),
            Health::Starting => write!(f, "health: starting"),
            Health::Healthy => write!(f, "healthy"),
            Health::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image name/tag
    pub image: String,
    /// Command to run
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Entry point
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: String,
    /// User to run as
    #[serde(default)]
    pub user: String,
    /// Container labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: String,
    /// Privileged mode
    #[serde(default)]
    pub privileged: bool,
    /// Whether a healthcheck is configured
    #[serde(default)]
    pub has_healthcheck: bool,
    /// Current status
    pub status: ContainerStatus,
    /// Health, when a healthcheck is configured
    #[serde(default)]
    pub health: Health,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: String::new(),
            image: String::new(),
            cmd: Vec::new(),
            entrypoint: Vec::new(),
            env: HashMap::new(),
            working_dir: "/".to_string(),
            user: String::new(),
            labels: HashMap::new(),
            hostname: String::new(),
            privileged: false,
            has_healthcheck: false,
            status: ContainerStatus::Created,
            health: Health::None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }
}

impl ContainerConfig {
    /// Create a new container configuration
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            hostname: name.to_string(),
            ..Self::default()
        }
    }

    /// Add a label
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Project this container belongs to
    pub fn project(&self) -> Option<&str> {
        self.labels.get(PROJECT_LABEL).map(String::as_str)
    }

    /// Service this container belongs to
    pub fn service(&self) -> Option<&str> {
        self.labels.get(SERVICE_LABEL).map(String::as_str)
    }

    /// True if the container is part of `project`'s `service`
    pub fn belongs_to(&self, project: &str, service: Option<&str>) -> bool {
        self.project() == Some(project) && service.map_or(true, |s| self.service() == Some(s))
    }
}
