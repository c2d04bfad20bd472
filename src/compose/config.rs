//! Compose file configuration types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Compose file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Compose file version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Networks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    /// Volumes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Option<VolumeConfig>>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            version: None,
            name: None,
            services: BTreeMap::new(),
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, stamped from the `services:` key when the project loads
    #[serde(skip)]
    pub name: String,
    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandConfig>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    /// Volume mounts (short syntax)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    /// Networks to connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<Vec<String>>,
    /// Service dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Deploy configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployConfig>,
    /// Healthcheck configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Privileged mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    /// Profiles this service belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    /// Pull policy (always, missing, never, build)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

impl ServiceConfig {
    /// Declared dependencies in declaration order
    pub fn dependencies(&self) -> Vec<ServiceDependency> {
        match &self.depends_on {
            None => Vec::new(),
            Some(DependsOnConfig::Array(names)) => names
                .iter()
                .map(|name| ServiceDependency {
                    name: name.clone(),
                    condition: DependencyCondition::default(),
                    required: true,
                })
                .collect(),
            Some(DependsOnConfig::Map(map)) => map
                .iter()
                .map(|(name, spec)| ServiceDependency {
                    name: name.clone(),
                    condition: spec.condition,
                    required: spec.required,
                })
                .collect(),
        }
    }

    /// Drop dependencies whose names fail `keep`
    pub fn retain_dependencies(&mut self, mut keep: impl FnMut(&str) -> bool) {
        match &mut self.depends_on {
            Some(DependsOnConfig::Array(names)) => names.retain(|n| keep(n)),
            Some(DependsOnConfig::Map(map)) => map.retain(|n, _| keep(n)),
            None => {}
        }
    }

    /// Number of containers to run
    pub fn replicas(&self) -> u32 {
        self.deploy.as_ref().and_then(|d| d.replicas).unwrap_or(1)
    }

    /// Image reference, falling back to the built image name
    pub fn image_name(&self, project: &str) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}-{}:latest", project, self.name))
    }

    /// True if the service is enabled under the given active profiles
    pub fn is_enabled(&self, active: &[String]) -> bool {
        match &self.profiles {
            None => true,
            Some(profiles) if profiles.is_empty() => true,
            Some(profiles) => profiles
                .iter()
                .any(|p| p == "*" || active.iter().any(|a| a == p || a == "*")),
        }
    }

    /// Environment as key/value pairs; unset map values are skipped
    pub fn environment_map(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        match &self.environment {
            Some(EnvironmentConfig::Array(arr)) => {
                for item in arr {
                    if let Some((key, value)) = item.split_once('=') {
                        env.insert(key.to_string(), value.to_string());
                    }
                }
            }
            Some(EnvironmentConfig::Map(map)) => {
                for (key, value) in map {
                    if let Some(v) = value {
                        env.insert(key.clone(), v.clone());
                    }
                }
            }
            None => {}
        }
        env
    }

    /// Labels as key/value pairs
    pub fn labels_map(&self) -> HashMap<String, String> {
        match &self.labels {
            Some(LabelsConfig::Array(arr)) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
            Some(LabelsConfig::Map(map)) => map.clone().into_iter().collect(),
            None => HashMap::new(),
        }
    }

    /// True if a healthcheck is configured and not disabled
    pub fn has_healthcheck(&self) -> bool {
        match &self.healthcheck {
            Some(check) => check.disable != Some(true) && check.test.is_some(),
            None => false,
        }
    }
}

/// One resolved `depends_on` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDependency {
    /// Name of the service depended on
    pub name: String,
    /// What state the dependency must reach
    pub condition: DependencyCondition,
    /// Whether a missing dependency is an error
    pub required: bool,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    /// Simple context path
    Simple(String),
    /// Full build configuration
    Full(BuildConfigFull),
}

impl BuildConfig {
    /// Build context directory, relative to the project
    pub fn context(&self) -> &str {
        match self {
            BuildConfig::Simple(path) => path,
            BuildConfig::Full(full) => full.context.as_deref().unwrap_or("."),
        }
    }
}

/// Full build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfigFull {
    /// Build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Dockerfile path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,
    /// Target stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandConfig {
    /// Exec-form argv
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            CommandConfig::Shell(s) => vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()],
            CommandConfig::Exec(arr) => arr.clone(),
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<String>>),
}

/// Depends on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition, in declaration order
    Map(IndexMap<String, DependsOnCondition>),
}

/// Long-form `depends_on` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    #[serde(default)]
    pub condition: DependencyCondition,
    /// Restart this service when the dependency is updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    /// A missing optional dependency is ignored
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// State a dependency must reach before dependents may start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    /// Container has started
    #[default]
    ServiceStarted,
    /// Container reports healthy
    ServiceHealthy,
    /// Container ran to completion with exit code 0
    ServiceCompletedSuccessfully,
}

/// Deploy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Number of replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Test command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<CommandConfig>,
    /// Interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Disable healthcheck
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable: Option<bool>,
}

/// Labels configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsConfig {
    /// Array of "key=value" strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, String>),
}

/// Network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// External network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

/// Volume configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// External volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_short_and_long_form() {
        let short: ServiceConfig = serde_yaml::from_str("depends_on: [db, cache]").unwrap();
        let names: Vec<_> = short.dependencies().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["db", "cache"]);

        let long: ServiceConfig = serde_yaml::from_str(
            r#"
depends_on:
  db:
    condition: service_healthy
  migrate:
    condition: service_completed_successfully
    required: false
"#,
        )
        .unwrap();
        let deps = long.dependencies();
        assert_eq!(deps[0].name, "db");
        assert_eq!(deps[0].condition, DependencyCondition::ServiceHealthy);
        assert!(deps[0].required);
        assert_eq!(deps[1].condition, DependencyCondition::ServiceCompletedSuccessfully);
        assert!(!deps[1].required);
    }

    #[test]
    fn test_long_form_keeps_declaration_order() {
        let svc: ServiceConfig = serde_yaml::from_str(
            r#"
depends_on:
  zeta:
    condition: service_started
  alpha:
    condition: service_healthy
"#,
        )
        .unwrap();
        let names: Vec<_> = svc.dependencies().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_profiles() {
        let svc: ServiceConfig = serde_yaml::from_str("profiles: [debug]").unwrap();
        assert!(!svc.is_enabled(&[]));
        assert!(svc.is_enabled(&["debug".to_string()]));
        assert!(ServiceConfig::default().is_enabled(&[]));
    }

    #[test]
    fn test_environment_map() {
        let svc: ServiceConfig =
            serde_yaml::from_str("environment: [\"A=1\", \"B=two=2\", \"C\"]").unwrap();
        let env = svc.environment_map();
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("two=2"));
        assert!(!env.contains_key("C"));
    }

    #[test]
    fn test_labels_and_healthcheck() {
        let svc: ServiceConfig = serde_yaml::from_str(
            r#"
labels: ["tier=db", "backup"]
healthcheck:
  test: ["CMD", "pg_isready"]
"#,
        )
        .unwrap();
        let labels = svc.labels_map();
        assert_eq!(labels.get("tier").map(String::as_str), Some("db"));
        assert_eq!(labels.get("backup").map(String::as_str), Some(""));
        assert!(svc.has_healthcheck());

        let disabled: ServiceConfig =
            serde_yaml::from_str("healthcheck:\n  test: [\"CMD\", \"true\"]\n  disable: true").unwrap();
        assert!(!disabled.has_healthcheck());
    }
}
