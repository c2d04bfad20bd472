//! Container lifecycle management

use super::config::ContainerConfig;
use super::runtime::Container;
use crate::error::{ConvoyError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// State file name inside the store directory
const STATE_FILE: &str = "containers.json";

/// Container manager for handling container lifecycle
///
/// Every mutation is written through to a JSON state file so separate CLI
/// invocations (`up`, then `down`) see the same containers.
pub struct ContainerManager {
    /// All containers indexed by ID
    containers: Arc<RwLock<HashMap<String, Container>>>,
    /// Base path for container storage
    base_path: PathBuf,
}

impl ContainerManager {
    /// Open (or create) a container store under `base_path`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;

        let state_path = base_path.join(STATE_FILE);
        let containers: HashMap<String, Container> = if state_path.exists() {
            let content = std::fs::read_to_string(&state_path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        tracing::debug!(
            "Loaded {} containers from {}",
            containers.len(),
            state_path.display()
        );

        Ok(Self {
            containers: Arc::new(RwLock::new(containers)),
            base_path,
        })
    }

    fn persist(&self, containers: &HashMap<String, Container>) -> Result<()> {
        let content = serde_json::to_string_pretty(containers)?;
        let tmp = self.base_path.join(format!("{}.tmp", STATE_FILE));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, self.base_path.join(STATE_FILE))?;
        Ok(())
    }

    fn write_with<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Container>) -> Result<T>,
    ) -> Result<T> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| ConvoyError::Lock("Failed to acquire write lock".to_string()))?;
        // Memory only changes once the new state is on disk
        let mut updated = containers.clone();
        let value = f(&mut updated)?;
        self.persist(&updated)?;
        *containers = updated;
        Ok(value)
    }

    fn read_with<T>(&self, f: impl FnOnce(&HashMap<String, Container>) -> T) -> Result<T> {
        let containers = self
            .containers
            .read()
            .map_err(|_| ConvoyError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(f(&containers))
    }

    /// Create a new container
    pub fn create(&self, config: ContainerConfig) -> Result<String> {
        self.write_with(|containers| {
            if containers.values().any(|c| c.name() == config.name) {
                return Err(ConvoyError::Container(format!(
                    "Container name already in use: {}",
                    config.name
                )));
            }
            let container = Container::new(config);
            let id = container.id().to_string();
            containers.insert(id.clone(), container);
            Ok(id)
        })
    }

    /// Start a container
    pub fn start(&self, id: &str) -> Result<()> {
        self.write_with(|containers| {
            containers
                .get_mut(id)
                .ok_or_else(|| ConvoyError::ContainerNotFound(id.to_string()))?
                .start()
        })
    }

    /// Stop a container
    pub fn stop(&self, id: &str) -> Result<()> {
        self.write_with(|containers| {
            containers
                .get_mut(id)
                .ok_or_else(|| ConvoyError::ContainerNotFound(id.to_string()))?
                .stop()
        })
    }

    /// Remove a container, stopping it first when `force` is set
    pub fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.write_with(|containers| {
            let container = containers
                .get_mut(id)
                .ok_or_else(|| ConvoyError::ContainerNotFound(id.to_string()))?;

            if force && container.is_running() {
                container.stop()?;
            }
            container.ensure_removable()?;
            containers.remove(id);
            Ok(())
        })
    }

    /// Get container by ID
    pub fn get(&self, id: &str) -> Result<ContainerConfig> {
        self.read_with(|containers| containers.get(id).map(|c| c.config.clone()))?
            .ok_or_else(|| ConvoyError::ContainerNotFound(id.to_string()))
    }

    /// Containers of a project (and optionally one service), sorted by name
    pub fn list_for(&self, project: &str, service: Option<&str>) -> Result<Vec<ContainerConfig>> {
        let mut result = self.read_with(|containers| {
            containers
                .values()
                .filter(|c| c.config.belongs_to(project, service))
                .map(|c| c.config.clone())
                .collect::<Vec<_>>()
        })?;
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Find container by name
    pub fn find_by_name(&self, name: &str) -> Result<Option<ContainerConfig>> {
        self.read_with(|containers| {
            containers
                .values()
                .find(|c| c.name() == name)
                .map(|c| c.config.clone())
        })
    }

    /// Get container count
    pub fn count(&self) -> Result<usize> {
        self.read_with(|containers| containers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::config::{ContainerStatus, PROJECT_LABEL, SERVICE_LABEL};
    use tempfile::tempdir;

    fn web(name: &str) -> ContainerConfig {
        ContainerConfig::new(name, "nginx")
            .label(PROJECT_LABEL, "demo")
            .label(SERVICE_LABEL, "web")
    }

    #[test]
    fn test_create_start_stop_remove() {
        let temp = tempdir().unwrap();
        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();

        let id = manager.create(web("demo-web-1")).unwrap();
        manager.start(&id).unwrap();
        assert_eq!(manager.get(&id).unwrap().status, ContainerStatus::Running);

        assert!(manager.remove(&id, false).is_err());
        manager.stop(&id).unwrap();
        manager.remove(&id, false).unwrap();
        assert_eq!(manager.count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let temp = tempdir().unwrap();
        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();

        manager.create(web("demo-web-1")).unwrap();
        assert!(manager.create(web("demo-web-1")).is_err());
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("store");
        let manager = ContainerManager::new(base.clone()).unwrap();
        let id = manager.create(web("demo-web-1")).unwrap();

        // Renaming onto a directory fails, so the start cannot be persisted
        std::fs::remove_file(base.join(STATE_FILE)).unwrap();
        std::fs::create_dir(base.join(STATE_FILE)).unwrap();

        assert!(manager.start(&id).is_err());
        assert_eq!(manager.get(&id).unwrap().status, ContainerStatus::Created);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();
            let id = manager.create(web("demo-web-1")).unwrap();
            manager.start(&id).unwrap();
        }

        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();
        let found = manager.find_by_name("demo-web-1").unwrap().unwrap();
        assert_eq!(found.status, ContainerStatus::Running);
        assert_eq!(manager.list_for("demo", Some("web")).unwrap().len(), 1);
        assert!(manager.list_for("demo", Some("db")).unwrap().is_empty());
    }
}
