//! Backend that only logs

use super::{container_name, Backend, BackendFuture, ContainerSummary};
use crate::compose::config::ServiceConfig;
use crate::container::{ContainerManager, ContainerStatus, Health};
use crate::context::Context;
use crate::error::{ConvoyError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct DryRunState {
    /// Containers "started" by this process, by name
    started: BTreeMap<String, ContainerSummary>,
    /// IDs "removed" by this process
    removed: HashSet<String>,
}

/// Reports every requested container as running, healthy and exited cleanly
/// so that dependency conditions are met without side effects.
///
/// Given an existing store, containers already in it are reported too, so
/// `down` and `stop` have something to act on. The store is never written.
#[derive(Default)]
pub struct DryRunBackend {
    existing: Option<Arc<ContainerManager>>,
    state: Mutex<DryRunState>,
}

impl DryRunBackend {
    /// Create a dry-run backend that knows of no existing containers
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report the containers already in `existing`
    pub fn with_existing(existing: Arc<ContainerManager>) -> Self {
        Self {
            existing: Some(existing),
            ..Self::default()
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DryRunState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ConvoyError::Lock("Failed to acquire dry-run lock".to_string()))?;
        Ok(f(&mut state))
    }

    fn summaries(&self, project: &str, service: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut by_name: BTreeMap<String, ContainerSummary> = BTreeMap::new();
        if let Some(existing) = &self.existing {
            for config in existing.list_for(project, service)? {
                by_name.insert(config.name.clone(), ContainerSummary::from(&config));
            }
        }

        self.with_state(|state| {
            for summary in state.started.values() {
                if service.map_or(true, |s| summary.service == s) {
                    by_name.insert(summary.name.clone(), summary.clone());
                }
            }
            by_name
                .into_values()
                .filter(|s| !state.removed.contains(&s.id))
                .collect()
        })
    }
}

impl Backend for DryRunBackend {
    fn pull<'a>(&'a self, _ctx: &'a Context, image: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!("DRY-RUN MODE - pull {}", image);
            Ok(())
        })
    }

    fn build<'a>(
        &'a self,
        _ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        _working_dir: &'a Path,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let image = service.image_name(project);
            tracing::info!("DRY-RUN MODE - build {} for {}", image, service.name);
            Ok(image)
        })
    }

    fn create_and_start<'a>(
        &'a self,
        _ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        number: u32,
    ) -> BackendFuture<'a, ContainerSummary> {
        Box::pin(async move {
            let name = container_name(project, service, number);
            tracing::info!("DRY-RUN MODE - create and start {}", name);
            let summary = ContainerSummary {
                id: format!("dryrun-{}", name),
                name: name.clone(),
                service: service.name.clone(),
                image: service.image_name(project),
                status: ContainerStatus::Running,
                health: Health::Healthy,
                exit_code: Some(0),
            };
            self.with_state(|state| state.started.insert(name, summary.clone()))?;
            Ok(summary)
        })
    }

    fn stop<'a>(&'a self, _ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!("DRY-RUN MODE - stop {}", id);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, _ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!("DRY-RUN MODE - remove {}", id);
            self.with_state(|state| {
                state.removed.insert(id.to_string());
            })
        })
    }

    fn status<'a>(
        &'a self,
        _ctx: &'a Context,
        project: &'a str,
        service: &'a str,
    ) -> BackendFuture<'a, Vec<ContainerSummary>> {
        Box::pin(async move { self.summaries(project, Some(service)) })
    }

    fn list<'a>(
        &'a self,
        _ctx: &'a Context,
        project: &'a str,
    ) -> BackendFuture<'a, Vec<ContainerSummary>> {
        Box::pin(async move { self.summaries(project, None) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::config::{PROJECT_LABEL, SERVICE_LABEL};
    use crate::container::ContainerConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reports_started_containers() {
        let backend = DryRunBackend::new();
        let ctx = Context::background();
        let service = ServiceConfig {
            name: "db".to_string(),
            image: Some("postgres".to_string()),
            ..Default::default()
        };

        assert!(backend.status(&ctx, "demo", "db").await.unwrap().is_empty());

        let summary = backend.create_and_start(&ctx, "demo", &service, 1).await.unwrap();
        assert_eq!(summary.health, Health::Healthy);
        assert_eq!(backend.status(&ctx, "demo", "db").await.unwrap().len(), 1);

        backend.remove(&ctx, &summary.id).await.unwrap();
        assert!(backend.list(&ctx, "demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_existing_store_without_writing() {
        let temp = tempdir().unwrap();
        let store = Arc::new(ContainerManager::new(temp.path().to_path_buf()).unwrap());
        let id = store
            .create(
                ContainerConfig::new("demo-web-1", "nginx")
                    .label(PROJECT_LABEL, "demo")
                    .label(SERVICE_LABEL, "web"),
            )
            .unwrap();
        store.start(&id).unwrap();

        let backend = DryRunBackend::with_existing(Arc::clone(&store));
        let ctx = Context::background();

        let web = backend.status(&ctx, "demo", "web").await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].id, id);

        backend.stop(&ctx, &id).await.unwrap();
        backend.remove(&ctx, &id).await.unwrap();
        assert!(backend.list(&ctx, "demo").await.unwrap().is_empty());

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.status, ContainerStatus::Running);
        assert_eq!(store.count().unwrap(), 1);
    }
}
