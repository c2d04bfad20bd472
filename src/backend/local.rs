//! Backend over the local container store

use super::{container_name, Backend, BackendFuture, ContainerSummary};
use crate::compose::config::ServiceConfig;
use crate::container::config::{NUMBER_LABEL, PROJECT_LABEL, SERVICE_LABEL};
use crate::container::{ContainerConfig, ContainerManager, ContainerStatus};
use crate::context::Context;
use crate::error::{ConvoyError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backend that keeps containers in a [`ContainerManager`]
pub struct LocalBackend {
    containers: Arc<ContainerManager>,
}

impl LocalBackend {
    /// Wrap an existing container store
    pub fn new(containers: Arc<ContainerManager>) -> Self {
        Self { containers }
    }

    /// Open the store under `base_path`
    pub fn open(base_path: PathBuf) -> Result<Self> {
        Ok(Self::new(Arc::new(ContainerManager::new(base_path)?)))
    }

    /// Default store location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("convoy")
            .join("containers")
    }

    fn container_config(project: &str, service: &ServiceConfig, number: u32) -> ContainerConfig {
        let name = container_name(project, service, number);
        let mut config = ContainerConfig::new(&name, &service.image_name(project));

        config.cmd = service.command.as_ref().map(|c| c.to_argv()).unwrap_or_default();
        config.entrypoint = service
            .entrypoint
            .as_ref()
            .map(|c| c.to_argv())
            .unwrap_or_default();
        config.env = service.environment_map();
        if let Some(dir) = &service.working_dir {
            config.working_dir = dir.clone();
        }
        config.user = service.user.clone().unwrap_or_default();
        config.hostname = service.hostname.clone().unwrap_or(name);
        config.privileged = service.privileged.unwrap_or(false);
        config.has_healthcheck = service.has_healthcheck();

        config.labels = service.labels_map();
        config
            .label(PROJECT_LABEL, project)
            .label(SERVICE_LABEL, &service.name)
            .label(NUMBER_LABEL, &number.to_string())
    }

    fn summaries(&self, project: &str, service: Option<&str>) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .list_for(project, service)?
            .iter()
            .map(ContainerSummary::from)
            .collect())
    }
}

fn check(ctx: &Context) -> Result<()> {
    match ctx.err() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl Backend for LocalBackend {
    fn pull<'a>(&'a self, ctx: &'a Context, image: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            check(ctx)?;
            tracing::info!("Image {} is available locally", image);
            Ok(())
        })
    }

    fn build<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        working_dir: &'a Path,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            check(ctx)?;
            let build = service.build.as_ref().ok_or_else(|| {
                ConvoyError::Backend(format!("service {} has no build section", service.name))
            })?;

            let context_dir = working_dir.join(build.context());
            if !context_dir.is_dir() {
                return Err(ConvoyError::Backend(format!(
                    "build context {} does not exist",
                    context_dir.display()
                )));
            }

            let image = service.image_name(project);
            tracing::info!("Built image {} from {}", image, context_dir.display());
            Ok(image)
        })
    }

    fn create_and_start<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a ServiceConfig,
        number: u32,
    ) -> BackendFuture<'a, ContainerSummary> {
        Box::pin(async move {
            check(ctx)?;
            let name = container_name(project, service, number);

            let id = match self.containers.find_by_name(&name)? {
                Some(existing) if existing.status == ContainerStatus::Running => {
                    tracing::debug!("Container {} is already running", name);
                    existing.id
                }
                Some(existing) => existing.id,
                None => {
                    let id = self
                        .containers
                        .create(Self::container_config(project, service, number))?;
                    tracing::info!("Container {} created", name);
                    id
                }
            };

            self.containers.start(&id)?;
            tracing::info!("Container {} started", name);
            Ok(ContainerSummary::from(&self.containers.get(&id)?))
        })
    }

    fn stop<'a>(&'a self, ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            check(ctx)?;
            let config = self.containers.get(id)?;
            if config.status != ContainerStatus::Running {
                return Ok(());
            }
            self.containers.stop(id)?;
            tracing::info!("Container {} stopped", config.name);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, ctx: &'a Context, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            check(ctx)?;
            let config = self.containers.get(id)?;
            self.containers.remove(id, false)?;
            tracing::info!("Container {} removed", config.name);
            Ok(())
        })
    }

    fn status<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
        service: &'a str,
    ) -> BackendFuture<'a, Vec<ContainerSummary>> {
        Box::pin(async move {
            check(ctx)?;
            self.summaries(project, Some(service))
        })
    }

    fn list<'a>(
        &'a self,
        ctx: &'a Context,
        project: &'a str,
    ) -> BackendFuture<'a, Vec<ContainerSummary>> {
        Box::pin(async move {
            check(ctx)?;
            self.summaries(project, None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Health;
    use tempfile::tempdir;

    fn service(yaml: &str, name: &str) -> ServiceConfig {
        let mut service: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        service.name = name.to_string();
        service
    }

    #[tokio::test]
    async fn test_create_and_start_is_idempotent() {
        let temp = tempdir().unwrap();
        let backend = LocalBackend::open(temp.path().to_path_buf()).unwrap();
        let ctx = Context::background();
        let db = service("image: postgres\nhealthcheck:\n  test: [\"CMD\", \"pg_isready\"]", "db");

        let first = backend.create_and_start(&ctx, "demo", &db, 1).await.unwrap();
        assert_eq!(first.name, "demo-db-1");
        assert_eq!(first.status, ContainerStatus::Running);
        assert_eq!(first.health, Health::Healthy);

        let again = backend.create_and_start(&ctx, "demo", &db, 1).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(backend.list(&ctx, "demo").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_then_remove() {
        let temp = tempdir().unwrap();
        let backend = LocalBackend::open(temp.path().to_path_buf()).unwrap();
        let ctx = Context::background();
        let web = service("image: nginx", "web");

        let summary = backend.create_and_start(&ctx, "demo", &web, 1).await.unwrap();
        assert!(backend.remove(&ctx, &summary.id).await.is_err());

        backend.stop(&ctx, &summary.id).await.unwrap();
        backend.stop(&ctx, &summary.id).await.unwrap();
        let status = backend.status(&ctx, "demo", "web").await.unwrap();
        assert_eq!(status[0].exit_code, Some(0));

        backend.remove(&ctx, &summary.id).await.unwrap();
        assert!(backend.status(&ctx, "demo", "web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_requires_context_dir() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("app")).unwrap();
        let backend = LocalBackend::open(temp.path().join("state")).unwrap();
        let ctx = Context::background();

        let app = service("build: ./app", "app");
        let image = backend.build(&ctx, "demo", &app, temp.path()).await.unwrap();
        assert_eq!(image, "demo-app:latest");

        let missing = service("build: ./missing", "missing");
        assert!(backend.build(&ctx, "demo", &missing, temp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_context_is_refused() {
        let temp = tempdir().unwrap();
        let backend = LocalBackend::open(temp.path().to_path_buf()).unwrap();
        let ctx = Context::background().with_cancel();
        ctx.cancel();

        let result = backend.pull(&ctx, "nginx").await;
        assert!(matches!(result, Err(ConvoyError::Cancelled)));
    }
}
