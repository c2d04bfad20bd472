//! Compose orchestrator
//!
//! Every project-wide command is a walk over the service graph: `up`, `start`,
//! `pull` and `build` go dependencies-first, `down` and `stop` go
//! dependents-first.

use super::config::{DependencyCondition, ServiceConfig};
use super::operation::ServiceOperation;
use super::project::Project;
use super::walker::{Direction, Walker};
use crate::backend::{Backend, ContainerSummary};
use crate::container::{ContainerStatus, Health};
use crate::context::Context;
use crate::error::{ConvoyError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Default interval between dependency state polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Upper bound on concurrently running service operations
    pub max_concurrency: Option<usize>,
    /// Drop unknown `depends_on` names instead of failing
    pub lenient: bool,
    /// How often to re-check a dependency's condition
    pub poll_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            lenient: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Compose orchestrator
pub struct ComposeOrchestrator {
    /// Loaded project
    project: Arc<Project>,
    /// Where containers live
    backend: Arc<dyn Backend>,
    options: OrchestratorOptions,
}

impl ComposeOrchestrator {
    /// Create a new orchestrator
    pub fn new(project: Project, backend: Arc<dyn Backend>) -> Self {
        Self {
            project: Arc::new(project),
            backend,
            options: OrchestratorOptions::default(),
        }
    }

    /// Replace the default options
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// The project being orchestrated
    pub fn project(&self) -> &Project {
        &self.project
    }

    async fn walk<O>(&self, ctx: &Context, project: &Project, direction: Direction, op: O) -> Result<()>
    where
        O: ServiceOperation<ServiceConfig>,
    {
        let graph = project.graph(self.options.lenient)?;
        Walker::new(direction)
            .with_max_concurrency(self.options.max_concurrency)
            .walk(ctx, &graph, op)
            .await
    }

    /// Start the compose project, building images first if asked
    pub async fn up(&self, ctx: &Context, build: bool) -> Result<()> {
        tracing::info!("Starting compose project: {}", self.project.name);

        if build {
            self.build(ctx).await?;
        }

        self.walk(ctx, &self.project, Direction::Forward, self.start_op())
            .await?;
        tracing::info!("Project {} is running", self.project.name);
        Ok(())
    }

    /// Stop and remove every container of the project
    pub async fn down(&self, ctx: &Context) -> Result<()> {
        tracing::info!("Stopping compose project: {}", self.project.name);
        self.walk(ctx, &self.project, Direction::Backward, self.stop_op(true))
            .await
    }

    /// Start `services` and everything they depend on; empty means all
    pub async fn start(&self, ctx: &Context, services: &[String]) -> Result<()> {
        let selected = self.project.with_selected(services, Direction::Forward)?;
        self.walk(ctx, &selected, Direction::Forward, self.start_op())
            .await
    }

    /// Stop `services` and everything that depends on them; empty means all
    pub async fn stop(&self, ctx: &Context, services: &[String]) -> Result<()> {
        let selected = self.project.with_selected(services, Direction::Backward)?;
        self.walk(ctx, &selected, Direction::Backward, self.stop_op(false))
            .await
    }

    /// Stop `services` and their dependents, then start the same set again
    pub async fn restart(&self, ctx: &Context, services: &[String]) -> Result<()> {
        let selected = self.project.with_selected(services, Direction::Backward)?;
        self.walk(ctx, &selected, Direction::Backward, self.stop_op(false))
            .await?;
        self.walk(ctx, &selected, Direction::Forward, self.start_op())
            .await
    }

    /// Pull the image of every service that names one
    pub async fn pull(&self, ctx: &Context) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let op = move |ctx: Context, service: ServiceConfig| {
            pull_service(ctx, Arc::clone(&backend), service)
        };
        self.walk(ctx, &self.project, Direction::Forward, op).await
    }

    /// Build the image of every service with a `build` section
    pub async fn build(&self, ctx: &Context) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let project = Arc::clone(&self.project);
        let op = move |ctx: Context, service: ServiceConfig| {
            build_service(ctx, Arc::clone(&backend), Arc::clone(&project), service)
        };
        self.walk(ctx, &self.project, Direction::Forward, op).await
    }

    /// Containers of the project
    pub async fn ps(&self, ctx: &Context) -> Result<Vec<ContainerSummary>> {
        self.backend.list(ctx, &self.project.name).await
    }

    fn start_op(&self) -> impl ServiceOperation<ServiceConfig> {
        let backend = Arc::clone(&self.backend);
        let project = Arc::clone(&self.project);
        let poll_interval = self.options.poll_interval;
        move |ctx: Context, service: ServiceConfig| {
            start_service(
                ctx,
                Arc::clone(&backend),
                Arc::clone(&project),
                service,
                poll_interval,
            )
        }
    }

    fn stop_op(&self, remove: bool) -> impl ServiceOperation<ServiceConfig> {
        let backend = Arc::clone(&self.backend);
        let project = Arc::clone(&self.project);
        move |ctx: Context, service: ServiceConfig| {
            stop_service(ctx, Arc::clone(&backend), Arc::clone(&project), service, remove)
        }
    }
}

async fn pull_service(ctx: Context, backend: Arc<dyn Backend>, service: ServiceConfig) -> Result<()> {
    if service.pull_policy.as_deref() == Some("never") {
        return Ok(());
    }
    match &service.image {
        Some(image) if service.build.is_none() => backend.pull(&ctx, image).await,
        _ => Ok(()),
    }
}

async fn build_service(
    ctx: Context,
    backend: Arc<dyn Backend>,
    project: Arc<Project>,
    service: ServiceConfig,
) -> Result<()> {
    if service.build.is_none() {
        return Ok(());
    }
    let image = backend
        .build(&ctx, &project.name, &service, &project.working_dir)
        .await?;
    tracing::info!("Service {} built as {}", service.name, image);
    Ok(())
}

/// Wait for dependency conditions, then bring up every replica
async fn start_service(
    ctx: Context,
    backend: Arc<dyn Backend>,
    project: Arc<Project>,
    service: ServiceConfig,
    poll_interval: Duration,
) -> Result<()> {
    wait_for_dependencies(&ctx, backend.as_ref(), &project, &service, poll_interval).await?;

    let replicas = service.replicas();
    if replicas == 0 {
        tracing::info!("Service {} is scaled to 0", service.name);
        return Ok(());
    }
    tracing::info!("Starting service {} with {} replicas", service.name, replicas);
    for number in 1..=replicas {
        backend
            .create_and_start(&ctx, &project.name, &service, number)
            .await?;
    }
    Ok(())
}

/// Stop every container of a service, removing them if asked
async fn stop_service(
    ctx: Context,
    backend: Arc<dyn Backend>,
    project: Arc<Project>,
    service: ServiceConfig,
    remove: bool,
) -> Result<()> {
    let containers = backend.status(&ctx, &project.name, &service.name).await?;
    for container in &containers {
        backend.stop(&ctx, &container.id).await?;
        if remove {
            backend.remove(&ctx, &container.id).await?;
        }
    }
    tracing::debug!(
        "Service {}: {} containers {}",
        service.name,
        containers.len(),
        if remove { "removed" } else { "stopped" }
    );
    Ok(())
}

/// Poll each dependency of `service` until its condition holds
async fn wait_for_dependencies(
    ctx: &Context,
    backend: &dyn Backend,
    project: &Project,
    service: &ServiceConfig,
    poll_interval: Duration,
) -> Result<()> {
    for dep in service.dependencies() {
        // Pruned by selection or leniency
        let Ok(dep_service) = project.service(&dep.name) else {
            continue;
        };
        if dep_service.replicas() == 0 {
            continue;
        }

        let mut announced = false;
        loop {
            let containers = backend.status(ctx, &project.name, &dep.name).await?;
            if condition_met(dep.condition, &dep.name, &containers)? {
                break;
            }
            if !announced {
                tracing::info!(
                    "Service {} waiting for {} ({:?})",
                    service.name,
                    dep.name,
                    dep.condition
                );
                announced = true;
            }
            ctx.sleep(poll_interval).await?;
        }
    }
    Ok(())
}

/// Whether `containers` of `dependency` satisfy `condition`
///
/// Completion is judged by exit code alone: every container must have
/// stopped with code 0.
pub fn condition_met(
    condition: DependencyCondition,
    dependency: &str,
    containers: &[ContainerSummary],
) -> Result<bool> {
    if containers.is_empty() {
        return Ok(false);
    }

    match condition {
        DependencyCondition::ServiceStarted => Ok(containers
            .iter()
            .all(|c| c.status != ContainerStatus::Created)),
        DependencyCondition::ServiceHealthy => {
            for c in containers {
                match c.health {
                    Health::Unhealthy => {
                        return Err(ConvoyError::Compose(format!(
                            "dependency {} is unhealthy",
                            dependency
                        )))
                    }
                    Health::None if c.status == ContainerStatus::Running => {
                        return Err(ConvoyError::Compose(format!(
                            "dependency {} has no healthcheck configured",
                            dependency
                        )))
                    }
                    Health::Healthy => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        DependencyCondition::ServiceCompletedSuccessfully => {
            for c in containers {
                match c.exit_code {
                    Some(0) => {}
                    Some(code) => {
                        return Err(ConvoyError::Compose(format!(
                            "dependency {} exited with code {}",
                            dependency, code
                        )))
                    }
                    None => return Ok(false),
                }
            }
            Ok(true)
        }
    }
}
