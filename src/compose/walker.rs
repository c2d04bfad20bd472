//! Dependency-ordered concurrent traversal
//!
//! The walker runs an operation on every service of a [`Graph`], starting a
//! service as soon as all of its prerequisites have finished. Independent
//! services run concurrently, one tokio task each. A single coordinator (the
//! future returned by [`Walker::walk`]) owns the completed set and is the only
//! place new work is launched, so a service can never be scheduled twice.
//!
//! The first failure, or cancellation of the caller's context, cancels the
//! context handed to in-flight operations. Nothing new is launched after
//! that, and the walker waits for running tasks to drain before returning.
//!
//! A cycle leaves its members waiting forever. The walker logs the stall once
//! and keeps waiting until the caller's context ends.

use super::graph::{Graph, GraphBuilder, Node, ServiceDescriptor};
use super::operation::ServiceOperation;
use crate::context::Context;
use crate::error::{ConvoyError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Traversal orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies before dependents (`up`)
    Forward,
    /// Dependents before dependencies (`down`)
    Backward,
}

impl Direction {
    /// Names that must finish before `node` may run
    pub fn prereqs<'a, S>(self, node: &'a Node<S>) -> &'a [String] {
        match self {
            Direction::Forward => node.dependencies(),
            Direction::Backward => node.dependents(),
        }
    }

    /// Names to re-check once `node` finishes
    pub fn successors<'a, S>(self, node: &'a Node<S>) -> &'a [String] {
        match self {
            Direction::Forward => node.dependents(),
            Direction::Backward => node.dependencies(),
        }
    }

    /// The opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// How a single task ended
enum TaskOutcome {
    Done,
    Failed(ConvoyError),
    /// Context ended before the operation was invoked
    Skipped,
}

/// Concurrent graph walker
#[derive(Debug, Clone)]
pub struct Walker {
    direction: Direction,
    max_concurrency: Option<usize>,
}

impl Walker {
    /// A walker with no concurrency cap
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            max_concurrency: None,
        }
    }

    /// Limit how many operations run at once. `None` means unbounded.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    /// Traversal direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run `op` on every node of `graph`.
    ///
    /// Returns `Ok(())` once every node succeeded, the first operation error
    /// if one failed, or the context's error if it was cancelled first.
    pub async fn walk<S, O>(&self, ctx: &Context, graph: &Graph<S>, op: O) -> Result<()>
    where
        S: Clone + Send + 'static,
        O: ServiceOperation<S>,
    {
        if graph.is_empty() {
            return Ok(());
        }

        let mut traversal = Traversal {
            direction: self.direction,
            graph,
            op: Arc::new(op),
            walk_ctx: ctx.with_cancel(),
            limiter: self.max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            tasks: JoinSet::new(),
            completed: HashSet::new(),
            scheduled: HashSet::new(),
            first_error: None,
        };

        let starting: Vec<String> = graph
            .nodes()
            .filter(|(_, node)| self.direction.prereqs(node).is_empty())
            .map(|(name, _)| name.to_string())
            .collect();
        for name in starting {
            traversal.launch(&name);
        }

        traversal.run(ctx).await
    }
}

/// State owned by one call to [`Walker::walk`]
struct Traversal<'g, S, O> {
    direction: Direction,
    graph: &'g Graph<S>,
    op: Arc<O>,
    /// Child of the caller's context, cancelled on the first failure
    walk_ctx: Context,
    limiter: Option<Arc<Semaphore>>,
    tasks: JoinSet<(String, TaskOutcome)>,
    completed: HashSet<String>,
    scheduled: HashSet<String>,
    first_error: Option<ConvoyError>,
}

impl<'g, S, O> Traversal<'g, S, O>
where
    S: Clone + Send + 'static,
    O: ServiceOperation<S>,
{
    async fn run(&mut self, ctx: &Context) -> Result<()> {
        let mut stall_reported = false;

        while self.first_error.is_none() && self.completed.len() < self.graph.len() {
            if !stall_reported && self.is_stalled(ctx) {
                self.report_stall();
                stall_reported = true;
            }

            tokio::select! {
                biased;

                _ = ctx.done() => {
                    self.fail(ctx.err().unwrap_or(ConvoyError::Cancelled));
                }

                Some(joined) = self.tasks.join_next() => match joined {
                    Ok((name, TaskOutcome::Done)) => self.complete(name),
                    Ok((name, TaskOutcome::Failed(err))) => {
                        self.fail(ConvoyError::operation(name, err));
                    }
                    Ok((name, TaskOutcome::Skipped)) => {
                        tracing::debug!("Skipped {} after cancellation", name);
                    }
                    Err(join_err) => {
                        self.fail(ConvoyError::Internal(format!(
                            "service task failed: {}",
                            join_err
                        )));
                    }
                },
            }
        }

        // Drain: in-flight operations observe the cancelled context
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok((name, TaskOutcome::Failed(err))) = joined {
                tracing::debug!("Discarding later failure of {}: {}", name, err);
            }
        }

        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Nothing in flight, nodes outstanding, and only cancellation can end the walk.
    ///
    /// Tasks skipped at an expired deadline also empty the set, so a done
    /// context is never a stall.
    fn is_stalled(&self, ctx: &Context) -> bool {
        self.tasks.is_empty()
            && self.first_error.is_none()
            && self.completed.len() < self.graph.len()
            && !ctx.is_done()
    }

    /// Record a node's success and launch every successor that became ready
    fn complete(&mut self, name: String) {
        tracing::debug!("Completed {}", name);
        self.completed.insert(name.clone());

        let graph = self.graph;
        let Some(node) = graph.get(&name) else {
            return;
        };
        for next in self.direction.successors(node) {
            if self.scheduled.contains(next) {
                continue;
            }
            let ready = graph
                .get(next)
                .map(|n| {
                    self.direction
                        .prereqs(n)
                        .iter()
                        .all(|p| self.completed.contains(p))
                })
                .unwrap_or(false);
            if ready {
                self.launch(next);
            }
        }
    }

    /// Keep the first error and cancel everything still running
    fn fail(&mut self, err: ConvoyError) {
        if self.first_error.is_none() {
            tracing::debug!("Stopping traversal: {}", err);
            self.first_error = Some(err);
        }
        self.walk_ctx.cancel();
    }

    fn launch(&mut self, name: &str) {
        if self.first_error.is_some() || !self.scheduled.insert(name.to_string()) {
            return;
        }
        let Some(node) = self.graph.get(name) else {
            return;
        };

        tracing::debug!("Launching {}", name);
        let service = node.service().clone();
        let name = name.to_string();
        let op = Arc::clone(&self.op);
        let ctx = self.walk_ctx.clone();
        let limiter = self.limiter.clone();

        self.tasks.spawn(async move {
            let _permit = match limiter {
                Some(sem) => {
                    tokio::select! {
                        biased;
                        _ = ctx.done() => return (name, TaskOutcome::Skipped),
                        permit = sem.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (name, TaskOutcome::Skipped),
                        },
                    }
                }
                None => None,
            };
            if ctx.is_done() {
                return (name, TaskOutcome::Skipped);
            }

            match op.call(ctx, service).await {
                Ok(()) => (name, TaskOutcome::Done),
                Err(err) => (name, TaskOutcome::Failed(err)),
            }
        });
    }

    fn report_stall(&self) {
        let blocked: Vec<&str> = self
            .graph
            .names()
            .filter(|name| !self.completed.contains(*name))
            .collect();
        match self.graph.find_cycle() {
            Some(cycle) => tracing::warn!(
                "No progress possible for {:?}: dependency cycle {}; waiting for cancellation",
                blocked,
                cycle.join(" -> ")
            ),
            None => tracing::warn!(
                "No progress possible for {:?}; waiting for cancellation",
                blocked
            ),
        }
    }
}

/// Run `op` over `graph` in `direction` with no concurrency cap
pub async fn walk<S, O>(ctx: &Context, graph: &Graph<S>, op: O, direction: Direction) -> Result<()>
where
    S: Clone + Send + 'static,
    O: ServiceOperation<S>,
{
    Walker::new(direction).walk(ctx, graph, op).await
}

/// Build a graph from `services` and run `op` dependencies-first
pub async fn in_dependency_order<S, I, O>(ctx: &Context, services: I, op: O) -> Result<()>
where
    S: ServiceDescriptor + Clone + Send + 'static,
    I: IntoIterator<Item = S>,
    O: ServiceOperation<S>,
{
    let graph = GraphBuilder::new().build(services)?;
    walk(ctx, &graph, op, Direction::Forward).await
}

/// Build a graph from `services` and run `op` dependents-first
pub async fn in_reverse_dependency_order<S, I, O>(ctx: &Context, services: I, op: O) -> Result<()>
where
    S: ServiceDescriptor + Clone + Send + 'static,
    I: IntoIterator<Item = S>,
    O: ServiceOperation<S>,
{
    let graph = GraphBuilder::new().build(services)?;
    walk(ctx, &graph, op, Direction::Backward).await
}
