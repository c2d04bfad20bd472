//! Per-service operations run by the walker
//!
//! An operation receives the walker's [`Context`] and its own copy of the
//! service. The walker calls it at most once per service and only after the
//! service's prerequisites have finished. Returning `Ok(())` releases the
//! service's successors; any error stops the traversal. Operations must
//! return promptly once the context is done, the walker cannot abort them.

use crate::context::Context;
use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Boxed future returned by [`ServiceOperation::call`]
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Work applied to a single service
pub trait ServiceOperation<S>: Send + Sync + 'static {
    fn call(&self, ctx: Context, service: S) -> OperationFuture;
}

impl<S, F, Fut> ServiceOperation<S> for F
where
    F: Fn(Context, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, ctx: Context, service: S) -> OperationFuture {
        Box::pin(self(ctx, service))
    }
}

/// How a service's operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// Wraps an operation and records the outcome of every invocation
///
/// The walker only reports the first error; wrap the operation in a
/// `Recorder` to see what happened to each service.
pub struct Recorder<O> {
    inner: O,
    outcomes: Arc<Mutex<Vec<(String, Outcome)>>>,
}

impl<O> Recorder<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the outcomes, in completion order
    pub fn outcomes(&self) -> Arc<Mutex<Vec<(String, Outcome)>>> {
        Arc::clone(&self.outcomes)
    }
}

/// Snapshot of recorded outcomes keyed by service name
pub fn outcome_map(outcomes: &Mutex<Vec<(String, Outcome)>>) -> HashMap<String, Outcome> {
    match outcomes.lock() {
        Ok(guard) => guard.iter().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    }
}

impl<S, O> ServiceOperation<S> for Recorder<O>
where
    S: super::graph::ServiceDescriptor + Send + 'static,
    O: ServiceOperation<S>,
{
    fn call(&self, ctx: Context, service: S) -> OperationFuture {
        let name = service.name().to_string();
        let outcomes = Arc::clone(&self.outcomes);
        let fut = self.inner.call(ctx, service);
        Box::pin(async move {
            let result = fut.await;
            let outcome = match &result {
                Ok(()) => Outcome::Done,
                Err(e) => Outcome::Failed(e.to_string()),
            };
            match outcomes.lock() {
                Ok(mut guard) => guard.push((name, outcome)),
                Err(poisoned) => poisoned.into_inner().push((name, outcome)),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::graph::BareService;
    use crate::error::ConvoyError;

    #[tokio::test]
    async fn test_closure_is_an_operation() {
        let op = |_ctx: Context, service: BareService| async move {
            if service.name == "bad" {
                Err(ConvoyError::Backend("nope".to_string()))
            } else {
                Ok(())
            }
        };

        assert!(op.call(Context::background(), BareService::new("ok", &[])).await.is_ok());
        assert!(op.call(Context::background(), BareService::new("bad", &[])).await.is_err());
    }

    #[tokio::test]
    async fn test_recorder_captures_outcomes() {
        let recorder = Recorder::new(|_ctx: Context, service: BareService| async move {
            if service.name == "bad" {
                Err(ConvoyError::Backend("nope".to_string()))
            } else {
                Ok(())
            }
        });
        let outcomes = recorder.outcomes();

        let _ = recorder.call(Context::background(), BareService::new("ok", &[])).await;
        let _ = recorder.call(Context::background(), BareService::new("bad", &[])).await;

        let map = outcome_map(&outcomes);
        assert_eq!(map.get("ok"), Some(&Outcome::Done));
        assert!(matches!(map.get("bad"), Some(Outcome::Failed(msg)) if msg.contains("nope")));
    }
}
