//! Cancellation context handed to every service operation
//!
//! A [`Context`] couples a [`CancellationToken`] with an optional deadline.
//! Derived contexts share their parent's cancellation: cancelling the parent
//! cancels every child, cancelling a child leaves the parent untouched.

use crate::error::{ConvoyError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline scope for a unit of work
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root context that is never cancelled unless asked to be
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child that can be cancelled independently of this context
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that expires at `deadline` (or earlier, if this context does)
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and everything derived from it. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why this context is done, or `None` while it is still live
    pub fn err(&self) -> Option<ConvoyError> {
        if self.token.is_cancelled() {
            return Some(ConvoyError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ConvoyError::DeadlineExceeded),
            _ => None,
        }
    }

    /// True once the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Drive `fut` to completion unless the context finishes first
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(ConvoyError::Cancelled)),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, returning early with the context's error
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_follows_parent_cancel() {
        let parent = Context::background();
        let child = parent.with_cancel();

        assert!(child.err().is_none());
        parent.cancel();
        child.done().await;
        assert!(matches!(child.err(), Some(ConvoyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.with_cancel();

        child.cancel();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        ctx.done().await;
        assert!(matches!(ctx.err(), Some(ConvoyError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.sleep(Duration::from_secs(3600)).await;
        assert!(matches!(result, Err(ConvoyError::Cancelled)));
    }
}
