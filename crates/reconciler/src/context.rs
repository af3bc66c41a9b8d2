//! Cancellation and deadlines for store and remote calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a call passed through [`Context::run`] did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The owning [`Canceller`] fired.
    #[error("operation cancelled")]
    Cancelled,
    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Call-scoped cancellation token and deadline.
///
/// Every [`crate::RuleClient`] and [`crate::ResourceStore`] call receives one.
/// Cloning is cheap; clones observe the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub const fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    ///
    /// An earlier deadline inherited from `self` is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(candidate)) => Some(current.min(candidate)),
            (current, candidate) => current.or(candidate),
        };

        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    /// The deadline, if any.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the context is cancelled or its deadline
    /// passes before `fut` completes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = wait_cancelled(self.cancel.clone()) => Err(Interrupted::Cancelled),
            () = expired => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

async fn wait_cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };

    // A dropped canceller never fires.
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Handle that cancels every [`Context`] derived from it.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Create a new canceller.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A root context tied to this canceller.
    pub fn context(&self) -> Context {
        Context {
            deadline: None,
            cancel: Some(self.tx.subscribe()),
        }
    }

    /// Cancel all derived contexts.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}
