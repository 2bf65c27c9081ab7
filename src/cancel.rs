//! Explicit cancellation for in-flight file system operations
//!
//! Dropping an operation's future already cancels it and releases every
//! scoped resource it acquired. This module gives callers a signal they can
//! hand around: a `CancellationSource` is kept by whoever decides to cancel,
//! and `CancellationToken`s are given to the tasks doing the work.

use std::fmt;
use std::future::Future;
use tokio::sync::watch;

/// The operation was abandoned before it completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Owner side of a cancellation signal
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Cancel every operation running under a token of this source
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancellationToken {
    /// A token that is never cancelled
    pub fn none() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation has been requested.
    ///
    /// Never resolves for `CancellationToken::none()` or when the source is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `operation` unless cancellation arrives first.
    ///
    /// On cancellation the operation's future is dropped before this returns,
    /// so any handle it held has been released.
    pub async fn run<F>(&self, operation: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => {
                tracing::debug!("operation cancelled");
                Err(Cancelled)
            }
            output = operation => Ok(output),
        }
    }
}
