//! Call context: deadline plus cancellation signal.
//!
//! Every suspension point in the pipeline (rate-limit waits, backoff
//! sleeps, transport I/O, publish retries) goes through a [`Ctx`] so that
//! cancellation is immediate and a per-call deadline bounds the whole
//! operation including retries.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::errors::FeedError;

/// Cloneable context carried down the call stack.
#[derive(Debug, Clone)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Owner side of a cancellable context. Dropping the handle does not
/// cancel; call [`CancelHandle::cancel`] explicitly.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Ctx {
    /// Context with no deadline and no cancellation signal.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Cancellable context; the returned handle aborts all work using it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// Derive a context whose deadline is the sooner of the current one and
    /// `timeout` from now.
    pub fn child_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(d) => Some(d.min(candidate)),
            None => Some(candidate),
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return true;
            }
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Error out if the context is already cancelled or expired.
    pub fn checked(&self) -> Result<(), FeedError> {
        if self.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `dur`, waking early with [`FeedError::Cancelled`] on
    /// cancellation or deadline expiry.
    pub async fn sleep(&self, dur: Duration) -> Result<(), FeedError> {
        self.checked()?;
        if let Some(remaining) = self.remaining() {
            if dur >= remaining {
                tokio::time::sleep(remaining).await;
                return Err(FeedError::Cancelled);
            }
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(dur) => Ok(()),
            _ = wait_cancelled(&mut cancel) => Err(FeedError::Cancelled),
        }
    }

    /// Run `fut` to completion unless the context is cancelled or the
    /// deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, FeedError>
    where
        F: Future<Output = T>,
    {
        self.checked()?;
        let mut cancel = self.cancel.clone();
        match self.remaining() {
            Some(remaining) => {
                tokio::select! {
                    out = tokio::time::timeout(remaining, fut) => {
                        out.map_err(|_| FeedError::Cancelled)
                    }
                    _ = wait_cancelled(&mut cancel) => Err(FeedError::Cancelled),
                }
            }
            None => {
                tokio::select! {
                    out = fut => Ok(out),
                    _ = wait_cancelled(&mut cancel) => Err(FeedError::Cancelled),
                }
            }
        }
    }
}

async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            loop {
                if *rx.borrow() {
                    return;
                }
                // Sender dropped without cancelling: never fires.
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
        None => std::future::pending().await,
    }
}
