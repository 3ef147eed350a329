//! Abort signalling shared by a request, its timeout, and its transport.

use crate::error::RequestError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Why a request was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// `abort()` was called by the user or an interceptor.
    Explicit(String),
    /// The configured timeout elapsed.
    Timeout(Duration),
    /// A streaming subscription was closed.
    Closed,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Explicit(reason) => write!(f, "aborted: {reason}"),
            AbortReason::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            AbortReason::Closed => f.write_str("subscription closed"),
        }
    }
}

/// One-shot, clonable abort signal.
///
/// The first abort wins; later calls are no-ops. Any number of tasks can
/// wait on [`aborted`](Self::aborted) or race a future against the signal
/// with [`guard`](Self::guard).
#[derive(Clone, Debug)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<Option<AbortReason>>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Abort with `reason`. Returns `false` if the signal had already fired.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.tx.borrow().clone()
    }

    /// Resolve once the signal fires.
    pub async fn aborted(&self) -> AbortReason {
        let mut rx = self.tx.subscribe();
        if let Ok(reason) = rx.wait_for(Option::is_some).await
            && let Some(reason) = reason.clone()
        {
            return reason;
        }
        // The sender lives as long as `self`, so the wait cannot fail.
        std::future::pending().await
    }

    /// Run `fut` unless the signal fires first.
    ///
    /// An abort (before or during) yields the abort sentinel error and drops
    /// the future, cancelling whatever it was doing.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, RequestError>
    where
        F: Future<Output = T>,
    {
        if let Some(reason) = self.reason() {
            return Err(RequestError::aborted(reason.to_string()));
        }
        tokio::select! {
            biased;
            reason = self.aborted() => Err(RequestError::aborted(reason.to_string())),
            out = fut => Ok(out),
        }
    }
}

/// Aborts the signal when the timeout elapses, unless cleared first.
///
/// Dropping the guard clears it.
pub(crate) struct TimeoutGuard {
    timer: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    /// Arm a timer. A zero timeout arms nothing.
    pub(crate) fn arm(signal: &AbortSignal, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Self { timer: None };
        }
        let signal = signal.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if signal.abort(AbortReason::Timeout(timeout)) {
                debug!(timeout_ms = timeout.as_millis() as u64, "request timed out");
            }
        });
        Self { timer: Some(timer) }
    }

    pub(crate) fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.clear();
    }
}
