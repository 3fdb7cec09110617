//! One-shot session termination signal shared by every session loop

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// No inbound message within the inactivity window
    Inactivity,
    /// Session lifetime cap reached
    MaxDuration,
    /// Agent closed the connection
    PeerClosed,
    /// `close()` was called locally
    LocalClose,
    /// A loop hit an unrecoverable error
    Failed(String),
}

impl CloseReason {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactivity => f.write_str("inactivity timeout"),
            Self::MaxDuration => f.write_str("max duration reached"),
            Self::PeerClosed => f.write_str("closed by agent"),
            Self::LocalClose => f.write_str("closed locally"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Cloneable termination handle; the first trigger wins, later ones are no-ops
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    reason: Mutex<Option<CloseReason>>,
    fired: watch::Sender<bool>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                reason: Mutex::new(None),
                fired,
            }),
        }
    }

    /// Record `reason` and wake every waiter
    ///
    /// Returns `false` if the signal had already fired.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        let mut slot = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::trace!(%reason, "shutdown already triggered");
            return false;
        }
        tracing::debug!(%reason, "session shutdown triggered");
        *slot = Some(reason);
        drop(slot);

        self.inner.fired.send_replace(true);
        true
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.inner.fired.borrow()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CloseReason> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve once the signal has fired
    pub async fn fired(&self) {
        let mut rx = self.inner.fired.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("reason", &self.reason())
            .finish()
    }
}
