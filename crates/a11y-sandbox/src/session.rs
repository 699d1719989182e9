//! One hidden browsing context serving one scan request
//!
//! Sessions are created by [`crate::OffscreenContainer`] and must be
//! destroyed by their owner; [`crate::OffscreenContainer::with_session`] does
//! that automatically. A session dropped without `destroy` is released in the
//! background and logged.

use crate::backend::{ContextId, SandboxBackend};
use crate::container::ContainerShared;
use crate::error::SandboxError;
use a11y_core::ScanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Context allocated, nothing loaded
    Created,
    /// Navigation in flight
    Loading,
    /// Page loaded
    Ready,
    /// Engine script being inserted
    Injecting,
    /// Engine running
    Running,
    /// Engine produced results
    Done,
    /// Any step failed
    Failed,
}

impl SessionState {
    /// True for `Done` and `Failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: SessionState) -> &'static [SessionState] {
    use SessionState::{Created, Done, Failed, Injecting, Loading, Ready, Running};
    match from {
        Created => &[Loading, Failed],
        Loading => &[Ready, Failed],
        Ready => &[Injecting, Failed],
        Injecting => &[Running, Failed],
        Running => &[Done, Failed],
        Done | Failed => &[],
    }
}

/// Check a transition against the lifecycle table
///
/// # Errors
/// `SandboxError::IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), SandboxError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SandboxError::IllegalTransition { from, to })
    }
}

/// Race `fut` against cancellation
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, SandboxError>>,
) -> Result<T, SandboxError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SandboxError::Cancelled),
        result = fut => result,
    }
}

/// Hidden browsing context bound to one scan id
#[derive(Debug)]
pub struct SandboxSession {
    scan_id: ScanId,
    context: ContextId,
    state: SessionState,
    created_at: DateTime<Utc>,
    container: Arc<ContainerShared>,
    released: bool,
}

impl SandboxSession {
    pub(crate) fn new(scan_id: ScanId, context: ContextId, container: Arc<ContainerShared>) -> Self {
        Self {
            scan_id,
            context,
            state: SessionState::Created,
            created_at: Utc::now(),
            container,
            released: false,
        }
    }

    /// Scan this session serves
    #[inline]
    #[must_use]
    pub fn scan_id(&self) -> &ScanId {
        &self.scan_id
    }

    /// Backend context handle
    #[inline]
    #[must_use]
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True once `destroy` has run
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.released
    }

    pub(crate) fn backend(&self) -> Arc<dyn SandboxBackend> {
        Arc::clone(self.container.backend())
    }

    /// Move to `to`
    ///
    /// # Errors
    /// `SandboxError::IllegalTransition` for moves outside the lifecycle
    /// table, or any move after `destroy`.
    pub fn transition(&mut self, to: SessionState) -> Result<(), SandboxError> {
        if self.released {
            return Err(SandboxError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        validate_transition(self.state, to)?;
        tracing::trace!(scan_id = %self.scan_id, from = ?self.state, to = ?to, "session transition");
        self.state = to;
        Ok(())
    }

    /// Mark failed unless already terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Navigate to `url`, resolving once the page has loaded.
    ///
    /// Exactly one of load, timeout or cancellation wins; the losers are
    /// dropped.
    ///
    /// # Errors
    /// - `LoadTimeout` if the page is not loaded within `timeout`
    /// - `LoadFailed` or a backend error if navigation fails
    /// - `Cancelled` if `cancel` fires first
    pub async fn load(
        &mut self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        self.transition(SessionState::Loading)?;
        let backend = self.backend();
        let context = self.context.clone();
        let navigation = async move {
            match tokio::time::timeout(timeout, backend.navigate(&context, url)).await {
                Ok(result) => result,
                Err(_) => Err(SandboxError::LoadTimeout {
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        };

        let loaded = cancellable(cancel, navigation).await;
        match loaded {
            Ok(()) => {
                self.transition(SessionState::Ready)?;
                tracing::debug!(scan_id = %self.scan_id, url, "page loaded");
                Ok(())
            }
            Err(err) => {
                self.fail();
                tracing::debug!(scan_id = %self.scan_id, url, error = %err, "page load failed");
                Err(err)
            }
        }
    }

    /// Detach and discard the context. Safe to call more than once.
    pub async fn destroy(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.container.release(&self.scan_id).await;
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::warn!(
            scan_id = %self.scan_id,
            context = %self.context,
            "sandbox session dropped without destroy; releasing in background"
        );
        let container = Arc::clone(&self.container);
        let scan_id = self.scan_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { container.release(&scan_id).await });
            }
            Err(_) => container.forget(&scan_id),
        }
    }
}
