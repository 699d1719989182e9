//! Shared offscreen container hosting every sandbox session
//!
//! One container per orchestrator. It attaches lazily on the first session,
//! tracks live contexts by scan id, and is torn down explicitly.

use crate::backend::{ContextId, SandboxBackend};
use crate::error::SandboxError;
use crate::session::SandboxSession;
use a11y_core::ScanId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Session counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub created: u64,
    pub destroyed: u64,
    pub live: usize,
}

impl ContainerStats {
    /// True when every created session has been destroyed
    #[inline]
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.created == self.destroyed && self.live == 0
    }
}

/// State shared between the container handle and its sessions
pub(crate) struct ContainerShared {
    backend: Arc<dyn SandboxBackend>,
    attached: OnceCell<()>,
    /// `None` marks a slot reserved while its context is being created
    live: DashMap<ScanId, Option<ContextId>>,
    created: AtomicU64,
    destroyed: AtomicU64,
    closed: AtomicBool,
}

impl Debug for ContainerShared {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerShared")
            .field("backend", &self.backend)
            .field("attached", &self.attached.initialized())
            .field("live", &self.live.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ContainerShared {
    pub(crate) fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    /// Discard the context registered for `scan_id`, if still registered.
    pub(crate) async fn release(&self, scan_id: &ScanId) {
        let Some((_, Some(context))) = self.live.remove(scan_id) else {
            return;
        };
        self.discard(scan_id, &context).await;
    }

    /// Unregister without a runtime to discard on
    pub(crate) fn forget(&self, scan_id: &ScanId) {
        // a reserved slot was never counted as created
        if let Some((_, Some(context))) = self.live.remove(scan_id) {
            self.destroyed.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(%scan_id, %context, "no runtime available; context leaked to backend");
        }
    }

    async fn discard(&self, scan_id: &ScanId, context: &ContextId) {
        if let Err(err) = self.backend.discard_context(context).await {
            tracing::warn!(%scan_id, %context, error = %err, "failed to discard sandbox context");
        }
        self.destroyed.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(%scan_id, %context, "sandbox session destroyed");
    }
}

/// Offscreen container handle
///
/// Cheap to clone; clones share the same contexts and counters.
#[derive(Debug, Clone)]
pub struct OffscreenContainer {
    shared: Arc<ContainerShared>,
}

impl OffscreenContainer {
    /// Container over `backend`. Nothing is attached until the first session.
    #[must_use]
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            shared: Arc::new(ContainerShared {
                backend,
                attached: OnceCell::new(),
                live: DashMap::new(),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// True once the backend has been attached
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.attached.initialized()
    }

    /// True after `teardown`
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            created: self.shared.created.load(Ordering::Acquire),
            destroyed: self.shared.destroyed.load(Ordering::Acquire),
            live: self.shared.live.len(),
        }
    }

    /// Allocate a session for `scan_id`.
    ///
    /// # Errors
    /// - `ContainerClosed` after `teardown`
    /// - `ContextUnavailable` if `scan_id` already has a live session
    /// - any backend error from attaching or creating the context
    pub async fn create_session(&self, scan_id: &ScanId) -> Result<SandboxSession, SandboxError> {
        if self.is_closed() {
            return Err(SandboxError::ContainerClosed);
        }

        self.shared
            .attached
            .get_or_try_init(|| async {
                tracing::info!("attaching offscreen container");
                self.shared.backend.attach().await
            })
            .await?;

        match self.shared.live.entry(scan_id.clone()) {
            Entry::Occupied(_) => {
                return Err(SandboxError::ContextUnavailable(format!(
                    "scan {scan_id} already has a live session"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(None);
            }
        }

        let context = match self.shared.backend.create_context(scan_id.as_str()).await {
            Ok(context) => context,
            Err(err) => {
                self.shared.live.remove(scan_id);
                return Err(err);
            }
        };

        if self.is_closed() {
            self.shared.live.remove(scan_id);
            if let Err(err) = self.shared.backend.discard_context(&context).await {
                tracing::warn!(%scan_id, error = %err, "failed to discard context created during teardown");
            }
            return Err(SandboxError::ContainerClosed);
        }

        self.shared.live.insert(scan_id.clone(), Some(context.clone()));
        self.shared.created.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(%scan_id, %context, "sandbox session created");

        Ok(SandboxSession::new(
            scan_id.clone(),
            context,
            Arc::clone(&self.shared),
        ))
    }

    /// Run `body` with a fresh session and destroy it afterwards.
    ///
    /// `body` takes the session by value and hands it back with its output,
    /// so the session cannot outlive this call.
    ///
    /// # Errors
    /// Errors from [`Self::create_session`]; `body`'s own failures belong in `T`.
    pub async fn with_session<T, F, Fut>(&self, scan_id: &ScanId, body: F) -> Result<T, SandboxError>
    where
        F: FnOnce(SandboxSession) -> Fut,
        Fut: Future<Output = (SandboxSession, T)>,
    {
        let session = self.create_session(scan_id).await?;
        let (mut session, output) = body(session).await;
        session.destroy().await;
        Ok(output)
    }

    /// Discard every live context and detach the backend. Idempotent.
    pub async fn teardown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let scan_ids: Vec<ScanId> = self
            .shared
            .live
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if !scan_ids.is_empty() {
            tracing::warn!(count = scan_ids.len(), "tearing down with live sandbox sessions");
        }
        for scan_id in &scan_ids {
            self.shared.release(scan_id).await;
        }

        if self.is_attached() {
            if let Err(err) = self.shared.backend.detach().await {
                tracing::warn!(error = %err, "failed to detach offscreen container");
            }
        }
        let stats = self.stats();
        tracing::info!(
            created = stats.created,
            destroyed = stats.destroyed,
            "offscreen container torn down"
        );
    }
}
