//! Single-page scan orchestrator
//!
//! Drives one page from mode selection to persistence:
//!
//! ```text
//! Idle → ModeSelected → Scanning → Scored → Reported → Succeeded
//!   └──────────────┴───────────┴─────────┴──────────┴──→ Failed
//! ```
//!
//! Audit-side failures never fail a scan: they become unaudited outcomes with
//! a message. A page that never loads is the exception; it fails the scan
//! before anything is persisted, so an earlier stored score survives. A scan
//! also fails when it cannot get an identity, the remote runner fails,
//! persistence fails, or it is cancelled.

use crate::cms::{CmsClient, ResultsPayload};
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::mode::{ExecutionMode, ModeSelector};
use crate::phase::{PhaseRecord, PhaseTracker, ScanPhase};
use a11y_core::{
    resolve_for, score, AuditOutcome, PageRef, ScanId, ScanRequest, ScoreResult, WcagLevel,
    WcagVersion,
};
use a11y_sandbox::{AuditInjector, OffscreenContainer, SandboxBackend, SandboxError};
use serde::Serialize;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Everything known about one finished page scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub request: ScanRequest,
    pub mode: ExecutionMode,
    pub outcome: AuditOutcome,
    pub score: ScoreResult,
    /// Explanation for unaudited outcomes, or the remote runner's message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub phases: Vec<PhaseRecord>,
}

impl ScanReport {
    #[inline]
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.outcome.violation_count()
    }
}

enum Target<'a> {
    Page { page: &'a PageRef, level: WcagLevel },
    Request(ScanRequest),
}

impl Target<'_> {
    fn path(&self) -> &str {
        match self {
            Self::Page { page, .. } => &page.path,
            Self::Request(request) => &request.page_path,
        }
    }

    fn level(&self) -> WcagLevel {
        match self {
            Self::Page { level, .. } => *level,
            Self::Request(request) => request.wcag_level,
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ScanError>>,
) -> Result<T, ScanError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ScanError::Cancelled),
        result = fut => result,
    }
}

fn from_sandbox(err: SandboxError) -> ScanError {
    if err.is_cancelled() {
        ScanError::Cancelled
    } else {
        ScanError::Sandbox(err)
    }
}

/// Scans pages, one at a time per call
///
/// Owns its offscreen container; independent orchestrators never share
/// sandbox state. Clones share the container and the configuration cache.
#[derive(Clone)]
pub struct ScanOrchestrator {
    cms: Arc<dyn CmsClient>,
    container: OffscreenContainer,
    injector: AuditInjector,
    modes: ModeSelector,
    default_level: Option<WcagLevel>,
    wcag_version: Option<WcagVersion>,
}

impl Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("container", &self.container)
            .field("injector", &self.injector)
            .field("modes", &self.modes)
            .field("default_level", &self.default_level)
            .field("wcag_version", &self.wcag_version)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Orchestrator over `cms` and `backend`, tuned by `config`
    #[must_use]
    pub fn new(
        cms: Arc<dyn CmsClient>,
        backend: Arc<dyn SandboxBackend>,
        config: &ScannerConfig,
    ) -> Self {
        let modes = ModeSelector::new(Arc::clone(&cms), config.config_ttl())
            .with_fixed_mode(config.mode);
        Self {
            cms,
            container: OffscreenContainer::new(backend),
            injector: AuditInjector::new(config.injector_settings()),
            modes,
            default_level: config.default_level,
            wcag_version: config.wcag_version,
        }
    }

    #[inline]
    #[must_use]
    pub fn container(&self) -> &OffscreenContainer {
        &self.container
    }

    #[inline]
    #[must_use]
    pub fn modes(&self) -> &ModeSelector {
        &self.modes
    }

    #[inline]
    #[must_use]
    pub fn cms(&self) -> &Arc<dyn CmsClient> {
        &self.cms
    }

    /// Level for scans without an explicit one: the configured override,
    /// else the CMS configuration, else AA
    pub async fn default_level(&self) -> WcagLevel {
        self.modes.resolve_level(self.default_level).await
    }

    /// Scan `page` at `level`, asking the CMS for a scan identity first
    /// when scanning locally.
    ///
    /// # Errors
    /// See [`ScanError`]; audit-side failures are reported in the
    /// [`ScanReport`] instead.
    pub async fn scan_page(
        &self,
        page: &PageRef,
        level: WcagLevel,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let span = tracing::info_span!("scan", page = %page.path, %level);
        self.run(Target::Page { page, level }, cancel)
            .instrument(span)
            .await
    }

    /// Scan with a caller-supplied identity
    ///
    /// # Errors
    /// As [`Self::scan_page`], minus `InitiateFailed`.
    pub async fn scan_request(
        &self,
        request: ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let span = tracing::info_span!(
            "scan",
            page = %request.page_path,
            scan_id = %request.scan_id,
            level = %request.wcag_level
        );
        self.run(Target::Request(request), cancel)
            .instrument(span)
            .await
    }

    /// Tear down the offscreen container
    pub async fn shutdown(&self) {
        self.container.teardown().await;
    }

    async fn run(&self, target: Target<'_>, cancel: &CancellationToken) -> Result<ScanReport, ScanError> {
        let mut phases = PhaseTracker::new();
        match self.drive(target, &mut phases, cancel).await {
            Ok(report) => Ok(report),
            Err(err) => {
                let phase = phases.current();
                phases.fail();
                if err.is_cancelled() {
                    tracing::info!(%phase, "scan cancelled");
                } else {
                    tracing::error!(%phase, error = %err, "scan failed");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        target: Target<'_>,
        phases: &mut PhaseTracker,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let mode = self.modes.resolve(None).await;
        phases.advance(ScanPhase::ModeSelected)?;
        tracing::debug!(%mode, "execution mode selected");

        phases.advance(ScanPhase::Scanning)?;
        let (request, outcome, remote_message) = match mode {
            ExecutionMode::ClientSandboxed => {
                let (request, outcome) = self.scan_sandboxed(target, cancel).await?;
                (request, outcome, None)
            }
            ExecutionMode::ServerDelegated => self.scan_remote(target, cancel).await?,
        };
        if let AuditOutcome::TimedOut { after_ms } = outcome {
            return Err(ScanError::LoadTimeout { after_ms });
        }

        let score = score(&outcome);
        phases.advance(ScanPhase::Scored)?;
        let message = match outcome.message() {
            Some(message) => {
                tracing::warn!(scan_id = %request.scan_id, %message, "page scanned without audit");
                Some(message)
            }
            None => remote_message,
        };

        if mode == ExecutionMode::ClientSandboxed {
            let payload = ResultsPayload::new(&request, &outcome, &score);
            self.cms
                .save_results(&payload)
                .await
                .map_err(ScanError::PersistenceFailed)?;
        }
        phases.advance(ScanPhase::Reported)?;
        phases.advance(ScanPhase::Succeeded)?;

        tracing::info!(
            scan_id = %request.scan_id,
            score = score.value,
            violations = outcome.violation_count(),
            kind = ?outcome.kind(),
            "scan complete"
        );
        Ok(ScanReport {
            request,
            mode,
            outcome,
            score,
            message,
            phases: phases.history().to_vec(),
        })
    }

    async fn scan_sandboxed(
        &self,
        target: Target<'_>,
        cancel: &CancellationToken,
    ) -> Result<(ScanRequest, AuditOutcome), ScanError> {
        let request = match target {
            Target::Request(request) => request,
            Target::Page { page, level } => {
                let initiated = cancellable(cancel, async {
                    self.cms
                        .initiate_scan(&page.path, level)
                        .await
                        .map_err(ScanError::InitiateFailed)
                })
                .await?;
                initiated.into_request(page, level)
            }
        };
        tracing::debug!(scan_id = %request.scan_id, url = %request.page_url, "sandboxed scan started");

        let version = self.modes.resolve_version(self.wcag_version).await;
        let tags = resolve_for(request.wcag_level, version);
        let outcome = self
            .injector
            .audit(&self.container, &request, &tags, cancel)
            .await
            .map_err(from_sandbox)?;
        Ok((request, outcome))
    }

    async fn scan_remote(
        &self,
        target: Target<'_>,
        cancel: &CancellationToken,
    ) -> Result<(ScanRequest, AuditOutcome, Option<String>), ScanError> {
        let path = target.path().to_string();
        let level = target.level();

        let summary = cancellable(cancel, async {
            self.cms
                .server_scan(&path, level)
                .await
                .map_err(ScanError::RemoteScanFailed)
        })
        .await?;
        let detail = cancellable(cancel, async {
            self.cms
                .detailed_result(&path)
                .await
                .map_err(ScanError::RemoteScanFailed)
        })
        .await?;

        let request = match target {
            Target::Request(request) => request,
            Target::Page { page, level } => ScanRequest::new(
                summary.scan_id.clone().unwrap_or_else(ScanId::generate),
                page.path.clone(),
                summary
                    .page_url
                    .clone()
                    .or_else(|| detail.page_url.clone())
                    .unwrap_or_default(),
                page.label(),
                level,
            ),
        };

        let outcome = AuditOutcome::Completed(detail.results);
        if let Some(reported) = summary.score.or(detail.stored_score) {
            let local = f64::from(score(&outcome).value);
            if (reported - local).abs() >= 1.0 {
                tracing::debug!(reported, local, "server score differs from local score");
            }
        }
        if summary.violation_count != outcome.violation_count() {
            tracing::debug!(
                reported = summary.violation_count,
                local = outcome.violation_count(),
                "server violation count differs from detailed results"
            );
        }
        Ok((request, outcome, summary.message))
    }
}
