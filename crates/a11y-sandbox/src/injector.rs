//! Loads a page into a sandbox session and runs the audit engine in it
//!
//! Every failure after the session is created is folded into an
//! [`AuditOutcome`]; only cancellation and container failures surface as
//! errors.

use crate::backend::EngineInvocation;
use crate::container::OffscreenContainer;
use crate::error::SandboxError;
use crate::session::{cancellable, SandboxSession, SessionState};
use a11y_core::{AuditOutcome, AuditResults, EngineResults, ScanRequest, TagSet};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Published axe-core build
pub const DEFAULT_ENGINE_SCRIPT_URL: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/axe-core/4.8.3/axe.min.js";

/// Injector tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorSettings {
    /// Script element `src` for the engine
    pub engine_script_url: String,
    /// Bound on page load
    pub load_timeout: Duration,
    /// Bound on engine readiness, and the fixed wait when readiness is unknown
    pub settle_delay: Duration,
    /// Readiness poll interval
    pub ready_poll_interval: Duration,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self {
            engine_script_url: DEFAULT_ENGINE_SCRIPT_URL.to_string(),
            load_timeout: Duration::from_millis(30_000),
            settle_delay: Duration::from_millis(1_000),
            ready_poll_interval: Duration::from_millis(100),
        }
    }
}

impl InjectorSettings {
    #[must_use]
    pub fn with_engine_script_url(mut self, url: impl Into<String>) -> Self {
        self.engine_script_url = url.into();
        self
    }

    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }
}

/// Fold a failure from the inject/run steps into an outcome
#[must_use]
pub fn classify_failure(error: &SandboxError) -> AuditOutcome {
    match error {
        SandboxError::LoadTimeout { after_ms } => AuditOutcome::TimedOut {
            after_ms: *after_ms,
        },
        SandboxError::CrossOriginBlocked(reason) => AuditOutcome::CrossOriginBlocked {
            reason: reason.clone(),
        },
        other if other.is_cross_origin() => AuditOutcome::CrossOriginBlocked {
            reason: other.to_string(),
        },
        other => AuditOutcome::InjectionFailed {
            reason: other.to_string(),
        },
    }
}

/// Drives the engine inside sandbox sessions
#[derive(Debug, Clone, Default)]
pub struct AuditInjector {
    settings: InjectorSettings,
}

impl AuditInjector {
    #[must_use]
    pub fn new(settings: InjectorSettings) -> Self {
        Self { settings }
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &InjectorSettings {
        &self.settings
    }

    /// Audit one request in a fresh session, destroying the session before
    /// returning.
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` fires
    /// - container errors when no session can be created
    pub async fn audit(
        &self,
        container: &OffscreenContainer,
        request: &ScanRequest,
        tags: &TagSet,
        cancel: &CancellationToken,
    ) -> Result<AuditOutcome, SandboxError> {
        let outcome = container
            .with_session(&request.scan_id, |session| {
                self.drive(session, &request.page_url, tags, cancel)
            })
            .await??;

        tracing::debug!(
            scan_id = %request.scan_id,
            kind = ?outcome.kind(),
            violations = outcome.violation_count(),
            "audit finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        mut session: SandboxSession,
        url: &str,
        tags: &TagSet,
        cancel: &CancellationToken,
    ) -> (SandboxSession, Result<AuditOutcome, SandboxError>) {
        if let Err(err) = session.load(url, self.settings.load_timeout, cancel).await {
            let outcome = match err {
                SandboxError::Cancelled => Err(err),
                SandboxError::LoadTimeout { .. } => Ok(classify_failure(&err)),
                other => Ok(AuditOutcome::InjectionFailed {
                    reason: other.to_string(),
                }),
            };
            return (session, outcome);
        }

        let outcome = match self.inject_and_run(&mut session, tags, cancel).await {
            Ok(results) => Ok(AuditOutcome::Completed(results)),
            Err(SandboxError::Cancelled) => {
                session.fail();
                Err(SandboxError::Cancelled)
            }
            Err(err) => {
                session.fail();
                tracing::debug!(scan_id = %session.scan_id(), error = %err, "engine did not run");
                Ok(classify_failure(&err))
            }
        };
        (session, outcome)
    }

    /// Inject the engine into a `Ready` session and run it with `tags`.
    ///
    /// Leaves the session `Done` on success.
    ///
    /// # Errors
    /// - `CrossOriginBlocked` if the document refuses script access
    /// - `ScriptLoadFailed` if the engine script fails to load
    /// - `EngineFailed` if the engine throws or returns unusable output
    /// - `Cancelled` if `cancel` fires at any suspension point
    /// - `IllegalTransition` if the session is not `Ready`
    pub async fn inject_and_run(
        &self,
        session: &mut SandboxSession,
        tags: &TagSet,
        cancel: &CancellationToken,
    ) -> Result<AuditResults, SandboxError> {
        let backend = session.backend();
        let context = session.context().clone();

        if session.state() != SessionState::Ready {
            return Err(SandboxError::IllegalTransition {
                from: session.state(),
                to: SessionState::Injecting,
            });
        }
        cancellable(cancel, backend.document_access(&context)).await?;

        session.transition(SessionState::Injecting)?;
        cancellable(
            cancel,
            backend.inject_script(&context, &self.settings.engine_script_url),
        )
        .await?;
        self.await_engine(session, cancel).await?;

        session.transition(SessionState::Running)?;
        let invocation = EngineInvocation::for_tags(tags);
        let raw = cancellable(cancel, backend.run_engine(&context, &invocation)).await?;
        let results = EngineResults::from_value(raw)
            .map_err(|err| SandboxError::EngineFailed(err.to_string()))?
            .into_results();

        session.transition(SessionState::Done)?;
        Ok(results)
    }

    /// Poll readiness up to the settle bound; fall back to the fixed settle
    /// delay when the backend cannot report readiness.
    async fn await_engine(
        &self,
        session: &SandboxSession,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        let backend = session.backend();
        let deadline = Instant::now() + self.settings.settle_delay;

        loop {
            match cancellable(cancel, backend.engine_ready(session.context())).await? {
                Some(true) => return Ok(()),
                Some(false) => {}
                None => {
                    return cancellable(cancel, async {
                        tokio::time::sleep(self.settings.settle_delay).await;
                        Ok(())
                    })
                    .await;
                }
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    scan_id = %session.scan_id(),
                    settle_ms = u64::try_from(self.settings.settle_delay.as_millis()).unwrap_or(u64::MAX),
                    "engine not ready after settle bound, running anyway"
                );
                return Ok(());
            }

            cancellable(cancel, async {
                tokio::time::sleep(self.settings.ready_poll_interval).await;
                Ok(())
            })
            .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classifies_as_timed_out() {
        let outcome = classify_failure(&SandboxError::LoadTimeout { after_ms: 30_000 });
        assert_eq!(outcome, AuditOutcome::TimedOut { after_ms: 30_000 });
    }

    #[test]
    fn security_error_classifies_as_cross_origin() {
        let outcome = classify_failure(&SandboxError::EngineFailed(
            "SecurityError: Blocked a frame".into(),
        ));
        assert!(matches!(outcome, AuditOutcome::CrossOriginBlocked { .. }));
    }

    #[test]
    fn script_failure_classifies_as_injection_failed() {
        let outcome = classify_failure(&SandboxError::ScriptLoadFailed("404".into()));
        assert!(matches!(outcome, AuditOutcome::InjectionFailed { reason } if reason.contains("404")));
    }

    #[test]
    fn settings_builders() {
        let settings = InjectorSettings::default()
            .with_load_timeout(Duration::from_secs(5))
            .with_settle_delay(Duration::from_millis(10));
        assert_eq!(settings.load_timeout, Duration::from_secs(5));
        assert_eq!(settings.settle_delay, Duration::from_millis(10));
        assert_eq!(settings.engine_script_url, DEFAULT_ENGINE_SCRIPT_URL);
    }
}
