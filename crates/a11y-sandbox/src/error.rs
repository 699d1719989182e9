//! Error types for the sandbox layer
//!
//! Failures here are classified by the injector into audit outcomes; only
//! cancellation and container-level failures escape to the orchestrator.

use crate::session::SessionState;
use regex::Regex;
use std::sync::OnceLock;

/// Sandbox error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// Page did not fire its load event in time
    #[error("page load timed out after {after_ms}ms")]
    LoadTimeout { after_ms: u64 },

    /// Navigation failed outright
    #[error("page failed to load: {0}")]
    LoadFailed(String),

    /// Same-origin access into the document was refused
    #[error("cross-origin access refused: {0}")]
    CrossOriginBlocked(String),

    /// Engine script reported a load error
    #[error("engine script failed to load: {0}")]
    ScriptLoadFailed(String),

    /// Engine threw or returned unusable output
    #[error("engine failed: {0}")]
    EngineFailed(String),

    /// No context could be allocated
    #[error("sandbox context unavailable: {0}")]
    ContextUnavailable(String),

    /// Backend transport or protocol failure
    #[error("sandbox backend error: {0}")]
    Backend(String),

    /// Session state machine violation
    #[error("illegal session transition: {from:?} -> {to:?}")]
    IllegalTransition { from: SessionState, to: SessionState },

    /// Container was torn down
    #[error("offscreen container has been torn down")]
    ContainerClosed,

    /// Cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

impl SandboxError {
    /// True for explicit cross-origin refusals and failures whose message
    /// carries a browser security error.
    #[must_use]
    pub fn is_cross_origin(&self) -> bool {
        match self {
            Self::CrossOriginBlocked(_) => true,
            Self::ScriptLoadFailed(msg) | Self::EngineFailed(msg) | Self::Backend(msg) => {
                cross_origin_pattern().is_some_and(|re| re.is_match(msg))
            }
            _ => false,
        }
    }

    /// True when no session could be created or the container is gone
    #[inline]
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::ContextUnavailable(_) | Self::ContainerClosed | Self::IllegalTransition { .. }
        )
    }

    /// True when the caller cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn cross_origin_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)cross-origin|cross origin|securityerror|blocked a frame|permission denied")
                .ok()
        })
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_refusal_is_cross_origin() {
        assert!(SandboxError::CrossOriginBlocked("nope".into()).is_cross_origin());
    }

    #[test]
    fn security_messages_are_cross_origin() {
        let err = SandboxError::EngineFailed(
            "SecurityError: Blocked a frame with origin \"http://a\" from accessing".into(),
        );
        assert!(err.is_cross_origin());

        let err = SandboxError::Backend("Permission denied to access property".into());
        assert!(err.is_cross_origin());
    }

    #[test]
    fn other_failures_are_not_cross_origin() {
        assert!(!SandboxError::ScriptLoadFailed("404".into()).is_cross_origin());
        assert!(!SandboxError::LoadTimeout { after_ms: 1 }.is_cross_origin());
        assert!(!SandboxError::Cancelled.is_cross_origin());
    }

    #[test]
    fn classification_helpers() {
        assert!(SandboxError::ContainerClosed.is_infrastructure());
        assert!(SandboxError::Cancelled.is_cancelled());
        assert!(!SandboxError::EngineFailed("x".into()).is_infrastructure());
    }
}
