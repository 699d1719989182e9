//! Error types for the orchestrator
//!
//! - [`CmsError`]: failures talking to the CMS
//! - [`ConfigError`]: invalid or unreadable scanner configuration
//! - [`ScanError`]: why a single-page scan did not reach `Success`

use crate::phase::ScanPhase;
use a11y_sandbox::SandboxError;
use std::path::PathBuf;

/// CMS boundary error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmsError {
    /// Request never completed
    #[error("CMS request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// CMS answered with a non-success status
    #[error("CMS returned {status} for {endpoint}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// CMS answered with `success: false`
    #[error("CMS rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },

    /// Body could not be decoded
    #[error("invalid CMS response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl CmsError {
    /// Transient failures a caller may retry. Scans themselves never retry.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Rejected { .. } | Self::InvalidResponse { .. } => false,
        }
    }

    /// Endpoint the failure came from
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Rejected { endpoint, .. }
            | Self::InvalidResponse { endpoint, .. } => endpoint,
        }
    }
}

/// Scanner configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Single-page scan error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    /// The CMS did not allocate a scan identity
    #[error("failed to initiate scan: {0}")]
    InitiateFailed(CmsError),

    /// The outcome was not persisted
    #[error("failed to persist scan results: {0}")]
    PersistenceFailed(CmsError),

    /// Configuration could not be fetched
    #[error("scanner configuration unavailable: {0}")]
    ConfigurationUnavailable(CmsError),

    /// The server-side runner failed
    #[error("server-side scan failed: {0}")]
    RemoteScanFailed(CmsError),

    /// The page never finished loading; nothing was persisted
    #[error("page load timed out after {after_ms}ms")]
    LoadTimeout { after_ms: u64 },

    /// Sandbox infrastructure failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Orchestrator state machine violation
    #[error("illegal scan transition: {from} -> {to}")]
    IllegalTransition { from: ScanPhase, to: ScanPhase },

    /// Cancelled by the caller
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Failed while persisting, after the audit itself finished
    #[inline]
    #[must_use]
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::PersistenceFailed(_))
    }

    /// Failed before or during the audit
    #[inline]
    #[must_use]
    pub fn is_audit_failure(&self) -> bool {
        matches!(
            self,
            Self::InitiateFailed(_)
                | Self::RemoteScanFailed(_)
                | Self::LoadTimeout { .. }
                | Self::Sandbox(_)
        )
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Sandbox(SandboxError::Cancelled))
    }
}
