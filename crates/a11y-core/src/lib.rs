//! A11y Core
//!
//! Data model and pure functions of the accessibility scan engine:
//!
//! - [`WcagLevel`] / [`WcagVersion`] and the tag resolver ([`resolve`], [`resolve_for`])
//! - [`ScanRequest`] and [`PageRef`] identities
//! - [`AuditOutcome`], the typed result of one audit attempt
//! - [`score`], the severity-weighted 0-100 score
//!
//! # Example
//!
//! ```rust,ignore
//! use a11y_core::{resolve, score, AuditOutcome, WcagLevel};
//!
//! let tags = resolve(WcagLevel::AA);
//! assert!(tags.contains("wcag2aa"));
//!
//! let outcome = AuditOutcome::TimedOut { after_ms: 30_000 };
//! assert_eq!(score(&outcome).value, 100);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod audit;
pub mod request;
pub mod score;
pub mod wcag;

// Re-exports
pub use audit::{
    AuditError, AuditOutcome, AuditResults, EngineResults, Impact, NodeResult, OutcomeKind,
    RuleResult, ViolationRecord, DEFAULT_ENGINE_VERSION,
};
pub use request::{PageRef, ScanId, ScanRequest};
pub use score::{
    score, score_results, weighted_score, ImpactSummary, ScoreBand, ScoreBasis, ScoreResult,
    MAX_SCORE,
};
pub use wcag::{resolve, resolve_for, TagSet, UnknownLevel, WcagLevel, WcagVersion, BEST_PRACTICE_TAG};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with scan results
    pub use crate::{
        resolve, score, AuditOutcome, AuditResults, Impact, PageRef, ScanId, ScanRequest,
        ScoreResult, TagSet, ViolationRecord, WcagLevel,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
