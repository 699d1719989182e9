//! Severity-weighted accessibility score
//!
//! `score = max(0, round(100 - weighted / total * 100))` where `total` counts
//! passed rules plus every element a violation was found on, and `weighted`
//! sums impact weight times element count per violation. The same function
//! scores sandboxed and server-delegated scans.

use crate::audit::{AuditOutcome, AuditResults, Impact, ViolationRecord};
use serde::{Deserialize, Serialize};

/// Highest (and unaudited) score
pub const MAX_SCORE: u8 = 100;

/// Whether a score reflects an actual audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreBasis {
    /// The engine ran; the number is meaningful
    Audited,
    /// The engine never ran; the number is the legacy 100 placeholder
    Unaudited,
}

/// Violated-rule counts per impact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactSummary {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
    /// Elements flagged by any violation
    pub elements_with_issues: usize,
}

impl ImpactSummary {
    /// Tally violations
    #[must_use]
    pub fn from_violations(violations: &[ViolationRecord]) -> Self {
        violations.iter().fold(Self::default(), |mut acc, v| {
            match v.impact {
                Impact::Critical => acc.critical += 1,
                Impact::Serious => acc.serious += 1,
                Impact::Moderate => acc.moderate += 1,
                Impact::Minor => acc.minor += 1,
            }
            acc.elements_with_issues += v.nodes.len();
            acc
        })
    }

    /// Total violated rules
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor
    }
}

/// Display band for a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    /// 90 and above
    Good,
    /// 70 to 89
    Warning,
    /// Below 70
    Poor,
}

impl ScoreBand {
    /// Band for a score value
    #[inline]
    #[must_use]
    pub const fn of(score: u8) -> Self {
        if score >= 90 {
            Self::Good
        } else if score >= 70 {
            Self::Warning
        } else {
            Self::Poor
        }
    }
}

/// Score derived from an audit outcome
///
/// Never stored on its own; it is recomputed from the outcome it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// 0..=100
    pub value: u8,
    pub basis: ScoreBasis,
    /// Passed rules plus violation elements
    pub total_elements: usize,
    pub weighted_violations: u64,
    pub impact_summary: ImpactSummary,
}

impl ScoreResult {
    /// True when the engine actually ran
    #[inline]
    #[must_use]
    pub fn is_audited(&self) -> bool {
        self.basis == ScoreBasis::Audited
    }

    /// Display band
    #[inline]
    #[must_use]
    pub fn band(&self) -> ScoreBand {
        ScoreBand::of(self.value)
    }

    fn unaudited() -> Self {
        Self {
            value: MAX_SCORE,
            basis: ScoreBasis::Unaudited,
            total_elements: 0,
            weighted_violations: 0,
            impact_summary: ImpactSummary::default(),
        }
    }
}

/// Score any outcome. Outcomes where the engine did not run score 100 with
/// [`ScoreBasis::Unaudited`].
#[must_use]
pub fn score(outcome: &AuditOutcome) -> ScoreResult {
    match outcome {
        AuditOutcome::Completed(results) => score_results(results),
        AuditOutcome::CrossOriginBlocked { .. }
        | AuditOutcome::TimedOut { .. }
        | AuditOutcome::InjectionFailed { .. } => ScoreResult::unaudited(),
    }
}

/// Score completed engine results
#[must_use]
pub fn score_results(results: &AuditResults) -> ScoreResult {
    let impact_summary = ImpactSummary::from_violations(&results.violations);
    let total_elements = results.passes.len() + impact_summary.elements_with_issues;
    let weighted_violations: u64 = results
        .violations
        .iter()
        .map(|v| u64::from(v.impact.weight()) * v.nodes.len() as u64)
        .sum();

    ScoreResult {
        value: weighted_score(weighted_violations, total_elements),
        basis: ScoreBasis::Audited,
        total_elements,
        weighted_violations,
        impact_summary,
    }
}

/// `max(0, round(100 - weighted / total * 100))`, 100 when nothing was examined
///
/// Evaluated in integer arithmetic so halves always round up.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn weighted_score(weighted: u64, total_elements: usize) -> u8 {
    if total_elements == 0 {
        return MAX_SCORE;
    }
    let total = total_elements as i128;
    let scaled = 100 * (total - i128::from(weighted));
    if scaled <= 0 {
        return 0;
    }
    ((2 * scaled + total) / (2 * total)).min(i128::from(MAX_SCORE)) as u8
}
