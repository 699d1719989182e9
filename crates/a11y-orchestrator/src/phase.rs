//! Single-page scan state machine
//!
//! `Idle → ModeSelected → Scanning → Scored → Reported → Succeeded`, with
//! `Failed` reachable from every non-terminal phase.

use crate::error::ScanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Phase of one page scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Idle,
    ModeSelected,
    Scanning,
    Scored,
    Reported,
    /// Terminal: outcome persisted or acknowledged
    Succeeded,
    /// Terminal: anything went wrong
    Failed,
}

impl ScanPhase {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ModeSelected => "mode-selected",
            Self::Scanning => "scanning",
            Self::Scored => "scored",
            Self::Reported => "reported",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl Display for ScanPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: ScanPhase) -> &'static [ScanPhase] {
    use ScanPhase::{Failed, Idle, ModeSelected, Reported, Scanning, Scored, Succeeded};
    match from {
        Idle => &[ModeSelected, Failed],
        ModeSelected => &[Scanning, Failed],
        Scanning => &[Scored, Failed],
        Scored => &[Reported, Failed],
        Reported => &[Succeeded, Failed],
        Succeeded | Failed => &[],
    }
}

/// Check a transition
///
/// # Errors
/// `ScanError::IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: ScanPhase, to: ScanPhase) -> Result<(), ScanError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ScanError::IllegalTransition { from, to })
    }
}

/// A phase entered at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase: ScanPhase,
    pub entered_at: DateTime<Utc>,
}

/// Current phase plus the path taken to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTracker {
    history: Vec<PhaseRecord>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Tracker in `Idle`
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![PhaseRecord {
                phase: ScanPhase::Idle,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Current phase
    #[must_use]
    pub fn current(&self) -> ScanPhase {
        self.history
            .last()
            .map_or(ScanPhase::Idle, |record| record.phase)
    }

    /// Phases entered so far, oldest first
    #[must_use]
    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    /// Phase names only
    #[must_use]
    pub fn path(&self) -> Vec<ScanPhase> {
        self.history.iter().map(|record| record.phase).collect()
    }

    /// Enter `to`
    ///
    /// # Errors
    /// `ScanError::IllegalTransition` for moves outside the table.
    pub fn advance(&mut self, to: ScanPhase) -> Result<(), ScanError> {
        validate_transition(self.current(), to)?;
        self.history.push(PhaseRecord {
            phase: to,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Enter `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.history.push(PhaseRecord {
                phase: ScanPhase::Failed,
                entered_at: Utc::now(),
            });
        }
    }

    /// Consume into the recorded history
    #[must_use]
    pub fn into_history(self) -> Vec<PhaseRecord> {
        self.history
    }
}
