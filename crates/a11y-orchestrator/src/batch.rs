//! Windowed batch scanning with per-completion progress
//!
//! Pages run in consecutive windows of `concurrency`. Each window is joined
//! before the next starts, with a pause in between. Progress is emitted as
//! each page finishes, in completion order. A failed page never stops the
//! batch and nothing is retried.

use crate::config::BatchSettings;
use crate::orchestrator::{ScanOrchestrator, ScanReport};
use a11y_core::{PageRef, WcagLevel};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Pages to scan and how many at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub pages: Vec<PageRef>,
    pub wcag_level: WcagLevel,
    concurrency: usize,
}

impl BatchJob {
    /// Job over `pages`; a concurrency of 0 is raised to 1
    #[must_use]
    pub fn new(pages: Vec<PageRef>, wcag_level: WcagLevel, concurrency: usize) -> Self {
        Self {
            pages,
            wcag_level,
            concurrency: concurrency.max(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Progress after one page finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Pages finished so far
    pub current: usize,
    pub total: usize,
    /// Title (or path) of the page that just finished
    pub current_page_label: String,
    /// `round(current / total * 100)`
    pub percentage: u8,
}

impl BatchProgress {
    fn new(current: usize, total: usize, label: &str) -> Self {
        Self {
            current,
            total,
            current_page_label: label.to_string(),
            percentage: percentage(current, total),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((200 * current + total) / (2 * total)).min(100) as u8
}

/// Result of one page in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub page: PageRef,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_count: Option<usize>,
    /// Explanation when the page was not audited, or the remote runner's note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn from_result(page: PageRef, result: Result<ScanReport, crate::ScanError>) -> Self {
        match result {
            Ok(report) => Self {
                page,
                success: true,
                score: Some(report.score.value),
                violation_count: Some(report.violation_count()),
                message: report.message,
                error: None,
            },
            Err(err) => Self {
                page,
                success: false,
                score: None,
                violation_count: None,
                message: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Terminal result of a batch
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// One entry per page that was started, in job order
    pub entries: Vec<BatchEntry>,
    /// Pages never started because the batch was cancelled
    pub skipped: Vec<PageRef>,
    pub cancelled: bool,
}

impl BatchReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.success).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// Every page ran and succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.skipped.is_empty() && self.entries.iter().all(|e| e.success)
    }
}

/// Runs batch jobs on one orchestrator
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    orchestrator: ScanOrchestrator,
    window_delay: Duration,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(orchestrator: ScanOrchestrator, settings: &BatchSettings) -> Self {
        Self {
            orchestrator,
            window_delay: settings.window_delay(),
        }
    }

    #[must_use]
    pub fn with_window_delay(mut self, delay: Duration) -> Self {
        self.window_delay = delay;
        self
    }

    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &ScanOrchestrator {
        &self.orchestrator
    }

    /// Run `job`, sending progress to `progress` when given.
    ///
    /// Cancelling stops new windows from starting and aborts in-flight scans
    /// at their next suspension point; their sessions are still released.
    pub async fn run(
        &self,
        job: BatchJob,
        progress: Option<&UnboundedSender<BatchProgress>>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let total = job.pages.len();
        let finished = AtomicUsize::new(0);
        let mut report = BatchReport::default();
        tracing::info!(total, concurrency = job.concurrency, level = %job.wcag_level, "batch started");

        let windows: Vec<&[PageRef]> = job.pages.chunks(job.concurrency).collect();
        for (index, window) in windows.iter().enumerate() {
            if index > 0 && !self.window_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.window_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                report
                    .skipped
                    .extend(windows[index..].iter().flat_map(|w| w.iter().cloned()));
                break;
            }

            tracing::debug!(window = index, size = window.len(), "window started");
            let scans = window.iter().map(|page| {
                let finished = &finished;
                async move {
                    let result = self
                        .orchestrator
                        .scan_page(page, job.wcag_level, cancel)
                        .await;
                    let current = finished.fetch_add(1, Ordering::AcqRel) + 1;
                    if let Some(progress) = progress {
                        // receiver may be gone; the batch still completes
                        let _ = progress.send(BatchProgress::new(current, total, page.label()));
                    }
                    BatchEntry::from_result(page.clone(), result)
                }
            });
            report.entries.extend(join_all(scans).await);
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "batch finished"
        );
        report
    }
}
