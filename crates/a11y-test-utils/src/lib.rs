//! Testing utilities for the a11y-scan workspace
//!
//! Scripted sandbox backend, in-memory CMS, and engine output fixtures.

#![allow(missing_docs)]

mod backend;
mod cms;
pub mod fixtures;

pub use backend::{FakeBackend, PageBehaviour};
pub use cms::{page_url, InMemoryCms, SITE_URL};

use a11y_core::PageRef;
use a11y_orchestrator::{ExecutionMode, ScanOrchestrator, ScannerConfig};
use std::sync::Arc;
use std::time::Duration;

/// Config for fast local tests: sandboxed mode, short timeouts, no window delay
pub fn test_config() -> ScannerConfig {
    ScannerConfig::default()
        .with_mode(ExecutionMode::ClientSandboxed)
        .with_load_timeout(Duration::from_millis(200))
        .with_settle_delay(Duration::from_millis(20))
        .with_window_delay(Duration::ZERO)
}

/// Orchestrator over the given fakes
pub fn orchestrator(
    cms: &Arc<InMemoryCms>,
    backend: &Arc<FakeBackend>,
    config: &ScannerConfig,
) -> ScanOrchestrator {
    ScanOrchestrator::new(cms.clone(), backend.clone(), config)
}

/// Pages `/page-1` .. `/page-n`, titled `Page 1` .. `Page n`
pub fn pages(n: usize) -> Vec<PageRef> {
    (1..=n)
        .map(|i| PageRef::new(format!("/page-{i}")).with_title(format!("Page {i}")))
        .collect()
}
