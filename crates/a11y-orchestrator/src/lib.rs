//! A11y Orchestrator
//!
//! Decides how each page is audited and drives audits to completion:
//!
//! - [`ModeSelector`]: sandboxed or server-delegated, from cached CMS configuration
//! - [`ScanOrchestrator`]: one page through `Idle → … → Succeeded | Failed`
//! - [`BatchScheduler`]: many pages in windows, with a progress stream
//! - [`CmsClient`]: the CMS boundary; [`HttpCmsClient`] is the REST implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use a11y_orchestrator::prelude::*;
//! use std::sync::Arc;
//!
//! let config = ScannerConfig::load("scanner.toml".as_ref())?;
//! let cms = Arc::new(HttpCmsClient::new(&config.cms_base_url, config.request_timeout())?);
//! let backend = Arc::new(WebDriverBackend::new(config.webdriver_config())?);
//! let orchestrator = ScanOrchestrator::new(cms, backend, &config);
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let job = BatchJob::new(pages, WcagLevel::AA, config.batch.concurrency);
//! let report = BatchScheduler::new(orchestrator.clone(), &config.batch)
//!     .run(job, Some(&tx), &CancellationToken::new())
//!     .await;
//! orchestrator.shutdown().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod batch;
pub mod cms;
pub mod config;
pub mod error;
pub mod mode;
pub mod orchestrator;
pub mod phase;

// Re-exports
pub use batch::{BatchEntry, BatchJob, BatchProgress, BatchReport, BatchScheduler};
pub use cms::{
    AxeResultsPayload, CmsClient, DetailedResult, HttpCmsClient, InitiatedScan, ResultsPayload,
    ServerScanSummary, CROSS_ORIGIN_TITLE_SUFFIX,
};
pub use config::{BatchSettings, ScannerConfig, DEFAULT_CMS_BASE_URL, DEFAULT_WEBDRIVER_URL};
pub use error::{CmsError, ConfigError, ScanError};
pub use mode::{ExecutionMode, ModeSelector, RemoteConfiguration};
pub use orchestrator::{ScanOrchestrator, ScanReport};
pub use phase::{PhaseRecord, PhaseTracker, ScanPhase};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running scans
    pub use crate::{
        BatchJob, BatchProgress, BatchReport, BatchScheduler, CmsClient, ExecutionMode,
        HttpCmsClient, ScanError, ScanOrchestrator, ScanReport, ScannerConfig,
    };
    pub use a11y_sandbox::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
