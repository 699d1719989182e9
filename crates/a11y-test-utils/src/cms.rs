//! In-memory CMS

use a11y_core::{PageRef, ScanId, WcagLevel};
use a11y_orchestrator::{
    CmsClient, CmsError, DetailedResult, InitiatedScan, RemoteConfiguration, ResultsPayload,
    ServerScanSummary,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Base URL pages are served from
pub const SITE_URL: &str = "http://site.test";

/// URL the in-memory CMS hands out for `path`
pub fn page_url(path: &str) -> String {
    format!("{SITE_URL}{path}.html")
}

/// [`CmsClient`] backed by in-memory state, with switches for failures
#[derive(Debug, Default)]
pub struct InMemoryCms {
    pages: Mutex<Vec<PageRef>>,
    configuration: Mutex<Option<RemoteConfiguration>>,
    server_results: Mutex<HashMap<String, Value>>,
    failing_saves: Mutex<HashSet<String>>,
    saved: Mutex<Vec<ResultsPayload>>,
    next_scan: AtomicU64,
    configuration_fetches: AtomicUsize,
    server_scans: AtomicUsize,
}

impl InMemoryCms {
    /// CMS with no pages and unavailable configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(self, pages: impl IntoIterator<Item = PageRef>) -> Self {
        self.pages.lock().extend(pages);
        self
    }

    pub fn with_configuration(self, configuration: RemoteConfiguration) -> Self {
        *self.configuration.lock() = Some(configuration);
        self
    }

    /// Raw engine output the server-side runner produces for `path`
    pub fn with_server_result(self, path: impl Into<String>, results: Value) -> Self {
        self.server_results.lock().insert(path.into(), results);
        self
    }

    /// Make `POST scan/results` fail for `path`
    pub fn failing_save_for(self, path: impl Into<String>) -> Self {
        self.failing_saves.lock().insert(path.into());
        self
    }

    /// Payloads persisted so far
    pub fn saved(&self) -> Vec<ResultsPayload> {
        self.saved.lock().clone()
    }

    /// Persisted payload for `path`, if any
    pub fn saved_for(&self, path: &str) -> Option<ResultsPayload> {
        self.saved.lock().iter().find(|p| p.page_path == path).cloned()
    }

    pub fn configuration_fetches(&self) -> usize {
        self.configuration_fetches.load(Ordering::SeqCst)
    }

    pub fn server_scans(&self) -> usize {
        self.server_scans.load(Ordering::SeqCst)
    }

    fn title_of(&self, path: &str) -> Option<String> {
        self.pages
            .lock()
            .iter()
            .find(|p| p.path == path)
            .and_then(|p| p.title.clone())
    }
}

#[async_trait]
impl CmsClient for InMemoryCms {
    async fn initiate_scan(
        &self,
        page_path: &str,
        _level: WcagLevel,
    ) -> Result<InitiatedScan, CmsError> {
        let n = self.next_scan.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InitiatedScan {
            scan_id: ScanId::from(format!("scan-{n}")),
            page_path: page_path.to_string(),
            page_url: page_url(page_path),
            page_title: self.title_of(page_path),
        })
    }

    async fn save_results(&self, payload: &ResultsPayload) -> Result<(), CmsError> {
        if self.failing_saves.lock().contains(&payload.page_path) {
            return Err(CmsError::Status {
                endpoint: "scan/results".to_string(),
                status: 500,
                message: "repository write failed".to_string(),
            });
        }
        self.saved.lock().push(payload.clone());
        Ok(())
    }

    async fn fetch_configuration(&self) -> Result<RemoteConfiguration, CmsError> {
        self.configuration_fetches.fetch_add(1, Ordering::SeqCst);
        (*self.configuration.lock()).ok_or_else(|| CmsError::Transport {
            endpoint: "configuration".to_string(),
            message: "connection refused".to_string(),
        })
    }

    async fn server_scan(
        &self,
        page_path: &str,
        _level: WcagLevel,
    ) -> Result<ServerScanSummary, CmsError> {
        self.server_scans.fetch_add(1, Ordering::SeqCst);
        if !self.server_results.lock().contains_key(page_path) {
            return Err(CmsError::Rejected {
                endpoint: "scan/server".to_string(),
                message: format!("Page not found: {page_path}"),
            });
        }
        let n = self.next_scan.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ServerScanSummary {
            scan_id: Some(ScanId::from(format!("server-{n}"))),
            score: None,
            violation_count: 0,
            page_url: Some(page_url(page_path)),
            message: Some("Server-side scan completed".to_string()),
        })
    }

    async fn detailed_result(&self, page_path: &str) -> Result<DetailedResult, CmsError> {
        let stored = self
            .server_results
            .lock()
            .get(page_path)
            .cloned()
            .ok_or_else(|| CmsError::Status {
                endpoint: "results/detail".to_string(),
                status: 404,
                message: format!("No scan results found for page: {page_path}"),
            })?;
        DetailedResult::from_value(serde_json::json!({
            "success": true,
            "result": { "pageUrl": page_url(page_path), "fullResults": stored }
        }))
    }

    async fn list_pages(&self, root: &str) -> Result<Vec<PageRef>, CmsError> {
        Ok(self
            .pages
            .lock()
            .iter()
            .filter(|p| p.path.starts_with(root))
            .cloned()
            .collect())
    }
}
