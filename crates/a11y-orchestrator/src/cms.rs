//! CMS boundary: scan identities, persistence, configuration, server-side
//! runs, stored results and the page inventory
//!
//! [`CmsClient`] is the seam; [`HttpCmsClient`] speaks the CMS REST API.

use crate::error::CmsError;
use crate::mode::RemoteConfiguration;
use a11y_core::{
    AuditOutcome, AuditResults, EngineResults, PageRef, RuleResult, ScanId, ScanRequest,
    ScoreResult, ViolationRecord, WcagLevel, DEFAULT_ENGINE_VERSION,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Title suffix for pages the sandbox could not script
pub const CROSS_ORIGIN_TITLE_SUFFIX: &str = " (Cross-origin)";

/// Scan identity allocated by the CMS
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedScan {
    pub scan_id: ScanId,
    pub page_path: String,
    pub page_url: String,
    #[serde(default)]
    pub page_title: Option<String>,
}

impl InitiatedScan {
    /// Build the request this identity describes
    #[must_use]
    pub fn into_request(self, page: &PageRef, level: WcagLevel) -> ScanRequest {
        let title = self
            .page_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| page.label().to_string());
        ScanRequest::new(self.scan_id, self.page_path, self.page_url, title, level)
    }
}

/// Summary returned by the server-side runner
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerScanSummary {
    pub scan_id: Option<ScanId>,
    pub score: Option<f64>,
    pub violation_count: usize,
    pub page_url: Option<String>,
    pub message: Option<String>,
}

/// Stored results of a page, as rebuilt from the CMS
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedResult {
    pub results: AuditResults,
    /// Score the CMS stored, if any
    pub stored_score: Option<f64>,
    pub page_url: Option<String>,
}

impl DetailedResult {
    /// Decode the `results/detail` body.
    ///
    /// The body may be wrapped as `{result: ...}`, and the raw engine output
    /// may sit under `fullResults` (as an object or a JSON string) or at the
    /// top level.
    ///
    /// # Errors
    /// `CmsError::InvalidResponse` if no engine output can be decoded.
    pub fn from_value(body: Value) -> Result<Self, CmsError> {
        let invalid = |message: String| CmsError::InvalidResponse {
            endpoint: "results/detail".to_string(),
            message,
        };

        let mut body = match body {
            Value::Object(mut map) if map.get("result").is_some_and(Value::is_object) => {
                map.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        };
        let Some(fields) = body.as_object_mut() else {
            return Err(invalid("expected an object".to_string()));
        };

        let stored_score = fields.get("score").and_then(Value::as_f64);
        let page_url = fields
            .get("pageUrl")
            .or_else(|| fields.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let raw = match fields.remove("fullResults") {
            Some(full) if !full.is_null() => full,
            _ => body,
        };

        let results = EngineResults::from_value(raw)
            .map_err(|e| invalid(e.to_string()))?
            .into_results();
        Ok(Self {
            results,
            stored_score,
            page_url,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOptionsPayload {
    pub version: String,
}

/// Raw results as persisted by the CMS
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxeResultsPayload {
    pub violations: Vec<ViolationRecord>,
    pub passes: Vec<RuleResult>,
    pub incomplete: Vec<RuleResult>,
    pub inapplicable: Vec<RuleResult>,
    pub timestamp: String,
    pub url: String,
    pub tool_options: ToolOptionsPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Body of `POST scan/results`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsPayload {
    pub scan_id: ScanId,
    pub page_path: String,
    pub page_url: String,
    pub page_title: String,
    pub wcag_level: WcagLevel,
    pub score: u8,
    pub axe_results: AxeResultsPayload,
}

impl ResultsPayload {
    /// Payload for an outcome and the score derived from it
    #[must_use]
    pub fn new(request: &ScanRequest, outcome: &AuditOutcome, score: &ScoreResult) -> Self {
        let mut page_title = request.page_title.clone();
        if matches!(outcome, AuditOutcome::CrossOriginBlocked { .. }) {
            page_title.push_str(CROSS_ORIGIN_TITLE_SUFFIX);
        }

        let axe_results = match outcome.results() {
            Some(results) => AxeResultsPayload {
                violations: results.violations.clone(),
                passes: results.passes.clone(),
                incomplete: results.incomplete.clone(),
                inapplicable: results.inapplicable.clone(),
                timestamp: results
                    .timestamp
                    .clone()
                    .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
                url: results.url.clone().unwrap_or_else(|| request.page_url.clone()),
                tool_options: ToolOptionsPayload {
                    version: results.engine_version.clone(),
                },
                error_message: None,
            },
            None => AxeResultsPayload {
                violations: Vec::new(),
                passes: Vec::new(),
                incomplete: Vec::new(),
                inapplicable: Vec::new(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                url: request.page_url.clone(),
                tool_options: ToolOptionsPayload {
                    version: DEFAULT_ENGINE_VERSION.to_string(),
                },
                error_message: outcome.message(),
            },
        };

        Self {
            scan_id: request.scan_id.clone(),
            page_path: request.page_path.clone(),
            page_url: request.page_url.clone(),
            page_title,
            wcag_level: request.wcag_level,
            score: score.value,
            axe_results,
        }
    }
}

/// CMS operations used by the orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CmsClient: Send + Sync {
    /// `POST scan/initiate`
    async fn initiate_scan(&self, page_path: &str, level: WcagLevel)
        -> Result<InitiatedScan, CmsError>;

    /// `POST scan/results`
    async fn save_results(&self, payload: &ResultsPayload) -> Result<(), CmsError>;

    /// `GET configuration`
    async fn fetch_configuration(&self) -> Result<RemoteConfiguration, CmsError>;

    /// `POST scan/server`
    async fn server_scan(&self, page_path: &str, level: WcagLevel)
        -> Result<ServerScanSummary, CmsError>;

    /// `GET results/detail?pagePath=`
    async fn detailed_result(&self, page_path: &str) -> Result<DetailedResult, CmsError>;

    /// `GET pages?path=&includeStatus=false`
    async fn list_pages(&self, root: &str) -> Result<Vec<PageRef>, CmsError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanTarget<'a> {
    page_path: &'a str,
    wcag_level: WcagLevel,
}

#[derive(Deserialize)]
struct PageItem {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct PageList {
    #[serde(default)]
    items: Vec<PageItem>,
}

/// [`CmsClient`] over the CMS REST API
#[derive(Debug, Clone)]
pub struct HttpCmsClient {
    client: Client,
    base_url: String,
}

impl HttpCmsClient {
    /// Client for `base_url` (e.g. `http://host/.rest/easya11y`)
    ///
    /// # Errors
    /// `CmsError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CmsError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CmsError::Transport {
                endpoint: base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    /// Send, check status and `success`, and return the JSON body
    async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Value, CmsError> {
        let response = request.send().await.map_err(|e| CmsError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| CmsError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            return Err(CmsError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: body_message(&body).unwrap_or_default(),
            });
        }
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(CmsError::Rejected {
                endpoint: endpoint.to_string(),
                message: body_message(&body).unwrap_or_else(|| "no message".to_string()),
            });
        }
        Ok(body)
    }

    async fn send_as<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, CmsError> {
        let body = self.send(endpoint, request).await?;
        serde_json::from_value(body).map_err(|e| CmsError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

fn body_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) => Some(text.clone()),
        _ => body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[async_trait]
impl CmsClient for HttpCmsClient {
    async fn initiate_scan(
        &self,
        page_path: &str,
        level: WcagLevel,
    ) -> Result<InitiatedScan, CmsError> {
        let request = self
            .client
            .post(self.url("scan/initiate"))
            .json(&ScanTarget {
                page_path,
                wcag_level: level,
            });
        self.send_as("scan/initiate", request).await
    }

    async fn save_results(&self, payload: &ResultsPayload) -> Result<(), CmsError> {
        let request = self.client.post(self.url("scan/results")).json(payload);
        self.send("scan/results", request).await.map(drop)
    }

    async fn fetch_configuration(&self) -> Result<RemoteConfiguration, CmsError> {
        let body = self
            .send("configuration", self.client.get(self.url("configuration")))
            .await?;
        RemoteConfiguration::from_value(body).map_err(|e| CmsError::InvalidResponse {
            endpoint: "configuration".to_string(),
            message: e.to_string(),
        })
    }

    async fn server_scan(
        &self,
        page_path: &str,
        level: WcagLevel,
    ) -> Result<ServerScanSummary, CmsError> {
        let request = self
            .client
            .post(self.url("scan/server"))
            .json(&ScanTarget {
                page_path,
                wcag_level: level,
            });
        self.send_as("scan/server", request).await
    }

    async fn detailed_result(&self, page_path: &str) -> Result<DetailedResult, CmsError> {
        let request = self
            .client
            .get(self.url("results/detail"))
            .query(&[("pagePath", page_path)]);
        let body = self.send("results/detail", request).await?;
        DetailedResult::from_value(body)
    }

    async fn list_pages(&self, root: &str) -> Result<Vec<PageRef>, CmsError> {
        let request = self
            .client
            .get(self.url("pages"))
            .query(&[("path", root), ("includeStatus", "false")]);
        let list: PageList = self.send_as("pages", request).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|item| {
                let path = item.path.filter(|p| !p.is_empty())?;
                Some(PageRef { path, title: item.title })
            })
            .collect())
    }
}
