//! [`SandboxBackend`] over the W3C WebDriver protocol
//!
//! Each context is its own headless browser session, which keeps contexts
//! isolated from one another. Attaching only checks that the driver is
//! up; detaching deletes any sessions still open.

use crate::backend::{ContextId, EngineInvocation, SandboxBackend};
use crate::error::SandboxError;
use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DOCUMENT_ACCESS_SCRIPT: &str = r"
try {
  return !!(document && document.documentElement && window.location.href);
} catch (e) {
  return String((e && e.name ? e.name + ': ' : '') + (e && e.message ? e.message : e));
}";

const INJECT_SCRIPT: &str = r"
var src = arguments[0];
var done = arguments[arguments.length - 1];
var script = document.createElement('script');
script.src = src;
script.onload = function () { done(null); };
script.onerror = function () { done('failed to load ' + src); };
(document.head || document.documentElement).appendChild(script);";

const READY_SCRIPT: &str =
    "return typeof window.axe !== 'undefined' && typeof window.axe.run === 'function';";

const RUN_SCRIPT: &str = r"
var options = arguments[0];
var done = arguments[arguments.length - 1];
window.axe.run(document, options)
  .then(function (results) { done(JSON.stringify(results)); })
  .catch(function (err) { done(JSON.stringify({ error: String((err && err.message) || err) })); });";

/// WebDriver connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDriverConfig {
    /// Driver endpoint, e.g. `http://localhost:4444`
    pub endpoint: String,
    /// `browserName` capability
    pub browser: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Driver-side page load timeout
    pub page_load_timeout: Duration,
    /// Driver-side async script timeout
    pub script_timeout: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4444".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            window_width: 1280,
            window_height: 1024,
            page_load_timeout: Duration::from_secs(30),
            script_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(90),
        }
    }
}

impl WebDriverConfig {
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            format!("--window-size={},{}", self.window_width, self.window_height),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": self.browser,
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": {
                        "pageLoad": millis(self.page_load_timeout),
                        "script": millis(self.script_timeout),
                    }
                }
            }
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Failure of one WebDriver command
#[derive(Debug)]
enum CommandError {
    Transport(String),
    Driver { code: String, message: String },
}

impl CommandError {
    fn into_sandbox(self) -> SandboxError {
        match self {
            Self::Transport(msg) => SandboxError::Backend(msg),
            Self::Driver { code, message } => SandboxError::Backend(format!("{code}: {message}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct DriverFailure {
    error: String,
    #[serde(default)]
    message: String,
}

/// Browser-backed sandbox
#[derive(Debug)]
pub struct WebDriverBackend {
    client: Client,
    config: WebDriverConfig,
    sessions: DashSet<String>,
}

impl WebDriverBackend {
    /// Backend for `config`
    ///
    /// # Errors
    /// `SandboxError::Backend` if the HTTP client cannot be built.
    pub fn new(config: WebDriverConfig) -> Result<Self, SandboxError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SandboxError::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            sessions: DashSet::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &WebDriverConfig {
        &self.config
    }

    /// Number of browser sessions currently open
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint.trim_end_matches('/'))
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CommandError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;
        let status = response.status();
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| CommandError::Transport(format!("invalid driver response ({status}): {e}")))?;

        if status.is_success() {
            return Ok(envelope.value);
        }
        match serde_json::from_value::<DriverFailure>(envelope.value) {
            Ok(failure) => Err(CommandError::Driver {
                code: failure.error,
                message: failure.message,
            }),
            Err(_) => Err(CommandError::Transport(format!("driver returned {status}"))),
        }
    }

    async fn execute(
        &self,
        context: &ContextId,
        mode: &str,
        script: &str,
        args: Value,
    ) -> Result<Value, CommandError> {
        self.command(
            Method::POST,
            &format!("/session/{context}/execute/{mode}"),
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }
}

#[async_trait]
impl SandboxBackend for WebDriverBackend {
    async fn attach(&self) -> Result<(), SandboxError> {
        let status = self
            .command(Method::GET, "/status", None)
            .await
            .map_err(CommandError::into_sandbox)?;
        if status.get("ready").and_then(Value::as_bool) == Some(false) {
            let message = status
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("driver not ready");
            return Err(SandboxError::ContextUnavailable(message.to_string()));
        }
        tracing::info!(endpoint = %self.config.endpoint, "webdriver attached");
        Ok(())
    }

    async fn create_context(&self, label: &str) -> Result<ContextId, SandboxError> {
        let created = self
            .command(Method::POST, "/session", Some(self.config.capabilities()))
            .await
            .map_err(|err| match err {
                CommandError::Driver { code, message } => {
                    SandboxError::ContextUnavailable(format!("{code}: {message}"))
                }
                CommandError::Transport(msg) => SandboxError::ContextUnavailable(msg),
            })?;
        let session_id = created
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::ContextUnavailable("driver returned no sessionId".into()))?
            .to_string();
        tracing::debug!(label, session_id, "webdriver session opened");
        self.sessions.insert(session_id.clone());
        Ok(ContextId::new(session_id))
    }

    async fn navigate(&self, context: &ContextId, url: &str) -> Result<(), SandboxError> {
        self.command(
            Method::POST,
            &format!("/session/{context}/url"),
            Some(json!({ "url": url })),
        )
        .await
        .map(drop)
        .map_err(|err| match err {
            CommandError::Driver { code, .. } if code == "timeout" => SandboxError::LoadTimeout {
                after_ms: millis(self.config.page_load_timeout),
            },
            CommandError::Driver { code, message } => {
                SandboxError::LoadFailed(format!("{code}: {message}"))
            }
            CommandError::Transport(msg) => SandboxError::LoadFailed(msg),
        })
    }

    async fn document_access(&self, context: &ContextId) -> Result<(), SandboxError> {
        let value = self
            .execute(context, "sync", DOCUMENT_ACCESS_SCRIPT, json!([]))
            .await
            .map_err(|err| match err {
                CommandError::Driver { message, .. } => SandboxError::CrossOriginBlocked(message),
                other => other.into_sandbox(),
            })?;
        match value {
            Value::Bool(true) => Ok(()),
            Value::String(reason) => Err(SandboxError::CrossOriginBlocked(reason)),
            other => Err(SandboxError::CrossOriginBlocked(format!(
                "document not accessible: {other}"
            ))),
        }
    }

    async fn inject_script(&self, context: &ContextId, src: &str) -> Result<(), SandboxError> {
        let value = self
            .execute(context, "async", INJECT_SCRIPT, json!([src]))
            .await
            .map_err(|err| match err {
                CommandError::Driver { code, message } => {
                    SandboxError::ScriptLoadFailed(format!("{code}: {message}"))
                }
                other => other.into_sandbox(),
            })?;
        match value {
            Value::Null => Ok(()),
            Value::String(reason) => Err(SandboxError::ScriptLoadFailed(reason)),
            other => Err(SandboxError::ScriptLoadFailed(format!(
                "unexpected script result: {other}"
            ))),
        }
    }

    async fn engine_ready(&self, context: &ContextId) -> Result<Option<bool>, SandboxError> {
        let value = self
            .execute(context, "sync", READY_SCRIPT, json!([]))
            .await
            .map_err(CommandError::into_sandbox)?;
        Ok(Some(value.as_bool().unwrap_or(false)))
    }

    async fn run_engine(
        &self,
        context: &ContextId,
        invocation: &EngineInvocation,
    ) -> Result<Value, SandboxError> {
        let options = serde_json::to_value(invocation)
            .map_err(|e| SandboxError::EngineFailed(e.to_string()))?;
        self.execute(context, "async", RUN_SCRIPT, json!([options]))
            .await
            .map_err(|err| match err {
                CommandError::Driver { code, message } => {
                    SandboxError::EngineFailed(format!("{code}: {message}"))
                }
                other => other.into_sandbox(),
            })
    }

    async fn discard_context(&self, context: &ContextId) -> Result<(), SandboxError> {
        if !self.sessions.contains(context.as_str()) {
            return Ok(());
        }
        // keep the id until the driver confirms, so detach can retry
        match self.command(Method::DELETE, &format!("/session/{context}"), None).await {
            Ok(_) => {}
            Err(CommandError::Driver { code, .. }) if code == "invalid session id" => {
                tracing::debug!(%context, "session already gone");
            }
            Err(err) => return Err(err.into_sandbox()),
        }
        self.sessions.remove(context.as_str());
        Ok(())
    }

    async fn detach(&self) -> Result<(), SandboxError> {
        let leftover: Vec<String> = self.sessions.iter().map(|id| id.key().clone()).collect();
        for id in leftover {
            self.discard_context(&ContextId::new(id)).await?;
        }
        tracing::info!(endpoint = %self.config.endpoint, "webdriver detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> WebDriverBackend {
        WebDriverBackend::new(WebDriverConfig::default().with_endpoint(server.uri())).unwrap()
    }

    async fn mount_session(server: &MockServer, id: &str) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": id, "capabilities": {} }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn attach_checks_driver_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "ready": false, "message": "session limit reached" }
            })))
            .mount(&server)
            .await;

        let err = backend(&server).await.attach().await.unwrap_err();
        assert_eq!(
            err,
            SandboxError::ContextUnavailable("session limit reached".into())
        );
    }

    #[tokio::test]
    async fn context_lifecycle() {
        let server = MockServer::start().await;
        mount_session(&server, "abc").await;
        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .and(body_partial_json(json!({ "url": "http://site/page" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let context = backend.create_context("scan-1").await.unwrap();
        assert_eq!(context.as_str(), "abc");
        assert_eq!(backend.open_sessions(), 1);

        backend.navigate(&context, "http://site/page").await.unwrap();
        backend.discard_context(&context).await.unwrap();
        // second discard is a no-op
        backend.discard_context(&context).await.unwrap();
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_session_tracked() {
        let server = MockServer::start().await;
        mount_session(&server, "abc").await;
        Mock::given(method("DELETE"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": { "error": "unknown error", "message": "browser busy", "stacktrace": "" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let context = backend.create_context("scan-1").await.unwrap();
        let err = backend.discard_context(&context).await.unwrap_err();
        assert!(err.to_string().contains("browser busy"));
        assert_eq!(backend.open_sessions(), 1);

        // detach retries what is still tracked
        backend.detach().await.unwrap();
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn vanished_session_counts_as_discarded() {
        let server = MockServer::start().await;
        mount_session(&server, "gone").await;
        Mock::given(method("DELETE"))
            .and(path("/session/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "invalid session id", "message": "no such session", "stacktrace": "" }
            })))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let context = backend.create_context("scan-1").await.unwrap();
        backend.discard_context(&context).await.unwrap();
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn driver_timeout_maps_to_load_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": { "error": "timeout", "message": "page load", "stacktrace": "" }
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .navigate(&ContextId::new("abc"), "http://slow")
            .await
            .unwrap_err();
        assert_eq!(err, SandboxError::LoadTimeout { after_ms: 30_000 });
    }

    #[tokio::test]
    async fn security_error_string_is_cross_origin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "SecurityError: Blocked a frame with origin"
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .document_access(&ContextId::new("abc"))
            .await
            .unwrap_err();
        assert!(err.is_cross_origin());
    }

    #[tokio::test]
    async fn script_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/async"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "failed to load https://cdn/axe.min.js"
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .inject_script(&ContextId::new("abc"), "https://cdn/axe.min.js")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ScriptLoadFailed(msg) if msg.contains("axe.min.js")));
    }

    #[tokio::test]
    async fn run_engine_returns_raw_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/async"))
            .and(body_partial_json(json!({
                "args": [{ "runOnly": { "type": "tag" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "{\"violations\":[],\"passes\":[],\"testEngine\":{\"version\":\"4.9.0\"}}"
            })))
            .mount(&server)
            .await;

        let invocation = EngineInvocation::for_tags(&a11y_core::resolve(a11y_core::WcagLevel::AA));
        let raw = backend(&server)
            .await
            .run_engine(&ContextId::new("abc"), &invocation)
            .await
            .unwrap();
        let results = a11y_core::EngineResults::from_value(raw).unwrap().into_results();
        assert_eq!(results.engine_version, "4.9.0");
    }
}
