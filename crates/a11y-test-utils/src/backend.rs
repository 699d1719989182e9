//! Scripted sandbox backend

use a11y_sandbox::{ContextId, EngineInvocation, SandboxBackend, SandboxError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// How a URL behaves in the fake browser
#[derive(Debug, Clone)]
pub enum PageBehaviour {
    /// Loads and the engine returns this output
    Loads(Value),
    /// Loads after `delay`
    LoadsAfter { delay: Duration, results: Value },
    /// Never finishes loading
    Hangs,
    /// Navigation fails outright
    LoadFails,
    /// Document refuses script access
    CrossOrigin,
    /// Engine script fails to load
    ScriptFails,
    /// Engine throws
    EngineThrows(String),
    /// Engine never reports ready, then runs anyway
    NeverReady(Value),
    /// Backend cannot tell whether the engine is ready
    ReadinessUnknown(Value),
}

/// In-memory [`SandboxBackend`] with per-URL behaviour and counters
#[derive(Debug)]
pub struct FakeBackend {
    behaviours: DashMap<String, PageBehaviour>,
    default: PageBehaviour,
    contexts: DashMap<ContextId, Option<String>>,
    next_id: AtomicU64,
    attached: AtomicU64,
    detached: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    invocations: Mutex<Vec<EngineInvocation>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(PageBehaviour::Loads(crate::fixtures::clean_results(10)))
    }
}

impl FakeBackend {
    /// Every URL without an explicit behaviour gets `default`
    pub fn new(default: PageBehaviour) -> Self {
        Self {
            behaviours: DashMap::new(),
            default,
            contexts: DashMap::new(),
            next_id: AtomicU64::new(1),
            attached: AtomicU64::new(0),
            detached: AtomicU64::new(0),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Script `url`
    pub fn with_page(self, url: impl Into<String>, behaviour: PageBehaviour) -> Self {
        self.behaviours.insert(url.into(), behaviour);
        self
    }

    pub fn attach_count(&self) -> u64 {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> u64 {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Contexts currently alive
    pub fn live(&self) -> usize {
        self.contexts.len()
    }

    /// Highest number of simultaneously alive contexts
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Engine invocations seen so far
    pub fn invocations(&self) -> Vec<EngineInvocation> {
        self.invocations.lock().clone()
    }

    fn behaviour(&self, context: &ContextId) -> Result<PageBehaviour, SandboxError> {
        let url = self
            .contexts
            .get(context)
            .ok_or_else(|| SandboxError::ContextUnavailable(format!("unknown context {context}")))?
            .clone();
        Ok(url
            .and_then(|url| self.behaviours.get(&url).map(|b| b.clone()))
            .unwrap_or_else(|| self.default.clone()))
    }
}

#[async_trait]
impl SandboxBackend for FakeBackend {
    async fn attach(&self) -> Result<(), SandboxError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_context(&self, _label: &str) -> Result<ContextId, SandboxError> {
        let id = ContextId::new(format!("ctx-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.contexts.insert(id.clone(), None);
        self.created.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(id)
    }

    async fn navigate(&self, context: &ContextId, url: &str) -> Result<(), SandboxError> {
        if let Some(mut slot) = self.contexts.get_mut(context) {
            *slot = Some(url.to_string());
        }
        match self.behaviour(context)? {
            PageBehaviour::Hangs => std::future::pending().await,
            PageBehaviour::LoadFails => Err(SandboxError::LoadFailed(format!("net::ERR_NAME_NOT_RESOLVED {url}"))),
            PageBehaviour::LoadsAfter { delay, .. } => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn document_access(&self, context: &ContextId) -> Result<(), SandboxError> {
        match self.behaviour(context)? {
            PageBehaviour::CrossOrigin => Err(SandboxError::CrossOriginBlocked(
                "SecurityError: Blocked a frame with origin from accessing a cross-origin frame".into(),
            )),
            _ => Ok(()),
        }
    }

    async fn inject_script(&self, context: &ContextId, src: &str) -> Result<(), SandboxError> {
        match self.behaviour(context)? {
            PageBehaviour::ScriptFails => Err(SandboxError::ScriptLoadFailed(format!("failed to load {src}"))),
            _ => Ok(()),
        }
    }

    async fn engine_ready(&self, context: &ContextId) -> Result<Option<bool>, SandboxError> {
        Ok(match self.behaviour(context)? {
            PageBehaviour::NeverReady(_) => Some(false),
            PageBehaviour::ReadinessUnknown(_) => None,
            _ => Some(true),
        })
    }

    async fn run_engine(
        &self,
        context: &ContextId,
        invocation: &EngineInvocation,
    ) -> Result<Value, SandboxError> {
        self.invocations.lock().push(invocation.clone());
        match self.behaviour(context)? {
            PageBehaviour::Loads(results)
            | PageBehaviour::LoadsAfter { results, .. }
            | PageBehaviour::NeverReady(results)
            | PageBehaviour::ReadinessUnknown(results) => Ok(results),
            PageBehaviour::EngineThrows(message) => Ok(serde_json::json!({ "error": message })),
            other => Err(SandboxError::EngineFailed(format!("engine ran on {other:?} page"))),
        }
    }

    async fn discard_context(&self, context: &ContextId) -> Result<(), SandboxError> {
        if self.contexts.remove(context).is_some() {
            self.discarded.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn detach(&self) -> Result<(), SandboxError> {
        self.detached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
