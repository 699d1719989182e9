//! The seam between sessions and whatever actually renders pages
//!
//! A backend owns hidden browsing contexts. [`crate::WebDriverBackend`] drives
//! a real browser; tests use an in-memory fake.

use crate::error::SandboxError;
use a11y_core::TagSet;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Debug, Display, Formatter};

/// Handle to one hidden browsing context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    /// Wrap a backend-issued handle
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule filter passed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOnly {
    #[serde(rename = "type")]
    pub kind: String,
    pub values: Vec<String>,
}

/// Options for one engine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInvocation {
    pub run_only: RunOnly,
    pub result_types: Vec<String>,
}

impl EngineInvocation {
    /// Restrict the run to `tags`, reporting every result category
    #[must_use]
    pub fn for_tags(tags: &TagSet) -> Self {
        Self {
            run_only: RunOnly {
                kind: "tag".to_string(),
                values: tags.to_vec(),
            },
            result_types: ["violations", "passes", "incomplete", "inapplicable"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Hidden-page host
///
/// Every method takes `&self`; implementations are shared across concurrent
/// sessions behind an `Arc`.
#[async_trait]
pub trait SandboxBackend: Send + Sync + Debug {
    /// Prepare the shared offscreen container. Called once before the first
    /// context is created.
    async fn attach(&self) -> Result<(), SandboxError>;

    /// Allocate a fresh, isolated context
    async fn create_context(&self, label: &str) -> Result<ContextId, SandboxError>;

    /// Navigate and resolve once the page has loaded
    async fn navigate(&self, context: &ContextId, url: &str) -> Result<(), SandboxError>;

    /// Verify the loaded document can be scripted from the host.
    ///
    /// Returns `CrossOriginBlocked` when the browser refuses access.
    async fn document_access(&self, context: &ContextId) -> Result<(), SandboxError>;

    /// Insert the engine script element and resolve on its load event
    async fn inject_script(&self, context: &ContextId, src: &str) -> Result<(), SandboxError>;

    /// Whether the engine is callable in the context.
    ///
    /// `None` means the backend cannot tell; callers fall back to a fixed
    /// settle delay.
    async fn engine_ready(&self, _context: &ContextId) -> Result<Option<bool>, SandboxError> {
        Ok(None)
    }

    /// Run the engine over the document, returning its raw output
    async fn run_engine(
        &self,
        context: &ContextId,
        invocation: &EngineInvocation,
    ) -> Result<Value, SandboxError>;

    /// Release a context. Must tolerate already-discarded handles.
    async fn discard_context(&self, context: &ContextId) -> Result<(), SandboxError>;

    /// Tear down the offscreen container
    async fn detach(&self) -> Result<(), SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11y_core::{resolve, WcagLevel};

    #[test]
    fn invocation_wire_shape() {
        let invocation = EngineInvocation::for_tags(&resolve(WcagLevel::A));
        let json = serde_json::to_value(&invocation).unwrap();
        assert_eq!(json["runOnly"]["type"], "tag");
        assert_eq!(
            json["runOnly"]["values"],
            serde_json::json!(["best-practice", "wcag2a", "wcag21a"])
        );
        assert_eq!(json["resultTypes"].as_array().map(Vec::len), Some(4));
    }
}
