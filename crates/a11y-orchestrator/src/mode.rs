//! Execution mode selection
//!
//! The mode comes from an explicit override when one is set, otherwise from
//! the CMS configuration, cached for a short TTL. An unreachable CMS means
//! `ClientSandboxed`; failures are never cached. The same configuration
//! supplies the default conformance level and WCAG version.

use crate::cms::CmsClient;
use crate::error::ScanError;
use a11y_core::{WcagLevel, WcagVersion};
use moka::future::Cache;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Where the audit engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// In a local sandbox session
    #[default]
    ClientSandboxed,
    /// On the CMS's server-side runner
    ServerDelegated,
}

impl ExecutionMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSandboxed => "client",
            Self::ServerDelegated => "server",
        }
    }
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" | "clientsandboxed" | "sandbox" => Ok(Self::ClientSandboxed),
            "server" | "serverdelegated" => Ok(Self::ServerDelegated),
            other => Err(format!("unknown execution mode {other:?} (expected client or server)")),
        }
    }
}

/// Scanner settings stored in the CMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfiguration {
    #[serde(deserialize_with = "lenient_bool")]
    pub server_side_scan: bool,
    pub wcag_level: WcagLevel,
    pub wcag_version: WcagVersion,
}

impl RemoteConfiguration {
    /// Decode a `configuration` body, bare or wrapped as
    /// `{success, configuration: {...}}`.
    ///
    /// # Errors
    /// When the body is not an object of the expected shape.
    pub fn from_value(mut body: Value) -> Result<Self, serde_json::Error> {
        if let Some(inner) = body
            .as_object_mut()
            .and_then(|map| map.remove("configuration"))
            .filter(Value::is_object)
        {
            body = inner;
        }
        serde_json::from_value(body)
    }

    /// Mode this configuration selects
    #[inline]
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.server_side_scan {
            ExecutionMode::ServerDelegated
        } else {
            ExecutionMode::ClientSandboxed
        }
    }
}

/// Booleans may arrive as `true`, `"true"`, `"1"`, `1` or be missing
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

/// Resolves the execution mode for each scan
#[derive(Clone)]
pub struct ModeSelector {
    cms: Arc<dyn CmsClient>,
    cache: Cache<(), RemoteConfiguration>,
    fixed: Option<ExecutionMode>,
}

impl fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeSelector")
            .field("fixed", &self.fixed)
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl ModeSelector {
    /// Selector reading configuration from `cms`, cached for `ttl`
    #[must_use]
    pub fn new(cms: Arc<dyn CmsClient>, ttl: Duration) -> Self {
        Self {
            cms,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
            fixed: None,
        }
    }

    /// Always resolve to `mode`, never consulting the CMS
    #[must_use]
    pub fn with_fixed_mode(mut self, mode: Option<ExecutionMode>) -> Self {
        self.fixed = mode;
        self
    }

    /// CMS configuration, from cache when fresh
    ///
    /// # Errors
    /// `ScanError::ConfigurationUnavailable` if the CMS cannot be read.
    pub async fn configuration(&self) -> Result<RemoteConfiguration, ScanError> {
        let cms = Arc::clone(&self.cms);
        self.cache
            .try_get_with((), async move { cms.fetch_configuration().await })
            .await
            .map_err(|err| ScanError::ConfigurationUnavailable((*err).clone()))
    }

    /// Mode for one scan: `explicit`, else the fixed mode, else the CMS
    /// configuration, else `ClientSandboxed`.
    pub async fn resolve(&self, explicit: Option<ExecutionMode>) -> ExecutionMode {
        if let Some(mode) = explicit.or(self.fixed) {
            return mode;
        }
        match self.configuration().await {
            Ok(config) => config.execution_mode(),
            Err(err) => {
                tracing::warn!(error = %err, "falling back to client-sandboxed scanning");
                ExecutionMode::ClientSandboxed
            }
        }
    }

    /// Conformance level: `explicit`, else the CMS configuration, else AA
    pub async fn resolve_level(&self, explicit: Option<WcagLevel>) -> WcagLevel {
        if let Some(level) = explicit {
            return level;
        }
        match self.configuration().await {
            Ok(config) => config.wcag_level,
            Err(err) => {
                tracing::debug!(error = %err, "using default conformance level");
                WcagLevel::default()
            }
        }
    }

    /// Rule-set version: `explicit`, else the CMS configuration, else 2.1
    pub async fn resolve_version(&self, explicit: Option<WcagVersion>) -> WcagVersion {
        if let Some(version) = explicit {
            return version;
        }
        match self.configuration().await {
            Ok(config) => config.wcag_version,
            Err(err) => {
                tracing::debug!(error = %err, "using default WCAG version");
                WcagVersion::default()
            }
        }
    }

    /// Drop the cached configuration
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }
}
