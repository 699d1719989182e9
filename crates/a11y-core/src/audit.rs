//! Audit engine results and the typed outcome of one audit attempt
//!
//! The engine reports loosely shaped JSON. [`EngineResults`] is the wire
//! shape; [`AuditOutcome`] is what the rest of the system branches on.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Engine version recorded when the engine does not report one
pub const DEFAULT_ENGINE_VERSION: &str = "4.8.3";

/// Severity tier of a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// Blocks access outright
    Critical,
    /// Severe barrier
    Serious,
    /// Partial barrier
    Moderate,
    /// Annoyance
    Minor,
}

impl Impact {
    /// Weight used by the scoring engine
    #[inline]
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::Critical => 10,
            Self::Serious => 5,
            Self::Moderate => 2,
            Self::Minor => 1,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Self::Critical),
            "serious" => Some(Self::Serious),
            "moderate" => Some(Self::Moderate),
            "minor" => Some(Self::Minor),
            _ => None,
        }
    }
}

/// One DOM element examined by a rule
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    /// Selector path(s) to the element
    #[serde(default, deserialize_with = "selectors")]
    pub target: Vec<String>,
    /// Outer HTML snippet
    #[serde(default)]
    pub html: String,
    /// Engine explanation of the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
}

/// A failed rule with the elements it failed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    /// Rule id (`color-contrast`)
    pub id: String,
    /// Severity; missing or unknown impacts are read as `minor`
    #[serde(default = "minor", deserialize_with = "impact_or_minor")]
    pub impact: Impact,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeResult>,
}

/// A passed, incomplete or inapplicable rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub id: String,
    #[serde(default, deserialize_with = "impact_opt")]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeResult>,
}

/// Classified results of a completed audit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResults {
    pub violations: Vec<ViolationRecord>,
    pub passes: Vec<RuleResult>,
    pub incomplete: Vec<RuleResult>,
    pub inapplicable: Vec<RuleResult>,
    /// Self-reported engine version
    pub engine_version: String,
    /// Engine timestamp, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// URL the engine actually audited, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AuditResults {
    /// Sum of violation node counts
    #[must_use]
    pub fn elements_with_issues(&self) -> usize {
        self.violations.iter().map(|v| v.nodes.len()).sum()
    }
}

/// Discriminant of [`AuditOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeKind {
    Completed,
    CrossOriginBlocked,
    TimedOut,
    InjectionFailed,
}

/// Result of one audit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuditOutcome {
    /// The engine ran and classified the document
    Completed(AuditResults),
    /// Same-origin access into the loaded document was refused
    CrossOriginBlocked { reason: String },
    /// The page did not finish loading in time
    TimedOut {
        #[serde(rename = "afterMs")]
        after_ms: u64,
    },
    /// The engine could not be injected or failed while running
    InjectionFailed { reason: String },
}

impl AuditOutcome {
    /// Outcome discriminant
    #[inline]
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Completed(_) => OutcomeKind::Completed,
            Self::CrossOriginBlocked { .. } => OutcomeKind::CrossOriginBlocked,
            Self::TimedOut { .. } => OutcomeKind::TimedOut,
            Self::InjectionFailed { .. } => OutcomeKind::InjectionFailed,
        }
    }

    /// True if the engine actually ran
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Engine results, for completed audits
    #[inline]
    #[must_use]
    pub fn results(&self) -> Option<&AuditResults> {
        match self {
            Self::Completed(results) => Some(results),
            _ => None,
        }
    }

    /// Number of violated rules (zero when the audit did not run)
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.results().map_or(0, |r| r.violations.len())
    }

    /// Explanation for outcomes where the engine did not run
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Completed(_) => None,
            Self::CrossOriginBlocked { reason } => Some(format!(
                "Cross-origin restrictions prevent background scanning: {reason}"
            )),
            Self::TimedOut { after_ms } => {
                Some(format!("Page load timed out after {after_ms}ms"))
            }
            Self::InjectionFailed { reason } => {
                Some(format!("Accessibility engine could not run: {reason}"))
            }
        }
    }
}

/// Errors reading engine output
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Output did not match the expected shape
    #[error("malformed engine results: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The engine reported an error instead of results
    #[error("engine reported an error: {0}")]
    EngineReported(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TestEngine {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToolOptions {
    #[serde(default)]
    version: Option<String>,
}

/// Raw engine output as reported by the engine (or stored by the CMS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResults {
    #[serde(default)]
    violations: Vec<ViolationRecord>,
    #[serde(default)]
    passes: Vec<RuleResult>,
    #[serde(default)]
    incomplete: Vec<RuleResult>,
    #[serde(default)]
    inapplicable: Vec<RuleResult>,
    #[serde(default)]
    test_engine: Option<TestEngine>,
    #[serde(default)]
    tool_options: Option<ToolOptions>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl EngineResults {
    /// Decode engine output.
    ///
    /// Accepts either the JSON object itself or a JSON string containing it
    /// (engines driven over a script bridge usually return the latter).
    ///
    /// # Errors
    /// - `AuditError::Malformed` if the value is not engine output
    /// - `AuditError::EngineReported` if the engine returned `{error: ...}`
    pub fn from_value(value: Value) -> Result<Self, AuditError> {
        let parsed: Self = match value {
            Value::String(text) => serde_json::from_str(&text)?,
            other => serde_json::from_value(other)?,
        };
        if let Some(error) = parsed.error.clone() {
            return Err(AuditError::EngineReported(error));
        }
        Ok(parsed)
    }

    /// Convert into typed results, resolving the engine version
    #[must_use]
    pub fn into_results(self) -> AuditResults {
        let engine_version = self
            .test_engine
            .and_then(|e| e.version)
            .or_else(|| self.tool_options.and_then(|t| t.version))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_VERSION.to_string());

        AuditResults {
            violations: self.violations,
            passes: self.passes,
            incomplete: self.incomplete,
            inapplicable: self.inapplicable,
            engine_version,
            timestamp: self.timestamp,
            url: self.url,
        }
    }
}

fn minor() -> Impact {
    Impact::Minor
}

fn impact_or_minor<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Impact, D::Error> {
    Ok(impact_opt(deserializer)?.unwrap_or(Impact::Minor))
}

fn impact_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Impact>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Impact::parse))
}

/// Selectors may arrive as a string, a list, or a list of shadow-DOM paths.
fn selectors<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    fn flatten(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(flatten)
                    .collect::<Vec<_>>()
                    .join(" >>> "),
            ),
            _ => None,
        }
    }

    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(flatten).collect(),
        Some(other) => flatten(&other).into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "testEngine": {"name": "axe-core", "version": "4.9.0"},
            "url": "http://localhost/home",
            "timestamp": "2026-10-19T10:00:00.000Z",
            "violations": [{
                "id": "image-alt",
                "impact": "critical",
                "description": "Images must have alternate text",
                "help": "Images must have alternate text",
                "helpUrl": "https://dequeuniversity.com/rules/axe/4.9/image-alt",
                "tags": ["wcag2a"],
                "nodes": [{"target": ["img.hero"], "html": "<img class=\"hero\">", "failureSummary": "Fix this"}]
            }],
            "passes": [{"id": "document-title", "impact": null, "nodes": [{"target": "html", "html": "<html>"}]}],
            "incomplete": [],
            "inapplicable": [{"id": "video-caption", "nodes": []}]
        })
    }

    #[test]
    fn parses_engine_output() {
        let results = EngineResults::from_value(sample()).unwrap().into_results();
        assert_eq!(results.engine_version, "4.9.0");
        assert_eq!(results.violations.len(), 1);
        assert_eq!(results.violations[0].impact, Impact::Critical);
        assert_eq!(results.violations[0].nodes[0].target, vec!["img.hero"]);
        assert_eq!(results.passes[0].impact, None);
        assert_eq!(results.passes[0].nodes[0].target, vec!["html"]);
        assert_eq!(results.url.as_deref(), Some("http://localhost/home"));
    }

    #[test]
    fn parses_stringified_output() {
        let text = serde_json::to_string(&sample()).unwrap();
        let results = EngineResults::from_value(Value::String(text)).unwrap();
        assert_eq!(results.into_results().violations.len(), 1);
    }

    #[test]
    fn version_defaults_when_missing() {
        let results = EngineResults::from_value(json!({"violations": []}))
            .unwrap()
            .into_results();
        assert_eq!(results.engine_version, DEFAULT_ENGINE_VERSION);
    }

    #[test]
    fn version_falls_back_to_tool_options() {
        let results = EngineResults::from_value(json!({"toolOptions": {"version": "4.7.0"}}))
            .unwrap()
            .into_results();
        assert_eq!(results.engine_version, "4.7.0");
    }

    #[test]
    fn engine_error_is_reported() {
        let err = EngineResults::from_value(json!({"error": "axe is busy"})).unwrap_err();
        assert!(matches!(err, AuditError::EngineReported(msg) if msg == "axe is busy"));
    }

    #[test]
    fn malformed_output_is_rejected() {
        let err = EngineResults::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, AuditError::Malformed(_)));
    }

    #[test]
    fn unknown_impact_reads_as_minor() {
        let record: ViolationRecord =
            serde_json::from_value(json!({"id": "x", "impact": "cosmic", "nodes": []})).unwrap();
        assert_eq!(record.impact, Impact::Minor);
    }

    #[test]
    fn shadow_dom_targets_are_flattened() {
        let node: NodeResult =
            serde_json::from_value(json!({"target": [["my-app", "button"]], "html": ""})).unwrap();
        assert_eq!(node.target, vec!["my-app >>> button"]);
    }

    #[test]
    fn outcome_messages() {
        let ok = AuditOutcome::Completed(AuditResults::default());
        assert!(ok.message().is_none());
        assert!(ok.is_completed());

        let blocked = AuditOutcome::CrossOriginBlocked {
            reason: "SecurityError".into(),
        };
        assert_eq!(blocked.kind(), OutcomeKind::CrossOriginBlocked);
        assert!(blocked.message().unwrap().contains("Cross-origin"));

        let timed_out = AuditOutcome::TimedOut { after_ms: 30_000 };
        assert!(timed_out.message().unwrap().contains("30000ms"));
        assert_eq!(timed_out.violation_count(), 0);
    }

    #[test]
    fn outcome_is_tagged_by_kind() {
        let json = serde_json::to_value(AuditOutcome::TimedOut { after_ms: 5 }).unwrap();
        assert_eq!(json, json!({"kind": "timedOut", "afterMs": 5}));

        let json = serde_json::to_value(AuditOutcome::InjectionFailed {
            reason: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "injectionFailed");
    }
}
