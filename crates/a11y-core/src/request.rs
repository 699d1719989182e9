//! Scan identities and page references

use crate::wcag::WcagLevel;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use ulid::Ulid;

/// Identifier of one audit attempt
///
/// Usually allocated by the CMS; locally generated ids are ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Generate a fresh, sortable scan id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ScanId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ScanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for ScanId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page in the CMS inventory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    /// Repository path of the page (`/home/about`)
    pub path: String,
    /// Human-readable title, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PageRef {
    /// Page with a path only
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: None,
        }
    }

    /// With a title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Label shown in progress events: title, or path when untitled
    #[must_use]
    pub fn label(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.path,
        }
    }
}

/// One audit attempt of one page
///
/// Immutable once created; `scan_id` names the sandbox session that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Unique per attempt
    pub scan_id: ScanId,
    /// Repository path
    pub page_path: String,
    /// Live URL loaded into the sandbox
    pub page_url: String,
    /// Page title
    pub page_title: String,
    /// Conformance level to audit against
    pub wcag_level: WcagLevel,
}

impl ScanRequest {
    /// Create a request
    #[must_use]
    pub fn new(
        scan_id: impl Into<ScanId>,
        page_path: impl Into<String>,
        page_url: impl Into<String>,
        page_title: impl Into<String>,
        wcag_level: WcagLevel,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            page_path: page_path.into(),
            page_url: page_url.into(),
            page_title: page_title.into(),
            wcag_level,
        }
    }

    /// Request with a freshly generated scan id
    #[must_use]
    pub fn generated(page: &PageRef, page_url: impl Into<String>, wcag_level: WcagLevel) -> Self {
        Self::new(
            ScanId::generate(),
            page.path.clone(),
            page_url,
            page.label().to_string(),
            wcag_level,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_title() {
        let page = PageRef::new("/home").with_title("Home");
        assert_eq!(page.label(), "Home");

        let untitled = PageRef::new("/home");
        assert_eq!(untitled.label(), "/home");

        let blank = PageRef::new("/home").with_title("  ");
        assert_eq!(blank.label(), "/home");
    }

    #[test]
    fn generated_ids_are_unique() {
        let page = PageRef::new("/a");
        let first = ScanRequest::generated(&page, "http://x/a", WcagLevel::AA);
        let second = ScanRequest::generated(&page, "http://x/a", WcagLevel::AA);
        assert_ne!(first.scan_id, second.scan_id);
    }

    #[test]
    fn request_uses_camel_case_wire_names() {
        let request = ScanRequest::new("s1", "/a", "http://x/a", "A page", WcagLevel::A);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["scanId"], "s1");
        assert_eq!(json["pagePath"], "/a");
        assert_eq!(json["wcagLevel"], "A");
    }
}
