//! WCAG conformance levels and audit-engine rule tags
//!
//! Provides [`WcagLevel`], [`WcagVersion`] and the pure resolver that maps a
//! level (and rule generation) to the [`TagSet`] handed to the audit engine.

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Tag that is always part of a tag set
pub const BEST_PRACTICE_TAG: &str = "best-practice";

/// Conformance tier, ordered by strictness (`A < AA < AAA`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum WcagLevel {
    /// Level A
    A,
    /// Level AA
    #[default]
    AA,
    /// Level AAA
    AAA,
}

impl WcagLevel {
    /// All levels, least strict first
    pub const ALL: [WcagLevel; 3] = [WcagLevel::A, WcagLevel::AA, WcagLevel::AAA];

    /// Parse a level, falling back to `AA` for anything unrecognized.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    /// Canonical name (`"A"`, `"AA"`, `"AAA"`)
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AA => "AA",
            Self::AAA => "AAA",
        }
    }

    /// Levels included by this level, least strict first
    fn tiers(self) -> impl Iterator<Item = WcagLevel> {
        Self::ALL.into_iter().filter(move |tier| *tier <= self)
    }
}

impl Display for WcagLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WcagLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "AA" => Ok(Self::AA),
            "AAA" => Ok(Self::AAA),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for WcagLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// Unrecognized conformance level
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown WCAG level: {0:?} (expected A, AA or AAA)")]
pub struct UnknownLevel(pub String);

/// WCAG rule generation the engine should apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum WcagVersion {
    /// WCAG 2.0 rules only
    #[serde(rename = "2.0")]
    V2_0,
    /// WCAG 2.0 and 2.1 rules
    #[default]
    #[serde(rename = "2.1")]
    V2_1,
    /// WCAG 2.0, 2.1 and 2.2 rules
    #[serde(rename = "2.2")]
    V2_2,
}

impl WcagVersion {
    /// Parse a version, falling back to `2.1` for anything unrecognized.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim() {
            "2.0" | "2" => Self::V2_0,
            "2.2" => Self::V2_2,
            _ => Self::V2_1,
        }
    }

    /// Canonical name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
            Self::V2_2 => "2.2",
        }
    }

    fn generations(self) -> &'static [Generation] {
        match self {
            Self::V2_0 => &[Generation::Wcag20],
            Self::V2_1 => &[Generation::Wcag20, Generation::Wcag21],
            Self::V2_2 => &[Generation::Wcag20, Generation::Wcag21, Generation::Wcag22],
        }
    }
}

impl Display for WcagVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WcagVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

#[derive(Debug, Clone, Copy)]
enum Generation {
    Wcag20,
    Wcag21,
    Wcag22,
}

impl Generation {
    const fn tag(self, tier: WcagLevel) -> &'static str {
        match (self, tier) {
            (Self::Wcag20, WcagLevel::A) => "wcag2a",
            (Self::Wcag20, WcagLevel::AA) => "wcag2aa",
            (Self::Wcag20, WcagLevel::AAA) => "wcag2aaa",
            (Self::Wcag21, WcagLevel::A) => "wcag21a",
            (Self::Wcag21, WcagLevel::AA) => "wcag21aa",
            (Self::Wcag21, WcagLevel::AAA) => "wcag21aaa",
            (Self::Wcag22, WcagLevel::A) => "wcag22a",
            (Self::Wcag22, WcagLevel::AA) => "wcag22aa",
            (Self::Wcag22, WcagLevel::AAA) => "wcag22aaa",
        }
    }
}

/// Ordered, duplicate-free set of engine rule tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagSet(IndexSet<&'static str>);

impl TagSet {
    /// Check membership
    #[inline]
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// True if every tag of `self` is in `other`
    #[inline]
    #[must_use]
    pub fn is_subset(&self, other: &TagSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Iterate tags in resolution order
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }

    /// Number of tags
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for resolved sets (best-practice is always present)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Owned tag list, as sent to the engine
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(str::to_string).collect()
    }
}

/// Resolve the tag set for a level using the default rule generations (2.0 + 2.1).
#[must_use]
pub fn resolve(level: WcagLevel) -> TagSet {
    resolve_for(level, WcagVersion::default())
}

/// Resolve the tag set for a level and WCAG version.
///
/// `best-practice` comes first, then each generation's tags up to `level`.
#[must_use]
pub fn resolve_for(level: WcagLevel, version: WcagVersion) -> TagSet {
    let mut tags = IndexSet::new();
    tags.insert(BEST_PRACTICE_TAG);
    for generation in version.generations() {
        for tier in level.tiers() {
            tags.insert(generation.tag(tier));
        }
    }
    TagSet(tags)
}
