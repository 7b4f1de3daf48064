//! Leadforge Core Types
//!
//! This crate defines the canonical field model and match contracts used
//! throughout Leadforge. Vendors send leads as arbitrary JSON whose field
//! names vary per source; everything here exists to describe the mapping
//! between those raw keys and the platform's canonical fields.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod normalize;
pub use normalize::normalize;

// ============================================================================
// Field Data Type
// ============================================================================

/// Value type a canonical field expects downstream.
///
/// Serializes to snake_case strings (`"string"`, `"number"`, `"boolean"`,
/// `"date"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDataType {
    String,
    Number,
    Boolean,
    Date,
}

impl FieldDataType {
    /// Returns the stored string code.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldDataType::String => "string",
            FieldDataType::Number => "number",
            FieldDataType::Boolean => "boolean",
            FieldDataType::Date => "date",
        }
    }

    /// Parse from the stored string code.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "string" => Some(FieldDataType::String),
            "number" => Some(FieldDataType::Number),
            "boolean" => Some(FieldDataType::Boolean),
            "date" => Some(FieldDataType::Date),
            _ => None,
        }
    }
}

// ============================================================================
// Alias Scope & Confidence
// ============================================================================

/// Breadth over which an alias applies.
///
/// Narrower scopes shadow broader ones at match time: `Source` beats
/// `Vendor` beats `Global`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AliasScope {
    #[default]
    Global,
    Vendor,
    Source,
}

impl AliasScope {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AliasScope::Global => "global",
            AliasScope::Vendor => "vendor",
            AliasScope::Source => "source",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "global" => Some(AliasScope::Global),
            "vendor" => Some(AliasScope::Vendor),
            "source" => Some(AliasScope::Source),
            _ => None,
        }
    }
}

impl std::fmt::Display for AliasScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an alias came to be known.
///
/// `Exact` means the alias is identical to the field's own key or label;
/// `Manual` means a human asserted it during mapping review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasConfidence {
    Exact,
    High,
    Manual,
}

impl AliasConfidence {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AliasConfidence::Exact => "exact",
            AliasConfidence::High => "high",
            AliasConfidence::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(AliasConfidence::Exact),
            "high" => Some(AliasConfidence::High),
            "manual" => Some(AliasConfidence::Manual),
            _ => None,
        }
    }
}

// ============================================================================
// Alias
// ============================================================================

/// A known alternate spelling for a canonical field.
///
/// `normalized` is always derived from `raw` via [`normalize`] at
/// construction and is never mutated independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Original string as seen in vendor payloads
    pub raw: String,

    /// Normalized comparison key, derived from `raw`
    pub normalized: String,

    pub scope: AliasScope,

    pub confidence: AliasConfidence,

    /// Present only for vendor-scoped aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,

    /// Present only for source-scoped aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Alias {
    /// Platform-wide alias.
    pub fn global(raw: impl Into<String>, confidence: AliasConfidence) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize(&raw),
            raw,
            scope: AliasScope::Global,
            confidence,
            vendor_id: None,
            source_id: None,
            created_at: Utc::now(),
        }
    }

    /// Alias valid for a single vendor.
    pub fn vendor(
        raw: impl Into<String>,
        confidence: AliasConfidence,
        vendor_id: impl Into<String>,
    ) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize(&raw),
            raw,
            scope: AliasScope::Vendor,
            confidence,
            vendor_id: Some(vendor_id.into()),
            source_id: None,
            created_at: Utc::now(),
        }
    }

    /// Alias valid for a single lead source.
    pub fn source(
        raw: impl Into<String>,
        confidence: AliasConfidence,
        source_id: impl Into<String>,
    ) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize(&raw),
            raw,
            scope: AliasScope::Source,
            confidence,
            vendor_id: None,
            source_id: Some(source_id.into()),
            created_at: Utc::now(),
        }
    }

    /// The scope qualifier, when the scope carries one.
    pub fn qualifier(&self) -> Option<&str> {
        match self.scope {
            AliasScope::Global => None,
            AliasScope::Vendor => self.vendor_id.as_deref(),
            AliasScope::Source => self.source_id.as_deref(),
        }
    }
}

// ============================================================================
// System Field
// ============================================================================

/// A canonical attribute the platform understands.
///
/// `field_key` is globally unique and never reused after deletion within
/// the same registry epoch; mapping rules refer to it by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemField {
    /// Stable unique identifier, immutable once referenced by rules
    pub field_key: String,

    /// Human-readable display name
    pub label: String,

    pub data_type: FieldDataType,

    /// Grouping tag for UI organization only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Whether downstream consumers mandate this field
    #[serde(default)]
    pub is_required: bool,

    #[serde(default)]
    pub aliases: Vec<Alias>,

    pub created_at: DateTime<Utc>,
}

impl SystemField {
    pub fn new(
        field_key: impl Into<String>,
        label: impl Into<String>,
        data_type: FieldDataType,
    ) -> Self {
        Self {
            field_key: field_key.into(),
            label: label.into(),
            data_type,
            category: None,
            is_required: false,
            aliases: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

// ============================================================================
// Scope Context
// ============================================================================

/// Where a lookup or registration is happening: which vendor, which source.
///
/// Either id may be absent; an empty context only sees global aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeContext {
    pub vendor_id: Option<String>,
    pub source_id: Option<String>,
}

impl ScopeContext {
    /// Context with no vendor or source qualifier.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn vendor(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: Some(vendor_id.into()),
            source_id: None,
        }
    }

    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            vendor_id: None,
            source_id: Some(source_id.into()),
        }
    }

    pub fn new(
        vendor_id: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id: Some(vendor_id.into()),
            source_id: Some(source_id.into()),
        }
    }
}

/// Qualifier for an alias registration, mirroring [`ScopeContext`] on the
/// write path. A source-scoped registration may name its vendor as well so
/// conflict checks can cover the vendor level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasOwner {
    pub vendor_id: Option<String>,
    pub source_id: Option<String>,
}

impl AliasOwner {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn vendor(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: Some(vendor_id.into()),
            source_id: None,
        }
    }

    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            vendor_id: None,
            source_id: Some(source_id.into()),
        }
    }

    pub fn source_of(
        vendor_id: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id: Some(vendor_id.into()),
            source_id: Some(source_id.into()),
        }
    }
}

// ============================================================================
// Match Result
// ============================================================================

/// Outcome of matching a raw field name against the registry.
///
/// `Ambiguous` is a first-class result, not an error: more than one field
/// matched at the winning scope level and a human has to adjudicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    Exact { field_key: String },
    Ambiguous { candidates: Vec<String> },
    NoMatch,
}

impl MatchResult {
    pub fn is_exact(&self) -> bool {
        matches!(self, MatchResult::Exact { .. })
    }

    /// The matched field key, for `Exact` results.
    pub fn field_key(&self) -> Option<&str> {
        match self {
            MatchResult::Exact { field_key } => Some(field_key),
            _ => None,
        }
    }
}

// ============================================================================
// Mapping Rule
// ============================================================================

/// A confirmed, source-scoped directive: `source_field` → `target_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    /// Raw key as it appears in this source's payloads
    pub source_field: String,

    /// Canonical `field_key` the value is routed to
    pub target_field: String,

    pub created_at: DateTime<Utc>,
}

impl MappingRule {
    pub fn new(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            created_at: Utc::now(),
        }
    }
}

/// Per-source rule set, keyed by `source_field`.
///
/// Source keys are unique per source; insertion order is irrelevant for
/// application but preserved for display.
pub type RuleSet = IndexMap<String, MappingRule>;

/// Build a [`RuleSet`] from rules in display order.
pub fn rule_set(rules: impl IntoIterator<Item = MappingRule>) -> RuleSet {
    rules
        .into_iter()
        .map(|r| (r.source_field.clone(), r))
        .collect()
}

// ============================================================================
// Unknown Field
// ============================================================================

/// Lifecycle status of an [`UnknownField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldStatus {
    /// Awaiting human review
    Pending,
    /// A mapping rule was confirmed; terminal
    Mapped,
    /// Dismissed without mapping; can be reopened
    Ignored,
}

impl UnknownFieldStatus {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            UnknownFieldStatus::Pending => "pending",
            UnknownFieldStatus::Mapped => "mapped",
            UnknownFieldStatus::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UnknownFieldStatus::Pending),
            "mapped" => Some(UnknownFieldStatus::Mapped),
            "ignored" => Some(UnknownFieldStatus::Ignored),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnknownFieldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vendor-supplied key seen during ingestion with no confident match.
///
/// Keyed by `(source_id, field_name)`. `detected_count` and `first_seen`
/// are cumulative facts that survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownField {
    pub source_id: String,

    pub field_name: String,

    /// Last observed example value, replaced on each pending sighting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<Value>,

    /// Payloads in which this field appeared while unmapped
    pub detected_count: u64,

    pub status: UnknownFieldStatus,

    /// Candidate field keys when the last sighting was ambiguous
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    pub first_seen: DateTime<Utc>,

    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// Suggestions
// ============================================================================

/// Request to create a new canonical field during mapping confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFieldSpec {
    pub field_key: String,
    pub label: String,
    pub data_type: FieldDataType,
}

/// One proposed mapping for a sample payload key, awaiting human review.
///
/// `auto_selected` doubles as the selection checkbox: the generator sets it
/// for exact matches, a human may toggle it either way before confirming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Raw key from the sample payload
    pub source_field: String,

    /// Proposed canonical field, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,

    pub auto_selected: bool,

    /// Candidate field keys when the match was ambiguous
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    /// Set by a human to request creation of a new field as the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_field: Option<NewFieldSpec>,
}

impl Suggestion {
    /// The target this suggestion resolves to: an explicit new-field request
    /// wins over a picked existing field.
    pub fn effective_target(&self) -> Option<&str> {
        self.new_field
            .as_ref()
            .map(|f| f.field_key.as_str())
            .or(self.target_field.as_deref())
    }
}
