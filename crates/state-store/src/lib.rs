//! Durable state for the schema resolution engine.
//!
//! One trait, two backends: [`MemStateStore`] for tests and embedded use,
//! [`SqliteStateStore`] for state that must survive restarts. The store owns
//! the uniqueness invariants the engine relies on: one system field per
//! `field_key`, one alias per normalized form within a scope, and at most one
//! unknown-field record per `(source_id, field_name)` even under concurrent
//! first sightings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use leadforge_core::{
    Alias, MappingRule, SystemField, UnknownField, UnknownFieldStatus,
};

mod errors;
mod mem_store;
mod sqlite_store;

pub use errors::{StoreError, StoreResult};
pub use mem_store::MemStateStore;
pub use sqlite_store::SqliteStateStore;

/// One observation of an unmatched field during ingestion.
#[derive(Debug, Clone)]
pub struct UnknownSighting {
    pub source_id: String,
    pub field_name: String,
    /// Example value from the payload that carried the field
    pub sample_value: Value,
    /// Candidate field keys when the match was ambiguous rather than absent
    pub candidates: Vec<String>,
    pub seen_at: DateTime<Utc>,
}

impl UnknownSighting {
    pub fn new(
        source_id: impl Into<String>,
        field_name: impl Into<String>,
        sample_value: Value,
        candidates: Vec<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            field_name: field_name.into(),
            sample_value,
            candidates,
            seen_at: Utc::now(),
        }
    }
}

/// Result of a guarded unknown-field status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Status changed; carries the updated record
    Updated(UnknownField),
    /// Record exists but its current status is not an allowed `from` state
    Rejected(UnknownField),
    NotFound,
}

/// Storage for the field registry, per-source mapping rules, and
/// per-source unknown-field records.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ========== canonical fields & aliases ==========

    /// All system fields with their aliases, in registration order.
    async fn load_fields(&self) -> StoreResult<Vec<SystemField>>;

    /// Insert a new system field. Fails with [`StoreError::Constraint`] if
    /// the `field_key` already exists.
    async fn insert_field(&self, field: &SystemField) -> StoreResult<()>;

    /// Attach an alias to an existing field. Fails with
    /// [`StoreError::Constraint`] if an alias with the same normalized form
    /// already exists at the same scope and qualifier.
    async fn insert_alias(
        &self,
        field_key: &str,
        alias: &Alias,
    ) -> StoreResult<()>;

    // ========== mapping rules ==========

    /// Rules for one source, in display (insertion) order.
    async fn load_rules(&self, source_id: &str)
        -> StoreResult<Vec<MappingRule>>;

    /// Insert or replace the rule for `(source_id, rule.source_field)`.
    /// Replacement keeps the rule's original display position.
    async fn put_rule(
        &self,
        source_id: &str,
        rule: &MappingRule,
    ) -> StoreResult<()>;

    // ========== unknown fields ==========

    /// Atomic insert-or-increment for `(source_id, field_name)`:
    ///
    /// - absent → create `{detected_count: 1, status: pending}`;
    /// - `pending` → bump count, replace sample/candidates, touch `last_seen`;
    /// - `ignored` → bump count and `last_seen` only;
    /// - `mapped` → mutate nothing.
    ///
    /// Always returns the post-call record; the caller derives what happened
    /// from `status` and `detected_count`. Implementations must not use a
    /// read-then-write sequence: concurrent first sightings of the same
    /// field must collapse into a single record.
    async fn upsert_unknown(
        &self,
        sighting: &UnknownSighting,
    ) -> StoreResult<UnknownField>;

    async fn get_unknown(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> StoreResult<Option<UnknownField>>;

    /// Change status to `to` only when the current status is one of `from`.
    async fn transition_unknown(
        &self,
        source_id: &str,
        field_name: &str,
        from: &[UnknownFieldStatus],
        to: UnknownFieldStatus,
    ) -> StoreResult<Transition>;

    /// Records for one source, oldest first, optionally filtered by status.
    async fn list_unknown(
        &self,
        source_id: &str,
        status: Option<UnknownFieldStatus>,
    ) -> StoreResult<Vec<UnknownField>>;
}
