use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use leadforge_core::{
    Alias, MappingRule, SystemField, UnknownField, UnknownFieldStatus,
};

use crate::errors::{StoreError, StoreResult};
use crate::{StateStore, Transition, UnknownSighting};

#[derive(Default)]
struct MemInner {
    /// field_key → field, registration order
    fields: IndexMap<String, SystemField>,
    /// source_id → (source_field → rule), display order
    rules: HashMap<String, IndexMap<String, MappingRule>>,
    /// (source_id, field_name) → record
    unknown: HashMap<(String, String), UnknownField>,
}

/// In-memory backend. State is lost on drop; intended for tests and
/// single-process embedding.
#[derive(Default)]
pub struct MemStateStore {
    inner: RwLock<MemInner>,
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemStateStore {
    async fn load_fields(&self) -> StoreResult<Vec<SystemField>> {
        let inner = self.inner.read().await;
        Ok(inner.fields.values().cloned().collect())
    }

    async fn insert_field(&self, field: &SystemField) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.fields.contains_key(&field.field_key) {
            return Err(StoreError::Constraint(format!(
                "system field already exists: {}",
                field.field_key
            )));
        }
        inner
            .fields
            .insert(field.field_key.clone(), field.clone());
        Ok(())
    }

    async fn insert_alias(
        &self,
        field_key: &str,
        alias: &Alias,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        // Mirror the SQLite unique index: one alias per
        // (normalized, scope, qualifier) across all fields.
        let taken = inner.fields.values().any(|f| {
            f.aliases.iter().any(|a| {
                a.normalized == alias.normalized
                    && a.scope == alias.scope
                    && a.qualifier() == alias.qualifier()
            })
        });
        if taken {
            return Err(StoreError::Constraint(format!(
                "alias already registered: {} ({} scope)",
                alias.normalized, alias.scope
            )));
        }

        let field = inner.fields.get_mut(field_key).ok_or_else(|| {
            StoreError::Data(format!("no such system field: {field_key}"))
        })?;
        field.aliases.push(alias.clone());
        Ok(())
    }

    async fn load_rules(
        &self,
        source_id: &str,
    ) -> StoreResult<Vec<MappingRule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rules
            .get(source_id)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_rule(
        &self,
        source_id: &str,
        rule: &MappingRule,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let rules = inner.rules.entry(source_id.to_string()).or_default();
        // IndexMap keeps the original position on replacement, which is
        // exactly the display-order contract.
        rules.insert(rule.source_field.clone(), rule.clone());
        Ok(())
    }

    async fn upsert_unknown(
        &self,
        sighting: &UnknownSighting,
    ) -> StoreResult<UnknownField> {
        let mut inner = self.inner.write().await;
        let key =
            (sighting.source_id.clone(), sighting.field_name.clone());

        let record = inner
            .unknown
            .entry(key)
            .and_modify(|record| match record.status {
                UnknownFieldStatus::Pending => {
                    record.detected_count += 1;
                    record.sample_value = Some(sighting.sample_value.clone());
                    record.candidates = sighting.candidates.clone();
                    record.last_seen = sighting.seen_at;
                }
                UnknownFieldStatus::Ignored => {
                    record.detected_count += 1;
                    record.last_seen = sighting.seen_at;
                }
                UnknownFieldStatus::Mapped => {}
            })
            .or_insert_with(|| UnknownField {
                source_id: sighting.source_id.clone(),
                field_name: sighting.field_name.clone(),
                sample_value: Some(sighting.sample_value.clone()),
                detected_count: 1,
                status: UnknownFieldStatus::Pending,
                candidates: sighting.candidates.clone(),
                first_seen: sighting.seen_at,
                last_seen: sighting.seen_at,
            });

        Ok(record.clone())
    }

    async fn get_unknown(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> StoreResult<Option<UnknownField>> {
        let inner = self.inner.read().await;
        Ok(inner
            .unknown
            .get(&(source_id.to_string(), field_name.to_string()))
            .cloned())
    }

    async fn transition_unknown(
        &self,
        source_id: &str,
        field_name: &str,
        from: &[UnknownFieldStatus],
        to: UnknownFieldStatus,
    ) -> StoreResult<Transition> {
        let mut inner = self.inner.write().await;
        let key = (source_id.to_string(), field_name.to_string());
        match inner.unknown.get_mut(&key) {
            None => Ok(Transition::NotFound),
            Some(record) if !from.contains(&record.status) => {
                Ok(Transition::Rejected(record.clone()))
            }
            Some(record) => {
                record.status = to;
                Ok(Transition::Updated(record.clone()))
            }
        }
    }

    async fn list_unknown(
        &self,
        source_id: &str,
        status: Option<UnknownFieldStatus>,
    ) -> StoreResult<Vec<UnknownField>> {
        let inner = self.inner.read().await;
        let mut records: Vec<UnknownField> = inner
            .unknown
            .values()
            .filter(|r| r.source_id == source_id)
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.field_name.cmp(&b.field_name))
        });
        Ok(records)
    }
}
