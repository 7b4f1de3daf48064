//! Canonical field registry.
//!
//! Owns the set of system fields and their aliases, shared by every
//! ingestion path. Reads are synchronous snapshot reads against an in-memory
//! index; mutations serialize on a write gate, validate the uniqueness
//! invariants, write through to the [`StateStore`], and only then update the
//! index, so a failed registration leaves nothing behind.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tracing::{debug, info};

use leadforge_core::{
    Alias, AliasConfidence, AliasOwner, AliasScope, MatchResult,
    ScopeContext, SystemField, normalize,
};
use state_store::StateStore;

mod errors;
mod matcher;

pub use errors::{RegistryError, RegistryResult};
pub use matcher::match_field;

/// One alias occurrence in the lookup index.
#[derive(Debug, Clone)]
struct AliasEntry {
    field_key: String,
    scope: AliasScope,
    qualifier: Option<String>,
}

#[derive(Default)]
struct RegistryIndex {
    /// field_key → field, registration order
    fields: IndexMap<String, SystemField>,
    /// normalized alias → every explicit alias carrying that form
    by_alias: HashMap<String, Vec<AliasEntry>>,
    /// normalized field_key/label → owning field keys (implicit globals)
    implicit: HashMap<String, BTreeSet<String>>,
}

impl RegistryIndex {
    fn insert_field(&mut self, field: SystemField) {
        for key in [normalize(&field.field_key), normalize(&field.label)] {
            if !key.is_empty() {
                self.implicit
                    .entry(key)
                    .or_default()
                    .insert(field.field_key.clone());
            }
        }
        let aliases = field.aliases.clone();
        let field_key = field.field_key.clone();
        self.fields.insert(field_key.clone(), field);
        for alias in aliases {
            // Re-point the inline aliases at the index too.
            let entry = AliasEntry {
                field_key: field_key.clone(),
                scope: alias.scope,
                qualifier: alias.qualifier().map(str::to_owned),
            };
            self.by_alias
                .entry(alias.normalized.clone())
                .or_default()
                .push(entry);
        }
    }

    fn insert_alias(&mut self, field_key: &str, alias: Alias) {
        self.by_alias
            .entry(alias.normalized.clone())
            .or_default()
            .push(AliasEntry {
                field_key: field_key.to_owned(),
                scope: alias.scope,
                qualifier: alias.qualifier().map(str::to_owned),
            });
        if let Some(field) = self.fields.get_mut(field_key) {
            field.aliases.push(alias);
        }
    }

    /// Explicit alias entry at an exact (normalized, scope, qualifier) slot.
    fn find_exact(
        &self,
        normalized: &str,
        scope: AliasScope,
        qualifier: Option<&str>,
    ) -> Option<&AliasEntry> {
        self.by_alias.get(normalized).and_then(|entries| {
            entries.iter().find(|e| {
                e.scope == scope && e.qualifier.as_deref() == qualifier
            })
        })
    }

    fn hits_at(
        &self,
        normalized: &str,
        scope: AliasScope,
        qualifier: Option<&str>,
    ) -> BTreeSet<&str> {
        self.by_alias
            .get(normalized)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        e.scope == scope
                            && e.qualifier.as_deref() == qualifier
                    })
                    .map(|e| e.field_key.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Platform-wide registry of canonical fields and their aliases.
pub struct FieldRegistry {
    index: RwLock<RegistryIndex>,
    /// Serializes mutations so conflict checks, the store write-through,
    /// and the index commit are never interleaved.
    write_gate: tokio::sync::Mutex<()>,
    store: Arc<dyn StateStore>,
}

impl FieldRegistry {
    /// Open a registry over persisted state.
    pub async fn open(store: Arc<dyn StateStore>) -> RegistryResult<Self> {
        let fields = store.load_fields().await?;
        let mut index = RegistryIndex::default();
        let count = fields.len();
        for field in fields {
            index.insert_field(field);
        }
        debug!(fields = count, "field registry loaded");
        Ok(Self {
            index: RwLock::new(index),
            write_gate: tokio::sync::Mutex::new(()),
            store,
        })
    }

    /// Resolve a normalized key against the registry.
    ///
    /// Scope precedence: source alias, then vendor alias, then explicit
    /// global alias, then an implicit match on a field's own key or label.
    /// The first level with any hit wins; more than one distinct field at
    /// that level is ambiguous.
    pub fn resolve_candidates(
        &self,
        normalized: &str,
        ctx: &ScopeContext,
    ) -> MatchResult {
        if normalized.is_empty() {
            return MatchResult::NoMatch;
        }
        let idx = self.index.read().unwrap();

        if let Some(source_id) = ctx.source_id.as_deref() {
            let hits =
                idx.hits_at(normalized, AliasScope::Source, Some(source_id));
            if !hits.is_empty() {
                return to_result(hits);
            }
        }
        if let Some(vendor_id) = ctx.vendor_id.as_deref() {
            let hits =
                idx.hits_at(normalized, AliasScope::Vendor, Some(vendor_id));
            if !hits.is_empty() {
                return to_result(hits);
            }
        }
        let hits = idx.hits_at(normalized, AliasScope::Global, None);
        if !hits.is_empty() {
            return to_result(hits);
        }
        if let Some(keys) = idx.implicit.get(normalized) {
            if !keys.is_empty() {
                return to_result(
                    keys.iter().map(String::as_str).collect(),
                );
            }
        }
        MatchResult::NoMatch
    }

    pub fn contains(&self, field_key: &str) -> bool {
        self.index.read().unwrap().fields.contains_key(field_key)
    }

    pub fn get(&self, field_key: &str) -> Option<SystemField> {
        self.index.read().unwrap().fields.get(field_key).cloned()
    }

    /// All fields in registration order.
    pub fn fields(&self) -> Vec<SystemField> {
        self.index.read().unwrap().fields.values().cloned().collect()
    }

    /// Register a new canonical field, including any inline aliases.
    ///
    /// Fails with [`RegistryError::DuplicateKey`] if the key exists and with
    /// [`RegistryError::Conflict`] if any inline alias collides; nothing is
    /// recorded on failure.
    pub async fn register_field(
        &self,
        field: SystemField,
    ) -> RegistryResult<()> {
        let _gate = self.write_gate.lock().await;

        // Exact same-slot duplicates among inline aliases are collapsed;
        // aliases of one field cannot conflict with each other otherwise.
        let mut field = field;
        let mut seen: Vec<(String, AliasScope, Option<String>)> = Vec::new();
        field.aliases.retain(|alias| {
            let slot = (
                alias.normalized.clone(),
                alias.scope,
                alias.qualifier().map(str::to_owned),
            );
            if seen.contains(&slot) {
                false
            } else {
                seen.push(slot);
                true
            }
        });

        {
            let idx = self.index.read().unwrap();
            if idx.fields.contains_key(&field.field_key) {
                return Err(RegistryError::DuplicateKey {
                    field_key: field.field_key.clone(),
                });
            }
            for alias in &field.aliases {
                validate_qualifier(alias)?;
                check_conflict(&idx, &field.field_key, alias)?;
            }
        }

        let stripped = SystemField {
            aliases: Vec::new(),
            ..field.clone()
        };
        self.store.insert_field(&stripped).await?;
        for alias in &field.aliases {
            self.store.insert_alias(&field.field_key, alias).await?;
        }

        info!(
            field_key = %field.field_key,
            data_type = field.data_type.as_str(),
            aliases = field.aliases.len(),
            "system field registered"
        );
        self.index.write().unwrap().insert_field(field);
        Ok(())
    }

    /// Register an alias for an existing field.
    ///
    /// Re-registering an identical alias for the same field is a no-op that
    /// returns the existing record. A collision with a different field at an
    /// equal-or-broader scope fails with [`RegistryError::Conflict`] and
    /// leaves the registry unchanged.
    pub async fn register_alias(
        &self,
        field_key: &str,
        raw: &str,
        scope: AliasScope,
        confidence: AliasConfidence,
        owner: &AliasOwner,
    ) -> RegistryResult<Alias> {
        let alias = build_alias(raw, scope, confidence, owner)?;
        let _gate = self.write_gate.lock().await;

        {
            let idx = self.index.read().unwrap();
            if !idx.fields.contains_key(field_key) {
                return Err(RegistryError::NoSuchField {
                    field_key: field_key.to_owned(),
                });
            }
            if let Some(existing) =
                idx.find_exact(&alias.normalized, scope, alias.qualifier())
            {
                if existing.field_key == field_key {
                    // Already registered for this field.
                    let field = &idx.fields[field_key];
                    let existing = field
                        .aliases
                        .iter()
                        .find(|a| {
                            a.normalized == alias.normalized
                                && a.scope == scope
                                && a.qualifier() == alias.qualifier()
                        })
                        .cloned()
                        .unwrap_or_else(|| alias.clone());
                    return Ok(existing);
                }
            }
            check_conflict_with_owner(&idx, field_key, &alias, owner)?;
        }

        self.store.insert_alias(field_key, &alias).await?;
        info!(
            field_key = %field_key,
            alias = %alias.raw,
            normalized = %alias.normalized,
            scope = %alias.scope,
            "alias registered"
        );
        self.index
            .write()
            .unwrap()
            .insert_alias(field_key, alias.clone());
        Ok(alias)
    }

    /// Bootstrap fields from a seed catalog. Fields whose key already exists
    /// are skipped, so seeding is idempotent over a persisted store.
    pub async fn seed(
        &self,
        fields: Vec<SystemField>,
    ) -> RegistryResult<usize> {
        let mut added = 0;
        for field in fields {
            if self.contains(&field.field_key) {
                debug!(field_key = %field.field_key, "seed field exists, skipping");
                continue;
            }
            self.register_field(field).await?;
            added += 1;
        }
        Ok(added)
    }
}

fn to_result(hits: BTreeSet<&str>) -> MatchResult {
    if hits.len() == 1 {
        MatchResult::Exact {
            field_key: hits.into_iter().next().unwrap().to_owned(),
        }
    } else {
        MatchResult::Ambiguous {
            candidates: hits.into_iter().map(str::to_owned).collect(),
        }
    }
}

fn validate_qualifier(alias: &Alias) -> RegistryResult<()> {
    let missing = match alias.scope {
        AliasScope::Global => false,
        AliasScope::Vendor => alias.vendor_id.is_none(),
        AliasScope::Source => alias.source_id.is_none(),
    };
    if missing {
        return Err(RegistryError::MissingQualifier { scope: alias.scope });
    }
    Ok(())
}

fn build_alias(
    raw: &str,
    scope: AliasScope,
    confidence: AliasConfidence,
    owner: &AliasOwner,
) -> RegistryResult<Alias> {
    match scope {
        AliasScope::Global => Ok(Alias::global(raw, confidence)),
        AliasScope::Vendor => owner
            .vendor_id
            .as_deref()
            .map(|v| Alias::vendor(raw, confidence, v))
            .ok_or(RegistryError::MissingQualifier { scope }),
        AliasScope::Source => owner
            .source_id
            .as_deref()
            .map(|s| Alias::source(raw, confidence, s))
            .ok_or(RegistryError::MissingQualifier { scope }),
    }
}

/// Conflict check for an alias whose owner is implied by its own
/// qualifiers (seed/inline aliases).
fn check_conflict(
    idx: &RegistryIndex,
    field_key: &str,
    alias: &Alias,
) -> RegistryResult<()> {
    let owner = AliasOwner {
        vendor_id: alias.vendor_id.clone(),
        source_id: alias.source_id.clone(),
    };
    check_conflict_with_owner(idx, field_key, alias, &owner)
}

/// Reject the alias when its normalized form already resolves to a
/// different field at an equal-or-broader scope.
fn check_conflict_with_owner(
    idx: &RegistryIndex,
    field_key: &str,
    alias: &Alias,
    owner: &AliasOwner,
) -> RegistryResult<()> {
    // Scope levels that shadow or tie with the one being registered.
    let mut levels: Vec<(AliasScope, Option<&str>)> = Vec::new();
    match alias.scope {
        AliasScope::Source => {
            levels.push((AliasScope::Source, alias.source_id.as_deref()));
            if let Some(vendor) = owner.vendor_id.as_deref() {
                levels.push((AliasScope::Vendor, Some(vendor)));
            }
            levels.push((AliasScope::Global, None));
        }
        AliasScope::Vendor => {
            levels.push((AliasScope::Vendor, alias.vendor_id.as_deref()));
            levels.push((AliasScope::Global, None));
        }
        AliasScope::Global => levels.push((AliasScope::Global, None)),
    }

    for (scope, qualifier) in &levels {
        let clash = idx
            .by_alias
            .get(&alias.normalized)
            .into_iter()
            .flatten()
            .map(|e| (e.field_key.as_str(), e.scope, e.qualifier.as_deref()))
            .find(|(key, s, q)| {
                s == scope && *q == *qualifier && *key != field_key
            });
        if let Some((existing_field, scope, _)) = clash {
            return Err(RegistryError::Conflict {
                raw: alias.raw.clone(),
                normalized: alias.normalized.clone(),
                existing_field: existing_field.to_owned(),
                scope,
            });
        }
    }

    // Field keys and labels act as implicit global aliases.
    if let Some(keys) = idx.implicit.get(&alias.normalized) {
        if let Some(other) = keys.iter().find(|k| *k != field_key) {
            return Err(RegistryError::Conflict {
                raw: alias.raw.clone(),
                normalized: alias.normalized.clone(),
                existing_field: other.clone(),
                scope: AliasScope::Global,
            });
        }
    }
    Ok(())
}
