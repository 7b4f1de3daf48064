use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use field_registry::{FieldRegistry, match_field};
use leadforge_core::{
    AliasConfidence, AliasOwner, AliasScope, FieldDataType, MappingRule,
    MatchResult, NewFieldSpec, RuleSet, ScopeContext, Suggestion,
    SystemField,
};
use state_store::StateStore;
use unknown_fields::{RecordOutcome, TrackerError, UnknownFieldTracker};

use crate::apply::apply_rules;
use crate::errors::{MappingError, MappingResult};

/// Result of running one raw payload through the engine.
#[derive(Debug)]
pub struct IngestOutcome {
    /// Canonical key → value, from confirmed rules and exact alias matches
    pub canonical: Map<String, Value>,

    /// Payload keys with no rule and no exact match, in payload order
    pub unmapped: Vec<String>,

    /// What the tracker did for each unmapped key
    pub tracked: Vec<RecordOutcome>,
}

/// Result of confirming a reviewed suggestion set.
#[derive(Debug)]
pub struct ConfirmOutcome {
    /// Rules recorded by this confirmation, in suggestion order
    pub rules: Vec<MappingRule>,

    /// Keys left unselected or without a target; the caller may keep
    /// tracking them as unknown fields
    pub still_unmapped: Vec<String>,
}

/// Ingestion- and review-facing surface over the registry, tracker, and
/// per-source rule sets.
pub struct MappingEngine {
    registry: Arc<FieldRegistry>,
    tracker: UnknownFieldTracker,
    store: Arc<dyn StateStore>,
    /// Per-source rule cache, invalidated on confirmation
    rules: tokio::sync::RwLock<HashMap<String, Arc<RuleSet>>>,
}

impl MappingEngine {
    pub fn new(
        registry: Arc<FieldRegistry>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            registry,
            tracker: UnknownFieldTracker::new(Arc::clone(&store)),
            store,
            rules: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &UnknownFieldTracker {
        &self.tracker
    }

    /// Confirmed rules for a source, in display order.
    pub async fn rules_for(
        &self,
        source_id: &str,
    ) -> MappingResult<Vec<MappingRule>> {
        let rules = self.rule_set(source_id).await?;
        Ok(rules.values().cloned().collect())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Run one raw payload through confirmed rules and the matcher.
    ///
    /// Keys covered by a rule are canonicalized first. Leftover keys go
    /// through the matcher: an exact alias hit canonicalizes directly, while
    /// ambiguous and no-match keys are recorded as unknown fields (ambiguous
    /// ones carry their candidate set) and surface in `unmapped`. Ingestion
    /// never waits on review.
    pub async fn process_payload(
        &self,
        ctx: &ScopeContext,
        payload: &Map<String, Value>,
    ) -> MappingResult<IngestOutcome> {
        let source_id =
            ctx.source_id.as_deref().ok_or(MappingError::MissingSource)?;

        let rules = self.rule_set(source_id).await?;
        let (mut canonical, leftovers) = apply_rules(&rules, payload);

        let mut unmapped = Vec::new();
        let mut tracked = Vec::new();
        for key in leftovers {
            let value = payload.get(&key).cloned().unwrap_or(Value::Null);
            match match_field(&self.registry, &key, ctx) {
                MatchResult::Exact { field_key } => {
                    canonical.insert(field_key, value);
                }
                MatchResult::Ambiguous { candidates } => {
                    let outcome = self
                        .tracker
                        .record_unmatched(source_id, &key, value, candidates)
                        .await?;
                    tracked.push(outcome);
                    unmapped.push(key);
                }
                MatchResult::NoMatch => {
                    let outcome = self
                        .tracker
                        .record_unmatched(source_id, &key, value, Vec::new())
                        .await?;
                    tracked.push(outcome);
                    unmapped.push(key);
                }
            }
        }

        metrics::counter!("leadforge_payloads_total").increment(1);
        debug!(
            source = %source_id,
            canonical = canonical.len(),
            unmapped = unmapped.len(),
            "payload processed"
        );
        Ok(IngestOutcome {
            canonical,
            unmapped,
            tracked,
        })
    }

    // ========================================================================
    // Suggestion workflow
    // ========================================================================

    /// Propose a mapping for each top-level key of a sample payload.
    ///
    /// The sample must be a JSON object or a non-empty array of objects; for
    /// an array only the first element is analyzed. Suggestion order follows
    /// the sample's key order. No state is mutated.
    pub fn suggest(
        &self,
        sample: &Value,
        ctx: &ScopeContext,
    ) -> MappingResult<Vec<Suggestion>> {
        let object = sample_object(sample)?;
        Ok(object
            .keys()
            .map(|key| match match_field(&self.registry, key, ctx) {
                MatchResult::Exact { field_key } => Suggestion {
                    source_field: key.clone(),
                    target_field: Some(field_key),
                    auto_selected: true,
                    candidates: Vec::new(),
                    new_field: None,
                },
                MatchResult::Ambiguous { candidates } => Suggestion {
                    source_field: key.clone(),
                    target_field: None,
                    auto_selected: false,
                    candidates,
                    new_field: None,
                },
                MatchResult::NoMatch => Suggestion {
                    source_field: key.clone(),
                    target_field: None,
                    auto_selected: false,
                    candidates: Vec::new(),
                    new_field: None,
                },
            })
            .collect())
    }

    /// Parse raw JSON and propose mappings for it.
    pub fn suggest_raw(
        &self,
        json: &[u8],
        ctx: &ScopeContext,
    ) -> MappingResult<Vec<Suggestion>> {
        let sample: Value = serde_json::from_slice(json)
            .map_err(|e| MappingError::InvalidSample(e.to_string()))?;
        self.suggest(&sample, ctx)
    }

    /// Turn a reviewed suggestion set into durable state.
    ///
    /// For each selected suggestion with a target: create the system field
    /// first when the target does not exist yet, register a source-scoped
    /// manual alias when the raw key differs from the canonical key, record
    /// the mapping rule, and mark any tracked unknown field as mapped.
    /// Suggestions left unselected or without a target come back in
    /// `still_unmapped`.
    pub async fn confirm(
        &self,
        ctx: &ScopeContext,
        suggestions: Vec<Suggestion>,
    ) -> MappingResult<ConfirmOutcome> {
        let source_id =
            ctx.source_id.as_deref().ok_or(MappingError::MissingSource)?;

        let mut rules = Vec::new();
        let mut still_unmapped = Vec::new();

        for suggestion in suggestions {
            let target = suggestion
                .auto_selected
                .then(|| suggestion.effective_target().map(str::to_owned))
                .flatten();
            let Some(target) = target else {
                still_unmapped.push(suggestion.source_field);
                continue;
            };

            if !self.registry.contains(&target) {
                let spec = suggestion.new_field.clone().unwrap_or_else(|| {
                    NewFieldSpec {
                        field_key: target.clone(),
                        label: target.clone(),
                        data_type: FieldDataType::String,
                    }
                });
                self.registry
                    .register_field(SystemField::new(
                        spec.field_key,
                        spec.label,
                        spec.data_type,
                    ))
                    .await?;
            }

            if suggestion.source_field != target {
                let owner = AliasOwner {
                    vendor_id: ctx.vendor_id.clone(),
                    source_id: Some(source_id.to_owned()),
                };
                self.registry
                    .register_alias(
                        &target,
                        &suggestion.source_field,
                        AliasScope::Source,
                        AliasConfidence::Manual,
                        &owner,
                    )
                    .await?;
            }

            let rule =
                MappingRule::new(suggestion.source_field.clone(), target);
            self.store.put_rule(source_id, &rule).await?;

            match self.tracker.resolve(source_id, &rule.source_field).await {
                Ok(_) | Err(TrackerError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            rules.push(rule);
        }

        self.rules.write().await.remove(source_id);
        info!(
            source = %source_id,
            confirmed = rules.len(),
            unmapped = still_unmapped.len(),
            "mapping rules confirmed"
        );
        Ok(ConfirmOutcome {
            rules,
            still_unmapped,
        })
    }

    async fn rule_set(&self, source_id: &str) -> MappingResult<Arc<RuleSet>> {
        if let Some(rules) = self.rules.read().await.get(source_id) {
            return Ok(Arc::clone(rules));
        }

        let loaded = self.store.load_rules(source_id).await?;
        let rules = Arc::new(leadforge_core::rule_set(loaded));
        self.rules
            .write()
            .await
            .insert(source_id.to_owned(), Arc::clone(&rules));
        Ok(rules)
    }
}

fn sample_object(sample: &Value) -> MappingResult<&Map<String, Value>> {
    match sample {
        Value::Object(map) => Ok(map),
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(MappingError::InvalidSample(
                "array elements must be objects".into(),
            )),
            None => {
                Err(MappingError::InvalidSample("empty sample array".into()))
            }
        },
        other => Err(MappingError::InvalidSample(format!(
            "expected an object or non-empty array of objects, got {}",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadforge_core::UnknownFieldStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use state_store::MemStateStore;

    async fn engine() -> MappingEngine {
        let store: Arc<dyn StateStore> = Arc::new(MemStateStore::new());
        let registry = Arc::new(
            FieldRegistry::open(Arc::clone(&store)).await.unwrap(),
        );
        MappingEngine::new(registry, store)
    }

    /// Registry from the review scenario: `email` with a known alias, and
    /// `phone` matchable by its own key.
    async fn seeded_engine() -> MappingEngine {
        let engine = engine().await;
        let mut email =
            SystemField::new("email", "Email", FieldDataType::String);
        email.aliases.push(leadforge_core::Alias::global(
            "email_address",
            AliasConfidence::High,
        ));
        engine.registry.register_field(email).await.unwrap();
        engine
            .registry
            .register_field(SystemField::new(
                "phone",
                "Phone",
                FieldDataType::String,
            ))
            .await
            .unwrap();
        engine
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_suggest_then_confirm_then_apply() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        let sample = json!({
            "first_name": "John",
            "email_address": "j@x.com",
            "phone": "555-0123",
        });
        let mut suggestions = engine.suggest(&sample, &ctx).unwrap();

        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0].source_field, "first_name");
        assert_eq!(suggestions[0].target_field, None);
        assert!(!suggestions[0].auto_selected);
        assert_eq!(suggestions[1].source_field, "email_address");
        assert_eq!(suggestions[1].target_field.as_deref(), Some("email"));
        assert!(suggestions[1].auto_selected);
        assert_eq!(suggestions[2].source_field, "phone");
        assert_eq!(suggestions[2].target_field.as_deref(), Some("phone"));
        assert!(suggestions[2].auto_selected);

        // Human review: create first_name as a new field, keep the rest.
        suggestions[0].auto_selected = true;
        suggestions[0].new_field = Some(NewFieldSpec {
            field_key: "first_name".into(),
            label: "First Name".into(),
            data_type: FieldDataType::String,
        });

        let outcome = engine.confirm(&ctx, suggestions).await.unwrap();
        assert_eq!(outcome.rules.len(), 3);
        assert!(outcome.still_unmapped.is_empty());
        assert!(engine.registry.contains("first_name"));

        let payload = object(json!({
            "first_name": "Jane",
            "email_address": "a@b.com",
            "phone": "555-9999",
        }));
        let result = engine.process_payload(&ctx, &payload).await.unwrap();

        assert!(result.unmapped.is_empty());
        assert_eq!(
            result.canonical,
            object(json!({
                "first_name": "Jane",
                "email": "a@b.com",
                "phone": "555-9999",
            }))
        );
    }

    #[tokio::test]
    async fn test_suggest_rejects_bad_samples() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        for sample in [json!("text"), json!(42), json!([]), json!([1, 2])] {
            let err = engine.suggest(&sample, &ctx).unwrap_err();
            assert!(
                matches!(err, MappingError::InvalidSample(_)),
                "sample = {sample}"
            );
        }

        let err = engine.suggest_raw(b"not json", &ctx).unwrap_err();
        assert!(matches!(err, MappingError::InvalidSample(_)));
    }

    #[tokio::test]
    async fn test_suggest_uses_first_array_element() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        let sample = json!([
            {"email_address": "a@b.com"},
            {"completely": "different"},
        ]);
        let suggestions = engine.suggest(&sample, &ctx).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].target_field.as_deref(), Some("email"));
    }

    #[tokio::test]
    async fn test_exact_alias_match_canonicalizes_without_rule() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        let payload = object(json!({"Email Address": "a@b.com"}));
        let result = engine.process_payload(&ctx, &payload).await.unwrap();

        assert!(result.unmapped.is_empty());
        assert_eq!(result.canonical["email"], json!("a@b.com"));
        assert!(result.tracked.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_keys_are_tracked_with_candidates() {
        let engine = seeded_engine().await;
        // Make "contactnumber" ambiguous between two fields.
        for (key, label) in
            [("phone_home", "Contact Number"), ("phone_work", "ContactNumber")]
        {
            engine
                .registry
                .register_field(SystemField::new(
                    key,
                    label,
                    FieldDataType::String,
                ))
                .await
                .unwrap();
        }

        let ctx = ScopeContext::source("src-1");
        let payload = object(json!({
            "contact_number": "555-0100",
            "fax": "555-0101",
        }));
        let result = engine.process_payload(&ctx, &payload).await.unwrap();

        assert_eq!(result.unmapped, vec!["contact_number", "fax"]);
        assert_eq!(result.tracked.len(), 2);

        // The ambiguous key carries its candidate set at review time.
        let pending = engine.tracker().pending("src-1").await.unwrap();
        let ambiguous = pending
            .iter()
            .find(|r| r.field_name == "contact_number")
            .unwrap();
        assert_eq!(ambiguous.candidates, vec!["phone_home", "phone_work"]);
        let no_match =
            pending.iter().find(|r| r.field_name == "fax").unwrap();
        assert!(no_match.candidates.is_empty());
        assert_eq!(no_match.sample_value, Some(json!("555-0101")));
    }

    #[tokio::test]
    async fn test_repeat_ingestion_counts_once_per_payload() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");
        let payload = object(json!({"fax": "555-0101"}));

        for _ in 0..4 {
            engine.process_payload(&ctx, &payload).await.unwrap();
        }

        let pending = engine.tracker().pending("src-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].detected_count, 4);
    }

    #[tokio::test]
    async fn test_confirm_resolves_tracked_unknowns_and_refreshes_rules() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");
        let payload = object(json!({"zip": "02134"}));

        // First sight: tracked as unknown.
        let result = engine.process_payload(&ctx, &payload).await.unwrap();
        assert_eq!(result.unmapped, vec!["zip"]);

        // Review confirms zip onto a new postal_code field.
        let mut suggestions = engine
            .suggest(&json!({"zip": "02134"}), &ctx)
            .unwrap();
        suggestions[0].auto_selected = true;
        suggestions[0].new_field = Some(NewFieldSpec {
            field_key: "postal_code".into(),
            label: "Postal Code".into(),
            data_type: FieldDataType::String,
        });
        engine.confirm(&ctx, suggestions).await.unwrap();

        // The unknown record flipped to mapped.
        let record = engine
            .tracker()
            .get("src-1", "zip")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, UnknownFieldStatus::Mapped);

        // And the cached rule set was refreshed.
        let result = engine.process_payload(&ctx, &payload).await.unwrap();
        assert!(result.unmapped.is_empty());
        assert_eq!(result.canonical["postal_code"], json!("02134"));
    }

    #[tokio::test]
    async fn test_confirm_reports_unselected_keys() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        let suggestions = vec![
            Suggestion {
                source_field: "email_address".into(),
                target_field: Some("email".into()),
                auto_selected: true,
                candidates: vec![],
                new_field: None,
            },
            // Deselected by the reviewer.
            Suggestion {
                source_field: "utm_source".into(),
                target_field: Some("email".into()),
                auto_selected: false,
                candidates: vec![],
                new_field: None,
            },
            // Selected but never given a target.
            Suggestion {
                source_field: "mystery".into(),
                target_field: None,
                auto_selected: true,
                candidates: vec![],
                new_field: None,
            },
        ];

        let outcome = engine.confirm(&ctx, suggestions).await.unwrap();
        assert_eq!(outcome.rules.len(), 1);
        assert_eq!(outcome.still_unmapped, vec!["utm_source", "mystery"]);
    }

    #[tokio::test]
    async fn test_confirm_registers_source_alias_for_renames() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::new("acme", "src-1");

        let suggestions = vec![Suggestion {
            source_field: "email_address".into(),
            target_field: Some("email".into()),
            auto_selected: true,
            candidates: vec![],
            new_field: None,
        }];
        engine.confirm(&ctx, suggestions).await.unwrap();

        let email = engine.registry.get("email").unwrap();
        let source_alias = email
            .aliases
            .iter()
            .find(|a| a.source_id.as_deref() == Some("src-1"))
            .expect("source-scoped alias registered on confirm");
        assert_eq!(source_alias.confidence, AliasConfidence::Manual);

        // Identical raw key and target: no alias needed.
        let suggestions = vec![Suggestion {
            source_field: "phone".into(),
            target_field: Some("phone".into()),
            auto_selected: true,
            candidates: vec![],
            new_field: None,
        }];
        engine.confirm(&ctx, suggestions).await.unwrap();
        assert!(engine.registry.get("phone").unwrap().aliases.is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_source_context() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::vendor("acme");

        let err = engine
            .process_payload(&ctx, &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::MissingSource));

        let err = engine.confirm(&ctx, vec![]).await.unwrap_err();
        assert!(matches!(err, MappingError::MissingSource));
    }

    #[tokio::test]
    async fn test_rules_for_lists_in_confirmation_order() {
        let engine = seeded_engine().await;
        let ctx = ScopeContext::source("src-1");

        let suggestions = vec![
            Suggestion {
                source_field: "email_address".into(),
                target_field: Some("email".into()),
                auto_selected: true,
                candidates: vec![],
                new_field: None,
            },
            Suggestion {
                source_field: "phone".into(),
                target_field: Some("phone".into()),
                auto_selected: true,
                candidates: vec![],
                new_field: None,
            },
        ];
        engine.confirm(&ctx, suggestions).await.unwrap();

        let rules = engine.rules_for("src-1").await.unwrap();
        let keys: Vec<&str> =
            rules.iter().map(|r| r.source_field.as_str()).collect();
        assert_eq!(keys, vec!["email_address", "phone"]);
    }
}
