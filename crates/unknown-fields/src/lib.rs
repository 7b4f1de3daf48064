//! Unknown-field tracking.
//!
//! Records vendor keys that ingestion could not confidently match, so a
//! human can review them later. Each `(source_id, field_name)` pair has at
//! most one record; the create-or-increment step is atomic in the store, so
//! concurrent first sightings collapse into a single record.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use leadforge_core::{UnknownField, UnknownFieldStatus};
use state_store::{StateStore, Transition, UnknownSighting};

mod errors;

pub use errors::{TrackerError, TrackerResult};

/// What a call to [`UnknownFieldTracker::record_unmatched`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting; a pending record was created
    Created(UnknownField),

    /// Pending record existed; count, sample, and candidates updated
    Incremented(UnknownField),

    /// Record is ignored; counted but not resurfaced for review
    Suppressed(UnknownField),

    /// Record is already mapped; the caller should have matched this
    /// field. Nothing was mutated, status never regresses.
    AlreadyMapped(UnknownField),
}

impl RecordOutcome {
    pub fn record(&self) -> &UnknownField {
        match self {
            RecordOutcome::Created(r)
            | RecordOutcome::Incremented(r)
            | RecordOutcome::Suppressed(r)
            | RecordOutcome::AlreadyMapped(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::Created(_))
    }
}

/// Tracks unmatched vendor fields per source.
pub struct UnknownFieldTracker {
    store: Arc<dyn StateStore>,
}

impl UnknownFieldTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Record one unmatched sighting of `field_name` in a payload from
    /// `source_id`. `candidates` carries the ambiguous-match candidate set
    /// when the matcher found more than one possibility.
    pub async fn record_unmatched(
        &self,
        source_id: &str,
        field_name: &str,
        sample_value: Value,
        candidates: Vec<String>,
    ) -> TrackerResult<RecordOutcome> {
        let sighting = UnknownSighting::new(
            source_id,
            field_name,
            sample_value,
            candidates,
        );
        let record = self.store.upsert_unknown(&sighting).await?;

        let outcome = match record.status {
            UnknownFieldStatus::Mapped => {
                warn!(
                    source = %source_id,
                    field = %field_name,
                    "unmatched sighting for an already-mapped field"
                );
                RecordOutcome::AlreadyMapped(record)
            }
            UnknownFieldStatus::Pending if record.detected_count == 1 => {
                metrics::counter!("leadforge_unknown_fields_total")
                    .increment(1);
                info!(
                    source = %source_id,
                    field = %field_name,
                    ambiguous = !record.candidates.is_empty(),
                    "new unknown field recorded"
                );
                RecordOutcome::Created(record)
            }
            UnknownFieldStatus::Pending => {
                debug!(
                    source = %source_id,
                    field = %field_name,
                    count = record.detected_count,
                    "unknown field seen again"
                );
                RecordOutcome::Incremented(record)
            }
            UnknownFieldStatus::Ignored => {
                debug!(
                    source = %source_id,
                    field = %field_name,
                    count = record.detected_count,
                    "ignored field seen again"
                );
                RecordOutcome::Suppressed(record)
            }
        };
        Ok(outcome)
    }

    /// Dismiss a pending field without mapping it. Idempotent; rejects
    /// mapped records.
    pub async fn dismiss(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> TrackerResult<UnknownField> {
        self.transition(
            source_id,
            field_name,
            &[UnknownFieldStatus::Pending],
            UnknownFieldStatus::Ignored,
        )
        .await
    }

    /// Mark a field as mapped. Called only after a mapping rule has been
    /// durably recorded for it; also accepts ignored records, since a
    /// confirmed rule supersedes a dismissal.
    pub async fn resolve(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> TrackerResult<UnknownField> {
        self.transition(
            source_id,
            field_name,
            &[UnknownFieldStatus::Pending, UnknownFieldStatus::Ignored],
            UnknownFieldStatus::Mapped,
        )
        .await
    }

    /// Bring an ignored field back up for review. Mapped records cannot be
    /// reopened; that would require rule retraction.
    pub async fn reopen(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> TrackerResult<UnknownField> {
        self.transition(
            source_id,
            field_name,
            &[UnknownFieldStatus::Ignored],
            UnknownFieldStatus::Pending,
        )
        .await
    }

    async fn transition(
        &self,
        source_id: &str,
        field_name: &str,
        from: &[UnknownFieldStatus],
        to: UnknownFieldStatus,
    ) -> TrackerResult<UnknownField> {
        match self
            .store
            .transition_unknown(source_id, field_name, from, to)
            .await?
        {
            Transition::Updated(record) => {
                info!(
                    source = %source_id,
                    field = %field_name,
                    status = %record.status,
                    "unknown field status changed"
                );
                Ok(record)
            }
            // Already in the target state.
            Transition::Rejected(record) if record.status == to => Ok(record),
            Transition::Rejected(record) => {
                Err(TrackerError::InvalidTransition {
                    source_id: source_id.to_owned(),
                    field_name: field_name.to_owned(),
                    from: record.status,
                    to,
                })
            }
            Transition::NotFound => Err(TrackerError::NotFound {
                source_id: source_id.to_owned(),
                field_name: field_name.to_owned(),
            }),
        }
    }

    pub async fn get(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> TrackerResult<Option<UnknownField>> {
        Ok(self.store.get_unknown(source_id, field_name).await?)
    }

    /// Records awaiting review for one source, oldest first.
    pub async fn pending(
        &self,
        source_id: &str,
    ) -> TrackerResult<Vec<UnknownField>> {
        self.list(source_id, Some(UnknownFieldStatus::Pending)).await
    }

    pub async fn list(
        &self,
        source_id: &str,
        status: Option<UnknownFieldStatus>,
    ) -> TrackerResult<Vec<UnknownField>> {
        Ok(self.store.list_unknown(source_id, status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use state_store::MemStateStore;

    fn tracker() -> UnknownFieldTracker {
        UnknownFieldTracker::new(Arc::new(MemStateStore::new()))
    }

    #[tokio::test]
    async fn test_repeat_sightings_accumulate() {
        let tracker = tracker();

        let outcome = tracker
            .record_unmatched("src-1", "fax", json!("555-0100"), vec![])
            .await
            .unwrap();
        assert!(outcome.is_new());

        for n in 2..=5u64 {
            let outcome = tracker
                .record_unmatched("src-1", "fax", json!("555-0100"), vec![])
                .await
                .unwrap();
            match outcome {
                RecordOutcome::Incremented(r) => {
                    assert_eq!(r.detected_count, n)
                }
                other => panic!("expected increment, got {other:?}"),
            }
        }

        let pending = tracker.pending("src-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].detected_count, 5);
    }

    #[tokio::test]
    async fn test_ambiguous_sighting_keeps_candidates() {
        let tracker = tracker();
        let outcome = tracker
            .record_unmatched(
                "src-1",
                "contact",
                json!("j@x.com"),
                vec!["email".into(), "phone".into()],
            )
            .await
            .unwrap();
        assert_eq!(outcome.record().candidates, vec!["email", "phone"]);
    }

    #[tokio::test]
    async fn test_dismiss_suppresses_but_keeps_counting() {
        let tracker = tracker();
        tracker
            .record_unmatched("src-1", "fax", json!(null), vec![])
            .await
            .unwrap();

        let dismissed = tracker.dismiss("src-1", "fax").await.unwrap();
        assert_eq!(dismissed.status, UnknownFieldStatus::Ignored);
        // Dismissing again is a no-op.
        tracker.dismiss("src-1", "fax").await.unwrap();

        let outcome = tracker
            .record_unmatched("src-1", "fax", json!(null), vec![])
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::Suppressed(_)));
        assert_eq!(outcome.record().detected_count, 2);

        assert!(tracker.pending("src-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_is_terminal() {
        let tracker = tracker();
        tracker
            .record_unmatched("src-1", "zip", json!("02134"), vec![])
            .await
            .unwrap();

        let resolved = tracker.resolve("src-1", "zip").await.unwrap();
        assert_eq!(resolved.status, UnknownFieldStatus::Mapped);

        // A straggler sighting is reported, not re-tracked.
        let outcome = tracker
            .record_unmatched("src-1", "zip", json!("02134"), vec![])
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::AlreadyMapped(_)));
        assert_eq!(outcome.record().detected_count, 1);

        // Mapped fields cannot be reopened.
        let err = tracker.reopen("src-1", "zip").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
        // Nor dismissed.
        let err = tracker.dismiss("src-1", "zip").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reopen_returns_to_pending() {
        let tracker = tracker();
        tracker
            .record_unmatched("src-1", "fax", json!(null), vec![])
            .await
            .unwrap();
        tracker.dismiss("src-1", "fax").await.unwrap();

        let reopened = tracker.reopen("src-1", "fax").await.unwrap();
        assert_eq!(reopened.status, UnknownFieldStatus::Pending);
        assert_eq!(tracker.pending("src-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_untracked_field_is_not_found() {
        let tracker = tracker();
        let err = tracker.dismiss("src-1", "ghost").await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { .. }));
        assert!(tracker.get("src-1", "ghost").await.unwrap().is_none());
    }
}
