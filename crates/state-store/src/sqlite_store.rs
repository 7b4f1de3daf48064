//! SQLite state store.
//!
//! All DB operations are dispatched via `tokio::task::spawn_blocking` so the
//! Tokio worker thread is never stalled by synchronous SQLite I/O. The
//! create-or-increment step for unknown fields is a single upsert statement,
//! so concurrent first sightings of the same `(source_id, field_name)` can
//! never produce two records.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use leadforge_core::{
    Alias, AliasConfidence, AliasScope, FieldDataType, MappingRule,
    SystemField, UnknownField, UnknownFieldStatus,
};

use crate::errors::{StoreError, StoreResult};
use crate::{StateStore, Transition, UnknownSighting};

// ---------------------------------------------------------------------------
// Helper macro — reduces spawn_blocking boilerplate.
// ---------------------------------------------------------------------------

/// Spawn a blocking closure that receives a locked `&Connection`.
/// Returns `StoreResult<T>` where `T: Send + 'static`.
macro_rules! db {
    ($conn:expr, $body:expr) => {{
        let conn = Arc::clone(&$conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            ($body)(&*guard)
        })
        .await
        .map_err(|e| {
            StoreError::Database(format!("spawn_blocking panic: {e}"))
        })?
    }};
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed [`StateStore`].
///
/// The connection is kept behind an `Arc<Mutex<Connection>>` so it can be
/// sent into blocking tasks; callers queue on the mutex rather than holding
/// an async executor thread.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Create or open a store at a file path.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS system_fields (
                field_key   TEXT PRIMARY KEY,
                label       TEXT NOT NULL,
                data_type   TEXT NOT NULL,
                category    TEXT,
                is_required INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS field_aliases (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                field_key        TEXT NOT NULL
                                 REFERENCES system_fields(field_key)
                                 ON DELETE CASCADE,
                alias_raw        TEXT NOT NULL,
                alias_normalized TEXT NOT NULL,
                scope            TEXT NOT NULL,
                confidence       TEXT NOT NULL,
                vendor_id        TEXT,
                source_id        TEXT,
                created_at       TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_alias_unique
                ON field_aliases(
                    alias_normalized, scope,
                    COALESCE(vendor_id, ''), COALESCE(source_id, '')
                );

            CREATE TABLE IF NOT EXISTS mapping_rules (
                source_id    TEXT NOT NULL,
                source_field TEXT NOT NULL,
                target_field TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                PRIMARY KEY (source_id, source_field)
            );

            CREATE TABLE IF NOT EXISTS unknown_fields (
                source_id      TEXT NOT NULL,
                field_name     TEXT NOT NULL,
                sample_value   TEXT,
                candidates     TEXT NOT NULL DEFAULT '[]',
                detected_count INTEGER NOT NULL DEFAULT 1,
                status         TEXT NOT NULL DEFAULT 'pending',
                first_seen     TEXT NOT NULL,
                last_seen      TEXT NOT NULL,
                PRIMARY KEY (source_id, field_name)
            );
            CREATE INDEX IF NOT EXISTS idx_unknown_status
                ON unknown_fields(source_id, status);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code
                == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(e.to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Data(format!("bad timestamp '{s}': {e}")))
}

fn unknown_from_row(row: &Row<'_>) -> rusqlite::Result<RawUnknown> {
    Ok(RawUnknown {
        source_id: row.get(0)?,
        field_name: row.get(1)?,
        sample_value: row.get(2)?,
        candidates: row.get(3)?,
        detected_count: row.get(4)?,
        status: row.get(5)?,
        first_seen: row.get(6)?,
        last_seen: row.get(7)?,
    })
}

/// Row image before JSON/timestamp decoding, which needs `StoreError`
/// rather than `rusqlite::Error`.
struct RawUnknown {
    source_id: String,
    field_name: String,
    sample_value: Option<String>,
    candidates: String,
    detected_count: i64,
    status: String,
    first_seen: String,
    last_seen: String,
}

impl RawUnknown {
    fn decode(self) -> StoreResult<UnknownField> {
        let status =
            UnknownFieldStatus::from_str(&self.status).ok_or_else(|| {
                StoreError::Data(format!("bad status '{}'", self.status))
            })?;
        let sample_value = self
            .sample_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(UnknownField {
            source_id: self.source_id,
            field_name: self.field_name,
            sample_value,
            detected_count: self.detected_count as u64,
            status,
            candidates: serde_json::from_str(&self.candidates)?,
            first_seen: parse_ts(&self.first_seen)?,
            last_seen: parse_ts(&self.last_seen)?,
        })
    }
}

const UNKNOWN_COLS: &str = "source_id, field_name, sample_value, candidates, \
     detected_count, status, first_seen, last_seen";

// ---------------------------------------------------------------------------
// StateStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_fields(&self) -> StoreResult<Vec<SystemField>> {
        db!(self.conn, move |conn: &Connection| {
            let mut stmt = conn
                .prepare(
                    "SELECT field_key, label, data_type, category, \
                     is_required, created_at FROM system_fields \
                     ORDER BY rowid",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(db_err)?;

            let mut fields = Vec::new();
            for row in rows {
                let (key, label, dt, category, required, created) =
                    row.map_err(db_err)?;
                let data_type =
                    FieldDataType::from_str(&dt).ok_or_else(|| {
                        StoreError::Data(format!("bad data_type '{dt}'"))
                    })?;
                fields.push(SystemField {
                    field_key: key,
                    label,
                    data_type,
                    category,
                    is_required: required,
                    aliases: Vec::new(),
                    created_at: parse_ts(&created)?,
                });
            }

            let mut stmt = conn
                .prepare(
                    "SELECT field_key, alias_raw, alias_normalized, scope, \
                     confidence, vendor_id, source_id, created_at \
                     FROM field_aliases ORDER BY id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map_err(db_err)?;

            for row in rows {
                let (
                    key,
                    raw,
                    normalized,
                    scope,
                    confidence,
                    vendor_id,
                    source_id,
                    created,
                ) = row.map_err(db_err)?;
                let scope = AliasScope::from_str(&scope).ok_or_else(|| {
                    StoreError::Data(format!("bad alias scope '{scope}'"))
                })?;
                let confidence = AliasConfidence::from_str(&confidence)
                    .ok_or_else(|| {
                        StoreError::Data(format!(
                            "bad alias confidence '{confidence}'"
                        ))
                    })?;
                let alias = Alias {
                    raw,
                    normalized,
                    scope,
                    confidence,
                    vendor_id,
                    source_id,
                    created_at: parse_ts(&created)?,
                };
                if let Some(field) =
                    fields.iter_mut().find(|f| f.field_key == key)
                {
                    field.aliases.push(alias);
                }
            }

            Ok(fields)
        })
    }

    async fn insert_field(&self, field: &SystemField) -> StoreResult<()> {
        let field = field.clone();
        db!(self.conn, move |conn: &Connection| {
            conn.execute(
                "INSERT INTO system_fields \
                 (field_key, label, data_type, category, is_required, \
                  created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    field.field_key,
                    field.label,
                    field.data_type.as_str(),
                    field.category,
                    field.is_required,
                    field.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn insert_alias(
        &self,
        field_key: &str,
        alias: &Alias,
    ) -> StoreResult<()> {
        let field_key = field_key.to_owned();
        let alias = alias.clone();
        db!(self.conn, move |conn: &Connection| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM system_fields \
                     WHERE field_key = ?1)",
                    params![field_key],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            if !exists {
                return Err(StoreError::Data(format!(
                    "no such system field: {field_key}"
                )));
            }

            conn.execute(
                "INSERT INTO field_aliases \
                 (field_key, alias_raw, alias_normalized, scope, \
                  confidence, vendor_id, source_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    field_key,
                    alias.raw,
                    alias.normalized,
                    alias.scope.as_str(),
                    alias.confidence.as_str(),
                    alias.vendor_id,
                    alias.source_id,
                    alias.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn load_rules(
        &self,
        source_id: &str,
    ) -> StoreResult<Vec<MappingRule>> {
        let source_id = source_id.to_owned();
        db!(self.conn, move |conn: &Connection| {
            let mut stmt = conn
                .prepare(
                    "SELECT source_field, target_field, created_at \
                     FROM mapping_rules WHERE source_id = ?1 \
                     ORDER BY rowid",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![source_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(db_err)?;

            let mut rules = Vec::new();
            for row in rows {
                let (source_field, target_field, created) =
                    row.map_err(db_err)?;
                rules.push(MappingRule {
                    source_field,
                    target_field,
                    created_at: parse_ts(&created)?,
                });
            }
            Ok(rules)
        })
    }

    async fn put_rule(
        &self,
        source_id: &str,
        rule: &MappingRule,
    ) -> StoreResult<()> {
        let source_id = source_id.to_owned();
        let rule = rule.clone();
        db!(self.conn, move |conn: &Connection| {
            // Replacing keeps the original rowid, so display order is the
            // first-confirmation order.
            conn.execute(
                "INSERT INTO mapping_rules \
                 (source_id, source_field, target_field, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(source_id, source_field) DO UPDATE SET \
                     target_field = excluded.target_field, \
                     created_at = excluded.created_at",
                params![
                    source_id,
                    rule.source_field,
                    rule.target_field,
                    rule.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    async fn upsert_unknown(
        &self,
        sighting: &UnknownSighting,
    ) -> StoreResult<UnknownField> {
        let sighting = sighting.clone();
        let sample = serde_json::to_string(&sighting.sample_value)?;
        let candidates = serde_json::to_string(&sighting.candidates)?;
        db!(self.conn, move |conn: &Connection| {
            // Single statement: create, or increment according to the
            // current status. Mapped rows match the conflict but fail the
            // DO UPDATE filter, so nothing is written and no row returns.
            let sql = format!(
                "INSERT INTO unknown_fields \
                 (source_id, field_name, sample_value, candidates, \
                  detected_count, status, first_seen, last_seen) \
                 VALUES (?1, ?2, ?3, ?4, 1, 'pending', ?5, ?5) \
                 ON CONFLICT(source_id, field_name) DO UPDATE SET \
                     detected_count = detected_count + 1, \
                     last_seen = excluded.last_seen, \
                     sample_value = CASE \
                         WHEN unknown_fields.status = 'pending' \
                         THEN excluded.sample_value \
                         ELSE unknown_fields.sample_value END, \
                     candidates = CASE \
                         WHEN unknown_fields.status = 'pending' \
                         THEN excluded.candidates \
                         ELSE unknown_fields.candidates END \
                 WHERE unknown_fields.status != 'mapped' \
                 RETURNING {UNKNOWN_COLS}"
            );
            let seen = sighting.seen_at.to_rfc3339();
            let upserted = conn
                .query_row(
                    &sql,
                    params![
                        sighting.source_id,
                        sighting.field_name,
                        sample,
                        candidates,
                        seen,
                    ],
                    unknown_from_row,
                )
                .optional()
                .map_err(db_err)?;

            match upserted {
                Some(raw) => raw.decode(),
                // Mapped record: fetch it untouched.
                None => conn
                    .query_row(
                        &format!(
                            "SELECT {UNKNOWN_COLS} FROM unknown_fields \
                             WHERE source_id = ?1 AND field_name = ?2"
                        ),
                        params![sighting.source_id, sighting.field_name],
                        unknown_from_row,
                    )
                    .map_err(db_err)?
                    .decode(),
            }
        })
    }

    async fn get_unknown(
        &self,
        source_id: &str,
        field_name: &str,
    ) -> StoreResult<Option<UnknownField>> {
        let source_id = source_id.to_owned();
        let field_name = field_name.to_owned();
        db!(self.conn, move |conn: &Connection| {
            conn.query_row(
                &format!(
                    "SELECT {UNKNOWN_COLS} FROM unknown_fields \
                     WHERE source_id = ?1 AND field_name = ?2"
                ),
                params![source_id, field_name],
                unknown_from_row,
            )
            .optional()
            .map_err(db_err)?
            .map(RawUnknown::decode)
            .transpose()
        })
    }

    async fn transition_unknown(
        &self,
        source_id: &str,
        field_name: &str,
        from: &[UnknownFieldStatus],
        to: UnknownFieldStatus,
    ) -> StoreResult<Transition> {
        let source_id = source_id.to_owned();
        let field_name = field_name.to_owned();
        // Status codes are static strings, safe to splice.
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        db!(self.conn, move |conn: &Connection| {
            let sql = format!(
                "UPDATE unknown_fields SET status = ?1 \
                 WHERE source_id = ?2 AND field_name = ?3 \
                 AND status IN ({allowed}) \
                 RETURNING {UNKNOWN_COLS}"
            );
            let updated = conn
                .query_row(
                    &sql,
                    params![to.as_str(), source_id, field_name],
                    unknown_from_row,
                )
                .optional()
                .map_err(db_err)?;

            if let Some(raw) = updated {
                return Ok(Transition::Updated(raw.decode()?));
            }

            let current = conn
                .query_row(
                    &format!(
                        "SELECT {UNKNOWN_COLS} FROM unknown_fields \
                         WHERE source_id = ?1 AND field_name = ?2"
                    ),
                    params![source_id, field_name],
                    unknown_from_row,
                )
                .optional()
                .map_err(db_err)?;

            match current {
                Some(raw) => Ok(Transition::Rejected(raw.decode()?)),
                None => Ok(Transition::NotFound),
            }
        })
    }

    async fn list_unknown(
        &self,
        source_id: &str,
        status: Option<UnknownFieldStatus>,
    ) -> StoreResult<Vec<UnknownField>> {
        let source_id = source_id.to_owned();
        db!(self.conn, move |conn: &Connection| {
            let sql = match status {
                Some(s) => format!(
                    "SELECT {UNKNOWN_COLS} FROM unknown_fields \
                     WHERE source_id = ?1 AND status = '{}' \
                     ORDER BY first_seen, field_name",
                    s.as_str()
                ),
                None => format!(
                    "SELECT {UNKNOWN_COLS} FROM unknown_fields \
                     WHERE source_id = ?1 \
                     ORDER BY first_seen, field_name"
                ),
            };
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params![source_id], unknown_from_row)
                .map_err(db_err)?;
            rows.map(|r| r.map_err(db_err).and_then(RawUnknown::decode))
                .collect()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use leadforge_core::AliasConfidence;
    use serde_json::json;

    #[tokio::test]
    async fn test_fields_round_trip() {
        let store = SqliteStateStore::in_memory().unwrap();
        let field =
            SystemField::new("email", "Email", FieldDataType::String)
                .with_category("contact")
                .required();
        store.insert_field(&field).await.unwrap();
        store
            .insert_alias(
                "email",
                &Alias::global("email_address", AliasConfidence::High),
            )
            .await
            .unwrap();
        store
            .insert_alias(
                "email",
                &Alias::source("E-Mail", AliasConfidence::Manual, "src-1"),
            )
            .await
            .unwrap();

        let fields = store.load_fields().await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_key, "email");
        assert_eq!(fields[0].category.as_deref(), Some("contact"));
        assert!(fields[0].is_required);
        assert_eq!(fields[0].aliases.len(), 2);
        assert_eq!(fields[0].aliases[0].normalized, "emailaddress");
        assert_eq!(fields[0].aliases[1].source_id.as_deref(), Some("src-1"));
    }

    #[tokio::test]
    async fn test_duplicate_field_key_rejected() {
        let store = SqliteStateStore::in_memory().unwrap();
        let field =
            SystemField::new("email", "Email", FieldDataType::String);
        store.insert_field(&field).await.unwrap();
        assert!(matches!(
            store.insert_field(&field).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_alias_rejected_per_scope() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .insert_field(&SystemField::new(
                "email",
                "Email",
                FieldDataType::String,
            ))
            .await
            .unwrap();
        store
            .insert_field(&SystemField::new(
                "phone",
                "Phone",
                FieldDataType::String,
            ))
            .await
            .unwrap();

        store
            .insert_alias(
                "email",
                &Alias::global("email_address", AliasConfidence::High),
            )
            .await
            .unwrap();

        // Same normalized form + scope collides regardless of target field.
        assert!(matches!(
            store
                .insert_alias(
                    "phone",
                    &Alias::global("Email-Address", AliasConfidence::Manual),
                )
                .await,
            Err(StoreError::Constraint(_))
        ));

        // Narrower scope does not collide at the storage layer.
        store
            .insert_alias(
                "phone",
                &Alias::source(
                    "email_address",
                    AliasConfidence::Manual,
                    "src-1",
                ),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_alias_requires_field() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert!(matches!(
            store
                .insert_alias(
                    "ghost",
                    &Alias::global("x", AliasConfidence::High),
                )
                .await,
            Err(StoreError::Data(_))
        ));
    }

    #[tokio::test]
    async fn test_rules_keep_display_order_on_replace() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .put_rule("src-1", &MappingRule::new("zip", "postal_code"))
            .await
            .unwrap();
        store
            .put_rule("src-1", &MappingRule::new("city", "city"))
            .await
            .unwrap();
        store
            .put_rule("src-1", &MappingRule::new("zip", "zip_code"))
            .await
            .unwrap();

        let rules = store.load_rules("src-1").await.unwrap();
        let keys: Vec<&str> =
            rules.iter().map(|r| r.source_field.as_str()).collect();
        assert_eq!(keys, vec!["zip", "city"]);
        assert_eq!(rules[0].target_field, "zip_code");

        assert!(store.load_rules("src-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_increments_and_respects_status() {
        let store = SqliteStateStore::in_memory().unwrap();
        let sighting = UnknownSighting::new(
            "src-1",
            "fax",
            json!("555-0100"),
            vec!["phone".into(), "mobile".into()],
        );

        let first = store.upsert_unknown(&sighting).await.unwrap();
        assert_eq!(first.detected_count, 1);
        assert_eq!(first.status, UnknownFieldStatus::Pending);
        assert_eq!(first.candidates, vec!["phone", "mobile"]);

        let second = store.upsert_unknown(&sighting).await.unwrap();
        assert_eq!(second.detected_count, 2);
        assert_eq!(second.first_seen, first.first_seen);

        store
            .transition_unknown(
                "src-1",
                "fax",
                &[UnknownFieldStatus::Pending],
                UnknownFieldStatus::Ignored,
            )
            .await
            .unwrap();
        let newer = UnknownSighting::new(
            "src-1",
            "fax",
            json!("555-0199"),
            vec![],
        );
        let third = store.upsert_unknown(&newer).await.unwrap();
        assert_eq!(third.detected_count, 3);
        assert_eq!(third.status, UnknownFieldStatus::Ignored);
        // Ignored rows keep their last pending-time sample and candidates.
        assert_eq!(third.sample_value, Some(json!("555-0100")));
        assert_eq!(third.candidates, vec!["phone", "mobile"]);

        store
            .transition_unknown(
                "src-1",
                "fax",
                &[UnknownFieldStatus::Ignored],
                UnknownFieldStatus::Mapped,
            )
            .await
            .unwrap();
        let fourth = store.upsert_unknown(&newer).await.unwrap();
        assert_eq!(fourth.detected_count, 3);
        assert_eq!(fourth.status, UnknownFieldStatus::Mapped);
    }

    #[tokio::test]
    async fn test_concurrent_first_sightings_collapse() {
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut handles = vec![];

        for i in 0u8..8 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                s.upsert_unknown(&UnknownSighting::new(
                    "src-1",
                    "brand_new",
                    json!(i),
                    vec![],
                ))
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let records = store.list_unknown("src-1", None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detected_count, 8);
    }

    #[tokio::test]
    async fn test_transition_guard_and_not_found() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert_eq!(
            store
                .transition_unknown(
                    "src-1",
                    "ghost",
                    &[UnknownFieldStatus::Pending],
                    UnknownFieldStatus::Ignored,
                )
                .await
                .unwrap(),
            Transition::NotFound
        );

        store
            .upsert_unknown(&UnknownSighting::new(
                "src-1",
                "fax",
                json!(null),
                vec![],
            ))
            .await
            .unwrap();
        store
            .transition_unknown(
                "src-1",
                "fax",
                &[UnknownFieldStatus::Pending],
                UnknownFieldStatus::Mapped,
            )
            .await
            .unwrap();

        let result = store
            .transition_unknown(
                "src-1",
                "fax",
                &[UnknownFieldStatus::Ignored],
                UnknownFieldStatus::Pending,
            )
            .await
            .unwrap();
        assert!(
            matches!(result, Transition::Rejected(r) if r.status == UnknownFieldStatus::Mapped)
        );
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = SqliteStateStore::new(&path).unwrap();
            store
                .insert_field(&SystemField::new(
                    "email",
                    "Email",
                    FieldDataType::String,
                ))
                .await
                .unwrap();
            for _ in 0..3 {
                store
                    .upsert_unknown(&UnknownSighting::new(
                        "src-1",
                        "fax",
                        json!("555-0100"),
                        vec![],
                    ))
                    .await
                    .unwrap();
            }
        }

        let store = SqliteStateStore::new(&path).unwrap();
        let fields = store.load_fields().await.unwrap();
        assert_eq!(fields.len(), 1);
        let record = store
            .get_unknown("src-1", "fax")
            .await
            .unwrap()
            .expect("record survives restart");
        assert_eq!(record.detected_count, 3);
    }
}
