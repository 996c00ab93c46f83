use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use seedvault_core::{ListParams, ListResult, ServiceError};
use seedvault_sql::{Row, SQLStore, Value};
use tracing::debug;

use crate::engine::StateChange;
use crate::model::{Accession, AccessionState, StateHistoryRow, SummaryStatistics};

/// SQL schema for accessions and their state-change log.
///
/// The aggregate (accession plus child withdrawals and viability tests) is
/// persisted as one JSON document; the extra columns exist for filtering and
/// reporting. The accession number is unique per facility, not globally.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accessions (
    id                TEXT PRIMARY KEY,
    data              TEXT NOT NULL,
    facility_id       TEXT NOT NULL,
    number            TEXT NOT NULL,
    state             TEXT NOT NULL,
    species_id        TEXT,
    processing_method TEXT,
    est_seed_count    INTEGER,
    unknown_quantity  INTEGER NOT NULL DEFAULT 0,
    create_at         TEXT NOT NULL,
    UNIQUE(facility_id, number)
);
CREATE INDEX IF NOT EXISTS idx_accession_facility ON accessions(facility_id);
CREATE INDEX IF NOT EXISTS idx_accession_state ON accessions(state);
CREATE INDEX IF NOT EXISTS idx_accession_create_at ON accessions(create_at);

CREATE TABLE IF NOT EXISTS accession_state_history (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    accession_id TEXT NOT NULL,
    old_state    TEXT,
    new_state    TEXT NOT NULL,
    reason       TEXT NOT NULL,
    create_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_state_history_accession
    ON accession_state_history(accession_id);
";

/// Persistent storage for accessions, backed by SQLStore (SQLite).
pub struct AccessionStore {
    db: Arc<dyn SQLStore>,
}

impl AccessionStore {
    /// Create a new AccessionStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("accession schema init: {e}")))?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Arc<dyn SQLStore> {
        &self.db
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert a new accession and its creation history row atomically.
    ///
    /// A uniqueness collision on (facility, number) surfaces as `Conflict`
    /// so the create path can retry with a fresh number.
    pub fn insert(
        &self,
        accession: &Accession,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.in_transaction(|| {
            let data = serde_json::to_string(accession)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;

            self.db
                .exec(
                    "INSERT INTO accessions \
                     (id, data, facility_id, number, state, species_id, processing_method, \
                      est_seed_count, unknown_quantity, create_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    &index_params(accession, data),
                )
                .map_err(|e| {
                    if e.is_unique_violation() {
                        ServiceError::Conflict(format!(
                            "accession number {} already exists in facility {}",
                            accession.accession_number, accession.facility_id
                        ))
                    } else {
                        ServiceError::Storage(e.to_string())
                    }
                })?;

            self.insert_state_history(&accession.id, None, accession.state, reason, now)
        })
    }

    /// Write back an updated accession, recording the state change (if any)
    /// in the same transaction.
    pub fn save(
        &self,
        accession: &Accession,
        state_change: Option<&StateChange>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.in_transaction(|| {
            let data = serde_json::to_string(accession)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;

            let mut params = index_params(accession, data);
            // Rotate the id to the WHERE position.
            let id = params.remove(0);
            params.push(id);

            let affected = self
                .db
                .exec(
                    "UPDATE accessions SET \
                     data = ?1, facility_id = ?2, number = ?3, state = ?4, species_id = ?5, \
                     processing_method = ?6, est_seed_count = ?7, unknown_quantity = ?8, \
                     create_at = ?9 \
                     WHERE id = ?10",
                    &params,
                )
                .map_err(|e| ServiceError::Storage(e.to_string()))?;

            if affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "accession {}",
                    accession.id
                )));
            }

            if let Some(change) = state_change {
                self.insert_state_history(
                    &accession.id,
                    change.old_state,
                    change.new_state,
                    change.reason,
                    now,
                )?;
            }

            Ok(())
        })
    }

    /// Get an accession (with its children) by ID.
    pub fn fetch_one_by_id(&self, id: &str) -> Result<Accession, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM accessions WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("accession {id}")))?;

        row_to_accession(row)
    }

    /// Delete an accession and everything recorded about it.
    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.in_transaction(|| {
            let affected = self
                .db
                .exec(
                    "DELETE FROM accessions WHERE id = ?1",
                    &[Value::Text(id.to_string())],
                )
                .map_err(|e| ServiceError::Storage(e.to_string()))?;

            if affected == 0 {
                return Err(ServiceError::NotFound(format!("accession {id}")));
            }

            self.db
                .exec(
                    "DELETE FROM accession_state_history WHERE accession_id = ?1",
                    &[Value::Text(id.to_string())],
                )
                .map_err(|e| ServiceError::Storage(e.to_string()))?;

            debug!(accession = id, "deleted accession and its history");
            Ok(())
        })
    }

    /// List a facility's accessions, newest first.
    pub fn list_by_facility(
        &self,
        facility_id: &str,
        params: &ListParams,
    ) -> Result<ListResult<Accession>, ServiceError> {
        let count_rows = self
            .db
            .query(
                "SELECT COUNT(*) as cnt FROM accessions WHERE facility_id = ?1",
                &[Value::Text(facility_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let rows = self
            .db
            .query(
                "SELECT data FROM accessions WHERE facility_id = ?1 \
                 ORDER BY create_at DESC LIMIT ?2 OFFSET ?3",
                &[
                    Value::Text(facility_id.to_string()),
                    Value::Integer(params.limit as i64),
                    Value::Integer(params.offset as i64),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows
            .iter()
            .map(row_to_accession)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    // -----------------------------------------------------------------------
    // State history
    // -----------------------------------------------------------------------

    fn insert_state_history(
        &self,
        accession_id: &str,
        old_state: Option<AccessionState>,
        new_state: AccessionState,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.db
            .exec(
                "INSERT INTO accession_state_history \
                 (accession_id, old_state, new_state, reason, create_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                &[
                    Value::Text(accession_id.to_string()),
                    Value::opt_text(old_state.map(|s| s.as_str())),
                    Value::Text(new_state.as_str().to_string()),
                    Value::Text(reason.to_string()),
                    Value::Text(now.to_rfc3339()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All state-change records for an accession, oldest first.
    pub fn state_history(
        &self,
        accession_id: &str,
    ) -> Result<Vec<StateHistoryRow>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT seq, accession_id, old_state, new_state, reason, create_at \
                 FROM accession_state_history WHERE accession_id = ?1 ORDER BY seq",
                &[Value::Text(accession_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_state_history).collect()
    }

    // -----------------------------------------------------------------------
    // Reporting aggregates
    // -----------------------------------------------------------------------

    /// Number of accessions in a non-terminal state across facilities.
    pub fn count_active(&self, facility_ids: &[String]) -> Result<i64, ServiceError> {
        if facility_ids.is_empty() {
            return Ok(0);
        }
        let (facility_sql, mut params) = in_clause("facility_id", facility_ids, 1);
        let (state_sql, state_params) =
            in_clause("state", &active_state_names(), params.len() + 1);
        params.extend(state_params);

        let rows = self
            .db
            .query(
                &format!(
                    "SELECT COUNT(*) as cnt FROM accessions WHERE {facility_sql} AND {state_sql}"
                ),
                &params,
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0))
    }

    /// Per-state accession counts across facilities. Every non-terminal
    /// state appears in the result, zero or not.
    pub fn count_by_state(
        &self,
        facility_ids: &[String],
    ) -> Result<BTreeMap<AccessionState, i64>, ServiceError> {
        let mut counts: BTreeMap<AccessionState, i64> = AccessionState::all()
            .iter()
            .filter(|s| s.is_active())
            .map(|s| (*s, 0))
            .collect();

        if facility_ids.is_empty() {
            return Ok(counts);
        }

        let (facility_sql, params) = in_clause("facility_id", facility_ids, 1);
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT state, COUNT(*) as cnt FROM accessions \
                     WHERE {facility_sql} GROUP BY state"
                ),
                &params,
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        for row in rows {
            let state = row
                .get_str("state")
                .and_then(AccessionState::from_str)
                .ok_or_else(|| ServiceError::Storage("bad state column".into()))?;
            if let Some(entry) = counts.get_mut(&state) {
                *entry = row.get_i64("cnt").unwrap_or(0);
            }
        }

        Ok(counts)
    }

    /// Reporting statistics over active accessions in the given facilities.
    pub fn summary_statistics(
        &self,
        facility_ids: &[String],
    ) -> Result<SummaryStatistics, ServiceError> {
        if facility_ids.is_empty() {
            return Ok(SummaryStatistics::default());
        }

        let (facility_sql, mut params) = in_clause("facility_id", facility_ids, 1);
        let (state_sql, state_params) =
            in_clause("state", &active_state_names(), params.len() + 1);
        params.extend(state_params);

        let rows = self
            .db
            .query(
                &format!(
                    "SELECT \
                       COUNT(*) as active, \
                       COUNT(DISTINCT species_id) as species, \
                       COALESCE(SUM(CASE WHEN processing_method = 'Count' \
                           THEN est_seed_count END), 0) as by_count, \
                       COALESCE(SUM(CASE WHEN processing_method = 'Weight' \
                           AND unknown_quantity = 0 \
                           THEN est_seed_count END), 0) as by_weight, \
                       COALESCE(SUM(unknown_quantity), 0) as unknown_qty \
                     FROM accessions WHERE {facility_sql} AND {state_sql}"
                ),
                &params,
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::Storage("empty summary result".into()))?;

        let by_count = row.get_i64("by_count").unwrap_or(0);
        let by_weight = row.get_i64("by_weight").unwrap_or(0);

        Ok(SummaryStatistics {
            active_accessions: row.get_i64("active").unwrap_or(0),
            species: row.get_i64("species").unwrap_or(0),
            subtotal_by_seed_count: by_count,
            subtotal_by_weight_estimate: by_weight,
            seeds_remaining: by_count + by_weight,
            unknown_quantity_accessions: row.get_i64("unknown_qty").unwrap_or(0),
        })
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    fn in_transaction<T>(
        &self,
        body: impl FnOnce() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        self.db
            .exec_batch("BEGIN IMMEDIATE;")
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        match body() {
            Ok(value) => {
                self.db
                    .exec_batch("COMMIT;")
                    .map_err(|e| ServiceError::Storage(e.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.db.exec_batch("ROLLBACK;");
                Err(err)
            }
        }
    }
}

/// Values for the accession row's indexed columns, id first, data second.
fn index_params(accession: &Accession, data: String) -> Vec<Value> {
    let unknown_quantity = matches!(
        accession.processing_method,
        Some(crate::model::ProcessingMethod::Weight)
    ) && accession.conversion_ratio().is_none();

    vec![
        Value::Text(accession.id.clone()),
        Value::Text(data),
        Value::Text(accession.facility_id.clone()),
        Value::Text(accession.accession_number.clone()),
        Value::Text(accession.state.as_str().to_string()),
        Value::opt_text(accession.species_id.as_deref()),
        Value::opt_text(accession.processing_method.map(|m| match m {
            crate::model::ProcessingMethod::Count => "Count",
            crate::model::ProcessingMethod::Weight => "Weight",
        })),
        Value::opt_integer(accession.estimated_seed_count),
        Value::Integer(unknown_quantity as i64),
        Value::Text(
            accession
                .created_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
    ]
}

fn row_to_accession(row: &Row) -> Result<Accession, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json)
        .map_err(|e| ServiceError::Storage(format!("bad accession json: {e}")))
}

fn row_to_state_history(row: &Row) -> Result<StateHistoryRow, ServiceError> {
    let new_state = row
        .get_str("new_state")
        .and_then(AccessionState::from_str)
        .ok_or_else(|| ServiceError::Storage("bad new_state column".into()))?;
    let old_state = match row.get_str("old_state") {
        Some(s) => Some(
            AccessionState::from_str(s)
                .ok_or_else(|| ServiceError::Storage("bad old_state column".into()))?,
        ),
        None => None,
    };
    let created_time = row
        .get_str("create_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| ServiceError::Storage("bad create_at column".into()))?;

    Ok(StateHistoryRow {
        seq: row.get_i64("seq").unwrap_or(0),
        accession_id: row.get_str("accession_id").unwrap_or_default().to_string(),
        old_state,
        new_state,
        reason: row.get_str("reason").unwrap_or_default().to_string(),
        created_time,
    })
}

/// Build `col IN (?n, ?n+1, ...)` with its parameter values.
fn in_clause(column: &str, values: &[String], first_index: usize) -> (String, Vec<Value>) {
    let placeholders: Vec<String> = (0..values.len())
        .map(|i| format!("?{}", first_index + i))
        .collect();
    let sql = format!("{column} IN ({})", placeholders.join(", "));
    let params = values.iter().map(|v| Value::Text(v.clone())).collect();
    (sql, params)
}

fn active_state_names() -> Vec<String> {
    AccessionState::all()
        .iter()
        .filter(|s| s.is_active())
        .map(|s| s.as_str().to_string())
        .collect()
}
