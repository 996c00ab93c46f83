use std::sync::Arc;

use seedvault_core::{Clock, ServiceError};
use seedvault_sql::{SQLStore, Value};
use tracing::info;

/// Allocates human-readable accession numbers, unique per facility.
///
/// Implementations must tolerate concurrent allocation: two callers may
/// occasionally receive the same number, in which case the create path
/// retries against the store's uniqueness constraint (bounded at 10
/// attempts).
pub trait AccessionNumberAllocator: Send + Sync {
    fn next_number(&self, facility_id: &str) -> Result<String, ServiceError>;
}

const COUNTER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accession_number_counters (
    facility_id TEXT PRIMARY KEY,
    counter     INTEGER NOT NULL
);
";

/// Counter values encode the date and a per-day suffix in one integer so a
/// single row per facility drives both.
const SUFFIX_MULTIPLIER: i64 = 10_000_000_000;

/// SQL-backed allocator: one monotonic counter row per facility.
///
/// Numbers are of the form YYYYMMDDXXX, where XXX is a numeric suffix of
/// three or more digits starting at 000 for the first accession on a given
/// date. Past 999 the suffix simply widens by a digit. When the stored date
/// part is not today, the counter restarts at today's zero suffix.
pub struct SqlNumberAllocator {
    db: Arc<dyn SQLStore>,
    clock: Arc<dyn Clock>,
}

impl SqlNumberAllocator {
    pub fn new(db: Arc<dyn SQLStore>, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        db.exec_batch(COUNTER_SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("counter schema init: {e}")))?;
        Ok(Self { db, clock })
    }
}

impl AccessionNumberAllocator for SqlNumberAllocator {
    fn next_number(&self, facility_id: &str) -> Result<String, ServiceError> {
        let today: i64 = self
            .clock
            .today()
            .format("%Y%m%d")
            .to_string()
            .parse()
            .map_err(|e| ServiceError::Internal(format!("bad date encoding: {e}")))?;

        self.db
            .exec_batch("BEGIN IMMEDIATE;")
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let result = self.allocate(facility_id, today);

        match &result {
            Ok(_) => self
                .db
                .exec_batch("COMMIT;")
                .map_err(|e| ServiceError::Storage(e.to_string()))?,
            Err(_) => {
                let _ = self.db.exec_batch("ROLLBACK;");
            }
        }

        result
    }
}

impl SqlNumberAllocator {
    fn allocate(&self, facility_id: &str, today: i64) -> Result<String, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT counter FROM accession_number_counters WHERE facility_id = ?1",
                &[Value::Text(facility_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let prior = rows.first().and_then(|r| r.get_i64("counter"));

        let next = match prior {
            Some(value) if value / SUFFIX_MULTIPLIER == today => value + 1,
            _ => {
                if prior.is_some() {
                    info!(facility_id, "resetting accession number counter for a new date");
                }
                today * SUFFIX_MULTIPLIER
            }
        };

        self.db
            .exec(
                "INSERT INTO accession_number_counters (facility_id, counter) \
                 VALUES (?1, ?2) \
                 ON CONFLICT(facility_id) DO UPDATE SET counter = excluded.counter",
                &[
                    Value::Text(facility_id.to_string()),
                    Value::Integer(next),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let date_part = next / SUFFIX_MULTIPLIER;
        let suffix = next % SUFFIX_MULTIPLIER;
        Ok(format!("{date_part:08}{suffix:03}"))
    }
}
