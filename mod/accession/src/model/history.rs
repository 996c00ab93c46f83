use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::accession::AccessionState;

/// Kind of history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistoryEntryType {
    Created,
    StateChanged,
    Withdrawal,
    ViabilityTesting,
}

/// One derived, human-readable event in an accession's history.
///
/// History entries are a projection over the accession's state-change log
/// and its withdrawals — they are never stored independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the underlying row was recorded.
    pub created_time: DateTime<Utc>,
    /// The business date of the event (may be backdated).
    pub date: NaiveDate,
    pub entry_type: HistoryEntryType,
    pub description: String,
    /// Name of the person responsible, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One persisted state-change record. The row with no old state is the
/// creation record.
#[derive(Debug, Clone, PartialEq)]
pub struct StateHistoryRow {
    pub seq: i64,
    pub accession_id: String,
    pub old_state: Option<AccessionState>,
    pub new_state: AccessionState,
    pub reason: String,
    pub created_time: DateTime<Utc>,
}
