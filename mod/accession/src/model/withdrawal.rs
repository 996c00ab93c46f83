use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::SeedQuantity;

/// Why seeds were removed from an accession.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalPurpose {
    Other,
    Nursery,
    Outplanting,
    ViabilityTesting,
}

impl WithdrawalPurpose {
    /// Lowercase display name used in history descriptions.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Other => "other",
            Self::Nursery => "nursery",
            Self::Outplanting => "outplanting",
            Self::ViabilityTesting => "viability testing",
        }
    }
}

/// Who owns a withdrawal row.
///
/// `TestMirror` rows are created and mutated exclusively by the viability
/// test ledger; the manual withdrawal update path rejects any edit to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalOrigin {
    Manual,
    TestMirror,
}

impl Default for WithdrawalOrigin {
    fn default() -> Self {
        Self::Manual
    }
}

/// A recorded removal of seed stock from an accession.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    /// Absent on rows the caller wants inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub date: NaiveDate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<WithdrawalPurpose>,

    #[serde(default)]
    pub origin: WithdrawalOrigin,

    /// Withdrawn quantity. For mirrored rows of weight-based viability tests
    /// this is derived from the test's observed remaining quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn: Option<SeedQuantity>,

    /// Snapshot of the accession's remaining quantity as of this withdrawal,
    /// in the total's units. Recomputed by the ledger on every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<SeedQuantity>,

    /// Seed-count estimate of the withdrawn quantity, when derivable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_count: Option<i64>,

    /// Set only when purpose is `ViabilityTesting`; exactly one withdrawal
    /// references a given test, and the reference never changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viability_test_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Set when the row is first inserted; drives same-date ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// A new manual withdrawal of a quantity on a date.
    pub fn new(date: NaiveDate, withdrawn: SeedQuantity) -> Self {
        Self {
            id: None,
            date,
            purpose: None,
            origin: WithdrawalOrigin::Manual,
            withdrawn: Some(withdrawn),
            remaining: None,
            estimated_count: None,
            viability_test_id: None,
            staff_responsible: None,
            notes: None,
            created_time: None,
        }
    }

    pub fn with_purpose(mut self, purpose: WithdrawalPurpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn is_test_mirror(&self) -> bool {
        self.origin == WithdrawalOrigin::TestMirror
    }

    /// Fields a caller is allowed to differ on without the ledger treating
    /// the row as edited. Mirror rows compare on everything the test drives.
    pub fn mirror_fields_equal(&self, other: &Withdrawal) -> bool {
        self.date == other.date
            && self.withdrawn == other.withdrawn
            && self.viability_test_id == other.viability_test_id
            && self.purpose == other.purpose
    }
}
