use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::SeedQuantity;

/// Kind of viability test procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViabilityTestType {
    Lab,
    Nursery,
    Cut,
}

/// A dated germination observation within a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViabilityTestResult {
    pub recording_date: NaiveDate,
    pub seeds_germinated: u32,
}

/// A germination or cut test that consumes some of an accession's seed stock
/// and records results over time. Each stock-consuming test is mirrored by
/// exactly one withdrawal with purpose `ViabilityTesting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViabilityTest {
    /// Absent on tests the caller wants inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub test_type: ViabilityTestType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// Seeds sown (Lab/Nursery) or seeds cut open (Cut). Authoritative for
    /// the mirrored withdrawal's quantity on count-based accessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds_tested: Option<u32>,

    // Cut test outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds_filled: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds_empty: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds_compromised: Option<u32>,

    /// Caller-observed remaining quantity after sampling. Authoritative for
    /// the mirrored withdrawal's quantity on weight-based accessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<SeedQuantity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ViabilityTestResult>,

    /// Derived: sum of `seeds_germinated` across results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_seeds_germinated: Option<u32>,
    /// Derived viability percentage; see the ledger for the formula.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viability_percent: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
}

impl ViabilityTest {
    pub fn new(test_type: ViabilityTestType) -> Self {
        Self {
            id: None,
            test_type,
            start_date: None,
            end_date: None,
            seeds_tested: None,
            seeds_filled: None,
            seeds_empty: None,
            seeds_compromised: None,
            remaining: None,
            results: Vec::new(),
            total_seeds_germinated: None,
            viability_percent: None,
            staff_responsible: None,
            notes: None,
            created_time: None,
        }
    }

    /// The most recent result recording date, if any results are present.
    pub fn latest_recording_date(&self) -> Option<NaiveDate> {
        self.results.iter().map(|r| r.recording_date).max()
    }

    /// Whether this test has any recorded outcome: germination results, or
    /// the cut-test counts.
    pub fn has_results(&self) -> bool {
        match self.test_type {
            ViabilityTestType::Cut => {
                self.seeds_filled.is_some()
                    && self.seeds_empty.is_some()
                    && self.seeds_compromised.is_some()
            }
            _ => !self.results.is_empty(),
        }
    }
}
