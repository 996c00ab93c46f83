use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::quantity::{ConversionRatio, SeedQuantity};
use super::viability::ViabilityTest;
use super::withdrawal::Withdrawal;

// ---------------------------------------------------------------------------
// AccessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of an accession.
///
/// ```text
/// AwaitingCheckIn → Pending → Processing → Processed → Drying → Dried → InStorage
/// ```
///
/// `UsedUp` is absorbing: it is forced from any state once the remaining
/// quantity reaches exactly zero with a known total. `Withdrawn` is a legacy
/// terminal state kept for pre-`UsedUp` data; the only way in is an explicit
/// request while remaining is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessionState {
    AwaitingCheckIn,
    Pending,
    Processing,
    Processed,
    Drying,
    Dried,
    InStorage,
    UsedUp,
    Withdrawn,
}

impl AccessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingCheckIn => "AwaitingCheckIn",
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Processed => "Processed",
            Self::Drying => "Drying",
            Self::Dried => "Dried",
            Self::InStorage => "InStorage",
            Self::UsedUp => "UsedUp",
            Self::Withdrawn => "Withdrawn",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "AwaitingCheckIn" => Some(Self::AwaitingCheckIn),
            "Pending" => Some(Self::Pending),
            "Processing" => Some(Self::Processing),
            "Processed" => Some(Self::Processed),
            "Drying" => Some(Self::Drying),
            "Dried" => Some(Self::Dried),
            "InStorage" => Some(Self::InStorage),
            "UsedUp" => Some(Self::UsedUp),
            "Withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    /// Human-readable name used in history descriptions.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AwaitingCheckIn => "Awaiting Check-In",
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Processed => "Processed",
            Self::Drying => "Drying",
            Self::Dried => "Dried",
            Self::InStorage => "In Storage",
            Self::UsedUp => "Used Up",
            Self::Withdrawn => "Withdrawn",
        }
    }

    /// Whether the accession still holds seed stock being tracked.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Terminal states: all stock gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UsedUp | Self::Withdrawn)
    }

    /// All states an accession can currently be in, lifecycle order.
    pub fn all() -> &'static [AccessionState] {
        &[
            Self::AwaitingCheckIn,
            Self::Pending,
            Self::Processing,
            Self::Processed,
            Self::Drying,
            Self::Dried,
            Self::InStorage,
            Self::UsedUp,
            Self::Withdrawn,
        ]
    }

    /// Position in the automatic-derivation ladder. Terminal states sit
    /// outside the ladder and have no rank.
    pub fn ladder_rank(&self) -> Option<u8> {
        match self {
            Self::AwaitingCheckIn => Some(0),
            Self::Pending => Some(1),
            Self::Processing => Some(2),
            Self::Processed => Some(3),
            Self::Drying => Some(4),
            Self::Dried => Some(5),
            Self::InStorage => Some(6),
            Self::UsedUp | Self::Withdrawn => None,
        }
    }
}

impl std::fmt::Display for AccessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProcessingMethod / AccessionSource / Geolocation
// ---------------------------------------------------------------------------

/// Whether an accession's quantities are tracked as discrete seed counts or
/// as weight. Fixed once any withdrawal or viability test exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMethod {
    Count,
    Weight,
}

impl ProcessingMethod {
    /// Whether a quantity's units belong to this method's unit family.
    pub fn accepts(&self, quantity: &SeedQuantity) -> bool {
        match self {
            ProcessingMethod::Count => !quantity.units.is_weight(),
            ProcessingMethod::Weight => quantity.units.is_weight(),
        }
    }
}

/// Where an accession record originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessionSource {
    Web,
    SeedCollectorApp,
    CsvImport,
}

impl Default for AccessionSource {
    fn default() -> Self {
        Self::Web
    }
}

/// A collection-site coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geolocation {
    pub latitude: Decimal,
    pub longitude: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Accession — the aggregate root
// ---------------------------------------------------------------------------

/// A single collected lot of seeds, tracked as one record through its
/// lifecycle together with its withdrawals and viability tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accession {
    /// Opaque unique identifier, assigned at creation.
    #[serde(default)]
    pub id: String,

    /// Human-readable number, unique per facility (not globally).
    #[serde(default)]
    pub accession_number: String,

    pub facility_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species_name: Option<String>,

    // --- quantities ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_method: Option<ProcessingMethod>,
    /// Total/initial quantity. Withdrawals and viability tests require this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<SeedQuantity>,
    /// Remaining quantity, derived by the reconciliation pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<SeedQuantity>,
    /// Number of seeds in the weighed subset, used only for conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset_count: Option<u32>,
    /// Weight of the subset; must be a weight measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset_weight: Option<SeedQuantity>,
    /// Estimated remaining seed count (derived; absent when unknown).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seed_count: Option<i64>,
    /// Estimated remaining weight (derived; absent when unknown).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_weight: Option<SeedQuantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_withdrawn_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_withdrawn_weight: Option<SeedQuantity>,

    // --- dates ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drying_start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drying_move_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drying_end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_start_date: Option<NaiveDate>,

    // --- state ---
    #[serde(default = "default_state")]
    pub state: AccessionState,
    /// When true, the caller's requested state overrides automatic
    /// derivation (subject to the override-by-exhaustion rules).
    #[serde(default)]
    pub is_manual_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_in_time: Option<DateTime<Utc>>,

    // --- collection details ---
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub bag_numbers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geolocations: Vec<Geolocation>,
    /// Collector names, primary first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_site_landowner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    // --- viability aggregates (derived) ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_viability_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_viability_percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_germination_recording_date: Option<NaiveDate>,

    #[serde(default)]
    pub source: AccessionSource,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,

    // --- children ---
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub withdrawals: Vec<Withdrawal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub viability_tests: Vec<ViabilityTest>,
}

fn default_state() -> AccessionState {
    AccessionState::AwaitingCheckIn
}

impl Accession {
    /// A new draft accession for a facility, in the initial state. The id
    /// and accession number are assigned by the create pipeline.
    pub fn new(facility_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            accession_number: String::new(),
            facility_id: facility_id.into(),
            species_id: None,
            species_name: None,
            processing_method: None,
            total: None,
            remaining: None,
            subset_count: None,
            subset_weight: None,
            estimated_seed_count: None,
            estimated_weight: None,
            total_withdrawn_count: None,
            total_withdrawn_weight: None,
            collected_date: None,
            received_date: None,
            processing_start_date: None,
            drying_start_date: None,
            drying_move_date: None,
            drying_end_date: None,
            storage_start_date: None,
            state: AccessionState::AwaitingCheckIn,
            is_manual_state: false,
            checked_in_time: None,
            bag_numbers: BTreeSet::new(),
            geolocations: Vec::new(),
            collectors: Vec::new(),
            collection_site_name: None,
            collection_site_landowner: None,
            notes: None,
            latest_viability_percent: None,
            total_viability_percent: None,
            latest_germination_recording_date: None,
            source: AccessionSource::Web,
            created_time: None,
            withdrawals: Vec::new(),
            viability_tests: Vec::new(),
        }
    }

    pub fn is_checked_in(&self) -> bool {
        self.checked_in_time.is_some()
    }

    /// The subset-derived conversion ratio, when both subset values are set.
    pub fn conversion_ratio(&self) -> Option<ConversionRatio> {
        ConversionRatio::from_subset(self.subset_count, self.subset_weight.as_ref())
    }

    /// Whether remaining is exactly zero with a known total — the condition
    /// that forces the `UsedUp` state.
    pub fn is_exhausted(&self) -> bool {
        self.total.is_some() && self.remaining.map(|r| r.is_zero()).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// SummaryStatistics
// ---------------------------------------------------------------------------

/// Facility- or organization-scoped reporting aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    /// Accessions in a non-terminal state.
    pub active_accessions: i64,
    /// Distinct species across the scoped accessions.
    pub species: i64,
    /// Seeds remaining in active count-based accessions.
    pub subtotal_by_seed_count: i64,
    /// Estimated seeds remaining in active weight-based accessions with
    /// subset data.
    pub subtotal_by_weight_estimate: i64,
    /// Sum of the two subtotals.
    pub seeds_remaining: i64,
    /// Active weight-based accessions with no subset data; their seed counts
    /// cannot be estimated and are excluded from the subtotals.
    pub unknown_quantity_accessions: i64,
}
