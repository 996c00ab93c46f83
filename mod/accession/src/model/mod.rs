pub mod accession;
pub mod history;
pub mod quantity;
pub mod viability;
pub mod withdrawal;

pub use accession::{
    Accession, AccessionSource, AccessionState, Geolocation, ProcessingMethod, SummaryStatistics,
};
pub use history::{HistoryEntry, HistoryEntryType, StateHistoryRow};
pub use quantity::{ConversionRatio, SeedQuantity, SeedQuantityUnits};
pub use viability::{ViabilityTest, ViabilityTestResult, ViabilityTestType};
pub use withdrawal::{Withdrawal, WithdrawalOrigin, WithdrawalPurpose};
