//! Seed bank accession tracking: lifecycle state machine, withdrawal and
//! viability-test ledgers, and the quantity reconciliation that keeps an
//! accession's remaining stock consistent across seed counts and weights.

pub mod engine;
pub mod facility;
pub mod model;
pub mod number;
pub mod service;
pub mod store;

pub use facility::{FacilityDirectory, InMemoryFacilityDirectory};
pub use number::{AccessionNumberAllocator, SqlNumberAllocator};
pub use service::{AccessionService, SummaryScope};
pub use store::AccessionStore;
