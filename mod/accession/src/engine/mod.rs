//! The accession reconciliation pipeline.
//!
//! Every mutation funnels through [`run_update`]: quantities are validated,
//! the withdrawal and viability-test ledgers are reconciled (with the test
//! ledger owning its mirrored withdrawals), balances and aggregates are
//! recomputed, and the state machine decides the resulting lifecycle state.
//! Nothing here touches storage; persistence is the store's job, and a dry
//! run is simply this pipeline without the save.

pub mod history;
pub mod state;
pub mod viability;
pub mod withdrawals;

use rust_decimal::prelude::ToPrimitive;
use seedvault_core::{Clock, ServiceError};

use crate::model::{Accession, SeedQuantityUnits};

pub use state::StateChange;

/// The result of one pipeline run: the fully recalculated accession and the
/// state change to record, if any.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub accession: Accession,
    pub state_change: Option<StateChange>,
}

/// Run the full reconciliation pipeline for a desired accession against its
/// stored counterpart (`None` for creation).
///
/// The whole run is atomic from the caller's perspective: any validation
/// failure rejects the entire update and nothing may be persisted.
pub fn run_update(
    desired: &Accession,
    existing: Option<&Accession>,
    clock: &dyn Clock,
) -> Result<ReconcileOutcome, ServiceError> {
    let mut next = desired.clone();

    // Server-owned fields always carry over from the stored record.
    if let Some(existing) = existing {
        next.id = existing.id.clone();
        next.accession_number = existing.accession_number.clone();
        next.facility_id = existing.facility_id.clone();
        next.created_time = existing.created_time;
        next.source = existing.source;
        // Check-in time is write-once; the check-in operation sets it.
        if existing.checked_in_time.is_some() {
            next.checked_in_time = existing.checked_in_time;
        }
    }

    validate(&next, existing)?;

    let existing_withdrawals = existing.map(|e| e.withdrawals.as_slice()).unwrap_or(&[]);
    let existing_tests = existing.map(|e| e.viability_tests.as_slice()).unwrap_or(&[]);

    // Withdrawal ledger: the manual rows.
    let manual = withdrawals::reconcile_manual(existing_withdrawals, &next.withdrawals, clock)?;

    // Viability test ledger: tests plus their mirrored withdrawals.
    let viability = viability::reconcile(
        &next,
        existing_tests,
        existing_withdrawals,
        &next.viability_tests,
        clock,
    )?;
    next.viability_tests = viability.tests;

    // Combined ledger: recompute every balance snapshot and the new
    // remaining quantity.
    let mut ledger = manual;
    ledger.extend(viability.mirrors);
    let remaining = withdrawals::compute_balances(&next, &mut ledger)?;
    next.withdrawals = ledger;
    next.remaining = remaining;

    apply_aggregates(&mut next);

    let (new_state, state_change) =
        state::transition(existing.map(|e| e.state), &next)?;
    next.state = new_state;

    Ok(ReconcileOutcome {
        accession: next,
        state_change,
    })
}

fn validate(next: &Accession, existing: Option<&Accession>) -> Result<(), ServiceError> {
    if let Some(total) = &next.total {
        let method = next.processing_method.ok_or_else(|| {
            ServiceError::Validation(
                "cannot set the total accession size without selecting a processing method"
                    .into(),
            )
        })?;
        if !method.accepts(total) {
            return Err(ServiceError::Validation(match method {
                crate::model::ProcessingMethod::Count => {
                    "total accession size must be a seed count if the processing method is Count"
                        .into()
                }
                crate::model::ProcessingMethod::Weight => {
                    "total accession size must be a weight measurement if the processing method \
                     is Weight"
                        .into()
                }
            }));
        }
        if total.quantity <= rust_decimal::Decimal::ZERO {
            return Err(ServiceError::Validation(
                "total accession size must be greater than 0".into(),
            ));
        }
    }

    if let Some(subset_weight) = &next.subset_weight {
        if !subset_weight.units.is_weight() {
            return Err(ServiceError::Validation(
                "subset weight must be a weight measurement, not a seed count".into(),
            ));
        }
    }
    if next.subset_count == Some(0) {
        return Err(ServiceError::Validation(
            "subset count must be greater than 0".into(),
        ));
    }

    // The processing method is fixed once any withdrawal or test exists.
    if let Some(existing) = existing {
        let has_children =
            !existing.withdrawals.is_empty() || !existing.viability_tests.is_empty();
        if has_children && next.processing_method != existing.processing_method {
            return Err(ServiceError::Validation(
                "cannot change the processing method once withdrawals or viability tests exist"
                    .into(),
            ));
        }
    }

    if next.total.is_none() {
        if !next.viability_tests.is_empty() {
            return Err(ServiceError::Validation(
                "cannot create viability tests before setting the total accession size".into(),
            ));
        }
        if !next.withdrawals.is_empty() {
            return Err(ServiceError::Validation(
                "cannot withdraw from accession before setting its total size".into(),
            ));
        }
    }

    Ok(())
}

/// Recompute the derived estimate and viability fields after the ledgers
/// have settled.
fn apply_aggregates(next: &mut Accession) {
    let ratio = next.conversion_ratio();

    next.estimated_seed_count = next.remaining.as_ref().and_then(|remaining| {
        if remaining.units == SeedQuantityUnits::Seeds {
            remaining.quantity.trunc().to_i64()
        } else {
            ratio.as_ref()?.seed_count_of(remaining)?.to_i64()
        }
    });

    next.estimated_weight = next.remaining.as_ref().and_then(|remaining| {
        if remaining.units.is_weight() {
            Some(*remaining)
        } else {
            let units = next.subset_weight.as_ref()?.units;
            ratio.as_ref()?.weight_of(remaining, units)
        }
    });

    let withdrawn_total = match (&next.total, &next.remaining) {
        (Some(total), Some(remaining)) if !next.withdrawals.is_empty() => {
            total.checked_sub(remaining)
        }
        _ => None,
    };
    next.total_withdrawn_count = withdrawn_total.as_ref().and_then(|withdrawn| {
        if withdrawn.units == SeedQuantityUnits::Seeds {
            withdrawn.quantity.trunc().to_i64()
        } else {
            ratio.as_ref()?.seed_count_of(withdrawn)?.to_i64()
        }
    });
    next.total_withdrawn_weight = withdrawn_total.as_ref().and_then(|withdrawn| {
        if withdrawn.units.is_weight() {
            Some(*withdrawn)
        } else {
            let units = next.subset_weight.as_ref()?.units;
            ratio.as_ref()?.weight_of(withdrawn, units)
        }
    });

    let aggregates = viability::aggregates(&next.viability_tests);
    next.latest_viability_percent = aggregates.latest_viability_percent;
    next.latest_germination_recording_date = aggregates.latest_germination_recording_date;
    next.total_viability_percent = aggregates.total_viability_percent;
}
