use seedvault_core::ServiceError;
use tracing::info;

use crate::model::{Accession, AccessionState};

/// A state transition produced by one pipeline run. At most one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub old_state: Option<AccessionState>,
    pub new_state: AccessionState,
    pub reason: &'static str,
}

/// One automatic-derivation rule: the first rule whose predicate holds
/// decides the state.
struct StateRule {
    target: AccessionState,
    reason: &'static str,
    predicate: fn(&Accession) -> bool,
}

/// The automatic ladder, highest-precedence first. Each date-driven rule is
/// gated on the prior date-bearing field being present, so an isolated later
/// date never skips the accession ahead.
const RULES: &[StateRule] = &[
    StateRule {
        target: AccessionState::InStorage,
        reason: "Storage start date has been entered",
        predicate: |a| {
            a.storage_start_date.is_some()
                && a.drying_end_date.is_some()
                && a.drying_start_date.is_some()
                && a.processing_start_date.is_some()
        },
    },
    StateRule {
        target: AccessionState::Dried,
        reason: "Drying end date has been entered",
        predicate: |a| {
            a.drying_end_date.is_some()
                && a.drying_start_date.is_some()
                && a.processing_start_date.is_some()
        },
    },
    StateRule {
        target: AccessionState::Drying,
        reason: "Drying start date has been entered",
        predicate: |a| a.drying_start_date.is_some() && a.processing_start_date.is_some(),
    },
    StateRule {
        target: AccessionState::Processed,
        reason: "Processing start date has been entered",
        predicate: |a| a.processing_start_date.is_some() && a.total.is_some(),
    },
    StateRule {
        target: AccessionState::Processing,
        reason: "Seed count/weight has been entered",
        predicate: |a| a.total.is_some(),
    },
    StateRule {
        target: AccessionState::Pending,
        reason: "Accession has been checked in",
        predicate: |a| a.is_checked_in(),
    },
    StateRule {
        target: AccessionState::AwaitingCheckIn,
        reason: "No state conditions have been met",
        predicate: |_| true,
    },
];

const REASON_EXHAUSTED: &str = "All seeds marked as withdrawn";
const REASON_MANUAL: &str = "State set manually";
const REASON_HELD: &str = "Automatic state never moves backward";

/// Decide the next state for an accession whose quantities have already been
/// reconciled.
///
/// Priority order: manual override (with its two rejection rules), then the
/// automatic ladder; a remaining quantity of exactly zero with a known total
/// forces `UsedUp` over either result.
pub fn next_state(
    prior_state: Option<AccessionState>,
    next: &Accession,
) -> Result<(AccessionState, &'static str), ServiceError> {
    let exhausted = next.is_exhausted();

    if next.is_manual_state {
        let requested = next.state;

        if requested == AccessionState::AwaitingCheckIn
            && prior_state.map_or(false, |p| p != AccessionState::AwaitingCheckIn)
        {
            return Err(ServiceError::Validation(
                "cannot change state back to Awaiting Check-In".into(),
            ));
        }
        if requested.is_terminal() && !exhausted {
            return Err(ServiceError::Validation(format!(
                "cannot change state to {} while seeds remain",
                requested.display_name()
            )));
        }

        if exhausted {
            // The zero-remaining override wins over any other manual
            // request; an explicit Withdrawn request is the legacy
            // withdrawal-to-zero path and is honored as-is.
            let forced = if requested == AccessionState::Withdrawn {
                AccessionState::Withdrawn
            } else {
                AccessionState::UsedUp
            };
            return Ok((forced, REASON_EXHAUSTED));
        }

        return Ok((requested, REASON_MANUAL));
    }

    if exhausted {
        return Ok((AccessionState::UsedUp, REASON_EXHAUSTED));
    }

    let (derived, reason) = RULES
        .iter()
        .find(|rule| (rule.predicate)(next))
        .map(|rule| (rule.target, rule.reason))
        .unwrap_or((AccessionState::AwaitingCheckIn, REASON_EXHAUSTED));

    // Automatic mode never regresses: date-field edits can only move an
    // accession forward. Terminal states recover through the ladder once
    // stock returns.
    if let Some(prior) = prior_state {
        if let (Some(prior_rank), Some(derived_rank)) =
            (prior.ladder_rank(), derived.ladder_rank())
        {
            if derived_rank < prior_rank {
                return Ok((prior, REASON_HELD));
            }
        }
    }

    Ok((derived, reason))
}

/// Run the state machine and report a change only when the resulting state
/// differs from the prior persisted one.
pub fn transition(
    prior_state: Option<AccessionState>,
    next: &Accession,
) -> Result<(AccessionState, Option<StateChange>), ServiceError> {
    let (new_state, reason) = next_state(prior_state, next)?;

    if prior_state == Some(new_state) {
        return Ok((new_state, None));
    }

    info!(
        accession = %next.id,
        old = ?prior_state,
        new = %new_state,
        reason,
        "accession state transition"
    );

    Ok((
        new_state,
        Some(StateChange {
            old_state: prior_state,
            new_state,
            reason,
        }),
    ))
}
