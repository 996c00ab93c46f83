use std::collections::HashMap;

use seedvault_core::{new_id, Clock, ServiceError};
use tracing::debug;

use crate::model::{
    Accession, ConversionRatio, SeedQuantity, SeedQuantityUnits, Withdrawal, WithdrawalPurpose,
};

/// Reconcile the caller-editable (manual) withdrawal rows against the
/// existing ledger.
///
/// Rows are matched by id: unmatched desired rows are inserts, unmatched
/// existing rows are deletes, matched rows are updates. Mirrored
/// viability-testing rows are owned by the viability ledger; a caller may
/// pass them back untouched, but any attempt to edit, retarget, or invent
/// one is a fatal validation error.
///
/// Returns the reconciled manual rows. Balance snapshots are recomputed
/// later, over the combined manual + mirrored ledger.
pub fn reconcile_manual(
    existing: &[Withdrawal],
    desired: &[Withdrawal],
    clock: &dyn Clock,
) -> Result<Vec<Withdrawal>, ServiceError> {
    let existing_manual: HashMap<&str, &Withdrawal> = existing
        .iter()
        .filter(|w| !w.is_test_mirror())
        .filter_map(|w| w.id.as_deref().map(|id| (id, w)))
        .collect();
    let existing_mirrors: HashMap<&str, &Withdrawal> = existing
        .iter()
        .filter(|w| w.is_test_mirror())
        .filter_map(|w| w.id.as_deref().map(|id| (id, w)))
        .collect();

    let mut manual = Vec::new();

    for row in desired {
        let claims_test = row.is_test_mirror()
            || row.viability_test_id.is_some()
            || row.purpose == Some(WithdrawalPurpose::ViabilityTesting);

        if claims_test {
            // Pass-through of an existing mirror is fine; anything else is a
            // caller trying to drive a test-linked withdrawal directly.
            let mirror = row
                .id
                .as_deref()
                .and_then(|id| existing_mirrors.get(id))
                .ok_or_else(|| {
                    ServiceError::Validation(
                        "viability testing withdrawals are managed through their viability test"
                            .into(),
                    )
                })?;
            if !mirror.mirror_fields_equal(row) {
                return Err(ServiceError::Validation(
                    "cannot edit a viability testing withdrawal; modify the test instead".into(),
                ));
            }
            // Not collected here: the viability ledger regenerates mirrors
            // from the tests themselves.
            continue;
        }

        if let Some(withdrawn) = &row.withdrawn {
            if withdrawn.is_negative() {
                return Err(ServiceError::Validation(
                    "withdrawn quantity cannot be negative".into(),
                ));
            }
        }

        match row.id.as_deref() {
            None => {
                let mut inserted = row.clone();
                inserted.id = Some(new_id());
                inserted.created_time = Some(clock.now());
                inserted.remaining = None;
                manual.push(inserted);
            }
            Some(id) => {
                let prior = existing_manual.get(id).ok_or_else(|| {
                    ServiceError::Validation(format!(
                        "cannot update withdrawal with nonexistent ID {id}"
                    ))
                })?;
                let mut updated = row.clone();
                updated.created_time = prior.created_time;
                updated.remaining = None;
                manual.push(updated);
            }
        }
    }

    let deleted: Vec<&str> = existing_manual
        .keys()
        .filter(|id| !manual.iter().any(|w| w.id.as_deref() == Some(**id)))
        .copied()
        .collect();
    if !deleted.is_empty() {
        debug!(ids = ?deleted, "deleting withdrawals");
    }

    Ok(manual)
}

/// Order the combined ledger and recompute every row's remaining snapshot
/// plus the accession's new remaining quantity.
///
/// Rows apply oldest-date-first, same-date ties by insertion time. Each
/// row's snapshot is `total - running sum` in the total's units; the running
/// balance may never go negative, and a cross-unit row with no usable
/// conversion ratio rejects the whole update.
pub fn compute_balances(
    accession: &Accession,
    rows: &mut Vec<Withdrawal>,
) -> Result<Option<SeedQuantity>, ServiceError> {
    let total = match &accession.total {
        Some(total) => *total,
        None => {
            if rows.is_empty() {
                return Ok(None);
            }
            return Err(ServiceError::Validation(
                "cannot withdraw from accession before setting its total size".into(),
            ));
        }
    };

    let ratio = accession.conversion_ratio();

    rows.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(a.created_time.cmp(&b.created_time))
    });

    let mut current = total;
    for row in rows.iter_mut() {
        let consumed = consumed_quantity(row, &current, total.units, ratio.as_ref())?;

        current = current.checked_sub(&consumed).ok_or_else(|| {
            ServiceError::Validation(
                "cannot withdraw more seeds than are in the accession".into(),
            )
        })?;

        row.remaining = Some(current);
        row.estimated_count = estimated_seed_count(row.withdrawn.as_ref(), ratio.as_ref());
    }

    Ok(Some(current))
}

/// What a single ledger row takes off the running balance, in the total's
/// units.
fn consumed_quantity(
    row: &mut Withdrawal,
    current: &SeedQuantity,
    total_units: SeedQuantityUnits,
    ratio: Option<&ConversionRatio>,
) -> Result<SeedQuantity, ServiceError> {
    if let Some(withdrawn) = row.withdrawn {
        if withdrawn.units == total_units {
            return Ok(withdrawn);
        }
        if let Some(converted) = withdrawn.to_units(total_units) {
            return Ok(converted);
        }
        // Crossing the count/weight boundary needs the subset ratio. An
        // unknown conversion is a rejection, never a silent zero.
        return ratio
            .and_then(|r| r.convert(&withdrawn, total_units))
            .ok_or_else(|| {
                ServiceError::Validation(
                    "cannot convert between seed counts and weights without subset count and \
                     subset weight"
                        .into(),
                )
            });
    }

    // Mirror rows of weight-based tests carry the observed remaining
    // quantity instead; the withdrawn delta is derived here.
    if row.is_test_mirror() {
        if let Some(observed) = row.remaining {
            let observed = observed.to_units(total_units).ok_or_else(|| {
                ServiceError::Validation(
                    "viability test remaining quantity must be a weight measurement".into(),
                )
            })?;
            let consumed = current.checked_sub(&observed).ok_or_else(|| {
                ServiceError::Validation(
                    "viability test remaining quantity exceeds the accession's remaining \
                     quantity"
                        .into(),
                )
            })?;
            row.withdrawn = Some(consumed);
            return Ok(consumed);
        }
    }

    // No quantity recorded; the balance is unaffected.
    Ok(SeedQuantity::new(rust_decimal::Decimal::ZERO, total_units))
}

/// Seed-count estimate of a withdrawn quantity, when derivable.
fn estimated_seed_count(
    withdrawn: Option<&SeedQuantity>,
    ratio: Option<&ConversionRatio>,
) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;

    let withdrawn = withdrawn?;
    if withdrawn.units == SeedQuantityUnits::Seeds {
        return withdrawn.quantity.trunc().to_i64();
    }
    ratio?.seed_count_of(withdrawn)?.to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessingMethod, WithdrawalOrigin};
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use seedvault_core::FixedClock;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn count_accession(total: i64) -> Accession {
        let mut accession = Accession::new("fac1");
        accession.processing_method = Some(ProcessingMethod::Count);
        accession.total = Some(SeedQuantity::seeds(total));
        accession
    }

    fn weight_accession(total_grams: i64) -> Accession {
        let mut accession = Accession::new("fac1");
        accession.processing_method = Some(ProcessingMethod::Weight);
        accession.total = Some(SeedQuantity::grams_of(total_grams));
        accession
    }

    #[test]
    fn inserts_get_ids_and_created_times() {
        let clock = FixedClock::epoch();
        let desired = vec![Withdrawal::new(date(3), SeedQuantity::seeds(10))];

        let manual = reconcile_manual(&[], &desired, &clock).unwrap();
        assert_eq!(manual.len(), 1);
        assert!(manual[0].id.is_some());
        assert_eq!(manual[0].created_time, Some(clock.now()));
    }

    #[test]
    fn update_with_unknown_id_is_rejected() {
        let clock = FixedClock::epoch();
        let mut desired = Withdrawal::new(date(3), SeedQuantity::seeds(10));
        desired.id = Some("nope".into());

        let err = reconcile_manual(&[], &[desired], &clock).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn omitted_rows_are_deleted() {
        let clock = FixedClock::epoch();
        let mut existing = Withdrawal::new(date(3), SeedQuantity::seeds(10));
        existing.id = Some("w1".into());
        existing.created_time = Some(clock.now());

        let manual = reconcile_manual(&[existing], &[], &clock).unwrap();
        assert!(manual.is_empty());
    }

    #[test]
    fn manual_viability_purpose_is_rejected() {
        let clock = FixedClock::epoch();
        let desired = Withdrawal::new(date(3), SeedQuantity::seeds(10))
            .with_purpose(WithdrawalPurpose::ViabilityTesting);

        let err = reconcile_manual(&[], &[desired], &clock).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn editing_a_mirror_row_is_rejected() {
        let clock = FixedClock::epoch();
        let mut mirror = Withdrawal::new(date(3), SeedQuantity::seeds(5))
            .with_purpose(WithdrawalPurpose::ViabilityTesting);
        mirror.id = Some("m1".into());
        mirror.origin = WithdrawalOrigin::TestMirror;
        mirror.viability_test_id = Some("t1".into());

        // Pass-through unchanged is tolerated (and not collected).
        let ok = reconcile_manual(std::slice::from_ref(&mirror), &[mirror.clone()], &clock);
        assert!(ok.unwrap().is_empty());

        // Changing its quantity is not.
        let mut edited = mirror.clone();
        edited.withdrawn = Some(SeedQuantity::seeds(50));
        let err = reconcile_manual(&[mirror], &[edited], &clock).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn balances_run_oldest_date_first() {
        let clock = FixedClock::epoch();
        let accession = count_accession(100);

        let mut later = Withdrawal::new(date(9), SeedQuantity::seeds(30));
        later.id = Some("w-late".into());
        later.created_time = Some(clock.now());
        let mut earlier = Withdrawal::new(date(2), SeedQuantity::seeds(10));
        earlier.id = Some("w-early".into());
        earlier.created_time = Some(clock.now() + Duration::seconds(5));

        let mut rows = vec![later, earlier];
        let remaining = compute_balances(&accession, &mut rows).unwrap();

        assert_eq!(remaining, Some(SeedQuantity::seeds(60)));
        assert_eq!(rows[0].id.as_deref(), Some("w-early"));
        assert_eq!(rows[0].remaining, Some(SeedQuantity::seeds(90)));
        assert_eq!(rows[1].remaining, Some(SeedQuantity::seeds(60)));
    }

    #[test]
    fn same_date_ties_break_by_insertion_time() {
        let clock = FixedClock::epoch();
        let accession = count_accession(100);

        let mut second = Withdrawal::new(date(2), SeedQuantity::seeds(30));
        second.id = Some("w2".into());
        second.created_time = Some(clock.now() + Duration::seconds(10));
        let mut first = Withdrawal::new(date(2), SeedQuantity::seeds(10));
        first.id = Some("w1".into());
        first.created_time = Some(clock.now());

        let mut rows = vec![second, first];
        compute_balances(&accession, &mut rows).unwrap();

        assert_eq!(rows[0].id.as_deref(), Some("w1"));
        assert_eq!(rows[0].remaining, Some(SeedQuantity::seeds(90)));
        assert_eq!(rows[1].remaining, Some(SeedQuantity::seeds(60)));
    }

    #[test]
    fn over_withdrawal_is_rejected() {
        let accession = count_accession(10);
        let mut rows = vec![Withdrawal::new(date(2), SeedQuantity::seeds(11))];

        let err = compute_balances(&accession, &mut rows).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn withdrawal_without_total_is_rejected() {
        let mut accession = Accession::new("fac1");
        accession.processing_method = Some(ProcessingMethod::Count);
        let mut rows = vec![Withdrawal::new(date(2), SeedQuantity::seeds(1))];

        let err = compute_balances(&accession, &mut rows).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn cross_unit_withdrawal_uses_ratio() {
        // 10 seeds per gram: withdrawing 50 seeds from a 100 g total costs 5 g.
        let mut accession = weight_accession(100);
        accession.subset_count = Some(10);
        accession.subset_weight = Some(SeedQuantity::grams_of(1));

        let mut rows = vec![Withdrawal::new(date(2), SeedQuantity::seeds(50))];
        let remaining = compute_balances(&accession, &mut rows).unwrap();

        assert_eq!(remaining, Some(SeedQuantity::grams_of(95)));
        assert_eq!(rows[0].estimated_count, Some(50));
    }

    #[test]
    fn cross_unit_withdrawal_without_ratio_is_rejected() {
        let accession = weight_accession(100);
        let mut rows = vec![Withdrawal::new(date(2), SeedQuantity::seeds(50))];

        let err = compute_balances(&accession, &mut rows).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn same_family_units_convert_without_ratio() {
        let accession = weight_accession(2000);
        let mut rows = vec![Withdrawal::new(
            date(2),
            SeedQuantity::new(Decimal::ONE, SeedQuantityUnits::Kilograms),
        )];

        let remaining = compute_balances(&accession, &mut rows).unwrap();
        assert_eq!(remaining, Some(SeedQuantity::grams_of(1000)));
    }

    #[test]
    fn weight_mirror_row_derives_withdrawn_from_observed_remaining() {
        let accession = weight_accession(100);
        let mut mirror = Withdrawal::new(date(2), SeedQuantity::grams_of(0));
        mirror.origin = WithdrawalOrigin::TestMirror;
        mirror.purpose = Some(WithdrawalPurpose::ViabilityTesting);
        mirror.viability_test_id = Some("t1".into());
        mirror.withdrawn = None;
        mirror.remaining = Some(SeedQuantity::grams_of(93));

        let mut rows = vec![mirror];
        let remaining = compute_balances(&accession, &mut rows).unwrap();

        assert_eq!(remaining, Some(SeedQuantity::grams_of(93)));
        assert_eq!(rows[0].withdrawn, Some(SeedQuantity::grams_of(7)));
    }

    #[test]
    fn observed_remaining_above_balance_is_rejected() {
        let accession = weight_accession(100);
        let mut mirror = Withdrawal::new(date(2), SeedQuantity::grams_of(0));
        mirror.origin = WithdrawalOrigin::TestMirror;
        mirror.withdrawn = None;
        mirror.remaining = Some(SeedQuantity::grams_of(120));

        let err = compute_balances(&accession, &mut vec![mirror]).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
