use std::collections::HashMap;

use seedvault_core::{new_id, Clock, ServiceError};
use tracing::debug;

use crate::model::{
    Accession, ProcessingMethod, SeedQuantity, ViabilityTest, ViabilityTestType, Withdrawal,
    WithdrawalOrigin, WithdrawalPurpose,
};

/// Result of reconciling an accession's viability tests: the updated tests
/// plus the mirrored withdrawals derived from them.
#[derive(Debug)]
pub struct ViabilityOutcome {
    pub tests: Vec<ViabilityTest>,
    pub mirrors: Vec<Withdrawal>,
}

/// Reconcile the viability tests and regenerate their mirrored withdrawals.
///
/// Each stock-consuming test owns exactly one withdrawal with purpose
/// `ViabilityTesting`. New tests create a mirror, modified tests update it
/// in place (same identity), deleted tests delete it. Mirror quantities:
/// count-based accessions take the test's seeds-tested count; weight-based
/// accessions take the caller-observed remaining quantity, with the
/// withdrawn delta derived during balance computation.
pub fn reconcile(
    accession: &Accession,
    existing_tests: &[ViabilityTest],
    existing_withdrawals: &[Withdrawal],
    desired_tests: &[ViabilityTest],
    clock: &dyn Clock,
) -> Result<ViabilityOutcome, ServiceError> {
    let existing_by_id: HashMap<&str, &ViabilityTest> = existing_tests
        .iter()
        .filter_map(|t| t.id.as_deref().map(|id| (id, t)))
        .collect();
    let mirrors_by_test_id: HashMap<&str, &Withdrawal> = existing_withdrawals
        .iter()
        .filter(|w| w.is_test_mirror())
        .filter_map(|w| w.viability_test_id.as_deref().map(|id| (id, w)))
        .collect();

    let mut tests = Vec::new();
    let mut mirrors = Vec::new();

    for desired in desired_tests {
        let prior = match desired.id.as_deref() {
            Some(id) => Some(*existing_by_id.get(id).ok_or_else(|| {
                ServiceError::Validation(format!(
                    "viability test {id} does not belong to this accession; leave the ID off to \
                     insert a new test"
                ))
            })?),
            None => None,
        };

        let mut test = with_calculated_values(desired.clone());
        validate_for_method(accession, &test)?;

        let test_id = match prior {
            Some(prior) => {
                test.created_time = prior.created_time;
                prior.id.clone().unwrap_or_default()
            }
            None => {
                test.created_time = Some(clock.now());
                new_id()
            }
        };
        test.id = Some(test_id.clone());

        let prior_mirror = mirrors_by_test_id.get(test_id.as_str()).copied();
        mirrors.push(build_mirror(accession, &test, prior_mirror, clock));
        tests.push(test);
    }

    let deleted: Vec<&str> = existing_by_id
        .keys()
        .filter(|id| !tests.iter().any(|t| t.id.as_deref() == Some(**id)))
        .copied()
        .collect();
    if !deleted.is_empty() {
        debug!(ids = ?deleted, "deleting viability tests and their mirrored withdrawals");
    }

    Ok(ViabilityOutcome { tests, mirrors })
}

/// Recompute the derived fields of a test from its results.
fn with_calculated_values(mut test: ViabilityTest) -> ViabilityTest {
    match test.test_type {
        ViabilityTestType::Cut => {
            // Seeds cut open defaults to the sum of the three outcome counts.
            if test.seeds_tested.is_none() && test.has_results() {
                test.seeds_tested = Some(
                    test.seeds_filled.unwrap_or(0)
                        + test.seeds_empty.unwrap_or(0)
                        + test.seeds_compromised.unwrap_or(0),
                );
            }
            test.total_seeds_germinated = None;
            test.viability_percent = match (test.seeds_filled, test.seeds_tested) {
                (Some(filled), Some(tested)) if tested > 0 && test.has_results() => {
                    Some(round_percent(filled as u64, tested as u64))
                }
                _ => None,
            };
        }
        ViabilityTestType::Lab | ViabilityTestType::Nursery => {
            let germinated: u32 = test.results.iter().map(|r| r.seeds_germinated).sum();
            test.total_seeds_germinated = if test.results.is_empty() {
                None
            } else {
                Some(germinated)
            };
            test.viability_percent = match test.seeds_tested {
                Some(sown) if sown > 0 && !test.results.is_empty() => {
                    Some(round_percent(germinated as u64, sown as u64))
                }
                _ => None,
            };
        }
    }
    test
}

fn validate_for_method(
    accession: &Accession,
    test: &ViabilityTest,
) -> Result<(), ServiceError> {
    match accession.processing_method {
        Some(ProcessingMethod::Weight) => {
            let remaining = test.remaining.as_ref().ok_or_else(|| {
                ServiceError::Validation(
                    "viability tests on weight-based accessions must include the remaining \
                     quantity"
                        .into(),
                )
            })?;
            if !remaining.units.is_weight() {
                return Err(ServiceError::Validation(
                    "viability test remaining quantity must be a weight measurement".into(),
                ));
            }
            if remaining.is_negative() {
                return Err(ServiceError::Validation(
                    "viability test remaining quantity cannot be negative".into(),
                ));
            }
        }
        Some(ProcessingMethod::Count) => {
            if test.remaining.is_some() {
                return Err(ServiceError::Validation(
                    "viability tests on count-based accessions must not include a remaining \
                     quantity"
                        .into(),
                ));
            }
        }
        None => {
            return Err(ServiceError::Validation(
                "cannot add viability tests before setting the processing method".into(),
            ));
        }
    }
    Ok(())
}

/// Build or refresh the withdrawal mirroring a test's stock consumption.
fn build_mirror(
    accession: &Accession,
    test: &ViabilityTest,
    prior: Option<&Withdrawal>,
    clock: &dyn Clock,
) -> Withdrawal {
    let date = test
        .start_date
        .or_else(|| prior.map(|w| w.date))
        .unwrap_or_else(|| clock.today());

    let (withdrawn, observed_remaining) = match accession.processing_method {
        Some(ProcessingMethod::Weight) => (None, test.remaining),
        _ => (test.seeds_tested.map(|n| SeedQuantity::seeds(n as i64)), None),
    };

    Withdrawal {
        id: prior.and_then(|w| w.id.clone()).or_else(|| Some(new_id())),
        date,
        purpose: Some(WithdrawalPurpose::ViabilityTesting),
        origin: WithdrawalOrigin::TestMirror,
        withdrawn,
        remaining: observed_remaining,
        estimated_count: None,
        viability_test_id: test.id.clone(),
        staff_responsible: test.staff_responsible.clone(),
        notes: None,
        created_time: prior.and_then(|w| w.created_time).or_else(|| Some(clock.now())),
    }
}

/// Viability aggregates recomputed from the full set of tests after every
/// reconciliation.
pub struct ViabilityAggregates {
    pub latest_viability_percent: Option<u32>,
    pub latest_germination_recording_date: Option<chrono::NaiveDate>,
    pub total_viability_percent: Option<u32>,
}

pub fn aggregates(tests: &[ViabilityTest]) -> ViabilityAggregates {
    // "Latest" is germination-based: the test with sown seeds whose most
    // recent result recording date is newest.
    let latest = tests
        .iter()
        .filter(|t| t.test_type != ViabilityTestType::Cut)
        .filter(|t| t.seeds_tested.is_some())
        .filter_map(|t| t.latest_recording_date().map(|d| (d, t)))
        .max_by_key(|(d, _)| *d);

    let mut tested: u64 = 0;
    let mut viable: u64 = 0;
    let mut any_results = false;

    for test in tests {
        if !test.has_results() {
            continue;
        }
        any_results = true;
        match test.test_type {
            ViabilityTestType::Cut => {
                tested += test.seeds_tested.unwrap_or(0) as u64;
                viable += test.seeds_filled.unwrap_or(0) as u64;
            }
            _ => {
                tested += test.seeds_tested.unwrap_or(0) as u64;
                viable += test
                    .results
                    .iter()
                    .map(|r| r.seeds_germinated as u64)
                    .sum::<u64>();
            }
        }
    }

    ViabilityAggregates {
        latest_viability_percent: latest.and_then(|(_, t)| t.viability_percent),
        latest_germination_recording_date: latest.map(|(d, _)| d),
        total_viability_percent: if any_results && tested > 0 {
            Some(round_percent(viable, tested))
        } else {
            None
        },
    }
}

/// Half-up integer percentage.
fn round_percent(viable: u64, tested: u64) -> u32 {
    ((viable * 100 + tested / 2) / tested) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViabilityTestResult;
    use chrono::NaiveDate;
    use seedvault_core::FixedClock;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn count_accession() -> Accession {
        let mut accession = Accession::new("fac1");
        accession.processing_method = Some(ProcessingMethod::Count);
        accession.total = Some(SeedQuantity::seeds(100));
        accession
    }

    fn weight_accession() -> Accession {
        let mut accession = Accession::new("fac1");
        accession.processing_method = Some(ProcessingMethod::Weight);
        accession.total = Some(SeedQuantity::grams_of(100));
        accession
    }

    fn lab_test(seeds_tested: u32) -> ViabilityTest {
        let mut test = ViabilityTest::new(ViabilityTestType::Lab);
        test.seeds_tested = Some(seeds_tested);
        test.start_date = Some(date(4));
        test
    }

    #[test]
    fn new_test_gets_exactly_one_mirror() {
        let clock = FixedClock::epoch();
        let outcome =
            reconcile(&count_accession(), &[], &[], &[lab_test(29)], &clock).unwrap();

        assert_eq!(outcome.tests.len(), 1);
        assert_eq!(outcome.mirrors.len(), 1);

        let mirror = &outcome.mirrors[0];
        assert_eq!(mirror.purpose, Some(WithdrawalPurpose::ViabilityTesting));
        assert_eq!(mirror.origin, WithdrawalOrigin::TestMirror);
        assert_eq!(mirror.withdrawn, Some(SeedQuantity::seeds(29)));
        assert_eq!(mirror.date, date(4));
        assert_eq!(mirror.viability_test_id, outcome.tests[0].id);
    }

    #[test]
    fn modified_test_updates_mirror_in_place() {
        let clock = FixedClock::epoch();
        let accession = count_accession();
        let first = reconcile(&accession, &[], &[], &[lab_test(10)], &clock).unwrap();

        let mut modified = first.tests[0].clone();
        modified.seeds_tested = Some(25);
        modified.start_date = Some(date(6));

        let second = reconcile(
            &accession,
            &first.tests,
            &first.mirrors,
            &[modified],
            &clock,
        )
        .unwrap();

        assert_eq!(second.mirrors.len(), 1);
        assert_eq!(second.mirrors[0].id, first.mirrors[0].id);
        assert_eq!(second.mirrors[0].created_time, first.mirrors[0].created_time);
        assert_eq!(second.mirrors[0].withdrawn, Some(SeedQuantity::seeds(25)));
        assert_eq!(second.mirrors[0].date, date(6));
    }

    #[test]
    fn deleted_test_deletes_mirror() {
        let clock = FixedClock::epoch();
        let accession = count_accession();
        let first = reconcile(&accession, &[], &[], &[lab_test(10)], &clock).unwrap();

        let second =
            reconcile(&accession, &first.tests, &first.mirrors, &[], &clock).unwrap();
        assert!(second.tests.is_empty());
        assert!(second.mirrors.is_empty());
    }

    #[test]
    fn unknown_test_id_is_rejected() {
        let clock = FixedClock::epoch();
        let mut test = lab_test(10);
        test.id = Some("someone-elses-test".into());

        let err = reconcile(&count_accession(), &[], &[], &[test], &clock).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn weight_based_test_requires_observed_remaining() {
        let clock = FixedClock::epoch();
        let err =
            reconcile(&weight_accession(), &[], &[], &[lab_test(10)], &clock).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let mut test = lab_test(10);
        test.remaining = Some(SeedQuantity::grams_of(93));
        let outcome = reconcile(&weight_accession(), &[], &[], &[test], &clock).unwrap();
        assert_eq!(outcome.mirrors[0].withdrawn, None);
        assert_eq!(
            outcome.mirrors[0].remaining,
            Some(SeedQuantity::grams_of(93))
        );
    }

    #[test]
    fn germination_percent_rounds() {
        let mut test = lab_test(30);
        test.results = vec![
            ViabilityTestResult {
                recording_date: date(10),
                seeds_germinated: 7,
            },
            ViabilityTestResult {
                recording_date: date(12),
                seeds_germinated: 3,
            },
        ];

        let calculated = with_calculated_values(test);
        assert_eq!(calculated.total_seeds_germinated, Some(10));
        // 10/30 = 33.33..% rounds to 33.
        assert_eq!(calculated.viability_percent, Some(33));
    }

    #[test]
    fn cut_test_percent_uses_filled_seeds() {
        let mut test = ViabilityTest::new(ViabilityTestType::Cut);
        test.seeds_filled = Some(5);
        test.seeds_empty = Some(3);
        test.seeds_compromised = Some(1);

        let calculated = with_calculated_values(test);
        assert_eq!(calculated.seeds_tested, Some(9));
        // 5/9 = 55.6% rounds to 56.
        assert_eq!(calculated.viability_percent, Some(56));
    }

    #[test]
    fn aggregates_pick_latest_by_recording_date() {
        let mut older = lab_test(10);
        older.id = Some("t1".into());
        older.results = vec![ViabilityTestResult {
            recording_date: date(5),
            seeds_germinated: 9,
        }];
        let mut newer = lab_test(20);
        newer.id = Some("t2".into());
        newer.results = vec![ViabilityTestResult {
            recording_date: date(8),
            seeds_germinated: 5,
        }];

        let tests: Vec<_> = [older, newer]
            .into_iter()
            .map(with_calculated_values)
            .collect();
        let agg = aggregates(&tests);

        assert_eq!(agg.latest_germination_recording_date, Some(date(8)));
        // Latest test: 5/20 = 25%.
        assert_eq!(agg.latest_viability_percent, Some(25));
        // Total: (9 + 5) / (10 + 20) = 46.7% -> 47.
        assert_eq!(agg.total_viability_percent, Some(47));
    }

    #[test]
    fn aggregates_include_cut_tests_in_total() {
        let mut germination = lab_test(10);
        germination.results = vec![ViabilityTestResult {
            recording_date: date(5),
            seeds_germinated: 8,
        }];
        let mut cut = ViabilityTest::new(ViabilityTestType::Cut);
        cut.seeds_filled = Some(4);
        cut.seeds_empty = Some(5);
        cut.seeds_compromised = Some(1);

        let tests: Vec<_> = [germination, cut]
            .into_iter()
            .map(with_calculated_values)
            .collect();
        let agg = aggregates(&tests);

        // (8 + 4) / (10 + 10) = 60%.
        assert_eq!(agg.total_viability_percent, Some(60));
        // Cut tests never drive the "latest" germination values.
        assert_eq!(agg.latest_germination_recording_date, Some(date(5)));
    }

    #[test]
    fn aggregates_empty_without_results() {
        let tests = vec![with_calculated_values(lab_test(10))];
        let agg = aggregates(&tests);
        assert_eq!(agg.latest_viability_percent, None);
        assert_eq!(agg.total_viability_percent, None);
        assert_eq!(agg.latest_germination_recording_date, None);
    }
}
