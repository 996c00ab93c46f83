use rust_decimal::Decimal;

use crate::model::{
    Accession, HistoryEntry, HistoryEntryType, SeedQuantity, StateHistoryRow, Withdrawal,
    WithdrawalPurpose,
};

/// Project an accession's human-readable history from its state-change log
/// and its withdrawals.
///
/// Entries are ordered newest-first by business date, then by the time the
/// underlying row was recorded, then by row sequence — so a backdated
/// withdrawal files under the day it was dated, and same-instant events
/// keep the order their rows were written.
pub fn project(accession: &Accession, state_rows: &[StateHistoryRow]) -> Vec<HistoryEntry> {
    // Sort key alongside each entry: (date, created_time, seq).
    let mut keyed: Vec<(i64, HistoryEntry)> = Vec::new();

    for row in state_rows {
        let entry = match row.old_state {
            None => HistoryEntry {
                created_time: row.created_time,
                date: row.created_time.date_naive(),
                entry_type: HistoryEntryType::Created,
                description: "created accession".into(),
                staff_responsible: None,
                notes: None,
            },
            Some(_) => HistoryEntry {
                created_time: row.created_time,
                date: row.created_time.date_naive(),
                entry_type: HistoryEntryType::StateChanged,
                description: format!(
                    "updated the status to {}",
                    row.new_state.display_name()
                ),
                staff_responsible: None,
                notes: None,
            },
        };
        keyed.push((row.seq, entry));
    }

    for (index, withdrawal) in accession.withdrawals.iter().enumerate() {
        let entry_type = if withdrawal.purpose == Some(WithdrawalPurpose::ViabilityTesting) {
            HistoryEntryType::ViabilityTesting
        } else {
            HistoryEntryType::Withdrawal
        };
        let entry = HistoryEntry {
            created_time: withdrawal
                .created_time
                .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
            date: withdrawal.date,
            entry_type,
            description: describe_withdrawal(withdrawal),
            staff_responsible: withdrawal.staff_responsible.clone(),
            notes: withdrawal.notes.clone(),
        };
        // Withdrawal rows sort after state rows recorded at the same instant.
        keyed.push((-1 - index as i64, entry));
    }

    keyed.sort_by(|(seq_a, a), (seq_b, b)| {
        b.date
            .cmp(&a.date)
            .then(b.created_time.cmp(&a.created_time))
            .then(seq_b.cmp(seq_a))
    });

    keyed.into_iter().map(|(_, entry)| entry).collect()
}

/// "withdrew 70 seeds", "withdrew 1 seed for nursery",
/// "withdrew 2 grams for viability testing", "withdrew seeds" when the
/// quantity is unknown.
fn describe_withdrawal(withdrawal: &Withdrawal) -> String {
    let quantity = match &withdrawal.withdrawn {
        Some(q) => describe_quantity(q),
        None => "seeds".into(),
    };

    match withdrawal.purpose {
        Some(purpose) => format!("withdrew {} for {}", quantity, purpose.display_name()),
        None => format!("withdrew {quantity}"),
    }
}

fn describe_quantity(quantity: &SeedQuantity) -> String {
    let amount = quantity.quantity.normalize();
    let plural = amount != Decimal::ONE;
    format!("{} {}", amount, quantity.units.display_name(plural))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccessionState, SeedQuantityUnits, WithdrawalOrigin,
    };
    use chrono::{DateTime, Duration, NaiveDate, Utc};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, day).unwrap()
    }

    fn instant(day: u32) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(day as i64 - 1)
    }

    fn state_row(
        seq: i64,
        old: Option<AccessionState>,
        new: AccessionState,
        created: DateTime<Utc>,
    ) -> StateHistoryRow {
        StateHistoryRow {
            seq,
            accession_id: "a1".into(),
            old_state: old,
            new_state: new,
            reason: String::new(),
            created_time: created,
        }
    }

    fn withdrawal(
        day: u32,
        created: DateTime<Utc>,
        quantity: Option<SeedQuantity>,
        purpose: Option<WithdrawalPurpose>,
    ) -> Withdrawal {
        Withdrawal {
            id: Some(seedvault_core::new_id()),
            date: date(day),
            purpose,
            origin: WithdrawalOrigin::Manual,
            withdrawn: quantity,
            remaining: None,
            estimated_count: None,
            viability_test_id: None,
            staff_responsible: None,
            notes: None,
            created_time: Some(created),
        }
    }

    #[test]
    fn descriptions_follow_quantity_and_purpose() {
        let w = withdrawal(1, instant(1), Some(SeedQuantity::seeds(70)), None);
        assert_eq!(describe_withdrawal(&w), "withdrew 70 seeds");

        let w = withdrawal(
            1,
            instant(1),
            Some(SeedQuantity::seeds(1)),
            Some(WithdrawalPurpose::Nursery),
        );
        assert_eq!(describe_withdrawal(&w), "withdrew 1 seed for nursery");

        let w = withdrawal(
            1,
            instant(1),
            Some(SeedQuantity::grams_of(2)),
            Some(WithdrawalPurpose::Other),
        );
        assert_eq!(describe_withdrawal(&w), "withdrew 2 grams for other");

        let w = withdrawal(
            1,
            instant(1),
            Some(SeedQuantity::new(
                Decimal::ONE,
                SeedQuantityUnits::Grams,
            )),
            None,
        );
        assert_eq!(describe_withdrawal(&w), "withdrew 1 gram");

        let w = withdrawal(1, instant(1), None, Some(WithdrawalPurpose::Other));
        assert_eq!(describe_withdrawal(&w), "withdrew seeds for other");
    }

    #[test]
    fn trailing_zeros_are_trimmed() {
        let q = SeedQuantity::new(Decimal::new(2500, 3), SeedQuantityUnits::Grams);
        assert_eq!(describe_quantity(&q), "2.5 grams");
    }

    #[test]
    fn creation_row_projects_as_created_entry() {
        let mut accession = Accession::new("fac1");
        accession.id = "a1".into();
        let rows = vec![state_row(
            1,
            None,
            AccessionState::AwaitingCheckIn,
            instant(1),
        )];

        let entries = project(&accession, &rows);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, HistoryEntryType::Created);
        assert_eq!(entries[0].description, "created accession");
    }

    #[test]
    fn full_history_orders_newest_date_first() {
        // Jan 1: created and checked in. Jan 2: quantity entered (state ->
        // Processing). Jan 3: 1 seed withdrawn. Jan 4: viability test of 29
        // seeds. Jan 5: 70 seeds withdrawn backdated to Jan 3, exhausting
        // the accession (state -> Used Up).
        let mut accession = Accession::new("fac1");
        accession.id = "a1".into();
        accession.withdrawals = vec![
            withdrawal(
                3,
                instant(3),
                Some(SeedQuantity::seeds(1)),
                Some(WithdrawalPurpose::Nursery),
            ),
            withdrawal(
                4,
                instant(4),
                Some(SeedQuantity::seeds(29)),
                Some(WithdrawalPurpose::ViabilityTesting),
            ),
            withdrawal(3, instant(5), Some(SeedQuantity::seeds(70)), None),
        ];

        let rows = vec![
            state_row(1, None, AccessionState::AwaitingCheckIn, instant(1)),
            state_row(
                2,
                Some(AccessionState::AwaitingCheckIn),
                AccessionState::Pending,
                instant(1) + Duration::seconds(60),
            ),
            state_row(
                3,
                Some(AccessionState::Pending),
                AccessionState::Processing,
                instant(2),
            ),
            state_row(
                4,
                Some(AccessionState::Processing),
                AccessionState::UsedUp,
                instant(5),
            ),
        ];

        let descriptions: Vec<String> = project(&accession, &rows)
            .into_iter()
            .map(|e| e.description)
            .collect();

        assert_eq!(
            descriptions,
            vec![
                "updated the status to Used Up",
                "withdrew 29 seeds for viability testing",
                "withdrew 70 seeds",
                "withdrew 1 seed for nursery",
                "updated the status to Processing",
                "updated the status to Pending",
                "created accession",
            ]
        );
    }

    #[test]
    fn viability_withdrawals_carry_their_own_entry_type() {
        let mut accession = Accession::new("fac1");
        accession.withdrawals = vec![withdrawal(
            2,
            instant(2),
            Some(SeedQuantity::seeds(5)),
            Some(WithdrawalPurpose::ViabilityTesting),
        )];

        let entries = project(&accession, &[]);
        assert_eq!(entries[0].entry_type, HistoryEntryType::ViabilityTesting);
        assert_eq!(
            entries[0].description,
            "withdrew 5 seeds for viability testing"
        );
    }
}
