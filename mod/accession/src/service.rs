use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::SubsecRound;
use seedvault_core::{new_id, Clock, ListParams, ListResult, ServiceError};
use tracing::{info, warn};

use crate::engine;
use crate::facility::FacilityDirectory;
use crate::model::{
    Accession, AccessionState, HistoryEntry, SummaryStatistics, ViabilityTest, Withdrawal,
};
use crate::number::AccessionNumberAllocator;
use crate::store::AccessionStore;

/// Number of times to try generating a unique accession number before
/// giving up.
const ACCESSION_NUMBER_RETRIES: u32 = 10;

/// Scope for the reporting aggregates.
pub enum SummaryScope {
    Facility(String),
    Organization(String),
}

/// Accession service — wires the reconciliation pipeline to storage, the
/// number allocator, the clock, and the facility directory.
///
/// Authorization is assumed to have happened before any call lands here.
pub struct AccessionService {
    store: Arc<AccessionStore>,
    allocator: Arc<dyn AccessionNumberAllocator>,
    directory: Arc<dyn FacilityDirectory>,
    clock: Arc<dyn Clock>,
}

impl AccessionService {
    pub fn new(
        store: Arc<AccessionStore>,
        allocator: Arc<dyn AccessionNumberAllocator>,
        directory: Arc<dyn FacilityDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            allocator,
            directory,
            clock,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Run the full pipeline against an empty prior state and persist the
    /// result. The accession number comes from the per-facility allocator;
    /// collisions with concurrent creates retry up to the documented bound.
    pub fn create(&self, desired: &Accession) -> Result<Accession, ServiceError> {
        if desired.facility_id.is_empty() {
            return Err(ServiceError::Validation("no facility ID specified".into()));
        }
        if !self.directory.facility_exists(&desired.facility_id) {
            return Err(ServiceError::Validation(format!(
                "unknown facility {}",
                desired.facility_id
            )));
        }

        let mut draft = desired.clone();
        draft.id = new_id();
        draft.created_time = Some(self.clock.now());
        self.resolve_species(&mut draft)?;

        let outcome = engine::run_update(&draft, None, self.clock.as_ref())?;
        let mut accession = outcome.accession;

        let mut attempts_remaining = ACCESSION_NUMBER_RETRIES;
        while attempts_remaining > 0 {
            attempts_remaining -= 1;
            accession.accession_number = self.allocator.next_number(&accession.facility_id)?;

            match self
                .store
                .insert(&accession, "Accession created", self.clock.now())
            {
                Ok(()) => return Ok(accession),
                Err(ServiceError::Conflict(msg)) => {
                    warn!(number = %accession.accession_number, %msg, "accession number collision; trying again");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::Internal(
            "unable to generate a unique accession number".into(),
        ))
    }

    /// Run the full pipeline against the stored record and persist the
    /// result, returning the accession with all computed fields.
    pub fn update(&self, desired: &Accession) -> Result<Accession, ServiceError> {
        let (outcome, _existing) = self.reconcile(desired)?;
        self.store.save(
            &outcome.accession,
            outcome.state_change.as_ref(),
            self.clock.now(),
        )?;
        Ok(outcome.accession)
    }

    /// Same pipeline as [`update`](Self::update), skipping persistence:
    /// returns what the update would have produced.
    pub fn dry_run(&self, desired: &Accession) -> Result<Accession, ServiceError> {
        let (outcome, _existing) = self.reconcile(desired)?;
        Ok(outcome.accession)
    }

    /// Mark an accession as checked in. Idempotent: re-checking-in returns
    /// the record unchanged. The check-in time has one-second resolution.
    pub fn check_in(&self, id: &str) -> Result<Accession, ServiceError> {
        let existing = self.store.fetch_one_by_id(id)?;
        if existing.is_checked_in() {
            info!(accession = id, "already checked in; ignoring repeat check-in");
            return Ok(existing);
        }

        let mut desired = existing.clone();
        desired.checked_in_time = Some(self.clock.now().trunc_subsecs(0));

        let outcome = engine::run_update(&desired, Some(&existing), self.clock.as_ref())?;
        self.store.save(
            &outcome.accession,
            outcome.state_change.as_ref(),
            self.clock.now(),
        )?;
        Ok(outcome.accession)
    }

    pub fn fetch(&self, id: &str) -> Result<Accession, ServiceError> {
        self.store.fetch_one_by_id(id)
    }

    /// Delete an accession and all its child records.
    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete(id)
    }

    pub fn list(
        &self,
        facility_id: &str,
        params: &ListParams,
    ) -> Result<ListResult<Accession>, ServiceError> {
        self.store.list_by_facility(facility_id, params)
    }

    /// The accession's derived event history, newest first.
    pub fn fetch_history(&self, id: &str) -> Result<Vec<HistoryEntry>, ServiceError> {
        let accession = self.store.fetch_one_by_id(id)?;
        let state_rows = self.store.state_history(id)?;
        Ok(engine::history::project(&accession, &state_rows))
    }

    // -----------------------------------------------------------------------
    // Withdrawal operations
    // -----------------------------------------------------------------------

    /// Add a manual withdrawal and rerun the pipeline.
    pub fn create_withdrawal(
        &self,
        accession_id: &str,
        withdrawal: Withdrawal,
    ) -> Result<Accession, ServiceError> {
        let existing = self.store.fetch_one_by_id(accession_id)?;
        let mut desired = existing.clone();
        desired.withdrawals.push(withdrawal);
        self.apply(&desired, &existing)
    }

    /// Replace a manual withdrawal by id. Test-linked withdrawals cannot be
    /// edited here; modify the viability test instead.
    pub fn update_withdrawal(
        &self,
        accession_id: &str,
        withdrawal: Withdrawal,
    ) -> Result<Accession, ServiceError> {
        let withdrawal_id = withdrawal
            .id
            .clone()
            .ok_or_else(|| ServiceError::Validation("missing withdrawal ID".into()))?;

        let existing = self.store.fetch_one_by_id(accession_id)?;
        let position = existing
            .withdrawals
            .iter()
            .position(|w| w.id.as_deref() == Some(withdrawal_id.as_str()))
            .ok_or_else(|| ServiceError::NotFound(format!("withdrawal {withdrawal_id}")))?;

        if existing.withdrawals[position].is_test_mirror() {
            return Err(ServiceError::Validation(
                "cannot edit a viability testing withdrawal; modify the test instead".into(),
            ));
        }

        let mut desired = existing.clone();
        desired.withdrawals[position] = withdrawal;
        self.apply(&desired, &existing)
    }

    /// Remove a manual withdrawal by id. Test-linked withdrawals are removed
    /// by deleting their test.
    pub fn delete_withdrawal(
        &self,
        accession_id: &str,
        withdrawal_id: &str,
    ) -> Result<Accession, ServiceError> {
        let existing = self.store.fetch_one_by_id(accession_id)?;
        let position = existing
            .withdrawals
            .iter()
            .position(|w| w.id.as_deref() == Some(withdrawal_id))
            .ok_or_else(|| ServiceError::NotFound(format!("withdrawal {withdrawal_id}")))?;

        if existing.withdrawals[position].is_test_mirror() {
            return Err(ServiceError::Validation(
                "cannot delete a viability testing withdrawal; delete the test instead".into(),
            ));
        }

        let mut desired = existing.clone();
        desired.withdrawals.remove(position);
        self.apply(&desired, &existing)
    }

    // -----------------------------------------------------------------------
    // Viability test operations
    // -----------------------------------------------------------------------

    pub fn create_viability_test(
        &self,
        accession_id: &str,
        test: ViabilityTest,
    ) -> Result<Accession, ServiceError> {
        let existing = self.store.fetch_one_by_id(accession_id)?;
        let mut desired = existing.clone();
        desired.viability_tests.push(test);
        self.apply(&desired, &existing)
    }

    pub fn update_viability_test(
        &self,
        accession_id: &str,
        test: ViabilityTest,
    ) -> Result<Accession, ServiceError> {
        let test_id = test
            .id
            .clone()
            .ok_or_else(|| ServiceError::Validation("missing viability test ID".into()))?;

        let existing = self.store.fetch_one_by_id(accession_id)?;
        let position = existing
            .viability_tests
            .iter()
            .position(|t| t.id.as_deref() == Some(test_id.as_str()))
            .ok_or_else(|| ServiceError::NotFound(format!("viability test {test_id}")))?;

        let mut desired = existing.clone();
        desired.viability_tests[position] = test;
        self.apply(&desired, &existing)
    }

    pub fn delete_viability_test(
        &self,
        accession_id: &str,
        test_id: &str,
    ) -> Result<Accession, ServiceError> {
        let existing = self.store.fetch_one_by_id(accession_id)?;
        let position = existing
            .viability_tests
            .iter()
            .position(|t| t.id.as_deref() == Some(test_id))
            .ok_or_else(|| ServiceError::NotFound(format!("viability test {test_id}")))?;

        let mut desired = existing.clone();
        desired.viability_tests.remove(position);
        self.apply(&desired, &existing)
    }

    // -----------------------------------------------------------------------
    // Reporting aggregates
    // -----------------------------------------------------------------------

    pub fn count_active(&self, scope: &SummaryScope) -> Result<i64, ServiceError> {
        self.store.count_active(&self.scope_facilities(scope))
    }

    pub fn count_by_state(
        &self,
        scope: &SummaryScope,
    ) -> Result<BTreeMap<AccessionState, i64>, ServiceError> {
        self.store.count_by_state(&self.scope_facilities(scope))
    }

    pub fn summary_statistics(
        &self,
        scope: &SummaryScope,
    ) -> Result<SummaryStatistics, ServiceError> {
        self.store.summary_statistics(&self.scope_facilities(scope))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn reconcile(
        &self,
        desired: &Accession,
    ) -> Result<(engine::ReconcileOutcome, Accession), ServiceError> {
        if desired.id.is_empty() {
            return Err(ServiceError::Validation("missing accession ID".into()));
        }
        let existing = self.store.fetch_one_by_id(&desired.id)?;

        let mut desired = desired.clone();
        self.resolve_species(&mut desired)?;

        let outcome = engine::run_update(&desired, Some(&existing), self.clock.as_ref())?;
        Ok((outcome, existing))
    }

    fn apply(
        &self,
        desired: &Accession,
        existing: &Accession,
    ) -> Result<Accession, ServiceError> {
        let outcome = engine::run_update(desired, Some(existing), self.clock.as_ref())?;
        self.store.save(
            &outcome.accession,
            outcome.state_change.as_ref(),
            self.clock.now(),
        )?;
        Ok(outcome.accession)
    }

    fn resolve_species(&self, accession: &mut Accession) -> Result<(), ServiceError> {
        match &accession.species_id {
            Some(species_id) => {
                let name = self.directory.species_name(species_id).ok_or_else(|| {
                    ServiceError::Validation(format!("unknown species {species_id}"))
                })?;
                accession.species_name = Some(name);
            }
            None => accession.species_name = None,
        }
        Ok(())
    }

    fn scope_facilities(&self, scope: &SummaryScope) -> Vec<String> {
        match scope {
            SummaryScope::Facility(facility_id) => vec![facility_id.clone()],
            SummaryScope::Organization(organization_id) => {
                self.directory.organization_facilities(organization_id)
            }
        }
    }
}
