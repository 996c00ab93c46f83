use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// The narrow view of the facility/species directory the accession engine
/// needs: existence checks, organization scoping, and species name lookup.
/// The real directory lives elsewhere; tests use the in-memory one.
pub trait FacilityDirectory: Send + Sync {
    fn facility_exists(&self, facility_id: &str) -> bool;

    /// All facility ids belonging to an organization.
    fn organization_facilities(&self, organization_id: &str) -> Vec<String>;

    fn species_name(&self, species_id: &str) -> Option<String>;
}

#[derive(Default)]
struct DirectoryData {
    /// facility id -> organization id
    facilities: HashMap<String, String>,
    /// species id -> scientific name
    species: HashMap<String, String>,
}

/// In-memory directory implementation.
#[derive(Default)]
pub struct InMemoryFacilityDirectory {
    data: Mutex<DirectoryData>,
}

impl InMemoryFacilityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_facility(&self, facility_id: &str, organization_id: &str) {
        self.lock()
            .facilities
            .insert(facility_id.to_string(), organization_id.to_string());
    }

    pub fn add_species(&self, species_id: &str, name: &str) {
        self.lock()
            .species
            .insert(species_id.to_string(), name.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FacilityDirectory for InMemoryFacilityDirectory {
    fn facility_exists(&self, facility_id: &str) -> bool {
        self.lock().facilities.contains_key(facility_id)
    }

    fn organization_facilities(&self, organization_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .facilities
            .iter()
            .filter(|(_, org)| org.as_str() == organization_id)
            .map(|(facility, _)| facility.clone())
            .collect();
        ids.sort();
        ids
    }

    fn species_name(&self, species_id: &str) -> Option<String> {
        self.lock().species.get(species_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_lookups() {
        let directory = InMemoryFacilityDirectory::new();
        directory.add_facility("fac1", "org1");
        directory.add_facility("fac2", "org1");
        directory.add_facility("fac3", "org2");
        directory.add_species("sp1", "Acacia koa");

        assert!(directory.facility_exists("fac1"));
        assert!(!directory.facility_exists("nope"));
        assert_eq!(
            directory.organization_facilities("org1"),
            vec!["fac1".to_string(), "fac2".to_string()]
        );
        assert!(directory.organization_facilities("org3").is_empty());
        assert_eq!(directory.species_name("sp1").as_deref(), Some("Acacia koa"));
        assert_eq!(directory.species_name("sp2"), None);
    }
}
