//! Reference data the order lifecycle reads but never writes.
//!
//! Facilities, patients, signers, compendium entries and compliance policies are owned by
//! other systems. The core only needs lookups, expressed by [`ReferenceDirectory`].
//! [`InMemoryDirectory`] is the reference implementation, built in code for tests or loaded
//! from a YAML document by binaries:
//!
//! ```yaml
//! facilities:
//!   - { id: 1, name: Quest Downtown, active: true, transport: hl7 }
//! patients:
//!   - { id: 10, name: Jo Bloggs, primary_payer: Medicare Part B }
//! signers:
//!   - { id: 3, display_name: Dr Ada Lovelace, active: true }
//! compendium:
//!   - { id: 100, facility_id: 1, code: CBC, name: Complete Blood Count, active: true }
//! policies:
//!   - { facility_id: 1, test_code_pattern: "GEN%", payer_type: medicare,
//!       requires_notice: true, reason: Genetic testing frequency limits }
//! ```

use crate::compliance::CompliancePolicy;
use crate::order::{CompendiumId, FacilityId, PatientId, SignerId};
use crate::{OrderError, OrderResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// How a facility receives orders. Recorded only; outbound delivery lives elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Fax,
    Sftp,
    Hl7,
    Fhir,
    #[default]
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    /// Display name of the primary payer, e.g. "Medicare Part B".
    #[serde(default)]
    pub primary_payer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub id: SignerId,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// One orderable test in a facility's catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompendiumItem {
    pub id: CompendiumId,
    pub facility_id: FacilityId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub loinc: Option<String>,
    #[serde(default)]
    pub cpt: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Read-only lookups against reference data.
pub trait ReferenceDirectory: Send + Sync + Debug {
    fn facility(&self, id: FacilityId) -> Option<Facility>;

    fn patient(&self, id: PatientId) -> Option<Patient>;

    fn signer(&self, id: SignerId) -> Option<Signer>;

    /// The compendium entry `id`, only if it belongs to `facility_id`.
    fn compendium_item(&self, facility_id: FacilityId, id: CompendiumId) -> Option<CompendiumItem>;

    fn compliance_policies(&self, facility_id: FacilityId) -> Vec<CompliancePolicy>;
}

/// Serialised form of an [`InMemoryDirectory`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectoryDocument {
    #[serde(default)]
    facilities: Vec<Facility>,
    #[serde(default)]
    patients: Vec<Patient>,
    #[serde(default)]
    signers: Vec<Signer>,
    #[serde(default)]
    compendium: Vec<CompendiumItem>,
    #[serde(default)]
    policies: Vec<CompliancePolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    facilities: BTreeMap<FacilityId, Facility>,
    patients: BTreeMap<PatientId, Patient>,
    signers: BTreeMap<SignerId, Signer>,
    compendium: BTreeMap<CompendiumId, CompendiumItem>,
    policies: Vec<CompliancePolicy>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facilities.insert(facility.id, facility);
        self
    }

    pub fn with_patient(mut self, patient: Patient) -> Self {
        self.patients.insert(patient.id, patient);
        self
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signers.insert(signer.id, signer);
        self
    }

    pub fn with_compendium_item(mut self, item: CompendiumItem) -> Self {
        self.compendium.insert(item.id, item);
        self
    }

    pub fn with_policy(mut self, policy: CompliancePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Parses a YAML directory document.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Validation` if the YAML is malformed or contains duplicate ids.
    pub fn from_yaml_str(yaml: &str) -> OrderResult<Self> {
        let doc: DirectoryDocument = serde_yaml::from_str(yaml)
            .map_err(|e| OrderError::Validation(format!("invalid directory document: {e}")))?;

        let mut directory = Self::new();
        for facility in doc.facilities {
            if directory.facilities.contains_key(&facility.id) {
                return Err(duplicate("facility", facility.id));
            }
            directory = directory.with_facility(facility);
        }
        for patient in doc.patients {
            if directory.patients.contains_key(&patient.id) {
                return Err(duplicate("patient", patient.id));
            }
            directory = directory.with_patient(patient);
        }
        for signer in doc.signers {
            if directory.signers.contains_key(&signer.id) {
                return Err(duplicate("signer", signer.id));
            }
            directory = directory.with_signer(signer);
        }
        for item in doc.compendium {
            if directory.compendium.contains_key(&item.id) {
                return Err(duplicate("compendium item", item.id));
            }
            directory = directory.with_compendium_item(item);
        }
        directory.policies = doc.policies;

        Ok(directory)
    }

    /// Reads and parses a YAML directory document from disk.
    pub fn load(path: &Path) -> OrderResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            OrderError::Validation(format!(
                "failed to read directory file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

fn duplicate(kind: &str, id: u64) -> OrderError {
    OrderError::Validation(format!("duplicate {kind} id {id} in directory document"))
}

impl ReferenceDirectory for InMemoryDirectory {
    fn facility(&self, id: FacilityId) -> Option<Facility> {
        self.facilities.get(&id).cloned()
    }

    fn patient(&self, id: PatientId) -> Option<Patient> {
        self.patients.get(&id).cloned()
    }

    fn signer(&self, id: SignerId) -> Option<Signer> {
        self.signers.get(&id).cloned()
    }

    fn compendium_item(&self, facility_id: FacilityId, id: CompendiumId) -> Option<CompendiumItem> {
        self.compendium
            .get(&id)
            .filter(|item| item.facility_id == facility_id)
            .cloned()
    }

    fn compliance_policies(&self, facility_id: FacilityId) -> Vec<CompliancePolicy> {
        self.policies
            .iter()
            .filter(|policy| policy.facility_id == facility_id)
            .cloned()
            .collect()
    }
}
