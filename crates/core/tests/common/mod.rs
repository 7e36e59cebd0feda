#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use orderly_core::{
    CompendiumItem, CompliancePolicy, CoreConfig, Facility, InMemoryDirectory, IssuedSession,
    ManualClock, MinimumLengthVerifier, NewOrder, Order, OrderService, Patient, Priority,
    SignRequest, Signer, Store, StoreLimits, TransportKind,
};
use orderly_files::FilesService;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const FACILITY: u64 = 1;
pub const CLOSED_FACILITY: u64 = 2;
pub const MEDICARE_PATIENT: u64 = 10;
pub const COMMERCIAL_PATIENT: u64 = 11;
pub const SIGNER: u64 = 3;
pub const OTHER_SIGNER: u64 = 4;

pub const CBC: u64 = 7;
pub const LIPID: u64 = 8;
pub const GENETIC_PANEL: u64 = 9;
pub const RETIRED_TEST: u64 = 12;

/// PNG magic followed by padding, enough for media-type sniffing.
pub const SIGNATURE_PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

pub struct Harness {
    pub service: OrderService,
    pub clock: Arc<ManualClock>,
    pub artifact_root: PathBuf,
    _temp: TempDir,
}

pub fn directory() -> InMemoryDirectory {
    let item = |id, code: &str, name: &str, active| CompendiumItem {
        id,
        facility_id: FACILITY,
        code: code.into(),
        name: name.into(),
        loinc: None,
        cpt: None,
        active,
    };

    InMemoryDirectory::new()
        .with_facility(Facility {
            id: FACILITY,
            name: "Quest Downtown".into(),
            active: true,
            transport: TransportKind::Hl7,
        })
        .with_facility(Facility {
            id: CLOSED_FACILITY,
            name: "Closed Lab".into(),
            active: false,
            transport: TransportKind::Fax,
        })
        .with_patient(Patient {
            id: MEDICARE_PATIENT,
            name: "Jo Bloggs".into(),
            primary_payer: Some("Medicare Part B".into()),
        })
        .with_patient(Patient {
            id: COMMERCIAL_PATIENT,
            name: "Sam Smith".into(),
            primary_payer: Some("Blue Cross PPO".into()),
        })
        .with_signer(Signer {
            id: SIGNER,
            display_name: "Dr Ada Lovelace".into(),
            active: true,
        })
        .with_signer(Signer {
            id: OTHER_SIGNER,
            display_name: "Dr Grace Hopper".into(),
            active: true,
        })
        .with_compendium_item(item(CBC, "CBC", "Complete Blood Count", true))
        .with_compendium_item(item(LIPID, "LIPID", "Lipid Profile", true))
        .with_compendium_item(item(
            GENETIC_PANEL,
            "GENP",
            "Comprehensive Genetic Panel",
            true,
        ))
        .with_compendium_item(item(RETIRED_TEST, "OLD", "Retired Assay", false))
        .with_policy(CompliancePolicy {
            facility_id: FACILITY,
            test_code_pattern: "GEN%".into(),
            payer_type: "medicare".into(),
            requires_notice: true,
            reason: "Genetic testing frequency limits".into(),
        })
}

pub fn harness() -> Harness {
    harness_with_limits(StoreLimits::default())
}

pub fn harness_with_limits(limits: StoreLimits) -> Harness {
    let temp = TempDir::new().unwrap();
    let config = Arc::new(CoreConfig::new(temp.path().to_path_buf()).unwrap());
    let files = FilesService::new(&config.artifacts_dir()).unwrap();
    let artifact_root = files.root_directory().to_path_buf();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 11, 14, 35, 0).unwrap(),
    ));

    let service = OrderService::new(
        config,
        Arc::new(Store::in_memory(limits)),
        Arc::new(files),
        Arc::new(directory()),
        Arc::new(MinimumLengthVerifier),
        clock.clone(),
    );

    Harness {
        service,
        clock,
        artifact_root,
        _temp: temp,
    }
}

pub fn new_order(tests: Vec<u64>, icd10: &[&str]) -> NewOrder {
    NewOrder {
        patient_id: COMMERCIAL_PATIENT,
        facility_id: FACILITY,
        signer_id: SIGNER,
        priority: Priority::Routine,
        test_ids: tests,
        icd10_codes: icd10.iter().map(|c| (*c).to_owned()).collect(),
        notes: None,
    }
}

impl Harness {
    pub fn create(&self, tests: Vec<u64>, icd10: &[&str]) -> Order {
        self.service.create_order(new_order(tests, icd10)).unwrap().order
    }

    pub fn login(&self, signer_id: u64) -> IssuedSession {
        self.service
            .authenticate(signer_id, "4821", "10.0.0.1")
            .unwrap()
    }

    pub fn sign_request(&self, order: &Order, session: &IssuedSession) -> SignRequest {
        SignRequest {
            order_id: order.id,
            signer_id: session.signer_id,
            token: session.token.clone(),
            signature: SIGNATURE_PNG.to_vec(),
            ip_address: "10.0.0.1".into(),
            user_agent: Some("orderly-tests".into()),
        }
    }
}
