//! The order service: lifecycle transitions, signing and the public entry points.
//!
//! Every mutating operation runs inside one [`Store::transaction`]. Business rules are checked
//! against the transaction's view of the order before anything is written, so a rejected
//! call leaves no trace, and two callers racing on the same order serialise with exactly one
//! of them seeing the pre-transition status.

use crate::audit::AuditLog;
use crate::clock::{Clock, SystemClock};
use crate::compliance::{ComplianceAssessment, ComplianceEvaluator, ComplianceTest, PatientInsurance};
use crate::config::CoreConfig;
use crate::constants::{ORDER_NUMBER_ATTEMPTS, ORDER_NUMBER_PREFIX};
use crate::directory::{CompendiumItem, ReferenceDirectory};
use crate::error::Resource;
use crate::events::{Event, EventPayload, StatusChange};
use crate::order::{
    CompendiumId, CompletenessReport, FacilityId, Order, OrderStatus, OrderTest, PatientId,
    Priority, SignerId,
};
use crate::session::{CredentialVerifier, IssuedSession, SessionManager};
use crate::signature::{SignatureRecord, SignatureService, SignatureVerification};
use crate::store::{Store, StoreError, Transaction};
use crate::validation::{optional_text, parse_icd10_codes, require_text};
use crate::{OrderError, OrderResult};
use chrono::{DateTime, Utc};
use orderly_files::{ArtifactStore, FilesService};
use orderly_ids::ShardableUuid;
use orderly_types::NonEmptyText;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input to [`OrderService::create_order`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewOrder {
    pub patient_id: PatientId,
    pub facility_id: FacilityId,
    pub signer_id: SignerId,
    #[serde(default)]
    pub priority: Priority,
    pub test_ids: Vec<CompendiumId>,
    #[serde(default)]
    pub icd10_codes: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatedOrder {
    pub order: Order,
    /// Informational at creation; enforced again when the order is signed.
    pub compliance: ComplianceAssessment,
}

/// Partial update for a draft or signed order. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderPatch {
    pub priority: Option<Priority>,
    pub test_ids: Option<Vec<CompendiumId>>,
    pub icd10_codes: Option<Vec<String>>,
    pub notes: Option<String>,
    pub actor_id: Option<SignerId>,
}

#[derive(Clone, Debug)]
pub struct SignRequest {
    pub order_id: ShardableUuid,
    pub signer_id: SignerId,
    pub token: String,
    /// Raw image bytes or a base64 data URL.
    pub signature: Vec<u8>,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct StatusMetadata {
    pub reason: Option<String>,
    pub note: Option<String>,
    pub external_reference: Option<String>,
    pub actor_id: Option<SignerId>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OrderFilter {
    pub facility_id: Option<FacilityId>,
    pub patient_id: Option<PatientId>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    fn matches(&self, order: &Order) -> bool {
        self.facility_id.map_or(true, |id| id == order.facility_id)
            && self.patient_id.map_or(true, |id| id == order.patient_id)
            && self.status.map_or(true, |status| status == order.status)
    }
}

#[derive(Debug, Clone)]
pub struct OrderService {
    config: Arc<CoreConfig>,
    store: Arc<Store>,
    directory: Arc<dyn ReferenceDirectory>,
    clock: Arc<dyn Clock>,
    evaluator: ComplianceEvaluator,
    sessions: SessionManager,
    signatures: SignatureService,
    audit: AuditLog,
}

impl OrderService {
    pub fn new(
        config: Arc<CoreConfig>,
        store: Arc<Store>,
        files: Arc<dyn ArtifactStore>,
        directory: Arc<dyn ReferenceDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionManager::new(
            store.clone(),
            directory.clone(),
            verifier,
            clock.clone(),
            config.clone(),
        );
        let signatures = SignatureService::new(files, store.clone(), config.max_artifact_bytes());
        let audit = AuditLog::new(store.clone(), clock.clone());
        let evaluator = ComplianceEvaluator::new(config.high_cost_keywords().to_vec());

        Self {
            config,
            store,
            directory,
            clock,
            evaluator,
            sessions,
            signatures,
            audit,
        }
    }

    /// Opens the file-backed store and artifact directory under the configured data
    /// directory, using the system clock.
    pub fn open(
        config: Arc<CoreConfig>,
        directory: Arc<dyn ReferenceDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> OrderResult<Self> {
        let store = Store::open(&config.store_path(), config.store_limits())?;
        let files = FilesService::new(&config.artifacts_dir())?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(files),
            directory,
            verifier,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a draft order.
    ///
    /// The compliance assessment is returned alongside the order but does not block
    /// creation.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown facility or patient
    /// - `Validation` for an inactive facility, a missing signer, no tests, a test that is not
    ///   an active compendium entry of the facility, or a malformed ICD-10 code
    pub fn create_order(&self, new: NewOrder) -> OrderResult<CreatedOrder> {
        let facility = self
            .directory
            .facility(new.facility_id)
            .ok_or(OrderError::NotFound(Resource::Facility(new.facility_id)))?;
        if !facility.active {
            return Err(OrderError::Validation(format!(
                "facility {} is not active",
                facility.id
            )));
        }
        let patient = self
            .directory
            .patient(new.patient_id)
            .ok_or(OrderError::NotFound(Resource::Patient(new.patient_id)))?;
        if new.signer_id == 0 {
            return Err(OrderError::Validation("requesting signer is required".into()));
        }

        let items = self.resolve_tests(new.facility_id, &new.test_ids)?;
        let icd10_codes = parse_icd10_codes(&new.icd10_codes)?;
        let notes = optional_text("notes", new.notes.as_deref())?;

        let compliance = self.evaluator.evaluate(
            &PatientInsurance::new(patient.primary_payer),
            &self.directory.compliance_policies(new.facility_id),
            &items.iter().map(ComplianceTest::from).collect::<Vec<_>>(),
        );
        let tests = items
            .iter()
            .map(order_test_from)
            .collect::<OrderResult<Vec<_>>>()?;

        let order = self.store.transaction(|tx| {
            let now = self.now();
            let order = Order {
                id: ShardableUuid::new(),
                order_number: unused_order_number(tx, now)?,
                patient_id: new.patient_id,
                facility_id: new.facility_id,
                signer_id: new.signer_id,
                status: OrderStatus::Draft,
                priority: new.priority,
                tests,
                icd10_codes,
                compliance_notice_signed: false,
                compliance_artifact_path: None,
                notes,
                created_at: now,
                sent_at: None,
                ack_at: None,
                final_at: None,
                updated_at: now,
            };
            tx.insert_order(order.clone())?;
            self.audit.append_in(
                tx,
                Some(order.id),
                EventPayload::OrderCreated {
                    order_number: order.order_number.clone(),
                    priority: order.priority,
                    test_count: order.tests.len(),
                    compliance_required: compliance.required,
                    compliance_reasons: compliance.reasons.clone(),
                },
                Some(order.signer_id),
            );
            Ok::<_, OrderError>(order)
        })?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            compliance_required = compliance.required,
            "order created"
        );
        Ok(CreatedOrder { order, compliance })
    }

    /// Applies a partial update while the order is still `draft` or `signed`.
    ///
    /// Compliance is not re-evaluated here; the signing precondition evaluates it afresh.
    pub fn update_order(&self, order_id: &ShardableUuid, patch: OrderPatch) -> OrderResult<Order> {
        let notes = optional_text("notes", patch.notes.as_deref())?;
        let icd10_codes = patch
            .icd10_codes
            .as_deref()
            .map(parse_icd10_codes)
            .transpose()?;

        self.store.transaction(|tx| {
            let mut order = existing_order(tx, order_id)?;
            if !order.status.is_editable() {
                return Err(OrderError::OrderNotEditable(order.status));
            }

            let mut changed = Vec::new();
            if let Some(priority) = patch.priority.filter(|p| *p != order.priority) {
                order.priority = priority;
                changed.push("priority".to_owned());
            }
            if let Some(test_ids) = &patch.test_ids {
                let tests = self
                    .resolve_tests(order.facility_id, test_ids)?
                    .iter()
                    .map(order_test_from)
                    .collect::<OrderResult<Vec<_>>>()?;
                if tests != order.tests {
                    order.tests = tests;
                    changed.push("tests".to_owned());
                }
            }
            if let Some(codes) = icd10_codes.filter(|c| *c != order.icd10_codes) {
                order.icd10_codes = codes;
                changed.push("icd10_codes".to_owned());
            }
            if patch.notes.is_some() && notes != order.notes {
                order.notes = notes;
                changed.push("notes".to_owned());
            }

            if changed.is_empty() {
                return Ok(order);
            }
            order.updated_at = self.now();
            tx.update_order(order.clone())?;
            self.audit.append_in(
                tx,
                Some(order.id),
                EventPayload::OrderUpdated {
                    changed_fields: changed,
                },
                patch.actor_id,
            );
            tracing::info!(order_id = %order.id, "order updated");
            Ok(order)
        })
    }

    /// Captures a signed Advance Beneficiary Notice for a draft order.
    pub fn sign_compliance_notice(
        &self,
        order_id: &ShardableUuid,
        artifact: &[u8],
        actor_id: Option<SignerId>,
    ) -> OrderResult<Order> {
        self.store.transaction(|tx| {
            let mut order = existing_order(tx, order_id)?;
            if order.status != OrderStatus::Draft {
                return Err(OrderError::OrderNotEditable(order.status));
            }

            let captured = self.signatures.capture(order_id, artifact)?;
            order.compliance_notice_signed = true;
            order.compliance_artifact_path = Some(captured.path.clone());
            order.updated_at = self.now();
            tx.update_order(order.clone())?;
            self.audit.append_in(
                tx,
                Some(order.id),
                EventPayload::AbnSigned {
                    artifact_path: captured.path,
                    content_hash: captured.hash,
                },
                actor_id,
            );
            tracing::info!(order_id = %order.id, "compliance notice captured");
            Ok(order)
        })
    }

    /// Signs a draft order with the signer's session token.
    ///
    /// Session check, completeness gating, signature capture, the status change, the
    /// `order_signed` event and consumption of the token happen in one transaction.
    ///
    /// # Errors
    ///
    /// `InvalidSession`, `NotFound`, `InvalidTransition` (not `draft`),
    /// `NotAuthorizedSigner`, `IncompleteOrder` (listing every missing item), `Validation`
    /// for a bad artifact, or a storage error.
    pub fn sign_order(&self, request: SignRequest) -> OrderResult<SignatureRecord> {
        let result = self.store.transaction(|tx| self.sign_in(tx, &request));

        match &result {
            Ok(record) => tracing::info!(
                order_id = %record.order_id,
                signer_id = record.signer_id,
                signature_id = record.signature_id(),
                "order signed"
            ),
            Err(e) => tracing::warn!(
                order_id = %request.order_id,
                signer_id = request.signer_id,
                code = e.code(),
                error = %e,
                "signing rejected"
            ),
        }
        result
    }

    fn sign_in(&self, tx: &mut Transaction, request: &SignRequest) -> OrderResult<SignatureRecord> {
        if !self
            .sessions
            .validate_in(tx, &request.token, request.signer_id)
        {
            return Err(OrderError::InvalidSession);
        }
        let order = existing_order(tx, &request.order_id)?;
        if order.status != OrderStatus::Draft {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Signed,
            });
        }
        if order.signer_id != request.signer_id {
            return Err(OrderError::NotAuthorizedSigner {
                order: order.id,
                signer: request.signer_id,
            });
        }

        let notice_required = self.notice_required(&order).required;
        let completeness = CompletenessReport::for_order(&order, notice_required);
        if !completeness.is_complete() {
            return Err(OrderError::IncompleteOrder(completeness.missing));
        }

        let captured = self.signatures.capture(&order.id, &request.signature)?;
        let now = self.now();
        tx.transition_status(&order.id, OrderStatus::Draft, OrderStatus::Signed, now)?;

        let record = SignatureRecord {
            order_id: order.id,
            signer_id: request.signer_id,
            signer_name: self
                .directory
                .signer(request.signer_id)
                .map(|s| s.display_name)
                .unwrap_or_else(|| format!("signer {}", request.signer_id)),
            artifact_path: captured.path,
            content_hash: captured.hash,
            media_type: captured.media_type,
            signed_at: now,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        };
        // Only copy of the signature record; a failed append aborts signing.
        tx.append_event(
            Some(order.id),
            EventPayload::OrderSigned {
                signature: record.clone(),
                completeness,
            },
            Some(request.signer_id),
            now,
        )?;
        self.sessions.invalidate_in(tx, &request.token);
        Ok(record)
    }

    /// Moves an order along the lifecycle after signing.
    ///
    /// # Errors
    ///
    /// `Validation` when asked to move to `signed` (use [`Self::sign_order`]), `NotFound`,
    /// or `InvalidTransition` for an edge the lifecycle does not allow.
    pub fn update_status(
        &self,
        order_id: &ShardableUuid,
        new_status: OrderStatus,
        metadata: StatusMetadata,
    ) -> OrderResult<Order> {
        if new_status == OrderStatus::Signed {
            return Err(OrderError::Validation(
                "orders can only be signed through sign_order".into(),
            ));
        }
        let reason = optional_text("reason", metadata.reason.as_deref())?;
        let note = optional_text("note", metadata.note.as_deref())?;
        let external_reference =
            optional_text("external_reference", metadata.external_reference.as_deref())?;

        let order = self.store.transaction(|tx| {
            let current = existing_order(tx, order_id)?;
            current.status.ensure_transition(new_status)?;

            let updated =
                tx.transition_status(order_id, current.status, new_status, self.now())?;
            self.audit.append_in(
                tx,
                Some(updated.id),
                EventPayload::for_status_change(StatusChange {
                    from: current.status,
                    to: new_status,
                    reason,
                    note,
                    external_reference,
                }),
                metadata.actor_id,
            );
            Ok::<_, OrderError>(updated)
        })?;

        tracing::info!(order_id = %order.id, status = %order.status, "order status changed");
        Ok(order)
    }

    /// Cancels an order that has not reached `final`.
    pub fn cancel_order(
        &self,
        order_id: &ShardableUuid,
        reason: &str,
        actor_id: Option<SignerId>,
    ) -> OrderResult<Order> {
        let reason = require_text("cancellation reason", reason)?;
        self.update_status(
            order_id,
            OrderStatus::Canceled,
            StatusMetadata {
                reason: Some(reason),
                actor_id,
                ..StatusMetadata::default()
            },
        )
    }

    pub fn get_order(&self, order_id: &ShardableUuid) -> OrderResult<Order> {
        self.store
            .read(|state| state.order(order_id).cloned())?
            .ok_or(OrderError::NotFound(Resource::Order(*order_id)))
    }

    /// The order's events, oldest first.
    pub fn get_order_timeline(&self, order_id: &ShardableUuid) -> OrderResult<Vec<Event>> {
        let (exists, events) = self.store.read(|state| {
            (
                state.order(order_id).is_some(),
                state.events_for_order(order_id),
            )
        })?;
        if !exists {
            return Err(OrderError::NotFound(Resource::Order(*order_id)));
        }
        Ok(events)
    }

    /// Evaluates whether ordering `test_ids` for a patient at a facility needs a notice.
    pub fn check_compliance_requirement(
        &self,
        patient_id: PatientId,
        facility_id: FacilityId,
        test_ids: &[CompendiumId],
    ) -> OrderResult<ComplianceAssessment> {
        let patient = self
            .directory
            .patient(patient_id)
            .ok_or(OrderError::NotFound(Resource::Patient(patient_id)))?;
        if self.directory.facility(facility_id).is_none() {
            return Err(OrderError::NotFound(Resource::Facility(facility_id)));
        }
        let items = self.resolve_tests(facility_id, test_ids)?;

        Ok(self.evaluator.evaluate(
            &PatientInsurance::new(patient.primary_payer),
            &self.directory.compliance_policies(facility_id),
            &items.iter().map(ComplianceTest::from).collect::<Vec<_>>(),
        ))
    }

    /// Orders matching `filter`, oldest first.
    pub fn list_orders(&self, filter: OrderFilter) -> OrderResult<Vec<Order>> {
        let mut orders = self.store.read(|state| {
            state
                .orders()
                .filter(|order| filter.matches(order))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orders)
    }

    pub fn verify_signature(&self, order_id: &ShardableUuid) -> OrderResult<SignatureVerification> {
        self.signatures.verify(order_id)
    }

    pub fn authenticate(
        &self,
        signer_id: SignerId,
        credential: &str,
        source_ip: &str,
    ) -> OrderResult<IssuedSession> {
        self.sessions.authenticate(signer_id, credential, source_ip)
    }

    /// Evaluates the notice requirement for the tests currently on an order.
    fn notice_required(&self, order: &Order) -> ComplianceAssessment {
        let insurance = self
            .directory
            .patient(order.patient_id)
            .map(|p| PatientInsurance::new(p.primary_payer))
            .unwrap_or_default();
        self.evaluator.evaluate(
            &insurance,
            &self.directory.compliance_policies(order.facility_id),
            &order.tests.iter().map(ComplianceTest::from).collect::<Vec<_>>(),
        )
    }

    fn resolve_tests(
        &self,
        facility_id: FacilityId,
        test_ids: &[CompendiumId],
    ) -> OrderResult<Vec<CompendiumItem>> {
        if test_ids.is_empty() {
            return Err(OrderError::Validation(
                "at least one test is required".into(),
            ));
        }
        test_ids
            .iter()
            .map(|id| {
                self.directory
                    .compendium_item(facility_id, *id)
                    .filter(|item| item.active)
                    .ok_or_else(|| {
                        OrderError::Validation(format!(
                            "test {id} is not an active compendium entry for facility {facility_id}"
                        ))
                    })
            })
            .collect()
    }
}

fn existing_order(tx: &Transaction, order_id: &ShardableUuid) -> OrderResult<Order> {
    tx.order(order_id)
        .cloned()
        .ok_or(OrderError::NotFound(Resource::Order(*order_id)))
}

fn order_test_from(item: &CompendiumItem) -> OrderResult<OrderTest> {
    let text = |field: &str, value: &str| {
        NonEmptyText::new(value).map_err(|_| {
            OrderError::Validation(format!("compendium item {} has an empty {field}", item.id))
        })
    };
    Ok(OrderTest {
        compendium_id: item.id,
        code: text("code", &item.code)?,
        name: text("name", &item.name)?,
        loinc_code: item.loinc.clone(),
        cpt_code: item.cpt.clone(),
    })
}

/// `ORD-YYYYMMDD-XXXXXX` with six uppercase alphanumerics.
fn generate_order_number(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{ORDER_NUMBER_PREFIX}-{}-{suffix}", now.format("%Y%m%d"))
}

fn unused_order_number(tx: &Transaction, now: DateTime<Utc>) -> OrderResult<String> {
    let mut candidate = generate_order_number(now);
    for _ in 1..ORDER_NUMBER_ATTEMPTS {
        if !tx.order_number_exists(&candidate) {
            return Ok(candidate);
        }
        candidate = generate_order_number(now);
    }
    if tx.order_number_exists(&candidate) {
        return Err(StoreError::DuplicateOrderNumber(candidate).into());
    }
    Ok(candidate)
}
