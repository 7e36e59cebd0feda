//! Order records and the legal-transition table.
//!
//! An [`Order`] is created in [`OrderStatus::Draft`] and only ever moves along the edges
//! returned by [`OrderStatus::allowed_targets`]:
//!
//! ```text
//! draft → signed → sent → ack → in_progress → {partial | final} → corrected
//!   └──────┴───────┴──────┴────────┴──────────────┘ → canceled
//! ```
//!
//! `final` can only be corrected. `corrected` and `canceled` are terminal. Orders are never
//! deleted; terminal orders stay in the store for audit.

use crate::error::OrderError;
use chrono::{DateTime, Utc};
use orderly_ids::ShardableUuid;
use orderly_types::{Icd10Code, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PatientId = u64;
pub type FacilityId = u64;
pub type SignerId = u64;
pub type CompendiumId = u64;

/// Lifecycle status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Signed,
    Sent,
    Ack,
    InProgress,
    Partial,
    Final,
    Corrected,
    Canceled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::Draft,
        OrderStatus::Signed,
        OrderStatus::Sent,
        OrderStatus::Ack,
        OrderStatus::InProgress,
        OrderStatus::Partial,
        OrderStatus::Final,
        OrderStatus::Corrected,
        OrderStatus::Canceled,
    ];

    /// Targets reachable from this status in one step.
    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Draft => &[Signed, Canceled],
            Signed => &[Sent, Canceled],
            Sent => &[Ack, Canceled],
            Ack => &[InProgress, Canceled],
            InProgress => &[Partial, Final, Canceled],
            Partial => &[Final, Corrected, Canceled],
            Final => &[Corrected],
            Corrected | Canceled => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Returns an `InvalidTransition` error unless `target` is reachable.
    pub fn ensure_transition(self, target: OrderStatus) -> Result<(), OrderError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Orders may be edited only before they are sent.
    pub fn is_editable(self) -> bool {
        matches!(self, OrderStatus::Draft | OrderStatus::Signed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Signed => "signed",
            OrderStatus::Sent => "sent",
            OrderStatus::Ack => "ack",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Partial => "partial",
            OrderStatus::Final => "final",
            OrderStatus::Corrected => "corrected",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| OrderError::Validation(format!("unknown order status '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Routine => "routine",
            Priority::Urgent => "urgent",
            Priority::Stat => "stat",
        })
    }
}

impl FromStr for Priority {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "routine" => Ok(Priority::Routine),
            "urgent" => Ok(Priority::Urgent),
            "stat" => Ok(Priority::Stat),
            other => Err(OrderError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// One requested test line, copied from the facility compendium when attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTest {
    pub compendium_id: CompendiumId,
    pub code: NonEmptyText,
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loinc_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpt_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: ShardableUuid,
    pub order_number: String,
    pub patient_id: PatientId,
    pub facility_id: FacilityId,
    pub signer_id: SignerId,
    pub status: OrderStatus,
    pub priority: Priority,
    pub tests: Vec<OrderTest>,
    pub icd10_codes: Vec<Icd10Code>,
    pub compliance_notice_signed: bool,
    pub compliance_artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ack_at: Option<DateTime<Utc>>,
    pub final_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A precondition that blocks signing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingItem {
    Patient,
    Facility,
    Signer,
    Tests,
    DiagnosisCodes,
    ComplianceNotice,
}

impl fmt::Display for MissingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingItem::Patient => "patient is required",
            MissingItem::Facility => "facility is required",
            MissingItem::Signer => "requesting signer is required",
            MissingItem::Tests => "at least one test is required",
            MissingItem::DiagnosisCodes => "at least one ICD-10 code is required",
            MissingItem::ComplianceNotice => "signed compliance notice (ABN) is required",
        })
    }
}

/// Snapshot of the completeness check taken at signing time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub has_patient: bool,
    pub has_facility: bool,
    pub has_signer: bool,
    pub test_count: usize,
    pub diagnosis_count: usize,
    pub notice_required: bool,
    pub notice_signed: bool,
    pub missing: Vec<MissingItem>,
}

impl CompletenessReport {
    /// Evaluates every precondition and records all that fail.
    pub fn for_order(order: &Order, notice_required: bool) -> Self {
        let has_patient = order.patient_id > 0;
        let has_facility = order.facility_id > 0;
        let has_signer = order.signer_id > 0;

        let mut missing = Vec::new();
        if !has_patient {
            missing.push(MissingItem::Patient);
        }
        if !has_facility {
            missing.push(MissingItem::Facility);
        }
        if !has_signer {
            missing.push(MissingItem::Signer);
        }
        if order.tests.is_empty() {
            missing.push(MissingItem::Tests);
        }
        if order.icd10_codes.is_empty() {
            missing.push(MissingItem::DiagnosisCodes);
        }
        if notice_required && !order.compliance_notice_signed {
            missing.push(MissingItem::ComplianceNotice);
        }

        Self {
            has_patient,
            has_facility,
            has_signer,
            test_count: order.tests.len(),
            diagnosis_count: order.icd10_codes.len(),
            notice_required,
            notice_signed: order.compliance_notice_signed,
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}
