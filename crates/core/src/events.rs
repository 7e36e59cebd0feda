//! Typed audit events.
//!
//! Every event carries one [`EventPayload`] variant; the variant name is the event type and
//! its fields are that type's payload schema. Stored documents look like:
//!
//! ```json
//! { "id": "20260111T143522.045Z-…", "order_id": "…", "actor_id": 3,
//!   "created_at": "…", "payload": { "event_type": "order_sent", … } }
//! ```

use crate::order::{CompletenessReport, OrderStatus, Priority, SignerId};
use crate::signature::SignatureRecord;
use chrono::{DateTime, Utc};
use orderly_ids::{ShardableUuid, TimestampId};
use orderly_types::Sha256Hash;
use serde::{Deserialize, Serialize};

pub type EventId = TimestampId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// `None` for signer-level events such as authentication.
    pub order_id: Option<ShardableUuid>,
    pub actor_id: Option<SignerId>,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    OrderCreated {
        order_number: String,
        priority: Priority,
        test_count: usize,
        compliance_required: bool,
        compliance_reasons: Vec<String>,
    },
    OrderUpdated {
        changed_fields: Vec<String>,
    },
    OrderSigned {
        signature: SignatureRecord,
        completeness: CompletenessReport,
    },
    OrderSent(StatusChange),
    OrderAck(StatusChange),
    ResultReceived(StatusChange),
    OrderCanceled(StatusChange),
    StatusChanged(StatusChange),
    AbnSigned {
        artifact_path: String,
        content_hash: Sha256Hash,
    },
    AuthSession {
        signer_id: SignerId,
        ip_address: String,
        expires_at: DateTime<Utc>,
        derived: bool,
    },
    AuthFailed {
        signer_id: SignerId,
        ip_address: String,
        reason: AuthFailureReason,
    },
    BatchSigned {
        total: usize,
        signed: usize,
        failed: usize,
        order_ids: Vec<ShardableUuid>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::OrderCreated { .. } => "order_created",
            EventPayload::OrderUpdated { .. } => "order_updated",
            EventPayload::OrderSigned { .. } => "order_signed",
            EventPayload::OrderSent(_) => "order_sent",
            EventPayload::OrderAck(_) => "order_ack",
            EventPayload::ResultReceived(_) => "result_received",
            EventPayload::OrderCanceled(_) => "order_canceled",
            EventPayload::StatusChanged(_) => "status_changed",
            EventPayload::AbnSigned { .. } => "abn_signed",
            EventPayload::AuthSession { .. } => "auth_session",
            EventPayload::AuthFailed { .. } => "auth_failed",
            EventPayload::BatchSigned { .. } => "batch_signed",
        }
    }

    /// Builds the event for a status change, choosing the type from the target status.
    pub fn for_status_change(change: StatusChange) -> Self {
        match change.to {
            OrderStatus::Sent => EventPayload::OrderSent(change),
            OrderStatus::Ack => EventPayload::OrderAck(change),
            OrderStatus::Final | OrderStatus::Corrected => EventPayload::ResultReceived(change),
            OrderStatus::Canceled => EventPayload::OrderCanceled(change),
            _ => EventPayload::StatusChanged(change),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    CredentialTooShort,
    InvalidCredential,
    UnknownSigner,
    InactiveSigner,
    RateLimited,
}
