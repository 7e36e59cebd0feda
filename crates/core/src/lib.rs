//! # Orderly Core
//!
//! Clinical order lifecycle and signature integrity.
//!
//! This crate owns the business rules for laboratory orders from draft to result:
//! - the order status state machine and completeness gating before signing
//! - short-lived signer sessions with throttling of failed attempts
//! - signature capture into content-addressed storage and later integrity checks
//! - Advance Beneficiary Notice (ABN) determination
//! - an append-only audit log tying all of the above together
//!
//! Storage is injected: [`Store`] holds orders, events and sessions, an
//! [`orderly_files::ArtifactStore`] holds artifact bytes, and a [`ReferenceDirectory`]
//! supplies facilities, patients, signers, compendium entries and policies.
//!
//! **No transport concerns**: outbound delivery to laboratories and any HTTP surface live
//! outside this crate.

pub mod audit;
pub mod batch;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod constants;
pub mod directory;
pub mod error;
pub mod events;
pub mod order;
pub mod orders;
pub mod session;
pub mod signature;
pub mod store;
pub mod validation;

pub use audit::AuditLog;
pub use batch::{BatchItemResult, BatchOutcome, BatchSignContext};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compliance::{
    ComplianceAssessment, ComplianceEvaluator, CompliancePolicy, PatientInsurance, WildcardPattern,
};
pub use config::{ConfigOverrides, CoreConfig};
pub use directory::{
    CompendiumItem, Facility, InMemoryDirectory, Patient, ReferenceDirectory, Signer,
    TransportKind,
};
pub use error::{OrderError, OrderResult, Resource};
pub use events::{Event, EventId, EventPayload, StatusChange};
pub use order::{MissingItem, Order, OrderStatus, OrderTest, Priority};
pub use orders::{
    CreatedOrder, NewOrder, OrderFilter, OrderPatch, OrderService, SignRequest, StatusMetadata,
};
pub use session::{
    CredentialVerifier, IssuedSession, MinimumLengthVerifier, SessionManager, SessionValidation,
    StaticCredentials,
};
pub use signature::{SignatureRecord, SignatureService, SignatureVerification, VerificationFailure};
pub use store::{Store, StoreError, StoreLimits};
