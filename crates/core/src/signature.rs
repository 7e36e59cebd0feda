//! Signature capture and integrity verification.
//!
//! Capture hashes the raw artifact bytes before anything is written, then stores them
//! write-once under a content address scoped to the order. Verification re-reads the bytes
//! named by the latest `order_signed` event and compares digests. Tampering, loss and a
//! missing signature are verification outcomes, not errors.

use crate::events::EventPayload;
use crate::order::SignerId;
use crate::store::Store;
use crate::{OrderError, OrderResult};
use base64::Engine;
use chrono::{DateTime, Utc};
use orderly_files::ArtifactStore;
use orderly_ids::ShardableUuid;
use orderly_types::Sha256Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Everything recorded about one signing, embedded in the `order_signed` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub order_id: ShardableUuid,
    pub signer_id: SignerId,
    pub signer_name: String,
    pub artifact_path: String,
    pub content_hash: Sha256Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub signed_at: DateTime<Utc>,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl SignatureRecord {
    /// Short identifier derived from the artifact digest.
    pub fn signature_id(&self) -> &str {
        self.content_hash.prefix(crate::constants::SIGNATURE_ID_LEN)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapturedArtifact {
    pub path: String,
    pub hash: Sha256Hash,
    pub media_type: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    NoSignature,
    FileNotFound,
    IntegrityCheckFailed,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationFailure::NoSignature => "no signature found",
            VerificationFailure::FileNotFound => "signature file not found",
            VerificationFailure::IntegrityCheckFailed => "integrity check failed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureVerification {
    Verified {
        signer_name: String,
        signed_at: DateTime<Utc>,
        signature_id: String,
    },
    Unverified {
        reason: VerificationFailure,
        message: String,
    },
}

impl SignatureVerification {
    fn unverified(reason: VerificationFailure) -> Self {
        SignatureVerification::Unverified {
            reason,
            message: reason.to_string(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, SignatureVerification::Verified { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SignatureService {
    files: Arc<dyn ArtifactStore>,
    store: Arc<Store>,
    max_artifact_bytes: usize,
}

impl SignatureService {
    pub fn new(files: Arc<dyn ArtifactStore>, store: Arc<Store>, max_artifact_bytes: usize) -> Self {
        Self {
            files,
            store,
            max_artifact_bytes,
        }
    }

    /// Stores an artifact for `scope` and returns where it went and its digest.
    ///
    /// `input` is either raw bytes or a base64 data URL (`data:image/png;base64,...`).
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty or oversized artifact or a malformed data URL, and
    /// `Files` if the artifact store refuses the write.
    pub fn capture(&self, scope: &ShardableUuid, input: &[u8]) -> OrderResult<CapturedArtifact> {
        let bytes = decode_artifact(input)?;
        if bytes.is_empty() {
            return Err(OrderError::Validation("signature artifact is empty".into()));
        }
        if bytes.len() > self.max_artifact_bytes {
            return Err(OrderError::Validation(format!(
                "signature artifact is {} bytes (maximum {})",
                bytes.len(),
                self.max_artifact_bytes
            )));
        }

        let hash = Sha256Hash::digest(&bytes);
        let stored = self.files.put(scope, &hash, &bytes)?;
        Ok(CapturedArtifact {
            path: stored.relative_path.to_string(),
            hash,
            media_type: stored.media_type.map(|m| m.to_string()),
        })
    }

    /// Re-derives the digest of the latest signature artifact for an order.
    ///
    /// Only store read failures are returned as errors.
    pub fn verify(&self, order_id: &ShardableUuid) -> OrderResult<SignatureVerification> {
        let latest = self.store.read(|state| {
            state
                .events_for_order(order_id)
                .into_iter()
                .rev()
                .find_map(|event| match event.payload {
                    EventPayload::OrderSigned { signature, .. } => Some(signature),
                    _ => None,
                })
        })?;

        let Some(record) = latest else {
            return Ok(SignatureVerification::unverified(
                VerificationFailure::NoSignature,
            ));
        };

        let bytes = match self.files.get(&record.artifact_path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::warn!(order_id = %order_id, path = %record.artifact_path, "signature artifact missing");
                return Ok(SignatureVerification::unverified(
                    VerificationFailure::FileNotFound,
                ));
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "signature artifact unreadable");
                return Ok(SignatureVerification::unverified(
                    VerificationFailure::FileNotFound,
                ));
            }
        };

        if Sha256Hash::digest(&bytes) != record.content_hash {
            tracing::warn!(order_id = %order_id, "signature artifact failed integrity check");
            return Ok(SignatureVerification::unverified(
                VerificationFailure::IntegrityCheckFailed,
            ));
        }

        Ok(SignatureVerification::Verified {
            signature_id: record.signature_id().to_owned(),
            signer_name: record.signer_name,
            signed_at: record.signed_at,
        })
    }
}

/// Returns the artifact bytes, decoding a base64 data URL when given one.
pub fn decode_artifact(input: &[u8]) -> OrderResult<Vec<u8>> {
    let Some(rest) = input.strip_prefix(b"data:") else {
        return Ok(input.to_vec());
    };

    let text = std::str::from_utf8(rest)
        .map_err(|_| OrderError::Validation("data URL is not valid UTF-8".into()))?;
    let (header, payload) = text
        .split_once(',')
        .ok_or_else(|| OrderError::Validation("data URL has no payload".into()))?;
    if !header.ends_with(";base64") {
        return Err(OrderError::Validation(
            "only base64 data URLs are supported".into(),
        ));
    }

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| OrderError::Validation(format!("invalid base64 in data URL: {e}")))
}
