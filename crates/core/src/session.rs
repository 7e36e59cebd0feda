//! Short-lived signer sessions.
//!
//! A signer authenticates once and receives an opaque token that authorises signing until
//! it expires or is consumed. Tokens are never stored: the store keeps sessions keyed by the
//! SHA-256 of the token. Expired sessions are ignored on lookup and removed on the next
//! [`SessionManager::authenticate`] or by [`SessionManager::purge_expired`].
//!
//! Failed attempts are throttled per (signer, source IP) using the `auth_failed` events in
//! the audit log, so the lockout survives restarts of a file-backed store.

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::directory::{ReferenceDirectory, Signer};
use crate::events::{AuthFailureReason, EventPayload};
use crate::order::SignerId;
use crate::store::{AuthSession, Store, StoreState, Transaction};
use crate::{OrderError, OrderResult};
use chrono::{DateTime, Utc};
use orderly_types::Sha256Hash;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Decides whether a credential is correct for a signer.
pub trait CredentialVerifier: Send + Sync + Debug {
    fn verify(&self, signer: &Signer, credential: &str) -> bool;
}

/// Accepts any credential. Only the minimum-length rule applied by
/// [`SessionManager::authenticate`] remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumLengthVerifier;

impl CredentialVerifier for MinimumLengthVerifier {
    fn verify(&self, _signer: &Signer, _credential: &str) -> bool {
        true
    }
}

/// Per-signer PINs, held as SHA-256 digests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pins: BTreeMap<SignerId, Sha256Hash>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin(mut self, signer_id: SignerId, pin: &str) -> Self {
        self.pins.insert(signer_id, Sha256Hash::digest(pin.as_bytes()));
        self
    }

    pub fn with_pin_digest(mut self, signer_id: SignerId, digest: Sha256Hash) -> Self {
        self.pins.insert(signer_id, digest);
        self
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Parses a credentials document:
    ///
    /// ```yaml
    /// signers:
    ///   - { signer_id: 3, pin_sha256: "<64 hex chars>" }
    /// ```
    ///
    /// # Errors
    ///
    /// `Validation` for malformed YAML, a bad digest or a signer listed twice.
    pub fn from_yaml_str(yaml: &str) -> OrderResult<Self> {
        let doc: CredentialsDocument = serde_yaml::from_str(yaml)
            .map_err(|e| OrderError::Validation(format!("invalid credentials document: {e}")))?;

        let mut credentials = Self::new();
        for entry in doc.signers {
            if credentials.pins.contains_key(&entry.signer_id) {
                return Err(OrderError::Validation(format!(
                    "duplicate signer id {} in credentials document",
                    entry.signer_id
                )));
            }
            credentials = credentials.with_pin_digest(entry.signer_id, entry.pin_sha256);
        }
        Ok(credentials)
    }

    pub fn load(path: &Path) -> OrderResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            OrderError::Validation(format!(
                "failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsDocument {
    #[serde(default)]
    signers: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialEntry {
    signer_id: SignerId,
    pin_sha256: Sha256Hash,
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, signer: &Signer, credential: &str) -> bool {
        self.pins
            .get(&signer.id)
            .is_some_and(|expected| *expected == Sha256Hash::digest(credential.as_bytes()))
    }
}

/// A freshly issued session. The token is only ever returned here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub signer_id: SignerId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub signer: Option<Signer>,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    store: Arc<Store>,
    directory: Arc<dyn ReferenceDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    config: Arc<CoreConfig>,
    audit: AuditLog,
}

impl SessionManager {
    pub fn new(
        store: Arc<Store>,
        directory: Arc<dyn ReferenceDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
        config: Arc<CoreConfig>,
    ) -> Self {
        let audit = AuditLog::new(store.clone(), clock.clone());
        Self {
            store,
            directory,
            verifier,
            clock,
            config,
            audit,
        }
    }

    /// Exchanges a credential for a session token.
    ///
    /// Every rejection is recorded as an `auth_failed` event before the error is returned.
    ///
    /// # Errors
    ///
    /// - `TooManyAttempts` once the signer has too many recent failures from `source_ip`,
    ///   even if the credential is correct.
    /// - `AuthenticationFailed` for a short or wrong credential, or an unknown or inactive
    ///   signer.
    pub fn authenticate(
        &self,
        signer_id: SignerId,
        credential: &str,
        source_ip: &str,
    ) -> OrderResult<IssuedSession> {
        let outcome = self.store.transaction(|tx| {
            let now = self.clock.now();
            let purged = tx.purge_expired_sessions(now);
            if purged > 0 {
                tracing::debug!(purged, "expired sessions purged");
            }
            let fail = |tx: &mut Transaction,
                        reason: AuthFailureReason,
                        err: OrderError|
             -> OrderResult<OrderResult<IssuedSession>> {
                self.audit.append_in(
                    tx,
                    None,
                    EventPayload::AuthFailed {
                        signer_id,
                        ip_address: source_ip.to_owned(),
                        reason,
                    },
                    Some(signer_id),
                );
                tracing::warn!(signer_id, source_ip, ?reason, "authentication rejected");
                Ok(Err(err))
            };

            if self.is_rate_limited(tx, signer_id, source_ip, now) {
                return fail(tx, AuthFailureReason::RateLimited, OrderError::TooManyAttempts);
            }
            if credential.chars().count() < self.config.min_credential_len() {
                return fail(
                    tx,
                    AuthFailureReason::CredentialTooShort,
                    OrderError::AuthenticationFailed,
                );
            }
            let signer = match self.directory.signer(signer_id) {
                None => {
                    return fail(
                        tx,
                        AuthFailureReason::UnknownSigner,
                        OrderError::AuthenticationFailed,
                    )
                }
                Some(signer) if !signer.active => {
                    return fail(
                        tx,
                        AuthFailureReason::InactiveSigner,
                        OrderError::AuthenticationFailed,
                    )
                }
                Some(signer) => signer,
            };
            if !self.verifier.verify(&signer, credential) {
                return fail(
                    tx,
                    AuthFailureReason::InvalidCredential,
                    OrderError::AuthenticationFailed,
                );
            }

            let session = AuthSession {
                signer_id,
                ip_address: source_ip.to_owned(),
                issued_at: now,
                expires_at: now + self.config.session_ttl(),
                parent: None,
            };
            Ok(Ok(self.issue(tx, session, false)))
        })?;

        if let Ok(issued) = &outcome {
            tracing::info!(signer_id, expires_at = %issued.expires_at, "session issued");
        }
        outcome
    }

    /// Checks that `token` belongs to a live session of `signer_id`.
    pub fn validate(&self, token: &str, signer_id: SignerId) -> OrderResult<SessionValidation> {
        let now = self.clock.now();
        let valid = self
            .store
            .read(|state| session_is_valid(state, token, signer_id, now))?;
        Ok(SessionValidation {
            valid,
            signer: valid.then(|| self.directory.signer(signer_id)).flatten(),
        })
    }

    /// Same check as [`Self::validate`], against the state seen by a transaction.
    pub fn validate_in(&self, tx: &Transaction, token: &str, signer_id: SignerId) -> bool {
        session_is_valid(tx, token, signer_id, self.clock.now())
    }

    /// Removes the session for `token`. Invalidating an unknown token is a no-op.
    pub fn invalidate(&self, token: &str) -> OrderResult<()> {
        self.store.transaction(|tx| {
            self.invalidate_in(tx, token);
            Ok::<_, OrderError>(())
        })
    }

    /// Removes the session for `token` inside an existing transaction. Returns whether a
    /// session was present.
    pub fn invalidate_in(&self, tx: &mut Transaction, token: &str) -> bool {
        tx.remove_session(&token_key(token))
    }

    /// Issues a child session from a live parent session, sharing its IP and expiry.
    ///
    /// Used by batch signing so each order consumes its own token. The child is refused when
    /// the signer is locked out or no longer active.
    pub fn derive(&self, parent_token: &str, signer_id: SignerId) -> OrderResult<IssuedSession> {
        self.store.transaction(|tx| {
            let now = self.clock.now();
            let parent_key = token_key(parent_token);
            let parent = match tx.session(&parent_key) {
                Some(s) if s.signer_id == signer_id && s.is_live(now) => s.clone(),
                _ => return Err(OrderError::InvalidSession),
            };
            if self.is_rate_limited(tx, signer_id, &parent.ip_address, now) {
                return Err(OrderError::TooManyAttempts);
            }
            if !self.directory.signer(signer_id).is_some_and(|s| s.active) {
                return Err(OrderError::AuthenticationFailed);
            }

            let child = AuthSession {
                signer_id,
                ip_address: parent.ip_address,
                issued_at: now,
                expires_at: parent.expires_at,
                parent: Some(parent_key),
            };
            Ok(self.issue(tx, child, true))
        })
    }

    /// Removes every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> OrderResult<usize> {
        let now = self.clock.now();
        let purged = self
            .store
            .transaction(|tx| Ok::<_, OrderError>(tx.purge_expired_sessions(now)))?;
        if purged > 0 {
            tracing::info!(purged, "expired sessions purged");
        }
        Ok(purged)
    }

    fn is_rate_limited(
        &self,
        state: &StoreState,
        signer_id: SignerId,
        source_ip: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let since = now - self.config.failed_attempt_window();
        state.failed_attempts_since(signer_id, source_ip, since) >= self.config.max_failed_attempts()
    }

    fn issue(&self, tx: &mut Transaction, session: AuthSession, derived: bool) -> IssuedSession {
        let token = generate_token(session.signer_id, session.issued_at);
        let issued = IssuedSession {
            token: token.clone(),
            signer_id: session.signer_id,
            expires_at: session.expires_at,
        };
        self.audit.append_in(
            tx,
            None,
            EventPayload::AuthSession {
                signer_id: session.signer_id,
                ip_address: session.ip_address.clone(),
                expires_at: session.expires_at,
                derived,
            },
            Some(session.signer_id),
        );
        tx.insert_session(token_key(&token), session);
        issued
    }
}

/// SHA-256 over signer id, issue time and a 32-byte nonce from the OS RNG, hex encoded.
fn generate_token(signer_id: SignerId, issued_at: DateTime<Utc>) -> String {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut material = Vec::with_capacity(8 + 32 + 32);
    material.extend_from_slice(&signer_id.to_be_bytes());
    material.extend_from_slice(issued_at.to_rfc3339().as_bytes());
    material.extend_from_slice(&nonce);
    Sha256Hash::digest(&material).to_string()
}

fn token_key(token: &str) -> Sha256Hash {
    Sha256Hash::digest(token.trim().as_bytes())
}

fn session_is_valid(state: &StoreState, token: &str, signer_id: SignerId, now: DateTime<Utc>) -> bool {
    if Sha256Hash::parse(token.trim()).is_err() {
        return false;
    }
    state
        .session(&token_key(token))
        .is_some_and(|session| session.signer_id == signer_id && session.is_live(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use crate::store::StoreLimits;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    struct Fixture {
        manager: SessionManager,
        clock: Arc<ManualClock>,
        audit: AuditLog,
    }

    fn fixture(verifier: Arc<dyn CredentialVerifier>) -> Fixture {
        let store = Arc::new(Store::in_memory(StoreLimits::default()));
        let directory = InMemoryDirectory::new()
            .with_signer(Signer {
                id: 3,
                display_name: "Dr Ada Lovelace".into(),
                active: true,
            })
            .with_signer(Signer {
                id: 4,
                display_name: "Dr Retired".into(),
                active: false,
            });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 11, 14, 0, 0).unwrap(),
        ));
        let config = Arc::new(CoreConfig::new(PathBuf::from("unused")).unwrap());
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(directory),
            verifier,
            clock.clone(),
            config,
        );
        Fixture {
            manager,
            audit: AuditLog::new(store, clock.clone()),
            clock,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(Arc::new(MinimumLengthVerifier))
    }

    #[test]
    fn test_authenticate_issues_hex_token() {
        let f = default_fixture();
        let issued = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();

        assert_eq!(issued.token.len(), 64);
        assert!(issued.token.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_eq!(issued.expires_at, f.clock.now() + Duration::hours(24));

        let validation = f.manager.validate(&issued.token, 3).unwrap();
        assert!(validation.valid);
        assert_eq!(validation.signer.unwrap().display_name, "Dr Ada Lovelace");

        let history = f.audit.list_for_signer(3).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type(), "auth_session");
    }

    #[test]
    fn test_tokens_are_unique() {
        let f = default_fixture();
        let a = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();
        let b = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_rejections_are_recorded() {
        let f = default_fixture();
        assert!(matches!(
            f.manager.authenticate(3, "12", "10.0.0.1"),
            Err(OrderError::AuthenticationFailed)
        ));
        assert!(matches!(
            f.manager.authenticate(4, "1234", "10.0.0.1"),
            Err(OrderError::AuthenticationFailed)
        ));
        assert!(matches!(
            f.manager.authenticate(99, "1234", "10.0.0.1"),
            Err(OrderError::AuthenticationFailed)
        ));

        let history = f.audit.list_for_signer(3).unwrap();
        assert_eq!(history.len(), 1);
        assert!(matches!(
            history[0].payload,
            EventPayload::AuthFailed {
                reason: AuthFailureReason::CredentialTooShort,
                ..
            }
        ));
        assert_eq!(f.audit.list_for_signer(4).unwrap().len(), 1);
        assert_eq!(f.audit.list_for_signer(99).unwrap().len(), 1);
    }

    #[test]
    fn test_static_credentials() {
        let f = fixture(Arc::new(StaticCredentials::new().with_pin(3, "4821")));
        assert!(f.manager.authenticate(3, "4821", "10.0.0.1").is_ok());
        assert!(matches!(
            f.manager.authenticate(3, "0000", "10.0.0.1"),
            Err(OrderError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_lockout_after_five_failures_then_window_expires() {
        let f = default_fixture();
        for _ in 0..5 {
            assert!(matches!(
                f.manager.authenticate(3, "x", "10.0.0.1"),
                Err(OrderError::AuthenticationFailed)
            ));
        }

        assert!(matches!(
            f.manager.authenticate(3, "1234", "10.0.0.1"),
            Err(OrderError::TooManyAttempts)
        ));
        // Throttling is per source IP.
        assert!(f.manager.authenticate(3, "1234", "10.0.0.2").is_ok());

        f.clock.advance(Duration::minutes(61));
        assert!(f.manager.authenticate(3, "1234", "10.0.0.1").is_ok());
    }

    #[test]
    fn test_validate_requires_matching_signer_and_live_session() {
        let f = default_fixture();
        let issued = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();

        assert!(!f.manager.validate(&issued.token, 5).unwrap().valid);
        assert!(!f.manager.validate("not-a-token", 3).unwrap().valid);

        f.clock.advance(Duration::hours(24));
        let expired = f.manager.validate(&issued.token, 3).unwrap();
        assert!(!expired.valid);
        assert!(expired.signer.is_none());
        assert_eq!(f.manager.purge_expired().unwrap(), 1);
        assert_eq!(f.manager.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let f = default_fixture();
        let issued = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();

        f.manager.invalidate(&issued.token).unwrap();
        f.manager.invalidate(&issued.token).unwrap();
        assert!(!f.manager.validate(&issued.token, 3).unwrap().valid);
    }

    #[test]
    fn test_derive_inherits_parent_expiry() {
        let f = default_fixture();
        let parent = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();
        f.clock.advance(Duration::hours(1));

        let child = f.manager.derive(&parent.token, 3).unwrap();
        assert_ne!(child.token, parent.token);
        assert_eq!(child.expires_at, parent.expires_at);
        assert!(f.manager.validate(&child.token, 3).unwrap().valid);

        f.manager.invalidate(&child.token).unwrap();
        assert!(f.manager.validate(&parent.token, 3).unwrap().valid);
    }

    #[test]
    fn test_derive_requires_live_parent() {
        let f = default_fixture();
        let parent = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();

        assert!(matches!(
            f.manager.derive(&parent.token, 5),
            Err(OrderError::InvalidSession)
        ));
        f.manager.invalidate(&parent.token).unwrap();
        assert!(matches!(
            f.manager.derive(&parent.token, 3),
            Err(OrderError::InvalidSession)
        ));
    }

    #[test]
    fn test_authenticate_purges_expired_sessions() {
        let f = default_fixture();
        f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();
        f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();
        assert_eq!(f.manager.store.read(|s| s.session_count()).unwrap(), 2);

        f.clock.advance(Duration::hours(25));
        let fresh = f.manager.authenticate(3, "1234", "10.0.0.1").unwrap();

        assert_eq!(f.manager.store.read(|s| s.session_count()).unwrap(), 1);
        assert!(f.manager.validate(&fresh.token, 3).unwrap().valid);
    }

    #[test]
    fn test_static_credentials_from_yaml() {
        let yaml = format!(
            "signers:\n  - {{ signer_id: 3, pin_sha256: \"{}\" }}\n",
            Sha256Hash::digest(b"4821")
        );
        let credentials = StaticCredentials::from_yaml_str(&yaml).unwrap();
        assert_eq!(credentials.len(), 1);

        let f = fixture(Arc::new(credentials));
        assert!(f.manager.authenticate(3, "4821", "10.0.0.1").is_ok());
        assert!(matches!(
            f.manager.authenticate(3, "9999", "10.0.0.1"),
            Err(OrderError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_static_credentials_yaml_rejects_bad_entries() {
        let digest = Sha256Hash::digest(b"4821");
        let duplicate = format!(
            "signers:\n  - {{ signer_id: 3, pin_sha256: \"{digest}\" }}\n  - {{ signer_id: 3, pin_sha256: \"{digest}\" }}\n"
        );
        assert!(StaticCredentials::from_yaml_str(&duplicate)
            .unwrap_err()
            .to_string()
            .contains("duplicate signer id 3"));
        assert!(StaticCredentials::from_yaml_str("signers:\n  - { signer_id: 3, pin_sha256: \"4821\" }\n").is_err());
        assert!(StaticCredentials::from_yaml_str("pins: []").is_err());
    }
}
