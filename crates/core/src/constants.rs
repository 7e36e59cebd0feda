//! Constants used throughout the orderly core crate.
//!
//! Defaults here are the reference behaviour; every limit can be overridden through
//! [`crate::config::ConfigOverrides`].

/// Filename of the JSON store snapshot inside the data directory.
pub const STORE_FILENAME: &str = "orders.json";

/// Directory name for artifact storage inside the data directory.
pub const ARTIFACTS_DIR_NAME: &str = "artifacts";

/// Default directory for data when none is configured.
pub const DEFAULT_DATA_DIR: &str = "orderly_data";

/// Lifetime of an authentication session.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Longest configurable session lifetime (30 days).
pub const MAX_SESSION_TTL_HOURS: i64 = 30 * 24;

/// Failed authentication attempts per (signer, IP) before lockout.
pub const DEFAULT_MAX_FAILED_ATTEMPTS: usize = 5;

/// Trailing window over which failed attempts are counted.
pub const DEFAULT_FAILED_ATTEMPT_WINDOW_MINUTES: i64 = 60;

/// Longest configurable failed-attempt window (7 days).
pub const MAX_FAILED_ATTEMPT_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Minimum credential length accepted by `authenticate`.
pub const DEFAULT_MIN_CREDENTIAL_LEN: usize = 4;

/// Maximum number of orders in one `sign_many` call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Largest signature or notice artifact accepted, in bytes.
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 5 * 1024 * 1024;

/// Upper bound on events recorded against one order.
pub const DEFAULT_MAX_EVENTS_PER_ORDER: usize = 10_000;

/// Test-name keywords that flag a compliance notice regardless of payer.
pub const DEFAULT_HIGH_COST_KEYWORDS: &[&str] =
    &["PANEL", "COMPREHENSIVE", "EXTENDED", "GENETIC", "MOLECULAR"];

/// Reason recorded for keyword-triggered notices when no facility policy supplies one.
pub const HIGH_COST_NOTICE_REASON: &str = "High-cost test may not be covered by insurance";

/// Prefix of generated order numbers: `ORD-YYYYMMDD-XXXXXX`.
pub const ORDER_NUMBER_PREFIX: &str = "ORD";

/// Attempts at generating an unused order number before giving up.
pub const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Hex characters of the artifact digest exposed as the signature identifier.
pub const SIGNATURE_ID_LEN: usize = 16;
