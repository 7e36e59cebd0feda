//! Identifier utilities for the orderly workspace.
//!
//! Two identifier shapes are used:
//!
//! - [`ShardableUuid`]: a v4 UUID held in canonical form (**32 lowercase hex characters**, no
//!   hyphens). Orders are identified by it, and per-order artifact storage derives a sharded
//!   directory from it: `parent/<u[0..2]>/<u[2..4]>/<u>/`.
//! - [`TimestampId`]: `YYYYMMDDTHHMMSS.mmmZ-<canonical uuid>`. Event identifiers use this form
//!   so that ordering by id matches ordering by write time.
//!
//! Canonical form is required for externally supplied identifiers; hyphenated or uppercase
//! values are rejected rather than normalised.

mod service;

pub use service::{ShardableUuid, TimestampId, Uuid};

/// Error type for identifier parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
