//! Orderly artifact storage
//!
//! Stores the raw bytes of captured signature and compliance-notice images.
//!
//! ## Design Principles
//!
//! - Bytes are addressed by their SHA-256 digest, computed by the caller over the raw input
//! - Artifacts are write-once: identical content is deduplicated, differing content at an
//!   existing address is refused
//! - Storage is scoped per order; no cross-order namespace exists
//! - Records refer to artifacts only through the relative path returned on write
//!
//! ## Layout
//!
//! ```text
//! <artifact_root>/
//! └── <s1>/<s2>/<order_id>/
//!     └── files/
//!         └── sha256/
//!             └── ab/cd/
//!                 └── abcd3f9e…
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use orderly_files::{ArtifactStore, FilesService};
//! use orderly_ids::ShardableUuid;
//! use orderly_types::Sha256Hash;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FilesService::new(Path::new("data/artifacts"))?;
//! let order_id = ShardableUuid::new();
//! let bytes = b"signature image bytes";
//! let stored = service.put(&order_id, &Sha256Hash::digest(bytes), bytes)?;
//! assert_eq!(service.get(stored.relative_path.as_str())?, Some(bytes.to_vec()));
//! # Ok(())
//! # }
//! ```

mod constants;
mod files;

pub use constants::{FILES_FOLDER_NAME, HASH_FOLDER_NAME};
pub use files::{FileMetadata, FilesService};

use orderly_ids::ShardableUuid;
use orderly_types::Sha256Hash;

/// Errors that can occur during artifact operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Path validation failed (potential directory traversal or unsafe path)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The supplied digest does not describe the supplied bytes
    #[error("Digest {expected} does not match content (computed {actual})")]
    HashMismatch { expected: String, actual: String },

    /// Different content already occupies this content address
    #[error("File with hash {0} already exists in storage with different content")]
    FileAlreadyExists(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write-once byte storage addressed by a relative path.
///
/// Implementations must return bytes bit-for-bit as written, so integrity checks can
/// re-derive the digest from what [`ArtifactStore::get`] returns.
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Stores `bytes` under `scope`, addressed by `hash`.
    ///
    /// Writing identical content twice returns the existing location.
    fn put(
        &self,
        scope: &ShardableUuid,
        hash: &Sha256Hash,
        bytes: &[u8],
    ) -> Result<FileMetadata, FilesError>;

    /// Reads back an artifact. `Ok(None)` means nothing is stored at `relative_path`.
    fn get(&self, relative_path: &str) -> Result<Option<Vec<u8>>, FilesError>;
}
