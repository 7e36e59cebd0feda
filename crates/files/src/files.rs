//! Filesystem-backed artifact storage.
//!
//! [`FilesService`] implements [`ArtifactStore`] over a single root directory. Each order gets
//! a sharded directory derived from its identifier, and each artifact lives at a path derived
//! from its SHA-256 digest:
//!
//! ```text
//! <root>/<s1>/<s2>/<order_id>/files/sha256/<h1>/<h2>/<hash>
//! ```
//!
//! # Content Addressing
//!
//! - **Deduplication**: storing identical bytes twice for one order is a no-op
//! - **Integrity**: the path names the digest, so readers can always re-verify
//! - **Immutability**: differing bytes at an occupied address are refused
//!
//! # Security Model
//!
//! - The root is canonicalised at construction
//! - Relative paths handed back to [`FilesService::get`] are checked component by component;
//!   absolute paths and `..` segments are rejected

use crate::{ArtifactStore, FilesError, FILES_FOLDER_NAME, HASH_FOLDER_NAME};
use chrono::{DateTime, Utc};
use orderly_ids::ShardableUuid;
use orderly_types::{NonEmptyText, Sha256Hash};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Metadata for a stored artifact.
///
/// Carries no patient or clinical identifiers beyond the order-scoped path.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Hashing algorithm used (always "sha256")
    pub hash_algorithm: NonEmptyText,

    /// Hexadecimal digest of the content
    pub hash: Sha256Hash,

    /// Path relative to the artifact root
    pub relative_path: NonEmptyText,

    /// Size in bytes
    pub size_bytes: u64,

    /// Best-effort media type sniffed from the content. Not authoritative.
    pub media_type: Option<NonEmptyText>,

    /// UTC time the artifact was first written
    pub stored_at: DateTime<Utc>,
}

/// Artifact storage rooted at one directory.
#[derive(Debug)]
pub struct FilesService {
    root_directory: PathBuf,
}

impl FilesService {
    /// Creates a service rooted at `root_directory`.
    ///
    /// The directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the path exists but is not a directory,
    /// or cannot be created or canonicalised.
    pub fn new(root_directory: &Path) -> Result<Self, FilesError> {
        if root_directory.exists() && !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        fs::create_dir_all(root_directory).map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot create {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Returns the canonical root directory.
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    /// Relative path for `hash` within the scope of `order_id`:
    /// `<s1>/<s2>/<order_id>/files/sha256/<h1>/<h2>/<hash>`.
    fn compute_relative_path(&self, order_id: &ShardableUuid, hash: &Sha256Hash) -> PathBuf {
        let hex = hash.as_str();
        order_id
            .sharded_dir(Path::new(""))
            .join(FILES_FOLDER_NAME)
            .join(HASH_FOLDER_NAME)
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    /// Resolves a caller-supplied relative path, refusing anything that could escape the root.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, FilesError> {
        let candidate = Path::new(relative_path);
        if relative_path.trim().is_empty() {
            return Err(FilesError::InvalidPath("path is empty".into()));
        }
        let safe = candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(FilesError::InvalidPath(format!(
                "path must be relative without '..': {}",
                relative_path
            )));
        }
        Ok(self.root_directory.join(candidate))
    }

    fn metadata_for(
        &self,
        relative: &Path,
        hash: &Sha256Hash,
        bytes: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<FileMetadata, FilesError> {
        let relative_str = relative.to_str().ok_or_else(|| {
            FilesError::InvalidPath(format!("non UTF-8 path: {}", relative.display()))
        })?;
        let relative_path = NonEmptyText::new(relative_str)
            .map_err(|_| FilesError::InvalidPath("computed path is empty".into()))?;
        let hash_algorithm = NonEmptyText::new(HASH_FOLDER_NAME)
            .map_err(|_| FilesError::InvalidPath("hash algorithm is empty".into()))?;

        Ok(FileMetadata {
            hash_algorithm,
            hash: hash.clone(),
            relative_path,
            size_bytes: bytes.len() as u64,
            media_type: infer::get(bytes).and_then(|kind| NonEmptyText::new(kind.mime_type()).ok()),
            stored_at,
        })
    }
}

impl ArtifactStore for FilesService {
    fn put(
        &self,
        scope: &ShardableUuid,
        hash: &Sha256Hash,
        bytes: &[u8],
    ) -> Result<FileMetadata, FilesError> {
        let actual = Sha256Hash::digest(bytes);
        if &actual != hash {
            return Err(FilesError::HashMismatch {
                expected: hash.to_string(),
                actual: actual.to_string(),
            });
        }

        let relative = self.compute_relative_path(scope, hash);
        let storage_path = self.root_directory.join(&relative);

        if storage_path.exists() {
            let existing = fs::read(&storage_path)?;
            if existing != bytes {
                return Err(FilesError::FileAlreadyExists(hash.to_string()));
            }
            let stored_at = fs::metadata(&storage_path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            tracing::debug!("artifact {} already stored for order {}", hash, scope);
            return self.metadata_for(&relative, hash, bytes, stored_at);
        }

        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage directory {}: {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        fs::write(&storage_path, bytes).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write file to {}: {}", storage_path.display(), e),
            ))
        })?;

        self.metadata_for(&relative, hash, bytes, Utc::now())
    }

    fn get(&self, relative_path: &str) -> Result<Option<Vec<u8>>, FilesError> {
        let storage_path = self.resolve(relative_path)?;
        match fs::read(&storage_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read file from {}: {}", storage_path.display(), e),
            ))),
        }
    }
}
