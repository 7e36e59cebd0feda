/// Folder inside each order's sharded directory that holds stored artifacts.
pub const FILES_FOLDER_NAME: &str = "files";

/// Folder naming the digest algorithm used for content addressing.
pub const HASH_FOLDER_NAME: &str = "sha256";
