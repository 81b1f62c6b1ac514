use serde::Serialize;

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    /// Entry name, not the full path
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}
