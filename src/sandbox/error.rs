use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    /// Deliberately carries no detail about which check rejected the input.
    #[error("Access denied: invalid path")]
    PathTraversal,

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File too large: {size} bytes (max: {max})")]
    SizeLimitExceeded { size: u64, max: u64 },

    #[error("Zip bomb suspected: {0}")]
    ZipBombSuspected(String),

    #[error("Zip slip suspected: {0}")]
    ZipSlipSuspected(String),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Invalid archive: {0}")]
    Archive(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Classify an I/O failure against the path it happened on
    pub(crate) fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_path_buf()),
            _ => FsError::Io(err),
        }
    }
}

impl From<zip::result::ZipError> for FsError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => FsError::Io(e),
            other => FsError::Archive(other.to_string()),
        }
    }
}
