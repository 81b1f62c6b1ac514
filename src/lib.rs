// Public API exports
pub mod archive;
pub mod config;
pub mod db;
pub mod sandbox;
pub mod security;
pub mod shell;
pub mod structured;

// Re-export main types for convenience
pub use sandbox::{DirEntry, DiskUsage, FsError, Sandbox, SandboxBuilder, DEFAULT_MAX_FILE_SIZE};
pub use security::{PathResolver, ResolvedPath};

pub use archive::{ArchiveStats, Archiver, ExtractionLimits};

pub use structured::XmlDocument;

pub use config::Config;
pub use db::{FileRecord, MetadataDb, NewFileRecord};
pub use shell::Shell;
