mod disk;
mod entry;
mod error;

#[cfg(test)]
mod tests;

pub use disk::DiskUsage;
pub use entry::DirEntry;
pub use error::FsError;

use crate::security::{is_contained, PathResolver, ResolvedPath};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Largest file the store will create, append to or copy (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// File store confined to a single root directory.
///
/// Every operation takes a [`ResolvedPath`] obtained from [`Sandbox::resolve`].
/// One reader/writer lock covers the whole tree: writers exclude everyone,
/// readers only exclude writers. Operations on unrelated files therefore
/// still serialize against each other.
pub struct Sandbox {
    resolver: PathResolver,
    lock: RwLock<()>,
    max_file_size: u64,
    verify_symlinks: bool,
}

/// Builder for a [`Sandbox`]
pub struct SandboxBuilder {
    root: PathBuf,
    max_file_size: u64,
    verify_symlinks: bool,
}

impl SandboxBuilder {
    /// Create a builder rooted at `root` with default limits
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            verify_symlinks: true,
        }
    }

    /// Set maximum individual file size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Toggle the check that refuses paths reaching outside the root
    /// through a symlink
    pub fn verify_symlinks(mut self, enabled: bool) -> Self {
        self.verify_symlinks = enabled;
        self
    }

    /// Create the root directory if needed and fix its canonical location
    pub fn build(self) -> Result<Sandbox, FsError> {
        fs::create_dir_all(&self.root).map_err(|e| FsError::from_io(e, &self.root))?;
        let root = fs::canonicalize(&self.root).map_err(|e| FsError::from_io(e, &self.root))?;

        info!(
            root = %root.display(),
            max_file_size = self.max_file_size,
            verify_symlinks = self.verify_symlinks,
            "sandbox ready"
        );

        Ok(Sandbox {
            resolver: PathResolver::new(root),
            lock: RwLock::new(()),
            max_file_size: self.max_file_size,
            verify_symlinks: self.verify_symlinks,
        })
    }
}

impl Sandbox {
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Map a user-supplied relative path onto the sandbox
    pub fn resolve(&self, user_path: &str) -> Result<ResolvedPath, FsError> {
        self.resolver.resolve(user_path).inspect_err(|_| {
            warn!("rejected path outside sandbox");
        })
    }

    /// Resolve against a directory inside the sandbox instead of the root.
    /// Used for archive entries, which are confined to the extraction target.
    pub(crate) fn resolver_for(&self, base: &ResolvedPath) -> PathResolver {
        PathResolver::new(base.as_path())
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse a path whose nearest existing ancestor is a symlink (or sits
    /// under one) that leads outside the root.
    ///
    /// Resolution alone is lexical and cannot see links created inside the
    /// tree.
    pub(crate) fn ensure_real_containment(&self, path: &ResolvedPath) -> Result<(), FsError> {
        if !self.verify_symlinks {
            return Ok(());
        }

        for ancestor in path.as_path().ancestors() {
            match fs::symlink_metadata(ancestor) {
                Ok(_) => {
                    // Dangling links fail to canonicalize and are refused too
                    let real = fs::canonicalize(ancestor).map_err(|_| FsError::PathTraversal)?;
                    if is_contained(self.root(), &real) {
                        return Ok(());
                    }
                    warn!("rejected path escaping sandbox through a symlink");
                    return Err(FsError::PathTraversal);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::from_io(e, ancestor)),
            }
        }

        Ok(())
    }

    fn check_size(&self, size: u64) -> Result<(), FsError> {
        if size > self.max_file_size {
            return Err(FsError::SizeLimitExceeded {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Read a whole file under the shared lock
    pub fn read(&self, path: &ResolvedPath) -> Result<Vec<u8>, FsError> {
        self.ensure_real_containment(path)?;

        let _guard = self.read_guard();
        let data = fs::read(path).map_err(|e| FsError::from_io(e, path.as_path()))?;

        debug!(path = %path, bytes = data.len(), "read file");
        Ok(data)
    }

    /// Read a whole file as UTF-8 text
    pub fn read_to_string(&self, path: &ResolvedPath) -> Result<String, FsError> {
        let data = self.read(path)?;
        String::from_utf8(data)
            .map_err(|_| FsError::InvalidData(format!("{} is not valid UTF-8", path)))
    }

    /// Create or truncate a file and write `content` to it
    pub fn write(&self, path: &ResolvedPath, content: &[u8]) -> Result<(), FsError> {
        self.check_size(content.len() as u64)?;
        self.ensure_real_containment(path)?;

        let _guard = self.write_guard();
        fs::write(path, content).map_err(|e| FsError::from_io(e, path.as_path()))?;

        info!(path = %path, bytes = content.len(), "wrote file");
        Ok(())
    }

    /// Append to an existing file.
    ///
    /// The size check and the append share one exclusive section, so two
    /// concurrent appenders cannot both pass the check and overshoot.
    pub fn append(&self, path: &ResolvedPath, content: &[u8]) -> Result<(), FsError> {
        self.ensure_real_containment(path)?;

        let _guard = self.write_guard();
        let current = fs::metadata(path)
            .map_err(|e| FsError::from_io(e, path.as_path()))?
            .len();
        self.check_size(current + content.len() as u64)?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| FsError::from_io(e, path.as_path()))?;
        file.write_all(content)?;

        info!(path = %path, bytes = content.len(), "appended to file");
        Ok(())
    }

    pub fn delete(&self, path: &ResolvedPath) -> Result<(), FsError> {
        self.ensure_real_containment(path)?;

        let _guard = self.write_guard();
        fs::remove_file(path).map_err(|e| FsError::from_io(e, path.as_path()))?;

        info!(path = %path, "deleted file");
        Ok(())
    }

    /// Copy `src` to `dst`.
    ///
    /// The source is read under the shared lock and the destination written
    /// under the exclusive lock; the two sections are sequential, not nested.
    pub fn copy(&self, src: &ResolvedPath, dst: &ResolvedPath) -> Result<(), FsError> {
        self.ensure_real_containment(src)?;
        self.ensure_real_containment(dst)?;

        let declared = fs::metadata(src)
            .map_err(|e| FsError::from_io(e, src.as_path()))?
            .len();
        self.check_size(declared)?;

        let data = {
            let _guard = self.read_guard();
            let file = File::open(src).map_err(|e| FsError::from_io(e, src.as_path()))?;
            let mut data = Vec::with_capacity(declared as usize);
            // One byte past the ceiling is enough to tell the file grew
            file.take(self.max_file_size + 1).read_to_end(&mut data)?;
            data
        };
        self.check_size(data.len() as u64)?;

        {
            let _guard = self.write_guard();
            fs::write(dst, &data).map_err(|e| FsError::from_io(e, dst.as_path()))?;
        }

        info!(src = %src, dst = %dst, bytes = data.len(), "copied file");
        Ok(())
    }

    /// Rename `src` to `dst` atomically
    pub fn move_file(&self, src: &ResolvedPath, dst: &ResolvedPath) -> Result<(), FsError> {
        self.ensure_real_containment(src)?;
        self.ensure_real_containment(dst)?;

        let _guard = self.write_guard();
        fs::rename(src, dst).map_err(|e| FsError::from_io(e, src.as_path()))?;

        info!(src = %src, dst = %dst, "moved file");
        Ok(())
    }

    /// List a directory in the order the OS returns entries.
    /// Takes no lock; listing is metadata only.
    pub fn list_directory(&self, path: &ResolvedPath) -> Result<Vec<DirEntry>, FsError> {
        self.ensure_real_containment(path)?;

        let entries = fs::read_dir(path).map_err(|e| FsError::from_io(e, path.as_path()))?;

        let mut listing = Vec::new();
        for entry in entries.flatten() {
            // Entries that vanish or cannot be stat'ed mid-listing are skipped
            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            listing.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }

        debug!(path = %path, entries = listing.len(), "listed directory");
        Ok(listing)
    }

    /// Total and free space of the filesystem the root lives on
    pub fn disk_usage(&self) -> Result<DiskUsage, FsError> {
        let root = self.root();
        let usage = DiskUsage {
            total: fs2::total_space(root).map_err(|e| FsError::from_io(e, root))?,
            free: fs2::free_space(root).map_err(|e| FsError::from_io(e, root))?,
        };

        debug!(total = usage.total, free = usage.free, "read disk usage");
        Ok(usage)
    }

    /// Create a directory and any missing parents; succeeds if it exists
    pub fn create_directory(&self, path: &ResolvedPath) -> Result<(), FsError> {
        self.ensure_real_containment(path)?;

        let _guard = self.write_guard();
        fs::create_dir_all(path).map_err(|e| FsError::from_io(e, path.as_path()))?;

        info!(path = %path, "created directory");
        Ok(())
    }
}
