mod limits;


pub use limits::{ExtractionLimits, MAX_COMPRESSION_RATIO, MAX_DECOMPRESSED_SIZE};

use crate::sandbox::{FsError, Sandbox};
use crate::security::ResolvedPath;
use chrono::{Datelike, Timelike};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Counts reported after creating or extracting an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Builds and unpacks zip archives inside a [`Sandbox`]
pub struct Archiver<'a> {
    sandbox: &'a Sandbox,
    limits: ExtractionLimits,
}

impl<'a> Archiver<'a> {
    pub fn new(sandbox: &'a Sandbox) -> Self {
        Self {
            sandbox,
            limits: ExtractionLimits::default(),
        }
    }

    /// Override the zip bomb thresholds
    pub fn with_limits(mut self, limits: ExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Zip a file or directory into `target`.
    ///
    /// A directory keeps its own name as the top-level prefix of every
    /// entry; a single file is stored under its file name. Symlinks are
    /// not archived.
    pub fn create(&self, source: &str, target: &str) -> Result<ArchiveStats, FsError> {
        let source = self.sandbox.resolve(source)?;
        let target = self.sandbox.resolve(target)?;
        self.sandbox.ensure_real_containment(&source)?;
        self.sandbox.ensure_real_containment(&target)?;

        let metadata =
            fs::metadata(&source).map_err(|e| FsError::from_io(e, source.as_path()))?;
        let base = source
            .as_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let _guard = self.sandbox.write_guard();

        let file = File::create(&target).map_err(|e| FsError::from_io(e, target.as_path()))?;
        let mut zip = ZipWriter::new(file);
        let file_options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .last_modified_time(archive_timestamp());
        let dir_options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o755)
            .last_modified_time(archive_timestamp());

        let mut stats = ArchiveStats::default();

        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(|e| FsError::Io(e.into()))?;
            let path = entry.path();

            // The archive may be written somewhere inside the tree it packs
            if path == target.as_path() {
                continue;
            }

            let name = entry_name(source.as_path(), path, &base, metadata.is_dir());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                zip.add_directory(format!("{}/", name), dir_options)?;
                stats.directories += 1;
            } else if file_type.is_file() {
                zip.start_file(name, file_options)?;
                let mut input = File::open(path).map_err(|e| FsError::from_io(e, path))?;
                stats.bytes += io::copy(&mut input, &mut zip)?;
                stats.files += 1;
            } else {
                debug!(path = %path.display(), "skipping non-regular file");
            }
        }

        zip.finish()?;

        info!(
            source = %source,
            target = %target,
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            "created archive"
        );
        Ok(stats)
    }

    /// Unpack `archive` into `dest`, refusing zip bombs and zip slip.
    ///
    /// Entries are processed in archive order and the first violation
    /// aborts the whole call. Entries written before the failing one are
    /// left in place.
    pub fn extract(&self, archive: &str, dest: &str) -> Result<ArchiveStats, FsError> {
        let archive_path = self.sandbox.resolve(archive)?;
        let dest = self.sandbox.resolve(dest)?;
        self.sandbox.ensure_real_containment(&archive_path)?;
        self.sandbox.ensure_real_containment(&dest)?;

        let _guard = self.sandbox.write_guard();

        let file = File::open(&archive_path)
            .map_err(|e| FsError::from_io(e, archive_path.as_path()))?;
        let mut zip = ZipArchive::new(file)?;
        let scope = self.sandbox.resolver_for(&dest);

        let mut declared_total: u64 = 0;
        let mut stats = ArchiveStats::default();

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let name = entry.name().to_string();

            if self.limits.ratio_exceeded(entry.compressed_size(), entry.size()) {
                warn!(entry = %name, "rejected archive entry with suspicious compression ratio");
                return Err(FsError::ZipBombSuspected(format!(
                    "compression ratio of {} exceeds {}:1",
                    name, self.limits.max_ratio
                )));
            }

            declared_total = declared_total.saturating_add(entry.size());
            if declared_total > self.limits.max_total_size {
                warn!(archive = %archive_path, "rejected archive exceeding size ceiling");
                return Err(FsError::ZipBombSuspected(format!(
                    "declared contents exceed {} bytes",
                    self.limits.max_total_size
                )));
            }

            let target = scope.confine(&name).map_err(|_| {
                warn!(entry = %name, "rejected archive entry escaping destination");
                FsError::ZipSlipSuspected(name.clone())
            })?;
            self.sandbox.ensure_real_containment(&target)?;

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| FsError::from_io(e, target.as_path()))?;
                stats.directories += 1;
                continue;
            }

            let budget = self.limits.max_total_size.saturating_sub(stats.bytes);
            stats.bytes += write_entry(&mut entry, &target, budget)?;
            stats.files += 1;
        }

        info!(
            archive = %archive_path,
            dest = %dest,
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            "extracted archive"
        );
        Ok(stats)
    }
}

/// Write one entry's decompressed stream to `target`, never more than
/// `budget` bytes regardless of what the entry header claims
fn write_entry<R: Read>(entry: &mut R, target: &ResolvedPath, budget: u64) -> Result<u64, FsError> {
    if let Some(parent) = target.as_path().parent() {
        fs::create_dir_all(parent).map_err(|e| FsError::from_io(e, parent))?;
    }

    let mut output =
        File::create(target).map_err(|e| FsError::from_io(e, target.as_path()))?;
    match copy_capped(entry, &mut output, budget) {
        Ok(written) => Ok(written),
        Err(e) => {
            // A failing entry is never left behind, complete or not
            drop(output);
            if let Err(remove_err) = fs::remove_file(target) {
                warn!(path = %target, error = %remove_err, "failed to remove rejected entry");
            }
            Err(e)
        }
    }
}

/// Copy at most `limit` bytes; a stream with anything left past the limit
/// is a zip bomb.
pub(crate) fn copy_capped<R: Read, W: Write>(
    reader: R,
    writer: &mut W,
    limit: u64,
) -> Result<u64, FsError> {
    let mut limited = reader.take(limit.saturating_add(1));
    let copied = io::copy(&mut limited, writer)?;

    if copied > limit {
        warn!(limit, "archive entry expanded past its size budget");
        return Err(FsError::ZipBombSuspected(format!(
            "decompressed data exceeds {} bytes",
            limit
        )));
    }

    Ok(copied)
}

/// Entry name for `path` relative to the archived `source`, always `/`
/// separated
fn entry_name(source: &Path, path: &Path, base: &str, source_is_dir: bool) -> String {
    if !source_is_dir {
        return base.to_string();
    }

    let relative: Vec<String> = path
        .strip_prefix(source)
        .unwrap_or(Path::new(""))
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, relative.join("/"))
    }
}

fn archive_timestamp() -> zip::DateTime {
    let now = chrono::Local::now();
    zip::DateTime::from_date_and_time(
        now.year() as u16,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}
