use crate::sandbox::FsError;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// An absolute, lexically clean path that lies inside the root it was
/// resolved against. Only [`PathResolver`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps untrusted relative paths onto a fixed root directory.
///
/// Resolution is purely lexical: it never touches the filesystem, so a path
/// may resolve successfully before any of its components exist.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for `root`, which must already be absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_lexically(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve user input typed at the shell.
    ///
    /// Percent-encoded sequences are decoded before any check runs, so
    /// `%2E%2E%2F` is treated exactly like `../`. Input that does not decode
    /// to valid UTF-8 is checked as typed.
    pub fn resolve(&self, user_path: &str) -> Result<ResolvedPath, FsError> {
        if user_path.contains('\0') {
            return Err(FsError::PathTraversal);
        }

        let decoded = percent_decode_str(user_path)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| user_path.to_string());

        self.confine(&decoded)
    }

    /// Apply every containment rule to an already-decoded relative path.
    ///
    /// Archive entry names go through here directly: they are stored
    /// verbatim in the archive and must not be percent-decoded.
    pub fn confine(&self, relative: &str) -> Result<ResolvedPath, FsError> {
        if relative.contains('\0') || is_absolute_form(relative) || relative.contains("..") {
            return Err(FsError::PathTraversal);
        }

        // Second line of defense; the substring check above already refused
        // anything normalization could have collapsed upwards.
        let candidate = normalize_lexically(&self.root.join(relative));

        if !is_contained(&self.root, &candidate) {
            return Err(FsError::PathTraversal);
        }

        Ok(ResolvedPath(candidate))
    }
}

/// Leading `/` or `\`, a drive prefix such as `C:`, or anything the host
/// considers absolute.
fn is_absolute_form(raw: &str) -> bool {
    if raw.starts_with('/') || raw.starts_with('\\') || Path::new(raw).is_absolute() {
        return true;
    }

    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Collapse `.` and `..` components and redundant separators without
/// consulting the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    normalized
}

/// True when `candidate` equals `root` or sits below it.
///
/// Comparison is per component, so `/srv/box` does not contain
/// `/srv/boxes/file`.
pub fn is_contained(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}
