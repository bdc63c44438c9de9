//! The upload boundary.
//!
//! An [`Upload`] is a byte stream plus the filename the caller supplied.
//! Before anything touches the filesystem the name goes through
//! [`sanitize_filename`], which strips path components and characters that
//! have no business in a file name. Staging then claims the name for the
//! lifetime of the run, so two live runs racing on the same name cannot
//! share (or delete) each other's source. A file left behind by a run that
//! never cleaned up (a killed process) is not live and gets replaced.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::claim::{PathClaim, PathRegistry};
use crate::error::{CleanupWarning, FramecastError};

static STAGED_SOURCES: PathRegistry = PathRegistry::new();

/// Longest sanitized filename kept, in bytes. Longer names keep their tail
/// so the extension survives.
const MAX_FILENAME_LENGTH: usize = 200;

/// A video received from a client, not yet written to disk.
pub struct Upload {
    filename: String,
    body: Box<dyn Read + Send>,
}

impl Debug for Upload {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

impl Upload {
    /// Wrap a byte stream and the filename the caller supplied.
    pub fn new<R: Read + Send + 'static>(filename: impl Into<String>, body: R) -> Self {
        Self {
            filename: filename.into(),
            body: Box::new(body),
        }
    }

    /// An upload whose body is already in memory.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(filename, Cursor::new(bytes.into()))
    }

    /// An upload read from a local file, named after that file.
    ///
    /// # Errors
    ///
    /// [`FramecastError::IoError`] if the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FramecastError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, File::open(path)?))
    }

    /// Reject a request that carried no file at all.
    ///
    /// # Errors
    ///
    /// [`FramecastError::MissingUpload`] when `upload` is `None`.
    pub fn require(upload: Option<Upload>) -> Result<Upload, FramecastError> {
        upload.ok_or(FramecastError::MissingUpload)
    }

    /// The filename as supplied, before sanitization.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Write the body to `directory` under the sanitized filename.
    pub(crate) fn stage(mut self, directory: &Path) -> Result<StagedSource, FramecastError> {
        let name = sanitize_filename(&self.filename)?;
        fs::create_dir_all(directory)?;
        let path = directory.join(&name);
        let claim = STAGED_SOURCES
            .claim(fs::canonicalize(directory)?.join(&name))
            .ok_or_else(|| FramecastError::SourceInUse { path: path.clone() })?;

        if fs::symlink_metadata(&path).is_ok() {
            log::warn!(
                "Replacing {} left behind by an earlier run",
                path.display()
            );
            fs::remove_file(&path)?;
        }

        // Another process staging into the same directory still loses the race.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|error| match error.kind() {
                ErrorKind::AlreadyExists => FramecastError::SourceInUse { path: path.clone() },
                _ => FramecastError::IoError(error),
            })?;

        let mut writer = BufWriter::new(file);
        let copied = io::copy(&mut self.body, &mut writer).and_then(|bytes| {
            writer.flush()?;
            Ok(bytes)
        });

        match copied {
            Ok(bytes) => {
                log::debug!(
                    "Staged upload {:?} as {} ({bytes} bytes)",
                    self.filename,
                    path.display()
                );
                Ok(StagedSource {
                    path,
                    claim: Some(claim),
                })
            }
            Err(error) => {
                drop(writer);
                if let Err(cleanup) = fs::remove_file(&path) {
                    CleanupWarning::new(&path, cleanup).log();
                }
                Err(error.into())
            }
        }
    }
}

/// A source persisted in the upload directory, owned by one run.
#[derive(Debug)]
pub struct StagedSource {
    path: PathBuf,
    claim: Option<PathClaim>,
}

impl StagedSource {
    /// Where the source was written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file and give the name back. A file that is
    /// already gone counts as removed; any other failure is logged, never
    /// raised.
    pub(crate) fn remove(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed staged source {}", self.path.display()),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => CleanupWarning::new(&self.path, error).log(),
        }
        if let Some(claim) = self.claim.take() {
            log::debug!("Released upload name {}", claim.path().display());
        }
    }
}

/// Reduce a caller-supplied filename to a safe single path component.
///
/// Directory parts (either separator), `.` and `..` segments are dropped and
/// the remaining parts joined with `_`. Whitespace becomes `_`; anything
/// other than ASCII letters, digits, `.`, `_` and `-` is removed. Leading and
/// trailing dots and underscores are trimmed so the result can never be a
/// hidden file or a relative path.
///
/// # Errors
///
/// [`FramecastError::InvalidFilename`] if nothing is left.
///
/// # Example
///
/// ```
/// use framecast::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "etc_passwd");
/// assert_eq!(sanitize_filename("My Holiday.mp4").unwrap(), "My_Holiday.mp4");
/// assert!(sanitize_filename("..").is_err());
/// ```
pub fn sanitize_filename(filename: &str) -> Result<String, FramecastError> {
    let joined = filename
        .split(['/', '\\'])
        .filter(|segment| !matches!(segment.trim(), "" | "." | ".."))
        .collect::<Vec<_>>()
        .join("_");

    let cleaned: String = joined
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return Err(FramecastError::InvalidFilename {
            filename: filename.to_string(),
            reason: if filename.trim().is_empty() {
                "filename is empty".to_string()
            } else {
                "no usable characters remain after sanitizing".to_string()
            },
        });
    }

    // ASCII only at this point, so byte offsets are char boundaries.
    let start = trimmed.len().saturating_sub(MAX_FILENAME_LENGTH);
    Ok(trimmed[start..]
        .trim_start_matches(|c| c == '.' || c == '_')
        .to_string())
}
