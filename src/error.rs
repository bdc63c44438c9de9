//! Error types for the `framecast` crate.
//!
//! This module defines [`FramecastError`], the unified error type returned by
//! all fallible operations in the crate, and [`CleanupWarning`], the value
//! logged when a best-effort artifact deletion fails. Errors carry enough
//! context (paths, batch positions, upstream messages) to diagnose a failed
//! run without additional logging at the call site.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
    path::PathBuf,
    time::Duration,
};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `framecast` operations.
///
/// Use [`kind`](FramecastError::kind) to map a variant onto the coarse
/// failure class a transport layer cares about.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramecastError {
    /// No file was supplied with the upload.
    #[error("No file uploaded")]
    MissingUpload,

    /// The caller-supplied filename is empty or sanitizes to nothing.
    #[error("Invalid upload filename {filename:?}: {reason}")]
    InvalidFilename {
        /// The filename as supplied by the caller.
        filename: String,
        /// Why the filename was rejected.
        reason: String,
    },

    /// Another run is already using a staged source with the same name.
    #[error("Upload {path} is already being processed")]
    SourceInUse {
        /// The staging path that is taken.
        path: PathBuf,
    },

    /// Another run currently owns the output location.
    #[error("Output location {path} is in use by another run")]
    OutputLocationBusy {
        /// The contested frame directory.
        path: PathBuf,
    },

    /// The frame directory is, or contains, the upload directory, so purging
    /// it could reach staged sources.
    #[error("Output location {output} overlaps the upload directory {upload_directory}")]
    OutputContainsUploads {
        /// The requested frame directory.
        output: PathBuf,
        /// The configured upload directory.
        upload_directory: PathBuf,
    },

    /// The video source could not be opened or decoded.
    #[error("Failed to decode video source at {path}: {reason}")]
    Decode {
        /// Path of the staged source.
        path: PathBuf,
        /// Underlying reason decoding failed.
        reason: String,
    },

    /// The container holds no video stream.
    #[error("No video stream found in {path}")]
    NoVideoStream {
        /// Path of the staged source.
        path: PathBuf,
    },

    /// A batch could not be captioned.
    #[error("Failed to caption batch starting at frame {batch_start}: {reason}")]
    Inference {
        /// Index of the first frame in the failed batch.
        batch_start: u64,
        /// Underlying reason reported by the loader or collaborator.
        reason: String,
    },

    /// The inference collaborator did not answer in time.
    #[error("Captioning batch starting at frame {batch_start} timed out after {timeout:?}")]
    InferenceTimeout {
        /// Index of the first frame in the failed batch.
        batch_start: u64,
        /// The configured limit that was exceeded.
        timeout: Duration,
    },

    /// A sampling interval that is zero, negative, or not finite.
    #[error("Sampling interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while encoding or decoding a frame.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FfmpegError> for FramecastError {
    fn from(error: FfmpegError) -> Self {
        FramecastError::FfmpegError(error.to_string())
    }
}

/// Coarse failure class of a [`FramecastError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid input at the upload boundary. User-correctable,
    /// reported before any stream opens.
    Upload,
    /// The source video is unreadable or empty. No results are produced.
    Decode,
    /// A batch could not be captioned. Results already emitted stand.
    Inference,
    /// I/O, cancellation, or other failures outside the three above.
    Internal,
}

impl FramecastError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FramecastError::MissingUpload
            | FramecastError::InvalidFilename { .. }
            | FramecastError::SourceInUse { .. }
            | FramecastError::OutputLocationBusy { .. } => ErrorKind::Upload,
            FramecastError::Decode { .. }
            | FramecastError::NoVideoStream { .. }
            | FramecastError::FfmpegError(_) => ErrorKind::Decode,
            FramecastError::Inference { .. } | FramecastError::InferenceTimeout { .. } => {
                ErrorKind::Inference
            }
            FramecastError::InvalidInterval(_)
            | FramecastError::OutputContainsUploads { .. }
            | FramecastError::IoError(_)
            | FramecastError::ImageError(_)
            | FramecastError::Cancelled => ErrorKind::Internal,
        }
    }
}

/// A best-effort deletion that did not succeed.
///
/// Never returned as an error: it is logged with [`log::warn!`] and the run
/// carries on with its primary outcome.
#[derive(Debug)]
pub struct CleanupWarning {
    /// The artifact that could not be removed.
    pub path: PathBuf,
    /// The underlying I/O failure.
    pub source: IoError,
}

impl CleanupWarning {
    pub(crate) fn new(path: impl Into<PathBuf>, source: IoError) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    /// Emit this warning through the `log` facade.
    pub(crate) fn log(&self) {
        log::warn!("{self}");
    }
}

impl Display for CleanupWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "Failed to remove {}: {}",
            self.path.display(),
            self.source
        )
    }
}
