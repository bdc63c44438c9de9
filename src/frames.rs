//! Frame artifacts on disk and how they are split into batches.
//!
//! A [`FrameSet`] names the `frame_<i>.<ext>` files one sampling pass wrote,
//! indices `0..len` with no gaps. [`FrameSet::batches`] chunks those indices
//! into [`BatchRange`]s of a fixed size, starting at 0, so only the final
//! batch can be short.

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::configuration::ImageFormat;
use crate::error::CleanupWarning;

/// File name of the artifact for frame `index`.
pub fn frame_file_name(index: u64, format: ImageFormat) -> String {
    format!("frame_{index}.{}", format.extension())
}

/// The ordered, contiguous frames written by one sampling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    directory: PathBuf,
    count: u64,
    format: ImageFormat,
}

impl FrameSet {
    /// Describe `count` artifacts in `directory`.
    pub fn new<P: Into<PathBuf>>(directory: P, count: u64, format: ImageFormat) -> Self {
        Self {
            directory: directory.into(),
            count,
            format,
        }
    }

    /// Directory holding the artifacts.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of frames.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// `true` when sampling saved nothing.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Encoding of the artifacts.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Identifier reported to clients for frame `index` (the artifact's
    /// file name, e.g. `frame_3.jpg`).
    pub fn identifier(&self, index: u64) -> String {
        frame_file_name(index, self.format)
    }

    /// Location of the artifact for frame `index`.
    pub fn path(&self, index: u64) -> PathBuf {
        self.directory.join(self.identifier(index))
    }

    /// Artifact locations for every frame in `batch`, in order.
    pub fn paths(&self, batch: BatchRange) -> Vec<PathBuf> {
        batch.indices().map(|index| self.path(index)).collect()
    }

    /// Chunk the frame indices into batches of at most `batch_size`.
    pub fn batches(&self, batch_size: usize) -> Batches {
        batch_ranges(self.count, batch_size)
    }
}

/// A half-open range of frame indices captioned in one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchRange {
    /// First frame index (inclusive).
    pub start: u64,
    /// One past the last frame index.
    pub end: u64,
}

impl BatchRange {
    /// Number of frames in the batch.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// `true` for a batch with no frames. [`Batches`] never yields one.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The frame indices covered by this batch.
    pub fn indices(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Iterator over the [`BatchRange`]s covering `0..total`.
#[derive(Debug, Clone)]
pub struct Batches {
    next: u64,
    total: u64,
    size: u64,
}

/// Chunk `0..total` into ranges of `batch_size` (clamped to at least 1).
pub fn batch_ranges(total: u64, batch_size: usize) -> Batches {
    Batches {
        next: 0,
        total,
        size: batch_size.max(1) as u64,
    }
}

impl Iterator for Batches {
    type Item = BatchRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.size).min(self.total);
        self.next = end;
        Some(BatchRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total.saturating_sub(self.next).div_ceil(self.size) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches {}

/// Whether `name` looks like an artifact written by sampling:
/// `frame_<digits>.<image extension>`.
pub(crate) fn is_frame_artifact(name: &str) -> bool {
    let Some((index, extension)) = name
        .strip_prefix("frame_")
        .and_then(|rest| rest.split_once('.'))
    else {
        return false;
    };
    !index.is_empty()
        && index.bytes().all(|byte| byte.is_ascii_digit())
        && ImageFormat::from_extension(extension).is_some()
}

/// Remove the frame artifacts a previous run left in `directory`, creating
/// the directory if it does not exist yet.
///
/// Only regular files named like [`frame_file_name`] output are touched.
/// Other files, subdirectories and symlinks are left alone, so pointing the
/// frame directory at a shared folder never deletes unrelated data.
/// Artifacts that cannot be removed are logged as [`CleanupWarning`]s and
/// skipped. Returns how many artifacts were removed.
pub fn purge_frames(directory: &Path) -> io::Result<usize> {
    if !directory.exists() {
        fs::create_dir_all(directory)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(directory)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                CleanupWarning::new(directory, error).log();
                continue;
            }
        };
        let is_file = entry.file_type().is_ok_and(|kind| kind.is_file());
        let name = entry.file_name();
        if !is_file || !name.to_str().is_some_and(is_frame_artifact) {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => CleanupWarning::new(path, error).log(),
        }
    }

    log::debug!(
        "Purged {removed} stale frame(s) from {}",
        directory.display()
    );
    Ok(removed)
}
