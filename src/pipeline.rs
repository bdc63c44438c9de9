//! The streaming orchestrator.
//!
//! [`Pipeline::run`] stages an upload, clears the output location, samples
//! the video, and hands back a [`CaptionRun`]: a lazy iterator that captions
//! one batch at a time and yields each [`CaptionResult`] in frame order as
//! soon as its batch is done.
//!
//! Upload and decode failures are returned by `run` itself, so a transport
//! can answer them before opening any stream. Once a `CaptionRun` exists the
//! only error it can yield is a captioning failure (or cancellation), after
//! which it ends. However a run ends (drained, failed, or dropped half-way)
//! the staged source is deleted exactly once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecast::{CaptionerResult, Pipeline, PipelineOptions, Upload};
//! use image::RgbImage;
//!
//! let captioner = |images: &[RgbImage]| -> CaptionerResult {
//!     Ok(images.iter().map(|_| "a frame".to_string()).collect())
//! };
//! let pipeline = Pipeline::new(Arc::new(captioner), PipelineOptions::new());
//!
//! let run = pipeline.run(Upload::from_path("input.mp4")?)?;
//! for result in run {
//!     let result = result?;
//!     println!("{}: {}", result.frame_identifier, result.text);
//! }
//! # Ok::<(), framecast::FramecastError>(())
//! ```

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::Arc;

use crate::{
    captioner::{BatchCaptioner, Captioner},
    claim::{PathClaim, PathRegistry},
    configuration::PipelineOptions,
    error::FramecastError,
    frames::{Batches, FrameSet, batch_ranges, purge_frames},
    progress::{CancellationToken, OperationType, ProgressTracker},
    sampler::{FfmpegSampler, FrameSampler, SampleReport},
    upload::{StagedSource, Upload},
};

/// One captioned frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionResult {
    /// Position of the frame in the frame set.
    pub index: u64,
    /// Identifier sent to clients (the artifact file name).
    pub frame_identifier: String,
    /// Caption text as returned by the backend.
    pub text: String,
}

/// Where a run is in its lifecycle. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Source persisted under its sanitized name.
    Received,
    /// Stale artifacts from an earlier run are being purged.
    Clearing,
    /// Frames are being decoded and written.
    Sampling,
    /// Batches are being captioned and emitted.
    Captioning,
    /// The staged source is being deleted.
    Cleanup,
    /// Every frame was captioned.
    Done,
    /// Decoding, captioning, or the consumer gave up.
    Failed,
}

impl RunState {
    /// `true` for [`Done`](RunState::Done) and [`Failed`](RunState::Failed).
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

static OUTPUT_LOCATIONS: PathRegistry = PathRegistry::new();

/// Claim `output` for one run.
///
/// Both directories are created and canonicalized first, so aliases of one
/// location share a claim. An output that is, or contains, the upload
/// directory is refused outright.
fn claim_output(output: &Path, upload_directory: &Path) -> Result<PathClaim, FramecastError> {
    fs::create_dir_all(output)?;
    fs::create_dir_all(upload_directory)?;
    let location = fs::canonicalize(output)?;
    if fs::canonicalize(upload_directory)?.starts_with(&location) {
        return Err(FramecastError::OutputContainsUploads {
            output: output.to_path_buf(),
            upload_directory: upload_directory.to_path_buf(),
        });
    }
    OUTPUT_LOCATIONS
        .claim(location)
        .ok_or_else(|| FramecastError::OutputLocationBusy {
            path: output.to_path_buf(),
        })
}

/// Turns uploads into streams of captions.
///
/// Holds the shared captioning backend and the settings; cheap to share
/// behind an `Arc` and safe to use from several threads, one run per
/// output location at a time.
pub struct Pipeline {
    sampler: Arc<dyn FrameSampler>,
    captioner: BatchCaptioner,
    options: PipelineOptions,
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Pipeline")
            .field("captioner", &self.captioner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build a pipeline around an initialised captioning backend, sampling
    /// with FFmpeg.
    pub fn new(captioner: Arc<dyn Captioner>, options: PipelineOptions) -> Self {
        let mut batch_captioner = BatchCaptioner::new(captioner);
        if let Some(timeout) = options.inference_timeout {
            batch_captioner = batch_captioner.with_timeout(timeout);
        }
        Self {
            sampler: Arc::new(FfmpegSampler),
            captioner: batch_captioner,
            options,
        }
    }

    /// Replace the frame source.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn FrameSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// The settings this pipeline was built with.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run `upload` through the pipeline, writing frames to the configured
    /// frame directory.
    ///
    /// # Errors
    ///
    /// See [`run_at`](Pipeline::run_at).
    pub fn run(&self, upload: Upload) -> Result<CaptionRun, FramecastError> {
        self.run_at(upload, &self.options.frame_directory)
    }

    /// Run `upload` through the pipeline, writing frames to `output`.
    ///
    /// Staging, clearing, and sampling happen before this returns; the
    /// returned run captions lazily as it is iterated.
    ///
    /// # Errors
    ///
    /// - [`FramecastError::OutputLocationBusy`] if another run owns `output`.
    /// - [`FramecastError::OutputContainsUploads`] if `output` is, or is a
    ///   parent of, the upload directory.
    /// - [`FramecastError::InvalidFilename`] or
    ///   [`FramecastError::SourceInUse`] if the upload cannot be staged.
    /// - [`FramecastError::Decode`] or [`FramecastError::NoVideoStream`]
    ///   if the source yields no frame. The staged source is removed first.
    pub fn run_at(&self, upload: Upload, output: &Path) -> Result<CaptionRun, FramecastError> {
        let lease = claim_output(output, &self.options.upload_directory)?;
        let source = upload.stage(&self.options.upload_directory)?;
        log::info!(
            "Received {}; frames go to {}",
            source.path().display(),
            output.display()
        );

        let mut run = CaptionRun {
            state: RunState::Received,
            source,
            report: None,
            batches: batch_ranges(0, 1),
            pending: VecDeque::new(),
            captioner: self.captioner.clone(),
            tracker: None,
            cancellation: self.options.sampling.cancellation.clone(),
            emitted: 0,
            lease: Some(lease),
        };

        run.transition(RunState::Clearing);
        if let Err(error) = purge_frames(output) {
            log::warn!("Could not clear {}: {error}", output.display());
        }

        run.transition(RunState::Sampling);
        let report = self
            .sampler
            .sample(run.source.path(), output, &self.options.sampling)
            .map_err(|error| run.abort(error))?;

        run.begin_captioning(report, &self.options);
        Ok(run)
    }
}

/// A run in progress, yielding caption results in frame order.
///
/// Captioning is driven by iteration: each call to [`next`](Iterator::next)
/// either returns an already-captioned result or captions the next batch.
/// After an error the iterator is exhausted. Dropping it early stops the run
/// and cleans up.
pub struct CaptionRun {
    state: RunState,
    source: StagedSource,
    report: Option<SampleReport>,
    batches: Batches,
    pending: VecDeque<CaptionResult>,
    captioner: BatchCaptioner,
    tracker: Option<ProgressTracker>,
    cancellation: Option<CancellationToken>,
    emitted: u64,
    lease: Option<PathClaim>,
}

impl Debug for CaptionRun {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CaptionRun")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("remaining_batches", &self.batches.len())
            .field("pending", &self.pending.len())
            .field("emitted", &self.emitted)
            .field("holds_location", &self.lease.is_some())
            .finish_non_exhaustive()
    }
}

impl CaptionRun {
    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// What sampling produced, once it has finished.
    pub fn sample_report(&self) -> Option<&SampleReport> {
        self.report.as_ref()
    }

    /// The frames being captioned.
    pub fn frames(&self) -> Option<&FrameSet> {
        self.report.as_ref().map(|report| &report.frames)
    }

    /// Results handed out so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Where the uploaded source was staged. The file is gone once the run
    /// reaches a terminal state.
    pub fn source_path(&self) -> &Path {
        self.source.path()
    }

    fn transition(&mut self, next: RunState) {
        log::debug!(
            "Run for {}: {:?} -> {next:?}",
            self.source.path().display(),
            self.state
        );
        self.state = next;
    }

    fn begin_captioning(&mut self, report: SampleReport, options: &PipelineOptions) {
        self.batches = report.frames.batches(options.batch_size);
        self.tracker = Some(ProgressTracker::new(
            options.progress.clone(),
            OperationType::Captioning,
            Some(report.frames.len()),
        ));
        log::debug!(
            "Captioning {} frame(s) in {} batch(es) of up to {}",
            report.frames.len(),
            self.batches.len(),
            options.batch_size
        );
        let empty = report.frames.is_empty();
        self.report = Some(report);
        self.transition(RunState::Captioning);
        if empty {
            self.finish(RunState::Done);
        }
    }

    /// Clean up after a failure before sampling finished and hand the error
    /// back.
    fn abort(&mut self, error: FramecastError) -> FramecastError {
        log::warn!("Run for {} failed: {error}", self.source.path().display());
        self.finish(RunState::Failed);
        error
    }

    /// Enter `outcome` through [`RunState::Cleanup`]. Idempotent.
    fn finish(&mut self, outcome: RunState) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(RunState::Cleanup);
        self.source.remove();
        if let Some(lease) = self.lease.take() {
            log::debug!("Released output location {}", lease.path().display());
        }
        self.transition(outcome);
        log::info!(
            "Run for {} finished {outcome:?} after {} result(s)",
            self.source.path().display(),
            self.emitted + self.pending.len() as u64
        );
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    fn caption_next_batch(&mut self) -> Result<(), FramecastError> {
        let Some(frames) = self.report.as_ref().map(|report| &report.frames) else {
            return Ok(());
        };
        let Some(batch) = self.batches.next() else {
            return Ok(());
        };

        let paths = frames.paths(batch);
        let captions = self.captioner.caption_batch(batch.start, &paths)?;
        let results: Vec<CaptionResult> = batch
            .indices()
            .zip(captions)
            .map(|(index, text)| CaptionResult {
                index,
                frame_identifier: frames.identifier(index),
                text,
            })
            .collect();

        log::debug!(
            "Captioned frames {}..{} ({} batch(es) left)",
            batch.start,
            batch.end,
            self.batches.len()
        );
        self.pending.extend(results);
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.advance(batch.len() as u64, None);
        }
        Ok(())
    }
}

impl Iterator for CaptionRun {
    type Item = Result<CaptionResult, FramecastError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(result) = self.pending.pop_front() {
                self.emitted += 1;
                return Some(Ok(result));
            }
            if self.state != RunState::Captioning {
                return None;
            }
            if self.is_cancelled() {
                self.finish(RunState::Failed);
                return Some(Err(FramecastError::Cancelled));
            }
            if let Err(error) = self.caption_next_batch() {
                log::warn!(
                    "Run for {} failed after {} result(s): {error}",
                    self.source.path().display(),
                    self.emitted
                );
                self.finish(RunState::Failed);
                return Some(Err(error));
            }
            if self.batches.len() == 0 {
                self.finish(RunState::Done);
            }
        }
    }
}

impl FusedIterator for CaptionRun {}

impl Drop for CaptionRun {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            log::debug!(
                "Run for {} dropped in state {:?}",
                self.source.path().display(),
                self.state
            );
            self.finish(RunState::Failed);
        }
    }
}
