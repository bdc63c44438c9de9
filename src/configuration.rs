//! Run configuration.
//!
//! [`SamplingOptions`] controls how frames are picked and written;
//! [`PipelineOptions`] wraps it with batching, staging directories, and
//! inference hardening. Both are builders: every setter consumes and returns
//! the options, clamping values that would make the pipeline misbehave.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framecast::{ImageFormat, PipelineOptions, SamplingOptions};
//!
//! let options = PipelineOptions::new()
//!     .with_sampling(
//!         SamplingOptions::new()
//!             .with_interval(Duration::from_secs(2))
//!             .with_image_format(ImageFormat::Png),
//!     )
//!     .with_batch_size(8)
//!     .with_inference_timeout(Duration::from_secs(30));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::FramecastError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Default spacing between sampled frames.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Frame rate assumed when the container declares none.
pub const DEFAULT_FPS_FALLBACK: f64 = 30.0;

/// Default number of frames per captioning batch.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Default bounded-channel capacity for async streams.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Still-image encoding used for frame artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    /// JPEG (`.jpg`). This is the default.
    #[default]
    Jpeg,
    /// PNG (`.png`).
    Png,
    /// Windows bitmap (`.bmp`).
    Bmp,
}

impl ImageFormat {
    /// File extension used when naming artifacts.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Bmp => "bmp",
        }
    }

    /// Parse a user-facing name or extension.
    pub fn from_extension(value: &str) -> Option<Self> {
        match value.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Frame sampling settings.
///
/// The interval is kept as given; [`sampling_stride`](crate::sampling_stride)
/// turns it into a decoded-frame stride once the source frame rate is known.
#[derive(Clone)]
pub struct SamplingOptions {
    pub(crate) interval: Duration,
    pub(crate) fps_fallback: f64,
    pub(crate) image_format: ImageFormat,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl Debug for SamplingOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SamplingOptions")
            .field("interval", &self.interval)
            .field("fps_fallback", &self.fps_fallback)
            .field("image_format", &self.image_format)
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingOptions {
    /// Defaults: one frame every 2 seconds, 30 fps fallback, JPEG output.
    pub fn new() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fps_fallback: DEFAULT_FPS_FALLBACK,
            image_format: ImageFormat::default(),
            progress: Arc::new(NoOpProgress),
            cancellation: None,
        }
    }

    /// Set the target spacing between sampled frames.
    ///
    /// A zero interval is accepted here; the stride computation clamps it to
    /// sampling every decoded frame.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the interval from a (possibly fractional) number of seconds.
    ///
    /// # Errors
    ///
    /// [`FramecastError::InvalidInterval`] unless `seconds` is finite and
    /// strictly positive.
    pub fn with_interval_seconds(self, seconds: f64) -> Result<Self, FramecastError> {
        if seconds <= 0.0 {
            return Err(FramecastError::InvalidInterval(seconds));
        }
        let interval = Duration::try_from_secs_f64(seconds)
            .map_err(|_| FramecastError::InvalidInterval(seconds))?;
        Ok(self.with_interval(interval))
    }

    /// Set the frame rate assumed when the source declares none.
    ///
    /// Non-finite or non-positive values are ignored.
    #[must_use]
    pub fn with_fps_fallback(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            self.fps_fallback = fps;
        }
        self
    }

    /// Set the still-image encoding used for artifacts.
    #[must_use]
    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = format;
        self
    }

    /// Attach a progress callback, invoked once per decoded frame.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Target spacing between sampled frames.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frame rate assumed when the source declares none.
    pub fn fps_fallback(&self) -> f64 {
        self.fps_fallback
    }

    /// Encoding used for artifacts.
    pub fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

/// Settings for a [`Pipeline`](crate::Pipeline).
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) sampling: SamplingOptions,
    pub(crate) batch_size: usize,
    pub(crate) inference_timeout: Option<Duration>,
    pub(crate) upload_directory: PathBuf,
    pub(crate) frame_directory: PathBuf,
    pub(crate) channel_capacity: usize,
    pub(crate) progress: Arc<dyn ProgressCallback>,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("sampling", &self.sampling)
            .field("batch_size", &self.batch_size)
            .field("inference_timeout", &self.inference_timeout)
            .field("upload_directory", &self.upload_directory)
            .field("frame_directory", &self.frame_directory)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    /// Defaults: batches of 4, no inference timeout, uploads staged under
    /// `uploads/`, frames written to `static/frames/`.
    pub fn new() -> Self {
        Self {
            sampling: SamplingOptions::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            inference_timeout: None,
            upload_directory: PathBuf::from("uploads"),
            frame_directory: Path::new("static").join("frames"),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Replace the sampling settings.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set how many frames go into one inference call. Clamped to at least 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Abandon an inference call after `timeout`.
    ///
    /// The affected batch fails with
    /// [`FramecastError::InferenceTimeout`](crate::FramecastError::InferenceTimeout).
    #[must_use]
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = Some(timeout);
        self
    }

    /// Directory uploaded sources are staged in.
    #[must_use]
    pub fn with_upload_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.upload_directory = directory.into();
        self
    }

    /// Default directory frame artifacts are written to.
    #[must_use]
    pub fn with_frame_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.frame_directory = directory.into();
        self
    }

    /// Bounded-channel size used by async streams. Clamped to at least 1.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Attach a progress callback for the captioning stage, invoked once per
    /// completed batch.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Sampling settings.
    pub fn sampling(&self) -> &SamplingOptions {
        &self.sampling
    }

    /// Frames per inference call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Per-batch inference limit, if any.
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout
    }

    /// Directory uploaded sources are staged in.
    pub fn upload_directory(&self) -> &Path {
        &self.upload_directory
    }

    /// Default directory frame artifacts are written to.
    pub fn frame_directory(&self) -> &Path {
        &self.frame_directory
    }

    /// Bounded-channel size used by async streams.
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}
