//! Batched captioning.
//!
//! [`Captioner`] is the boundary to the inference backend: one call, a batch
//! of RGB images in, one caption per image out, same order. The backend is
//! created once by the caller and shared through an `Arc`; nothing here
//! loads or reloads it.
//!
//! [`BatchCaptioner`] sits in front of it. It reads a batch of frame
//! artifacts from disk, normalises them to RGB8, and makes the call. A batch
//! is all-or-nothing: a single unreadable artifact, a failed call, or a
//! caption count that does not match the input fails the whole batch with
//! [`FramecastError::Inference`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use framecast::{BatchCaptioner, Captioner, CaptionerResult};
//! use image::RgbImage;
//!
//! struct SizeCaptioner;
//!
//! impl Captioner for SizeCaptioner {
//!     fn caption_batch(&self, images: &[RgbImage]) -> CaptionerResult {
//!         Ok(images
//!             .iter()
//!             .map(|image| format!("a {}x{} frame", image.width(), image.height()))
//!             .collect())
//!     }
//! }
//!
//! let captioner = BatchCaptioner::new(Arc::new(SizeCaptioner));
//! let paths = vec![PathBuf::from("frames/frame_0.jpg")];
//! let captions = captioner.caption_batch(0, &paths)?;
//! # Ok::<(), framecast::FramecastError>(())
//! ```

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    mpsc::{self, RecvTimeoutError},
};
use std::thread;
use std::time::Duration;

use image::RgbImage;

use crate::error::FramecastError;

/// Result of one inference call.
pub type CaptionerResult = Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>>;

/// An inference backend that captions a batch of images in one call.
///
/// Implementations must return exactly one caption per input image, in
/// input order. They may be slow and may fail.
///
/// Closures of the right shape implement this trait too:
///
/// ```
/// use framecast::Captioner;
/// use image::RgbImage;
///
/// fn assert_captioner<C: Captioner>(_: &C) {}
///
/// let echo = |images: &[RgbImage]| -> framecast::CaptionerResult {
///     Ok(vec!["frame".to_string(); images.len()])
/// };
/// assert_captioner(&echo);
/// ```
pub trait Captioner: Send + Sync {
    /// Caption every image in `images`.
    fn caption_batch(&self, images: &[RgbImage]) -> CaptionerResult;
}

impl<F> Captioner for F
where
    F: Fn(&[RgbImage]) -> CaptionerResult + Send + Sync,
{
    fn caption_batch(&self, images: &[RgbImage]) -> CaptionerResult {
        self(images)
    }
}

/// Loads batches of frame artifacts and captions them through a
/// [`Captioner`].
#[derive(Clone)]
pub struct BatchCaptioner {
    captioner: Arc<dyn Captioner>,
    timeout: Option<Duration>,
}

impl Debug for BatchCaptioner {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BatchCaptioner")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BatchCaptioner {
    /// Wrap an already-initialised backend.
    pub fn new(captioner: Arc<dyn Captioner>) -> Self {
        Self {
            captioner,
            timeout: None,
        }
    }

    /// Abandon any inference call that takes longer than `timeout`.
    ///
    /// The call runs on a worker thread; when the limit passes the batch
    /// fails with [`FramecastError::InferenceTimeout`] and the worker's
    /// eventual answer is discarded.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Caption the artifacts at `frame_paths`, returning one caption per
    /// path in the same order.
    ///
    /// `batch_start` is the frame index of the first path and only serves
    /// error reporting.
    ///
    /// # Errors
    ///
    /// [`FramecastError::Inference`] if the batch is empty, an artifact
    /// cannot be read or decoded, the backend fails, or the backend returns
    /// the wrong number of captions. [`FramecastError::InferenceTimeout`]
    /// if a timeout is configured and exceeded.
    pub fn caption_batch(
        &self,
        batch_start: u64,
        frame_paths: &[PathBuf],
    ) -> Result<Vec<String>, FramecastError> {
        if frame_paths.is_empty() {
            return Err(inference_error(batch_start, "empty batch"));
        }

        let images =
            load_batch_images(frame_paths).map_err(|reason| inference_error(batch_start, reason))?;
        let captions = self.infer(batch_start, images)?;

        if captions.len() != frame_paths.len() {
            return Err(inference_error(
                batch_start,
                format!(
                    "expected {} caption(s), backend returned {}",
                    frame_paths.len(),
                    captions.len()
                ),
            ));
        }
        Ok(captions)
    }

    fn infer(&self, batch_start: u64, images: Vec<RgbImage>) -> Result<Vec<String>, FramecastError> {
        let Some(timeout) = self.timeout else {
            return self
                .captioner
                .caption_batch(&images)
                .map_err(|error| inference_error(batch_start, error));
        };

        let captioner = Arc::clone(&self.captioner);
        let (sender, receiver) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("framecast-inference-{batch_start}"))
            .spawn(move || {
                // The receiver is gone once the call has timed out.
                let _ = sender.send(captioner.caption_batch(&images));
            })
            .map_err(|error| worker_spawn_error(batch_start, &error))?;

        match receiver.recv_timeout(timeout) {
            Ok(result) => result.map_err(|error| inference_error(batch_start, error)),
            Err(RecvTimeoutError::Timeout) => Err(FramecastError::InferenceTimeout {
                batch_start,
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(inference_error(
                batch_start,
                "inference worker exited without answering",
            )),
        }
    }
}

fn inference_error(batch_start: u64, reason: impl Display) -> FramecastError {
    FramecastError::Inference {
        batch_start,
        reason: reason.to_string(),
    }
}

fn worker_spawn_error(batch_start: u64, error: &io::Error) -> FramecastError {
    inference_error(
        batch_start,
        format!("cannot start inference worker: {error}"),
    )
}

fn load_image(path: &Path) -> Result<RgbImage, String> {
    image::open(path)
        .map(|image| image.into_rgb8())
        .map_err(|error| format!("cannot read {}: {error}", path.display()))
}

/// Read and RGB8-normalise every artifact of a batch, in order.
///
/// Stops at the first artifact that cannot be read.
#[cfg(not(feature = "rayon"))]
pub fn load_batch_images(frame_paths: &[PathBuf]) -> Result<Vec<RgbImage>, String> {
    frame_paths.iter().map(|path| load_image(path)).collect()
}

/// Read and RGB8-normalise every artifact of a batch, in order.
///
/// Artifacts are decoded in parallel on the rayon pool; the output keeps
/// input order.
#[cfg(feature = "rayon")]
pub fn load_batch_images(frame_paths: &[PathBuf]) -> Result<Vec<RgbImage>, String> {
    use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

    frame_paths.par_iter().map(|path| load_image(path)).collect()
}
