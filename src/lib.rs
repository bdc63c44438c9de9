//! # framecast
//!
//! Sample still frames from an uploaded video, caption them in batches, and
//! stream the captions back while the rest of the video is still being
//! processed.
//!
//! A run goes through three stages:
//!
//! 1. **Sampling** decodes the video with FFmpeg (via
//!    [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)) and writes one
//!    still frame every *interval* seconds as `frame_<n>.<ext>`.
//! 2. **Captioning** feeds those frames, a fixed-size batch at a time, to a
//!    [`Captioner`] you supply.
//! 3. **Streaming** hands each `(frame, caption)` pair to the caller as soon
//!    as its batch is done, in frame order, and deletes the uploaded source
//!    however the run ends.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::stdout;
//! use std::sync::Arc;
//!
//! use framecast::{CaptionerResult, EventWriter, Pipeline, PipelineOptions, Upload};
//! use image::RgbImage;
//!
//! let captioner = |images: &[RgbImage]| -> CaptionerResult {
//!     Ok(vec!["a frame".to_string(); images.len()])
//! };
//! let pipeline = Pipeline::new(Arc::new(captioner), PipelineOptions::new());
//!
//! let mut events = EventWriter::new(stdout());
//! for result in pipeline.run(Upload::from_path("input.mp4")?)? {
//!     events.write_result(&result?)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Errors
//!
//! Upload and decode problems are returned before any result exists; a
//! captioning failure ends an already-open stream after the results that
//! preceded it. [`FramecastError::kind`] sorts every error into one of
//! these classes.
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `CaptionStream` and `open_caption_stream` for Tokio-based servers |
//! | `rayon` | Decode the images of a batch in parallel |
//! | `http` | `HttpCaptioner`, a backend that calls a remote captioning service (also builds the `framecast` CLI) |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod captioner;
mod claim;
pub mod configuration;
mod conversion;
pub mod error;
pub mod ffmpeg;
pub mod frames;
#[cfg(feature = "http")]
pub mod http;
pub mod pipeline;
pub mod progress;
pub mod sampler;
#[cfg(feature = "async")]
pub mod stream;
pub mod upload;
pub mod wire;

pub use captioner::{BatchCaptioner, Captioner, CaptionerResult, load_batch_images};
pub use configuration::{ImageFormat, PipelineOptions, SamplingOptions};
pub use error::{CleanupWarning, ErrorKind, FramecastError};
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use frames::{BatchRange, Batches, FrameSet, batch_ranges, frame_file_name, purge_frames};
#[cfg(feature = "http")]
pub use http::{HttpCaptioner, HttpCaptionerError};
pub use pipeline::{CaptionResult, CaptionRun, Pipeline, RunState};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use sampler::{
    FfmpegSampler, FrameSampler, FrameWriter, SampleReport, SourceInfo, resolve_frame_rate,
    sampling_stride,
};
#[cfg(feature = "async")]
pub use stream::{CaptionStream, event_stream, open_caption_stream, open_caption_stream_at};
pub use upload::{StagedSource, Upload, sanitize_filename};
pub use wire::{
    EventWriter, WireEvent, decode_event, encode_event, encode_payload, escape_caption,
    unescape_caption,
};
