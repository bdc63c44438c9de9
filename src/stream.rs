//! Async caption streaming.
//!
//! [`CaptionStream`] runs a [`CaptionRun`] on a blocking thread via
//! `tokio::task::spawn_blocking` and forwards each result through a bounded
//! channel, so a web handler can await results without tying up the runtime
//! with decoding or inference.
//!
//! [`open_caption_stream`] does staging and sampling before it returns: an
//! upload or decode error comes back as `Err` and no stream ever exists.
//! Dropping the stream stops the run at the next batch boundary; the staged
//! source is still removed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecast::{
//!     CaptionerResult, FramecastError, Pipeline, PipelineOptions, Upload, open_caption_stream,
//! };
//! use image::RgbImage;
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> Result<(), FramecastError> {
//! let captioner = |images: &[RgbImage]| -> CaptionerResult {
//!     Ok(vec!["a frame".to_string(); images.len()])
//! };
//! let pipeline = Arc::new(Pipeline::new(Arc::new(captioner), PipelineOptions::new()));
//!
//! let mut stream = open_caption_stream(pipeline, Upload::from_path("input.mp4")?).await?;
//! while let Some(result) = stream.next().await {
//!     let result = result?;
//!     println!("{}: {}", result.frame_identifier, result.text);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};

use crate::error::FramecastError;
use crate::pipeline::{CaptionResult, CaptionRun, Pipeline};
use crate::upload::Upload;
use crate::wire::encode_event;

type StreamItem = Result<CaptionResult, FramecastError>;

/// Caption results produced by a background run.
///
/// Implements [`tokio_stream::Stream`], so the usual
/// [`StreamExt`](tokio_stream::StreamExt) combinators apply. Ends after the
/// last result, or right after the error that failed the run.
pub struct CaptionStream {
    receiver: Receiver<StreamItem>,
    handle: JoinHandle<()>,
}

impl Stream for CaptionStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl CaptionStream {
    /// Stop consuming and wait until the run has cleaned up.
    pub async fn close(self) {
        let Self { receiver, handle } = self;
        drop(receiver);
        if let Err(error) = handle.await {
            log::warn!("Caption worker did not shut down cleanly: {error}");
        }
    }
}

impl CaptionRun {
    /// Drive this run on a blocking thread, buffering up to `capacity`
    /// results.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn into_stream(self, capacity: usize) -> CaptionStream {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || drive_run(self, &sender));
        CaptionStream { receiver, handle }
    }
}

/// Forward results until the run ends or the receiver goes away.
fn drive_run(mut run: CaptionRun, sender: &Sender<StreamItem>) {
    while !sender.is_closed() {
        let Some(item) = run.next() else {
            break;
        };
        if sender.blocking_send(item).is_err() {
            break;
        }
    }
    if !run.state().is_terminal() {
        log::debug!("Caption stream consumer went away after {} result(s)", run.emitted());
    }
}

/// Run `upload` through `pipeline` on a blocking thread and stream the
/// results.
///
/// # Errors
///
/// Everything [`Pipeline::run`] can return, before any result is produced.
/// [`FramecastError::Cancelled`] if the blocking task itself was aborted.
pub async fn open_caption_stream(
    pipeline: Arc<Pipeline>,
    upload: Upload,
) -> Result<CaptionStream, FramecastError> {
    let capacity = pipeline.options().channel_capacity();
    let run = tokio::task::spawn_blocking(move || pipeline.run(upload))
        .await
        .map_err(|_| FramecastError::Cancelled)??;
    Ok(run.into_stream(capacity))
}

/// Like [`open_caption_stream`], writing frames to `output` instead of the
/// configured frame directory.
///
/// # Errors
///
/// Same as [`open_caption_stream`].
pub async fn open_caption_stream_at(
    pipeline: Arc<Pipeline>,
    upload: Upload,
    output: PathBuf,
) -> Result<CaptionStream, FramecastError> {
    let capacity = pipeline.options().channel_capacity();
    let run = tokio::task::spawn_blocking(move || pipeline.run_at(upload, &output))
        .await
        .map_err(|_| FramecastError::Cancelled)??;
    Ok(run.into_stream(capacity))
}

/// Encode every result as a wire event, ready to be written to a response
/// body unchanged.
pub fn event_stream(
    stream: CaptionStream,
) -> impl futures_core::Stream<Item = Result<String, FramecastError>> {
    stream.map(|item| item.map(|result| encode_event(&result)))
}
