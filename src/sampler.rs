//! Frame sampling.
//!
//! The sampler decodes a video sequentially and keeps one frame every
//! `stride` decoded frames, where the stride is derived from the source
//! frame rate and the configured interval. Kept frames are written as
//! `frame_<n>.<ext>` with `n` counting successful writes only, so a frame
//! that fails to encode leaves no hole in the numbering.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framecast::{FfmpegSampler, FrameSampler, SamplingOptions};
//!
//! let options = SamplingOptions::new().with_interval(Duration::from_secs(2));
//! let report = FfmpegSampler.sample("input.mp4".as_ref(), "frames".as_ref(), &options)?;
//! println!("saved {} frames (stride {})", report.frames.len(), report.stride);
//! # Ok::<(), framecast::FramecastError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::{
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::{
    configuration::{DEFAULT_FPS_FALLBACK, ImageFormat, SamplingOptions},
    conversion::{container_duration, frame_to_rgb_buffer, rational_to_fps},
    error::{CleanupWarning, FramecastError},
    frames::{FrameSet, frame_file_name},
    progress::{OperationType, ProgressTracker},
};

/// Pick the frame rate to sample with.
///
/// Declared rates that are zero, negative, or not finite are common in the
/// wild; they are replaced by `fallback` (itself replaced by 30 fps if it is
/// unusable too).
pub fn resolve_frame_rate(declared: f64, fallback: f64) -> f64 {
    if declared.is_finite() && declared > 0.0 {
        declared
    } else if fallback.is_finite() && fallback > 0.0 {
        fallback
    } else {
        DEFAULT_FPS_FALLBACK
    }
}

/// Number of decoded frames between two samples: `max(round(fps × interval), 1)`.
///
/// Never returns 0, whatever the inputs (float-to-int casts saturate and map
/// NaN to 0 before the clamp).
pub fn sampling_stride(frames_per_second: f64, interval: Duration) -> u64 {
    ((frames_per_second * interval.as_secs_f64()).round() as u64).max(1)
}

/// What the container says about its best video stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate as declared by the container (may be 0).
    pub declared_frames_per_second: f64,
    /// Frame rate used for sampling, after the fallback was applied.
    pub frames_per_second: f64,
    /// Container duration, or zero when unknown.
    pub duration: Duration,
    /// Estimated number of decodable frames, or 0 when unknown.
    pub estimated_frames: u64,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
}

impl SourceInfo {
    /// `true` when the declared frame rate was unusable.
    pub fn used_fallback_rate(&self) -> bool {
        self.declared_frames_per_second != self.frames_per_second
    }
}

/// Outcome of one sampling pass.
#[derive(Debug, Clone)]
pub struct SampleReport {
    /// The artifacts that were written.
    pub frames: FrameSet,
    /// Stream properties the stride was derived from.
    pub source: SourceInfo,
    /// Decoded frames between two samples.
    pub stride: u64,
    /// Total frames decoded.
    pub decoded_frames: u64,
    /// Frames that were due for sampling but could not be written.
    pub failed_writes: u64,
}

/// Turns a video file into a [`FrameSet`].
///
/// [`FfmpegSampler`] is the production implementation; the trait exists so
/// the [`Pipeline`](crate::Pipeline) can be driven by other frame sources.
pub trait FrameSampler: Send + Sync {
    /// Sample `source` into `output`.
    ///
    /// `output` is expected to be empty; the caller purges it.
    ///
    /// # Errors
    ///
    /// [`FramecastError::Decode`] or [`FramecastError::NoVideoStream`] when
    /// the source cannot be opened or yields no decodable frame.
    fn sample(
        &self,
        source: &Path,
        output: &Path,
        options: &SamplingOptions,
    ) -> Result<SampleReport, FramecastError>;
}

/// Writes every `stride`-th offered frame to disk.
///
/// Tracks decoded frames and successful writes separately: a failed write is
/// logged, any partial file is removed, and the next sampled frame reuses
/// the same sequence number.
#[derive(Debug)]
pub struct FrameWriter {
    directory: PathBuf,
    format: ImageFormat,
    stride: u64,
    decoded: u64,
    saved: u64,
    failed: u64,
}

impl FrameWriter {
    /// Write into `directory`, keeping one frame every `stride` (clamped to
    /// at least 1).
    pub fn new<P: Into<PathBuf>>(directory: P, format: ImageFormat, stride: u64) -> Self {
        Self {
            directory: directory.into(),
            format,
            stride: stride.max(1),
            decoded: 0,
            saved: 0,
            failed: 0,
        }
    }

    /// Offer the next decoded frame.
    ///
    /// `render` is only called when the frame is due for sampling, so
    /// skipped frames are never converted. Returns `true` if an artifact was
    /// written.
    pub fn offer<F>(&mut self, render: F) -> bool
    where
        F: FnOnce() -> Result<RgbImage, FramecastError>,
    {
        let counter = self.decoded;
        self.decoded += 1;
        if counter % self.stride != 0 {
            return false;
        }

        let path = self.directory.join(frame_file_name(self.saved, self.format));
        let written = render().and_then(|image| {
            image
                .save_with_format(&path, self.format.to_image_format())
                .map_err(FramecastError::from)
        });

        match written {
            Ok(()) => {
                self.saved += 1;
                true
            }
            Err(error) => {
                self.failed += 1;
                log::warn!(
                    "Skipping decoded frame {counter}: could not write {}: {error}",
                    path.display()
                );
                if path.is_file() {
                    if let Err(error) = fs::remove_file(&path) {
                        CleanupWarning::new(&path, error).log();
                    }
                }
                false
            }
        }
    }

    /// Frames offered so far.
    pub fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    /// Artifacts written so far.
    pub fn saved_frames(&self) -> u64 {
        self.saved
    }

    /// Sampled frames that could not be written.
    pub fn failed_writes(&self) -> u64 {
        self.failed
    }

    /// Stride in use.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// The frame set written so far.
    pub fn into_frame_set(self) -> FrameSet {
        FrameSet::new(self.directory, self.saved, self.format)
    }
}

/// Samples frames by decoding with FFmpeg.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSampler;

struct OpenedSource {
    input: Input,
    stream_index: usize,
    decoder: VideoDecoder,
    info: SourceInfo,
}

impl FfmpegSampler {
    /// Read stream properties without decoding any frame.
    ///
    /// # Errors
    ///
    /// Same as [`FrameSampler::sample`] for unreadable sources.
    pub fn probe(&self, source: &Path, fps_fallback: f64) -> Result<SourceInfo, FramecastError> {
        open_source(source, fps_fallback).map(|opened| opened.info)
    }
}

impl FrameSampler for FfmpegSampler {
    fn sample(
        &self,
        source: &Path,
        output: &Path,
        options: &SamplingOptions,
    ) -> Result<SampleReport, FramecastError> {
        let OpenedSource {
            mut input,
            stream_index,
            mut decoder,
            info,
        } = open_source(source, options.fps_fallback)?;

        let stride = sampling_stride(info.frames_per_second, options.interval);
        if info.used_fallback_rate() {
            log::warn!(
                "{} declares {} fps; sampling at fallback rate {} fps",
                source.display(),
                info.declared_frames_per_second,
                info.frames_per_second,
            );
        }
        log::info!(
            "Sampling {} ({}x{}, {:.2} fps, {:.2}s, codec={}) every {} frame(s) into {}",
            source.display(),
            info.width,
            info.height,
            info.frames_per_second,
            info.duration.as_secs_f64(),
            info.codec,
            stride,
            output.display(),
        );

        fs::create_dir_all(output)?;
        let mut writer = FrameWriter::new(output, options.image_format, stride);
        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            OperationType::Sampling,
            Some(info.estimated_frames),
        );
        let mut scaler: Option<ScalingContext> = None;
        let mut decoded_frame = VideoFrame::empty();
        let mut last_error: Option<String> = None;

        let mut receive_decoded_frames = |decoder: &mut VideoDecoder| -> Result<(), FramecastError> {
            while decoder.receive_frame(&mut decoded_frame).is_ok() {
                if options.is_cancelled() {
                    return Err(FramecastError::Cancelled);
                }
                writer.offer(|| render_rgb(&mut scaler, &decoded_frame));
                tracker.advance(1, Some(writer.saved_frames()));
            }
            Ok(())
        };

        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            // Corrupt packets are skipped; the decoder resynchronises on the next keyframe.
            if let Err(error) = decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable packet: {error}");
                last_error = Some(error.to_string());
                continue;
            }
            receive_decoded_frames(&mut decoder)?;
        }

        match decoder.send_eof() {
            Ok(()) => receive_decoded_frames(&mut decoder)?,
            Err(error) => last_error = Some(error.to_string()),
        }

        if writer.decoded_frames() == 0 {
            return Err(FramecastError::Decode {
                path: source.to_path_buf(),
                reason: last_error.unwrap_or_else(|| "no decodable video frames".to_string()),
            });
        }

        let decoded_frames = writer.decoded_frames();
        let failed_writes = writer.failed_writes();
        let frames = writer.into_frame_set();

        log::info!(
            "Sampled {} frame(s) from {decoded_frames} decoded ({failed_writes} write failure(s))",
            frames.len(),
        );

        Ok(SampleReport {
            frames,
            source: info,
            stride,
            decoded_frames,
            failed_writes,
        })
    }
}

fn decode_error(path: &Path, reason: impl Into<String>) -> FramecastError {
    FramecastError::Decode {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn open_source(path: &Path, fps_fallback: f64) -> Result<OpenedSource, FramecastError> {
    log::debug!("Opening video source: {}", path.display());

    ffmpeg_next::init()
        .map_err(|error| decode_error(path, format!("FFmpeg initialisation failed: {error}")))?;

    let input =
        ffmpeg_next::format::input(&path).map_err(|error| decode_error(path, error.to_string()))?;

    let duration = container_duration(input.duration());

    let (stream_index, decoder, declared_fps, stream_frames) = {
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| FramecastError::NoVideoStream {
                path: path.to_path_buf(),
            })?;

        let decoder_context = CodecContext::from_parameters(stream.parameters()).map_err(|error| {
            decode_error(path, format!("Failed to read video codec parameters: {error}"))
        })?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|error| decode_error(path, format!("Failed to create video decoder: {error}")))?;

        // Average rate first, then the stream's nominal rate.
        let mut declared_fps = rational_to_fps(stream.avg_frame_rate());
        if declared_fps <= 0.0 || !declared_fps.is_finite() {
            declared_fps = rational_to_fps(stream.rate());
        }

        (stream.index(), decoder, declared_fps, stream.frames())
    };

    let frames_per_second = resolve_frame_rate(declared_fps, fps_fallback);
    let estimated_frames = if stream_frames > 0 {
        stream_frames as u64
    } else {
        (duration.as_secs_f64() * frames_per_second) as u64
    };

    let codec = decoder
        .codec()
        .map(|codec| codec.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let info = SourceInfo {
        width: decoder.width(),
        height: decoder.height(),
        declared_frames_per_second: declared_fps,
        frames_per_second,
        duration,
        estimated_frames,
        codec,
    };

    Ok(OpenedSource {
        input,
        stream_index,
        decoder,
        info,
    })
}

/// Convert a decoded frame to RGB8, creating the scaler on first use.
///
/// The scaler is built from the first decoded frame rather than the codec
/// parameters because some decoders only report their pixel format once
/// they have produced output.
fn render_rgb(
    scaler: &mut Option<ScalingContext>,
    decoded_frame: &VideoFrame,
) -> Result<RgbImage, FramecastError> {
    let width = decoded_frame.width();
    let height = decoded_frame.height();

    if scaler.is_none() {
        *scaler = Some(ScalingContext::get(
            decoded_frame.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?);
    }
    let scaler = scaler
        .as_mut()
        .ok_or_else(|| FramecastError::FfmpegError("scaler unavailable".to_string()))?;

    let mut rgb_frame = VideoFrame::empty();
    scaler.run(decoded_frame, &mut rgb_frame)?;

    let buffer = frame_to_rgb_buffer(&rgb_frame, width, height).ok_or_else(|| {
        FramecastError::FfmpegError("RGB plane is smaller than the frame geometry".to_string())
    })?;
    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        FramecastError::FfmpegError(
            "Failed to construct RGB image from decoded frame data".to_string(),
        )
    })
}
