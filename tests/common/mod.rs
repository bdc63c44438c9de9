//! Helpers shared by the pipeline-level integration tests.
//!
//! [`StubSampler`] stands in for FFmpeg: it treats any non-empty source as a
//! 10-second, 30 fps video (300 frames) and writes tiny solid-colour frames
//! through the real [`FrameWriter`], so stride and numbering behave exactly
//! as they do for decoded video.
//!
//! [`write_test_video`] encodes a real MPEG-4 clip so the FFmpeg sampler can
//! be exercised without checked-in fixtures.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffmpeg_next::codec::{self, Id, context::Context as CodecContext};
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Packet, Rational};
use framecast::{
    CaptionerResult, FrameSampler, FrameWriter, FramecastError, PipelineOptions, SampleReport,
    SamplingOptions, SourceInfo, sampling_stride,
};
use image::{Rgb, RgbImage};
use tempfile::TempDir;

pub const STUB_FPS: f64 = 30.0;
pub const STUB_FRAMES: u64 = 300;

pub struct StubSampler;

impl FrameSampler for StubSampler {
    fn sample(
        &self,
        source: &Path,
        output: &Path,
        options: &SamplingOptions,
    ) -> Result<SampleReport, FramecastError> {
        let bytes = fs::read(source)?;
        if bytes.is_empty() {
            return Err(FramecastError::Decode {
                path: source.to_path_buf(),
                reason: "empty source".to_string(),
            });
        }

        fs::create_dir_all(output)?;
        let stride = sampling_stride(STUB_FPS, options.interval());
        let mut writer = FrameWriter::new(output, options.image_format(), stride);
        for counter in 0..STUB_FRAMES {
            let shade = (counter % 256) as u8;
            writer.offer(|| Ok(RgbImage::from_pixel(8, 8, Rgb([shade, 0, 255 - shade]))));
        }

        let decoded_frames = writer.decoded_frames();
        let failed_writes = writer.failed_writes();
        Ok(SampleReport {
            frames: writer.into_frame_set(),
            source: SourceInfo {
                width: 8,
                height: 8,
                declared_frames_per_second: STUB_FPS,
                frames_per_second: STUB_FPS,
                duration: Duration::from_secs(10),
                estimated_frames: STUB_FRAMES,
                codec: "stub".to_string(),
            },
            stride,
            decoded_frames,
            failed_writes,
        })
    }
}

/// Captioner that records batch sizes and numbers captions globally.
#[derive(Default)]
pub struct RecordingCaptioner {
    pub batch_sizes: Mutex<Vec<usize>>,
    next: AtomicUsize,
}

impl RecordingCaptioner {
    pub fn caption(&self, images: &[RgbImage]) -> CaptionerResult {
        self.batch_sizes.lock().unwrap().push(images.len());
        Ok(images
            .iter()
            .map(|_| format!("caption {}", self.next.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

impl framecast::Captioner for RecordingCaptioner {
    fn caption_batch(&self, images: &[RgbImage]) -> CaptionerResult {
        self.caption(images)
    }
}

/// Scratch layout for one run: a staging directory and a frame directory.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn frames(&self) -> PathBuf {
        self.root.path().join("static").join("frames")
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions::new()
            .with_upload_directory(self.uploads())
            .with_frame_directory(self.frames())
    }

    pub fn staged(&self, name: &str) -> PathBuf {
        self.uploads().join(name)
    }
}

pub fn recording() -> Arc<RecordingCaptioner> {
    Arc::new(RecordingCaptioner::default())
}

/// Regular files in `directory`, sorted by name.
pub fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(directory)
        .expect("Failed to list directory")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn video_bytes() -> Vec<u8> {
    b"not really a video, but the stub sampler only needs bytes".to_vec()
}

pub const TEST_VIDEO_WIDTH: u32 = 64;
pub const TEST_VIDEO_HEIGHT: u32 = 48;

/// Encode `frame_count` frames at `fps` into `path` (container from the
/// extension; `.avi` works everywhere the MPEG-4 encoder is built).
///
/// Every frame has a different colour, so sampled artifacts differ too.
pub fn write_test_video(path: &Path, frame_count: u32, fps: i32) {
    ffmpeg_next::init().expect("Failed to initialise FFmpeg");
    let (width, height) = (TEST_VIDEO_WIDTH, TEST_VIDEO_HEIGHT);
    let time_base = Rational::new(1, fps);

    let mut output = ffmpeg_next::format::output(path).expect("Failed to open output");
    let global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);
    let codec = ffmpeg_next::encoder::find(Id::MPEG4).expect("MPEG-4 encoder not available");

    let mut stream = output.add_stream(codec).expect("Failed to add stream");
    let stream_index = stream.index();
    let mut encoder = CodecContext::from_parameters(stream.parameters())
        .expect("Failed to create codec context")
        .encoder()
        .video()
        .expect("Failed to create video encoder");
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(fps, 1)));
    if global_header {
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder.open_as(codec).expect("Failed to open encoder");
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);
    stream.set_avg_frame_rate(Rational::new(fps, 1));

    output.write_header().expect("Failed to write header");
    let stream_time_base = output
        .stream(stream_index)
        .expect("Stream was added")
        .time_base();

    let mut scaler = ScalingContext::get(
        Pixel::RGB24,
        width,
        height,
        Pixel::YUV420P,
        width,
        height,
        ScalingFlags::BILINEAR,
    )
    .expect("Failed to create scaler");

    let write_packets = |encoder: &mut ffmpeg_next::encoder::video::Encoder,
                         output: &mut ffmpeg_next::format::context::Output| {
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream_index);
            packet.rescale_ts(time_base, stream_time_base);
            packet
                .write_interleaved(output)
                .expect("Failed to write packet");
        }
    };

    for index in 0..frame_count {
        let mut rgb = VideoFrame::new(Pixel::RGB24, width, height);
        let stride = rgb.stride(0);
        let shade = (index * 7 % 256) as u8;
        let data = rgb.data_mut(0);
        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = y * stride + x * 3;
                data[offset] = shade;
                data[offset + 1] = (x * 4) as u8;
                data[offset + 2] = 255 - shade;
            }
        }

        let mut yuv = VideoFrame::empty();
        scaler.run(&rgb, &mut yuv).expect("Failed to convert frame");
        yuv.set_pts(Some(i64::from(index)));
        encoder.send_frame(&yuv).expect("Failed to send frame");
        write_packets(&mut encoder, &mut output);
    }

    encoder.send_eof().expect("Failed to flush encoder");
    write_packets(&mut encoder, &mut output);
    output.write_trailer().expect("Failed to write trailer");
}
