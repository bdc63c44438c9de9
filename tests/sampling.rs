//! Frame sampling integration tests.
//!
//! Stride and writer behaviour are checked with synthetic frames. The
//! FFmpeg-backed tests decode a short clip encoded on the fly, plus invalid
//! inputs.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framecast::{
    CancellationToken, ErrorKind, FfmpegSampler, FrameSampler, FrameWriter, FramecastError,
    ImageFormat, OperationType, ProgressCallback, ProgressInfo, SamplingOptions, sampling_stride,
};
use image::{Rgb, RgbImage};

/// A 10 s, 30 fps clip in a fresh temp dir.
fn ten_second_clip() -> (tempfile::TempDir, PathBuf) {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("clip.avi");
    common::write_test_video(&path, 300, 30);
    (directory, path)
}

fn solid_frame() -> Result<RgbImage, FramecastError> {
    Ok(RgbImage::from_pixel(4, 4, Rgb([10, 200, 30])))
}

fn regular_files(directory: &Path) -> usize {
    fs::read_dir(directory)
        .expect("Failed to list directory")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .count()
}

// ── Stride ─────────────────────────────────────────────────────────

#[test]
fn stride_is_at_least_one_for_any_rate() {
    let intervals = [
        Duration::from_millis(1),
        Duration::from_millis(500),
        Duration::from_secs(2),
        Duration::from_secs(3600),
    ];
    let rates = [0.0, f64::NAN, 0.001, 1.0, 23.976, 29.97, 60.0, 240.0];
    for interval in intervals {
        for rate in rates {
            assert!(
                sampling_stride(rate, interval) >= 1,
                "rate {rate}, interval {interval:?}"
            );
        }
    }
}

#[test]
fn ten_seconds_at_thirty_fps_every_two_seconds() {
    assert_eq!(sampling_stride(30.0, Duration::from_secs(2)), 60);
}

// ── FrameWriter ────────────────────────────────────────────────────

#[test]
fn writer_saves_ceil_k_over_s_frames() {
    for (decoded, stride) in [(300_u64, 60_u64), (301, 60), (1, 60), (7, 1), (10, 3), (59, 60)] {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let mut writer = FrameWriter::new(directory.path(), ImageFormat::Png, stride);
        for _ in 0..decoded {
            writer.offer(solid_frame);
        }

        let expected = decoded.div_ceil(stride);
        assert_eq!(writer.saved_frames(), expected, "K={decoded} S={stride}");
        assert_eq!(writer.decoded_frames(), decoded);
        assert_eq!(regular_files(directory.path()) as u64, expected);

        let frames = writer.into_frame_set();
        assert_eq!(frames.len(), expected);
        for index in 0..expected {
            assert!(frames.path(index).is_file(), "frame_{index}.png missing");
        }
    }
}

#[test]
fn skipped_frames_are_never_rendered() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut writer = FrameWriter::new(directory.path(), ImageFormat::Png, 5);
    let mut rendered = 0;
    for _ in 0..12 {
        writer.offer(|| {
            rendered += 1;
            solid_frame()
        });
    }
    assert_eq!(rendered, 3);
}

#[test]
fn write_failures_are_skipped_and_count_matches_disk() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    // A directory squatting on the third frame's name makes that write fail.
    fs::create_dir(directory.path().join("frame_2.png")).unwrap();

    let mut writer = FrameWriter::new(directory.path(), ImageFormat::Png, 1);
    let written: Vec<bool> = (0..5).map(|_| writer.offer(solid_frame)).collect();

    assert_eq!(written, [true, true, false, false, false]);
    assert_eq!(writer.saved_frames(), 2);
    assert_eq!(writer.failed_writes(), 3);
    assert_eq!(regular_files(directory.path()), 2);
}

#[test]
fn failed_render_does_not_consume_a_sequence_number() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut writer = FrameWriter::new(directory.path(), ImageFormat::Jpeg, 1);

    assert!(writer.offer(solid_frame));
    assert!(!writer.offer(|| Err(FramecastError::FfmpegError("scaler broke".to_string()))));
    assert!(writer.offer(solid_frame));

    assert!(directory.path().join("frame_0.jpg").is_file());
    assert!(directory.path().join("frame_1.jpg").is_file());
    assert!(!directory.path().join("frame_2.jpg").exists());
    assert_eq!(writer.into_frame_set().len(), 2);
}

// ── FfmpegSampler ──────────────────────────────────────────────────

#[test]
fn zero_byte_source_is_a_decode_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let source = directory.path().join("empty.mp4");
    fs::write(&source, b"").unwrap();

    let error = FfmpegSampler
        .sample(&source, &directory.path().join("frames"), &SamplingOptions::new())
        .expect_err("Empty file cannot be decoded");
    assert_eq!(error.kind(), ErrorKind::Decode);
}

#[test]
fn garbage_source_is_a_decode_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let source = directory.path().join("garbage.mp4");
    fs::write(&source, b"this is not a media file").unwrap();

    let error = FfmpegSampler
        .sample(&source, &directory.path().join("frames"), &SamplingOptions::new())
        .expect_err("Garbage cannot be decoded");
    assert!(
        matches!(error, FramecastError::Decode { .. }),
        "Expected Decode, got {error}"
    );
    assert!(error.to_string().contains("garbage.mp4"));
}

#[test]
fn missing_source_is_a_decode_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let result = FfmpegSampler.probe(&directory.path().join("nope.mp4"), 30.0);
    assert!(matches!(result, Err(FramecastError::Decode { .. })));
}

struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

#[test]
fn ten_second_video_yields_five_frames() {
    let (_source_dir, path) = ten_second_clip();
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let progress = Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    });
    let options = SamplingOptions::new().with_progress(progress.clone());

    let report = FfmpegSampler
        .sample(&path, directory.path(), &options)
        .expect("Failed to sample clip");

    assert_eq!(report.stride, 60);
    assert_eq!(report.failed_writes, 0);
    assert_eq!(report.frames.len(), report.decoded_frames.div_ceil(report.stride));
    assert_eq!(report.frames.len(), 5);
    assert_eq!(regular_files(directory.path()) as u64, report.frames.len());
    for index in 0..5 {
        let frame = image::open(report.frames.path(index)).expect("Readable artifact");
        assert_eq!(
            (frame.width(), frame.height()),
            (common::TEST_VIDEO_WIDTH, common::TEST_VIDEO_HEIGHT)
        );
    }

    let infos = progress.infos.lock().unwrap();
    assert_eq!(infos.len() as u64, report.decoded_frames);
    assert!(infos.iter().all(|info| info.operation == OperationType::Sampling));
    assert_eq!(infos.last().and_then(|info| info.saved_frames), Some(5));
}

#[test]
fn shorter_interval_samples_more_often() {
    let (_source_dir, path) = ten_second_clip();
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let options = SamplingOptions::new()
        .with_interval(Duration::from_millis(500))
        .with_image_format(ImageFormat::Png);

    let report = FfmpegSampler
        .sample(&path, directory.path(), &options)
        .expect("Failed to sample clip");

    assert_eq!(report.stride, 15);
    assert_eq!(report.frames.len(), report.decoded_frames.div_ceil(15));
    assert!(directory.path().join("frame_0.png").is_file());
    assert_eq!(regular_files(directory.path()) as u64, report.frames.len());
}

#[test]
fn source_info_reports_the_encoded_stream() {
    let (_source_dir, path) = ten_second_clip();

    let info = FfmpegSampler.probe(&path, 25.0).expect("Failed to probe clip");
    assert_eq!(
        (info.width, info.height),
        (common::TEST_VIDEO_WIDTH, common::TEST_VIDEO_HEIGHT)
    );
    assert!((info.frames_per_second - 30.0).abs() < 0.01, "{}", info.frames_per_second);
    assert!(!info.used_fallback_rate());
}

#[test]
fn sampling_can_be_cancelled() {
    let (_source_dir, path) = ten_second_clip();
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let token = CancellationToken::new();
    token.cancel();
    let options = SamplingOptions::new().with_cancellation(token);

    let result = FfmpegSampler.sample(&path, directory.path(), &options);
    assert!(matches!(result, Err(FramecastError::Cancelled)));
}
