//! Internal conversion helpers shared by the sampler.

use std::time::Duration;

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy an RGB24 plane into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × 3); the
/// result has none, so it can go straight into [`image::RgbImage::from_raw`].
/// Returns `None` when the plane is smaller than the frame geometry claims.
pub(crate) fn frame_to_rgb_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Option<Vec<u8>> {
    let stride = video_frame.stride(0);
    let row_bytes = (width as usize) * 3;
    let rows = height as usize;
    let data = video_frame.data(0);

    if stride == row_bytes {
        return data.get(..row_bytes * rows).map(<[u8]>::to_vec);
    }

    let mut buffer = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let row_start = row * stride;
        buffer.extend_from_slice(data.get(row_start..row_start + row_bytes)?);
    }
    Some(buffer)
}

/// Turn an FFmpeg rational into frames per second, or 0 when undefined.
pub(crate) fn rational_to_fps(rate: Rational) -> f64 {
    if rate.denominator() == 0 {
        0.0
    } else {
        rate.numerator() as f64 / rate.denominator() as f64
    }
}

/// Container duration (in `AV_TIME_BASE` microseconds) as a [`Duration`].
pub(crate) fn container_duration(microseconds: i64) -> Duration {
    if microseconds > 0 {
        Duration::from_micros(microseconds as u64)
    } else {
        Duration::ZERO
    }
}
