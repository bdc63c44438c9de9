//! FFmpeg console verbosity.
//!
//! FFmpeg prints its own diagnostics to stderr, independently of the `log`
//! facade. Corrupt uploads make it very chatty, so services usually turn it
//! down before sampling.
//!
//! ```no_run
//! use framecast::FfmpegLogLevel;
//!
//! let level: FfmpegLogLevel = "error".parse()?;
//! framecast::set_ffmpeg_log_level(level);
//! # Ok::<(), String>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use ffmpeg_next::util::log::{self as av_log, Level};

/// How much FFmpeg writes to stderr, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FfmpegLogLevel {
    Quiet,
    Error,
    /// FFmpeg's own default.
    Warning,
    Info,
    Debug,
}

impl FfmpegLogLevel {
    fn name(self) -> &'static str {
        match self {
            FfmpegLogLevel::Quiet => "quiet",
            FfmpegLogLevel::Error => "error",
            FfmpegLogLevel::Warning => "warning",
            FfmpegLogLevel::Info => "info",
            FfmpegLogLevel::Debug => "debug",
        }
    }
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl From<Level> for FfmpegLogLevel {
    /// Collapses FFmpeg's finer levels onto the nearest coarser one.
    fn from(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic | Level::Fatal | Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info | Level::Verbose => FfmpegLogLevel::Info,
            Level::Debug | Level::Trace => FfmpegLogLevel::Debug,
        }
    }
}

impl Display for FfmpegLogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiet" | "off" => Ok(FfmpegLogLevel::Quiet),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(format!(
                "unknown FFmpeg log level '{other}' (expected quiet, error, warning, info, or debug)"
            )),
        }
    }
}

/// Set FFmpeg's console verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    av_log::set_level(level.into());
}

/// Current FFmpeg console verbosity, if FFmpeg reports a level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    av_log::get_level().ok().map(FfmpegLogLevel::from)
}
