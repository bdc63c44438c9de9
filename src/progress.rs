//! Progress reporting and cancellation.
//!
//! A run has two measurable stages. Sampling reports after every decoded
//! frame and includes how many artifacts have been written; captioning
//! reports after every completed batch. Both deliver a [`ProgressInfo`] to
//! the [`ProgressCallback`] configured on the options.
//!
//! A [`CancellationToken`] stops a run early: sampling checks it between
//! decoded frames, captioning between batches.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecast::{ProgressCallback, ProgressInfo, SamplingOptions};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         match info.percentage {
//!             Some(pct) => println!("{:?}: {pct:.0}%", info.operation),
//!             None => println!("{:?}: {} done", info.operation, info.current),
//!         }
//!     }
//! }
//!
//! let options = SamplingOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The stage a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Decoding the source and writing sampled frames.
    Sampling,
    /// Captioning batches of sampled frames.
    Captioning,
}

/// A point-in-time view of one stage.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage being reported.
    pub operation: OperationType,
    /// Decoded frames (sampling) or captioned frames (captioning) so far.
    pub current: u64,
    /// Expected total. Sampling takes it from the container, which may be
    /// missing or wrong.
    pub total: Option<u64>,
    /// `current / total` as a percentage, capped at 100.
    pub percentage: Option<f32>,
    /// Time since the stage started.
    pub elapsed: Duration,
    /// Extrapolated from throughput so far.
    pub estimated_remaining: Option<Duration>,
    /// Artifacts written so far. Sampling only.
    pub saved_frames: Option<u64>,
}

impl ProgressInfo {
    fn snapshot(
        operation: OperationType,
        current: u64,
        total: Option<u64>,
        elapsed: Duration,
        saved_frames: Option<u64>,
    ) -> Self {
        let percentage = total.map(|total| current.min(total) as f32 * 100.0 / total as f32);
        let estimated_remaining = total.filter(|_| current > 0).map(|total| {
            let left = total.saturating_sub(current) as f64;
            elapsed.mul_f64(left / current as f64)
        });
        Self {
            operation,
            current,
            total,
            percentage,
            elapsed,
            estimated_remaining,
            saved_frames,
        }
    }
}

/// Receives progress reports.
///
/// Runs may be driven from a blocking worker thread, hence `Send + Sync`.
/// Callbacks only observe; to stop a run, use a [`CancellationToken`].
pub trait ProgressCallback: Send + Sync {
    /// Called after each unit of work in a stage.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Default callback. Ignores everything.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared flag asking a run to stop.
///
/// Clones share the flag, so a token handed to the options can be cancelled
/// from a request handler or signal handler elsewhere.
///
/// ```
/// use framecast::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
///
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the run to stop. Cannot be undone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](CancellationToken::cancel) has been called on
    /// this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts work within one stage and forwards snapshots to a callback.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    expected: Option<u64>,
    completed: u64,
    started: Instant,
}

impl ProgressTracker {
    /// Start timing a stage. A zero `expected` is treated as unknown.
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        expected: Option<u64>,
    ) -> Self {
        Self {
            callback,
            operation,
            expected: expected.filter(|&expected| expected > 0),
            completed: 0,
            started: Instant::now(),
        }
    }

    /// Count `items` more units of work and report.
    pub(crate) fn advance(&mut self, items: u64, saved_frames: Option<u64>) {
        self.completed += items;
        let info = ProgressInfo::snapshot(
            self.operation,
            self.completed,
            self.expected,
            self.started.elapsed(),
            saved_frames,
        );
        self.callback.on_progress(&info);
    }
}
