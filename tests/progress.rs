//! Progress and cancellation integration tests.

mod common;

use std::sync::{Arc, Mutex};

use common::{StubSampler, Workspace, recording, video_bytes};
use framecast::{
    CancellationToken, OperationType, Pipeline, ProgressCallback, ProgressInfo, Upload,
};

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_default_not_cancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn cancellation_token_default_trait() {
    let token = CancellationToken::default();
    assert!(!token.is_cancelled());
}

// ── Captioning progress ────────────────────────────────────────────

struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

#[test]
fn captioning_reports_once_per_batch() {
    let workspace = Workspace::new();
    let progress = Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    });
    let options = workspace.options().with_progress(progress.clone());
    let pipeline = Pipeline::new(recording(), options).with_sampler(Arc::new(StubSampler));

    let count = pipeline
        .run(Upload::from_bytes("progress.mp4", video_bytes()))
        .expect("Failed to start run")
        .count();
    assert_eq!(count, 5);

    let infos = progress.infos.lock().unwrap();
    let currents: Vec<u64> = infos.iter().map(|info| info.current).collect();
    assert_eq!(currents, [4, 5]);
    assert!(infos.iter().all(|info| info.operation == OperationType::Captioning));
    assert!(infos.iter().all(|info| info.total == Some(5)));
    assert_eq!(infos[1].percentage, Some(100.0));
    assert!(infos.iter().all(|info| info.saved_frames.is_none()));
}

#[test]
fn sampling_progress_is_separate_from_captioning_progress() {
    let workspace = Workspace::new();
    let captioning = Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    });
    let options = workspace.options().with_progress(captioning.clone());
    let pipeline = Pipeline::new(recording(), options).with_sampler(Arc::new(StubSampler));

    let mut run = pipeline
        .run(Upload::from_bytes("quiet.mp4", video_bytes()))
        .expect("Failed to start run");
    assert!(
        captioning.infos.lock().unwrap().is_empty(),
        "Nothing captioned before the first pull"
    );
    run.next().expect("Result").expect("Ok");
    assert_eq!(captioning.infos.lock().unwrap().len(), 1);
}
