//! Progress handler trait and events

use std::path::PathBuf;
use std::time::Duration;

use crate::build::RunState;
use crate::catalog::RecordId;

/// Events emitted while a build request is processed
///
/// `run` identifies the request, normally by its correlation id.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A request was taken off the bus
    RequestAccepted { run: String, kind: &'static str },

    /// The pipeline moved to a new state
    StateChanged { run: String, state: RunState },

    /// An external build command is about to run
    StageStarted {
        run: String,
        stage: String,
        working_dir: PathBuf,
    },

    /// An external build command exited or could not run
    StageFinished {
        run: String,
        stage: String,
        exit_code: Option<i32>,
        duration: Duration,
        success: bool,
    },

    /// Stage output moved to its unique build-directory path
    ArtifactRelocated { run: String, path: PathBuf },

    ArtifactUploaded {
        run: String,
        record_id: RecordId,
        duration: Duration,
    },

    /// Terminal success
    Completed { run: String, total_time: Duration },

    /// Terminal failure
    Failed {
        run: String,
        stage: Option<String>,
        error: String,
    },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
