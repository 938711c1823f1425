//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RequestAccepted { run, kind } => {
                info!(correlation_id = %run, kind, "Accepted build request");
            }
            ProgressEvent::StateChanged { run, state } => {
                debug!(correlation_id = %run, state = %state, "Pipeline state changed");
            }
            ProgressEvent::StageStarted {
                run,
                stage,
                working_dir,
            } => {
                info!(
                    correlation_id = %run,
                    stage = %stage,
                    working_dir = %working_dir.display(),
                    "Starting stage"
                );
            }
            ProgressEvent::StageFinished {
                run,
                stage,
                exit_code,
                duration,
                success,
            } => {
                if *success {
                    info!(
                        correlation_id = %run,
                        stage = %stage,
                        duration_ms = duration.as_millis(),
                        "Stage complete"
                    );
                } else {
                    warn!(
                        correlation_id = %run,
                        stage = %stage,
                        exit_code = ?exit_code,
                        duration_ms = duration.as_millis(),
                        "Stage failed"
                    );
                }
            }
            ProgressEvent::ArtifactRelocated { run, path } => {
                debug!(correlation_id = %run, path = %path.display(), "Artifact relocated");
            }
            ProgressEvent::ArtifactUploaded {
                run,
                record_id,
                duration,
            } => {
                info!(
                    correlation_id = %run,
                    record_id,
                    duration_ms = duration.as_millis(),
                    "Artifact uploaded"
                );
            }
            ProgressEvent::Completed { run, total_time } => {
                info!(
                    correlation_id = %run,
                    total_time_ms = total_time.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::Failed { run, stage, error } => {
                warn!(correlation_id = %run, stage = ?stage, error = %error, "Build failed");
            }
        }
    }
}
