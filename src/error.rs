//! Error taxonomy for build requests
//!
//! Every failure a request can hit ends up as a [`BuildError`]. The worker
//! converts it into exactly one outbound error notification, so nothing here
//! is allowed to escape as an unhandled fault.

use crate::catalog::RepositoryError;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Serializable tag carried on error notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StageFailure,
    SpawnFailure,
    StageTimeout,
    ArtifactMissing,
    PublishFailure,
    CatalogLookup,
    InvalidRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// The external toolchain ran and exited non-zero
    #[error("{stage} stage exited with {}", exit_label(.exit_code))]
    StageFailure {
        stage: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The toolchain process could not be started at all
    #[error("Failed to start {stage} stage: {message}")]
    SpawnFailure { stage: String, message: String },

    #[error("{stage} stage exceeded {seconds}s and was killed")]
    StageTimeout {
        stage: String,
        seconds: u64,
        stdout: String,
        stderr: String,
    },

    /// Exit status was zero but the expected output is absent or empty
    #[error("{stage} stage reported success but produced no artifact at {}", .path.display())]
    ArtifactMissing {
        stage: String,
        path: PathBuf,
        stdout: String,
        stderr: String,
    },

    /// Build succeeded, the artifact is on local disk, but the store did not take it
    #[error("Failed to publish artifact {}: {message}", .path.display())]
    PublishFailure { path: PathBuf, message: String },

    #[error("{entity} '{key}' not found")]
    CatalogLookup { entity: &'static str, key: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A request handler panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl BuildError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BuildError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn lookup(entity: &'static str, key: impl ToString) -> Self {
        BuildError::CatalogLookup {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::StageFailure { .. } => ErrorKind::StageFailure,
            BuildError::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            BuildError::StageTimeout { .. } => ErrorKind::StageTimeout,
            BuildError::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            BuildError::PublishFailure { .. } => ErrorKind::PublishFailure,
            BuildError::CatalogLookup { .. } => ErrorKind::CatalogLookup,
            BuildError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BuildError::Repository(_) | BuildError::Io { .. } | BuildError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Name of the stage that failed, when the failure belongs to one
    pub fn stage(&self) -> Option<&str> {
        match self {
            BuildError::StageFailure { stage, .. }
            | BuildError::SpawnFailure { stage, .. }
            | BuildError::StageTimeout { stage, .. }
            | BuildError::ArtifactMissing { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Human-readable detail for notifications, carrying toolchain output verbatim
    pub fn details(&self) -> String {
        match self {
            BuildError::StageFailure { stdout, stderr, .. }
            | BuildError::StageTimeout { stdout, stderr, .. } => output_details(stdout, stderr),
            BuildError::ArtifactMissing {
                path,
                stdout,
                stderr,
                ..
            } => format!(
                "Expected artifact {} is missing or empty.\n{}",
                path.display(),
                output_details(stdout, stderr)
            ),
            BuildError::PublishFailure { path, message } => format!(
                "{}. Artifact remains on local disk at {}",
                message,
                path.display()
            ),
            other => other.to_string(),
        }
    }
}

pub fn output_details(stdout: &str, stderr: &str) -> String {
    format!("Stdout: {}\n Stderr: {}", stdout, stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_details_keep_output_verbatim() {
        let error = BuildError::StageFailure {
            stage: "transport".to_string(),
            exit_code: Some(2),
            stdout: "compiling...\nline 2".to_string(),
            stderr: "error CS1002: ; expected".to_string(),
        };

        assert_eq!(
            error.details(),
            "Stdout: compiling...\nline 2\n Stderr: error CS1002: ; expected"
        );
        assert_eq!(error.kind(), ErrorKind::StageFailure);
        assert_eq!(error.stage(), Some("transport"));
        assert_eq!(error.to_string(), "transport stage exited with exit code 2");
    }

    #[test]
    fn test_signal_termination_display() {
        let error = BuildError::StageFailure {
            stage: "agent".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(error.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_publish_failure_mentions_local_path() {
        let error = BuildError::PublishFailure {
            path: PathBuf::from("/opt/build/agent.exe"),
            message: "connection refused".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::PublishFailure);
        assert!(error.details().contains("/opt/build/agent.exe"));
        assert!(error.stage().is_none());
    }

    #[test]
    fn test_lookup_kind() {
        let error = BuildError::lookup("module", "inject (dotnet)");
        assert_eq!(error.kind(), ErrorKind::CatalogLookup);
        assert_eq!(error.to_string(), "module 'inject (dotnet)' not found");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ArtifactMissing).unwrap();
        assert_eq!(json, "\"artifact_missing\"");
    }
}
