//! Build pipeline controller
//!
//! Turns a resolved request into an ordered list of external-process stages
//! run inside one working directory. Every stage is gated on the previous one:
//! a stage that exits non-zero, cannot start, or exits zero without producing
//! its output ends the run. The whole stage sequence, including moving the
//! final artifact out of its fixed path, happens while holding the working
//! directory's lock. Uploading happens after the lock is released.

use base64ct::{Base64, Encoding};
use chrono::Utc;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::config::{BuildConfig, ConfigFile};
use super::lock::DirectoryLocks;
use super::publisher::{ArtifactName, ArtifactPublisher, PublishedArtifact, Relocation};
use super::template::{Substitutions, TRANSPORT};
use crate::catalog::RecordId;
use crate::error::BuildError;
use crate::process::{ProcessRunner, RunError};
use crate::progress::{ProgressEvent, ProgressHandler};

pub const TRANSPORT_STAGE: &str = "transport";
pub const AGENT_STAGE: &str = "agent";
pub const MODULE_STAGE: &str = "module";

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Accepted,
    StageRunning(String),
    StagePassed(String),
    StageFailed(String),
    Finalizing,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Accepted, StageRunning(_)) => true,
            (StageRunning(a), StagePassed(b)) | (StageRunning(a), StageFailed(b)) => a == b,
            (StagePassed(_), StageRunning(_)) | (StagePassed(_), Finalizing) => true,
            (Finalizing, Succeeded) => true,
            // failures before or after a stage (lookup, relocation, upload)
            (StageFailed(_), Failed) | (Accepted, Failed) | (Finalizing, Failed) => true,
            (StagePassed(_), Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Accepted => write!(f, "accepted"),
            RunState::StageRunning(stage) => write!(f, "running {}", stage),
            RunState::StagePassed(stage) => write!(f, "{} passed", stage),
            RunState::StageFailed(stage) => write!(f, "{} failed", stage),
            RunState::Finalizing => write!(f, "finalizing"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// One external-process step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    /// `None` means there is nothing to run; the stored output is used as is
    pub command: Option<String>,
    /// Output path, relative to the working directory
    pub output: PathBuf,
}

impl StageSpec {
    pub fn new(name: &str, command: Option<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            command,
            output: output.into(),
        }
    }
}

/// How request values reach the toolchain
#[derive(Debug, Clone)]
pub enum AssemblyMode {
    /// Both commands receive a JSON config file path as trailing argument
    ConfigFile(BuildConfig),
    /// Commands are templates; the agent table gains `TRANSPORT` once the
    /// transport stage has produced its output
    Template {
        transport: Substitutions,
        agent: Substitutions,
    },
}

/// Everything needed to build and publish one payload
#[derive(Debug, Clone)]
pub struct PayloadPlan {
    pub record_id: RecordId,
    pub build_token: String,
    pub working_dir: PathBuf,
    pub transport: StageSpec,
    pub agent: StageSpec,
    pub mode: AssemblyMode,
    /// Agent type name, first component of the artifact file name
    pub catalog_name: String,
    /// Configuration or format name, second component
    pub variant_name: String,
    pub payload_name: String,
}

struct PipelineRun {
    id: String,
    state: RunState,
    started: Instant,
    progress: Arc<dyn ProgressHandler>,
}

impl PipelineRun {
    fn new(id: &str, progress: Arc<dyn ProgressHandler>) -> Self {
        let run = Self {
            id: id.to_string(),
            state: RunState::Accepted,
            started: Instant::now(),
            progress,
        };
        run.emit(ProgressEvent::StateChanged {
            run: run.id.clone(),
            state: RunState::Accepted,
        });
        run
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        self.state = next.clone();
        self.emit(ProgressEvent::StateChanged {
            run: self.id.clone(),
            state: next,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.on_progress(&event);
    }

    fn finish<T>(&mut self, result: Result<T, BuildError>) -> Result<T, BuildError> {
        match &result {
            Ok(_) => {
                self.transition(RunState::Succeeded);
                self.emit(ProgressEvent::Completed {
                    run: self.id.clone(),
                    total_time: self.started.elapsed(),
                });
            }
            Err(e) => {
                if !self.state.is_terminal() {
                    self.transition(RunState::Failed);
                }
                self.emit(ProgressEvent::Failed {
                    run: self.id.clone(),
                    stage: e.stage().map(str::to_string),
                    error: e.to_string(),
                });
            }
        }
        result
    }
}

pub struct PipelineController {
    runner: Arc<dyn ProcessRunner>,
    locks: DirectoryLocks,
    publisher: Arc<ArtifactPublisher>,
    progress: Arc<dyn ProgressHandler>,
}

impl PipelineController {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        locks: DirectoryLocks,
        publisher: Arc<ArtifactPublisher>,
        progress: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            runner,
            locks,
            publisher,
            progress,
        }
    }

    pub fn locks(&self) -> &DirectoryLocks {
        &self.locks
    }

    /// Builds a module and returns its base64-encoded bytes
    pub async fn build_module(
        &self,
        run_id: &str,
        working_dir: &Path,
        stage: &StageSpec,
    ) -> Result<String, BuildError> {
        let mut run = PipelineRun::new(run_id, Arc::clone(&self.progress));
        let result = self
            .locks
            .with_exclusive(lock_key(working_dir), async {
                let bytes = self.run_stage(&mut run, working_dir, stage).await?;
                run.transition(RunState::Finalizing);
                Ok(Base64::encode_string(&bytes))
            })
            .await;
        run.finish(result)
    }

    /// Runs transport then agent stage, relocates the artifact and uploads it
    pub async fn build_payload(
        &self,
        run_id: &str,
        plan: PayloadPlan,
    ) -> Result<PublishedArtifact, BuildError> {
        let mut run = PipelineRun::new(run_id, Arc::clone(&self.progress));
        let result = self.build_and_publish(&mut run, plan).await;
        run.finish(result)
    }

    async fn build_and_publish(
        &self,
        run: &mut PipelineRun,
        plan: PayloadPlan,
    ) -> Result<PublishedArtifact, BuildError> {
        let relocated = self
            .locks
            .with_exclusive(lock_key(&plan.working_dir), self.build_locked(run, &plan))
            .await?;

        let upload_started = Instant::now();
        let published = self
            .publisher
            .publish(&relocated, plan.record_id, &plan.build_token)
            .await?;
        run.emit(ProgressEvent::ArtifactUploaded {
            run: run.id.clone(),
            record_id: plan.record_id,
            duration: upload_started.elapsed(),
        });
        Ok(published)
    }

    async fn build_locked(
        &self,
        run: &mut PipelineRun,
        plan: &PayloadPlan,
    ) -> Result<PathBuf, BuildError> {
        let working_dir = plan.working_dir.as_path();

        match &plan.mode {
            AssemblyMode::ConfigFile(config) => {
                let mut config = config.clone();
                let mut file = ConfigFile::create(&config)?;

                let transport = with_command(&plan.transport, |c| file.append_to(c));
                let transport_bytes = self.run_stage(run, working_dir, &transport).await?;

                config.transport_module = Some(Base64::encode_string(&transport_bytes));
                file.rewrite(&config)?;

                let agent = with_command(&plan.agent, |c| file.append_to(c));
                self.run_stage(run, working_dir, &agent).await?;
            }
            AssemblyMode::Template {
                transport: transport_subs,
                agent: agent_subs,
            } => {
                let transport = with_command(&plan.transport, |c| transport_subs.apply(c));
                let transport_bytes = self.run_stage(run, working_dir, &transport).await?;

                let mut agent_subs = agent_subs.clone();
                agent_subs.insert(TRANSPORT, Base64::encode_string(&transport_bytes));
                let agent = with_command(&plan.agent, |c| agent_subs.apply(c));
                self.run_stage(run, working_dir, &agent).await?;
            }
        }

        run.transition(RunState::Finalizing);
        let name = ArtifactName {
            catalog: plan.catalog_name.clone(),
            variant: plan.variant_name.clone(),
            request: plan.payload_name.clone(),
            built_at: Utc::now(),
        };
        let mode = match plan.agent.command {
            Some(_) => Relocation::Move,
            None => Relocation::Copy,
        };
        let relocated = self
            .publisher
            .relocate(&working_dir.join(&plan.agent.output), &name, mode)
            .await?;
        run.emit(ProgressEvent::ArtifactRelocated {
            run: run.id.clone(),
            path: relocated.clone(),
        });
        Ok(relocated)
    }

    /// Runs one stage and returns the bytes of its output file
    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        working_dir: &Path,
        stage: &StageSpec,
    ) -> Result<Vec<u8>, BuildError> {
        let output = working_dir.join(&stage.output);
        run.transition(RunState::StageRunning(stage.name.clone()));

        let result = match &stage.command {
            Some(command) => match remove_stale(&output).await {
                Ok(()) => self.execute(run, working_dir, stage, command).await,
                Err(e) => Err(e),
            },
            None => Ok((String::new(), String::new())),
        };
        let result = match result {
            Ok((stdout, stderr)) => read_output(stage, &output, stdout, stderr).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => run.transition(RunState::StagePassed(stage.name.clone())),
            Err(_) => run.transition(RunState::StageFailed(stage.name.clone())),
        }
        result
    }

    /// Executes `command` and returns its captured output when it exits zero
    async fn execute(
        &self,
        run: &PipelineRun,
        working_dir: &Path,
        stage: &StageSpec,
        command: &str,
    ) -> Result<(String, String), BuildError> {
        run.emit(ProgressEvent::StageStarted {
            run: run.id.clone(),
            stage: stage.name.clone(),
            working_dir: working_dir.to_path_buf(),
        });
        let started = Instant::now();
        let outcome = self.runner.run(working_dir, command).await;
        let exit_code = match &outcome {
            Ok(result) => result.exit_code,
            Err(_) => None,
        };
        let success = matches!(&outcome, Ok(result) if result.success());
        run.emit(ProgressEvent::StageFinished {
            run: run.id.clone(),
            stage: stage.name.clone(),
            exit_code,
            duration: started.elapsed(),
            success,
        });

        match outcome {
            Ok(result) if result.success() => Ok((result.stdout, result.stderr)),
            Ok(result) => {
                error!(
                    correlation_id = %run.id,
                    stage = %stage.name,
                    exit_code = ?result.exit_code,
                    "Build command failed\n{}",
                    result.details()
                );
                Err(BuildError::StageFailure {
                    stage: stage.name.clone(),
                    exit_code: result.exit_code,
                    stdout: result.stdout,
                    stderr: result.stderr,
                })
            }
            Err(RunError::Spawn {
                shell,
                working_dir,
                source,
            }) => {
                error!(
                    correlation_id = %run.id,
                    stage = %stage.name,
                    shell = %shell,
                    working_dir = %working_dir.display(),
                    "Could not start build command: {}",
                    source
                );
                Err(BuildError::SpawnFailure {
                    stage: stage.name.clone(),
                    message: format!("{} ({})", source, shell),
                })
            }
            Err(RunError::Timeout {
                limit,
                stdout,
                stderr,
            }) => Err(BuildError::StageTimeout {
                stage: stage.name.clone(),
                seconds: limit.as_secs(),
                stdout,
                stderr,
            }),
            Err(RunError::Output(e)) => Err(BuildError::io(
                format!("collecting output of the {} stage", stage.name),
                e,
            )),
        }
    }
}

fn lock_key(working_dir: &Path) -> String {
    working_dir.to_string_lossy().into_owned()
}

fn with_command(stage: &StageSpec, render: impl FnOnce(&str) -> String) -> StageSpec {
    StageSpec {
        command: stage.command.as_deref().map(render),
        ..stage.clone()
    }
}

async fn remove_stale(output: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_file(output).await {
        Ok(()) => {
            info!(path = %output.display(), "Removed stale stage output");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(
            format!("removing stale output {}", output.display()),
            e,
        )),
    }
}

async fn read_output(
    stage: &StageSpec,
    output: &Path,
    stdout: String,
    stderr: String,
) -> Result<Vec<u8>, BuildError> {
    match tokio::fs::read(output).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(missing(stage, output, stdout, stderr)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(missing(stage, output, stdout, stderr)),
        Err(e) => Err(BuildError::io(format!("reading {}", output.display()), e)),
    }
}

fn missing(stage: &StageSpec, output: &Path, stdout: String, stderr: String) -> BuildError {
    BuildError::ArtifactMissing {
        stage: stage.name.clone(),
        path: output.to_path_buf(),
        stdout,
        stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_transitions() {
        let running = RunState::StageRunning("transport".to_string());
        assert!(RunState::Accepted.can_transition_to(&running));
        assert!(running.can_transition_to(&RunState::StagePassed("transport".to_string())));
        assert!(!running.can_transition_to(&RunState::StagePassed("agent".to_string())));
        assert!(!RunState::Accepted.can_transition_to(&RunState::Succeeded));
        assert!(RunState::Finalizing.can_transition_to(&RunState::Succeeded));
        assert!(!RunState::Succeeded.can_transition_to(&RunState::Failed));
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_with_command_renders_only_present_commands() {
        let stage = StageSpec::new(AGENT_STAGE, Some("./b.sh".to_string()), "out.exe");
        let rendered = with_command(&stage, |c| format!("{} cfg.json", c));
        assert_eq!(rendered.command.as_deref(), Some("./b.sh cfg.json"));
        assert_eq!(rendered.output, PathBuf::from("out.exe"));

        let bare = StageSpec::new(MODULE_STAGE, None, "m.dll");
        assert!(with_command(&bare, |c| c.to_string()).command.is_none());
    }
}
