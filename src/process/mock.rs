//! Scripted [`ProcessRunner`] for tests
//!
//! Rules are matched by substring against the command line, first match
//! wins. A matching rule can write files into the working directory before
//! returning, which is how a toolchain "produces" its artifact.

use super::runner::{ProcessRunner, RunError, StageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub working_dir: PathBuf,
    pub command_line: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockStage {
    pub result: StageResult,
    pub writes: Vec<(PathBuf, Vec<u8>)>,
    pub delay: Option<Duration>,
    pub spawn_error: bool,
}

impl MockStage {
    pub fn exit(code: i32) -> Self {
        Self {
            result: StageResult::new(code, "", ""),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.result.stdout = stdout.into();
        self.result.stderr = stderr.into();
        self
    }

    /// Writes `contents` to `relative` (inside the working directory) when run
    pub fn writes(mut self, relative: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.writes.push((relative.into(), contents.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn spawn_failure() -> Self {
        Self {
            spawn_error: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Activity {
    in_flight: HashMap<PathBuf, usize>,
    peak_per_dir: HashMap<PathBuf, usize>,
    total_in_flight: usize,
    peak_total: usize,
}

#[derive(Default)]
pub struct MockProcessRunner {
    rules: Mutex<Vec<(String, MockStage)>>,
    invocations: Mutex<Vec<Invocation>>,
    activity: Mutex<Activity>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: impl Into<String>, stage: MockStage) -> Self {
        self.rules.lock().unwrap().push((pattern.into(), stage));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Highest number of simultaneous runs observed in one working directory
    pub fn peak_concurrency(&self, working_dir: &Path) -> usize {
        self.activity
            .lock()
            .unwrap()
            .peak_per_dir
            .get(working_dir)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous runs observed across all directories
    pub fn peak_total_concurrency(&self) -> usize {
        self.activity.lock().unwrap().peak_total
    }

    fn enter(&self, working_dir: &Path) {
        let mut activity = self.activity.lock().unwrap();
        let count = activity
            .in_flight
            .entry(working_dir.to_path_buf())
            .or_insert(0);
        *count += 1;
        let count = *count;
        let peak = activity
            .peak_per_dir
            .entry(working_dir.to_path_buf())
            .or_insert(0);
        *peak = (*peak).max(count);
        activity.total_in_flight += 1;
        activity.peak_total = activity.peak_total.max(activity.total_in_flight);
    }

    fn leave(&self, working_dir: &Path) {
        let mut activity = self.activity.lock().unwrap();
        if let Some(count) = activity.in_flight.get_mut(working_dir) {
            *count -= 1;
        }
        activity.total_in_flight -= 1;
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, working_dir: &Path, command_line: &str) -> Result<StageResult, RunError> {
        self.invocations.lock().unwrap().push(Invocation {
            working_dir: working_dir.to_path_buf(),
            command_line: command_line.to_string(),
        });

        let stage = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command_line.contains(pattern.as_str()))
            .map(|(_, stage)| stage.clone());

        let Some(stage) = stage else {
            return Ok(StageResult::new(
                127,
                "",
                format!("mock: no rule for '{}'", command_line),
            ));
        };

        if stage.spawn_error {
            return Err(RunError::Spawn {
                shell: "mock".to_string(),
                working_dir: working_dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }

        self.enter(working_dir);
        if let Some(delay) = stage.delay {
            tokio::time::sleep(delay).await;
        }
        let written = write_all(working_dir, &stage.writes);
        self.leave(working_dir);
        written.map_err(RunError::Output)?;

        Ok(stage.result)
    }
}

fn write_all(working_dir: &Path, writes: &[(PathBuf, Vec<u8>)]) -> io::Result<()> {
    for (relative, contents) in writes {
        let path = working_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
    }
    Ok(())
}
