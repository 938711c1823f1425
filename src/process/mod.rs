//! External toolchain execution

pub mod mock;
mod runner;

pub use mock::{Invocation, MockProcessRunner, MockStage};
pub use runner::{ProcessRunner, RunError, ShellRunner, StageResult};
