//! forgeline - message-driven build worker
//!
//! Receives build requests from a message bus, compiles agents, transports
//! and modules by running operator-defined external toolchains, uploads or
//! inlines the produced artifact, and answers every request with exactly one
//! notification.
//!
//! # Core Concepts
//!
//! - **Catalog**: agent types, their variants and transport types, and
//!   modules, seeded at startup from descriptor files
//! - **Stage**: one external process that must produce a single output file
//! - **Pipeline**: the ordered stages of a request, run under the working
//!   directory's lock
//! - **Notification**: the single success or error message sent back on the
//!   request's reply route
//!
//! # Example Usage
//!
//! ```ignore
//! use forgeline::worker::{Worker, WorkerContext};
//! use forgeline::bus::stdio::EnvelopeReader;
//!
//! async fn serve(context: WorkerContext) -> Result<(), forgeline::bus::BusError> {
//!     let mut worker = Worker::new(context);
//!     let mut reader = EnvelopeReader::stdin();
//!     worker.run(&mut reader).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`catalog`]: descriptor types, repository seam and the startup loader
//! - [`build`]: config assembly, templates, locks, pipeline and publishing
//! - [`process`]: external toolchain execution
//! - [`worker`]: request dispatch and handlers
//! - [`bus`] and [`notify`]: inbound envelopes and outbound notifications

pub mod build;
pub mod bus;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod messages;
pub mod notify;
pub mod process;
pub mod progress;
pub mod util;
pub mod worker;

pub use build::{PipelineController, RunState};
pub use catalog::{InMemoryRepository, Repository};
pub use config::{ConfigError, ForgelineConfig};
pub use error::{BuildError, ErrorKind};
pub use messages::{BuildRequest, Envelope, Notification};
pub use util::{init_from_env, init_logging, LoggingConfig};
pub use worker::{Worker, WorkerContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
