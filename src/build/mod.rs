//! Build assembly, directory locking, pipeline control and artifact publishing

pub mod config;
pub mod lock;
pub mod pipeline;
pub mod publisher;
pub mod template;

pub use config::{generate_payload_key, BuildConfig, ConfigFile, ResolvedPayload};
pub use lock::{DirectoryGuard, DirectoryLocks};
pub use pipeline::{
    AssemblyMode, PayloadPlan, PipelineController, RunState, StageSpec, AGENT_STAGE, MODULE_STAGE,
    TRANSPORT_STAGE,
};
pub use publisher::{
    ArtifactName, ArtifactPublisher, ArtifactStore, HttpArtifactStore, PublishError,
    PublishedArtifact, Relocation,
};
pub use template::{Substitutions, TransportConfigEntry};
