//! Buildable catalog: descriptor types, storage and startup seeding

pub mod loader;
pub mod memory;
pub mod repository;
pub mod types;

pub use loader::{load_catalog, register_language, seed_transports, LoadSummary, LoaderError};
pub use memory::{CatalogCounts, InMemoryRepository};
pub use repository::{Repository, RepositoryError};
pub use types::{
    AgentTransportType, AgentType, AgentTypeVariant, Command, CommandOwner, CommandParameter,
    Language, Module, Payload, RecordId, Transport, VariantKind,
};
