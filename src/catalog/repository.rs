use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    AgentTransportType, AgentType, AgentTypeVariant, Command, CommandParameter, Language, Module,
    Payload, RecordId, Transport,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} #{id} does not exist")]
    Missing { entity: &'static str, id: RecordId },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Storage capability used by the worker and the catalog loader
///
/// Lookups return `Ok(None)` for absent rows. Inserts assign the record id
/// and return the stored row.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_language(&self, name: &str) -> Result<Option<Language>, RepositoryError>;

    async fn add_language(&self, name: &str) -> Result<Language, RepositoryError>;

    async fn get_agent_type(&self, id: RecordId) -> Result<Option<AgentType>, RepositoryError>;

    async fn find_agent_type(&self, name: &str) -> Result<Option<AgentType>, RepositoryError>;

    async fn add_agent_type(&self, agent_type: AgentType) -> Result<AgentType, RepositoryError>;

    async fn get_variant(&self, id: RecordId)
        -> Result<Option<AgentTypeVariant>, RepositoryError>;

    async fn add_variant(
        &self,
        variant: AgentTypeVariant,
    ) -> Result<AgentTypeVariant, RepositoryError>;

    async fn get_agent_transport_type(
        &self,
        id: RecordId,
    ) -> Result<Option<AgentTransportType>, RepositoryError>;

    async fn find_agent_transport_type(
        &self,
        agent_type_id: RecordId,
        transport_type_guid: &str,
    ) -> Result<Option<AgentTransportType>, RepositoryError>;

    async fn add_agent_transport_type(
        &self,
        transport_type: AgentTransportType,
    ) -> Result<AgentTransportType, RepositoryError>;

    async fn get_transport(&self, id: RecordId) -> Result<Option<Transport>, RepositoryError>;

    async fn add_transport(&self, transport: Transport) -> Result<Transport, RepositoryError>;

    async fn find_module(
        &self,
        name: &str,
        language: &str,
    ) -> Result<Option<Module>, RepositoryError>;

    async fn add_module(&self, module: Module) -> Result<Module, RepositoryError>;

    async fn add_command(&self, command: Command) -> Result<Command, RepositoryError>;

    async fn add_command_parameter(
        &self,
        parameter: CommandParameter,
    ) -> Result<CommandParameter, RepositoryError>;

    async fn get_payload(&self, id: RecordId) -> Result<Option<Payload>, RepositoryError>;

    async fn add_payload(&self, payload: Payload) -> Result<Payload, RepositoryError>;

    async fn update_payload(&self, payload: &Payload) -> Result<(), RepositoryError>;
}
