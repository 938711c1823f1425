//! In-process [`Repository`] backed by ordered maps

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::repository::{Repository, RepositoryError};
use super::types::{
    AgentTransportType, AgentType, AgentTypeVariant, Command, CommandParameter, Language, Module,
    Payload, RecordId, Transport,
};

#[derive(Default)]
struct Tables {
    languages: BTreeMap<RecordId, Language>,
    agent_types: BTreeMap<RecordId, AgentType>,
    variants: BTreeMap<RecordId, AgentTypeVariant>,
    agent_transport_types: BTreeMap<RecordId, AgentTransportType>,
    transports: BTreeMap<RecordId, Transport>,
    modules: BTreeMap<RecordId, Module>,
    commands: BTreeMap<RecordId, Command>,
    command_parameters: BTreeMap<RecordId, CommandParameter>,
    payloads: BTreeMap<RecordId, Payload>,
}

impl Tables {
    fn language_id(&self, name: &str) -> Option<RecordId> {
        self.languages
            .values()
            .find(|language| language.name == name)
            .map(|language| language.id)
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCounts {
    pub languages: usize,
    pub agent_types: usize,
    pub variants: usize,
    pub agent_transport_types: usize,
    pub transports: usize,
    pub modules: usize,
    pub commands: usize,
    pub command_parameters: usize,
    pub payloads: usize,
}

impl fmt::Display for CatalogCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Catalog:")?;
        writeln!(f, "  Languages: {}", self.languages)?;
        writeln!(f, "  Agent Types: {}", self.agent_types)?;
        writeln!(f, "  Agent Variants: {}", self.variants)?;
        writeln!(f, "  Agent Transport Types: {}", self.agent_transport_types)?;
        writeln!(f, "  Transports: {}", self.transports)?;
        writeln!(f, "  Modules: {}", self.modules)?;
        writeln!(f, "  Commands: {}", self.commands)?;
        writeln!(f, "  Command Parameters: {}", self.command_parameters)?;
        writeln!(f, "  Payloads: {}", self.payloads)?;
        Ok(())
    }
}

pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn row_counts(&self) -> CatalogCounts {
        self.read(|t| CatalogCounts {
            languages: t.languages.len(),
            agent_types: t.agent_types.len(),
            variants: t.variants.len(),
            agent_transport_types: t.agent_transport_types.len(),
            transports: t.transports.len(),
            modules: t.modules.len(),
            commands: t.commands.len(),
            command_parameters: t.command_parameters.len(),
            payloads: t.payloads.len(),
        })
    }

    fn allocate_id(&self) -> RecordId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_language(&self, name: &str) -> Result<Option<Language>, RepositoryError> {
        Ok(self.read(|t| t.languages.values().find(|l| l.name == name).cloned()))
    }

    async fn add_language(&self, name: &str) -> Result<Language, RepositoryError> {
        let id = self.allocate_id();
        self.write(|t| {
            if t.language_id(name).is_some() {
                return Err(RepositoryError::Duplicate {
                    entity: "language",
                    key: name.to_string(),
                });
            }
            let language = Language {
                id,
                name: name.to_string(),
            };
            t.languages.insert(id, language.clone());
            Ok(language)
        })
    }

    async fn get_agent_type(&self, id: RecordId) -> Result<Option<AgentType>, RepositoryError> {
        Ok(self.read(|t| t.agent_types.get(&id).cloned()))
    }

    async fn find_agent_type(&self, name: &str) -> Result<Option<AgentType>, RepositoryError> {
        Ok(self.read(|t| t.agent_types.values().find(|a| a.name == name).cloned()))
    }

    async fn add_agent_type(&self, mut agent_type: AgentType) -> Result<AgentType, RepositoryError> {
        agent_type.id = self.allocate_id();
        self.write(|t| {
            let duplicate = t.agent_types.values().any(|existing| {
                existing.name == agent_type.name && existing.language_id == agent_type.language_id
            });
            if duplicate {
                return Err(RepositoryError::Duplicate {
                    entity: "agent type",
                    key: agent_type.name.clone(),
                });
            }
            t.agent_types.insert(agent_type.id, agent_type.clone());
            Ok(agent_type)
        })
    }

    async fn get_variant(
        &self,
        id: RecordId,
    ) -> Result<Option<AgentTypeVariant>, RepositoryError> {
        Ok(self.read(|t| t.variants.get(&id).cloned()))
    }

    async fn add_variant(
        &self,
        mut variant: AgentTypeVariant,
    ) -> Result<AgentTypeVariant, RepositoryError> {
        variant.id = self.allocate_id();
        self.write(|t| {
            if !t.agent_types.contains_key(&variant.agent_type_id) {
                return Err(RepositoryError::Missing {
                    entity: "agent type",
                    id: variant.agent_type_id,
                });
            }
            t.variants.insert(variant.id, variant.clone());
            Ok(variant)
        })
    }

    async fn get_agent_transport_type(
        &self,
        id: RecordId,
    ) -> Result<Option<AgentTransportType>, RepositoryError> {
        Ok(self.read(|t| t.agent_transport_types.get(&id).cloned()))
    }

    async fn find_agent_transport_type(
        &self,
        agent_type_id: RecordId,
        transport_type_guid: &str,
    ) -> Result<Option<AgentTransportType>, RepositoryError> {
        Ok(self.read(|t| {
            t.agent_transport_types
                .values()
                .find(|tt| {
                    tt.agent_type_id == agent_type_id
                        && tt.transport_type_guid == transport_type_guid
                })
                .cloned()
        }))
    }

    async fn add_agent_transport_type(
        &self,
        mut transport_type: AgentTransportType,
    ) -> Result<AgentTransportType, RepositoryError> {
        transport_type.id = self.allocate_id();
        self.write(|t| {
            t.agent_transport_types
                .insert(transport_type.id, transport_type.clone());
        });
        Ok(transport_type)
    }

    async fn get_transport(&self, id: RecordId) -> Result<Option<Transport>, RepositoryError> {
        Ok(self.read(|t| t.transports.get(&id).cloned()))
    }

    async fn add_transport(&self, mut transport: Transport) -> Result<Transport, RepositoryError> {
        transport.id = self.allocate_id();
        self.write(|t| {
            t.transports.insert(transport.id, transport.clone());
        });
        Ok(transport)
    }

    async fn find_module(
        &self,
        name: &str,
        language: &str,
    ) -> Result<Option<Module>, RepositoryError> {
        Ok(self.read(|t| {
            let language_id = t.language_id(language)?;
            t.modules
                .values()
                .find(|m| m.name == name && m.language_id == language_id)
                .cloned()
        }))
    }

    async fn add_module(&self, mut module: Module) -> Result<Module, RepositoryError> {
        module.id = self.allocate_id();
        self.write(|t| {
            let duplicate = t
                .modules
                .values()
                .any(|m| m.name == module.name && m.language_id == module.language_id);
            if duplicate {
                return Err(RepositoryError::Duplicate {
                    entity: "module",
                    key: module.name.clone(),
                });
            }
            t.modules.insert(module.id, module.clone());
            Ok(module)
        })
    }

    async fn add_command(&self, mut command: Command) -> Result<Command, RepositoryError> {
        command.id = self.allocate_id();
        self.write(|t| {
            t.commands.insert(command.id, command.clone());
        });
        Ok(command)
    }

    async fn add_command_parameter(
        &self,
        mut parameter: CommandParameter,
    ) -> Result<CommandParameter, RepositoryError> {
        parameter.id = self.allocate_id();
        self.write(|t| {
            if !t.commands.contains_key(&parameter.command_id) {
                return Err(RepositoryError::Missing {
                    entity: "command",
                    id: parameter.command_id,
                });
            }
            t.command_parameters.insert(parameter.id, parameter.clone());
            Ok(parameter)
        })
    }

    async fn get_payload(&self, id: RecordId) -> Result<Option<Payload>, RepositoryError> {
        Ok(self.read(|t| t.payloads.get(&id).cloned()))
    }

    async fn add_payload(&self, mut payload: Payload) -> Result<Payload, RepositoryError> {
        payload.id = self.allocate_id();
        self.write(|t| {
            t.payloads.insert(payload.id, payload.clone());
        });
        Ok(payload)
    }

    async fn update_payload(&self, payload: &Payload) -> Result<(), RepositoryError> {
        self.write(|t| match t.payloads.get_mut(&payload.id) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(())
            }
            None => Err(RepositoryError::Missing {
                entity: "payload",
                id: payload.id,
            }),
        })
    }
}
