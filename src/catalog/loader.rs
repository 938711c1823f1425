//! Startup catalog seeding from descriptor files
//!
//! Agent descriptors (`BuildAgent.<language>.json`) live under the agents
//! path, module descriptors (`BuildModule.<language>.json`) under the modules
//! path. Both trees are scanned recursively. An entry that already exists is
//! left untouched, so running the loader twice changes nothing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::repository::{Repository, RepositoryError};
use super::types::{
    AgentTransportType, AgentType, AgentTypeVariant, Command, CommandOwner, CommandParameter,
    Language, Module, RecordId, Transport, VariantKind,
};
use crate::config::ForgelineConfig;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Failed to scan {}: {source}", .root.display())]
    Scan {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read descriptor {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid descriptor {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VariantDescriptor {
    name: String,
    build_command: Option<String>,
    build_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TransportTypeDescriptor {
    name: String,
    transport_type_guid: String,
    build_command: Option<String>,
    build_location: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ParameterDescriptor {
    name: String,
    help: String,
    required: bool,
    position: Option<i32>,
    values: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CommandDescriptor {
    name: String,
    description: String,
    help: String,
    opsec_safe: bool,
    mitre_reference: Option<String>,
    parameters: Vec<ParameterDescriptor>,
    artifacts: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AgentDescriptor {
    name: String,
    guid: String,
    authors: Vec<String>,
    build_command: Option<String>,
    build_location: Option<String>,
    operating_systems: Vec<VariantDescriptor>,
    architectures: Vec<VariantDescriptor>,
    versions: Vec<VariantDescriptor>,
    formats: Vec<VariantDescriptor>,
    configurations: Vec<VariantDescriptor>,
    agent_transport_types: Vec<TransportTypeDescriptor>,
    commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ModuleDescriptor {
    name: String,
    description: String,
    authors: Vec<String>,
    build_command: Option<String>,
    build_location: String,
    commands: Vec<CommandDescriptor>,
}

/// Outcome of one catalog load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub language_id: RecordId,
    pub agents_imported: usize,
    pub agents_skipped: usize,
    pub modules_imported: usize,
    pub modules_skipped: usize,
    /// Descriptor files that could not be read or parsed
    pub invalid: usize,
}

#[derive(Debug, Default)]
struct Tally {
    imported: usize,
    skipped: usize,
    invalid: usize,
}

/// Finds the configured language, registering it when absent
pub async fn register_language(
    repo: &dyn Repository,
    name: &str,
) -> Result<Language, LoaderError> {
    if let Some(language) = repo.find_language(name).await? {
        debug!(language = name, id = language.id, "Language already registered");
        return Ok(language);
    }
    let language = repo.add_language(name).await?;
    info!(language = name, id = language.id, "Registered build language");
    Ok(language)
}

/// Registers the language, then imports every agent and module descriptor
pub async fn load_catalog(
    repo: &dyn Repository,
    config: &ForgelineConfig,
) -> Result<LoadSummary, LoaderError> {
    let language = register_language(repo, &config.language).await?;

    let agents = load_agents(
        repo,
        &config.agents_path,
        &config.agent_descriptor_name(),
        language.id,
    )
    .await?;
    let modules = load_modules(
        repo,
        &config.modules_path,
        &config.module_descriptor_name(),
        &config.language,
        language.id,
    )
    .await?;

    let summary = LoadSummary {
        language_id: language.id,
        agents_imported: agents.imported,
        agents_skipped: agents.skipped,
        modules_imported: modules.imported,
        modules_skipped: modules.skipped,
        invalid: agents.invalid + modules.invalid,
    };
    info!(
        language = %config.language,
        agents_imported = summary.agents_imported,
        agents_skipped = summary.agents_skipped,
        modules_imported = summary.modules_imported,
        modules_skipped = summary.modules_skipped,
        invalid = summary.invalid,
        "Catalog loaded"
    );
    Ok(summary)
}

async fn load_agents(
    repo: &dyn Repository,
    root: &Path,
    descriptor_name: &str,
    language_id: RecordId,
) -> Result<Tally, LoaderError> {
    let mut tally = Tally::default();
    for path in find_descriptors(root, descriptor_name)? {
        let descriptor: AgentDescriptor = match read_descriptor(&path) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Skipping agent descriptor: {}", e);
                tally.invalid += 1;
                continue;
            }
        };

        if repo.find_agent_type(&descriptor.name).await?.is_some() {
            debug!(agent = %descriptor.name, "Agent type already in catalog");
            tally.skipped += 1;
            continue;
        }

        import_agent(repo, descriptor, language_id).await?;
        tally.imported += 1;
    }
    Ok(tally)
}

async fn import_agent(
    repo: &dyn Repository,
    descriptor: AgentDescriptor,
    language_id: RecordId,
) -> Result<(), LoaderError> {
    let agent_type = repo
        .add_agent_type(AgentType {
            id: 0,
            name: descriptor.name,
            guid: descriptor.guid,
            authors: descriptor.authors.join(", "),
            language_id,
            build_command: non_empty(descriptor.build_command),
            build_location: non_empty(descriptor.build_location),
        })
        .await?;

    let variant_groups = [
        (VariantKind::Architecture, descriptor.architectures),
        (VariantKind::OperatingSystem, descriptor.operating_systems),
        (VariantKind::Format, descriptor.formats),
        (VariantKind::Version, descriptor.versions),
        (VariantKind::Configuration, descriptor.configurations),
    ];
    for (kind, variants) in variant_groups {
        for variant in variants {
            repo.add_variant(AgentTypeVariant {
                id: 0,
                agent_type_id: agent_type.id,
                kind,
                name: variant.name,
                build_command: non_empty(variant.build_command),
                build_location: non_empty(variant.build_location),
            })
            .await?;
        }
    }

    for transport_type in descriptor.agent_transport_types {
        repo.add_agent_transport_type(AgentTransportType {
            id: 0,
            agent_type_id: agent_type.id,
            name: transport_type.name,
            transport_type_guid: transport_type.transport_type_guid,
            build_command: non_empty(transport_type.build_command),
            build_location: transport_type.build_location,
        })
        .await?;
    }

    import_commands(repo, CommandOwner::AgentType(agent_type.id), descriptor.commands).await?;

    info!(agent = %agent_type.name, id = agent_type.id, "Imported agent type");
    Ok(())
}

async fn load_modules(
    repo: &dyn Repository,
    root: &Path,
    descriptor_name: &str,
    language: &str,
    language_id: RecordId,
) -> Result<Tally, LoaderError> {
    let mut tally = Tally::default();
    for path in find_descriptors(root, descriptor_name)? {
        let descriptor: ModuleDescriptor = match read_descriptor(&path) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Skipping module descriptor: {}", e);
                tally.invalid += 1;
                continue;
            }
        };

        if repo.find_module(&descriptor.name, language).await?.is_some() {
            debug!(module = %descriptor.name, "Module already in catalog");
            tally.skipped += 1;
            continue;
        }

        let module = repo
            .add_module(Module {
                id: 0,
                name: descriptor.name,
                description: descriptor.description,
                authors: descriptor.authors.join(", "),
                language_id,
                build_command: non_empty(descriptor.build_command),
                build_location: descriptor.build_location,
            })
            .await?;
        import_commands(repo, CommandOwner::Module(module.id), descriptor.commands).await?;

        info!(module = %module.name, id = module.id, "Imported module");
        tally.imported += 1;
    }
    Ok(tally)
}

async fn import_commands(
    repo: &dyn Repository,
    owner: CommandOwner,
    commands: Vec<CommandDescriptor>,
) -> Result<(), LoaderError> {
    for descriptor in commands {
        let artifacts = if descriptor.artifacts.is_empty() {
            None
        } else {
            Some(descriptor.artifacts.join(","))
        };
        let command = repo
            .add_command(Command {
                id: 0,
                owner,
                name: descriptor.name,
                description: descriptor.description,
                help: descriptor.help,
                mitre_reference: descriptor.mitre_reference,
                opsec_safe: descriptor.opsec_safe,
                artifacts,
            })
            .await?;

        for parameter in descriptor.parameters {
            repo.add_command_parameter(CommandParameter {
                id: 0,
                command_id: command.id,
                name: parameter.name,
                help: parameter.help,
                required: parameter.required,
                position: parameter.position,
                values: parameter.values.join(","),
            })
            .await?;
        }
    }
    Ok(())
}

/// Recursively collects files named exactly `descriptor_name`, sorted by path
fn find_descriptors(root: &Path, descriptor_name: &str) -> Result<Vec<PathBuf>, LoaderError> {
    if !root.is_dir() {
        warn!(root = %root.display(), "Descriptor directory does not exist, nothing to load");
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| LoaderError::Scan {
            root: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && entry.file_name() == descriptor_name {
            debug!(path = %entry.path().display(), "Discovered descriptor");
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TransportDescriptor {
    name: String,
    transport_type_guid: String,
    /// Either the serialized entry list or the list itself
    configuration: serde_json::Value,
}

/// Registers the transports listed in a JSON file
///
/// Transports are normally created by the control plane; this seeds them for
/// a standalone worker. Unlike descriptors, a malformed file is an error.
pub async fn seed_transports(
    repo: &dyn Repository,
    path: &Path,
) -> Result<Vec<Transport>, LoaderError> {
    let descriptors: Vec<TransportDescriptor> = read_descriptor(path)?;
    let mut seeded = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let configuration = match descriptor.configuration {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(raw) => raw,
            other => other.to_string(),
        };
        let transport = repo
            .add_transport(Transport {
                id: 0,
                name: descriptor.name,
                transport_type_guid: descriptor.transport_type_guid,
                configuration,
            })
            .await?;
        debug!(transport = %transport.name, id = transport.id, "Seeded transport");
        seeded.push(transport);
    }
    info!(count = seeded.len(), path = %path.display(), "Transports seeded");
    Ok(seeded)
}

fn read_descriptor<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoaderError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| LoaderError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
