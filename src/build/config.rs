//! Build configuration document handed to config-file toolchains

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use super::template::expiration_value;
use crate::catalog::{AgentTransportType, AgentType, AgentTypeVariant, Payload, Transport};
use crate::error::BuildError;

const PAYLOAD_KEY_LENGTH: usize = 32;

/// Catalog rows a payload record points at, resolved before any process runs
#[derive(Debug, Clone)]
pub struct ResolvedPayload {
    pub agent_type: AgentType,
    pub transport_type: AgentTransportType,
    pub transport: Transport,
    pub architecture: AgentTypeVariant,
    pub operating_system: AgentTypeVariant,
    pub format: AgentTypeVariant,
    pub version: AgentTypeVariant,
    pub configuration: AgentTypeVariant,
}

/// Serialized with PascalCase keys; existing toolchains read this shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildConfig {
    pub payload_name: String,
    pub payload_key: String,
    /// Base64 transport module, present only after the transport stage
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transport_module: Option<String>,
    pub initial_transport_name: String,
    pub beacon_interval: u32,
    pub jitter: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration_date: Option<String>,
    pub architecture: String,
    pub operating_system: String,
    pub configuration: String,
    pub version: String,
    pub debug: bool,
    pub transport_configuration: String,
}

impl BuildConfig {
    pub fn assemble(payload: &Payload, resolved: &ResolvedPayload) -> Self {
        Self {
            payload_name: payload.name.clone(),
            payload_key: payload.key.clone(),
            transport_module: None,
            initial_transport_name: resolved.transport.name.clone(),
            beacon_interval: payload.beacon_interval,
            jitter: payload.jitter,
            expiration_date: payload
                .expiration_date
                .as_ref()
                .map(|e| expiration_value(Some(e))),
            architecture: resolved.architecture.name.clone(),
            operating_system: resolved.operating_system.name.clone(),
            configuration: resolved.configuration.name.clone(),
            version: resolved.version.name.clone(),
            debug: payload.debug,
            transport_configuration: resolved.transport.configuration.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, BuildError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::io("serializing build configuration", e.into()))
    }
}

/// Per-run temporary file holding a serialized [`BuildConfig`]
///
/// Removed from disk when dropped.
#[derive(Debug)]
pub struct ConfigFile {
    file: NamedTempFile,
}

impl ConfigFile {
    pub fn create(config: &BuildConfig) -> Result<Self, BuildError> {
        let file = tempfile::Builder::new()
            .prefix("forgeline-build-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| BuildError::io("creating build configuration file", e))?;
        let mut config_file = Self { file };
        config_file.rewrite(config)?;
        Ok(config_file)
    }

    /// Replaces the file contents with `config`
    pub fn rewrite(&mut self, config: &BuildConfig) -> Result<(), BuildError> {
        let json = config.to_json()?;
        let file = self.file.as_file_mut();
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.flush())
            .map_err(|e| BuildError::io("writing build configuration file", e))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// `command` with this file's path as trailing argument
    pub fn append_to(&self, command: &str) -> String {
        format!("{} {}", command, self.path().display())
    }
}

/// Fresh per-payload secret from the OS CSPRNG
pub fn generate_payload_key() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PAYLOAD_KEY_LENGTH)
        .map(char::from)
        .collect()
}
