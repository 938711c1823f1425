//! Catalog descriptors and persisted payload records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type RecordId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentType {
    pub id: RecordId,
    pub name: String,
    pub guid: String,
    pub authors: String,
    pub language_id: RecordId,
    /// Config-file mode command; the config path is appended at build time
    pub build_command: Option<String>,
    pub build_location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Architecture,
    OperatingSystem,
    Format,
    Version,
    Configuration,
}

impl VariantKind {
    pub fn label(&self) -> &'static str {
        match self {
            VariantKind::Architecture => "architecture",
            VariantKind::OperatingSystem => "operating system",
            VariantKind::Format => "format",
            VariantKind::Version => "version",
            VariantKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One selectable option of an agent type (architecture, format, ...)
///
/// Formats may carry their own template-mode build command and output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTypeVariant {
    pub id: RecordId,
    pub agent_type_id: RecordId,
    pub kind: VariantKind,
    pub name: String,
    pub build_command: Option<String>,
    pub build_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTransportType {
    pub id: RecordId,
    pub agent_type_id: RecordId,
    pub name: String,
    pub transport_type_guid: String,
    pub build_command: Option<String>,
    pub build_location: String,
}

/// A configured transport instance, created outside this worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transport {
    pub id: RecordId,
    pub name: String,
    pub transport_type_guid: String,
    /// JSON list of `{"Name": ..., "Value": ...}` entries
    pub configuration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    pub authors: String,
    pub language_id: RecordId,
    pub build_command: Option<String>,
    pub build_location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandOwner {
    Module(RecordId),
    AgentType(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: RecordId,
    pub owner: CommandOwner,
    pub name: String,
    pub description: String,
    pub help: String,
    pub mitre_reference: Option<String>,
    pub opsec_safe: bool,
    /// Comma-joined artifact names, absent when the command declares none
    pub artifacts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParameter {
    pub id: RecordId,
    pub command_id: RecordId,
    pub name: String,
    pub help: String,
    pub required: bool,
    pub position: Option<i32>,
    pub values: String,
}

/// Persisted payload row. Created before building, never deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    pub agent_type_id: RecordId,
    pub agent_transport_type_id: RecordId,
    pub transport_id: RecordId,
    pub architecture_id: RecordId,
    pub format_id: RecordId,
    pub version_id: RecordId,
    pub configuration_id: RecordId,
    pub operating_system_id: RecordId,
    pub language_id: RecordId,
    pub key: String,
    /// Upload credential; never written to outbound messages
    #[serde(skip_serializing, default)]
    pub build_token: String,
    pub jitter: f64,
    pub beacon_interval: u32,
    pub expiration_date: Option<DateTime<Utc>>,
    pub debug: bool,
    pub created: DateTime<Utc>,
    pub enabled: bool,
    pub visible: bool,
    pub built: bool,
    #[serde(default)]
    pub artifact_path: Option<String>,
}
