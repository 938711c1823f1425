//! Bus message types
//!
//! Everything is JSON with camelCase field names. Requests and notifications
//! are internally tagged by a `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Payload, RecordId};
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModuleBuild {
    pub name: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayloadBuild {
    pub agent_type_id: RecordId,
    pub transport_id: RecordId,
    pub architecture_id: RecordId,
    pub format_id: RecordId,
    pub version_id: RecordId,
    pub configuration_id: RecordId,
    pub operating_system_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub jitter: f64,
    pub beacon_interval: u32,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    pub build_token: String,
    #[serde(default)]
    pub debug: bool,
}

/// Rebuild of a payload record that already exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadBuild {
    pub payload_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadUpdate {
    pub id: RecordId,
    pub enabled: bool,
    pub visible: bool,
    pub jitter: f64,
    pub beacon_interval: u32,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildRequest {
    LoadModuleBuild(LoadModuleBuild),
    NewPayloadBuild(NewPayloadBuild),
    PayloadBuild(PayloadBuild),
    PayloadUpdate(PayloadUpdate),
}

impl BuildRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BuildRequest::LoadModuleBuild(_) => "module",
            BuildRequest::NewPayloadBuild(_) => "new_payload",
            BuildRequest::PayloadBuild(_) => "payload",
            BuildRequest::PayloadUpdate(_) => "payload_update",
        }
    }
}

/// Inbound request with its routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub reply_to: Option<String>,
    pub correlation_id: String,
    pub request: BuildRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactContent {
    /// Artifact bytes delivered inline
    Base64 { data: String },
    /// Artifact accepted by the artifact store
    #[serde(rename_all = "camelCase")]
    UploadAck {
        record_id: RecordId,
        ack: String,
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    ArtifactReady {
        success: bool,
        catalog_name: String,
        content: ArtifactContent,
    },
    #[serde(rename_all = "camelCase")]
    BuildError {
        source: String,
        message: String,
        details: String,
        #[serde(default)]
        stage: Option<String>,
        kind: ErrorKind,
    },
    #[serde(rename_all = "camelCase")]
    RecordUpdated { success: bool, record: Payload },
}

impl Notification {
    pub fn is_error(&self) -> bool {
        matches!(self, Notification::BuildError { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(default)]
    pub reply_to: Option<String>,
    pub correlation_id: String,
    pub notification: Notification,
}
