//! Terminal notifications addressed back to the requester

use std::sync::Arc;
use tracing::{debug, error};

use crate::bus::{BusError, Publisher};
use crate::catalog::Payload;
use crate::error::{BuildError, ErrorKind};
use crate::messages::{ArtifactContent, Envelope, Notification, OutboundMessage};

/// Routing metadata copied from the inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub reply_to: Option<String>,
    pub correlation_id: String,
}

impl From<&Envelope> for Route {
    fn from(envelope: &Envelope) -> Self {
        Self {
            reply_to: envelope.reply_to.clone(),
            correlation_id: envelope.correlation_id.clone(),
        }
    }
}

pub struct Notifier {
    publisher: Arc<dyn Publisher>,
    source: String,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn Publisher>, source: impl Into<String>) -> Self {
        Self {
            publisher,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn artifact_ready(
        &self,
        route: &Route,
        catalog_name: &str,
        content: ArtifactContent,
    ) -> Result<(), BusError> {
        self.send(
            route,
            Notification::ArtifactReady {
                success: true,
                catalog_name: catalog_name.to_string(),
                content,
            },
        )
        .await
    }

    /// `subject` names what was being built (agent type or module)
    pub async fn build_error(
        &self,
        route: &Route,
        subject: &str,
        error: &BuildError,
    ) -> Result<(), BusError> {
        let message = match error.kind() {
            ErrorKind::PublishFailure => {
                format!("Error uploading {} payload to artifact store", subject)
            }
            _ => format!("Error building {}", subject),
        };
        self.send(
            route,
            Notification::BuildError {
                source: self.source.clone(),
                message,
                details: error.details(),
                stage: error.stage().map(str::to_string),
                kind: error.kind(),
            },
        )
        .await
    }

    pub async fn record_updated(&self, route: &Route, record: Payload) -> Result<(), BusError> {
        self.send(
            route,
            Notification::RecordUpdated {
                success: true,
                record,
            },
        )
        .await
    }

    async fn send(&self, route: &Route, notification: Notification) -> Result<(), BusError> {
        debug!(
            correlation_id = %route.correlation_id,
            error = notification.is_error(),
            "Publishing notification"
        );
        let result = self
            .publisher
            .publish(OutboundMessage {
                reply_to: route.reply_to.clone(),
                correlation_id: route.correlation_id.clone(),
                notification,
            })
            .await;
        if let Err(e) = &result {
            error!(correlation_id = %route.correlation_id, "Failed to publish notification: {}", e);
        }
        result
    }
}
