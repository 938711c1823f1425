//! Request dispatch
//!
//! Each envelope runs as its own tokio task, bounded by a semaphore. The
//! handler itself runs in a nested task so that a panic surfaces as a
//! `JoinError` here instead of tearing down the worker. Whatever happens,
//! the task publishes exactly one notification for its envelope.

mod module_build;
mod payload_build;
mod update;

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};

use crate::build::PipelineController;
use crate::bus::stdio::{EnvelopeReader, Inbound};
use crate::bus::BusError;
use crate::catalog::{Payload, RecordId, Repository};
use crate::config::ForgelineConfig;
use crate::error::BuildError;
use crate::messages::{ArtifactContent, BuildRequest, Envelope};
use crate::notify::{Notifier, Route};
use crate::progress::{ProgressEvent, ProgressHandler};

/// Shared state every request handler sees
pub struct WorkerContext {
    pub config: Arc<ForgelineConfig>,
    /// Id of the configured language, registered at startup
    pub language_id: RecordId,
    pub repository: Arc<dyn Repository>,
    pub controller: Arc<PipelineController>,
    pub notifier: Arc<Notifier>,
    pub progress: Arc<dyn ProgressHandler>,
}

/// Successful result of a handler, before it is turned into a notification
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Artifact {
        catalog_name: String,
        content: ArtifactContent,
    },
    Updated(Payload),
}

/// Failed result of a handler
#[derive(Debug)]
pub struct Failure {
    /// What was being built, used in the notification headline
    pub subject: String,
    pub error: BuildError,
}

impl Failure {
    pub fn new(subject: impl Into<String>, error: impl Into<BuildError>) -> Self {
        Self {
            subject: subject.into(),
            error: error.into(),
        }
    }
}

type HandlerResult = Result<Reply, Failure>;

pub struct Worker {
    context: Arc<WorkerContext>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl Worker {
    pub fn new(context: impl Into<Arc<WorkerContext>>) -> Self {
        let context = context.into();
        let permits = Arc::new(Semaphore::new(context.config.max_concurrent_builds));
        Self {
            context,
            permits,
            tasks: JoinSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    /// Starts processing `envelope`, waiting first if the worker is at capacity
    pub async fn dispatch(&mut self, envelope: Envelope) {
        self.reap_finished();
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Request semaphore closed, dropping request");
                return;
            }
        };
        let context = Arc::clone(&self.context);
        let span = tracing::info_span!(
            "request",
            correlation_id = %envelope.correlation_id,
            kind = envelope.request.kind()
        );
        self.tasks.spawn(
            async move {
                process(context, envelope).await;
                drop(permit);
            }
            .instrument(span),
        );
    }

    /// Reads envelopes until the stream ends, then waits for in-flight requests
    pub async fn run<R>(&mut self, reader: &mut EnvelopeReader<R>) -> Result<usize, BusError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let mut accepted = 0;
        loop {
            let inbound = match reader.next().await {
                Ok(Some(inbound)) => inbound,
                Ok(None) => break,
                Err(e) => {
                    error!("Inbound stream failed, finishing in-flight requests: {}", e);
                    self.shutdown().await;
                    return Err(e);
                }
            };
            match inbound {
                Inbound::Envelope(envelope) => {
                    accepted += 1;
                    self.dispatch(envelope).await;
                }
                Inbound::Malformed {
                    reply_to,
                    correlation_id: Some(correlation_id),
                    error,
                } => {
                    let route = Route {
                        reply_to,
                        correlation_id,
                    };
                    let failure = BuildError::InvalidRequest(error);
                    // already logged by notifier on failure
                    let _ = self
                        .context
                        .notifier
                        .build_error(&route, "request", &failure)
                        .await;
                }
                Inbound::Malformed { .. } => {
                    warn!("Dropping malformed message without correlation id");
                }
            }
        }
        self.shutdown().await;
        info!(accepted, "Inbound stream finished");
        Ok(accepted)
    }

    /// Waits for every dispatched request to finish
    pub async fn shutdown(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Request task ended abnormally: {}", e);
            }
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Request task ended abnormally: {}", e);
            }
        }
    }
}

/// Handles one envelope and publishes its single notification
pub async fn process(context: Arc<WorkerContext>, envelope: Envelope) {
    let route = Route::from(&envelope);
    let fallback_subject = subject_of(&envelope.request);
    context.progress.on_progress(&ProgressEvent::RequestAccepted {
        run: route.correlation_id.clone(),
        kind: envelope.request.kind(),
    });

    let handler = {
        let context = Arc::clone(&context);
        let route = route.clone();
        tokio::spawn(
            async move { handle_request(&context, &route, envelope.request).await }
                .in_current_span(),
        )
    };

    let result = match handler.await {
        Ok(result) => result,
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                "request handler panicked"
            } else {
                "request handler was cancelled"
            };
            error!(correlation_id = %route.correlation_id, "{}", reason);
            Err(Failure::new(
                fallback_subject,
                BuildError::Internal(reason.to_string()),
            ))
        }
    };

    let notifier = &context.notifier;
    // publish errors are logged by the notifier
    let _ = match result {
        Ok(Reply::Artifact {
            catalog_name,
            content,
        }) => notifier.artifact_ready(&route, &catalog_name, content).await,
        Ok(Reply::Updated(record)) => notifier.record_updated(&route, record).await,
        Err(failure) => {
            error!(
                correlation_id = %route.correlation_id,
                subject = %failure.subject,
                kind = ?failure.error.kind(),
                "Request failed: {}",
                failure.error
            );
            notifier
                .build_error(&route, &failure.subject, &failure.error)
                .await
        }
    };
}

async fn handle_request(
    context: &WorkerContext,
    route: &Route,
    request: BuildRequest,
) -> HandlerResult {
    match request {
        BuildRequest::LoadModuleBuild(request) => {
            module_build::handle(context, route, request).await
        }
        BuildRequest::NewPayloadBuild(request) => {
            payload_build::handle_new(context, route, request).await
        }
        BuildRequest::PayloadBuild(request) => {
            payload_build::handle_existing(context, route, request).await
        }
        BuildRequest::PayloadUpdate(request) => update::handle(context, request).await,
    }
}

fn subject_of(request: &BuildRequest) -> String {
    match request {
        BuildRequest::LoadModuleBuild(r) => format!("{} module", r.name),
        BuildRequest::NewPayloadBuild(r) => format!("payload {}", r.name),
        BuildRequest::PayloadBuild(r) => format!("payload #{}", r.payload_id),
        BuildRequest::PayloadUpdate(r) => format!("payload #{}", r.id),
    }
}
