//! Shared fixtures: a seeded in-memory catalog, a scripted runner and a
//! recording artifact store wired into a [`WorkerContext`].

#![allow(dead_code)]

use async_trait::async_trait;
use forgeline::build::{
    ArtifactPublisher, ArtifactStore, DirectoryLocks, PipelineController, PublishError,
};
use forgeline::bus::ChannelPublisher;
use forgeline::catalog::{
    AgentTransportType, AgentType, AgentTypeVariant, InMemoryRepository, Module, RecordId,
    Repository, Transport, VariantKind,
};
use forgeline::config::ForgelineConfig;
use forgeline::messages::{BuildRequest, Envelope, OutboundMessage};
use forgeline::notify::Notifier;
use forgeline::process::MockProcessRunner;
use forgeline::progress::{ProgressEvent, ProgressHandler};
use forgeline::worker::WorkerContext;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const AGENT_NAME: &str = "Marauder";
pub const AGENT_COMMAND: &str = "./agent.sh";
pub const AGENT_OUTPUT: &str = "out/agent.exe";
pub const FORMAT_COMMAND: &str = "./format.sh --name PAYLOADNAME --key PAYLOADKEY --transport TRANSPORT";
pub const FORMAT_OUTPUT: &str = "out/format.exe";
pub const TRANSPORT_COMMAND: &str = "./transport.sh";
pub const TRANSPORT_OUTPUT: &str = "out/transport.dll";
pub const MODULE_NAME: &str = "recon";
pub const MODULE_COMMAND: &str = "./module.sh";
pub const MODULE_OUTPUT: &str = "recon.dll";

/// Records uploads instead of sending them anywhere
#[derive(Default)]
pub struct RecordingStore {
    pub uploads: Mutex<Vec<(RecordId, String, Vec<u8>)>>,
    pub reject: bool,
}

impl RecordingStore {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> Vec<(RecordId, String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn upload(
        &self,
        record_id: RecordId,
        build_token: &str,
        path: &Path,
    ) -> Result<String, PublishError> {
        if self.reject {
            return Err(PublishError::Rejected {
                status: 500,
                body: "store unavailable".to_string(),
            });
        }
        let bytes = std::fs::read(path)?;
        self.uploads
            .lock()
            .unwrap()
            .push((record_id, build_token.to_string(), bytes));
        Ok(format!("{{\"id\":{}}}", record_id))
    }
}

/// Keeps every progress event for later assertions
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Rendered run states of one run, in emission order
    pub fn states(&self, run: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::StateChanged { run: r, state } if r == run => {
                    Some(state.to_string())
                }
                _ => None,
            })
            .collect()
    }
}

impl ProgressHandler for RecordingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Catalog ids created by [`seed_catalog`]
#[derive(Debug, Clone, Copy)]
pub struct Seeded {
    pub language_id: RecordId,
    pub agent_type_id: RecordId,
    pub architecture_id: RecordId,
    pub operating_system_id: RecordId,
    pub format_id: RecordId,
    pub version_id: RecordId,
    pub configuration_id: RecordId,
    pub transport_type_id: RecordId,
    pub transport_id: RecordId,
}

pub fn test_config(root: &Path) -> ForgelineConfig {
    ForgelineConfig {
        language: "dotnet".to_string(),
        agents_path: root.join("agents"),
        modules_path: root.join("modules"),
        build_dir: root.join("build"),
        artifact_store_url: "http://127.0.0.1:1/api/v1/payload".to_string(),
        shell: "/bin/sh".to_string(),
        stage_timeout_secs: 0,
        upload_timeout_secs: 5,
        max_concurrent_builds: 4,
        source_label: "dotnet build server".to_string(),
        strict_template_values: false,
        log_level: "info".to_string(),
    }
}

pub async fn seed_catalog(repo: &InMemoryRepository) -> Seeded {
    let language = repo.add_language("dotnet").await.unwrap();
    let agent = repo
        .add_agent_type(AgentType {
            id: 0,
            name: AGENT_NAME.to_string(),
            guid: "agent-guid".to_string(),
            authors: "alice, bob".to_string(),
            language_id: language.id,
            build_command: Some(AGENT_COMMAND.to_string()),
            build_location: Some(AGENT_OUTPUT.to_string()),
        })
        .await
        .unwrap();

    let variant = |kind: VariantKind, name: &str, command: Option<&str>, output: Option<&str>| {
        AgentTypeVariant {
            id: 0,
            agent_type_id: agent.id,
            kind,
            name: name.to_string(),
            build_command: command.map(str::to_string),
            build_location: output.map(str::to_string),
        }
    };
    let architecture = variant(VariantKind::Architecture, "x64", None, None);
    let operating_system = variant(VariantKind::OperatingSystem, "Windows", None, None);
    let format = variant(
        VariantKind::Format,
        "Exe",
        Some(FORMAT_COMMAND),
        Some(FORMAT_OUTPUT),
    );
    let version = variant(VariantKind::Version, "NET45", None, None);
    let configuration = variant(VariantKind::Configuration, "Release", None, None);

    let architecture = repo.add_variant(architecture).await.unwrap();
    let operating_system = repo.add_variant(operating_system).await.unwrap();
    let format = repo.add_variant(format).await.unwrap();
    let version = repo.add_variant(version).await.unwrap();
    let configuration = repo.add_variant(configuration).await.unwrap();

    let transport_type = repo
        .add_agent_transport_type(AgentTransportType {
            id: 0,
            agent_type_id: agent.id,
            name: "HTTP".to_string(),
            transport_type_guid: "http-guid".to_string(),
            build_command: Some(TRANSPORT_COMMAND.to_string()),
            build_location: TRANSPORT_OUTPUT.to_string(),
        })
        .await
        .unwrap();
    let transport = repo
        .add_transport(Transport {
            id: 0,
            name: "primary".to_string(),
            transport_type_guid: "http-guid".to_string(),
            configuration: r#"[{"Name": "URL", "Value": "https://c2.local"}]"#.to_string(),
        })
        .await
        .unwrap();

    repo.add_module(Module {
        id: 0,
        name: MODULE_NAME.to_string(),
        description: "Host reconnaissance".to_string(),
        authors: "carol".to_string(),
        language_id: language.id,
        build_command: Some(MODULE_COMMAND.to_string()),
        build_location: MODULE_OUTPUT.to_string(),
    })
    .await
    .unwrap();

    Seeded {
        language_id: language.id,
        agent_type_id: agent.id,
        architecture_id: architecture.id,
        operating_system_id: operating_system.id,
        format_id: format.id,
        version_id: version.id,
        configuration_id: configuration.id,
        transport_type_id: transport_type.id,
        transport_id: transport.id,
    }
}

/// A fully wired worker context over temp directories
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<ForgelineConfig>,
    pub repo: Arc<InMemoryRepository>,
    pub runner: Arc<MockProcessRunner>,
    pub store: Arc<RecordingStore>,
    pub progress: Arc<RecordingProgress>,
    pub seeded: Seeded,
    pub outbound: UnboundedReceiver<OutboundMessage>,
    pub context: Arc<WorkerContext>,
}

impl Harness {
    pub async fn new(runner: MockProcessRunner) -> Self {
        Self::with_store(runner, RecordingStore::default()).await
    }

    pub async fn with_store(runner: MockProcessRunner, store: RecordingStore) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let repo = Arc::new(InMemoryRepository::new());
        let seeded = seed_catalog(&repo).await;

        let runner = Arc::new(runner);
        let store = Arc::new(store);
        let progress = Arc::new(RecordingProgress::default());
        let publisher = Arc::new(ArtifactPublisher::new(
            store.clone(),
            config.build_dir.clone(),
        ));
        let controller = PipelineController::new(
            runner.clone(),
            DirectoryLocks::new(),
            publisher,
            progress.clone(),
        );
        let (bus, outbound) = ChannelPublisher::new();
        let notifier = Notifier::new(Arc::new(bus), config.source_label.clone());

        let context = Arc::new(WorkerContext {
            config: config.clone(),
            language_id: seeded.language_id,
            repository: repo.clone(),
            controller: Arc::new(controller),
            notifier: Arc::new(notifier),
            progress: progress.clone(),
        });

        Self {
            dir,
            config,
            repo,
            runner,
            store,
            progress,
            seeded,
            outbound,
            context,
        }
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.config.agent_working_dir(AGENT_NAME)
    }

    pub fn module_dir(&self) -> PathBuf {
        self.config.module_working_dir()
    }

    /// Drains every notification published so far
    pub fn notifications(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

pub fn envelope(correlation_id: &str, request: BuildRequest) -> Envelope {
    Envelope {
        reply_to: Some("api.replies".to_string()),
        correlation_id: correlation_id.to_string(),
        request,
    }
}
