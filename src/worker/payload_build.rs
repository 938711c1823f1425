//! New and existing payload builds
//!
//! A new payload is built in config-file mode with the agent type's own
//! build command. An existing payload is rebuilt in template mode with its
//! format's command. Both run the transport stage first and upload the
//! result; the record is marked built only after the store accepted it.

use chrono::Utc;
use tracing::{debug, info};

use super::{Failure, HandlerResult, Reply, WorkerContext};
use crate::build::template::{
    self, ensure_shell_safe, expiration_value, transport_substitutions, Substitutions,
};
use crate::build::{
    generate_payload_key, AssemblyMode, BuildConfig, PayloadPlan, PublishedArtifact,
    ResolvedPayload, StageSpec, AGENT_STAGE, TRANSPORT_STAGE,
};
use crate::catalog::{AgentTypeVariant, Payload, RecordId, VariantKind};
use crate::error::BuildError;
use crate::messages::{ArtifactContent, NewPayloadBuild, PayloadBuild};
use crate::notify::Route;

/// How the agent transport type of a payload is found
enum TransportTypeRef {
    /// Already recorded on the payload
    Id(RecordId),
    /// The agent type's transport type matching the transport's type guid
    MatchTransport,
}

struct Selection {
    agent_type_id: RecordId,
    transport_id: RecordId,
    transport_type: TransportTypeRef,
    architecture_id: RecordId,
    operating_system_id: RecordId,
    format_id: RecordId,
    version_id: RecordId,
    configuration_id: RecordId,
}

pub(super) async fn handle_new(
    context: &WorkerContext,
    route: &Route,
    request: NewPayloadBuild,
) -> HandlerResult {
    let selection = Selection {
        agent_type_id: request.agent_type_id,
        transport_id: request.transport_id,
        transport_type: TransportTypeRef::MatchTransport,
        architecture_id: request.architecture_id,
        operating_system_id: request.operating_system_id,
        format_id: request.format_id,
        version_id: request.version_id,
        configuration_id: request.configuration_id,
    };
    let resolved = resolve(context, &selection)
        .await
        .map_err(|e| Failure::new(format!("payload {}", request.name), e))?;

    let subject = resolved.agent_type.name.clone();
    let fail = |error: BuildError| Failure::new(subject.clone(), error);

    let agent_output = resolved.agent_type.build_location.clone().ok_or_else(|| {
        fail(BuildError::InvalidRequest(format!(
            "agent type {} declares no build location",
            resolved.agent_type.name
        )))
    })?;

    let payload = Payload {
        id: 0,
        name: request.name,
        description: request.description,
        agent_type_id: resolved.agent_type.id,
        agent_transport_type_id: resolved.transport_type.id,
        transport_id: resolved.transport.id,
        architecture_id: resolved.architecture.id,
        format_id: resolved.format.id,
        version_id: resolved.version.id,
        configuration_id: resolved.configuration.id,
        operating_system_id: resolved.operating_system.id,
        language_id: context.language_id,
        key: generate_payload_key(),
        build_token: request.build_token,
        jitter: request.jitter,
        beacon_interval: request.beacon_interval,
        expiration_date: request.expiration_date,
        debug: request.debug,
        created: Utc::now(),
        enabled: true,
        visible: true,
        built: false,
        artifact_path: None,
    };
    let payload = context
        .repository
        .add_payload(payload)
        .await
        .map_err(|e| fail(e.into()))?;
    info!(record_id = payload.id, payload = %payload.name, "Created payload record");

    let plan = PayloadPlan {
        record_id: payload.id,
        build_token: payload.build_token.clone(),
        working_dir: context.config.agent_working_dir(&resolved.agent_type.name),
        transport: transport_stage(&resolved),
        agent: StageSpec::new(
            AGENT_STAGE,
            resolved.agent_type.build_command.clone(),
            agent_output,
        ),
        mode: AssemblyMode::ConfigFile(BuildConfig::assemble(&payload, &resolved)),
        catalog_name: resolved.agent_type.name.clone(),
        variant_name: resolved.configuration.name.clone(),
        payload_name: payload.name.clone(),
    };

    build_and_record(context, route, payload, plan)
        .await
        .map_err(fail)
}

pub(super) async fn handle_existing(
    context: &WorkerContext,
    route: &Route,
    request: PayloadBuild,
) -> HandlerResult {
    let subject = format!("payload #{}", request.payload_id);
    let mut payload = context
        .repository
        .get_payload(request.payload_id)
        .await
        .map_err(|e| Failure::new(subject.clone(), e))?
        .ok_or_else(|| {
            Failure::new(
                subject.clone(),
                BuildError::lookup("payload", request.payload_id),
            )
        })?;

    let selection = Selection {
        agent_type_id: payload.agent_type_id,
        transport_id: payload.transport_id,
        transport_type: TransportTypeRef::Id(payload.agent_transport_type_id),
        architecture_id: payload.architecture_id,
        operating_system_id: payload.operating_system_id,
        format_id: payload.format_id,
        version_id: payload.version_id,
        configuration_id: payload.configuration_id,
    };
    let resolved = resolve(context, &selection)
        .await
        .map_err(|e| Failure::new(subject.clone(), e))?;

    let subject = resolved.agent_type.name.clone();
    let fail = |error: BuildError| Failure::new(subject.clone(), error);

    let expiration = expiration_value(payload.expiration_date.as_ref());
    if context.config.strict_template_values {
        ensure_shell_safe("payload name", &payload.name).map_err(fail)?;
        ensure_shell_safe("expiration", &expiration).map_err(fail)?;
    }

    let format_output = resolved.format.build_location.clone().ok_or_else(|| {
        fail(BuildError::InvalidRequest(format!(
            "format {} of {} declares no build location",
            resolved.format.name, resolved.agent_type.name
        )))
    })?;
    let entries = template::parse_transport_configuration(&resolved.transport.configuration)
        .map_err(fail)?;

    if payload.key.is_empty() {
        payload.key = generate_payload_key();
    }
    payload.built = false;
    payload.language_id = context.language_id;
    context
        .repository
        .update_payload(&payload)
        .await
        .map_err(|e| fail(e.into()))?;

    let agent_substitutions = Substitutions::new()
        .with(template::PAYLOAD_NAME, payload.name.clone())
        .with(template::PAYLOAD_KEY, payload.key.clone())
        .with(template::EXPIRATION, expiration);

    let plan = PayloadPlan {
        record_id: payload.id,
        build_token: payload.build_token.clone(),
        working_dir: context.config.agent_working_dir(&resolved.agent_type.name),
        transport: transport_stage(&resolved),
        agent: StageSpec::new(
            AGENT_STAGE,
            resolved.format.build_command.clone(),
            format_output,
        ),
        mode: AssemblyMode::Template {
            transport: transport_substitutions(&entries),
            agent: agent_substitutions,
        },
        catalog_name: resolved.agent_type.name.clone(),
        variant_name: resolved.format.name.clone(),
        payload_name: payload.name.clone(),
    };

    build_and_record(context, route, payload, plan)
        .await
        .map_err(fail)
}

fn transport_stage(resolved: &ResolvedPayload) -> StageSpec {
    StageSpec::new(
        TRANSPORT_STAGE,
        resolved.transport_type.build_command.clone(),
        resolved.transport_type.build_location.clone(),
    )
}

async fn build_and_record(
    context: &WorkerContext,
    route: &Route,
    mut payload: Payload,
    plan: PayloadPlan,
) -> Result<Reply, BuildError> {
    let catalog_name = plan.catalog_name.clone();
    let PublishedArtifact { path, ack } = context
        .controller
        .build_payload(&route.correlation_id, plan)
        .await?;

    let path = path.display().to_string();
    payload.built = true;
    payload.artifact_path = Some(path.clone());
    context.repository.update_payload(&payload).await?;
    info!(record_id = payload.id, path = %path, "Payload built");

    Ok(Reply::Artifact {
        catalog_name,
        content: ArtifactContent::UploadAck {
            record_id: payload.id,
            ack,
            path,
        },
    })
}

/// Looks up every catalog row the build needs, before anything runs
async fn resolve(
    context: &WorkerContext,
    selection: &Selection,
) -> Result<ResolvedPayload, BuildError> {
    let repo = &context.repository;

    let agent_type = repo
        .get_agent_type(selection.agent_type_id)
        .await?
        .ok_or_else(|| BuildError::lookup("agent type", selection.agent_type_id))?;

    let transport = repo
        .get_transport(selection.transport_id)
        .await?
        .ok_or_else(|| BuildError::lookup("transport", selection.transport_id))?;

    let transport_type = match selection.transport_type {
        TransportTypeRef::Id(id) => repo
            .get_agent_transport_type(id)
            .await?
            .filter(|t| t.agent_type_id == agent_type.id)
            .ok_or_else(|| BuildError::lookup("agent transport type", id))?,
        TransportTypeRef::MatchTransport => repo
            .find_agent_transport_type(agent_type.id, &transport.transport_type_guid)
            .await?
            .ok_or_else(|| {
                BuildError::lookup(
                    "agent transport type",
                    format!(
                        "{} for transport type {}",
                        agent_type.name, transport.transport_type_guid
                    ),
                )
            })?,
    };

    let owner = agent_type.id;
    let resolved = ResolvedPayload {
        architecture: variant(context, owner, selection.architecture_id, VariantKind::Architecture)
            .await?,
        operating_system: variant(
            context,
            owner,
            selection.operating_system_id,
            VariantKind::OperatingSystem,
        )
        .await?,
        format: variant(context, owner, selection.format_id, VariantKind::Format).await?,
        version: variant(context, owner, selection.version_id, VariantKind::Version).await?,
        configuration: variant(
            context,
            owner,
            selection.configuration_id,
            VariantKind::Configuration,
        )
        .await?,
        agent_type,
        transport_type,
        transport,
    };
    debug!(
        agent = %resolved.agent_type.name,
        transport = %resolved.transport.name,
        format = %resolved.format.name,
        "Resolved payload selection"
    );
    Ok(resolved)
}

async fn variant(
    context: &WorkerContext,
    agent_type_id: RecordId,
    id: RecordId,
    kind: VariantKind,
) -> Result<AgentTypeVariant, BuildError> {
    context
        .repository
        .get_variant(id)
        .await?
        .filter(|v| v.kind == kind && v.agent_type_id == agent_type_id)
        .ok_or_else(|| BuildError::lookup(kind.label(), id))
}
