use tracing::debug;

use super::{Failure, HandlerResult, Reply, WorkerContext};
use crate::build::{StageSpec, MODULE_STAGE};
use crate::error::BuildError;
use crate::messages::{ArtifactContent, LoadModuleBuild};
use crate::notify::Route;

/// Builds a module and returns its bytes inline
///
/// Modules are looked up by the requested language, but always built in the
/// configured language's shared module directory.
pub(super) async fn handle(
    context: &WorkerContext,
    route: &Route,
    request: LoadModuleBuild,
) -> HandlerResult {
    let subject = format!("{} module", request.name);
    let fail = |error: BuildError| Failure::new(subject.clone(), error);

    let module = context
        .repository
        .find_module(&request.name, &request.language)
        .await
        .map_err(|e| fail(e.into()))?
        .ok_or_else(|| {
            fail(BuildError::lookup(
                "module",
                format!("{} ({})", request.name, request.language),
            ))
        })?;

    let working_dir = context.config.module_working_dir();
    debug!(
        module = %module.name,
        working_dir = %working_dir.display(),
        has_build_command = module.build_command.is_some(),
        "Resolved module"
    );
    let stage = StageSpec::new(
        MODULE_STAGE,
        module.build_command.clone(),
        module.build_location.clone(),
    );

    let data = context
        .controller
        .build_module(&route.correlation_id, &working_dir, &stage)
        .await
        .map_err(fail)?;

    Ok(Reply::Artifact {
        catalog_name: module.name,
        content: ArtifactContent::Base64 { data },
    })
}
