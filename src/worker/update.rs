use tracing::info;

use super::{Failure, HandlerResult, Reply, WorkerContext};
use crate::error::BuildError;
use crate::messages::PayloadUpdate;

/// Applies runtime settings to a payload record; never runs a build
pub(super) async fn handle(context: &WorkerContext, request: PayloadUpdate) -> HandlerResult {
    let subject = format!("payload #{}", request.id);
    let fail = |error: BuildError| Failure::new(subject.clone(), error);

    let mut payload = context
        .repository
        .get_payload(request.id)
        .await
        .map_err(|e| fail(e.into()))?
        .ok_or_else(|| fail(BuildError::lookup("payload", request.id)))?;

    payload.enabled = request.enabled;
    payload.visible = request.visible;
    payload.jitter = request.jitter;
    payload.beacon_interval = request.beacon_interval;
    payload.expiration_date = request.expiration_date;

    context
        .repository
        .update_payload(&payload)
        .await
        .map_err(|e| fail(e.into()))?;

    info!(
        record_id = payload.id,
        enabled = payload.enabled,
        visible = payload.visible,
        "Updated payload record"
    );
    Ok(Reply::Updated(payload))
}
