//! Tier-1 gateway lifecycle operations.

use serde_json::Value;
use tracing::instrument;

use nsxt_client::ResourceType;

use crate::context::{Marker, SubjectContext};
use crate::error::Result;
use crate::outcome::Outcome;
use crate::pipeline::{self, PostProcess};
use crate::reconcile::{self, TASK_DELETE};

/// Upsert the tier-1 gateway and publish its identity into the runtime
/// properties.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn create(ctx: &mut SubjectContext) -> Outcome {
    match create_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("tier1.create", "Tier1", &err),
    }
}

async fn create_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let mut handle = ctx.resource_handle(ResourceType::Tier1).await?;
    let created = handle.create().await?;
    if let Some(id) = created.get("id").and_then(Value::as_str) {
        handle.set_resource_id(id.to_owned());
    }
    pipeline::apply(PostProcess::WriteProperties, &handle, &mut ctx.instance).await?;
    Ok(Outcome::Converged)
}

/// Poll the gateway's realization state. The tier-1 status nests one level
/// deeper than the other state endpoints; the handle's resource type
/// carries that knowledge.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn start(ctx: &mut SubjectContext) -> Outcome {
    match start_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("tier1.start", "Tier1", &err),
    }
}

async fn start_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let handle = ctx.resource_handle(ResourceType::Tier1State).await?;
    reconcile::ensure_started("Tier1", &handle).await
}

/// Delete the gateway, polling until the manager stops reporting it.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn delete(ctx: &mut SubjectContext) -> Outcome {
    match delete_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("tier1.delete", "Tier1", &err),
    }
}

async fn delete_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let handle = ctx.resource_handle(ResourceType::Tier1).await?;
    let outcome = reconcile::ensure_deleted(&handle, Marker::Flag(TASK_DELETE), &mut ctx.instance).await?;
    if outcome.is_converged() {
        pipeline::apply(PostProcess::ClearProperties, &handle, &mut ctx.instance).await?;
    }
    Ok(outcome)
}
