//! DHCP server configuration lifecycle operations.
//!
//! The create step records the server's policy `path` as a runtime
//! property; the configure/stop pair flips that path onto and off of the
//! owning tier-1 gateway with a single `PATCH` each, never reading the
//! gateway first. The patch body is complete and idempotent, so a repeated
//! tick after a crash re-sends the same attachment.

use serde_json::{Map, Value};
use tracing::{info, instrument};

use nsxt_client::{ResourceHandle, ResourceType};

use crate::context::{Marker, SubjectContext};
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::pipeline::{self, PostProcess, PATH_PROPERTY};
use crate::reconcile::{self, TASK_DELETE};

/// Declarative property naming the tier-1 gateway the server attaches to.
const TIER1_GATEWAY_PROPERTY: &str = "tier1_gateway_id";

const DHCP_CONFIG_PATHS: &str = "dhcp_config_paths";

/// Upsert the DHCP server configuration and publish its identity,
/// including the policy `path` the tier-1 attachment needs.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn create(ctx: &mut SubjectContext) -> Outcome {
    match create_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("dhcp_server.create", "DhcpServerConfig", &err),
    }
}

async fn create_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let mut handle = ctx.resource_handle(ResourceType::DhcpServerConfig).await?;
    let created = handle.create().await?;
    if let Some(id) = created.get("id").and_then(Value::as_str) {
        handle.set_resource_id(id.to_owned());
    }
    pipeline::apply(PostProcess::WriteProperties, &handle, &mut ctx.instance).await?;
    Ok(Outcome::Converged)
}

/// Attach the server to its tier-1 gateway: one `PATCH` setting
/// `dhcp_config_paths` to exactly this server's path.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn configure(ctx: &mut SubjectContext) -> Outcome {
    match patch_gateway_paths(ctx, true).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("dhcp_server.configure", "DhcpServerConfig", &err),
    }
}

/// Detach the server from its tier-1 gateway: one `PATCH` clearing
/// `dhcp_config_paths`.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn stop(ctx: &mut SubjectContext) -> Outcome {
    match patch_gateway_paths(ctx, false).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("dhcp_server.stop", "DhcpServerConfig", &err),
    }
}

async fn patch_gateway_paths(ctx: &mut SubjectContext, attach: bool) -> Result<Outcome> {
    let gateway_id = ctx
        .property_str(TIER1_GATEWAY_PROPERTY)
        .ok_or_else(|| {
            Error::Config(format!(
                "node property `{TIER1_GATEWAY_PROPERTY}` is required to manage \
                 the dhcp server attachment"
            ))
        })?
        .to_owned();

    let paths = if attach {
        let path = ctx
            .instance
            .get_str(PATH_PROPERTY)
            .ok_or_else(|| {
                Error::Config(
                    "runtime property `path` is not populated; the dhcp server \
                     must be created before it can be attached"
                        .into(),
                )
            })?
            .to_owned();
        vec![Value::String(path)]
    } else {
        Vec::new()
    };

    let server = ctx.resource_handle(ResourceType::DhcpServerConfig).await?;
    let mut gateway_config = Map::new();
    gateway_config.insert("id".into(), Value::String(gateway_id.clone()));
    let gateway = ResourceHandle::new(
        server.client().clone(),
        ResourceType::Tier1,
        gateway_config,
    );

    let mut patch = Map::new();
    patch.insert(DHCP_CONFIG_PATHS.into(), Value::Array(paths));
    gateway.patch(&patch).await?;
    info!(
        gateway = %gateway_id,
        attached = attach,
        "updated dhcp attachment on tier-1 gateway"
    );
    Ok(Outcome::Converged)
}

/// Delete the server configuration, polling until the manager stops
/// reporting it.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn delete(ctx: &mut SubjectContext) -> Outcome {
    match delete_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("dhcp_server.delete", "DhcpServerConfig", &err),
    }
}

async fn delete_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let handle = ctx.resource_handle(ResourceType::DhcpServerConfig).await?;
    let outcome = reconcile::ensure_deleted(&handle, Marker::Flag(TASK_DELETE), &mut ctx.instance).await?;
    if outcome.is_converged() {
        pipeline::apply(PostProcess::ClearProperties, &handle, &mut ctx.instance).await?;
    }
    Ok(outcome)
}
