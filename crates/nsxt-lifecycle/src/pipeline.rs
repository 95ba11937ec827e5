//! Operation result pipeline.
//!
//! Every lifecycle operation runs as: build the resource handle, invoke
//! the typed reconciliation function, then apply a typed post-processing
//! policy. The policy is an enum chosen per (resource type, step) — never
//! derived from operation-name strings. The pipeline is also the boundary
//! that converts any escaped error into [`Outcome::Fatal`]: reconciliation
//! never lets an unclassified error surface as a bare crash.

use serde_json::Value;
use tracing::{error, info};

use nsxt_client::ResourceHandle;

use crate::context::InstanceProperties;
use crate::error::{Error, Result};
use crate::outcome::Outcome;

pub const ID_PROPERTY: &str = "id";
pub const NAME_PROPERTY: &str = "name";
pub const TYPE_PROPERTY: &str = "type";
pub const RESOURCE_CONFIG_PROPERTY: &str = "resource_config";
pub const PATH_PROPERTY: &str = "path";
pub const UNIQUE_ID_PROPERTY: &str = "unique_id";

/// What to do with the instance's runtime properties once a step
/// converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    /// Create-class steps: publish `{id, name, type, resource_config}`
    /// plus type-specific extras (`path`, `unique_id`).
    WriteProperties,
    /// Delete-class steps: discard every runtime property and marker.
    ClearProperties,
    /// Steps that manage their own properties, or none.
    NoOp,
}

/// Render an error that escaped a reconciliation function as a fatal
/// outcome, with the operation, resource, and full cause chain in one
/// message.
pub fn fatal_outcome(operation: &str, resource: &str, err: &Error) -> Outcome {
    let mut message = format!("failure while running operation {operation} for {resource}: {err}");
    let mut cause = std::error::Error::source(err);
    while let Some(source) = cause {
        message.push_str(&format!(": {source}"));
        cause = source.source();
    }
    error!(operation, resource, %err, "lifecycle operation failed");
    Outcome::Fatal { message }
}

/// Apply the post-processing policy after a converged step.
pub async fn apply(
    post: PostProcess,
    handle: &ResourceHandle,
    instance: &mut InstanceProperties,
) -> Result<()> {
    match post {
        PostProcess::WriteProperties => {
            let record = handle.get().await?;
            write_resource_properties(&record, handle, instance);
            Ok(())
        }
        PostProcess::ClearProperties => {
            instance.clear_all();
            Ok(())
        }
        PostProcess::NoOp => Ok(()),
    }
}

/// Publish the orchestrator-visible identity of a resource from an
/// already-fetched record (create responses, VM inventory lookups).
pub fn write_resource_properties(
    record: &Value,
    handle: &ResourceHandle,
    instance: &mut InstanceProperties,
) {
    instance.set(
        TYPE_PROPERTY,
        handle.resource_type().as_str().to_owned(),
    );
    if let Some(id) = handle.resource_id() {
        instance.set(ID_PROPERTY, id.to_owned());
    }
    if let Some(name) = record.get("display_name").and_then(Value::as_str) {
        instance.set(NAME_PROPERTY, name.to_owned());
    }
    instance.set(RESOURCE_CONFIG_PROPERTY, record.clone());
    // Type-specific extras some downstream steps rely on (the DHCP server
    // path feeds the tier-1 attachment; unique_id identifies segments in
    // the fabric inventory).
    for extra in [PATH_PROPERTY, UNIQUE_ID_PROPERTY] {
        if let Some(value) = record.get(extra) {
            instance.set(extra, value.clone());
        }
    }
    info!(
        resource = %handle.describe(),
        "published runtime properties for instance"
    );
}
