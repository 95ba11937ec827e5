//! Shared reconciliation routines.
//!
//! Every per-resource lifecycle step is an instance of one of two shapes:
//! a start step that polls reported status once and classifies it, or a
//! delete step that drives the three-state machine
//! Unstarted → DeleteRequested → Terminal. The machine's state is never
//! stored as such — it is reconstructed each tick from the progress marker
//! plus a fresh GET, which is what makes the steps tolerate orchestrator
//! restarts at any point.

use tracing::{info, warn};

use nsxt_client::{poll_status, Error as ClientError, RemoteStatus, ResourceHandle};

use crate::context::{InstanceProperties, Marker};
use crate::error::Result;
use crate::outcome::Outcome;

/// Marker recording that a delete was already requested for the instance's
/// main resource.
pub const TASK_DELETE: &str = "delete_task";

/// Poll a resource's reported status once and map it onto the outcome
/// contract. No marker is needed: polling is naturally idempotent and
/// side-effect-free.
pub async fn ensure_started(resource_name: &str, state_handle: &ResourceHandle) -> Result<Outcome> {
    let status = poll_status(state_handle).await?;
    match status {
        RemoteStatus::Pending | RemoteStatus::InProgress => {
            info!(resource = resource_name, %status, "resource is not ready yet");
            Ok(Outcome::retry(format!(
                "{resource_name} state is still {status}"
            )))
        }
        RemoteStatus::Success => {
            info!(resource = resource_name, "resource started successfully");
            Ok(Outcome::Converged)
        }
        RemoteStatus::Failed(raw) => Ok(Outcome::fatal(format!(
            "{resource_name} failed to start: {raw}"
        ))),
    }
}

/// Drive one tick of the delete state machine.
///
/// 1. `GET` the resource; `NotFound` means the deletion converged — no
///    matter how far the previous ticks got.
/// 2. Found with no marker: issue the `DELETE`. A transport or API error
///    here is retryable (the manager may already be processing the
///    deletion, and `DELETE` is idempotent); success sets the marker. A
///    successful call does not guarantee the resource is gone from the
///    next `GET`, so both paths re-poll.
/// 3. Found with the marker set: the delete was already requested — keep
///    waiting.
///
/// The caller owns clearing markers and properties once this returns
/// [`Outcome::Converged`].
pub async fn ensure_deleted(
    handle: &ResourceHandle,
    marker: Marker<'_>,
    instance: &mut InstanceProperties,
) -> Result<Outcome> {
    let resource = handle.describe();
    match handle.get().await {
        Err(ClientError::NotFound { .. }) => {
            info!(%resource, "resource is deleted successfully");
            return Ok(Outcome::Converged);
        }
        Err(err) => return Err(err.into()),
        Ok(_) => {}
    }

    if marker.is_set(instance) {
        info!(%resource, "waiting for resource to be deleted");
        return Ok(Outcome::retry(format!("{resource} deletion is in progress")));
    }

    match handle.delete(&[]).await {
        Ok(()) => {
            marker.set(instance);
            Ok(Outcome::retry(format!("{resource} deletion is in progress")))
        }
        // Already gone between the GET and the DELETE.
        Err(ClientError::NotFound { .. }) => {
            info!(%resource, "resource is deleted successfully");
            Ok(Outcome::Converged)
        }
        Err(err @ (ClientError::Api { .. } | ClientError::Transport(_))) => {
            warn!(%resource, %err, "resource cannot be deleted now, try again");
            Ok(Outcome::retry(format!("{resource} deletion is in progress")))
        }
        Err(err) => Err(err.into()),
    }
}

/// Best-effort delete used inside drain guards, where the step retries
/// regardless: a rejection now just means another tick.
pub async fn attempt_delete(handle: &ResourceHandle) -> Result<()> {
    match handle.delete(&[]).await {
        Ok(()) | Err(ClientError::NotFound { .. }) => Ok(()),
        Err(err @ (ClientError::Api { .. } | ClientError::Transport(_))) => {
            warn!(resource = %handle.describe(), %err, "delete rejected, will retry");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
