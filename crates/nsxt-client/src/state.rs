//! Remote state polling and classification.
//!
//! The poller fetches a resource's reported status and classifies it. No
//! timeout lives here: every call is an independent poll, and the attempt
//! budget belongs to the orchestrator.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::ResourceHandle;

pub const STATE_PENDING: &str = "pending";
pub const STATE_IN_PROGRESS: &str = "in_progress";
pub const STATE_SUCCESS: &str = "success";

/// Classification of a resource's server-reported status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    InProgress,
    /// The resource realized successfully.
    Success,
    /// Any status that is neither in flight nor `success`, carrying the
    /// raw status string.
    Failed(String),
}

impl RemoteStatus {
    /// Map a raw status string onto the retry policy. Unrecognized values
    /// classify as failed so they surface instead of spinning forever.
    pub fn classify(raw: &str) -> Self {
        match raw {
            STATE_PENDING => RemoteStatus::Pending,
            STATE_IN_PROGRESS => RemoteStatus::InProgress,
            STATE_SUCCESS => RemoteStatus::Success,
            other => RemoteStatus::Failed(other.to_owned()),
        }
    }

    /// True when the caller should poll again later.
    pub fn in_flight(&self) -> bool {
        matches!(self, RemoteStatus::Pending | RemoteStatus::InProgress)
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStatus::Pending => f.write_str(STATE_PENDING),
            RemoteStatus::InProgress => f.write_str(STATE_IN_PROGRESS),
            RemoteStatus::Success => f.write_str(STATE_SUCCESS),
            RemoteStatus::Failed(raw) => f.write_str(raw),
        }
    }
}

/// Fetch the resource's status fresh from the manager and classify it.
///
/// The handle must be positioned at a state endpoint; the status attribute
/// path (plain or nested) comes from the resource type.
///
/// # Errors
///
/// Propagates transport and API errors untouched, and reports
/// [`Error::UnexpectedResponse`] when the configured status attribute is
/// missing from the body.
pub async fn poll_status(handle: &ResourceHandle) -> Result<RemoteStatus> {
    let body = handle.get().await?;
    let raw = extract_status(&body, handle.resource_type().state_path()).ok_or_else(|| {
        Error::UnexpectedResponse(format!(
            "no status attribute {} in state response for {}",
            handle.resource_type().state_path().join("."),
            handle.describe()
        ))
    })?;
    let status = RemoteStatus::classify(raw);
    debug!(resource = %handle.describe(), %status, "polled remote state");
    Ok(status)
}

fn extract_status<'a>(body: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cursor = body;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_states_classify_onto_retry_policy() {
        assert_eq!(RemoteStatus::classify("pending"), RemoteStatus::Pending);
        assert_eq!(RemoteStatus::classify("in_progress"), RemoteStatus::InProgress);
        assert_eq!(RemoteStatus::classify("success"), RemoteStatus::Success);
        assert!(RemoteStatus::classify("pending").in_flight());
        assert!(RemoteStatus::classify("in_progress").in_flight());
        assert!(!RemoteStatus::classify("success").in_flight());
    }

    #[test]
    fn unrecognized_state_is_failed_with_raw_value() {
        match RemoteStatus::classify("orphaned") {
            RemoteStatus::Failed(raw) => assert_eq!(raw, "orphaned"),
            other => panic!("expected failure classification, got {other:?}"),
        }
    }

    #[test]
    fn extracts_plain_and_nested_status_attributes() {
        let plain = json!({"state": "success"});
        assert_eq!(extract_status(&plain, &["state"]), Some("success"));

        let nested = json!({"tier1_state": {"state": "in_progress"}});
        assert_eq!(
            extract_status(&nested, &["tier1_state", "state"]),
            Some("in_progress")
        );

        let missing = json!({"details": []});
        assert_eq!(extract_status(&missing, &["state"]), None);
    }
}
