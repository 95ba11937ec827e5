//! Error taxonomy for NSX-T API calls.
//!
//! The client reports low-level signals only; deciding whether a failure is
//! retryable belongs to the lifecycle layer.

use thiserror::Error;

/// Errors surfaced by the NSX-T client.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete client configuration. The message names the
    /// offending field.
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// Session login against `/api/session/create` was rejected.
    #[error("session authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The verb is outside the resource type's allowed set. This is a
    /// programming error, not a transient condition.
    #[error("not allowed to invoke {verb} for {resource_type}")]
    MethodNotAllowed {
        verb: &'static str,
        resource_type: &'static str,
    },

    /// An instance-level call was made without a resource id.
    #[error("no resource id available to invoke {verb} for {resource_type}")]
    MissingId {
        verb: &'static str,
        resource_type: &'static str,
    },

    /// The manager reported 404 for the target resource. Delete polling
    /// treats this as "already gone", not as a failure.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The manager rejected the request with a non-success status.
    #[error("NSX-T API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP response (connection refused,
    /// TLS failure, timeout, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded as JSON.
    #[error("failed to decode NSX-T response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A resource lookup resolved to zero or more than one candidate.
    /// Ambiguous identity is never retried.
    #[error("{0}")]
    Lookup(String),

    /// The response decoded but did not have the expected shape.
    #[error("unexpected NSX-T response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors raised before any HTTP round trip happened.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::MethodNotAllowed { .. } | Error::MissingId { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_the_pre_dispatch_ones() {
        assert!(Error::Config("client_config.host must not be empty".into()).is_usage_error());
        assert!(Error::MethodNotAllowed {
            verb: "delete",
            resource_type: "SegmentState",
        }
        .is_usage_error());
        assert!(!Error::NotFound {
            resource: "GET /policy/api/v1/infra/segments/seg-1".into(),
        }
        .is_usage_error());
        assert!(!Error::Api {
            status: 409,
            message: "conflict".into(),
        }
        .is_usage_error());
    }
}
