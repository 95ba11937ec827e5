//! Error type for lifecycle operations.
//!
//! Errors escaping a reconciliation function are converted into
//! [`crate::Outcome::Fatal`] at the pipeline boundary; nothing propagates
//! as a bare crash to the orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory declarative input. The message names the
    /// offending field.
    #[error("configuration error: {0}")]
    Config(String),

    /// A low-level client failure that no reconciliation branch claimed
    /// as retryable.
    #[error(transparent)]
    Client(#[from] nsxt_client::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
