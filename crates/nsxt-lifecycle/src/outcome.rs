//! The three-way result contract returned to the orchestrator.
//!
//! Exactly one [`Outcome`] is produced per reconciliation tick. The
//! orchestrator owns the retry schedule (backoff, attempt budget); this
//! crate only classifies.

/// Result of one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation is complete; this step will not be re-invoked.
    Converged,
    /// Not complete, but no error occurred. The orchestrator re-invokes
    /// the same step later.
    RetryLater(String),
    /// The operation cannot succeed without external intervention. The
    /// orchestrator must not retry and must surface the message.
    Fatal { message: String },
}

impl Outcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::RetryLater(reason.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Outcome::Fatal {
            message: message.into(),
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Outcome::RetryLater(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal { .. })
    }
}
