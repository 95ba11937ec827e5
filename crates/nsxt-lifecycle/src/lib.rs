//! Lifecycle reconciliation for NSX-T resources under an external
//! orchestrator.
//!
//! The orchestrator invokes one operation per node instance per tick.
//! Every operation rebuilds its view of the world from the instance's
//! persisted runtime properties plus fresh manager state, performs at most
//! one mutating call, and answers with an [`Outcome`]:
//! [`Outcome::Converged`], [`Outcome::RetryLater`], or [`Outcome::Fatal`].
//! Progress markers recorded in the property bag make every transition
//! safe to re-run after a crash at any point.

pub mod context;
pub mod dhcp_server;
mod error;
mod outcome;
mod pipeline;
mod reconcile;
pub mod segment;
pub mod tier1;
pub mod virtual_machine;

pub use context::{InstanceProperties, Marker, RelationshipContext, SubjectContext};
pub use error::{Error, Result};
pub use outcome::Outcome;
pub use pipeline::{
    PostProcess, ID_PROPERTY, NAME_PROPERTY, PATH_PROPERTY, RESOURCE_CONFIG_PROPERTY,
    TYPE_PROPERTY, UNIQUE_ID_PROPERTY,
};
pub use reconcile::TASK_DELETE;
pub use segment::StaticBindingRequest;
