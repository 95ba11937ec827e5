//! Client SDK for the VMware NSX-T Policy and Fabric APIs.
//!
//! This crate is the wire-facing half of the lifecycle adapter: it owns the
//! HTTP transport and authentication ([`NsxtClient`]), the per-resource-type
//! verb discipline ([`ResourceHandle`]), and remote status classification
//! ([`poll_status`]). It never decides retry-versus-fatal — that policy
//! lives in the `nsxt-lifecycle` crate.

mod client;
mod config;
mod error;
mod resource;
mod state;

pub use client::NsxtClient;
pub use config::{AuthType, ClientConfig};
pub use error::{Error, Result};
pub use resource::{Capabilities, ListParams, ResourceHandle, ResourceType};
pub use state::{poll_status, RemoteStatus, STATE_IN_PROGRESS, STATE_PENDING, STATE_SUCCESS};
