//! Virtual-machine inventory operations.
//!
//! Virtual machines are not managed by the adapter; they are discovered
//! from the fabric inventory. The create step resolves the configured
//! machine to its `external_id`, and the configure step waits for the
//! machine's interfaces to report their segment attachments, publishing a
//! per-NIC summary the static-binding operations consume.

use std::net::IpAddr;

use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use nsxt_client::{ListParams, ResourceHandle, ResourceType};

use crate::context::SubjectContext;
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::pipeline;

/// Declarative property naming the NIC whose attachment the configure
/// step must confirm.
const NETWORK_NAME_PROPERTY: &str = "network_name";

const NETWORKS_PROPERTY: &str = "networks";

/// Resolve the configured machine in the fabric inventory and publish its
/// identity. Zero matches and more-than-one match are both fatal; an
/// ambiguous identity never converges by retrying.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn create(ctx: &mut SubjectContext) -> Outcome {
    match create_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("virtual_machine.create", "VirtualMachine", &err),
    }
}

async fn create_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    required_network_name(ctx)?;
    let mut handle = ctx.resource_handle(ResourceType::VirtualMachine).await?;
    let record = handle.lookup_virtual_machine().await?;
    pipeline::write_resource_properties(&record, &handle, &mut ctx.instance);
    Ok(Outcome::Converged)
}

/// Discover the machine's interfaces and confirm the configured NIC is
/// attached.
///
/// The fabric reports interfaces asynchronously after the machine powers
/// on, so an empty interface list or an interface without a confirmed
/// attachment is a retry, not a failure. A machine whose interfaces are
/// all confirmed but none match `network_name` is misconfigured and fails
/// fatally.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn configure(ctx: &mut SubjectContext) -> Outcome {
    match configure_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("virtual_machine.configure", "VirtualMachine", &err),
    }
}

async fn configure_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let network_name = required_network_name(ctx)?;
    let handle = ctx.resource_handle(ResourceType::VirtualMachine).await?;
    let owner_id = handle
        .resource_id()
        .ok_or_else(|| {
            Error::Config(
                "runtime property `id` is not populated; the virtual machine \
                 must be looked up before it can be configured"
                    .into(),
            )
        })?
        .to_owned();

    let vifs = ResourceHandle::new(
        handle.client().clone(),
        ResourceType::VirtualNetworkInterface,
        Map::new(),
    )
    .list(&ListParams::default().filter("owner_vm_id", owner_id.clone()))
    .await?;
    if vifs.is_empty() {
        return Ok(Outcome::retry(format!(
            "virtual machine {owner_id} reports no network interfaces yet"
        )));
    }

    let mut networks = Vec::new();
    let mut selected = None;
    let mut unconfirmed = false;
    for vif in &vifs {
        let entry = network_entry(vif);
        let confirmed = entry.get("attachment_id").is_some_and(|id| !id.is_null());
        if !confirmed {
            unconfirmed = true;
        }
        // A name match only counts once the fabric has confirmed the
        // attachment; before that the interface may still be wiring up.
        if confirmed && entry.get("name").and_then(Value::as_str) == Some(network_name.as_str()) {
            selected = Some(entry.clone());
        }
        networks.push(entry);
    }
    ctx.instance.set(NETWORKS_PROPERTY, Value::Array(networks));

    match selected {
        Some(entry) => {
            info!(vm = %owner_id, network = %network_name, "network attachment confirmed");
            ctx.instance.set(network_name, entry);
            Ok(Outcome::Converged)
        }
        None if unconfirmed => Ok(Outcome::retry(format!(
            "virtual machine {owner_id} has interfaces whose attachment is \
             not confirmed yet"
        ))),
        None => Err(Error::Config(format!(
            "network {network_name} is not attached to virtual machine {owner_id}"
        ))),
    }
}

/// Forget the discovered machine. The inventory itself is read-only, so
/// this only discards the instance's runtime properties.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn delete(ctx: &mut SubjectContext) -> Outcome {
    ctx.instance.clear_all();
    Outcome::Converged
}

fn required_network_name(ctx: &SubjectContext) -> Result<String> {
    ctx.resource_config()
        .get(NETWORK_NAME_PROPERTY)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| {
            Error::Config(format!(
                "virtual machine property `{NETWORK_NAME_PROPERTY}` is required"
            ))
        })
}

/// Summarize one fabric interface record: identity plus its addresses
/// split by protocol family.
fn network_entry(vif: &Value) -> Value {
    let (ipv4, ipv6) = classify_addresses(vif);
    json!({
        "name": vif.get("display_name").cloned().unwrap_or(Value::Null),
        "mac": vif.get("mac_address").cloned().unwrap_or(Value::Null),
        "attachment_id": vif.get("lport_attachment_id").cloned().unwrap_or(Value::Null),
        "ipv4_addresses": ipv4,
        "ipv6_addresses": ipv6,
    })
}

/// Split every reported address into v4 and v6 lists. Classification goes
/// by parsing the address itself; unparsable strings are dropped rather
/// than misfiled.
fn classify_addresses(vif: &Value) -> (Vec<String>, Vec<String>) {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    let infos = vif
        .get("ip_address_info")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for info in infos {
        let addresses = info
            .get("ip_addresses")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for address in addresses {
            let Some(raw) = address.as_str() else { continue };
            match raw.parse::<IpAddr>() {
                Ok(IpAddr::V4(_)) => ipv4.push(raw.to_owned()),
                Ok(IpAddr::V6(_)) => ipv6.push(raw.to_owned()),
                Err(_) => {}
            }
        }
    }
    (ipv4, ipv6)
}
