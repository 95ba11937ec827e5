//! Segment lifecycle operations.
//!
//! Besides the plain create/start/stop/delete steps this module owns the
//! two relationship operations attaching DHCP static bindings for a server
//! connected to the segment. Binding ids are deterministic synthetic ids
//! (`<segment-id>-dhcpv4` / `<segment-id>-dhcpv6`) computed locally, never
//! read back from the manager, so every tick can re-derive them.

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use nsxt_client::{
    poll_status, Error as ClientError, ListParams, NsxtClient, RemoteStatus, ResourceHandle,
    ResourceType,
};

use crate::context::{Marker, RelationshipContext, SubjectContext};
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::pipeline::{self, PostProcess};
use crate::reconcile::{self, TASK_DELETE};

const SUBNET_PROPERTY: &str = "subnet";
const SUBNETS_PROPERTY: &str = "subnets";
const IP_V4_CONFIG: &str = "ip_v4_config";
const IP_V6_CONFIG: &str = "ip_v6_config";

/// Parameters for [`add_static_bindings`]: the NIC to bind and the fixed
/// address per requested protocol family.
#[derive(Debug, Clone, Default)]
pub struct StaticBindingRequest {
    /// Unique id of the server's network interface as recorded in the
    /// server instance's discovered `networks`.
    pub network_unique_id: String,
    pub ip_v4_address: Option<String>,
    pub ip_v6_address: Option<String>,
    /// Lease duration in seconds, applied to every requested family.
    /// Omitted from the binding body when unset; the manager then uses
    /// its default.
    pub lease_time: Option<u64>,
}

/// One protocol family of a static binding request.
struct BindingFamily {
    /// Synthetic id suffix (`dhcpv4` / `dhcpv6`).
    proto: &'static str,
    /// Runtime property infix (`v4` / `v6`).
    key: &'static str,
    resource_type: ResourceType,
    address: String,
    lease_time: Option<u64>,
}

impl BindingFamily {
    fn binding_config(&self, binding_id: &str, mac_address: &str) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("id".into(), Value::String(binding_id.into()));
        config.insert("display_name".into(), Value::String(binding_id.into()));
        config.insert("mac_address".into(), Value::String(mac_address.into()));
        if let Some(lease_time) = self.lease_time {
            config.insert("lease_time".into(), Value::from(lease_time));
        }
        match self.resource_type {
            ResourceType::DhcpV6StaticBinding => {
                config.insert(
                    "ip_addresses".into(),
                    Value::Array(vec![Value::String(self.address.clone())]),
                );
            }
            _ => {
                config.insert("ip_address".into(), Value::String(self.address.clone()));
            }
        }
        config
    }
}

/// The families the request actually asks for, v4 before v6.
fn requested_families(request: &StaticBindingRequest) -> Vec<BindingFamily> {
    let mut families = Vec::new();
    if let Some(address) = &request.ip_v4_address {
        families.push(BindingFamily {
            proto: "dhcpv4",
            key: "v4",
            resource_type: ResourceType::DhcpV4StaticBinding,
            address: address.clone(),
            lease_time: request.lease_time,
        });
    }
    if let Some(address) = &request.ip_v6_address {
        families.push(BindingFamily {
            proto: "dhcpv6",
            key: "v6",
            resource_type: ResourceType::DhcpV6StaticBinding,
            address: address.clone(),
            lease_time: request.lease_time,
        });
    }
    families
}

/// Flatten the declarative `subnet` block into the wire-level `subnets`
/// list, v4 configuration before v6. One-shot transform: always safe to
/// repeat, no retry semantics.
pub(crate) fn flatten_subnet_configuration(config: &mut Map<String, Value>) {
    let Some(Value::Object(subnet)) = config.remove(SUBNET_PROPERTY) else {
        return;
    };
    if subnet.is_empty() {
        return;
    }
    let mut subnets = Vec::new();
    for family in [IP_V4_CONFIG, IP_V6_CONFIG] {
        match subnet.get(family) {
            Some(Value::Null) | None => {}
            Some(ip_config) => subnets.push(ip_config.clone()),
        }
    }
    config.insert(SUBNETS_PROPERTY.into(), Value::Array(subnets));
}

fn child_handle(
    client: &NsxtClient,
    resource_type: ResourceType,
    segment_id: &str,
    id: Option<&str>,
) -> ResourceHandle {
    let mut config = Map::new();
    if let Some(id) = id {
        config.insert("id".into(), Value::String(id.into()));
    }
    ResourceHandle::new(client.clone(), resource_type, config).with_parent(segment_id)
}

/// Upsert the segment from its declarative configuration and publish its
/// identity into the runtime properties.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn create(ctx: &mut SubjectContext) -> Outcome {
    match create_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("segment.create", "Segment", &err),
    }
}

async fn create_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let mut handle = ctx.resource_handle(ResourceType::Segment).await?;
    flatten_subnet_configuration(handle.config_mut());
    let created = handle.create().await?;
    if let Some(id) = created.get("id").and_then(Value::as_str) {
        handle.set_resource_id(id.to_owned());
    }
    pipeline::apply(PostProcess::WriteProperties, &handle, &mut ctx.instance).await?;
    Ok(Outcome::Converged)
}

/// Poll the segment's configuration state until it realizes.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn start(ctx: &mut SubjectContext) -> Outcome {
    match start_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("segment.start", "Segment", &err),
    }
}

async fn start_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let handle = ctx.resource_handle(ResourceType::SegmentState).await?;
    reconcile::ensure_started("Segment", &handle).await
}

/// Drain the segment before deletion: detach remaining ports (one per
/// tick), then wait for any leftover DHCP static bindings to be removed.
/// Converges only when both lists come back empty, without issuing any
/// further mutating call.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn stop(ctx: &mut SubjectContext) -> Outcome {
    match stop_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("segment.stop", "Segment", &err),
    }
}

async fn stop_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let segment = ctx.resource_handle(ResourceType::Segment).await?;
    let segment_id = segment
        .resource_id()
        .ok_or_else(|| Error::Config("runtime property `id` is required to stop a segment".into()))?
        .to_owned();
    let client = segment.client().clone();

    let ports = child_handle(&client, ResourceType::SegmentPort, &segment_id, None)
        .list(&ListParams::default())
        .await?;
    if let Some(port) = ports.first() {
        let port_id = port.get("id").and_then(Value::as_str).ok_or_else(|| {
            Error::Client(ClientError::UnexpectedResponse(
                "segment port record without an id".into(),
            ))
        })?;
        let port_handle = child_handle(&client, ResourceType::SegmentPort, &segment_id, Some(port_id));
        reconcile::attempt_delete(&port_handle).await?;
        info!(
            segment = %segment_id,
            port = port_id,
            attached = ports.len(),
            "segment still has attached ports"
        );
        return Ok(Outcome::retry(format!(
            "segment {segment_id} still has {} attached ports",
            ports.len()
        )));
    }

    for resource_type in [
        ResourceType::DhcpV4StaticBinding,
        ResourceType::DhcpV6StaticBinding,
    ] {
        let bindings = child_handle(&client, resource_type, &segment_id, None)
            .list(&ListParams::default())
            .await?;
        if !bindings.is_empty() {
            info!(
                segment = %segment_id,
                kind = resource_type.as_str(),
                remaining = bindings.len(),
                "segment still has dhcp static bindings"
            );
            return Ok(Outcome::retry(format!(
                "segment {segment_id} still has {} {} records",
                bindings.len(),
                resource_type.as_str()
            )));
        }
    }

    Ok(Outcome::Converged)
}

/// Delete the segment, polling until the manager stops reporting it.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn delete(ctx: &mut SubjectContext) -> Outcome {
    match delete_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("segment.delete", "Segment", &err),
    }
}

async fn delete_inner(ctx: &mut SubjectContext) -> Result<Outcome> {
    let handle = ctx.resource_handle(ResourceType::Segment).await?;
    let outcome = reconcile::ensure_deleted(&handle, Marker::Flag(TASK_DELETE), &mut ctx.instance).await?;
    if outcome.is_converged() {
        pipeline::apply(PostProcess::ClearProperties, &handle, &mut ctx.instance).await?;
    }
    Ok(outcome)
}

/// Create the requested DHCP static bindings for a server NIC attached to
/// this segment.
///
/// Compound operation: each requested family reconciles independently
/// behind its own `tasks` marker, and the operation converges only when
/// every requested family's binding reports success.
#[instrument(skip(ctx, request), fields(node_id = %ctx.node_id, nic = %request.network_unique_id))]
pub async fn add_static_bindings(ctx: &mut RelationshipContext, request: &StaticBindingRequest) -> Outcome {
    match add_static_bindings_inner(ctx, request).await {
        Ok(outcome) => outcome,
        Err(err) => pipeline::fatal_outcome("segment.add_static_bindings", "DhcpStaticBinding", &err),
    }
}

async fn add_static_bindings_inner(
    ctx: &mut RelationshipContext,
    request: &StaticBindingRequest,
) -> Result<Outcome> {
    let families = requested_families(request);
    if families.is_empty() {
        return Err(Error::Config(
            "at least one of `ip_v4_address` or `ip_v6_address` is required \
             to add dhcp static bindings"
                .into(),
        ));
    }

    let (segment_ctx, server_ctx) = ctx.split_subject()?;
    let mac_address = mac_for_network(server_ctx, &request.network_unique_id)?;

    let segment = segment_ctx.resource_handle(ResourceType::Segment).await?;
    let segment_id = segment
        .resource_id()
        .ok_or_else(|| {
            Error::Config("runtime property `id` is required to add static bindings".into())
        })?
        .to_owned();
    let client = segment.client().clone();

    let mut waiting = Vec::new();
    for family in &families {
        let binding_id = format!("{segment_id}-{}", family.proto);
        let marker = Marker::Task(&binding_id);

        if !marker.is_set(&segment_ctx.instance) {
            let binding = ResourceHandle::new(
                client.clone(),
                family.resource_type,
                family.binding_config(&binding_id, &mac_address),
            )
            .with_parent(&segment_id);
            match binding.create().await {
                Ok(record) => {
                    segment_ctx
                        .instance
                        .set(format!("dhcp_{}_static_binding_id", family.key), binding_id.clone());
                    segment_ctx
                        .instance
                        .set(format!("dhcp_{}_static_binding", family.key), record);
                    marker.set(&mut segment_ctx.instance);
                    info!(binding = %binding_id, "dhcp static binding requested");
                }
                Err(err @ (ClientError::Api { .. } | ClientError::Transport(_))) => {
                    // The upsert is idempotent; leave the marker unset so
                    // the next tick re-issues it.
                    warn!(binding = %binding_id, %err, "dhcp static binding upsert not accepted yet");
                    waiting.push(format!("{binding_id} upsert was not accepted yet"));
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let state = child_handle(
            &client,
            ResourceType::DhcpStaticBindingState,
            &segment_id,
            Some(&binding_id),
        );
        match poll_status(&state).await {
            Ok(RemoteStatus::Success) => {
                info!(binding = %binding_id, "dhcp static binding realized");
            }
            Ok(status @ (RemoteStatus::Pending | RemoteStatus::InProgress)) => {
                waiting.push(format!("{binding_id} state is still {status}"));
            }
            Ok(RemoteStatus::Failed(raw)) => {
                return Ok(Outcome::fatal(format!(
                    "dhcp static binding {binding_id} failed to realize: {raw}"
                )));
            }
            Err(ClientError::NotFound { .. }) => {
                waiting.push(format!("{binding_id} state is not reported yet"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    if waiting.is_empty() {
        Ok(Outcome::Converged)
    } else {
        Ok(Outcome::RetryLater(waiting.join("; ")))
    }
}

/// Remove the recorded static bindings for this relationship, driving each
/// through the delete state machine, and discard the binding properties
/// once every recorded binding is gone.
#[instrument(skip(ctx), fields(node_id = %ctx.node_id))]
pub async fn remove_static_bindings(ctx: &mut RelationshipContext) -> Outcome {
    match remove_static_bindings_inner(ctx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            pipeline::fatal_outcome("segment.remove_static_bindings", "DhcpStaticBinding", &err)
        }
    }
}

async fn remove_static_bindings_inner(ctx: &mut RelationshipContext) -> Result<Outcome> {
    let (segment_ctx, _) = ctx.split_subject()?;
    let segment = segment_ctx.resource_handle(ResourceType::Segment).await?;
    let segment_id = segment
        .resource_id()
        .ok_or_else(|| {
            Error::Config("runtime property `id` is required to remove static bindings".into())
        })?
        .to_owned();
    let client = segment.client().clone();

    let mut waiting = Vec::new();
    for (key, resource_type) in [
        ("v4", ResourceType::DhcpV4StaticBinding),
        ("v6", ResourceType::DhcpV6StaticBinding),
    ] {
        let id_property = format!("dhcp_{key}_static_binding_id");
        let Some(binding_id) = segment_ctx.instance.get_str(&id_property).map(str::to_owned)
        else {
            continue;
        };
        let binding = child_handle(&client, resource_type, &segment_id, Some(&binding_id));
        let delete_marker = format!("{binding_id}-delete");
        match reconcile::ensure_deleted(
            &binding,
            Marker::Task(&delete_marker),
            &mut segment_ctx.instance,
        )
        .await?
        {
            Outcome::Converged => {
                segment_ctx.instance.remove(&id_property);
                segment_ctx
                    .instance
                    .remove(&format!("dhcp_{key}_static_binding"));
                segment_ctx.instance.remove_task_flag(&binding_id);
                segment_ctx.instance.remove_task_flag(&delete_marker);
                info!(binding = %binding_id, "dhcp static binding removed");
            }
            Outcome::RetryLater(reason) => waiting.push(reason),
            fatal @ Outcome::Fatal { .. } => return Ok(fatal),
        }
    }

    if waiting.is_empty() {
        Ok(Outcome::Converged)
    } else {
        Ok(Outcome::RetryLater(waiting.join("; ")))
    }
}

/// Resolve the MAC address of the server NIC the binding targets from the
/// server instance's discovered networks.
fn mac_for_network(server_ctx: &SubjectContext, network_unique_id: &str) -> Result<String> {
    let networks = server_ctx
        .instance
        .get("networks")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            Error::Config(
                "runtime property `networks` is not populated on the server instance".into(),
            )
        })?;
    networks
        .iter()
        .find(|network| {
            network.get("name").and_then(Value::as_str) == Some(network_unique_id)
        })
        .and_then(|network| network.get("mac").and_then(Value::as_str))
        .map(str::to_owned)
        .ok_or_else(|| {
            Error::Config(format!(
                "network_unique_id {network_unique_id} does not match any \
                 network attached to the server instance"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstanceProperties;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn subnet_block_flattens_v4_before_v6() {
        let mut config = map(json!({
            "display_name": "app-net",
            "subnet": {
                "ip_v6_config": {"gateway_address": "fc7e:f206:db42::2/48"},
                "ip_v4_config": {"gateway_address": "192.168.11.12/24"},
            },
        }));
        flatten_subnet_configuration(&mut config);

        assert!(config.get(SUBNET_PROPERTY).is_none());
        let subnets = config.get(SUBNETS_PROPERTY).and_then(Value::as_array).unwrap();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0]["gateway_address"], "192.168.11.12/24");
        assert_eq!(subnets[1]["gateway_address"], "fc7e:f206:db42::2/48");
    }

    #[test]
    fn single_family_subnet_produces_one_entry() {
        let mut config = map(json!({
            "subnet": {"ip_v6_config": {"gateway_address": "fc7e:f206:db42::2/48"}},
        }));
        flatten_subnet_configuration(&mut config);
        let subnets = config.get(SUBNETS_PROPERTY).and_then(Value::as_array).unwrap();
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0]["gateway_address"], "fc7e:f206:db42::2/48");
    }

    #[test]
    fn absent_subnet_block_leaves_config_untouched() {
        let mut config = map(json!({"display_name": "app-net"}));
        flatten_subnet_configuration(&mut config);
        assert!(config.get(SUBNETS_PROPERTY).is_none());
    }

    #[test]
    fn families_follow_the_request_v4_first() {
        let request = StaticBindingRequest {
            network_unique_id: "nic-1".into(),
            ip_v4_address: Some("192.168.10.2".into()),
            ip_v6_address: Some("fc7e:f206:db42::9".into()),
            lease_time: None,
        };
        let families = requested_families(&request);
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].proto, "dhcpv4");
        assert_eq!(families[1].proto, "dhcpv6");

        let v4_only = StaticBindingRequest {
            ip_v6_address: None,
            ..request
        };
        assert_eq!(requested_families(&v4_only).len(), 1);
    }

    #[test]
    fn v6_binding_config_uses_the_plural_address_field() {
        let family = BindingFamily {
            proto: "dhcpv6",
            key: "v6",
            resource_type: ResourceType::DhcpV6StaticBinding,
            address: "fc7e:f206:db42::9".into(),
            lease_time: Some(86400),
        };
        let config = family.binding_config("seg-1-dhcpv6", "aa:bb:cc:dd:ee:ff");
        assert_eq!(config["ip_addresses"], json!(["fc7e:f206:db42::9"]));
        assert_eq!(config["lease_time"], json!(86400));
        assert!(config.get("ip_address").is_none());
    }

    #[test]
    fn mac_resolution_matches_by_nic_name() {
        let mut server = SubjectContext::new("server", Map::new());
        server.instance = InstanceProperties::from_map(map(json!({
            "networks": [
                {"name": "nic-1", "mac": "aa:aa:aa:aa:aa:01"},
                {"name": "nic-2", "mac": "aa:aa:aa:aa:aa:02"},
            ],
        })));

        assert_eq!(
            mac_for_network(&server, "nic-2").unwrap(),
            "aa:aa:aa:aa:aa:02"
        );
        let err = mac_for_network(&server, "nic-9").unwrap_err();
        assert!(err.to_string().contains("nic-9"));
    }
}
