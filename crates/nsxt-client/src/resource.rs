//! Resource types, capability descriptors, and the resource handle.
//!
//! A [`ResourceHandle`] represents one remote resource on the manager and
//! exposes the uniform verb set (`create`/`update`/`patch`/`delete`/`get`/
//! `list`). Every public method issues exactly one network call; whether a
//! verb is permitted at all is decided by the per-type [`Capabilities`]
//! descriptor before any dispatch.

use reqwest::Method;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::NsxtClient;
use crate::error::{Error, Result};

const POLICY_API: &str = "/policy/api/v1";
const FABRIC_API: &str = "/api/v1/fabric";

/// Verbs a handle can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Create,
    Update,
    Patch,
    Delete,
    Get,
    List,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::Get => "get",
            Verb::List => "list",
        }
    }
}

/// Which verbs a resource type supports on the manager.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub create: bool,
    pub update: bool,
    pub patch: bool,
    pub delete: bool,
    pub get: bool,
    pub list: bool,
}

impl Capabilities {
    const FULL: Capabilities = Capabilities {
        create: true,
        update: true,
        patch: true,
        delete: true,
        get: true,
        list: true,
    };

    /// State endpoints are a read-only singleton per resource.
    const STATE: Capabilities = Capabilities {
        create: false,
        update: false,
        patch: false,
        delete: false,
        get: true,
        list: false,
    };

    fn allows(&self, verb: Verb) -> bool {
        match verb {
            Verb::Create => self.create,
            Verb::Update => self.update,
            Verb::Patch => self.patch,
            Verb::Delete => self.delete,
            Verb::Get => self.get,
            Verb::List => self.list,
        }
    }
}

/// The NSX-T resource kinds the adapter manages or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Segment,
    SegmentPort,
    SegmentState,
    Tier1,
    Tier1State,
    DhcpServerConfig,
    DhcpV4StaticBinding,
    DhcpV6StaticBinding,
    DhcpStaticBindingState,
    VirtualMachine,
    VirtualNetworkInterface,
}

impl ResourceType {
    /// Wire-level `resource_type` discriminator.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Segment => "Segment",
            ResourceType::SegmentPort => "Port",
            ResourceType::SegmentState => "SegmentState",
            ResourceType::Tier1 => "Tier1",
            ResourceType::Tier1State => "Tier1State",
            ResourceType::DhcpServerConfig => "DhcpServerConfig",
            ResourceType::DhcpV4StaticBinding => "DhcpV4StaticBindingConfig",
            ResourceType::DhcpV6StaticBinding => "DhcpV6StaticBindingConfig",
            ResourceType::DhcpStaticBindingState => "DhcpStaticBindingState",
            ResourceType::VirtualMachine => "VirtualMachine",
            ResourceType::VirtualNetworkInterface => "VirtualNetworkInterface",
        }
    }

    /// Verbs the manager supports for this kind. Virtual-machine inventory
    /// is read-only; ports can only be inspected and detached; state
    /// endpoints only answer `get`.
    pub fn capabilities(self) -> Capabilities {
        match self {
            ResourceType::Segment
            | ResourceType::Tier1
            | ResourceType::DhcpServerConfig
            | ResourceType::DhcpV4StaticBinding
            | ResourceType::DhcpV6StaticBinding => Capabilities::FULL,
            ResourceType::SegmentPort => Capabilities {
                create: false,
                update: false,
                patch: false,
                delete: true,
                get: true,
                list: true,
            },
            ResourceType::SegmentState
            | ResourceType::Tier1State
            | ResourceType::DhcpStaticBindingState => Capabilities::STATE,
            ResourceType::VirtualMachine => Capabilities {
                create: false,
                update: false,
                patch: false,
                delete: false,
                get: true,
                list: true,
            },
            ResourceType::VirtualNetworkInterface => Capabilities {
                create: false,
                update: false,
                patch: false,
                delete: false,
                get: false,
                list: true,
            },
        }
    }

    /// Attribute path holding the reported status for state endpoints.
    /// This is configuration, not a behavioral branch: tier-1 nests its
    /// status one level deeper than the others.
    pub fn state_path(self) -> &'static [&'static str] {
        match self {
            ResourceType::Tier1State => &["tier1_state", "state"],
            _ => &["state"],
        }
    }

    /// True when instance paths for this kind are scoped under a parent
    /// segment.
    fn needs_parent(self) -> bool {
        matches!(
            self,
            ResourceType::SegmentPort
                | ResourceType::DhcpV4StaticBinding
                | ResourceType::DhcpV6StaticBinding
                | ResourceType::DhcpStaticBindingState
        )
    }

    fn collection_path(self, parent: Option<&str>) -> Result<String> {
        let parent = match (self.needs_parent(), parent) {
            (true, Some(parent)) => Some(parent),
            (true, None) => {
                return Err(Error::Config(format!(
                    "a parent segment id is required for {} calls",
                    self.as_str()
                )))
            }
            (false, _) => None,
        };
        Ok(match self {
            ResourceType::Segment => format!("{POLICY_API}/infra/segments"),
            ResourceType::SegmentPort => {
                format!("{POLICY_API}/infra/segments/{}/ports", parent.unwrap_or_default())
            }
            ResourceType::SegmentState => format!("{POLICY_API}/infra/segments"),
            ResourceType::Tier1 | ResourceType::Tier1State => {
                format!("{POLICY_API}/infra/tier-1s")
            }
            ResourceType::DhcpServerConfig => {
                format!("{POLICY_API}/infra/dhcp-server-configs")
            }
            ResourceType::DhcpV4StaticBinding
            | ResourceType::DhcpV6StaticBinding
            | ResourceType::DhcpStaticBindingState => format!(
                "{POLICY_API}/infra/segments/{}/dhcp-static-binding-configs",
                parent.unwrap_or_default()
            ),
            ResourceType::VirtualMachine => format!("{FABRIC_API}/virtual-machines"),
            ResourceType::VirtualNetworkInterface => format!("{FABRIC_API}/vifs"),
        })
    }

    fn instance_path(self, id: &str, parent: Option<&str>) -> Result<String> {
        let collection = self.collection_path(parent)?;
        Ok(match self {
            // State endpoints hang a `/state` suffix off the owning
            // resource's instance path.
            ResourceType::SegmentState | ResourceType::Tier1State => {
                format!("{collection}/{id}/state")
            }
            ResourceType::DhcpStaticBindingState => format!("{collection}/{id}/state"),
            _ => format!("{collection}/{id}"),
        })
    }
}

/// Paging and filtering parameters for `list` calls.
#[derive(Debug, Default, Clone)]
pub struct ListParams {
    pub cursor: Option<String>,
    pub page_size: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_ascending: Option<bool>,
    pub included_fields: Option<String>,
    pub filters: Vec<(String, String)>,
}

impl ListParams {
    /// Add an equality filter forwarded as a query parameter.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(cursor) = &self.cursor {
            query.push(("cursor".into(), cursor.clone()));
        }
        if let Some(page_size) = self.page_size {
            query.push(("page_size".into(), page_size.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            query.push(("sort_by".into(), sort_by.clone()));
        }
        if let Some(sort_ascending) = self.sort_ascending {
            query.push(("sort_ascending".into(), sort_ascending.to_string()));
        }
        if let Some(included_fields) = &self.included_fields {
            query.push(("included_fields".into(), included_fields.clone()));
        }
        query.extend(self.filters.iter().cloned());
        query
    }
}

/// One remote resource: identity, declarative configuration, and the verb
/// dispatch discipline.
///
/// Built fresh on every orchestrator tick from declarative properties
/// merged with the runtime-persisted id. The `id` key is pulled out of the
/// configuration map into [`ResourceHandle::resource_id`] at construction;
/// the wire `resource_type` discriminator is injected in its place.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    client: NsxtClient,
    resource_type: ResourceType,
    resource_id: Option<String>,
    parent_id: Option<String>,
    config: Map<String, Value>,
}

impl ResourceHandle {
    pub fn new(client: NsxtClient, resource_type: ResourceType, mut config: Map<String, Value>) -> Self {
        let resource_id = config
            .remove("id")
            .and_then(|id| id.as_str().map(str::to_owned));
        config.insert(
            "resource_type".into(),
            Value::String(resource_type.as_str().into()),
        );
        Self {
            client,
            resource_type,
            resource_id,
            parent_id: None,
            config,
        }
    }

    /// Scope this handle under a parent segment (ports, static bindings).
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// The underlying client, for building sibling handles against the
    /// same manager.
    pub fn client(&self) -> &NsxtClient {
        &self.client
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Inject the resolved id once known (create responses, VM lookup).
    pub fn set_resource_id(&mut self, id: impl Into<String>) {
        self.resource_id = Some(id.into());
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.config
    }

    /// Human-readable identity for log and error messages.
    pub fn describe(&self) -> String {
        format!(
            "{} {}",
            self.resource_type.as_str(),
            self.resource_id.as_deref().unwrap_or("<unassigned>")
        )
    }

    fn ensure_allowed(&self, verb: Verb) -> Result<()> {
        if !self.resource_type.capabilities().allows(verb) {
            return Err(Error::MethodNotAllowed {
                verb: verb.as_str(),
                resource_type: self.resource_type.as_str(),
            });
        }
        Ok(())
    }

    fn require_id(&self, verb: Verb) -> Result<&str> {
        self.resource_id.as_deref().ok_or(Error::MissingId {
            verb: verb.as_str(),
            resource_type: self.resource_type.as_str(),
        })
    }

    /// Creation is an idempotent upsert-by-id of the full declarative
    /// configuration. The wire call is the same `PUT` as an update, but
    /// the allow-check is for `create` so read-only types report the verb
    /// the caller actually asked for.
    pub async fn create(&self) -> Result<Value> {
        self.ensure_allowed(Verb::Create)?;
        let config = self.config.clone();
        self.update(&config).await
    }

    /// `PUT` the full configuration, returning the revised object.
    pub async fn update(&self, new_config: &Map<String, Value>) -> Result<Value> {
        self.ensure_allowed(Verb::Update)?;
        let path = self
            .resource_type
            .instance_path(self.require_id(Verb::Update)?, self.parent_id.as_deref())?;
        let body = self
            .client
            .request(Method::PUT, &path, &[], Some(&Value::Object(new_config.clone())))
            .await?;
        body.ok_or_else(|| {
            Error::UnexpectedResponse(format!("empty body updating {}", self.describe()))
        })
    }

    /// `PATCH` a partial configuration. The manager answers with an empty
    /// body on success.
    pub async fn patch(&self, new_config: &Map<String, Value>) -> Result<()> {
        self.ensure_allowed(Verb::Patch)?;
        let path = self
            .resource_type
            .instance_path(self.require_id(Verb::Patch)?, self.parent_id.as_deref())?;
        self.client
            .request(Method::PATCH, &path, &[], Some(&Value::Object(new_config.clone())))
            .await?;
        Ok(())
    }

    /// `DELETE` the resource, with optional extra query parameters.
    pub async fn delete(&self, extra_params: &[(String, String)]) -> Result<()> {
        self.ensure_allowed(Verb::Delete)?;
        let path = self
            .resource_type
            .instance_path(self.require_id(Verb::Delete)?, self.parent_id.as_deref())?;
        self.client
            .request(Method::DELETE, &path, extra_params, None)
            .await?;
        Ok(())
    }

    /// `GET` the resource. 404 surfaces as [`Error::NotFound`], which the
    /// delete reconciliation treats as convergence.
    pub async fn get(&self) -> Result<Value> {
        self.ensure_allowed(Verb::Get)?;
        let path = self
            .resource_type
            .instance_path(self.require_id(Verb::Get)?, self.parent_id.as_deref())?;
        let body = self.client.request(Method::GET, &path, &[], None).await?;
        body.ok_or_else(|| {
            Error::UnexpectedResponse(format!("empty body fetching {}", self.describe()))
        })
    }

    /// List the collection, flattening the `{results: [...]}` envelope.
    ///
    /// Zero matches produce an empty vector, never an error; callers must
    /// not treat empty as failure.
    pub async fn list(&self, params: &ListParams) -> Result<Vec<Value>> {
        self.ensure_allowed(Verb::List)?;
        let path = self.resource_type.collection_path(self.parent_id.as_deref())?;
        let body = self
            .client
            .request(Method::GET, &path, &params.to_query(), None)
            .await?;
        let results = body
            .and_then(|mut envelope| {
                envelope
                    .as_object_mut()
                    .and_then(|envelope| envelope.remove("results"))
            })
            .and_then(|results| match results {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default();
        debug!(
            resource_type = self.resource_type.as_str(),
            count = results.len(),
            "listed resources"
        );
        Ok(results)
    }

    /// Resolve a virtual machine from the fabric inventory by `vm_name`
    /// or `vm_id`.
    ///
    /// Ambiguous identity is always fatal, never retried: zero matches and
    /// more-than-one match both produce [`Error::Lookup`]. On success the
    /// handle is positioned at the VM's `external_id` and the inventory
    /// record is returned.
    pub async fn lookup_virtual_machine(&mut self) -> Result<Value> {
        if self.resource_type != ResourceType::VirtualMachine {
            return Err(Error::MethodNotAllowed {
                verb: "lookup",
                resource_type: self.resource_type.as_str(),
            });
        }
        let display_name = self
            .config
            .get("vm_name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let external_id = self
            .config
            .get("vm_id")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if display_name.is_none() && external_id.is_none() {
            return Err(Error::Lookup(
                "at least one virtual machine field `vm_name` or `vm_id` \
                 must be provided to look up the vm resource"
                    .into(),
            ));
        }
        let label = display_name
            .clone()
            .or_else(|| external_id.clone())
            .unwrap_or_default();

        let mut params = ListParams::default();
        if let Some(display_name) = display_name {
            params = params.filter("display_name", display_name);
        }
        if let Some(external_id) = external_id {
            params = params.filter("external_id", external_id);
        }

        let mut results = self.list(&params).await?;
        match results.len() {
            0 => Err(Error::Lookup(format!("no virtual machine {label} found"))),
            1 => {
                let record = results.remove(0);
                if let Some(id) = record.get("external_id").and_then(Value::as_str) {
                    self.resource_id = Some(id.to_owned());
                }
                Ok(record)
            }
            n => Err(Error::Lookup(format!(
                "more than one virtual machine {label} found ({n} matches)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use serde_json::json;

    fn test_client() -> NsxtClient {
        let config = ClientConfig::from_value(&json!({
            "host": "localhost",
            "username": "admin",
            "password": "secret",
        }))
        .unwrap();
        // Basic auth performs no network traffic at connect time.
        futures_block_on(NsxtClient::connect_to("http://127.0.0.1:1", &config))
            .expect("basic-auth connect performs no I/O")
    }

    // Minimal executor so unit tests stay synchronous; the connect future
    // for basic auth never yields.
    fn futures_block_on<F: std::future::Future>(future: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(future)
    }

    fn handle(resource_type: ResourceType, config: serde_json::Value) -> ResourceHandle {
        ResourceHandle::new(
            test_client(),
            resource_type,
            config.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn construction_pops_id_and_injects_resource_type() {
        let handle = handle(
            ResourceType::Segment,
            json!({"id": "seg-1", "display_name": "seg"}),
        );
        assert_eq!(handle.resource_id(), Some("seg-1"));
        assert!(handle.config().get("id").is_none());
        assert_eq!(
            handle.config().get("resource_type").and_then(Value::as_str),
            Some("Segment")
        );
    }

    #[test]
    fn create_on_read_only_type_is_method_not_allowed() {
        let handle = handle(ResourceType::VirtualMachine, json!({"id": "vm-1"}));
        let err = futures_block_on(handle.create()).unwrap_err();
        assert!(matches!(err, Error::MethodNotAllowed { verb: "create", .. }));
    }

    #[test]
    fn update_on_read_only_type_is_method_not_allowed() {
        let handle = handle(ResourceType::VirtualMachine, json!({"id": "vm-1"}));
        let err = futures_block_on(handle.update(&Map::new())).unwrap_err();
        assert!(matches!(err, Error::MethodNotAllowed { verb: "update", .. }));
    }

    #[test]
    fn get_on_list_only_type_is_method_not_allowed() {
        let handle = handle(ResourceType::VirtualNetworkInterface, json!({"id": "vif-1"}));
        let err = futures_block_on(handle.get()).unwrap_err();
        assert!(matches!(err, Error::MethodNotAllowed { verb: "get", .. }));
    }

    #[test]
    fn state_endpoints_reject_delete() {
        let handle = handle(ResourceType::SegmentState, json!({"id": "seg-1"}));
        let err = futures_block_on(handle.delete(&[])).unwrap_err();
        assert!(matches!(err, Error::MethodNotAllowed { verb: "delete", .. }));
    }

    #[test]
    fn instance_call_without_id_is_missing_id() {
        let handle = handle(ResourceType::Segment, json!({"display_name": "seg"}));
        let err = futures_block_on(handle.get()).unwrap_err();
        assert!(matches!(err, Error::MissingId { verb: "get", .. }));
    }

    #[test]
    fn child_resources_require_a_parent() {
        let handle = handle(ResourceType::SegmentPort, json!({"id": "port-1"}));
        let err = futures_block_on(handle.delete(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn paths_follow_policy_and_fabric_conventions() {
        assert_eq!(
            ResourceType::Segment.instance_path("seg-1", None).unwrap(),
            "/policy/api/v1/infra/segments/seg-1"
        );
        assert_eq!(
            ResourceType::Tier1State.instance_path("t1", None).unwrap(),
            "/policy/api/v1/infra/tier-1s/t1/state"
        );
        assert_eq!(
            ResourceType::DhcpStaticBindingState
                .instance_path("seg-1-dhcpv4", Some("seg-1"))
                .unwrap(),
            "/policy/api/v1/infra/segments/seg-1/dhcp-static-binding-configs/seg-1-dhcpv4/state"
        );
        assert_eq!(
            ResourceType::VirtualMachine.collection_path(None).unwrap(),
            "/api/v1/fabric/virtual-machines"
        );
    }

    #[test]
    fn list_params_render_paging_and_filters() {
        let params = ListParams {
            cursor: Some("c1".into()),
            page_size: Some(50),
            sort_by: Some("display_name".into()),
            sort_ascending: Some(true),
            included_fields: None,
            filters: vec![],
        }
        .filter("segment_id", "seg-1");

        let query = params.to_query();
        assert!(query.contains(&("cursor".into(), "c1".into())));
        assert!(query.contains(&("page_size".into(), "50".into())));
        assert!(query.contains(&("sort_ascending".into(), "true".into())));
        assert!(query.contains(&("segment_id".into(), "seg-1".into())));
    }

    #[test]
    fn tier1_status_is_nested_one_level() {
        assert_eq!(ResourceType::Tier1State.state_path(), ["tier1_state", "state"]);
        assert_eq!(ResourceType::SegmentState.state_path(), ["state"]);
    }
}
