//! Operation context and the progress marker store.
//!
//! The orchestrator persists a property bag per node (or relationship)
//! instance and hands it in mutably on every tick. The adapter reads
//! markers at the start of a tick and writes them only after the mutating
//! call they record has completed, so a crash between ticks costs at most
//! one duplicate idempotent call.
//!
//! There is no ambient context: everything a reconciliation function needs
//! is threaded through these values as explicit arguments.

use serde_json::{Map, Value};

use nsxt_client::{ClientConfig, NsxtClient, ResourceHandle, ResourceType};

use crate::error::{Error, Result};

/// Key under which per-task progress flags are grouped.
const TASKS_PROPERTY: &str = "tasks";

/// Durable per-instance runtime properties, including progress markers.
///
/// Backed by a plain JSON map so the orchestrator can persist it verbatim.
/// Markers are monotonic within one lifecycle transition: once set they
/// stay set until the transition reaches a terminal state and the whole
/// bag is discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceProperties(Map<String, Value>);

impl InstanceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying map, e.g. for persistence.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Wipe every runtime property and marker for this instance. Invoked
    /// only on confirmed terminal convergence of a delete transition.
    pub fn clear_all(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::Bool(true)))
    }

    fn set_flag(&mut self, key: &str) {
        self.0.insert(key.to_owned(), Value::Bool(true));
    }

    fn task_flag(&self, task_id: &str) -> bool {
        self.0
            .get(TASKS_PROPERTY)
            .and_then(Value::as_object)
            .map(|tasks| matches!(tasks.get(task_id), Some(Value::Bool(true))))
            .unwrap_or(false)
    }

    fn set_task_flag(&mut self, task_id: &str) {
        let tasks = self
            .0
            .entry(TASKS_PROPERTY)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(tasks) = tasks.as_object_mut() {
            tasks.insert(task_id.to_owned(), Value::Bool(true));
        }
    }

    pub fn remove_task_flag(&mut self, task_id: &str) {
        if let Some(tasks) = self.0.get_mut(TASKS_PROPERTY).and_then(Value::as_object_mut) {
            tasks.remove(task_id);
        }
    }
}

/// Address of one progress marker inside an instance's property bag.
///
/// Single-resource transitions use a top-level flag; compound operations
/// (per-family static bindings) group their flags under `tasks`.
#[derive(Debug, Clone, Copy)]
pub enum Marker<'a> {
    Flag(&'a str),
    Task(&'a str),
}

impl Marker<'_> {
    pub fn is_set(&self, instance: &InstanceProperties) -> bool {
        match self {
            Marker::Flag(key) => instance.flag(key),
            Marker::Task(task_id) => instance.task_flag(task_id),
        }
    }

    pub fn set(&self, instance: &mut InstanceProperties) {
        match self {
            Marker::Flag(key) => instance.set_flag(key),
            Marker::Task(task_id) => instance.set_task_flag(task_id),
        }
    }
}

/// One node instance as seen by a lifecycle operation: identity,
/// declarative properties, and the durable runtime property bag.
#[derive(Debug, Clone)]
pub struct SubjectContext {
    pub node_id: String,
    /// Declarative node properties (`client_config`, `resource_config`,
    /// and type-specific extras such as `tier1_gateway_id`).
    pub properties: Map<String, Value>,
    /// Runtime properties persisted by the orchestrator across ticks.
    pub instance: InstanceProperties,
}

impl SubjectContext {
    pub fn new(node_id: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            node_id: node_id.into(),
            properties,
            instance: InstanceProperties::new(),
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance: InstanceProperties) -> Self {
        self.instance = instance;
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Parse the declarative `client_config` property.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let value = self.property("client_config").ok_or_else(|| {
            Error::Config("node property `client_config` is required".into())
        })?;
        Ok(ClientConfig::from_value(value)?)
    }

    /// The declarative `resource_config` map, merged with the
    /// runtime-persisted resource id from a prior create.
    pub fn resource_config(&self) -> Map<String, Value> {
        let mut config = self
            .property("resource_config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(id) = self.instance.get_str("id") {
            config.insert("id".into(), Value::String(id.to_owned()));
        }
        config
    }

    /// Connect to the manager this node is configured against.
    pub async fn connect(&self) -> Result<NsxtClient> {
        let config = self.client_config()?;
        Ok(NsxtClient::connect(&config).await?)
    }

    /// Build the per-tick resource handle: declarative configuration
    /// merged with the runtime-persisted id, positioned at `resource_type`.
    pub async fn resource_handle(&self, resource_type: ResourceType) -> Result<ResourceHandle> {
        let client = self.connect().await?;
        Ok(ResourceHandle::new(client, resource_type, self.resource_config()))
    }
}

/// Context for a relationship operation between two node instances.
///
/// `node_id` names the side the operation was invoked on; resolving it
/// against the source and target decides which instance's property bag
/// the operation writes.
#[derive(Debug, Clone)]
pub struct RelationshipContext {
    pub node_id: String,
    pub source: SubjectContext,
    pub target: SubjectContext,
}

impl RelationshipContext {
    /// Split into (subject, counterpart): the side matching `node_id`
    /// mutably, the other side read-only.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `node_id` matches neither side.
    pub fn split_subject(&mut self) -> Result<(&mut SubjectContext, &SubjectContext)> {
        if self.node_id == self.source.node_id {
            Ok((&mut self.source, &self.target))
        } else if self.node_id == self.target.node_id {
            Ok((&mut self.target, &self.source))
        } else {
            Err(Error::Config(format!(
                "unable to decide if node {} is the relationship source or target",
                self.node_id
            )))
        }
    }
}
