#![allow(dead_code)]

use std::sync::Once;

use serde_json::{json, Map, Value};
use wiremock::MockServer;

use nsxt_lifecycle::SubjectContext;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a node context pointed at a mock manager.
pub fn node(server: &MockServer, node_id: &str, resource_config: Value) -> SubjectContext {
    init_tracing();
    let properties = json!({
        "client_config": {
            "host": "nsxt.example.test",
            "username": "admin",
            "password": "secret",
            "base_url": server.uri(),
        },
        "resource_config": resource_config,
    });
    SubjectContext::new(node_id, as_map(properties))
}

pub fn as_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// A list response envelope.
pub fn results(items: Value) -> Value {
    let count = items.as_array().map(Vec::len).unwrap_or_default();
    json!({"results": items, "result_count": count})
}
