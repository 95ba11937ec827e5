mod common;

use common::{node, results};
use nsxt_lifecycle::{virtual_machine, Outcome};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn create_resolves_the_machine_from_the_inventory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/fabric/virtual-machines"))
        .and(query_param("display_name", "app-vm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([
            {"display_name": "app-vm", "external_id": "vm-ext-1"},
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let mut ctx = node(&server, "vm", json!({
        "vm_name": "app-vm",
        "network_name": "nic-1",
    }));

    assert!(matches!(virtual_machine::create(&mut ctx).await, Outcome::Converged));
    assert_eq!(ctx.instance.get_str("id"), Some("vm-ext-1"));
    assert_eq!(ctx.instance.get_str("name"), Some("app-vm"));
    assert_eq!(ctx.instance.get_str("type"), Some("VirtualMachine"));
}

#[tokio::test]
async fn ambiguous_machine_identity_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/fabric/virtual-machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([
            {"display_name": "app-vm", "external_id": "vm-ext-1"},
            {"display_name": "app-vm", "external_id": "vm-ext-2"},
        ]))))
        .mount(&server)
        .await;

    let mut ctx = node(&server, "vm", json!({
        "vm_name": "app-vm",
        "network_name": "nic-1",
    }));

    match virtual_machine::create(&mut ctx).await {
        Outcome::Fatal { message } => {
            assert!(message.contains("more than one"), "got {message}");
        }
        other => panic!("expected fatal outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_machine_is_fatal_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/fabric/virtual-machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([]))))
        .mount(&server)
        .await;

    let mut ctx = node(&server, "vm", json!({
        "vm_name": "app-vm",
        "network_name": "nic-1",
    }));

    match virtual_machine::create(&mut ctx).await {
        Outcome::Fatal { message } => {
            assert!(message.contains("no virtual machine"), "got {message}");
        }
        other => panic!("expected fatal outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn configure_waits_for_the_attachment_then_publishes_networks() {
    let server = MockServer::start().await;
    let vifs_path = || path("/api/v1/fabric/vifs");
    // The fabric reports the interfaces gradually: none, then one without
    // a confirmed attachment, then fully attached.
    Mock::given(method("GET"))
        .and(vifs_path())
        .and(query_param("owner_vm_id", "vm-ext-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(vifs_path())
        .and(query_param("owner_vm_id", "vm-ext-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([
            {"display_name": "nic-1", "mac_address": "aa:bb:cc:dd:ee:01"},
        ]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(vifs_path())
        .and(query_param("owner_vm_id", "vm-ext-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([{
            "display_name": "nic-1",
            "mac_address": "aa:bb:cc:dd:ee:01",
            "lport_attachment_id": "attach-1",
            "ip_address_info": [
                {"ip_addresses": ["192.168.10.5", "fc7e:f206:db42::5"]},
            ],
        }]))))
        .mount(&server)
        .await;

    let mut ctx = node(&server, "vm", json!({
        "vm_name": "app-vm",
        "network_name": "nic-1",
    }));
    ctx.instance.set("id", "vm-ext-1");

    assert!(matches!(virtual_machine::configure(&mut ctx).await, Outcome::RetryLater(_)));
    assert!(matches!(virtual_machine::configure(&mut ctx).await, Outcome::RetryLater(_)));
    assert!(matches!(virtual_machine::configure(&mut ctx).await, Outcome::Converged));

    let networks = ctx.instance.get("networks").and_then(Value::as_array).unwrap();
    assert_eq!(networks.len(), 1);
    let selected = ctx.instance.get("nic-1").unwrap();
    assert_eq!(selected["mac"], "aa:bb:cc:dd:ee:01");
    assert_eq!(selected["attachment_id"], "attach-1");
    assert_eq!(selected["ipv4_addresses"], json!(["192.168.10.5"]));
    assert_eq!(selected["ipv6_addresses"], json!(["fc7e:f206:db42::5"]));
}

#[tokio::test]
async fn configured_network_missing_from_the_machine_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/fabric/vifs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(json!([{
            "display_name": "other-net",
            "mac_address": "aa:bb:cc:dd:ee:09",
            "lport_attachment_id": "attach-9",
        }]))))
        .mount(&server)
        .await;

    let mut ctx = node(&server, "vm", json!({
        "vm_name": "app-vm",
        "network_name": "nic-1",
    }));
    ctx.instance.set("id", "vm-ext-1");

    match virtual_machine::configure(&mut ctx).await {
        Outcome::Fatal { message } => {
            assert!(message.contains("not attached"), "got {message}");
        }
        other => panic!("expected fatal outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_only_discards_runtime_properties() {
    let server = MockServer::start().await;
    let mut ctx = node(&server, "vm", json!({"vm_name": "app-vm"}));
    ctx.instance.set("id", "vm-ext-1");

    assert!(matches!(virtual_machine::delete(&mut ctx).await, Outcome::Converged));
    assert!(ctx.instance.is_empty());
}
