use std::io::Write;

use fleetwire_provisioning::config::{env_vars, RouterConfig};
use fleetwire_provisioning::ProvisioningConfig;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        [inbound]
        queue_capacity = 50
        worker_count = 4
        enable_monitoring = true

        [registration]
        allow_new_devices = false
        auto_assign_site_token = "site-1"

        [batch]
        throttle_delay_ms = 25

        [router]
        type = "specification_mapping"
        mappings = { "spec-gw" = "mqtt" }
        "#,
    );

    let config = ProvisioningConfig::load(file.path()).unwrap();
    assert_eq!(config.inbound.queue_capacity, 50);
    assert_eq!(config.inbound.worker_count, 4);
    assert!(config.inbound.enable_monitoring);
    assert!(!config.registration.allow_new_devices);
    assert_eq!(config.registration.auto_assign_site_token.as_deref(), Some("site-1"));
    assert_eq!(config.batch.throttle_delay_ms, 25);
    assert_eq!(config.outbound.worker_count, 10);
    assert!(matches!(
        config.router,
        RouterConfig::SpecificationMapping { ref mappings, default_destination: None }
            if mappings.get("spec-gw").map(String::as_str) == Some("mqtt")
    ));
}

#[test]
fn test_load_rejects_invalid_settings() {
    let file = write_config("[outbound]\nqueue_capacity = 0\n");
    let err = ProvisioningConfig::load(file.path()).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("outbound.queue_capacity"));

    let file = write_config("[router]\ntype = \"specification_mapping\"\n");
    assert!(ProvisioningConfig::load(file.path()).unwrap_err().is_configuration());
}

#[test]
fn test_load_missing_file() {
    let err = ProvisioningConfig::load("/nonexistent/fleetwire.toml").unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_environment_overrides() {
    let file = write_config("[mqtt]\nhost = \"broker.local\"\n");
    std::env::set_var(env_vars::MQTT_HOST, "override.local");
    std::env::set_var(env_vars::SYSTEM_PRINCIPAL, "provisioner");

    let config = ProvisioningConfig::load(file.path()).unwrap();

    std::env::remove_var(env_vars::MQTT_HOST);
    std::env::remove_var(env_vars::SYSTEM_PRINCIPAL);
    assert_eq!(config.mqtt.host, "override.local");
    assert_eq!(config.system.principal, "provisioner");
}
