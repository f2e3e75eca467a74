use crate::config::models::AppConfig;

#[test]
fn test_rejects_non_sqlite_database() {
    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/registry".to_string();
    assert!(config.validate().is_err());

    config.database.url = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_connection_bounds() {
    let mut config = AppConfig::default();
    config.database.min_connections = 20;
    config.database.max_connections = 10;
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_zero_interval() {
    let result = AppConfig::from_toml(
        r#"
[dispatcher]
interval_ms = 0
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_rejects_zero_fan_out() {
    let mut config = AppConfig::default();
    config.dispatcher.max_concurrent_dispatches = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_invalid_server_url() {
    let mut config = AppConfig::default();
    config.registry.server_url = Some("not a url".to_string());
    assert!(config.validate().is_err());

    config.registry.server_url = Some("ftp://files:21".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_dispatch_suffix_without_slash() {
    let mut config = AppConfig::default();
    config.registry.dispatch_path_suffix = "dispatch".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_unknown_log_level() {
    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_metrics_address_checked_only_when_enabled() {
    let mut config = AppConfig::default();
    config.observability.metrics_bind_address = "nowhere".to_string();
    assert!(config.validate().is_ok());

    config.observability.metrics_enabled = true;
    assert!(config.validate().is_err());
}
