use crate::config::models::{AppConfig, LogFormat, MaxJobsSetting, DEFAULT_SERVER_URL};

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.url, "sqlite://registry.db?mode=rwc");
    assert_eq!(config.dispatcher.interval_ms, 1000);
    assert_eq!(config.dispatcher.max_concurrent_dispatches, 1);
    assert_eq!(config.registry.server_url(), DEFAULT_SERVER_URL);
    assert_eq!(config.registry.dispatch_path_suffix, "/dispatch");
    assert!(config.registry.max_jobs() >= 1);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 5

[registry]
server_url = "http://coordinator-1:8080/"
max_jobs = 6

[dispatcher]
interval_ms = 250
max_concurrent_dispatches = 8

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.database.max_connections, 5);
    // 未给出的字段取默认值
    assert_eq!(config.database.min_connections, 1);
    assert_eq!(config.registry.server_url(), "http://coordinator-1:8080");
    assert_eq!(config.registry.max_jobs(), 6);
    assert_eq!(config.dispatcher.interval_ms, 250);
    assert_eq!(config.dispatcher.max_concurrent_dispatches, 8);
    assert!(config.dispatcher.enabled);
    assert_eq!(config.observability.log_format, LogFormat::Json);
}

#[test]
fn test_max_jobs_accepts_string_values() {
    let config = AppConfig::from_toml(
        r#"
[registry]
max_jobs = "12"
"#,
    )
    .unwrap();
    assert_eq!(config.registry.max_jobs, Some(MaxJobsSetting::Text("12".to_string())));
    assert_eq!(config.registry.max_jobs(), 12);
}

#[test]
fn test_max_jobs_falls_back_to_processor_count() {
    let processors = std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1);

    for raw in ["\"many\"", "0", "-3", "\"\""] {
        let config = AppConfig::from_toml(&format!("[registry]\nmax_jobs = {raw}\n")).unwrap();
        assert_eq!(config.registry.max_jobs(), processors, "max_jobs = {raw}");
    }
}

#[test]
fn test_blank_server_url_uses_default() {
    let config = AppConfig::from_toml(
        r#"
[registry]
server_url = "   "
"#,
    )
    .unwrap();
    assert_eq!(config.registry.server_url(), DEFAULT_SERVER_URL);
}

#[test]
fn test_config_to_toml() {
    let mut config = AppConfig::default();
    config.registry.max_jobs = Some(MaxJobsSetting::Count(3));
    let toml_str = config.to_toml().unwrap();

    assert!(toml_str.contains("[database]"));
    assert!(toml_str.contains("[dispatcher]"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.registry.max_jobs(), 3);
    assert_eq!(parsed.dispatcher.interval_ms, config.dispatcher.interval_ms);
}
