//! Integration tests for configuration files

use std::io::Write;

use metric_ingest::config::Config;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write config");
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
        [kafka]
        brokers = ["kafka1:9092", "kafka2:9092"]
        topic = "metrics"
        group_id = "ingest-eu"

        [index]
        addr = "es:9200"
        user = "ingest"
        pass = "s3cret"
        index_name = "defs"
        warmup_window_secs = 600
        warmup_percent = 5
        bulk_workers = 4

        [ingest]
        usage_enabled = true

        [monitoring]
        log_level = "debug"
        listen_addr = "127.0.0.1:7070"
        "#,
    );

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.kafka.brokers.len(), 2);
    assert_eq!(config.kafka.group_id, "ingest-eu");
    assert!(config.ingest.usage_enabled);

    let index = config.index.to_index_config();
    assert_eq!(index.index_name, "defs");
    assert_eq!(index.pass.expose_secret(), "s3cret");
    assert_eq!(index.warmup_percent, 5);
    assert_eq!(index.bulk.workers, 4);
    assert_eq!(index.warmup_window.as_secs(), 600);
}

#[test]
fn test_empty_file_is_default() {
    let file = write_config("");
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.kafka.topic, "mdm");
    assert_eq!(config.monitoring.listen_addr, "0.0.0.0:6060");
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_values_fail_validation() {
    let file = write_config(
        r#"
        [index]
        addr = "http://es:9200"
        "#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(config.validate().is_err());

    let file = write_config(
        r#"
        [index]
        warmup_percent = 150
        "#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file() {
    let file = write_config("[kafka\nbrokers = ");
    let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
    assert!(err.contains("Failed to parse config file"));

    assert!(Config::from_file("/nonexistent/ingest.toml").is_err());
}

#[test]
fn test_save_and_reload() {
    let mut config = Config::default();
    config.kafka.topic = "saved".to_string();
    config.index.warmup_percent = 10;
    config.index.user = "ingest".to_string();
    config.index.pass = "s3cret".into();

    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    config.save_to_file(path).unwrap();

    let reloaded = Config::from_file(path).unwrap();
    assert_eq!(reloaded.kafka.topic, "saved");
    assert_eq!(reloaded.index.warmup_percent, 10);
    assert_eq!(reloaded.index.user, "ingest");

    // the password stays out of the file
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(!contents.contains("s3cret"));
    assert!(reloaded.index.pass.expose_secret().is_empty());
}

// Only test in this binary that touches the process environment.
#[test]
fn test_environment_overrides() {
    std::env::set_var("INGEST_KAFKA_GROUP", "from-env");
    std::env::set_var("INGEST_ES_PASS", "env-secret");

    let config = Config::from_env();
    assert_eq!(config.kafka.group_id, "from-env");
    assert_eq!(config.index.pass.expose_secret(), "env-secret");
    assert_eq!(config.kafka.topic, "mdm");

    let file = write_config(
        r#"
        [kafka]
        topic = "metrics"
        group_id = "from-file"
        "#,
    );
    let config = Config::from_file_with_env(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.kafka.topic, "metrics");
    assert_eq!(config.kafka.group_id, "from-env");
    assert!(Config::from_file_with_env("/nonexistent/ingest.toml").is_err());

    std::env::remove_var("INGEST_KAFKA_GROUP");
    std::env::remove_var("INGEST_ES_PASS");
}
