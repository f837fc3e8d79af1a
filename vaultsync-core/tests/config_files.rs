use assert_fs::prelude::*;
use predicates::prelude::*;

use vaultsync_core::config::{AppConfig, BrokenLinkMode, InternalLinkMode, UnsupportedPolicy};
use vaultsync_core::ConfigError;

#[test]
fn minimal_yaml_fills_in_defaults() {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("config.yaml");
    file.write_str(
        r#"
source:
  api_token: secret_123
  database_id: 0123456789abcdef0123456789abcdef
destination:
  vault_path: /tmp/vault
  subfolder: Notion
sync:
  batch_size: 4
  unsupported_blocks: warning
  broken_links: text_only
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.sync.batch_size, 4);
    assert_eq!(config.sync.max_concurrency, 5);
    assert_eq!(config.sync.rate_limit.requests_per_second, 3.0);
    assert_eq!(config.sync.unsupported_blocks, UnsupportedPolicy::Warning);
    assert_eq!(config.sync.broken_links, BrokenLinkMode::TextOnly);
    assert_eq!(config.sync.internal_links, InternalLinkMode::Obsidian);
    assert_eq!(config.logging.level, "info");
    assert!(config.destination.sync_path().ends_with("vault/Notion"));
}

#[test]
fn parse_error_names_the_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("broken.yaml");
    file.write_str("source: [unterminated\n").unwrap();

    let err = AppConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(predicate::str::contains("broken.yaml").eval(&err.to_string()));
}

#[test]
fn saved_config_is_readable_yaml() {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("nested/config.yaml");

    let mut config = AppConfig::default();
    config.source.api_token = "secret".into();
    config.save_to(file.path()).unwrap();

    file.assert(predicate::path::exists());
    file.assert(predicate::str::contains("api_token: secret"));
    dir.child("nested/config.yaml.tmp")
        .assert(predicate::path::missing());
}
