use std::{env, fs};

use tiercache_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tiercache.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
maintenance_interval_secs = 30

[logging]
level = "debug"

[cache]
max_size = 500
default_ttl_secs = 120
namespace = "app:"
coalesce_fetches = true

[cache.remote]
enabled = true
url = "redis://cache.internal:6379"
pool_size = 4
invalidation_channel = "app:invalidate"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unset fields keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.maintenance_interval_secs, 30);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");
    assert_eq!(cfg.cache.max_size, 500);
    assert_eq!(cfg.cache.default_ttl_secs, 120);
    assert_eq!(cfg.cache.namespace, "app:");
    assert!(cfg.cache.coalesce_fetches);
    assert!(cfg.cache.remote.enabled);
    assert_eq!(cfg.cache.remote.pool_size, 4);
    assert_eq!(cfg.cache.remote.timeout_ms, 5000);
    assert_eq!(cfg.cache.remote.retry_attempts, 3);
    assert_eq!(
        cfg.cache.remote.invalidation_channel.as_deref(),
        Some("app:invalidate")
    );

    // 2) Env override should win over file
    unsafe {
        env::set_var("TIERCACHE__CACHE__MAX_SIZE", "42");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.cache.max_size, 42);
    // cleanup env var
    unsafe {
        env::remove_var("TIERCACHE__CACHE__MAX_SIZE");
    }

    // 3) Invalid config (zero TTL) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[cache]
default_ttl_secs = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("default_ttl_secs must be > 0"), "{err}");

    // 4) A missing file falls back to defaults
    let missing = dir.path().join("missing.toml");
    let cfg_default = load_config(missing.to_str()).expect("defaults");
    assert_eq!(cfg_default.server.port, 8080);
    assert_eq!(cfg_default.cache.namespace, "cache:");
}
