use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::KeyPrefix;

fn cleanup_all_refresh_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("REFRESH__") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let config = Settings::default();

    assert_eq!(config.store.urls, vec!["127.0.0.1:2379".to_string()]);
    assert!(config.store.key_prefix_order.is_empty());
    assert!(config.lock.distributed_lock_enabled);
    assert_eq!(config.lock.lock_wait_time, 4);
    assert_eq!(config.lock.lock_lease_time, 10);
    assert_eq!(config.bus.bus_id, "application");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_should_merge_environment_overrides() {
    cleanup_all_refresh_env_vars();
    with_vars(
        vec![
            ("REFRESH__LOCK__LOCK_WAIT_TIME", Some("2")),
            ("REFRESH__STORE__HTTPS_ENABLED", Some("true")),
            ("REFRESH__STORE__KEY_PREFIX_ORDER", Some("application,profile")),
        ],
        || {
            let config = Settings::load(None).unwrap();

            assert_eq!(config.lock.lock_wait_time, 2);
            assert!(config.store.https_enabled);
            assert_eq!(
                config.store.key_prefix_order.tokens(),
                &[KeyPrefix::Application, KeyPrefix::Profile]
            );
        },
    );
}

#[test]
#[serial]
fn load_should_merge_override_file() {
    cleanup_all_refresh_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("node.toml");

    std::fs::write(
        &config_path,
        r#"
        [store]
        urls = ["10.0.0.1:2379", "10.0.0.2:2379"]
        key_prefix_order = ["APPLICATION", "profile", "label"]
        keep_alive_time_secs = 10
        keep_alive_timeout_secs = 5

        [lock]
        urls = ["10.0.0.9:6379"]
        lock_wait_time = 1
        lock_lease_time = 5
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let config = Settings::load(Some(config_path.to_str().unwrap())).unwrap();

        assert_eq!(config.store.urls.len(), 2);
        assert_eq!(config.store.key_prefix_order.tokens().len(), 3);
        assert_eq!(config.lock.wait_timeout(), std::time::Duration::from_secs(1));
        assert_eq!(config.lock.lease_timeout(), std::time::Duration::from_secs(5));

        let options = config.store.connect_options();
        assert_eq!(options.keep_alive_time, Some(std::time::Duration::from_secs(10)));
        assert!(options.username.is_none());
    });
}

#[test]
#[serial]
fn environment_variables_should_have_highest_priority() {
    cleanup_all_refresh_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("env_config.toml");
    std::fs::write(
        &config_path,
        r#"
        [bus]
        bus_id = "from-file"
        "#,
    )
    .unwrap();

    with_vars(
        vec![
            ("CONFIG_PATH", Some(config_path.to_str().unwrap())),
            ("REFRESH__BUS__BUS_ID", Some("from-env")),
        ],
        || {
            let config = Settings::load(None).unwrap();
            assert_eq!(config.bus.bus_id, "from-env");
        },
    );
}

#[test]
#[serial]
fn invalid_key_prefix_token_should_fail_fast() {
    cleanup_all_refresh_env_vars();
    with_vars(
        vec![("REFRESH__STORE__KEY_PREFIX_ORDER", Some("application,tenant"))],
        || {
            assert!(Settings::load(None).is_err());
        },
    );
}

#[test]
fn validation_should_reject_missing_store_urls() {
    let mut config = Settings::default();
    config.store.urls.clear();

    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn validation_should_reject_half_configured_credentials() {
    let mut config = Settings::default();
    config.store.username = Some("root".into());

    assert!(config.validate().is_err());

    config.store.password = Some("secret".into());
    assert!(config.validate().is_ok());
}

#[test]
fn validation_should_reject_zero_lease_when_lock_enabled() {
    let mut config = Settings::default();
    config.lock.lock_lease_time = 0;
    assert!(config.validate().is_err());

    config.lock.distributed_lock_enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn validation_should_reject_enabled_lock_without_urls() {
    let mut config = Settings::default();
    config.lock.urls.clear();
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

    config.lock.distributed_lock_enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_should_fail_when_lock_urls_are_emptied() {
    cleanup_all_refresh_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_lock_urls.toml");
    std::fs::write(
        &path,
        r#"
        [lock]
        urls = []
        distributed_lock_enabled = true
        "#,
    )
    .unwrap();

    assert!(matches!(
        Settings::load(Some(path.to_str().unwrap())),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn wait_not_shorter_than_lease_is_allowed() {
    let mut config = Settings::default();
    config.lock.lock_wait_time = 10;
    config.lock.lock_lease_time = 10;

    assert!(config.validate().is_ok());
}

#[test]
fn urls_receive_scheme_prefixes() {
    let mut config = Settings::default();
    config.store.urls = vec!["a:2379".into(), "b:2379".into()];
    config.lock.urls = vec!["r:6379".into()];

    assert_eq!(
        config.store.urls_with_http_prefix(),
        vec!["http://a:2379".to_string(), "http://b:2379".to_string()]
    );
    config.store.https_enabled = true;
    assert_eq!(config.store.urls_with_http_prefix()[0], "https://a:2379");
    assert_eq!(config.lock.urls_with_redis_prefix(), vec!["redis://r:6379".to_string()]);
}

#[test]
fn backoff_delay_grows_and_is_capped() {
    let policy = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 100,
        base_delay_ms: 100,
        max_delay_ms: 1000,
    };

    let first = policy.delay_for(0).as_millis();
    let third = policy.delay_for(2).as_millis();
    let late = policy.delay_for(30).as_millis();

    assert!((100..=110).contains(&first));
    assert!((400..=440).contains(&third));
    assert!((1000..=1100).contains(&late));
    assert!(policy.allows(1_000_000));
}

#[test]
fn bounded_policy_stops_after_max_retries() {
    let policy = BackoffPolicy {
        max_retries: 2,
        ..BackoffPolicy::default()
    };
    assert!(policy.allows(0));
    assert!(policy.allows(1));
    assert!(!policy.allows(2));
}
