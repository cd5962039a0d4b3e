//! Configuration file tests

use std::io::Write;
use std::time::Duration;

use lisp_etr::config::{create_default_config, load_config, load_config_str};
use lisp_etr::error::ConfigError;
use lisp_etr::keys::DecapKeyStore;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"{
    "direct": { "listen": "[::]:4341", "retry_backoff_ms": 500 },
    "capture": { "tunnel_port": 4341, "snaplen": 2048, "ephemeral_port": 51000 },
    "ipc": { "socket_path": "/tmp/lisp-etr-it.sock", "socket_mode": 432 },
    "log": { "level": "debug", "format": "json" },
    "uplinks": [
        { "name": "eth0", "addrs": ["192.0.2.10", "2001:db8::10"] },
        { "name": "wwan0", "addrs": ["203.0.113.5"], "free": false }
    ],
    "decap_keys": [{
        "rloc": "2001:db8:ffff::1",
        "keys": [
            { "key_id": 1, "icv_key": "0011", "decrypt_key": "00112233445566778899aabbccddeeff" },
            { "key_id": 3, "icv_key": "2233", "decrypt_key": "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff" }
        ]
    }]
}"#;

#[test]
fn test_full_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = load_config(file.path()).unwrap();
    assert!(config.direct.listen.is_ipv6());
    assert_eq!(config.direct.retry_backoff(), Duration::from_millis(500));
    assert_eq!(config.capture.snaplen, 2048);
    assert_eq!(config.ipc.socket_mode, 0o660);
    assert_eq!(config.log.format, "json");
    assert!(!config.uplinks[1].free);

    let store = DecapKeyStore::new();
    for entry in &config.decap_keys {
        store.install(entry).unwrap();
    }
    assert_eq!(store.len(), 1);
}

#[test]
fn test_generated_config_round_trips() {
    let file = NamedTempFile::new().unwrap();
    create_default_config(file.path()).unwrap();

    let config = load_config(file.path()).unwrap();
    assert!(config.direct.enabled);
    assert!(config.ipc.enabled);
    assert!(config.uplinks.is_empty());
}

#[test]
fn test_rejected_configs() {
    let cases = [
        r#"{ "capture": { "tunnel_port": 0 } }"#,
        r#"{ "capture": { "ephemeral_port": 0 } }"#,
        r#"{ "log": { "level": "loud" } }"#,
        r#"{ "uplinks": [{ "name": "" }] }"#,
        r#"{ "decap_keys": [{ "rloc": "192.0.2.1", "keys": [{ "key_id": 5, "decrypt_key": "00112233445566778899aabbccddeeff" }] }] }"#,
    ];
    for json in cases {
        assert!(
            matches!(load_config_str(json), Err(ConfigError::ValidationError(_))),
            "accepted {json}"
        );
    }

    assert!(matches!(
        load_config_str(r#"{ "direct": { "listen": "not-an-addr" } }"#),
        Err(ConfigError::ParseError(_))
    ));
}
