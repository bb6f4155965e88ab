//! Unit tests for configuration parsing and validation.

use std::io::Write;

use yate_extmodule::config::{TransportConfig, DEFAULT_PORT};
use yate_extmodule::wire::lines::MAX_LINE_BYTES;
use yate_extmodule::{ClientConfig, ClientError, DispatchMode, Role};

// ── Defaults ──────────────────────────────────────────────────────────────────

#[test]
fn empty_file_uses_defaults() {
    let config = ClientConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, ClientConfig::default());
    assert_eq!(
        config.transport,
        TransportConfig::Tcp {
            host: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT
        }
    );
    assert_eq!(config.role, Role::Global);
    assert_eq!(config.dispatch, DispatchMode::Inline);
    assert_eq!(config.max_line_bytes, MAX_LINE_BYTES);
}

#[test]
fn full_config_parses() {
    let raw = r#"
role = "playrec"
channel_id = "sip/7"
channel_type = "audio"
dispatch = "concurrent"
max_line_bytes = 4096
write_queue = 16

[transport]
kind = "tcp"
host = "yate.local"
port = 6000
"#;
    let config = ClientConfig::from_toml_str(raw).expect("valid config");
    assert_eq!(config.role, Role::PlayRec);
    assert_eq!(config.channel_id.as_deref(), Some("sip/7"));
    assert_eq!(config.channel_type.as_deref(), Some("audio"));
    assert_eq!(config.dispatch, DispatchMode::Concurrent);
    assert_eq!(
        config.transport,
        TransportConfig::Tcp {
            host: "yate.local".to_owned(),
            port: 6000
        }
    );

    let options = config.options();
    assert_eq!(options.role, Role::PlayRec);
    assert_eq!(options.max_line_bytes, 4096);
    assert_eq!(options.write_queue, 16);
    assert_eq!(options.dispatch, DispatchMode::Concurrent);
}

#[test]
fn stdio_transport_parses() {
    let config = ClientConfig::from_toml_str("[transport]\nkind = \"stdio\"\n").expect("valid");
    assert_eq!(config.transport, TransportConfig::Stdio);
}

#[test]
fn tcp_transport_fields_default() {
    let config = ClientConfig::from_toml_str("[transport]\nkind = \"tcp\"\n").expect("valid");
    assert_eq!(config.transport, TransportConfig::default());
}

// ── Validation ────────────────────────────────────────────────────────────────

#[test]
fn invalid_values_are_rejected() {
    let cases = [
        ("max_line_bytes = 0", "max_line_bytes"),
        ("write_queue = 0", "write_queue"),
        ("channel_type = \"audio\"", "channel_type requires channel_id"),
        ("[transport]\nkind = \"tcp\"\nhost = \"  \"", "transport.host"),
    ];
    for (raw, expected) in cases {
        match ClientConfig::from_toml_str(raw) {
            Err(ClientError::Config(msg)) => assert!(msg.contains(expected), "{raw}: {msg}"),
            other => panic!("{raw}: expected config error, got {other:?}"),
        }
    }
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = ClientConfig::from_toml_str("role = ").unwrap_err();
    assert!(
        matches!(&err, ClientError::Config(msg) if msg.starts_with("invalid config")),
        "{err:?}"
    );

    let err = ClientConfig::from_toml_str("role = \"operator\"").unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));

    let err = ClientConfig::from_toml_str("[transport]\nkind = \"udp\"").unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}

// ── Files ─────────────────────────────────────────────────────────────────────

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "role = \"channel\"\nchannel_id = \"sip/1\"").expect("write config");

    let config = ClientConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.role, Role::Channel);
    assert_eq!(config.channel_id.as_deref(), Some("sip/1"));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = ClientConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(
        matches!(&err, ClientError::Config(msg) if msg.starts_with("failed to read config")),
        "{err:?}"
    );
}
