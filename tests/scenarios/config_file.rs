//! Configuration files driving the runtime.

use super::common::Node;
use node_common::config::NodeConfig;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let shipped = NodeConfig::from_file(&path).unwrap();
    let defaults = NodeConfig::default();

    assert!(shipped.validate().is_ok());
    assert_eq!(shipped.to_toml().unwrap(), defaults.to_toml().unwrap());
}

#[test]
fn test_custom_pulse_duration_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[relays]\npulse_duration = \"2s\"\n\n[log]\ncapacity = 8\nhttp_lines = 2").unwrap();

    let config = NodeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.relays.pulse_duration, Duration::from_secs(2));
    let mut node = Node::start(&config);

    node.get("/p?n=7");
    assert!(node.board.relay(7).is_on());
    node.clock.advance(Duration::from_millis(2_000));
    node.get("/api");
    assert!(!node.board.relay(7).is_on());

    let log = node.get("/log");
    let body = super::common::body(&log);
    assert_eq!(body.lines().count(), 2);
    assert!(body.contains("Relay 7 restored -> OFF"));
}

#[test]
fn test_invalid_config_rejected() {
    let err = NodeConfig::from_toml("[meter]\naddresses = []\n")
        .and_then(|config| config.validate())
        .unwrap_err();
    assert!(err.to_string().contains("meter.addresses"));
}
