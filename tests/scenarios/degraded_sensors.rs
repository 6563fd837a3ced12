//! Sensor and meter failures surfacing through the HTTP layer.

use super::common::Node;
use node_common::config::NodeConfig;
use node_modbus::sim::MeterBehavior;
use std::time::Duration;

#[test]
fn test_failed_climate_sensor_reports_null() {
    let mut node = Node::start(&NodeConfig::default());
    node.board.climate().set_failing(true);

    let status = node.status();
    assert!(status["t"].is_null());
    assert!(status["h"].is_null());

    let page = node.get("/");
    assert!(page.contains("Temperature: --"));
}

#[test]
fn test_meter_outage_goes_stale_then_unknown() {
    let mut node = Node::start(&NodeConfig::default());
    assert_eq!(node.status()["pz"]["e"], 1532);

    node.board.meter().set_behavior(MeterBehavior::Silent);
    node.clock.advance(Duration::from_secs(3));
    // Older than the refresh interval, younger than the hard expiry
    assert_eq!(node.status()["pz"]["e"], 1532);

    node.clock.advance(Duration::from_secs(3));
    let status = node.status();
    assert!(status["pz"].is_object());
    assert!(status["pz"]["v"].is_null());
    assert!(status["pz"]["e"].is_null());

    node.board.meter().set_behavior(MeterBehavior::Normal);
    assert_eq!(node.status()["pz"]["v"].as_f64().map(f64::round), Some(230.0));
}

#[test]
fn test_corrupt_meter_frames_do_not_replace_cache() {
    let mut node = Node::start(&NodeConfig::default());
    node.status();

    node.board.meter().set_behavior(MeterBehavior::CorruptCrc);
    node.clock.advance(Duration::from_secs(3));
    let status = node.status();
    assert_eq!(status["pz"]["e"], 1532);
    assert_eq!(status["pz"]["pf"].as_f64().map(|pf| (pf * 100.0).round()), Some(92.0));
}
