//! Relay control and status over the simulated socket.

use super::common::{body, Node};
use node_common::config::NodeConfig;
use std::time::Duration;

#[test]
fn test_switch_relay_then_read_status() {
    let mut node = Node::start(&NodeConfig::default());

    let response = node.get("/r?n=2&s=1");
    assert!(response.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(response.contains("Location: /\r\n"));

    let response = node.get("/api");
    assert!(body(&response).contains(r#""r":[0,1,0,0,0,0,0,0]"#));
    assert!(node.board.relay(2).is_on());
}

#[test]
fn test_unknown_path_leaves_peripherals_alone() {
    let mut node = Node::start(&NodeConfig::default());
    node.get("/r?n=5&s=1");
    let before: Vec<bool> = (1..=8).map(|n| node.board.relay(n).is_on()).collect();

    let response = node.get("/unknownpath");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body(&response), "404");

    let after: Vec<bool> = (1..=8).map(|n| node.board.relay(n).is_on()).collect();
    assert_eq!(before, after);
}

#[test]
fn test_garbage_request_is_404() {
    let mut node = Node::start(&NodeConfig::default());
    let (raw, _) = node
        .board
        .serve_one(&mut node.scheduler, 0, b"\x16\x03\x01\x00\xa5\x01\x00", 50)
        .unwrap();
    let response = String::from_utf8(raw).unwrap();
    assert!(response.starts_with("HTTP/1.1 404"));
}

#[test]
fn test_pulse_visible_in_status_until_expiry() {
    let mut node = Node::start(&NodeConfig::default());
    node.get("/p?n=1");
    assert_eq!(node.status()["r"][0], 1);

    node.clock.advance(Duration::from_secs(5));
    // The restore runs at the start of the next tick
    assert_eq!(node.status()["r"][0], 0);
    assert_eq!(node.board.relay(1).writes(), 3);
}

#[test]
fn test_all_relays_and_log() {
    let mut node = Node::start(&NodeConfig::default());
    node.get("/a?s=1");
    assert_eq!(node.status()["r"], serde_json::json!([1, 1, 1, 1, 1, 1, 1, 1]));
    node.get("/a?s=0");
    node.get("/r?n=3&s=1");

    let log = node.get("/log");
    let lines: Vec<&str> = body(&log).lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].ends_with("(link up)"));
    assert!(lines[3].ends_with("Relay 3 -> ON"));
    assert!(lines[2].ends_with("All relays -> OFF"));
}

#[test]
fn test_meter_polled_with_read_input_registers() {
    let mut node = Node::start(&NodeConfig::default());
    let status = node.status();
    assert_eq!(status["pz"]["e"], 1532);

    let requests = node.board.meter().requests();
    assert_eq!(
        requests[0],
        [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
    );
}
