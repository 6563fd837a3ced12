//! Shared harness for end-to-end scenarios.

use node_common::config::NodeConfig;
use node_common::time::ManualClock;
use node_ethernet::sim::{SimChipSelect, SimSpi};
use node_runtime::sim::SimulatedBoard;
use node_runtime::{Scheduler, TickOutcome};
use std::sync::Arc;

/// Scheduler type on the simulated board.
pub type SimScheduler = Scheduler<SimSpi, SimChipSelect>;

/// A started node on virtual time.
pub struct Node {
    pub board: SimulatedBoard,
    pub scheduler: SimScheduler,
    pub clock: Arc<ManualClock>,
}

impl Node {
    /// Bring up a node with `config`.
    pub fn start(config: &NodeConfig) -> Self {
        let board = SimulatedBoard::new();
        let clock = Arc::new(ManualClock::new(0));
        let mut scheduler = board.scheduler(config, clock.clone()).unwrap();
        scheduler.start().unwrap();
        Self {
            board,
            scheduler,
            clock,
        }
    }

    /// Issue `GET target` and return the raw response text.
    pub fn get(&mut self, target: &str) -> String {
        let request = format!("GET {target} HTTP/1.1\r\nHost: relay-node\r\nAccept: */*\r\n\r\n");
        let (raw, outcome) = self
            .board
            .serve_one(&mut self.scheduler, 0, request.as_bytes(), 50)
            .expect("request not served");
        assert!(matches!(outcome, TickOutcome::Served { .. }), "{outcome:?}");
        String::from_utf8(raw).unwrap()
    }

    /// Issue `GET /api` and parse the JSON body.
    pub fn status(&mut self) -> serde_json::Value {
        let response = self.get("/api");
        let body = body(&response);
        serde_json::from_str(body).unwrap()
    }
}

/// Body of a raw HTTP response.
pub fn body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map_or("", |(_, body)| body)
}
