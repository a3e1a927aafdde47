//! Long-running resolve reporter
//!
//! Purely diagnostic: requests are reported once and never cancelled.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::ledger::AgentId;

#[derive(Debug)]
struct Running {
    started_at: Instant,
    reported: bool,
}

#[derive(Debug)]
pub struct Watchdog {
    period: Duration,
    running: BTreeMap<(AgentId, u64), Running>,
}

impl Watchdog {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: BTreeMap::new(),
        }
    }

    pub fn start(&mut self, agent_id: AgentId, request_id: u64, started_at: Instant) {
        self.running.insert(
            (agent_id, request_id),
            Running {
                started_at,
                reported: false,
            },
        );
    }

    pub fn finish(&mut self, agent_id: AgentId, request_id: u64) {
        self.running.remove(&(agent_id, request_id));
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Report requests older than the period; returns how many were newly
    /// reported
    pub fn check(&mut self, now: Instant) -> usize {
        let mut reported = 0;
        for (&(agent_id, request_id), running) in self.running.iter_mut() {
            let elapsed = now.saturating_duration_since(running.started_at);
            if !running.reported && elapsed >= self.period {
                running.reported = true;
                reported += 1;
                tracing::warn!(
                    agent_id,
                    request_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "resolve running for too long"
                );
            }
        }
        reported
    }
}
