//! Invalidation pushes
//!
//! When collection wants to pass a step, every connected agent is told to
//! stop using ids at or below it. The acknowledgement carries the writes
//! still in flight in that span; everything else the agent held there is
//! dropped from its share and the channel window.

use std::collections::BTreeMap;

use crate::protocol::{DepotMessage, Envelope, InvalidatedStep};
use crate::types::SequenceId;

use super::ledger::AgentId;
use super::{Depot, DepotOutput};

impl Depot {
    /// Invalidate every id of the current generation up to `step` on
    /// `channel`; returns false for unknown channels
    pub fn invalidate_step(&mut self, channel: u8, step: u32) -> bool {
        if !self.ledger.invalidate_step(channel, step) {
            tracing::warn!(channel, step, "invalidate on unknown channel");
            return false;
        }
        tracing::info!(channel, step, generation = self.ledger.generation(), "invalidating step");
        let advanced = self.ledger.refresh_least_expected(channel);
        self.push_least_expected(advanced);

        let agents: Vec<AgentId> = self
            .ledger
            .agents()
            .filter(|(_, agent)| agent.connected)
            .map(|(&agent_id, _)| agent_id)
            .collect();
        for agent_id in agents {
            self.push_invalidations(agent_id);
        }
        true
    }

    /// Send `agent_id` every invalidation it has not been told about
    pub(super) fn push_invalidations(&mut self, agent_id: AgentId) {
        let generation = self.ledger.generation();
        let pending: BTreeMap<u8, u32> = {
            let in_flight = self
                .ledger
                .agent(agent_id)
                .map(|agent| agent.invalidated_step_in_flight.clone())
                .unwrap_or_default();
            self.ledger
                .channels()
                .filter_map(|ch| {
                    let step = ch.invalidated_step?;
                    match in_flight.get(&ch.channel) {
                        Some(&sent) if sent >= step => None,
                        _ => Some((ch.channel, step)),
                    }
                })
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        let agent = self.ledger.agent_mut(agent_id);
        agent.last_push_id += 1;
        let push_id = agent.last_push_id;
        for (&channel, &step) in &pending {
            agent.invalidated_step_in_flight.insert(channel, step);
        }
        let invalidated_steps = pending
            .iter()
            .map(|(&channel, &invalidated_step)| InvalidatedStep {
                channel,
                generation,
                invalidated_step,
            })
            .collect();
        agent.push_requests.insert(push_id, pending);

        tracing::debug!(agent_id, push_id, "push notify");
        self.outputs.push(DepotOutput::ToAgent {
            agent_id,
            envelope: Envelope::new(
                push_id,
                DepotMessage::PushNotify {
                    invalidated_steps,
                    blocked_tablets: Vec::new(),
                },
            ),
        });
    }

    pub(super) fn on_push_notify_result(
        &mut self,
        agent_id: AgentId,
        push_id: u64,
        writes_in_flight: &[SequenceId],
    ) {
        let Some(steps) = self.ledger.agent_mut(agent_id).push_requests.remove(&push_id) else {
            tracing::warn!(agent_id, push_id, "push result for unknown push");
            return;
        };
        tracing::debug!(agent_id, push_id, writes_in_flight = writes_in_flight.len(), "push acknowledged");
        for (channel, step) in steps {
            let advanced = self
                .ledger
                .trim_agent(agent_id, channel, step, writes_in_flight);
            self.push_least_expected(advanced);
        }
    }

    pub(super) fn push_least_expected(&mut self, advanced: Option<SequenceId>) {
        if let Some(least_expected) = advanced {
            self.outputs.push(DepotOutput::LeastExpectedAdvanced {
                channel: least_expected.channel,
                least_expected,
            });
        }
    }
}
