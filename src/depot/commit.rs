//! Commit transaction
//!
//! Maps keys onto freshly written blobs. Before anything is mutated every
//! key that memory is not authoritative for is read from the index, so a
//! page fault restarts the whole batch before any item is applied.

use crate::error::{DepotError, Result};
use crate::protocol::{CommitItem, CommitStatus, DepotMessage, Envelope};
use crate::types::{KeepState, Key, SequenceId};
use crate::wal::Operation;

use super::ledger::AgentId;
use super::{Depot, DepotOutput};

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub agent_id: AgentId,
    pub request_id: u64,
    pub items: Vec<CommitItem>,
}

#[derive(Debug)]
pub(super) enum CommitAttempt {
    Complete {
        statuses: Vec<CommitStatus>,
        advanced: Vec<SequenceId>,
    },
    NotReady,
}

impl Depot {
    pub(super) fn execute_commit(
        &mut self,
        request: &CommitRequest,
        batch: &mut Vec<Operation>,
    ) -> Result<CommitAttempt> {
        let keys: Vec<Result<Key>> = request
            .items
            .iter()
            .map(|item| self.data.parse_key(&item.key))
            .collect();

        let known: Vec<Key> = keys.iter().flatten().cloned().collect();
        if !self.preload(&known, batch)? {
            return Ok(CommitAttempt::NotReady);
        }

        let generation = self.ledger.generation();
        let mut statuses = Vec::with_capacity(request.items.len());
        let mut advanced = Vec::new();

        for (item, key) in request.items.iter().zip(keys) {
            let key = match key {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(request_id = request.request_id, error = %e, "malformed commit key");
                    statuses.push(CommitStatus::Error(format!("malformed key: {}", e)));
                    continue;
                }
            };

            let seq_id = item.locator.seq_id;
            let collectible = self
                .barriers
                .can_be_collected(item.locator.group_id, &seq_id);
            if seq_id.generation == generation {
                if collectible {
                    return Err(DepotError::Invariant(format!(
                        "id {} of the current generation was handed to collection before commit",
                        seq_id
                    )));
                }
                advanced.extend(self.ledger.mark_committed(request.agent_id, &seq_id));
            } else if collectible {
                tracing::info!(agent_id = request.agent_id, %seq_id, %key, "commit lost a generation race");
                statuses.push(CommitStatus::Error("generation race".to_string()));
                continue;
            }

            if let Some(id) = key.blob_id() {
                let relation = self.barriers.relation(id);
                if relation.under_hard {
                    statuses.push(CommitStatus::Error(format!("blob {} is under the hard barrier", id)));
                    continue;
                }
                let retained = self
                    .data
                    .find(&key)
                    .map_or(false, |value| value.keep_state == KeepState::Keep);
                if relation.under_soft && !retained {
                    statuses.push(CommitStatus::Error(format!("blob {} is under the soft barrier", id)));
                    continue;
                }
            }

            self.data
                .commit_key(key, item.locator, item.meta.clone(), &self.barriers, batch)?;
            statuses.push(CommitStatus::Ok);
        }

        Ok(CommitAttempt::Complete { statuses, advanced })
    }

    pub(super) fn finish_commit(
        &mut self,
        request: &CommitRequest,
        statuses: Vec<CommitStatus>,
        advanced: Vec<SequenceId>,
    ) {
        let committed = statuses.iter().filter(|status| status.is_ok()).count();
        tracing::debug!(
            agent_id = request.agent_id,
            request_id = request.request_id,
            items = statuses.len(),
            committed,
            "commit complete"
        );
        for least_expected in advanced {
            self.outputs.push(DepotOutput::LeastExpectedAdvanced {
                channel: least_expected.channel,
                least_expected,
            });
        }
        self.outputs.push(DepotOutput::ToAgent {
            agent_id: request.agent_id,
            envelope: Envelope::new(
                request.request_id,
                DepotMessage::CommitBlobSeqResult { items: statuses },
            ),
        });
    }
}
