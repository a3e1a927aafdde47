//! In-memory key map
//!
//! The depot's working copy of the index. Keys up to `last_loaded_key` are
//! known to be complete in memory; beyond it memory only holds what commits
//! and resolves have touched. Every mutation goes through [`Data::update_key`],
//! which enforces the barrier rules and records the matching index
//! operation into the caller's batch.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{DepotError, Result};
use crate::types::{BlobId, BlobLocator, GenStep, KeepState, Key, KeyMode, Value, ValueSegment};
use crate::wal::Operation;

use super::barrier::BarrierServer;
use super::decommit::AssimilatedBlob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Change,
    NoChange,
    Drop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFlags {
    pub include_begin: bool,
    pub include_end: bool,
    pub reverse: bool,
}

pub struct Data {
    key_mode: KeyMode,
    entries: BTreeMap<Key, Value>,
    last_loaded_key: Option<Key>,
    loaded: bool,
}

impl Data {
    pub fn new(key_mode: KeyMode) -> Self {
        Self {
            key_mode,
            entries: BTreeMap::new(),
            last_loaded_key: None,
            loaded: false,
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        self.key_mode
    }

    pub fn parse_key(&self, bytes: &[u8]) -> Result<Key> {
        Key::from_binary(bytes, self.key_mode)
    }

    pub fn find(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_loaded_key(&self) -> Option<&Key> {
        self.last_loaded_key.as_ref()
    }

    pub fn set_last_loaded_key(&mut self, key: Key) {
        self.last_loaded_key = Some(key);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_loaded(&mut self) {
        self.loaded = true;
    }

    /// Whether memory is authoritative for `key`
    pub fn covers(&self, key: &Key) -> bool {
        self.loaded || self.last_loaded_key.as_ref().map_or(false, |last| key <= last)
    }

    /// Visit keys in `[begin, end]` (inclusion per `flags`) in scan order
    /// until the callback returns false
    pub fn scan_range<F>(&self, begin: Option<&Key>, end: Option<&Key>, flags: ScanFlags, mut callback: F)
    where
        F: FnMut(&Key, &Value) -> bool,
    {
        if let (Some(b), Some(e)) = (begin, end) {
            if b > e || (b == e && !(flags.include_begin && flags.include_end)) {
                return;
            }
        }
        let lower = match begin {
            None => Bound::Unbounded,
            Some(k) if flags.include_begin => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
        };
        let upper = match end {
            None => Bound::Unbounded,
            Some(k) if flags.include_end => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
        };

        let range = self.entries.range::<Key, _>((lower, upper));
        if flags.reverse {
            for (key, value) in range.rev() {
                if !callback(key, value) {
                    return;
                }
            }
        } else {
            for (key, value) in range {
                if !callback(key, value) {
                    return;
                }
            }
        }
    }

    /// Keys of blob ids owned by (tablet, channel) with gen/step in
    /// `(after, through]`
    pub fn blob_keys_between(
        &self,
        tablet_id: u64,
        channel: u8,
        after: Option<GenStep>,
        through: GenStep,
    ) -> Vec<(Key, KeepState)> {
        let first = Key::Blob(BlobId::min_for(tablet_id));
        let last = Key::Blob(BlobId::max_for(tablet_id));
        let mut out = Vec::new();
        self.scan_range(
            Some(&first),
            Some(&last),
            ScanFlags {
                include_begin: true,
                include_end: true,
                reverse: false,
            },
            |key, value| {
                if let Some(id) = key.blob_id() {
                    let gen_step = id.gen_step();
                    if id.channel == channel
                        && gen_step <= through
                        && after.map_or(true, |a| gen_step > a)
                    {
                        out.push((key.clone(), value.keep_state));
                    }
                }
                true
            },
        );
        out
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or update `key`
    ///
    /// - under a barrier a missing key is only created when it is retained
    ///   and the barrier is soft
    /// - an existing key under a hard barrier, or under a soft barrier
    ///   without `Keep`, must already have been dropped by the barrier shift
    /// - after the update a key under a soft barrier that is not `Keep` is
    ///   dropped
    ///
    /// Returns whether anything changed.
    pub fn update_key<I, U>(
        &mut self,
        key: Key,
        barriers: &BarrierServer,
        batch: &mut Vec<Operation>,
        insert: I,
        update: U,
    ) -> Result<bool>
    where
        I: FnOnce() -> (Value, UpdateOutcome),
        U: FnOnce(&mut Value) -> UpdateOutcome,
    {
        let relation = key
            .blob_id()
            .map(|id| barriers.relation(id))
            .unwrap_or_default();

        let (value, outcome) = match self.entries.get_mut(&key) {
            Some(existing) => {
                if relation.under_hard
                    || (relation.under_soft && existing.keep_state != KeepState::Keep)
                {
                    return Err(DepotError::Invariant(format!(
                        "key {} survived its barrier with keep state {:?}",
                        key, existing.keep_state
                    )));
                }
                let outcome = update(existing);
                (existing.clone(), outcome)
            }
            None => {
                let (value, outcome) = insert();
                if relation.under_hard
                    || (relation.under_soft && value.keep_state != KeepState::Keep)
                {
                    tracing::debug!(%key, "not creating key beyond the barrier");
                    return Ok(false);
                }
                self.entries.insert(key.clone(), value.clone());
                (value, outcome)
            }
        };

        let outcome = if relation.under_soft && value.keep_state != KeepState::Keep {
            UpdateOutcome::Drop
        } else {
            outcome
        };

        match outcome {
            UpdateOutcome::Drop => {
                self.entries.remove(&key);
                batch.push(Operation::Delete {
                    key: key.to_binary(),
                });
                Ok(true)
            }
            UpdateOutcome::Change => {
                batch.push(Operation::Upsert {
                    key: key.to_binary(),
                    value: value.encode()?,
                });
                Ok(true)
            }
            UpdateOutcome::NoChange => Ok(false),
        }
    }

    /// Point `key` at a freshly committed blob
    pub fn commit_key(
        &mut self,
        key: Key,
        locator: BlobLocator,
        meta: Vec<u8>,
        barriers: &BarrierServer,
        batch: &mut Vec<Operation>,
    ) -> Result<bool> {
        tracing::debug!(%key, seq_id = %locator.seq_id, "commit key");
        let initial = Value::from_locator(locator, meta.clone());
        self.update_key(
            key,
            barriers,
            batch,
            || (initial, UpdateOutcome::Change),
            |value| {
                value.meta = meta;
                value.value_chain = vec![ValueSegment::whole(locator)];
                value.original_blob = None;
                UpdateOutcome::Change
            },
        )
    }

    /// Merge a row read from the durable index into memory
    ///
    /// A new key is not written back; a row refused by the barrier rules is
    /// deleted from the index.
    pub fn add_data_on_load(
        &mut self,
        key: Key,
        bytes: &[u8],
        barriers: &BarrierServer,
        batch: &mut Vec<Operation>,
    ) -> Result<()> {
        let loaded = Value::decode(bytes)?;
        let existed = self.entries.contains_key(&key);
        let binary = key.to_binary();

        let merge_source = loaded.clone();
        self.update_key(
            key.clone(),
            barriers,
            batch,
            || (loaded, UpdateOutcome::NoChange),
            |value| {
                let before = value.clone();
                value.merge_loaded(merge_source);
                if *value == before {
                    UpdateOutcome::NoChange
                } else {
                    UpdateOutcome::Change
                }
            },
        )?;

        if !existed && !self.entries.contains_key(&key) {
            tracing::debug!(%key, "dropping loaded row beyond the barrier");
            batch.push(Operation::Delete { key: binary });
        }
        Ok(())
    }

    /// Record a blob imported from the predecessor group
    pub fn add_data_on_decommit(
        &mut self,
        blob: &AssimilatedBlob,
        barriers: &BarrierServer,
        batch: &mut Vec<Operation>,
    ) -> Result<bool> {
        let raise = |value: &mut Value| {
            if blob.do_not_keep {
                value.keep_state = value.keep_state.max(KeepState::DoNotKeep);
            } else if blob.keep {
                value.keep_state = value.keep_state.max(KeepState::Keep);
            }
            if value.value_chain.is_empty() {
                value.original_blob = Some(blob.id);
            }
        };

        tracing::debug!(blob_id = %blob.id, keep = blob.keep, do_not_keep = blob.do_not_keep, "add data on decommit");
        self.update_key(
            Key::Blob(blob.id),
            barriers,
            batch,
            || {
                let mut value = Value::default();
                raise(&mut value);
                (value, UpdateOutcome::Change)
            },
            |value| {
                raise(value);
                UpdateOutcome::Change
            },
        )
    }

    /// Raise the keep state of `key`; never lowers it
    pub fn update_keep_state(
        &mut self,
        key: Key,
        keep_state: KeepState,
        barriers: &BarrierServer,
        batch: &mut Vec<Operation>,
    ) -> Result<bool> {
        tracing::debug!(%key, ?keep_state, "update keep state");
        self.update_key(
            key,
            barriers,
            batch,
            || {
                let value = Value {
                    keep_state,
                    ..Value::default()
                };
                (value, UpdateOutcome::Change)
            },
            |value| {
                if value.keep_state < keep_state {
                    value.keep_state = keep_state;
                    UpdateOutcome::Change
                } else {
                    UpdateOutcome::NoChange
                }
            },
        )
    }

    pub fn delete_key(&mut self, key: &Key, batch: &mut Vec<Operation>) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        tracing::debug!(%key, "delete key");
        batch.push(Operation::Delete {
            key: key.to_binary(),
        });
        true
    }
}
