//! Resolve Engine
//!
//! Resumable range scan over the in-memory tail and the durable index.
//!
//! ## One Attempt
//! ```text
//!   loaded? ──yes──► pack from memory ──► Complete(pages)
//!      │no
//!      ▼
//!   for each item from cursor.item_index:
//!     1. part of the range ≤ last_loaded_key: count from memory, narrow
//!     2. rest: step the durable index, pulling rows into memory
//!          Fault + progress    ──► Continue(cursor)   (successor tx)
//!          Fault, no progress  ──► NotReady           (rerun same cursor)
//!   pack from memory ──► Complete(pages)
//! ```
//!
//! Packing never splits a key: a page that would overflow
//! `max_message_size` is closed with `Overrun` and a new page is opened.

use std::ops::Bound;
use std::time::Instant;

use crate::engine::{IndexEngine, ScanStep};
use crate::error::Result;
use crate::protocol::{DepotMessage, ResolveItem, ResolveStatus, ResolvedChainItem, ResolvedKey};
use crate::types::{Key, Value};
use crate::wal::Operation;

use super::barrier::BarrierServer;
use super::data::{Data, ScanFlags};
use super::ledger::AgentId;

/// A resolve as received from an agent
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub agent_id: AgentId,
    pub request_id: u64,
    pub items: Vec<ResolveItem>,
    pub received_at: Instant,
}

impl ResolveRequest {
    pub fn new(agent_id: AgentId, request_id: u64, items: Vec<ResolveItem>) -> Self {
        Self {
            agent_id,
            request_id,
            items,
            received_at: Instant::now(),
        }
    }
}

/// Where an attempt starts; every attempt gets its own copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveCursor {
    pub item_index: usize,
    pub last_scanned_key: Option<Key>,
    /// Keys counted so far for the current item
    pub keys_read: u32,
}

impl ResolveCursor {
    fn next_item(&self) -> Self {
        Self {
            item_index: self.item_index + 1,
            last_scanned_key: None,
            keys_read: 0,
        }
    }
}

#[derive(Debug)]
pub enum ResolveAttempt {
    Complete(Vec<DepotMessage>),
    /// Partial progress was made; continue in a successor
    Continue(ResolveCursor),
    /// Nothing was read; rerun from the same cursor once pages are loaded
    NotReady,
}

/// Read-only collaborators of an attempt
pub struct ResolveEnv<'a> {
    pub engine: &'a IndexEngine,
    pub barriers: &'a BarrierServer,
    pub tablet_id: u64,
    pub decommit_group_id: Option<u32>,
    pub max_message_size: usize,
}

#[derive(Debug, Clone)]
struct ParsedItem {
    begin: Option<Key>,
    end: Option<Key>,
    flags: ScanFlags,
    max_keys: u32,
    cookie: Option<u64>,
}

fn parse_items(data: &Data, items: &[ResolveItem]) -> Result<Vec<ParsedItem>> {
    items
        .iter()
        .map(|item| {
            let parse = |bytes: &Option<Vec<u8>>| bytes.as_deref().map(|b| data.parse_key(b)).transpose();
            Ok(ParsedItem {
                begin: parse(&item.begin_key)?,
                end: parse(&item.end_key)?,
                flags: ScanFlags {
                    include_begin: item.include_beginning,
                    include_end: item.include_ending,
                    reverse: item.reverse,
                },
                max_keys: item.max_keys,
                cookie: item.cookie,
            })
        })
        .collect()
}

/// Run one attempt of `request` starting at `start`
///
/// Rows pulled from the index are merged into `data`; index side effects
/// are appended to `batch`.
pub fn execute(
    request: &ResolveRequest,
    start: &ResolveCursor,
    data: &mut Data,
    env: &ResolveEnv<'_>,
    batch: &mut Vec<Operation>,
) -> Result<ResolveAttempt> {
    let items = match parse_items(data, &request.items) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(request_id = request.request_id, error = %e, "malformed resolve");
            return Ok(ResolveAttempt::Complete(vec![DepotMessage::resolve_error(
                format!("malformed key: {}", e),
            )]));
        }
    };

    tracing::debug!(
        agent_id = request.agent_id,
        request_id = request.request_id,
        item_index = start.item_index,
        last_scanned_key = ?start.last_scanned_key,
        "resolve attempt"
    );

    if data.is_loaded() {
        return Ok(ResolveAttempt::Complete(generate_response(request, &items, data, env)?));
    }

    let mut cursor = start.clone();
    let mut progress = false;

    while let Some(item) = items.get(cursor.item_index) {
        let mut begin = item.begin.clone();
        let mut end = item.end.clone();
        let mut flags = item.flags;

        if let Some(last) = &cursor.last_scanned_key {
            if flags.reverse {
                end = Some(last.clone());
                flags.include_end = false;
            } else {
                begin = Some(last.clone());
                flags.include_begin = false;
            }
        }

        if let Some(last_loaded) = data.last_loaded_key().cloned() {
            if end.as_ref().map_or(false, |e| *e <= last_loaded) {
                // fully contained in memory
                cursor = cursor.next_item();
                continue;
            }
            if begin.as_ref().map_or(true, |b| *b <= last_loaded) {
                if !flags.reverse {
                    let mut satisfied = false;
                    data.scan_range(
                        begin.as_ref(),
                        Some(&last_loaded),
                        ScanFlags {
                            include_end: true,
                            ..flags
                        },
                        |key, _| {
                            cursor.last_scanned_key = Some(key.clone());
                            cursor.keys_read += 1;
                            satisfied = cursor.keys_read == item.max_keys;
                            !satisfied
                        },
                    );
                    if satisfied {
                        cursor = cursor.next_item();
                        continue;
                    }
                }
                begin = Some(last_loaded);
                flags.include_begin = false;
            }
        }

        let mut lower = key_bound(begin.as_ref(), flags.include_begin);
        let mut upper = key_bound(end.as_ref(), flags.include_end);
        loop {
            match env
                .engine
                .next_row(as_slice(&lower), as_slice(&upper), flags.reverse)?
            {
                ScanStep::Row(key_bytes, value_bytes) => {
                    let key = data.parse_key(&key_bytes)?;
                    progress = true;
                    data.add_data_on_load(key.clone(), &value_bytes, env.barriers, batch)?;
                    cursor.last_scanned_key = Some(key);
                    if flags.reverse {
                        upper = Bound::Excluded(key_bytes);
                    } else {
                        lower = Bound::Excluded(key_bytes);
                    }
                    cursor.keys_read += 1;
                    if cursor.keys_read == item.max_keys {
                        break;
                    }
                }
                ScanStep::End => break,
                ScanStep::Fault if progress => {
                    tracing::debug!(
                        request_id = request.request_id,
                        item_index = cursor.item_index,
                        "page fault after progress, continuing in successor"
                    );
                    return Ok(ResolveAttempt::Continue(cursor));
                }
                ScanStep::Fault => return Ok(ResolveAttempt::NotReady),
            }
        }
        cursor = cursor.next_item();
    }

    Ok(ResolveAttempt::Complete(generate_response(request, &items, data, env)?))
}

fn key_bound(key: Option<&Key>, inclusive: bool) -> Bound<Vec<u8>> {
    match key {
        None => Bound::Unbounded,
        Some(k) if inclusive => Bound::Included(k.to_binary()),
        Some(k) => Bound::Excluded(k.to_binary()),
    }
}

fn as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

// =============================================================================
// Packing
// =============================================================================

/// Pages accumulated for one response
struct Outbox {
    max_message_size: usize,
    empty_page_size: usize,
    pages: Vec<(ResolveStatus, Vec<ResolvedKey>)>,
    last_page_size: usize,
}

impl Outbox {
    fn new(max_message_size: usize) -> Result<Self> {
        let empty = DepotMessage::ResolveResult {
            status: ResolveStatus::Ok,
            resolved_keys: Vec::new(),
        };
        Ok(Self {
            max_message_size,
            empty_page_size: bincode::serialized_size(&empty)? as usize,
            pages: Vec::new(),
            last_page_size: 0,
        })
    }

    /// Append `item`, opening a new page when it would overflow the current one
    ///
    /// A single key larger than `max_message_size` still gets a page of its
    /// own; such a page exceeds the limit.
    fn push(&mut self, item: ResolvedKey) -> Result<()> {
        let item_size = bincode::serialized_size(&item)? as usize;
        if self.pages.is_empty() || self.last_page_size + item_size > self.max_message_size {
            if let Some(last) = self.pages.last_mut() {
                last.0 = ResolveStatus::Overrun;
            }
            self.pages.push((ResolveStatus::Ok, Vec::new()));
            self.last_page_size = self.empty_page_size;
        }
        if let Some(last) = self.pages.last_mut() {
            last.1.push(item);
        }
        self.last_page_size += item_size;
        Ok(())
    }

    fn into_messages(mut self) -> Vec<DepotMessage> {
        if self.pages.is_empty() {
            self.pages.push((ResolveStatus::Ok, Vec::new()));
        }
        self.pages
            .into_iter()
            .map(|(status, resolved_keys)| DepotMessage::ResolveResult {
                status,
                resolved_keys,
            })
            .collect()
    }
}

fn generate_response(
    request: &ResolveRequest,
    items: &[ParsedItem],
    data: &Data,
    env: &ResolveEnv<'_>,
) -> Result<Vec<DepotMessage>> {
    let mut outbox = Outbox::new(env.max_message_size)?;

    for item in items {
        let mut matched: Vec<(Key, Value)> = Vec::new();
        let mut remaining = item.max_keys;
        data.scan_range(item.begin.as_ref(), item.end.as_ref(), item.flags, |key, value| {
            matched.push((key.clone(), value.clone()));
            if item.max_keys == 0 {
                return true;
            }
            remaining -= 1;
            remaining != 0
        });

        for (key, value) in matched {
            let resolved = resolved_key(item.cookie, &key, &value, env);
            if resolved.value_chain.is_empty() {
                tracing::warn!(
                    agent_id = request.agent_id,
                    request_id = request.request_id,
                    %key,
                    ?value,
                    "empty value chain on resolve"
                );
            }
            outbox.push(resolved)?;
        }
    }

    let pages = outbox.into_messages();
    tracing::debug!(
        request_id = request.request_id,
        pages = pages.len(),
        "resolve complete"
    );
    Ok(pages)
}

fn resolved_key(cookie: Option<u64>, key: &Key, value: &Value, env: &ResolveEnv<'_>) -> ResolvedKey {
    let mut value_chain: Vec<ResolvedChainItem> = value
        .value_chain
        .iter()
        .filter(|segment| !segment.is_empty())
        .map(|segment| ResolvedChainItem {
            group_id: segment.locator.group_id,
            blob_id: segment.locator.blob_id(env.tablet_id),
            subrange_begin: segment.subrange_begin,
            subrange_end: segment.subrange_end,
        })
        .collect();

    if let Some(original) = value.original_blob {
        value_chain.push(ResolvedChainItem {
            group_id: env.decommit_group_id.unwrap_or_default(),
            blob_id: original,
            subrange_begin: 0,
            subrange_end: original.blob_size,
        });
    }

    ResolvedKey {
        cookie,
        key: key.to_binary(),
        value_chain,
        meta: value.meta.clone(),
    }
}
