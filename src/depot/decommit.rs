//! Decommission fan-out / fan-in
//!
//! While the depot is replacing a predecessor group, ranges it has not
//! imported yet are fetched from that group before a resolve may run.
//!
//! ```text
//!   Resolve ──► plan ──► nothing missing ──────────────► resolve tx
//!                  │
//!                  └──► N RangeQuery (same fan-out id) ──► FanInContext{N}
//!   RangeResult ──► CommitRange tx ──► countdown
//!                        at zero: any error ──► "errors in range queries"
//!                                 otherwise ──► resolve tx
//! ```

use std::collections::BTreeMap;

use crate::error::{DepotError, Result};
use crate::protocol::ResolveItem;
use crate::types::{BlobId, Key, KeyMode};

use super::data::Data;
use super::resolve::ResolveRequest;

/// Range read against the predecessor group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Shared by every query of one resolve request
    pub fan_out_id: u64,
    pub group_id: u32,
    pub tablet_id: u64,
    pub min_id: BlobId,
    pub max_id: BlobId,
    pub must_restore_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeStatus {
    Ok,
    Error(String),
}

/// One blob found by a range read, with its retention flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssimilatedBlob {
    pub id: BlobId,
    pub keep: bool,
    pub do_not_keep: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResult {
    pub fan_out_id: u64,
    pub status: RangeStatus,
    pub blobs: Vec<AssimilatedBlob>,
}

impl RangeResult {
    pub fn ok(fan_out_id: u64, blobs: Vec<AssimilatedBlob>) -> Self {
        Self {
            fan_out_id,
            status: RangeStatus::Ok,
            blobs,
        }
    }

    pub fn error(fan_out_id: u64, reason: impl Into<String>) -> Self {
        Self {
            fan_out_id,
            status: RangeStatus::Error(reason.into()),
            blobs: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RangeStatus::Ok
    }
}

/// The predecessor storage group
pub trait StorageGroup {
    fn range(&mut self, query: &RangeQuery) -> RangeResult;
}

/// A resolve waiting for its range reads
#[derive(Debug)]
pub struct FanInContext {
    pub request: ResolveRequest,
    pub ranges_in_flight: u32,
    pub errors: bool,
}

/// What to do with an incoming resolve
#[derive(Debug)]
pub enum Plan {
    /// Everything needed is local
    Run(ResolveRequest),
    /// Queries were issued; the request waits in a fan-in context
    Deferred(Vec<RangeQuery>),
    /// Malformed request
    Reject(ResolveRequest, String),
}

/// What a finished range read means for its fan-in group
#[derive(Debug)]
pub enum FanInOutcome {
    /// Other reads are still outstanding
    Waiting,
    Ready(ResolveRequest),
    Failed(ResolveRequest),
    /// No context for this fan-out id
    Unknown,
}

#[derive(Debug)]
pub struct DecommitState {
    group_id: Option<u32>,
    finished: bool,
    /// High-water mark of what was imported in bulk
    last_assimilated: Option<BlobId>,
    last_range_id: u64,
    contexts: BTreeMap<u64, FanInContext>,
}

impl DecommitState {
    pub fn new(group_id: Option<u32>) -> Self {
        Self {
            group_id,
            finished: false,
            last_assimilated: None,
            last_range_id: 0,
            contexts: BTreeMap::new(),
        }
    }

    pub fn group_id(&self) -> Option<u32> {
        self.group_id
    }

    /// Decommission is configured and bulk import has not finished
    pub fn is_active(&self) -> bool {
        self.group_id.is_some() && !self.finished
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn last_assimilated(&self) -> Option<BlobId> {
        self.last_assimilated
    }

    pub fn set_last_assimilated(&mut self, id: BlobId) {
        self.last_assimilated = Some(self.last_assimilated.map_or(id, |prev| prev.max(id)));
    }

    pub fn pending_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Decide how to serve `request`
    pub fn plan(&mut self, data: &Data, request: ResolveRequest) -> Plan {
        let Some(group_id) = self.group_id.filter(|_| !self.finished) else {
            return Plan::Run(request);
        };

        let pending = match self.missing_ranges(data, &request) {
            Ok(pending) => pending,
            Err(reason) => return Plan::Reject(request, reason),
        };

        if pending.is_empty() {
            return Plan::Run(request);
        }

        self.last_range_id += 1;
        let fan_out_id = self.last_range_id;
        let queries: Vec<RangeQuery> = pending
            .into_iter()
            .map(|(tablet_id, must_restore_first, min_id, max_id)| {
                tracing::debug!(fan_out_id, tablet_id, %min_id, %max_id, must_restore_first, "querying predecessor range");
                RangeQuery {
                    fan_out_id,
                    group_id,
                    tablet_id,
                    min_id,
                    max_id,
                    must_restore_first,
                }
            })
            .collect();

        self.contexts.insert(
            fan_out_id,
            FanInContext {
                request,
                ranges_in_flight: queries.len() as u32,
                errors: false,
            },
        );
        Plan::Deferred(queries)
    }

    /// (tablet, must_restore_first, min, max) of every range still to import
    fn missing_ranges(
        &self,
        data: &Data,
        request: &ResolveRequest,
    ) -> std::result::Result<Vec<(u64, bool, BlobId, BlobId)>, String> {
        let mut pending = Vec::new();
        for item in &request.items {
            let Some(tablet_id) = item.tablet_id else {
                tracing::error!(request_id = request.request_id, ?item, "resolve item without tablet id while decommissioning");
                return Err("incorrect request".to_string());
            };

            if self
                .last_assimilated
                .map_or(false, |last| tablet_id < last.tablet_id)
            {
                continue;
            }

            let (mut min_id, max_id) = item_bounds(item, tablet_id, data.key_mode()).map_err(|e| {
                tracing::error!(request_id = request.request_id, error = %e, "malformed key in decommission resolve");
                "incorrect request".to_string()
            })?;

            if self.last_assimilated.map_or(true, |last| last < max_id) {
                if let Some(last) = self.last_assimilated {
                    if min_id < last {
                        min_id = last;
                    }
                }
                // a point query for a key already holding readable data
                if min_id == max_id
                    && data
                        .find(&Key::Blob(min_id))
                        .map_or(false, |value| !value.is_unreadable())
                {
                    continue;
                }
                pending.push((tablet_id, item.must_restore_first, min_id, max_id));
            }
        }
        Ok(pending)
    }

    /// Count one finished range read against its group
    pub fn on_range_done(&mut self, fan_out_id: u64, ok: bool) -> FanInOutcome {
        let Some(context) = self.contexts.get_mut(&fan_out_id) else {
            return FanInOutcome::Unknown;
        };
        if !ok {
            context.errors = true;
        }
        context.ranges_in_flight = context.ranges_in_flight.saturating_sub(1);
        if context.ranges_in_flight > 0 {
            return FanInOutcome::Waiting;
        }

        match self.contexts.remove(&fan_out_id) {
            Some(FanInContext {
                request,
                errors: true,
                ..
            }) => FanInOutcome::Failed(request),
            Some(FanInContext { request, .. }) => FanInOutcome::Ready(request),
            None => FanInOutcome::Unknown,
        }
    }
}

/// Blob-id bounds of an item's range within `tablet_id`
fn item_bounds(item: &ResolveItem, tablet_id: u64, key_mode: KeyMode) -> Result<(BlobId, BlobId)> {
    let blob_bound = |bytes: &Option<Vec<u8>>, default: BlobId| -> Result<BlobId> {
        match bytes {
            Some(bytes) => match Key::from_binary(bytes, key_mode)? {
                Key::Blob(id) => Ok(id),
                Key::Binary(_) => Err(DepotError::MalformedKey(
                    "decommission requires blob id keys".to_string(),
                )),
            },
            None => Ok(default),
        }
    };
    let min_id = blob_bound(&item.begin_key, BlobId::min_for(tablet_id))?;
    let max_id = blob_bound(&item.end_key, BlobId::max_for(tablet_id))?;
    if min_id.tablet_id != tablet_id || max_id.tablet_id != tablet_id {
        tracing::warn!(tablet_id, %min_id, %max_id, "resolve range crosses its tablet");
    }
    Ok((min_id, max_id))
}
