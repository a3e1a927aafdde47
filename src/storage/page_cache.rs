//! Page Cache
//!
//! Bounded set of resident table pages with least-recently-used eviction.
//! Accessing a page that is not resident records it as a pending fault; the
//! owner of the scan later calls `StorageManager::load_pending` and retries.
//!
//! Pages read since the last load are the working set of the attempt that
//! faulted. Loading never evicts them, so the rerun of that attempt finds
//! every page it needs even when its working set exceeds the capacity.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::sstable::Page;

pub struct PageCache {
    capacity: usize,
    /// page number → (page, last access tick)
    resident: HashMap<usize, (Arc<Page>, u64)>,
    /// last access tick → page number
    lru: BTreeMap<u64, usize>,
    tick: u64,
    /// Pages requested by faulted scans and not yet loaded
    pending: BTreeSet<usize>,
    /// Pages hit since the last load
    touched: BTreeSet<usize>,
    faults: u64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            resident: HashMap::new(),
            lru: BTreeMap::new(),
            tick: 0,
            pending: BTreeSet::new(),
            touched: BTreeSet::new(),
            faults: 0,
        }
    }

    /// Resident page, refreshing its recency
    pub fn get(&mut self, page_no: usize) -> Option<Arc<Page>> {
        self.tick += 1;
        let tick = self.tick;
        let (page, last) = self.resident.get_mut(&page_no)?;
        self.lru.remove(&*last);
        *last = tick;
        self.lru.insert(tick, page_no);
        self.touched.insert(page_no);
        Some(Arc::clone(page))
    }

    /// Record a fault on a page that is not resident
    pub fn request(&mut self, page_no: usize) {
        self.faults += 1;
        self.pending.insert(page_no);
    }

    pub fn take_pending(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn insert(&mut self, page_no: usize, page: Page) {
        self.forget(page_no);
        while self.resident.len() >= self.capacity {
            let Some((_, victim)) = self.lru.pop_first() else {
                break;
            };
            self.resident.remove(&victim);
        }
        self.place(page_no, page);
    }

    /// Make the pages a faulted attempt asked for resident
    ///
    /// Only pages outside the working set are evicted to make room; the
    /// cache may exceed its capacity until the next load.
    pub fn insert_loaded(&mut self, pages: Vec<(usize, Page)>) {
        let working_set = std::mem::take(&mut self.touched);
        for (page_no, _) in &pages {
            self.forget(*page_no);
        }

        let victims: Vec<usize> = self
            .lru
            .values()
            .copied()
            .filter(|page_no| !working_set.contains(page_no))
            .collect();
        for victim in victims {
            if self.resident.len() + pages.len() <= self.capacity {
                break;
            }
            self.forget(victim);
        }

        for (page_no, page) in pages {
            self.place(page_no, page);
        }
    }

    fn place(&mut self, page_no: usize, page: Page) {
        self.tick += 1;
        self.resident.insert(page_no, (Arc::new(page), self.tick));
        self.lru.insert(self.tick, page_no);
    }

    fn forget(&mut self, page_no: usize) {
        if let Some((_, last)) = self.resident.remove(&page_no) {
            self.lru.remove(&last);
        }
    }

    /// Drop everything; page numbers of a replaced table mean nothing
    pub fn clear(&mut self) {
        self.resident.clear();
        self.lru.clear();
        self.pending.clear();
        self.touched.clear();
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Total faults recorded since creation
    pub fn fault_count(&self) -> u64 {
        self.faults
    }
}
