use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{Key, Record};

/// The tree's entry point: an in-memory buffer that absorbs every write.
///
/// Writers hold the lock only for the upsert. When an insert fills the
/// buffer to capacity, the full map is swapped out for an empty one in
/// the same critical section and parked in the frozen queue; the caller
/// hands it to the compaction worker. Frozen buffers stay readable until
/// the worker has made their contents durable, so a reader always finds
/// a recently written key somewhere — active buffer, frozen buffer, or a
/// node's log file.
pub struct MemBuffer {
    capacity: usize,
    active: Mutex<HashMap<Key, Record>>,
    frozen: Mutex<VecDeque<Arc<HashMap<Key, Record>>>>,
}

impl MemBuffer {
    pub fn new(capacity: usize) -> Self {
        MemBuffer {
            capacity,
            active: Mutex::new(HashMap::new()),
            frozen: Mutex::new(VecDeque::new()),
        }
    }

    /// Upsert; the last write for a key wins until the buffer flushes.
    ///
    /// Returns the frozen buffer when this write filled the active map
    /// to capacity — the caller must hand it to the compaction worker.
    /// Finding the buffer already at capacity means the swap discipline
    /// was broken; that write fails with `CapacityExceeded` instead of
    /// being dropped.
    pub fn write(&self, key: Key, record: Record) -> Result<Option<Arc<HashMap<Key, Record>>>> {
        let mut active = self.active.lock();
        if active.len() >= self.capacity {
            return Err(Error::CapacityExceeded);
        }
        active.insert(key, record);
        if active.len() >= self.capacity {
            let full = Arc::new(std::mem::take(&mut *active));
            self.frozen.lock().push_back(Arc::clone(&full));
            return Ok(Some(full));
        }
        Ok(None)
    }

    /// In-buffer lookup: active map first, then frozen buffers newest
    /// first (a key rewritten after a swap must read as the newer value).
    pub fn get(&self, key: Key) -> Option<Record> {
        if let Some(record) = self.active.lock().get(&key) {
            return Some(record.clone());
        }
        let frozen = self.frozen.lock();
        for buffer in frozen.iter().rev() {
            if let Some(record) = buffer.get(&key) {
                return Some(record.clone());
            }
        }
        None
    }

    /// Drop a frozen buffer once its contents are durable on disk.
    pub fn retire(&self, buffer: &Arc<HashMap<Key, Record>>) {
        let mut frozen = self.frozen.lock();
        if let Some(pos) = frozen.iter().position(|b| Arc::ptr_eq(b, buffer)) {
            frozen.remove(pos);
        }
    }

    /// Entries in the active buffer.
    pub fn active_len(&self) -> usize {
        self.active.lock().len()
    }

    /// Swapped-out buffers not yet durable.
    pub fn frozen_len(&self) -> usize {
        self.frozen.lock().len()
    }
}
