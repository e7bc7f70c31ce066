use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::buffer::MemBuffer;
use crate::error::{Error, Result};
use crate::node::{Node, NodeConfig};
use crate::types::{Key, Record};

/// Configuration for an LSM tree, threaded through construction.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory of the tree; node directories nest under it.
    pub dir: PathBuf,
    /// Inclusive key range served by the tree.
    pub key_low: Key,
    pub key_high: Key,
    /// Children per node.
    pub fan_out: u32,
    /// On-disk levels (level 0 through `levels - 1`).
    pub levels: u32,
    /// Target false-positive probability for every node's filter.
    pub fp_prob: f64,
    /// Column count agreed for every record.
    pub num_columns: u32,
    /// Buffer/node capacity override. `None` uses
    /// `ceil(range_width / fan_out^levels)`.
    pub capacity: Option<usize>,
}

impl Options {
    /// Defaults mirror the reference workload: keys `[1, 1000]`,
    /// fan-out 10, 3 levels, 5% filters, 4 columns.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Options {
            dir: dir.into(),
            key_low: 1,
            key_high: 1000,
            fan_out: 10,
            levels: 3,
            fp_prob: 0.05,
            num_columns: 4,
            capacity: None,
        }
    }

    pub fn key_range(mut self, low: Key, high: Key) -> Self {
        self.key_low = low;
        self.key_high = high;
        self
    }

    pub fn fan_out(mut self, fan_out: u32) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn fp_prob(mut self, fp_prob: f64) -> Self {
        self.fp_prob = fp_prob;
        self
    }

    pub fn num_columns(mut self, num_columns: u32) -> Self {
        self.num_columns = num_columns;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn validate(&self) -> Result<u64> {
        let width = self
            .key_high
            .checked_sub(self.key_low)
            .and_then(|d| d.checked_add(1))
            .ok_or_else(|| Error::InvalidParameter("empty or inverted key range".into()))?;
        if self.fan_out == 0 {
            return Err(Error::InvalidParameter("fan-out must be at least 1".into()));
        }
        if self.levels == 0 {
            return Err(Error::InvalidParameter("tree needs at least one level".into()));
        }
        if !(self.fp_prob > 0.0 && self.fp_prob < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "filter probability must be in (0, 1), got {}",
                self.fp_prob
            )));
        }
        if self.num_columns == 0 {
            return Err(Error::InvalidParameter("column count must be at least 1".into()));
        }
        Ok(width)
    }

    /// Effective per-node (and buffer) capacity.
    fn effective_capacity(&self, width: u64) -> usize {
        match self.capacity {
            Some(c) => c.max(1),
            None => {
                let denom = (self.fan_out as u64)
                    .checked_pow(self.levels)
                    .unwrap_or(u64::MAX);
                width.div_ceil(denom).max(1) as usize
            }
        }
    }
}

/// Counters exposed for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Entries in the active write buffer.
    pub buffered_entries: usize,
    /// Swapped-out buffers awaiting (or undergoing) flush.
    pub frozen_buffers: usize,
}

enum Job {
    Flush(Arc<HashMap<Key, Record>>),
    Sync(Sender<Result<()>>),
}

/// A disk-backed key/value store: memory buffer on top, `levels` tiers
/// of nodes below, cascading compaction in between.
///
/// Writes land in the buffer under a short-held lock; when the buffer
/// reaches capacity it is swapped for an empty one and handed to a
/// dedicated compaction worker over a channel, so writers only ever
/// block for the swap, never for disk I/O. Reads check the buffer, then
/// walk the node path for the key, stopping at the first filter-approved
/// hit.
///
/// The tree persists purely through the file system: reopening a tree
/// over an existing directory serves every key settled there.
pub struct LsmTree {
    key_low: Key,
    key_high: Key,
    num_columns: u32,
    child_width: u64,
    buffer: Arc<MemBuffer>,
    children: Arc<Vec<Node>>,
    job_tx: Option<Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl LsmTree {
    /// Open (or create) a tree rooted at `opts.dir`.
    pub fn open(opts: Options) -> Result<LsmTree> {
        let width = opts.validate()?;
        let capacity = opts.effective_capacity(width);
        fs::create_dir_all(&opts.dir)?;

        let cfg = NodeConfig {
            fan_out: opts.fan_out,
            total_levels: opts.levels,
            capacity,
            fp_prob: opts.fp_prob,
        };
        let child_width = width.div_ceil(opts.fan_out as u64);
        let mut children = Vec::new();
        let mut lo = opts.key_low;
        for i in 0..opts.fan_out {
            if lo > opts.key_high {
                break;
            }
            let hi = opts.key_high.min(lo + child_width - 1);
            let dir = opts.dir.join(format!("lv-0.kr-{}.cg-1", i + 1));
            children.push(Node::build(&cfg, lo, hi, 0, i + 1, 1, dir)?);
            lo = hi + 1;
        }

        let children = Arc::new(children);
        let buffer = Arc::new(MemBuffer::new(capacity));
        let (job_tx, job_rx) = crossbeam_channel::unbounded();

        let worker = {
            let children = Arc::clone(&children);
            let buffer = Arc::clone(&buffer);
            let key_low = opts.key_low;
            thread::Builder::new()
                .name("lsm-compaction".into())
                .spawn(move || worker_loop(job_rx, &children, &buffer, key_low, child_width))?
        };

        Ok(LsmTree {
            key_low: opts.key_low,
            key_high: opts.key_high,
            num_columns: opts.num_columns,
            child_width,
            buffer,
            children,
            job_tx: Some(job_tx),
            worker: Some(worker),
        })
    }

    /// Upsert a record under `key`. May hand a full buffer to the
    /// compaction worker, but never waits for disk I/O itself.
    pub fn write(&self, key: Key, record: Record) -> Result<()> {
        if key < self.key_low || key > self.key_high {
            return Err(Error::InvalidParameter(format!(
                "key {} outside tree range [{}, {}]",
                key, self.key_low, self.key_high
            )));
        }
        if record.num_columns() != self.num_columns {
            return Err(Error::InvalidParameter(format!(
                "record declares {} columns, tree stores {}",
                record.num_columns(),
                self.num_columns
            )));
        }

        if let Some(frozen) = self.buffer.write(key, record)? {
            self.send(Job::Flush(frozen))?;
        }
        Ok(())
    }

    /// Point lookup, optionally projected onto `requested` columns
    /// (empty = all). `Ok(None)` is a definitive miss, not an error.
    pub fn read(&self, key: Key, requested: &[u32]) -> Result<Option<Record>> {
        if key < self.key_low || key > self.key_high {
            return Ok(None);
        }
        if let Some(record) = self.buffer.get(key) {
            return Ok(Some(record.project(requested)));
        }
        let idx = ((key - self.key_low) / self.child_width) as usize;
        self.children[idx].read(key, requested)
    }

    /// Block until every handed-off flush has completed, surfacing the
    /// first worker error if one occurred.
    pub fn sync(&self) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(Job::Sync(reply_tx))?;
        reply_rx.recv().map_err(|_| worker_gone())?
    }

    /// Buffer occupancy counters.
    pub fn stats(&self) -> Stats {
        Stats {
            buffered_entries: self.buffer.active_len(),
            frozen_buffers: self.buffer.frozen_len(),
        }
    }

    fn send(&self, job: Job) -> Result<()> {
        self.job_tx
            .as_ref()
            .ok_or_else(worker_gone)?
            .send(job)
            .map_err(|_| worker_gone())
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain pending flushes and exit
        self.job_tx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_gone() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "compaction worker disconnected",
    ))
}

/// Dedicated compaction worker: processes flushes strictly in hand-off
/// order. A failed flush keeps its frozen buffer readable (and its keys
/// therefore visible) and is reported through the next `sync`.
fn worker_loop(
    jobs: Receiver<Job>,
    children: &[Node],
    buffer: &MemBuffer,
    key_low: Key,
    child_width: u64,
) {
    let mut first_error: Option<Error> = None;
    for job in jobs {
        match job {
            Job::Flush(frozen) => {
                debug!(entries = frozen.len(), "flushing buffer to level 0");
                match flush_into_children(children, key_low, child_width, &frozen) {
                    Ok(()) => buffer.retire(&frozen),
                    Err(e) => {
                        error!(error = %e, "flush failed; frozen buffer kept readable");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            Job::Sync(reply) => {
                let result = match first_error.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
        }
    }
}

/// Flush a swapped-out buffer into the level-0 nodes.
///
/// Every child's persisted state is pulled into its workspace first,
/// then each buffered key is distributed to its owning child (added to
/// the child's filter only when the child does not already hold it).
/// Children that reached capacity cascade depth-first; touched children
/// are persisted, untouched ones just drop their loaded workspace.
fn flush_into_children(
    children: &[Node],
    key_low: Key,
    child_width: u64,
    buffer: &HashMap<Key, Record>,
) -> Result<()> {
    let mut guards: Vec<_> = children.iter().map(|c| c.state.lock()).collect();
    for (child, guard) in children.iter().zip(guards.iter_mut()) {
        child.read_whole_file(&mut **guard)?;
    }

    let mut touched = vec![false; children.len()];
    for (&key, record) in buffer {
        let idx = ((key - key_low) / child_width) as usize;
        let state = &mut *guards[idx];
        if !state.workspace.contains_key(&key) {
            state.bloom.insert(&key.to_be_bytes());
        }
        state.workspace.insert(key, record.clone());
        touched[idx] = true;
    }

    for (i, child) in children.iter().enumerate() {
        if touched[i] && guards[i].workspace.len() >= child.capacity() && !child.is_leaf() {
            child.compact_down(&mut *guards[i])?;
        }
    }

    for (i, child) in children.iter().enumerate() {
        if touched[i] {
            child.write_to_file(&mut *guards[i])?;
        } else {
            guards[i].workspace.clear();
        }
    }
    Ok(())
}
