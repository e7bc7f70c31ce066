pub mod log;

mod compaction;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::colgroup::ColumnGroupMap;
use crate::error::Result;
use crate::types::{Key, Record};

/// Per-tree construction parameters shared by every node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeConfig {
    pub fan_out: u32,
    pub total_levels: u32,
    pub capacity: usize,
    pub fp_prob: f64,
}

/// The recursive tree unit.
///
/// A node owns a contiguous key range, a membership filter, a
/// column-group map, one on-disk log file, and its child nodes. Sibling
/// ranges partition the parent's range with no gaps or overlaps
/// (ceiling-division of the parent width by the fan-out, last child
/// possibly narrower), so routing is pure arithmetic — no per-node
/// search, no back-pointers.
///
/// The routing fields are immutable after construction. Everything a
/// compaction mutates (filter, column-group map, workspace) sits behind
/// one `Mutex`, which doubles as the per-node compaction lock: at most
/// one cascade touches a node at a time, and parent locks are always
/// taken before child locks. Reads use only the immutable fields plus
/// the on-disk state, so they never contend with compaction.
pub struct Node {
    key_low: Key,
    key_high: Key,
    level: u32,
    position: u32,
    fan_out: u32,
    capacity: usize,
    fp_prob: f64,
    dir: PathBuf,
    children: Vec<Node>,
    pub(crate) state: Mutex<NodeState>,
}

/// The transient, compaction-only side of a node.
///
/// The workspace is populated only during compaction or flush and is
/// empty between operations; the in-memory filter and column-group map
/// are authoritative only while a compaction holds the lock (reads use
/// the persisted copies).
pub(crate) struct NodeState {
    pub(crate) bloom: BloomFilter,
    pub(crate) groups: ColumnGroupMap,
    pub(crate) workspace: BTreeMap<Key, Record>,
}

impl Node {
    /// Build a node and, recursively, its subtree down to the deepest
    /// level. Creates the node's directory. A node immediately above the
    /// deepest level records each child's key range in its column-group
    /// map (the default no-cracking policy: every child holds all
    /// columns for its range).
    pub(crate) fn build(
        cfg: &NodeConfig,
        key_low: Key,
        key_high: Key,
        level: u32,
        position: u32,
        group: u32,
        dir: PathBuf,
    ) -> Result<Node> {
        fs::create_dir_all(&dir)?;

        let width = key_high - key_low + 1;
        let bloom = BloomFilter::new(width, cfg.fp_prob)?;
        let mut groups = ColumnGroupMap::new();

        let mut children = Vec::new();
        if level + 1 < cfg.total_levels {
            let child_width = width.div_ceil(cfg.fan_out as u64);
            let mut lo = key_low;
            for i in 0..cfg.fan_out {
                if lo > key_high {
                    break;
                }
                let hi = key_high.min(lo + child_width - 1);
                let child_dir = dir.join(format!("lv-{}.kr-{}.cg-{}", level + 1, i + 1, group));
                children.push(Node::build(cfg, lo, hi, level + 1, i + 1, group, child_dir)?);
                if level + 2 == cfg.total_levels {
                    groups.record_column_range(i + 1, lo, hi);
                }
                lo = hi + 1;
            }
        }

        Ok(Node {
            key_low,
            key_high,
            level,
            position,
            fan_out: cfg.fan_out,
            capacity: cfg.capacity,
            fp_prob: cfg.fp_prob,
            dir,
            children,
            state: Mutex::new(NodeState {
                bloom,
                groups,
                workspace: BTreeMap::new(),
            }),
        })
    }

    /// Routed point lookup.
    ///
    /// 1. No log file → nothing was ever written under this range.
    /// 2. Filter header rejects the key → definitively absent, no
    ///    further I/O.
    /// 3. Full parse; key in the data map → done.
    /// 4. Filter false positive: descend into the owning child, or give
    ///    up at the deepest level.
    pub fn read(&self, key: Key, requested: &[u32]) -> Result<Option<Record>> {
        let path = self.log_path();

        let Some(filter) = log::read_filter(&path)? else {
            return Ok(None);
        };
        if !filter.may_contain(&key.to_be_bytes()) {
            return Ok(None);
        }

        if let Some(contents) = log::read_log(&path)? {
            if let Some(record) = contents.data.get(&key) {
                return Ok(Some(record.project(requested)));
            }
        }

        if self.children.is_empty() {
            return Ok(None);
        }
        self.children[self.child_index(key)].read(key, requested)
    }

    /// Index of the child owning `key`: `ceil((key - low + 1) / w) - 1`,
    /// which for integers is `(key - low) / w`.
    pub(crate) fn child_index(&self, key: Key) -> usize {
        ((key - self.key_low) / self.child_width()) as usize
    }

    /// Width each child covers: ceiling-division of this node's width
    /// by the fan-out.
    pub(crate) fn child_width(&self) -> u64 {
        self.width().div_ceil(self.fan_out as u64)
    }

    pub(crate) fn width(&self) -> u64 {
        self.key_high - self.key_low + 1
    }

    /// Inclusive key range this node owns.
    pub fn key_range(&self) -> (Key, Key) {
        (self.key_low, self.key_high)
    }

    /// 0-based tree level (the memory buffer is conceptually level −1).
    pub fn level(&self) -> u32 {
        self.level
    }

    /// 1-based position among siblings; mirrors the `kr-` path segment.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Max buffered records before a cascade is triggered.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether this node sits at the deepest level.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) fn fp_prob(&self) -> f64 {
        self.fp_prob
    }

    /// Path of this node's log file.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join("data.log")
    }

    /// Path the previous log file is kept at across a rewrite.
    pub fn backup_path(&self) -> PathBuf {
        self.dir.join("data.log.bak")
    }
}
