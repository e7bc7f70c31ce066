//! # LSM-Tree Storage Engine, Row/Column Hybrid
//!
//! A disk-backed key-value engine organized as a tree of nodes: a memory
//! buffer on top absorbs every write, and fixed levels of on-disk nodes
//! below hold the data, each node owning a contiguous slice of the key
//! range.
//!
//! ## Core idea
//! Writes pile up in the buffer; when it fills, the whole batch is
//! pushed one level down, and any node that overflows pushes its own
//! contents further down — cascading compaction. Reads route by key
//! arithmetic and bail out at the first node whose membership filter
//! says "definitely not here", so a miss usually costs one small header
//! read per level.
//!
//! Shallow levels store whole rows; the level above the deepest records,
//! per child, which key sub-ranges hold which columns — the hook for
//! adaptively splitting deep nodes into column groups as the workload
//! demands ("column cracking").

pub mod bloom;
pub mod buffer;
pub mod colgroup;
pub mod error;
pub mod node;
pub mod tree;
pub mod types;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use tree::{LsmTree, Options, Stats};
pub use types::{Key, Record};
