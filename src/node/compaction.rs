//! Compaction side of a node: pulling persisted state into the
//! workspace, distributing it to children, cascading depth-first, and
//! persisting the result.

use parking_lot::MutexGuard;
use tracing::{debug, info};

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::node::{Node, NodeState};

impl Node {
    /// Load this node's persisted state into memory: the filter replaces
    /// the in-memory filter, the data map replaces the workspace. No-op
    /// for a node that has never been written. Used only as a prelude to
    /// compaction.
    pub(crate) fn read_whole_file(&self, state: &mut NodeState) -> Result<()> {
        if let Some(contents) = super::log::read_log(&self.log_path())? {
            state.bloom = contents.bloom;
            state.groups = contents.groups;
            state.workspace = contents.data;
        }
        Ok(())
    }

    /// Persist the workspace as this node's new log file, then clear it.
    ///
    /// The filter rebuild policy runs here. A node's filter vouches for
    /// its own data map and for every key that cascaded into its
    /// subtree; re-insertion of keys the node shed earlier keeps
    /// inflating the insertion count, and once the estimated
    /// false-positive rate drifts past twice the configured target the
    /// filter is rebuilt from the workspace (the data map about to be
    /// persisted) plus the persisted data maps of the whole subtree —
    /// descendant files are current at this point because a cascade
    /// writes children before the parent is rewritten.
    pub(crate) fn write_to_file(&self, state: &mut NodeState) -> Result<()> {
        if state.bloom.needs_rebuild() {
            let mut rebuilt = BloomFilter::new(self.width(), self.fp_prob())?;
            for key in state.workspace.keys() {
                rebuilt.insert(&key.to_be_bytes());
            }
            self.add_subtree_keys(&mut rebuilt)?;
            info!(
                level = self.level(),
                position = self.position(),
                estimated_fpr = state.bloom.estimated_fpr(),
                keys = rebuilt.items_added(),
                "rebuilding membership filter"
            );
            state.bloom = rebuilt;
        }

        super::log::write_log(
            &self.log_path(),
            &self.backup_path(),
            &state.bloom,
            &state.groups,
            &state.workspace,
        )?;
        state.workspace.clear();
        Ok(())
    }

    /// Feed every key persisted anywhere in the subtree below this node
    /// into `filter`. Each descendant file is visited once; compaction
    /// runs on a single worker, so the files cannot change underneath.
    fn add_subtree_keys(&self, filter: &mut BloomFilter) -> Result<()> {
        for child in self.children() {
            if let Some(contents) = super::log::read_log(&child.log_path())? {
                for key in contents.data.keys() {
                    filter.insert(&key.to_be_bytes());
                }
            }
            child.add_subtree_keys(filter)?;
        }
        Ok(())
    }

    /// Cascading compaction: push every workspace entry down to the
    /// owning child, then service children in position order — a child
    /// that reached capacity cascades depth-first before its siblings
    /// are examined. Finally every touched child is persisted.
    ///
    /// A touched child is written even when its own cascade emptied its
    /// workspace: the rewrite is what removes the moved keys from this
    /// level's file, keeping each key in exactly one persisted data map.
    /// Children at the deepest level cannot cascade and simply absorb
    /// the overflow.
    ///
    /// Caller must hold this node's state lock; child locks are taken
    /// here (parent before child, always), which is what makes at most
    /// one cascade active per node.
    pub(crate) fn compact_down(&self, state: &mut NodeState) -> Result<()> {
        debug_assert!(
            !self.is_leaf(),
            "compact_down precondition: node has children"
        );
        if self.is_leaf() {
            return Ok(());
        }

        let entries = std::mem::take(&mut state.workspace);
        debug!(
            level = self.level(),
            position = self.position(),
            entries = entries.len(),
            "cascading compaction"
        );

        let mut guards: Vec<Option<MutexGuard<'_, NodeState>>> =
            self.children().iter().map(|_| None).collect();

        for (key, record) in entries {
            let idx = self.child_index(key);
            let child = &self.children()[idx];
            if guards[idx].is_none() {
                let mut guard = child.state.lock();
                child.read_whole_file(&mut *guard)?;
                guards[idx] = Some(guard);
            }
            if let Some(guard) = guards[idx].as_mut() {
                if !guard.workspace.contains_key(&key) {
                    guard.bloom.insert(&key.to_be_bytes());
                }
                guard.workspace.insert(key, record);
            }
        }

        // Service children in position order; a full child may cascade
        // several levels before its sibling is processed.
        for (child, guard) in self.children().iter().zip(guards.iter_mut()) {
            if let Some(guard) = guard.as_mut() {
                if guard.workspace.len() >= child.capacity() && !child.is_leaf() {
                    child.compact_down(&mut **guard)?;
                }
            }
        }

        for (child, guard) in self.children().iter().zip(guards.iter_mut()) {
            if let Some(guard) = guard.as_mut() {
                child.write_to_file(&mut **guard)?;
            }
        }
        Ok(())
    }
}
