use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::Key;

/// Per-node metadata describing which contiguous key sub-ranges each
/// child position is responsible for. Only populated at the level
/// immediately above the deepest level, where it is the hook for
/// adaptive columnar storage ("column cracking") in the children.
///
/// The storage contract is fixed: serializable block, keyed by child
/// position, ordered list of inclusive ranges. The policy that populates
/// it is not — the default policy records one range per child covering
/// the child's whole key range (no cracking, all columns together).
/// A workload-adaptive policy would call `record_column_range` with
/// finer splits instead.
///
/// Block format (all integers big-endian):
/// ```text
/// [group count(4B)]
///   per group: [position(4B)][range count(4B)] then [low(8B)][high(8B)]…
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnGroupMap {
    groups: BTreeMap<u32, Vec<(Key, Key)>>,
}

impl ColumnGroupMap {
    pub fn new() -> Self {
        ColumnGroupMap::default()
    }

    /// Append a sub-range entry under a child position.
    pub fn record_column_range(&mut self, child_position: u32, low: Key, high: Key) {
        self.groups
            .entry(child_position)
            .or_default()
            .push((low, high));
    }

    /// Child positions holding columns for `key`, in position order.
    pub fn lookup(&self, key: Key) -> Vec<u32> {
        self.groups
            .iter()
            .filter(|(_, ranges)| ranges.iter().any(|&(lo, hi)| lo <= key && key <= hi))
            .map(|(&pos, _)| pos)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of child positions with recorded ranges.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Serialize the map. The node log framing prepends the 4-byte
    /// big-endian block length.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.groups.len() as u32).to_be_bytes());
        for (pos, ranges) in &self.groups {
            buf.extend_from_slice(&pos.to_be_bytes());
            buf.extend_from_slice(&(ranges.len() as u32).to_be_bytes());
            for &(lo, hi) in ranges {
                buf.extend_from_slice(&lo.to_be_bytes());
                buf.extend_from_slice(&hi.to_be_bytes());
            }
        }
        buf
    }

    /// Deserialize a map from a block. Exact inverse of `encode`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("column-group block too short".into()));
        }
        let group_count = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;

        let mut groups = BTreeMap::new();
        let mut offset = 4usize;
        for _ in 0..group_count {
            if data.len() < offset + 8 {
                return Err(Error::Corruption(
                    "column-group entry header truncated".into(),
                ));
            }
            let pos = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
            let range_count =
                u32::from_be_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += 8;

            if data.len() < offset + range_count * 16 {
                return Err(Error::Corruption("column-group ranges truncated".into()));
            }
            let mut ranges = Vec::with_capacity(range_count);
            for _ in 0..range_count {
                let lo = Key::from_be_bytes(data[offset..offset + 8].try_into().unwrap());
                let hi = Key::from_be_bytes(data[offset + 8..offset + 16].try_into().unwrap());
                ranges.push((lo, hi));
                offset += 16;
            }
            groups.insert(pos, ranges);
        }
        if offset != data.len() {
            return Err(Error::Corruption(
                "trailing bytes after column-group block".into(),
            ));
        }
        Ok(ColumnGroupMap { groups })
    }
}
