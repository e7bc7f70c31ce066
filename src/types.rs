use crate::error::{Error, Result};

/// Primary key. Keys are integers in a closed range fixed at tree
/// construction; every node owns a contiguous sub-range of it.
pub type Key = u64;

/// A stored row: an ordered list of `(column index, value)` pairs plus
/// the column count declared for the whole tree.
///
/// Rows at shallow levels always travel whole; the column list (rather
/// than a fixed-width tuple) is what lets deep levels hold a subset of
/// columns once a cracking policy splits them.
///
/// On-disk format (all integers big-endian):
/// ```text
/// ┌───────────────┬──────────────┬──────────────────────────────────┐
/// │ declared (4B) │ stored (4B)  │ per column:                      │
/// │               │              │ [index(4B)][val_len(4B)][value]  │
/// └───────────────┴──────────────┴──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    num_columns: u32,
    columns: Vec<(u32, Vec<u8>)>,
}

impl Record {
    /// Create a record. Column indices must be strictly increasing and
    /// below the declared column count.
    pub fn new(num_columns: u32, columns: Vec<(u32, Vec<u8>)>) -> Result<Self> {
        let mut prev: Option<u32> = None;
        for &(idx, _) in &columns {
            if idx >= num_columns {
                return Err(Error::InvalidParameter(format!(
                    "column index {} out of range (declared {})",
                    idx, num_columns
                )));
            }
            if prev.is_some_and(|p| p >= idx) {
                return Err(Error::InvalidParameter(
                    "column indices must be strictly increasing".into(),
                ));
            }
            prev = Some(idx);
        }
        Ok(Record { num_columns, columns })
    }

    /// Declared column count for the tree this record belongs to.
    pub fn num_columns(&self) -> u32 {
        self.num_columns
    }

    /// The `(column index, value)` pairs actually stored, in index order.
    pub fn columns(&self) -> &[(u32, Vec<u8>)] {
        &self.columns
    }

    /// Value of a single column, if stored.
    pub fn get(&self, column: u32) -> Option<&[u8]> {
        self.columns
            .iter()
            .find(|(idx, _)| *idx == column)
            .map(|(_, v)| v.as_slice())
    }

    /// Project onto the requested columns. An empty request means all
    /// columns; requested columns that are not stored are omitted.
    pub fn project(&self, requested: &[u32]) -> Record {
        if requested.is_empty() {
            return self.clone();
        }
        Record {
            num_columns: self.num_columns,
            columns: self
                .columns
                .iter()
                .filter(|(idx, _)| requested.contains(idx))
                .cloned()
                .collect(),
        }
    }

    /// Serialize this record to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.extend_from_slice(&self.num_columns.to_be_bytes());
        buf.extend_from_slice(&(self.columns.len() as u32).to_be_bytes());
        for (idx, value) in &self.columns {
            buf.extend_from_slice(&idx.to_be_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
            buf.extend_from_slice(value);
        }
        buf
    }

    /// Deserialize a record from a slice holding exactly one record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Corruption("record header too short".into()));
        }
        let num_columns = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let stored = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;

        let mut columns = Vec::with_capacity(stored);
        let mut offset = 8usize;
        for _ in 0..stored {
            if data.len() < offset + 8 {
                return Err(Error::Corruption("record column header truncated".into()));
            }
            let idx = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
            let val_len =
                u32::from_be_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += 8;
            if data.len() < offset + val_len {
                return Err(Error::Corruption("record column value truncated".into()));
            }
            columns.push((idx, data[offset..offset + val_len].to_vec()));
            offset += val_len;
        }
        if offset != data.len() {
            return Err(Error::Corruption("trailing bytes after record".into()));
        }
        Ok(Record { num_columns, columns })
    }

    /// Size of this record when serialized.
    pub fn encoded_size(&self) -> usize {
        8 + self
            .columns
            .iter()
            .map(|(_, v)| 8 + v.len())
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new(
            4,
            vec![
                (0, b"11".to_vec()),
                (1, b"12".to_vec()),
                (3, b"14".to_vec()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn roundtrip() {
        let rec = sample();
        let encoded = rec.encode();
        assert_eq!(encoded.len(), rec.encoded_size());
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn project_filters_columns() {
        let rec = sample();
        let projected = rec.project(&[1, 3]);
        assert_eq!(projected.get(1), Some(b"12".as_slice()));
        assert_eq!(projected.get(3), Some(b"14".as_slice()));
        assert_eq!(projected.get(0), None);

        // Empty request means all columns
        assert_eq!(rec.project(&[]), rec);
    }

    #[test]
    fn rejects_out_of_range_index() {
        assert!(Record::new(2, vec![(2, b"x".to_vec())]).is_err());
    }

    #[test]
    fn rejects_unordered_indices() {
        assert!(Record::new(4, vec![(1, b"a".to_vec()), (0, b"b".to_vec())]).is_err());
    }

    #[test]
    fn decode_rejects_truncated() {
        let mut encoded = sample().encode();
        encoded.truncate(encoded.len() - 1);
        assert!(Record::decode(&encoded).is_err());
    }
}
