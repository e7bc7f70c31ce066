use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bloom::BloomFilter;
use crate::colgroup::ColumnGroupMap;
use crate::error::{Error, Result};
use crate::types::{Key, Record};

/// Codec for a node's log file.
///
/// Byte layout (all lengths big-endian 4-byte unsigned):
/// ```text
/// ┌──────────────────────┬──────────────────────────┐
/// │ filter length (4B)   │ filter block             │
/// ├──────────────────────┼──────────────────────────┤
/// │ col-group length (4B)│ column-group block       │
/// ├──────────────────────┴──────────────────────────┤
/// │ data block — runs to end of file:               │
/// │ [crc32(4B)][entry count(4B)]                    │
/// │ per entry: [key(8B)][record length(4B)][record] │
/// └─────────────────────────────────────────────────┘
/// ```
///
/// The data block has no trailing length because it runs to end-of-file;
/// its CRC covers everything after the CRC field. A length prefix that
/// overruns the file, a CRC mismatch, or a failed decode surfaces as
/// `Corruption` — never a fabricated result.
pub struct LogContents {
    pub bloom: BloomFilter,
    pub groups: ColumnGroupMap,
    pub data: BTreeMap<Key, Record>,
}

/// Read only the filter block — enough to reject an absent key without
/// touching the rest of the file. `Ok(None)` if the file does not exist.
pub fn read_filter(path: &Path) -> Result<Option<BloomFilter>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file_size = file.metadata()?.len();
    if file_size < 4 {
        return Err(Error::Corruption(
            "file too short for filter block length".into(),
        ));
    }
    let len = file.read_u32::<BigEndian>()?;
    if file_size - 4 < len as u64 {
        return Err(Error::Corruption(
            "filter block length overruns file".into(),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    BloomFilter::decode(&buf).map(Some)
}

/// Load the whole log file: filter, column-group map, and data map.
/// `Ok(None)` if the file does not exist.
pub fn read_log(path: &Path) -> Result<Option<LogContents>> {
    let raw = match fs::read(path) {
        Ok(r) => r,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let (filter_bytes, rest) = split_block(&raw, "filter")?;
    let bloom = BloomFilter::decode(filter_bytes)?;

    let (group_bytes, rest) = split_block(rest, "column-group")?;
    let groups = ColumnGroupMap::decode(group_bytes)?;

    if rest.len() < 8 {
        return Err(Error::Corruption("data block too short".into()));
    }
    let stored_crc = u32::from_be_bytes(rest[0..4].try_into().unwrap());
    let payload = &rest[4..];
    if crc32fast::hash(payload) != stored_crc {
        return Err(Error::Corruption("data block CRC mismatch".into()));
    }

    let count = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut data = BTreeMap::new();
    let mut offset = 4usize;
    for _ in 0..count {
        if payload.len() < offset + 12 {
            return Err(Error::Corruption("data entry header truncated".into()));
        }
        let key = Key::from_be_bytes(payload[offset..offset + 8].try_into().unwrap());
        let rec_len =
            u32::from_be_bytes(payload[offset + 8..offset + 12].try_into().unwrap()) as usize;
        offset += 12;
        if payload.len() < offset + rec_len {
            return Err(Error::Corruption("data entry record truncated".into()));
        }
        let record = Record::decode(&payload[offset..offset + rec_len])?;
        offset += rec_len;
        data.insert(key, record);
    }
    if offset != payload.len() {
        return Err(Error::Corruption("trailing bytes after data block".into()));
    }

    Ok(Some(LogContents { bloom, groups, data }))
}

/// Persist a node's state: filter block, column-group block, data block,
/// in that fixed order.
///
/// Crash-safety and reader-atomicity: the new file is written to a temp
/// path and fsync'd, the previous file (if any) is kept reachable at the
/// backup path, and the temp file is renamed over the log path last. A
/// concurrent reader sees either the old file or the new one, never a
/// partial write; after a crash mid-write the backup still holds the
/// prior consistent state.
pub fn write_log(
    path: &Path,
    backup: &Path,
    bloom: &BloomFilter,
    groups: &ColumnGroupMap,
    data: &BTreeMap<Key, Record>,
) -> Result<()> {
    let tmp = path.with_extension("log.tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);

        let filter_block = bloom.encode();
        writer.write_u32::<BigEndian>(filter_block.len() as u32)?;
        writer.write_all(&filter_block)?;

        let group_block = groups.encode();
        writer.write_u32::<BigEndian>(group_block.len() as u32)?;
        writer.write_all(&group_block)?;

        let mut payload = Vec::new();
        payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
        for (key, record) in data {
            payload.extend_from_slice(&key.to_be_bytes());
            let rec = record.encode();
            payload.extend_from_slice(&(rec.len() as u32).to_be_bytes());
            payload.extend_from_slice(&rec);
        }
        writer.write_u32::<BigEndian>(crc32fast::hash(&payload))?;
        writer.write_all(&payload)?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if path.exists() {
        // Previous state must stay reachable at the backup path while
        // the swap happens.
        let _ = fs::remove_file(backup);
        fs::hard_link(path, backup)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Split off one length-prefixed block, returning (block, remainder).
fn split_block<'a>(data: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if data.len() < 4 {
        return Err(Error::Corruption(format!(
            "file too short for {what} block length"
        )));
    }
    let len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    if data.len() - 4 < len {
        return Err(Error::Corruption(format!(
            "{what} block length overruns file"
        )));
    }
    Ok((&data[4..4 + len], &data[4 + len..]))
}
