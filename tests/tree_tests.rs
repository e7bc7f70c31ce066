// End-to-end behavior of the engine surface: the reference workload,
// flush-at-capacity, overwrite semantics, projection, validation, and
// persistence across reopen.

use std::fs;
use std::path::{Path, PathBuf};

use lsm_hybrid::{Error, LsmTree, Options, Record};

fn record_for(key: u64) -> Record {
    Record::new(
        4,
        vec![
            (0, format!("{key}1").into_bytes()),
            (1, format!("{key}2").into_bytes()),
            (2, format!("{key}3").into_bytes()),
            (3, format!("{key}4").into_bytes()),
        ],
    )
    .unwrap()
}

/// All `data.log` files under `root`, nested node directories included.
fn collect_logs(root: &Path) -> Vec<PathBuf> {
    let mut logs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|n| n == "data.log") {
                logs.push(path);
            }
        }
    }
    logs
}

// =============================================================================
// Reference workload: [1,1000], fan-out 10, 3 levels, capacity 50
// =============================================================================
#[test]
fn reference_workload_reads_back_every_write() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(Options::new(dir.path().join("lsm")).capacity(50)).unwrap();

    let keys = [25u64, 26, 44, 77, 12, 66, 82, 21, 96, 5];
    for &key in &keys {
        tree.write(key, record_for(key)).unwrap();
    }

    for &key in &keys {
        let found = tree.read(key, &[]).unwrap();
        assert_eq!(found, Some(record_for(key)), "key {key}");
    }

    // Never written — a definitive miss, not an error
    assert_eq!(tree.read(28, &[]).unwrap(), None);
}

#[test]
fn flush_at_capacity_drains_buffer_to_level_0() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("lsm");
    let tree = LsmTree::open(Options::new(&root).capacity(50)).unwrap();

    // 50 distinct keys spread across the range: the 50th write swaps
    // the buffer and hands it to the compaction worker
    let keys: Vec<u64> = (1..=50).map(|i| i * 20).collect();
    for &key in &keys {
        tree.write(key, record_for(key)).unwrap();
    }
    tree.sync().unwrap();

    let stats = tree.stats();
    assert_eq!(stats.buffered_entries, 0, "buffer must drain after flush");
    assert_eq!(stats.frozen_buffers, 0, "flushed buffer must be retired");

    // At least one level-0 log exists with flushed keys in it
    let level0_keys: Vec<u64> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().path().join("data.log"))
        .filter(|p| p.exists())
        .filter_map(|p| lsm_hybrid::node::log::read_log(&p).unwrap())
        .flat_map(|c| c.data.keys().copied().collect::<Vec<_>>())
        .collect();
    assert!(!level0_keys.is_empty(), "flush must populate level-0 logs");

    // The union of every persisted data map is exactly the written set
    let mut persisted: Vec<u64> = collect_logs(&root)
        .iter()
        .filter_map(|p| lsm_hybrid::node::log::read_log(p).unwrap())
        .flat_map(|c| c.data.keys().copied().collect::<Vec<_>>())
        .collect();
    persisted.sort_unstable();
    assert_eq!(persisted, keys);

    // And every key still reads back through the engine
    for &key in &keys {
        assert_eq!(tree.read(key, &[]).unwrap(), Some(record_for(key)));
    }
}

#[test]
fn overwrite_before_flush_keeps_last_value_only() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(Options::new(dir.path().join("lsm")).capacity(50)).unwrap();

    let first = Record::new(4, vec![(0, b"old".to_vec())]).unwrap();
    let second = Record::new(4, vec![(0, b"new".to_vec())]).unwrap();

    tree.write(7, first).unwrap();
    tree.write(7, second.clone()).unwrap();

    assert_eq!(tree.read(7, &[]).unwrap(), Some(second));
    assert_eq!(tree.stats().buffered_entries, 1, "upsert must not duplicate");
}

#[test]
fn read_projects_requested_columns() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(Options::new(dir.path().join("lsm")).capacity(50)).unwrap();

    tree.write(12, record_for(12)).unwrap();

    let projected = tree.read(12, &[1, 3]).unwrap().unwrap();
    assert_eq!(projected.get(1), Some(format!("{}2", 12).as_bytes()));
    assert_eq!(projected.get(3), Some(format!("{}4", 12).as_bytes()));
    assert_eq!(projected.get(0), None);
    assert_eq!(projected.get(2), None);
}

#[test]
fn projection_also_applies_to_persisted_records() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(Options::new(dir.path().join("lsm")).capacity(5)).unwrap();

    for key in 1..=5u64 {
        tree.write(key, record_for(key)).unwrap();
    }
    tree.sync().unwrap();
    assert_eq!(tree.stats().buffered_entries, 0);

    let projected = tree.read(3, &[0]).unwrap().unwrap();
    assert_eq!(projected.columns().len(), 1);
    assert_eq!(projected.get(0), Some(format!("{}1", 3).as_bytes()));
}

#[test]
fn out_of_range_write_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(
        Options::new(dir.path().join("lsm")).key_range(1, 100).capacity(10),
    )
    .unwrap();

    assert!(matches!(
        tree.write(0, record_for(0)),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        tree.write(101, record_for(101)),
        Err(Error::InvalidParameter(_))
    ));

    // Out-of-range reads are just misses
    assert_eq!(tree.read(101, &[]).unwrap(), None);
}

#[test]
fn mismatched_column_count_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(Options::new(dir.path().join("lsm")).capacity(10)).unwrap();

    let two_col = Record::new(2, vec![(0, b"x".to_vec())]).unwrap();
    assert!(matches!(
        tree.write(5, two_col),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn bad_options_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = || Options::new(dir.path().join("lsm"));

    assert!(LsmTree::open(base().key_range(10, 5)).is_err());
    assert!(LsmTree::open(base().fan_out(0)).is_err());
    assert!(LsmTree::open(base().levels(0)).is_err());
    assert!(LsmTree::open(base().fp_prob(0.0)).is_err());
    assert!(LsmTree::open(base().fp_prob(1.5)).is_err());
    assert!(LsmTree::open(base().num_columns(0)).is_err());
}

#[test]
fn tree_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("lsm");
    let opts = Options::new(&root).capacity(10);

    {
        let tree = LsmTree::open(opts.clone()).unwrap();
        for key in 1..=10u64 {
            tree.write(key, record_for(key)).unwrap();
        }
        tree.sync().unwrap();
        assert_eq!(tree.stats().buffered_entries, 0);
    } // drop closes the worker

    let reopened = LsmTree::open(opts).unwrap();
    for key in 1..=10u64 {
        assert_eq!(
            reopened.read(key, &[]).unwrap(),
            Some(record_for(key)),
            "key {key} must survive a restart"
        );
    }
    assert_eq!(reopened.read(999, &[]).unwrap(), None);
}

#[test]
fn directory_layout_encodes_level_order_and_group() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("lsm");
    let _tree = LsmTree::open(
        Options::new(&root).key_range(1, 100).fan_out(4).levels(2).capacity(10),
    )
    .unwrap();

    // Level 0 nodes sit directly under the root, children nest below
    assert!(root.join("lv-0.kr-1.cg-1").is_dir());
    assert!(root.join("lv-0.kr-4.cg-1").is_dir());
    assert!(root.join("lv-0.kr-2.cg-1").join("lv-1.kr-3.cg-1").is_dir());
}
