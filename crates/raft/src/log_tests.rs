use super::*;

fn entry(index: u64, term: u64) -> LogEntry {
    LogEntry { term, index, command_bytes: vec![index as u8] }
}

#[test]
fn mem_store_starts_empty() {
    let store = MemLogStore::new();
    assert_eq!(store.first_index(), 1);
    assert_eq!(store.last_index(), 0);
    assert!(store.get(1).is_none());
}

#[test]
fn append_then_get_round_trips() {
    let mut store = MemLogStore::new();
    store.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
    assert_eq!(store.last_index(), 3);
    assert_eq!(store.term_at(2), Some(1));
    assert_eq!(store.get(3).unwrap().term, 2);
}

#[test]
fn delete_from_drops_suffix() {
    let mut store = MemLogStore::new();
    store.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
    store.delete_from(2).unwrap();
    assert_eq!(store.last_index(), 1);
    assert!(store.get(2).is_none());
}

#[test]
fn compact_up_to_advances_first_index_and_preserves_included_term() {
    let mut store = MemLogStore::new();
    store.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
    store.compact_up_to(2, 1).unwrap();
    assert_eq!(store.last_included_index(), 2);
    assert_eq!(store.last_included_term(), 1);
    assert_eq!(store.term_at(2), Some(1));
    assert!(store.get(1).is_none());
    assert_eq!(store.last_index(), 3);
}

#[test]
fn file_store_reopens_with_entries_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");
    {
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(&[entry(1, 1), entry(2, 1)]).unwrap();
    }
    let store = FileLogStore::open(&path).unwrap();
    assert_eq!(store.last_index(), 2);
    assert_eq!(store.term_at(1), Some(1));
}

#[test]
fn file_store_delete_from_is_durable_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");
    {
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        store.delete_from(2).unwrap();
    }
    let store = FileLogStore::open(&path).unwrap();
    assert_eq!(store.last_index(), 1);
    assert!(store.get(2).is_none());
}

#[test]
fn file_store_compact_is_durable_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raft.log");
    {
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        store.compact_up_to(2, 1).unwrap();
    }
    let store = FileLogStore::open(&path).unwrap();
    assert_eq!(store.last_included_index(), 2);
    assert_eq!(store.last_index(), 3);
    assert!(store.get(1).is_none());
}
