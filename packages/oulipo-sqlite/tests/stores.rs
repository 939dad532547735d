use oulipo_core::{
    CacheConfig, DocumentStore, Identifier, Machine, MemoryInvariantStore, SnapshotStore,
    StreamCache,
};
use oulipo_sqlite::{SqliteDocumentStore, SqliteSnapshotStore};
use oulipo_test_support::{
    document_store_conformance, home, signing_key, snapshot_store_conformance, vspan,
};

#[test]
fn document_store_conforms() {
    let mut store = SqliteDocumentStore::new_in_memory().unwrap();
    document_store_conformance(&mut store);
}

#[test]
fn snapshot_store_conforms() {
    let mut store = SqliteSnapshotStore::new_in_memory().unwrap();
    snapshot_store_conformance(&mut store);
}

#[test]
fn published_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("documents.db");
    let path = path.to_str().unwrap();

    let head = {
        let mut documents = SqliteDocumentStore::new(path).unwrap();
        let mut machine = Machine::writable(MemoryInvariantStore::new(home()));
        machine.insert(1, "My first document").unwrap();
        machine.flush(&signing_key(4), &mut documents).unwrap();
        machine.delete_variant(vspan(4, 6)).unwrap();
        machine
            .flush(&signing_key(4), &mut documents)
            .unwrap()
            .unwrap()
    };

    let documents = SqliteDocumentStore::new(path).unwrap();
    assert!(documents.get(&head).unwrap().is_some());
    let loaded =
        Machine::load_document(&head, &documents, MemoryInvariantStore::new(home())).unwrap();
    assert_eq!(loaded.text().unwrap(), "My document");
}

#[test]
fn evicted_streams_reload_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.db");
    let path = path.to_str().unwrap();
    let other = Identifier::new("ted://1.999.0.2");

    {
        let snapshots = SqliteSnapshotStore::new(path).unwrap();
        let mut cache = StreamCache::new(
            CacheConfig {
                maximum_size: 1,
                ..CacheConfig::default()
            },
            snapshots,
        );
        let streams = cache.take(&home()).unwrap();
        let mut machine =
            Machine::with_streams(MemoryInvariantStore::new(home()), streams).unwrap();
        machine.insert(1, "Hello").unwrap();
        cache.put_back(machine.into_streams()).unwrap();
        let streams = cache.take(&other).unwrap();
        cache.put_back(streams).unwrap();
        cache.flush().unwrap();
    }

    let snapshots = SqliteSnapshotStore::new(path).unwrap();
    let snapshot = snapshots.load(&home()).unwrap().unwrap();
    assert_eq!(snapshot.variant.len(), 1);
    assert_eq!(snapshot.overlay.len(), 1);
}
