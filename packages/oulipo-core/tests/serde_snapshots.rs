#[cfg(feature = "serde")]
#[test]
fn stream_element_json_is_internally_tagged() {
    use oulipo_core::{Identifier, Overlay, StreamElement};
    use oulipo_test_support::ispan;

    let span = StreamElement::InvariantSpan(ispan(4, 5));
    let json = serde_json::to_value(&span).expect("serialize span");
    assert_eq!(json["type"], "invariant_span");
    assert_eq!(json["start"], 4);
    assert_eq!(json["width"], 5);
    assert_eq!(json["home"], "ted://1.999.0.56831.0.1924.1.1");

    let overlay = StreamElement::OverlaySpan(Overlay::tagged(3, [Identifier::new("ted://bold")]));
    let bytes = serde_json::to_vec(&overlay).expect("serialize overlay");
    let text = std::str::from_utf8(&bytes).expect("overlay JSON must be UTF-8");
    assert!(
        text.contains("\"overlay_span\"") && text.contains("ted://bold"),
        "expected a tagged overlay with its tags inline, got: {text}"
    );
    let roundtrip: StreamElement = serde_json::from_slice(&bytes).expect("deserialize overlay");
    assert_eq!(roundtrip, overlay);
}

#[cfg(feature = "serde")]
#[test]
fn json_snapshot_store_conforms() {
    use oulipo_core::JsonFileSnapshotStore;
    use oulipo_test_support::snapshot_store_conformance;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = JsonFileSnapshotStore::open(dir.path().join("streams")).expect("open store");
    snapshot_store_conformance(&mut store);
}

#[cfg(feature = "serde")]
#[test]
fn json_snapshots_survive_reopen_and_feed_the_cache() {
    use oulipo_core::{
        CacheConfig, JsonFileSnapshotStore, Machine, MemoryInvariantStore, StreamCache,
    };
    use oulipo_test_support::home;

    let dir = tempfile::tempdir().expect("tempdir");
    let config: CacheConfig = "maximumSize=1,expireAfterWrite=1h".parse().expect("config");
    {
        let store = JsonFileSnapshotStore::open(dir.path()).expect("open store");
        let mut cache = StreamCache::new(config, store);
        let streams = cache.take(&home()).expect("take");
        let mut machine =
            Machine::with_streams(MemoryInvariantStore::new(home()), streams).expect("machine");
        machine.insert(1, "kept on disk").expect("insert");
        cache.put_back(machine.into_streams()).expect("put back");
        cache.flush().expect("flush");
    }

    let digest = blake3::hash(home().as_str().as_bytes()).to_hex();
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            format!("{digest}-invariants.json"),
            format!("{digest}-overlays.json"),
        ]
    );

    let store = JsonFileSnapshotStore::open(dir.path()).expect("reopen store");
    let mut cache = StreamCache::new(config, store);
    let streams = cache.get(&home()).expect("reload");
    assert_eq!(streams.variant.character_count(), 12);
    assert_eq!(streams.overlay.character_count(), 12);
}

#[cfg(feature = "serde")]
#[test]
fn json_snapshots_keep_similar_homes_apart() {
    use oulipo_core::{
        Identifier, JsonFileSnapshotStore, SnapshotStore, StreamElement, StreamSnapshot,
    };
    use oulipo_test_support::ispan;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = JsonFileSnapshotStore::open(dir.path()).expect("open store");
    let slashes = Identifier::new("ted://a");
    let underscore = Identifier::new("ted:/_a");
    let first = StreamSnapshot {
        variant: vec![StreamElement::InvariantSpan(ispan(1, 3))],
        overlay: Vec::new(),
    };
    let second = StreamSnapshot {
        variant: vec![StreamElement::InvariantSpan(ispan(7, 2))],
        overlay: Vec::new(),
    };
    store.save(&slashes, &first).expect("save first");
    store.save(&underscore, &second).expect("save second");

    assert_eq!(store.load(&slashes).expect("load first"), Some(first));
    assert_eq!(store.load(&underscore).expect("load second"), Some(second));
}
