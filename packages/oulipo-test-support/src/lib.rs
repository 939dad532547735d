//! Fixtures and backend conformance suites shared by the workspace's tests.

use ed25519_dalek::SigningKey;
use oulipo_core::{
    DocumentFileBuilder, DocumentHash, DocumentStore, Identifier, InvariantSpan, Overlay,
    SnapshotStore, StreamElement, StreamSnapshot, VariantSpan, VariantStream,
};

pub const HOME: &str = "ted://1.999.0.56831.0.1924.1.1";

pub fn home() -> Identifier {
    Identifier::new(HOME)
}

/// Deterministic signing key; different seeds give different keys.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn ispan(start: u64, width: u64) -> InvariantSpan {
    InvariantSpan::new(start, width, home()).expect("valid invariant span")
}

pub fn vspan(start: u64, width: u64) -> VariantSpan {
    VariantSpan::new(start, width).expect("valid variant span")
}

/// The six spans `(100,6) (200,3) (250,2) (300,4) (350,1) (360,6)`, 22 characters in all.
pub fn fixture_spans() -> Vec<InvariantSpan> {
    [(100, 6), (200, 3), (250, 2), (300, 4), (350, 1), (360, 6)]
        .into_iter()
        .map(|(start, width)| ispan(start, width))
        .collect()
}

/// Stream built by putting each fixture span at the end, one at a time.
pub fn fixture_stream() -> VariantStream {
    let mut stream = VariantStream::new(home());
    for span in fixture_spans() {
        let to = stream.character_count() + 1;
        stream
            .put(to, StreamElement::InvariantSpan(span))
            .expect("append fixture span");
    }
    stream
}

/// `(start, width)` of every invariant span in `stream`, in order.
pub fn span_pairs(stream: &VariantStream) -> Vec<(u64, u64)> {
    stream
        .stream_elements()
        .into_iter()
        .filter_map(|element| match element {
            StreamElement::InvariantSpan(span) => Some((span.start, span.width)),
            _ => None,
        })
        .collect()
}

fn compiled(text: &str, previous: Option<DocumentHash>) -> String {
    let mut builder = DocumentFileBuilder::new(home());
    builder.append_text(text);
    if let Some(previous) = previous {
        builder.previous_hash(previous);
    }
    builder
        .build()
        .compile(&signing_key(1))
        .expect("compile document file")
}

/// Behaviour every [`DocumentStore`] must show.
pub fn document_store_conformance<D: DocumentStore>(store: &mut D) {
    let first = compiled("alpha", None);
    let hash = store.put(&first).expect("put first");
    assert_eq!(hash, DocumentHash::of(&first));
    assert_eq!(store.get(&hash).expect("get first").as_deref(), Some(first.as_str()));

    assert_eq!(store.put(&first).expect("put again"), hash);

    let second = compiled("beta", Some(hash.clone()));
    let next = store.put(&second).expect("put second");
    assert_ne!(next, hash);
    assert_eq!(store.get(&next).expect("get second"), Some(second));

    assert_eq!(
        store
            .get(&DocumentHash::new("no-such-block"))
            .expect("get missing"),
        None
    );
}

/// Behaviour every [`SnapshotStore`] must show.
pub fn snapshot_store_conformance<P: SnapshotStore>(store: &mut P) {
    let other = Identifier::new("ted://1.999.0.56831.0.1924.9.9");
    assert_eq!(store.load(&home()).expect("load missing"), None);

    let snapshot = StreamSnapshot {
        variant: fixture_spans()
            .into_iter()
            .map(StreamElement::InvariantSpan)
            .collect(),
        overlay: vec![
            StreamElement::OverlaySpan(Overlay::plain(10)),
            StreamElement::OverlaySpan(Overlay::tagged(12, [Identifier::new("ted://bold")])),
        ],
    };
    store.save(&home(), &snapshot).expect("save");
    assert_eq!(store.load(&home()).expect("load"), Some(snapshot.clone()));
    assert_eq!(store.load(&other).expect("load other"), None);

    let replaced = StreamSnapshot {
        variant: vec![StreamElement::InvariantSpan(ispan(1, 3))],
        overlay: Vec::new(),
    };
    store.save(&home(), &replaced).expect("save again");
    assert_eq!(store.load(&home()).expect("reload"), Some(replaced));
}
