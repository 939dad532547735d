//! Content-addressed storage of compiled document files and hash-chain traversal.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::document::DocumentFile;
use crate::error::{Error, Result};
use crate::ids::DocumentHash;

/// Content-addressed store of compiled document files, keyed by [`DocumentHash::of`].
pub trait DocumentStore {
    /// Store `compiled` and return its hash. Storing the same content twice is a no-op.
    fn put(&mut self, compiled: &str) -> Result<DocumentHash>;
    fn get(&self, hash: &DocumentHash) -> Result<Option<String>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryDocumentStore {
    blocks: HashMap<DocumentHash, String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Overwrite the block stored under `hash` without rehashing.
    pub fn insert_raw(&mut self, hash: DocumentHash, content: String) {
        self.blocks.insert(hash, content);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn put(&mut self, compiled: &str) -> Result<DocumentHash> {
        let hash = DocumentHash::of(compiled);
        self.blocks
            .entry(hash.clone())
            .or_insert_with(|| compiled.to_owned());
        Ok(hash)
    }

    fn get(&self, hash: &DocumentHash) -> Result<Option<String>> {
        Ok(self.blocks.get(hash).cloned())
    }
}

/// Follow `previous_hash` links from `head` and return the verified files root-first.
///
/// Signature failures surface as [`Error::SignatureInvalid`]; every other problem with the
/// chain (missing block, content that does not match its key, a cycle, a block that does not
/// parse) is [`Error::ChainCorrupt`].
pub fn fetch_chain<D: DocumentStore + ?Sized>(
    head: &DocumentHash,
    documents: &D,
) -> Result<Vec<DocumentFile>> {
    let mut files: Vec<DocumentFile> = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(head.clone());
    while let Some(hash) = next {
        if !seen.insert(hash.clone()) {
            return Err(Error::ChainCorrupt(format!("cycle at block {hash}")));
        }
        let compiled = documents
            .get(&hash)?
            .ok_or_else(|| Error::ChainCorrupt(format!("missing block {hash}")))?;
        if DocumentHash::of(&compiled) != hash {
            return Err(Error::ChainCorrupt(format!(
                "block {hash} does not match its content"
            )));
        }
        let file = DocumentFile::read(compiled.as_bytes()).map_err(|e| match e {
            Error::SignatureInvalid(_) => e,
            other => Error::ChainCorrupt(format!("block {hash}: {other}")),
        })?;
        if let Some(first) = files.first() {
            if first.home_document() != file.home_document() {
                return Err(Error::ChainCorrupt(format!(
                    "block {hash} belongs to {} instead of {}",
                    file.home_document(),
                    first.home_document()
                )));
            }
        }
        debug!(block = %hash, ops = file.ops().len(), "fetched document block");
        next = file.previous_hash().cloned();
        files.push(file);
    }
    files.reverse();
    info!(head = %head, blocks = files.len(), "fetched document chain");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::document::DocumentFileBuilder;
    use crate::ids::Identifier;

    fn home() -> Identifier {
        Identifier::new("ted://1.999.0.56831.0.1924.1.1")
    }

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3; 32])
    }

    fn publish(
        store: &mut MemoryDocumentStore,
        home: Identifier,
        text: &str,
        previous: Option<DocumentHash>,
    ) -> DocumentHash {
        let mut builder = DocumentFileBuilder::new(home);
        builder.append_text(text);
        if let Some(previous) = previous {
            builder.previous_hash(previous);
        }
        let compiled = builder.build().compile(&key()).unwrap();
        store.put(&compiled).unwrap()
    }

    #[test]
    fn chain_is_returned_root_first() {
        let mut store = MemoryDocumentStore::new();
        let a = publish(&mut store, home(), "a", None);
        let b = publish(&mut store, home(), "b", Some(a));
        let c = publish(&mut store, home(), "c", Some(b));
        let texts: Vec<String> = fetch_chain(&c, &store)
            .unwrap()
            .iter()
            .map(|f| f.text().to_owned())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_block_is_corrupt() {
        let mut store = MemoryDocumentStore::new();
        let head = publish(&mut store, home(), "b", Some(DocumentHash::new("gone")));
        assert!(matches!(
            fetch_chain(&head, &store),
            Err(Error::ChainCorrupt(_))
        ));
    }

    #[test]
    fn substituted_block_is_corrupt() {
        let mut store = MemoryDocumentStore::new();
        let a = publish(&mut store, home(), "a", None);
        let other = DocumentFileBuilder::new(home())
            .build()
            .compile(&key())
            .unwrap();
        store.insert_raw(a.clone(), other);
        assert!(matches!(fetch_chain(&a, &store), Err(Error::ChainCorrupt(_))));
    }

    #[test]
    fn mixed_home_documents_are_corrupt() {
        let mut store = MemoryDocumentStore::new();
        let a = publish(&mut store, Identifier::new("ted://other"), "a", None);
        let b = publish(&mut store, home(), "b", Some(a));
        assert!(matches!(fetch_chain(&b, &store), Err(Error::ChainCorrupt(_))));
    }

    #[test]
    fn unsigned_garbage_keeps_signature_error() {
        let mut store = MemoryDocumentStore::new();
        let head = store.put("a.b.c").unwrap();
        assert!(matches!(
            fetch_chain(&head, &store),
            Err(Error::SignatureInvalid(_))
        ));
    }
}
