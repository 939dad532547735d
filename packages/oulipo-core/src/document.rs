//! Signed, hash-chained document files.
//!
//! A document file records the ops applied to one home document since its predecessor, the
//! invariant text appended while they were made, and the pools of addresses and media hashes
//! the ops refer to by index. Compiled files are three base64url tokens joined by dots:
//! payload, public key hash, and signature.

use std::collections::HashMap;
use std::hash::Hash;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tracing::debug;

use crate::element::{MediaReference, OverlayMedia, TagSet};
use crate::error::{Error, Result};
use crate::ids::{DocumentHash, Identifier, MediaHash};
use crate::ops::{Op, PoolIndex};
use crate::span::{InvariantSpan, VariantSpan};
use crate::wire::{WireReader, WireWriter};

const MAGIC: [u8; 4] = [0xDA, 0xCE, 0xFA, 0xCE];
const VERSION: u16 = 0;

/// Hex-encoded blake3 hash of an Ed25519 public key, as carried in the middle token.
pub fn public_key_hash(key: &VerifyingKey) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Interning pool: first-seen value keeps its index.
#[derive(Clone, Debug)]
struct Pool<T> {
    values: Vec<T>,
    positions: HashMap<T, PoolIndex>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> Pool<T> {
    fn intern(&mut self, value: &T) -> PoolIndex {
        if let Some(&index) = self.positions.get(value) {
            return index;
        }
        let index = self.values.len();
        self.values.push(value.clone());
        self.positions.insert(value.clone(), index);
        index
    }

    fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Accumulates ops and appended text for one document file.
#[derive(Clone, Debug)]
pub struct DocumentFileBuilder {
    home: Identifier,
    previous: Option<DocumentHash>,
    addresses: Pool<Identifier>,
    media: Pool<MediaHash>,
    text: String,
    encrypted_text: String,
    ops: Vec<Op>,
}

impl DocumentFileBuilder {
    pub fn new(home: Identifier) -> Self {
        let mut addresses = Pool::default();
        addresses.intern(&home);
        Self {
            home,
            previous: None,
            addresses,
            media: Pool::default(),
            text: String::new(),
            encrypted_text: String::new(),
            ops: Vec::new(),
        }
    }

    pub fn home_document(&self) -> &Identifier {
        &self.home
    }

    /// True when nothing has been logged since the builder was created.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.text.is_empty() && self.encrypted_text.is_empty()
    }

    pub fn previous_hash(&mut self, hash: DocumentHash) -> &mut Self {
        self.previous = Some(hash);
        self
    }

    pub fn append_text(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn append_encrypted_text(&mut self, text: &str) -> &mut Self {
        self.encrypted_text.push_str(text);
        self
    }

    fn tag_indices(&mut self, tags: &TagSet) -> Vec<PoolIndex> {
        tags.iter().map(|tag| self.addresses.intern(tag)).collect()
    }

    fn push(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn apply_overlay(&mut self, span: VariantSpan, tags: &TagSet) -> &mut Self {
        let tags = self.tag_indices(tags);
        self.push(Op::ApplyOverlay { span, tags })
    }

    pub fn copy_variant(&mut self, to: u64, span: VariantSpan) -> &mut Self {
        self.push(Op::Copy { to, span })
    }

    pub fn delete_variant(&mut self, span: VariantSpan) -> &mut Self {
        self.push(Op::Delete { span })
    }

    pub fn insert_text(&mut self, to: u64, text: &str) -> &mut Self {
        self.push(Op::InsertText {
            to,
            text: text.to_owned(),
        })
    }

    pub fn move_variant(&mut self, to: u64, span: VariantSpan) -> &mut Self {
        self.push(Op::Move { to, span })
    }

    pub fn put(&mut self, to: u64, invariant_start: Option<u64>, width: u64) -> &mut Self {
        self.push(Op::Put {
            to,
            invariant_start,
            width,
        })
    }

    pub fn put_invariant_media(&mut self, to: u64, media: &MediaReference) -> &mut Self {
        let address = self.addresses.intern(&media.home);
        let media = self.media.intern(&media.hash);
        self.push(Op::PutInvariantMedia { to, media, address })
    }

    pub fn put_invariant_span(&mut self, to: u64, span: &InvariantSpan) -> &mut Self {
        let home = self.addresses.intern(&span.home);
        self.push(Op::PutInvariantSpan {
            to,
            invariant_start: span.start,
            width: span.width,
            home,
        })
    }

    pub fn put_overlay(&mut self, span: VariantSpan, tags: &TagSet) -> &mut Self {
        let tags = self.tag_indices(tags);
        self.push(Op::PutOverlay { span, tags })
    }

    pub fn put_overlay_media(&mut self, to: u64, overlay: &OverlayMedia) -> &mut Self {
        let address = self.addresses.intern(&overlay.media.home);
        let media = self.media.intern(&overlay.media.hash);
        let tags = self.tag_indices(&overlay.tags);
        self.push(Op::PutOverlayMedia {
            to,
            media,
            address,
            tags,
        })
    }

    pub fn swap_variant(&mut self, first: VariantSpan, second: VariantSpan) -> &mut Self {
        self.push(Op::Swap { first, second })
    }

    pub fn toggle_overlay(&mut self, span: VariantSpan, tag: &Identifier) -> &mut Self {
        let tag = self.addresses.intern(tag);
        self.push(Op::ToggleOverlay { span, tag })
    }

    pub fn build(self) -> DocumentFile {
        DocumentFile {
            home: self.home,
            previous: self.previous,
            addresses: self.addresses.into_values(),
            media: self.media.into_values(),
            text: self.text,
            encrypted_text: self.encrypted_text,
            ops: self.ops,
        }
    }
}

/// One link of a document's hash chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentFile {
    home: Identifier,
    previous: Option<DocumentHash>,
    addresses: Vec<Identifier>,
    media: Vec<MediaHash>,
    text: String,
    encrypted_text: String,
    ops: Vec<Op>,
}

impl DocumentFile {
    pub fn home_document(&self) -> &Identifier {
        &self.home
    }

    /// Hash of the preceding file; `None` for the root of a chain.
    pub fn previous_hash(&self) -> Option<&DocumentHash> {
        self.previous.as_ref()
    }

    pub fn address(&self, index: PoolIndex) -> Option<&Identifier> {
        self.addresses.get(index)
    }

    pub fn media(&self, index: PoolIndex) -> Option<&MediaHash> {
        self.media.get(index)
    }

    pub fn addresses(&self) -> &[Identifier] {
        &self.addresses
    }

    pub fn media_pool(&self) -> &[MediaHash] {
        &self.media
    }

    /// Invariant text appended while the ops were made.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn encrypted_text(&self) -> &str {
        &self.encrypted_text
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    fn payload(&self, key_hash: &str) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        for byte in MAGIC {
            w.u8(byte);
        }
        w.u16(VERSION);
        w.string(key_hash)?;
        w.string(self.previous.as_ref().map_or("", DocumentHash::as_str))?;
        w.index(self.addresses.len())?;
        for (index, address) in self.addresses.iter().enumerate() {
            w.index(index)?;
            w.string(address.as_str())?;
        }
        w.index(self.media.len())?;
        for (index, hash) in self.media.iter().enumerate() {
            w.index(index)?;
            w.string(hash.as_str())?;
        }
        w.string(&self.text)?;
        w.string(&self.encrypted_text)?;
        w.index(self.ops.len())?;
        for op in &self.ops {
            op.write(&mut w)?;
        }
        Ok(w.into_bytes())
    }

    /// Serialize and sign: `base64url(payload).publicKeyHash.base64url(publicKey || signature)`.
    pub fn compile(&self, key: &SigningKey) -> Result<String> {
        if self.home.is_empty() {
            return Err(Error::InvalidOperation(
                "document file needs a home document".into(),
            ));
        }
        let verifying = key.verifying_key();
        let key_hash = public_key_hash(&verifying);
        let payload = URL_SAFE_NO_PAD.encode(self.payload(&key_hash)?);
        let signature = key.sign(payload.as_bytes());

        let mut signed = Vec::with_capacity(32 + 64);
        signed.extend_from_slice(verifying.as_bytes());
        signed.extend_from_slice(&signature.to_bytes());
        debug!(home = %self.home, ops = self.ops.len(), "compiled document file");
        Ok(format!("{payload}.{key_hash}.{}", URL_SAFE_NO_PAD.encode(signed)))
    }

    /// Verify and decode a compiled document file.
    pub fn read(bytes: &[u8]) -> Result<DocumentFile> {
        let compiled = std::str::from_utf8(bytes)
            .map_err(|_| Error::SignatureInvalid("document file is not UTF-8".into()))?;
        let tokens: Vec<&str> = compiled.split('.').collect();
        let [payload_token, key_hash, signature_token] = tokens[..] else {
            return Err(Error::SignatureInvalid(format!(
                "expected 3 tokens, found {}",
                tokens.len()
            )));
        };

        let signed = URL_SAFE_NO_PAD
            .decode(signature_token)
            .map_err(|e| Error::SignatureInvalid(format!("signature token: {e}")))?;
        if signed.len() != 32 + 64 {
            return Err(Error::SignatureInvalid(format!(
                "signature token holds {} bytes",
                signed.len()
            )));
        }
        let (key_bytes, signature_bytes) = signed.split_at(32);
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::SignatureInvalid("public key length".into()))?;
        let signature_bytes: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| Error::SignatureInvalid("signature length".into()))?;
        let verifying = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| Error::SignatureInvalid(format!("public key: {e}")))?;
        if public_key_hash(&verifying) != key_hash {
            return Err(Error::SignatureInvalid(
                "public key does not match its hash".into(),
            ));
        }
        verifying
            .verify_strict(payload_token.as_bytes(), &Signature::from_bytes(&signature_bytes))
            .map_err(|e| Error::SignatureInvalid(e.to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_token)
            .map_err(|e| Error::Decode(format!("payload token: {e}")))?;
        let file = Self::parse(&payload, key_hash)?;
        debug!(home = %file.home, ops = file.ops.len(), "read document file");
        Ok(file)
    }

    fn parse(payload: &[u8], key_hash: &str) -> Result<DocumentFile> {
        let mut r = WireReader::new(payload);
        let mut magic = [0u8; 4];
        for byte in &mut magic {
            *byte = r.u8("magic")?;
        }
        if magic != MAGIC {
            return Err(Error::Decode(format!("bad magic {magic:02x?}")));
        }
        let version = r.u16("version")?;
        if version != VERSION {
            return Err(Error::Decode(format!("unsupported version {version}")));
        }
        if r.string("public key hash")? != key_hash {
            return Err(Error::SignatureInvalid(
                "embedded public key hash does not match".into(),
            ));
        }
        let previous = r.string("previous hash")?;
        let previous = (!previous.is_empty()).then(|| DocumentHash::new(previous));

        let addresses: Vec<Identifier> = read_pool(&mut r, "address")?
            .into_iter()
            .map(Identifier::new)
            .collect();
        let home = addresses
            .first()
            .cloned()
            .filter(|home| !home.is_empty())
            .ok_or_else(|| Error::Decode("address pool has no home document".into()))?;
        let media: Vec<MediaHash> = read_pool(&mut r, "media")?
            .into_iter()
            .map(MediaHash::new)
            .collect();
        let text = r.string("appended text")?;
        let encrypted_text = r.string("encrypted text")?;

        let count = r.index("op count")?;
        let mut ops = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let op = Op::read(&mut r)?;
            if let Some(bad) = op.address_indices().into_iter().find(|&i| i >= addresses.len()) {
                return Err(Error::Decode(format!("address index {bad} out of range")));
            }
            if let Some(bad) = op.media_indices().into_iter().find(|&i| i >= media.len()) {
                return Err(Error::Decode(format!("media index {bad} out of range")));
            }
            ops.push(op);
        }
        if !r.is_empty() {
            return Err(Error::Decode("trailing bytes after ops".into()));
        }

        Ok(DocumentFile {
            home,
            previous,
            addresses,
            media,
            text,
            encrypted_text,
            ops,
        })
    }
}

fn read_pool(r: &mut WireReader<'_>, what: &str) -> Result<Vec<String>> {
    let count = r.index(&format!("{what} pool size"))?;
    let mut values = Vec::with_capacity(count.min(1024));
    for expected in 0..count {
        let index = r.index(&format!("{what} pool index"))?;
        if index != expected {
            return Err(Error::Decode(format!(
                "{what} pool is not dense: expected index {expected}, found {index}"
            )));
        }
        values.push(r.string(&format!("{what} pool entry"))?);
    }
    Ok(values)
}
