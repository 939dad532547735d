//! Edit facade over one home document: its invariant store, its variant and overlay streams,
//! and an optional op log that is flushed into the document's hash chain.

use ed25519_dalek::SigningKey;
use tracing::{debug, info};

use crate::chain::{fetch_chain, DocumentStore};
use crate::document::{DocumentFile, DocumentFileBuilder};
use crate::element::{MediaReference, Overlay, OverlayMedia, StreamElement, TagSet};
use crate::error::{Error, Result};
use crate::ids::{DocumentHash, Identifier};
use crate::ops::{Op, PoolIndex};
use crate::span::{InvariantSpan, VariantSpan};
use crate::store::InvariantStore;
use crate::stream::VariantStream;

/// The two streams kept per home document: invariant content and its overlays.
#[derive(Clone, Debug)]
pub struct DocumentStreams {
    pub variant: VariantStream,
    pub overlay: VariantStream,
}

impl DocumentStreams {
    pub fn new(home: Identifier) -> Self {
        Self {
            variant: VariantStream::new(home.clone()),
            overlay: VariantStream::new(home),
        }
    }

    pub fn home(&self) -> &Identifier {
        self.variant.home()
    }

    pub fn is_empty(&self) -> bool {
        self.variant.is_empty() && self.overlay.is_empty()
    }

    /// Whether inserted text also gets an untagged overlay.
    fn overlay_follows(&self) -> bool {
        !self.overlay.is_empty() || self.variant.is_empty()
    }

    /// `to` moved back onto the overlay stream when it lies past the overlay's end.
    fn overlay_position(&self, to: u64) -> u64 {
        to.min(self.overlay.character_count() + 1)
    }

    /// The part of `span` the overlay stream covers. Structural edits are mirrored only over
    /// this part; the overlay can be shorter than the variant stream after puts of invariant
    /// content.
    fn overlay_span(&self, span: VariantSpan) -> Option<VariantSpan> {
        let count = self.overlay.character_count();
        (span.start <= count).then(|| VariantSpan {
            start: span.start,
            width: span.width.min(count - span.start + 1),
        })
    }
}

/// Piece of readable content, in display order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualContent {
    pub order: usize,
    pub home: Identifier,
    pub span: InvariantSpan,
    /// Text behind `span`; `None` when it lives in another home document's store.
    pub content: Option<String>,
}

pub struct Machine<S: InvariantStore> {
    store: S,
    streams: DocumentStreams,
    log: Option<DocumentFileBuilder>,
    head: Option<DocumentHash>,
}

impl<S: InvariantStore> Machine<S> {
    /// Machine that edits without logging.
    pub fn new(store: S) -> Self {
        let streams = DocumentStreams::new(store.home_document().clone());
        Self {
            store,
            streams,
            log: None,
            head: None,
        }
    }

    /// Machine that logs every edit for [`Machine::flush`].
    pub fn writable(store: S) -> Self {
        let mut machine = Self::new(store);
        machine.enable_logging();
        machine
    }

    /// Resume editing existing streams, e.g. ones taken from a stream cache.
    pub fn with_streams(store: S, streams: DocumentStreams) -> Result<Self> {
        if streams.home() != store.home_document() {
            return Err(Error::InvalidOperation(format!(
                "streams of {} cannot be edited with the store of {}",
                streams.home(),
                store.home_document()
            )));
        }
        Ok(Self {
            store,
            streams,
            log: None,
            head: None,
        })
    }

    pub fn enable_logging(&mut self) {
        if self.log.is_none() {
            self.log = Some(DocumentFileBuilder::new(self.home().clone()));
        }
    }

    pub fn into_streams(self) -> DocumentStreams {
        self.streams
    }

    pub fn home(&self) -> &Identifier {
        self.store.home_document()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn streams(&self) -> &DocumentStreams {
        &self.streams
    }

    /// Hash of the last published document file.
    pub fn head(&self) -> Option<&DocumentHash> {
        self.head.as_ref()
    }

    /// Ops logged since the last flush.
    pub fn pending(&self) -> Option<&DocumentFileBuilder> {
        self.log.as_ref()
    }

    fn log(&mut self, record: impl FnOnce(&mut DocumentFileBuilder)) {
        if let Some(log) = self.log.as_mut() {
            record(log);
        }
    }

    /// Append `text` to the invariant store without placing it in the document.
    pub fn append(&mut self, text: &str) -> Result<InvariantSpan> {
        let span = self.store.append(text)?;
        self.log(|log| {
            log.append_text(text);
        });
        Ok(span)
    }

    /// Append `text` and show it at `to`.
    pub fn insert(&mut self, to: u64, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(Error::InvalidOperation("cannot insert empty text".into()));
        }
        let width = text.len() as u64;
        let overlay_to = self
            .streams
            .overlay_follows()
            .then(|| self.streams.overlay_position(to));
        self.streams.variant.check_insert(to)?;
        self.streams.variant.check_growth(width)?;
        if let Some(overlay_to) = overlay_to {
            self.streams.overlay.check_insert(overlay_to)?;
            self.streams.overlay.check_growth(width)?;
        }
        let span = self.store.append(text)?;
        self.streams
            .variant
            .put(to, StreamElement::InvariantSpan(span.clone()))?;
        if let Some(overlay_to) = overlay_to {
            self.streams
                .overlay
                .put(overlay_to, StreamElement::OverlaySpan(Overlay::plain(width)))?;
        }
        debug!(home = %self.home(), to, width, "insert");
        self.log(|log| {
            log.append_text(text).put_invariant_span(to, &span);
            if let Some(overlay_to) = overlay_to {
                log.put_overlay(
                    VariantSpan {
                        start: overlay_to,
                        width,
                    },
                    &TagSet::new(),
                );
            }
        });
        Ok(())
    }

    pub fn put_invariant_span(&mut self, to: u64, span: InvariantSpan) -> Result<()> {
        self.streams
            .variant
            .put(to, StreamElement::InvariantSpan(span.clone()))?;
        self.log(|log| {
            log.put_invariant_span(to, &span);
        });
        Ok(())
    }

    pub fn put_invariant_media(&mut self, to: u64, media: MediaReference) -> Result<()> {
        self.streams
            .variant
            .put(to, StreamElement::InvariantMedia(media.clone()))?;
        self.log(|log| {
            log.put_invariant_media(to, &media);
        });
        Ok(())
    }

    pub fn put_overlay(&mut self, to: u64, overlay: Overlay) -> Result<()> {
        let span = VariantSpan::new(to, overlay.width)?;
        let tags = overlay.tags.clone();
        self.streams
            .overlay
            .put(to, StreamElement::OverlaySpan(overlay))?;
        self.log(|log| {
            log.put_overlay(span, &tags);
        });
        Ok(())
    }

    pub fn put_overlay_media(&mut self, to: u64, overlay: OverlayMedia) -> Result<()> {
        self.streams
            .overlay
            .put(to, StreamElement::OverlayMedia(overlay.clone()))?;
        self.log(|log| {
            log.put_overlay_media(to, &overlay);
        });
        Ok(())
    }

    pub fn delete_variant(&mut self, span: VariantSpan) -> Result<()> {
        let mirrored = self.streams.overlay_span(span);
        self.streams.variant.check_delete(&span)?;
        if let Some(mirrored) = &mirrored {
            self.streams.overlay.check_delete(mirrored)?;
        }
        self.streams.variant.delete(span)?;
        if let Some(mirrored) = mirrored {
            self.streams.overlay.delete(mirrored)?;
        }
        self.log(|log| {
            log.delete_variant(span);
        });
        Ok(())
    }

    pub fn copy_variant(&mut self, to: u64, span: VariantSpan) -> Result<()> {
        let mirrored = self
            .streams
            .overlay_span(span)
            .map(|mirrored| (self.streams.overlay_position(to), mirrored));
        self.streams.variant.check_copy(to, &span)?;
        if let Some((overlay_to, mirrored)) = &mirrored {
            self.streams.overlay.check_copy(*overlay_to, mirrored)?;
        }
        self.streams.variant.copy(to, span)?;
        if let Some((overlay_to, mirrored)) = mirrored {
            self.streams.overlay.copy(overlay_to, mirrored)?;
        }
        self.log(|log| {
            log.copy_variant(to, span);
        });
        Ok(())
    }

    /// Move `span` to `to`. When the overlay stream ends inside or before the target, the
    /// mirrored move lands at the overlay's end.
    pub fn move_variant(&mut self, to: u64, span: VariantSpan) -> Result<()> {
        let mirrored = self
            .streams
            .overlay_span(span)
            .map(|mirrored| (self.streams.overlay_position(to), mirrored));
        self.streams.variant.check_move(to, &span)?;
        if let Some((overlay_to, mirrored)) = &mirrored {
            self.streams.overlay.check_move(*overlay_to, mirrored)?;
        }
        self.streams.variant.move_span(to, span)?;
        if let Some((overlay_to, mirrored)) = mirrored {
            self.streams.overlay.move_span(overlay_to, mirrored)?;
        }
        self.log(|log| {
            log.move_variant(to, span);
        });
        Ok(())
    }

    /// Swap two spans. The overlay side is swapped only when the overlay stream reaches into
    /// both of them.
    pub fn swap_variants(&mut self, first: VariantSpan, second: VariantSpan) -> Result<()> {
        let mirrored = self
            .streams
            .overlay_span(first)
            .zip(self.streams.overlay_span(second));
        self.streams.variant.check_swap(&first, &second)?;
        if let Some((overlay_first, overlay_second)) = &mirrored {
            self.streams
                .overlay
                .check_swap(overlay_first, overlay_second)?;
        }
        self.streams.variant.swap(first, second)?;
        if let Some((overlay_first, overlay_second)) = mirrored {
            self.streams.overlay.swap(overlay_first, overlay_second)?;
        }
        self.log(|log| {
            log.swap_variant(first, second);
        });
        Ok(())
    }

    pub fn apply_overlays(&mut self, span: VariantSpan, tags: &TagSet) -> Result<()> {
        self.streams.overlay.apply_overlays(span, tags)?;
        self.log(|log| {
            log.apply_overlay(span, tags);
        });
        Ok(())
    }

    pub fn toggle_overlay(&mut self, span: VariantSpan, tag: &Identifier) -> Result<()> {
        self.streams.overlay.toggle_overlay(span, tag)?;
        self.log(|log| {
            log.toggle_overlay(span, tag);
        });
        Ok(())
    }

    pub fn index(&self, pos: u64) -> Result<Option<StreamElement>> {
        self.streams.variant.index(pos)
    }

    pub fn invariants(&self) -> Vec<StreamElement> {
        self.streams.variant.stream_elements()
    }

    pub fn invariants_in(&self, span: VariantSpan) -> Result<Vec<StreamElement>> {
        self.streams.variant.stream_elements_in(span)
    }

    pub fn variant_spans(&self, span: &InvariantSpan) -> Result<Vec<VariantSpan>> {
        self.streams.variant.variant_spans(span)
    }

    /// Invariant content named by `span`, read from this machine's store.
    pub fn get_text(&self, span: &InvariantSpan) -> Result<String> {
        if &span.home != self.home() {
            return Err(Error::InvalidOperation(format!(
                "content of {} is not held by the store of {}",
                span.home,
                self.home()
            )));
        }
        self.store.text(span)
    }

    /// Invariant spans of the variant stream with their text, in display order.
    pub fn virtual_content(&self) -> Result<Vec<VirtualContent>> {
        let mut out = Vec::new();
        for element in self.streams.variant.stream_elements() {
            let StreamElement::InvariantSpan(span) = element else {
                continue;
            };
            let content = if &span.home == self.home() {
                Some(self.store.text(&span)?)
            } else {
                None
            };
            out.push(VirtualContent {
                order: out.len(),
                home: span.home.clone(),
                span,
                content,
            });
        }
        Ok(out)
    }

    /// The document's readable text: the concatenation of its virtual content.
    pub fn text(&self) -> Result<String> {
        Ok(self
            .virtual_content()?
            .into_iter()
            .filter_map(|piece| piece.content)
            .collect())
    }

    /// Sign the ops logged since the last flush, publish them as the next link of the chain and
    /// start a fresh log. Returns `None` when nothing was logged.
    pub fn flush<D: DocumentStore + ?Sized>(
        &mut self,
        key: &SigningKey,
        documents: &mut D,
    ) -> Result<Option<DocumentHash>> {
        let Some(log) = self.log.as_ref() else {
            return Err(Error::InvalidOperation(
                "machine was not created with logging enabled".into(),
            ));
        };
        if log.is_empty() {
            return Ok(None);
        }
        let mut builder = log.clone();
        if let Some(head) = &self.head {
            builder.previous_hash(head.clone());
        }
        let file = builder.build();
        let compiled = file.compile(key)?;
        let hash = documents.put(&compiled)?;
        info!(home = %self.home(), hash = %hash, ops = file.ops().len(), "published document file");
        self.log = Some(DocumentFileBuilder::new(self.home().clone()));
        self.head = Some(hash.clone());
        Ok(Some(hash))
    }

    /// Rebuild a document by replaying the chain ending at `head` into an empty store.
    ///
    /// The returned machine logs further edits on top of `head`.
    pub fn load_document<D: DocumentStore + ?Sized>(
        head: &DocumentHash,
        documents: &D,
        store: S,
    ) -> Result<Self> {
        if !store.is_empty()? {
            return Err(Error::InvalidOperation(
                "documents can only be replayed into an empty invariant store".into(),
            ));
        }
        let files = fetch_chain(head, documents)?;
        let mut machine = Self::new(store);
        for file in &files {
            if file.home_document() != machine.home() {
                return Err(Error::ChainCorrupt(format!(
                    "chain belongs to {} instead of {}",
                    file.home_document(),
                    machine.home()
                )));
            }
            machine.replay(file)?;
        }
        machine.enable_logging();
        machine.head = Some(head.clone());
        info!(home = %machine.home(), head = %head, blocks = files.len(), "loaded document");
        Ok(machine)
    }

    fn replay(&mut self, file: &DocumentFile) -> Result<()> {
        if !file.text().is_empty() {
            self.store.append(file.text())?;
        }
        for op in file.ops() {
            self.replay_op(file, op).map_err(|e| match e {
                Error::ContentStoreIo(_) | Error::Storage(_) => e,
                other => Error::ChainCorrupt(format!("replaying {:?}: {other}", op.code())),
            })?;
        }
        Ok(())
    }

    fn replay_op(&mut self, file: &DocumentFile, op: &Op) -> Result<()> {
        let address = |index: PoolIndex| {
            file.address(index)
                .cloned()
                .ok_or_else(|| Error::Decode(format!("address index {index} out of range")))
        };
        let tags = |indices: &[PoolIndex]| -> Result<TagSet> {
            indices.iter().map(|&index| address(index)).collect()
        };
        let media = |media: PoolIndex, home: PoolIndex| -> Result<MediaReference> {
            Ok(MediaReference {
                hash: file
                    .media(media)
                    .cloned()
                    .ok_or_else(|| Error::Decode(format!("media index {media} out of range")))?,
                home: address(home)?,
            })
        };
        match op {
            Op::Swap { first, second } => self.swap_variants(*first, *second),
            Op::Put {
                to,
                invariant_start: Some(start),
                width,
            } => {
                let span = InvariantSpan::new(*start, *width, file.home_document().clone())?;
                self.put_invariant_span(*to, span)
            }
            Op::Put {
                to,
                invariant_start: None,
                width,
            } => self.put_overlay(*to, Overlay::plain(*width)),
            Op::Copy { to, span } => self.copy_variant(*to, *span),
            Op::Delete { span } => self.delete_variant(*span),
            Op::InsertText { to, text } => self.insert(*to, text),
            Op::Move { to, span } => self.move_variant(*to, *span),
            Op::PutInvariantSpan {
                to,
                invariant_start,
                width,
                home,
            } => {
                let span = InvariantSpan::new(*invariant_start, *width, address(*home)?)?;
                self.put_invariant_span(*to, span)
            }
            Op::PutInvariantMedia {
                to,
                media: index,
                address: home,
            } => self.put_invariant_media(*to, media(*index, *home)?),
            Op::PutOverlay { span, tags: indices } => self.put_overlay(
                span.start,
                Overlay {
                    width: span.width,
                    tags: tags(indices)?,
                },
            ),
            Op::PutOverlayMedia {
                to,
                media: index,
                address: home,
                tags: indices,
            } => self.put_overlay_media(
                *to,
                OverlayMedia {
                    media: media(*index, *home)?,
                    tags: tags(indices)?,
                },
            ),
            Op::ApplyOverlay { span, tags: indices } => self.apply_overlays(*span, &tags(indices)?),
            Op::ToggleOverlay { span, tag } => self.toggle_overlay(*span, &address(*tag)?),
        }
    }
}
