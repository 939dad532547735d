use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::ids::{Identifier, MediaHash};
use crate::span::InvariantSpan;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Set of overlay tags (link types) carried by overlay elements.
pub type TagSet = BTreeSet<Identifier>;

/// Reference to a single invariant media object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MediaReference {
    pub hash: MediaHash,
    /// Address under which the media was published.
    pub home: Identifier,
}

/// Tagged range of the overlay stream.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Overlay {
    pub width: u64,
    pub tags: TagSet,
}

impl Overlay {
    /// Overlay without any tags.
    pub fn plain(width: u64) -> Self {
        Self {
            width,
            tags: TagSet::new(),
        }
    }

    pub fn tagged(width: u64, tags: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            width,
            tags: tags.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OverlayMedia {
    pub media: MediaReference,
    pub tags: TagSet,
}

/// Leaf payload of a variant stream.
///
/// Media variants always have width 1 and refuse to split.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum StreamElement {
    InvariantSpan(InvariantSpan),
    InvariantMedia(MediaReference),
    OverlaySpan(Overlay),
    OverlayMedia(OverlayMedia),
}

impl StreamElement {
    pub fn width(&self) -> u64 {
        match self {
            StreamElement::InvariantSpan(span) => span.width,
            StreamElement::OverlaySpan(overlay) => overlay.width,
            StreamElement::InvariantMedia(_) | StreamElement::OverlayMedia(_) => 1,
        }
    }

    pub fn is_splittable(&self) -> bool {
        matches!(
            self,
            StreamElement::InvariantSpan(_) | StreamElement::OverlaySpan(_)
        )
    }

    pub fn is_overlay(&self) -> bool {
        matches!(
            self,
            StreamElement::OverlaySpan(_) | StreamElement::OverlayMedia(_)
        )
    }

    pub fn tags(&self) -> Option<&TagSet> {
        match self {
            StreamElement::OverlaySpan(overlay) => Some(&overlay.tags),
            StreamElement::OverlayMedia(media) => Some(&media.tags),
            _ => None,
        }
    }

    pub fn tags_mut(&mut self) -> Option<&mut TagSet> {
        match self {
            StreamElement::OverlaySpan(overlay) => Some(&mut overlay.tags),
            StreamElement::OverlayMedia(media) => Some(&mut media.tags),
            _ => None,
        }
    }

    /// Split into a left part of `offset` characters and the remainder.
    pub fn split(&self, offset: u64) -> Result<(StreamElement, StreamElement)> {
        let width = self.width();
        if !self.is_splittable() {
            return Err(Error::UnsupportedSplit(format!(
                "media element cannot be split at offset {offset}"
            )));
        }
        if offset < 1 || offset >= width {
            return Err(Error::MalformedSpan(format!(
                "split offset {offset} outside 1..{width}"
            )));
        }
        match self {
            StreamElement::InvariantSpan(span) => {
                let (left, right) = span.split(span.start + offset)?;
                Ok((
                    StreamElement::InvariantSpan(left),
                    StreamElement::InvariantSpan(right),
                ))
            }
            StreamElement::OverlaySpan(overlay) => Ok((
                StreamElement::OverlaySpan(Overlay {
                    width: offset,
                    tags: overlay.tags.clone(),
                }),
                StreamElement::OverlaySpan(Overlay {
                    width: width - offset,
                    tags: overlay.tags.clone(),
                }),
            )),
            StreamElement::InvariantMedia(_) | StreamElement::OverlayMedia(_) => Err(
                Error::UnsupportedSplit("media element cannot be split".into()),
            ),
        }
    }

    /// Copy of the `width` characters starting `offset` characters into this element.
    ///
    /// Invariant spans keep pointing at the same content: the copy's start moves forward by
    /// `offset`.
    pub fn slice(&self, offset: u64, width: u64) -> Result<StreamElement> {
        let own = self.width();
        if width < 1 || offset.checked_add(width).map_or(true, |end| end > own) {
            return Err(Error::MalformedSpan(format!(
                "slice {offset}+{width} outside element of width {own}"
            )));
        }
        if offset == 0 && width == own {
            return Ok(self.clone());
        }
        match self {
            StreamElement::InvariantSpan(span) => Ok(StreamElement::InvariantSpan(InvariantSpan {
                start: span.start + offset,
                width,
                home: span.home.clone(),
            })),
            StreamElement::OverlaySpan(overlay) => Ok(StreamElement::OverlaySpan(Overlay {
                width,
                tags: overlay.tags.clone(),
            })),
            StreamElement::InvariantMedia(_) | StreamElement::OverlayMedia(_) => Err(
                Error::UnsupportedSplit("media element cannot be sliced".into()),
            ),
        }
    }
}

impl From<InvariantSpan> for StreamElement {
    fn from(span: InvariantSpan) -> Self {
        StreamElement::InvariantSpan(span)
    }
}

impl From<Overlay> for StreamElement {
    fn from(overlay: Overlay) -> Self {
        StreamElement::OverlaySpan(overlay)
    }
}
