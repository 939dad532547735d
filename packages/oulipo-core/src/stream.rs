use tracing::debug;

use crate::element::{StreamElement, TagSet};
use crate::error::{Error, Result};
use crate::ids::Identifier;
use crate::rope::{NodeRef, Rope};
use crate::span::{intersects, InvariantSpan, VariantSpan};

fn check_position(pos: u64) -> Result<()> {
    if pos < 1 {
        return Err(Error::MalformedSpan(format!(
            "position must be >= 1, got {pos}"
        )));
    }
    Ok(())
}

fn check_element(element: &StreamElement) -> Result<()> {
    match element {
        StreamElement::InvariantSpan(span) => span.validate(),
        StreamElement::OverlaySpan(overlay) if overlay.width < 1 => Err(Error::MalformedSpan(
            "overlay width must be >= 1".into(),
        )),
        _ => Ok(()),
    }
}

/// Position-addressed view of one home document: an ordered composition of stream elements
/// whose widths define a 1-based character coordinate space.
///
/// Every mutating operation checks all of its preconditions and cut points before touching the
/// rope, so a failed call leaves the stream exactly as it was.
#[derive(Clone, Debug)]
pub struct VariantStream {
    home: Identifier,
    rope: Rope,
    root: Option<NodeRef>,
}

impl VariantStream {
    pub fn new(home: Identifier) -> Self {
        Self {
            home,
            rope: Rope::new(),
            root: None,
        }
    }

    /// Stream composed of `elements` in order, built as a balanced rope.
    pub fn from_elements(home: Identifier, elements: Vec<StreamElement>) -> Result<Self> {
        for element in &elements {
            check_element(element)?;
        }
        let mut rope = Rope::new();
        let root = rope.build(elements);
        Ok(Self { home, rope, root })
    }

    pub fn home(&self) -> &Identifier {
        &self.home
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.root
    }

    pub fn character_count(&self) -> u64 {
        self.rope.character_count(self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert `element` so that its first character lands at `pos`.
    pub fn put(&mut self, pos: u64, element: StreamElement) -> Result<()> {
        check_element(&element)?;
        self.check_insert(pos)?;
        self.check_growth(element.width())?;
        debug!(home = %self.home, pos, width = element.width(), "put element");
        let leaf = self.rope.leaf(element);
        self.insert_subtree(pos, Some(leaf))
    }

    /// Insert `elements`, in order, starting at `pos`.
    pub fn put_elements(&mut self, pos: u64, elements: Vec<StreamElement>) -> Result<()> {
        for element in &elements {
            check_element(element)?;
        }
        self.check_insert(pos)?;
        self.check_growth(elements.iter().fold(0, |sum: u64, e| sum.saturating_add(e.width())))?;
        debug!(home = %self.home, pos, count = elements.len(), "put elements");
        self.insert_elements(pos, elements)
    }

    /// Remove the characters covered by `span` and return the removed elements.
    ///
    /// A span reaching past the end is clamped to the end of the stream.
    pub fn delete(&mut self, span: VariantSpan) -> Result<Vec<StreamElement>> {
        self.check_delete(&span)?;
        debug!(home = %self.home, start = span.start, width = span.width, "delete span");
        self.remove(span)
    }

    /// Move the content of `span` so it starts at `to`.
    ///
    /// `to` is given in the coordinates before the move. It may not fall strictly inside
    /// `span`; when it lies after the span the removed width is subtracted before reinserting.
    pub fn move_span(&mut self, to: u64, span: VariantSpan) -> Result<()> {
        self.check_move(to, &span)?;
        debug!(home = %self.home, to, start = span.start, width = span.width, "move span");
        let removed = self.remove(span)?;
        let target = if to > span.start { to - span.width } else { to };
        self.insert_elements(target, removed)
    }

    /// Insert copies of the elements covered by `span` at `to` (pre-copy coordinates).
    pub fn copy(&mut self, to: u64, span: VariantSpan) -> Result<()> {
        self.check_copy(to, &span)?;
        debug!(home = %self.home, to, start = span.start, width = span.width, "copy span");
        let elements = self.stream_elements_in(span)?;
        self.insert_elements(to, elements)
    }

    /// Exchange the content of two non-overlapping spans, `first` preceding `second`.
    pub fn swap(&mut self, first: VariantSpan, second: VariantSpan) -> Result<()> {
        self.check_swap(&first, &second)?;
        debug!(
            home = %self.home,
            first_start = first.start,
            first_width = first.width,
            second_start = second.start,
            second_width = second.width,
            "swap spans"
        );
        let first_elements = self.remove(first)?;
        let second_elements = self.remove(VariantSpan {
            start: second.start - first.width,
            width: second.width,
        })?;
        self.insert_elements(first.start, second_elements)?;
        self.insert_elements(second.start - first.width + second.width, first_elements)
    }

    /// Element covering `pos`, or `None` past the end of the stream.
    pub fn index(&self, pos: u64) -> Result<Option<StreamElement>> {
        check_position(pos)?;
        let Some(root) = self.root else {
            return Ok(None);
        };
        if pos > self.character_count() {
            return Ok(None);
        }
        let descent = self.rope.index(pos, root)?;
        Ok(self.rope.element(descent.leaf).cloned())
    }

    /// Copies of every element, in order.
    pub fn stream_elements(&self) -> Vec<StreamElement> {
        self.rope.elements(self.root).into_iter().cloned().collect()
    }

    /// Copies of the elements intersecting `span`, clipped to it. Clipped invariant spans keep
    /// pointing at the content they covered.
    pub fn stream_elements_in(&self, span: VariantSpan) -> Result<Vec<StreamElement>> {
        span.validate()?;
        let first = span.start;
        let last = span.end() - 1;
        let mut out = Vec::new();
        let mut cursor = 0;
        for element in self.rope.elements(self.root) {
            let width = element.width();
            let element_first = cursor + 1;
            let element_last = cursor + width;
            cursor += width;
            if element_last < first {
                continue;
            }
            if element_first > last {
                break;
            }
            let offset = first.saturating_sub(element_first);
            let tail = element_last.saturating_sub(last);
            out.push(element.slice(offset, width - offset - tail)?);
        }
        Ok(out)
    }

    /// Variant spans currently showing any part of `target`.
    ///
    /// Linear in the number of elements; callers doing repeated reverse lookups should cache.
    pub fn variant_spans(&self, target: &InvariantSpan) -> Result<Vec<VariantSpan>> {
        target.validate()?;
        let mut spans = Vec::new();
        let mut cursor = 1;
        for element in self.rope.elements(self.root) {
            if let StreamElement::InvariantSpan(span) = element {
                if span.home == target.home
                    && intersects(span.start, span.end(), target.start, target.end())
                {
                    let head = target.start.saturating_sub(span.start);
                    let tail = span.end().saturating_sub(target.end());
                    spans.push(VariantSpan {
                        start: cursor + head,
                        width: span.width - head - tail,
                    });
                }
            }
            cursor += element.width();
        }
        Ok(spans)
    }

    /// Add `tag` to every overlay in `span` if any of them lacks it, otherwise remove it from
    /// all of them.
    pub fn toggle_overlay(&mut self, span: VariantSpan, tag: &Identifier) -> Result<()> {
        self.check_overlay(&span)?;
        let mut elements = self.stream_elements_in(span)?;
        let add = elements
            .iter()
            .any(|e| e.tags().is_some_and(|tags| !tags.contains(tag)));
        for element in &mut elements {
            if let Some(tags) = element.tags_mut() {
                if add {
                    tags.insert(tag.clone());
                } else {
                    tags.remove(tag);
                }
            }
        }
        debug!(home = %self.home, start = span.start, width = span.width, %tag, add, "toggle overlay");
        self.replace(span, elements)
    }

    /// Union `tags` into every overlay in `span`.
    pub fn apply_overlays(&mut self, span: VariantSpan, tags: &TagSet) -> Result<()> {
        self.check_overlay(&span)?;
        let mut elements = self.stream_elements_in(span)?;
        for element in &mut elements {
            if let Some(existing) = element.tags_mut() {
                existing.extend(tags.iter().cloned());
            }
        }
        debug!(home = %self.home, start = span.start, width = span.width, tags = tags.len(), "apply overlays");
        self.replace(span, elements)
    }

    pub fn rebalance(&mut self) {
        self.root = self.rope.rebalance(self.root);
    }

    /// Validate rope weights and parent handles. Intended for tests and debugging.
    pub fn validate_invariants(&self) -> Result<()> {
        self.rope.validate(self.root)?;
        let leaf_total: u64 = self
            .rope
            .elements(self.root)
            .iter()
            .map(|e| e.width())
            .sum();
        if leaf_total != self.character_count() {
            return Err(Error::InconsistentState(format!(
                "character count {} differs from leaf total {leaf_total}",
                self.character_count()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_insert(&self, to: u64) -> Result<()> {
        check_position(to)?;
        let count = self.character_count();
        if to > count + 1 {
            return Err(Error::IndexOutOfRange {
                position: to,
                count,
            });
        }
        self.rope.check_cut(to, self.root)
    }

    pub(crate) fn check_delete(&self, span: &VariantSpan) -> Result<()> {
        span.validate()?;
        let count = self.character_count();
        if span.start > count {
            return Err(Error::IndexOutOfRange {
                position: span.start,
                count,
            });
        }
        self.rope.check_cut(span.start, self.root)?;
        self.rope.check_cut(span.end().min(count + 1), self.root)
    }

    pub(crate) fn check_copy(&self, to: u64, span: &VariantSpan) -> Result<()> {
        span.validate()?;
        let count = self.character_count();
        if span.start > count {
            return Err(Error::IndexOutOfRange {
                position: span.start,
                count,
            });
        }
        self.check_insert(to)?;
        self.check_growth(span.width.min(count - span.start + 1))
    }

    pub(crate) fn check_move(&self, to: u64, span: &VariantSpan) -> Result<()> {
        self.check_contained(span)?;
        self.check_insert(to)?;
        if to > span.start && to < span.end() {
            return Err(Error::MalformedSpan(format!(
                "move target {to} lies inside span {}..{}",
                span.start,
                span.end()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_swap(&self, first: &VariantSpan, second: &VariantSpan) -> Result<()> {
        self.check_contained(first)?;
        self.check_contained(second)?;
        if first.end() > second.start {
            return Err(Error::MalformedSpan(format!(
                "swap spans must not overlap and the first must precede the second: {}..{} and {}..{}",
                first.start,
                first.end(),
                second.start,
                second.end()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_overlay(&self, span: &VariantSpan) -> Result<()> {
        self.check_delete(span)?;
        if let Some(other) = self
            .stream_elements_in(*span)?
            .iter()
            .find(|e| !e.is_overlay())
        {
            return Err(Error::InvalidOperation(format!(
                "overlay operation on non-overlay element of width {}",
                other.width()
            )));
        }
        Ok(())
    }

    /// The character count must stay below `u64::MAX` so `count + 1` is always a position.
    pub(crate) fn check_growth(&self, added: u64) -> Result<()> {
        let count = self.character_count();
        if count.checked_add(added).map_or(true, |total| total == u64::MAX) {
            return Err(Error::InvalidOperation(format!(
                "adding {added} characters to a stream of {count} overflows its coordinates"
            )));
        }
        Ok(())
    }

    fn check_contained(&self, span: &VariantSpan) -> Result<()> {
        span.validate()?;
        let count = self.character_count();
        if span.end() > count + 1 {
            return Err(Error::IndexOutOfRange {
                position: span.end() - 1,
                count,
            });
        }
        self.rope.check_cut(span.start, self.root)?;
        self.rope.check_cut(span.end(), self.root)
    }

    fn insert_elements(&mut self, pos: u64, elements: Vec<StreamElement>) -> Result<()> {
        let subtree = self.rope.build(elements);
        self.insert_subtree(pos, subtree)
    }

    fn insert_subtree(&mut self, pos: u64, subtree: Option<NodeRef>) -> Result<()> {
        if subtree.is_none() {
            return Ok(());
        }
        if pos == self.character_count() + 1 {
            self.root = self.rope.concat(self.root, subtree);
            return Ok(());
        }
        match self.rope.partition(pos, self.root) {
            Ok((left, right)) => {
                let joined = self.rope.concat(left, subtree);
                self.root = self.rope.concat(joined, right);
                Ok(())
            }
            Err(e) => {
                self.rope.release(subtree);
                Err(e)
            }
        }
    }

    fn remove(&mut self, span: VariantSpan) -> Result<Vec<StreamElement>> {
        let (left, rest) = self.rope.partition(span.start, self.root)?;
        let (middle, right) = match self.rope.partition(span.width + 1, rest) {
            Ok(parts) => parts,
            Err(e) => {
                self.root = self.rope.concat(left, rest);
                return Err(e);
            }
        };
        self.root = self.rope.concat(left, right);
        Ok(self.rope.drain(middle))
    }

    fn replace(&mut self, span: VariantSpan, elements: Vec<StreamElement>) -> Result<()> {
        self.remove(span)?;
        self.insert_elements(span.start, elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{MediaReference, Overlay};
    use crate::ids::MediaHash;
    use proptest::prelude::*;

    fn home() -> Identifier {
        Identifier::new("ted://1.999.0.1.0.1")
    }

    fn span(start: u64, width: u64) -> StreamElement {
        StreamElement::from(InvariantSpan::new(start, width, home()).unwrap())
    }

    fn pairs(stream: &VariantStream) -> Vec<(u64, u64)> {
        stream
            .stream_elements()
            .into_iter()
            .map(|e| match e {
                StreamElement::InvariantSpan(s) => (s.start, s.width),
                other => (0, other.width()),
            })
            .collect()
    }

    #[test]
    fn put_into_empty_requires_position_one() {
        let mut stream = VariantStream::new(home());
        assert!(matches!(
            stream.put(2, span(1, 3)),
            Err(Error::IndexOutOfRange { position: 2, count: 0 })
        ));
        stream.put(1, span(1, 3)).unwrap();
        assert_eq!(stream.character_count(), 3);
    }

    #[test]
    fn put_appends_at_end() {
        let mut stream = VariantStream::new(home());
        stream.put(1, span(1, 3)).unwrap();
        stream.put(4, span(10, 2)).unwrap();
        assert_eq!(pairs(&stream), vec![(1, 3), (10, 2)]);
        stream.validate_invariants().unwrap();
    }

    #[test]
    fn media_cannot_be_cut_by_a_delete() {
        let media = StreamElement::InvariantMedia(MediaReference {
            hash: MediaHash::new("hash"),
            home: Identifier::new("media"),
        });
        let mut stream = VariantStream::from_elements(home(), vec![span(1, 2), media]).unwrap();
        stream.delete(VariantSpan::new(3, 1).unwrap()).unwrap();
        assert_eq!(pairs(&stream), vec![(1, 2)]);
    }

    #[test]
    fn overlay_ops_reject_invariant_elements() {
        let mut stream = VariantStream::from_elements(home(), vec![span(1, 5)]).unwrap();
        let result = stream.toggle_overlay(VariantSpan::new(1, 2).unwrap(), &Identifier::new("b"));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(pairs(&stream), vec![(1, 5)]);
    }

    #[test]
    fn failed_move_leaves_stream_untouched() {
        let mut stream =
            VariantStream::from_elements(home(), vec![span(1, 4), span(20, 4)]).unwrap();
        let before = pairs(&stream);
        assert!(matches!(
            stream.move_span(3, VariantSpan::new(2, 4).unwrap()),
            Err(Error::MalformedSpan(_))
        ));
        assert!(matches!(
            stream.move_span(1, VariantSpan::new(6, 10).unwrap()),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert_eq!(pairs(&stream), before);
        stream.validate_invariants().unwrap();
    }

    #[test]
    fn swap_with_unequal_widths() {
        let mut stream = VariantStream::from_elements(
            home(),
            vec![span(100, 2), span(200, 3), span(300, 5)],
        )
        .unwrap();
        stream
            .swap(VariantSpan::new(1, 2).unwrap(), VariantSpan::new(6, 5).unwrap())
            .unwrap();
        assert_eq!(pairs(&stream), vec![(300, 5), (200, 3), (100, 2)]);
    }

    #[test]
    fn overlay_toggle_adds_then_removes() {
        let bold = Identifier::new("bold");
        let mut stream =
            VariantStream::from_elements(home(), vec![StreamElement::from(Overlay::plain(10))])
                .unwrap();
        let all = VariantSpan::new(1, 10).unwrap();
        stream.toggle_overlay(all, &bold).unwrap();
        assert!(stream.stream_elements()[0].tags().unwrap().contains(&bold));
        stream.toggle_overlay(all, &bold).unwrap();
        assert!(stream.stream_elements()[0].tags().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn delete_then_reinsert_restores_sequence(
            widths in prop::collection::vec(1u64..6, 1..16),
            start_seed in any::<u64>(),
            width_seed in any::<u64>(),
        ) {
            let mut start = 1;
            let elements: Vec<_> = widths
                .iter()
                .map(|&w| {
                    let e = span(start * 10, w);
                    start += w;
                    e
                })
                .collect();
            let mut stream = VariantStream::from_elements(home(), elements).unwrap();
            let count = stream.character_count();
            let del_start = start_seed % count + 1;
            let del_width = width_seed % (count - del_start + 1) + 1;
            let before = stream.stream_elements_in(VariantSpan::new(1, count).unwrap()).unwrap();

            let removed = stream.delete(VariantSpan::new(del_start, del_width).unwrap()).unwrap();
            stream.validate_invariants().unwrap();
            prop_assert_eq!(stream.character_count(), count - del_width);

            stream.put_elements(del_start, removed).unwrap();
            stream.validate_invariants().unwrap();
            let after = stream.stream_elements_in(VariantSpan::new(1, count).unwrap()).unwrap();
            let flatten = |elements: Vec<StreamElement>| -> Vec<(u64, u64)> {
                elements
                    .into_iter()
                    .flat_map(|e| match e {
                        StreamElement::InvariantSpan(s) => (s.start..s.end()).map(|p| (p, 1)).collect::<Vec<_>>(),
                        _ => Vec::new(),
                    })
                    .collect()
            };
            prop_assert_eq!(flatten(after), flatten(before));
        }
    }
}
