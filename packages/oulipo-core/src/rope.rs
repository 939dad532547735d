//! Weighted binary rope stored in an arena of node slots.
//!
//! Leaves hold one [`StreamElement`] and weigh as much as its width. Branches hold no element
//! and weigh as much as their left subtree. Ownership flows strictly from the root towards the
//! leaves; the parent handle kept in each slot is a back-reference used for traversal only.

use crate::element::StreamElement;
use crate::error::{Error, Result};

/// Handle of a node slot inside a [`Rope`] arena.
pub type NodeRef = usize;

/// Edge taken out of an ancestor while descending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, Default)]
struct Node {
    weight: u64,
    element: Option<StreamElement>,
    parent: Option<NodeRef>,
    left: Option<NodeRef>,
    right: Option<NodeRef>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.element.is_some()
    }
}

/// Outcome of a positional lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descent {
    pub leaf: NodeRef,
    /// Variant offset of the first character of `leaf`: the sum of the weights of every
    /// ancestor left through its right edge.
    pub displacement: u64,
    /// Ancestors from the root down, each with the edge taken out of it. Pruning walks this
    /// stack bottom-up instead of flagging nodes.
    pub path: Vec<(NodeRef, Side)>,
}

/// Arena of rope nodes. Several disjoint trees may live in one arena while they are being
/// partitioned and concatenated.
///
/// The read accessors treat a ref that is not a slot of this arena as absent, and `index` and
/// `split` reject it. The restructuring operations expect refs this arena handed out.
#[derive(Clone, Debug, Default)]
pub struct Rope {
    nodes: Vec<Node>,
    free: Vec<NodeRef>,
}

impl Rope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Allocate a detached leaf holding `element`.
    pub fn leaf(&mut self, element: StreamElement) -> NodeRef {
        let weight = element.width();
        self.alloc(Node {
            weight,
            element: Some(element),
            ..Node::default()
        })
    }

    pub fn is_leaf(&self, node: NodeRef) -> bool {
        self.nodes.get(node).is_some_and(Node::is_leaf)
    }

    pub fn weight(&self, node: NodeRef) -> Option<u64> {
        self.nodes.get(node).map(|n| n.weight)
    }

    pub fn element(&self, node: NodeRef) -> Option<&StreamElement> {
        self.nodes.get(node).and_then(|n| n.element.as_ref())
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn left(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(node).and_then(|n| n.left)
    }

    pub fn right(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(node).and_then(|n| n.right)
    }

    /// Characters under `node`: its weight plus the weights along its right spine.
    pub fn character_count(&self, node: Option<NodeRef>) -> u64 {
        let mut total = 0;
        let mut current = node;
        while let Some(n) = current.and_then(|n| self.nodes.get(n)) {
            total += n.weight;
            current = n.right;
        }
        total
    }

    /// Locate the leaf covering the 1-based position `pos` under `root`.
    pub fn index(&self, pos: u64, root: NodeRef) -> Result<Descent> {
        if pos < 1 {
            return Err(Error::MalformedSpan(format!(
                "position must be >= 1, got {pos}"
            )));
        }
        let out_of_range = || Error::IndexOutOfRange {
            position: pos,
            count: self.character_count(Some(root)),
        };

        if root >= self.nodes.len() {
            return Err(Error::InvalidOperation(format!("node {root} is not in this rope")));
        }
        let mut node = root;
        let mut remaining = pos;
        let mut displacement = 0;
        let mut path = Vec::new();
        loop {
            let current = &self.nodes[node];
            if current.is_leaf() {
                if remaining > current.weight {
                    return Err(out_of_range());
                }
                return Ok(Descent {
                    leaf: node,
                    displacement,
                    path,
                });
            }
            if remaining <= current.weight {
                let left = current.left.ok_or_else(out_of_range)?;
                path.push((node, Side::Left));
                node = left;
            } else {
                let right = current.right.ok_or_else(out_of_range)?;
                remaining -= current.weight;
                displacement += current.weight;
                path.push((node, Side::Right));
                node = right;
            }
        }
    }

    /// Turn the leaf `node` into a branch of weight `offset` whose children hold the two halves
    /// of its element. Returns the new children.
    pub fn split(&mut self, node: NodeRef, offset: u64) -> Result<(NodeRef, NodeRef)> {
        let Some(target) = self.nodes.get(node) else {
            return Err(Error::InvalidOperation(format!("node {node} is not in this rope")));
        };
        let (left_element, right_element) = match &target.element {
            Some(element) => element.split(offset)?,
            None => {
                return Err(Error::InvalidOperation(
                    "only leaf nodes can be split".into(),
                ))
            }
        };
        let left = self.leaf(left_element);
        let right = self.leaf(right_element);
        let branch = &mut self.nodes[node];
        branch.element = None;
        branch.weight = offset;
        branch.left = Some(left);
        branch.right = Some(right);
        self.nodes[left].parent = Some(node);
        self.nodes[right].parent = Some(node);
        Ok((left, right))
    }

    /// New branch over `left` and `right`. A missing side yields the other side unchanged.
    pub fn concat(&mut self, left: Option<NodeRef>, right: Option<NodeRef>) -> Option<NodeRef> {
        match (left, right) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(only),
            (Some(left), Some(right)) => Some(self.join(left, right)),
        }
    }

    /// Left fold of [`Rope::concat`] preserving the order of `parts`.
    pub fn concat_all(&mut self, parts: impl IntoIterator<Item = NodeRef>) -> Option<NodeRef> {
        parts
            .into_iter()
            .fold(None, |acc, part| self.concat(acc, Some(part)))
    }

    /// Check that cutting before `cut_point` needs no forbidden split. Mutates nothing.
    pub fn check_cut(&self, cut_point: u64, root: Option<NodeRef>) -> Result<()> {
        if cut_point < 1 {
            return Err(Error::MalformedSpan(format!(
                "cut point must be >= 1, got {cut_point}"
            )));
        }
        let Some(root) = root else {
            return Ok(());
        };
        let left_width = cut_point - 1;
        if left_width == 0 || left_width >= self.character_count(Some(root)) {
            return Ok(());
        }
        let descent = self.index(left_width, root)?;
        let leaf = &self.nodes[descent.leaf];
        if left_width - descent.displacement < leaf.weight {
            if let Some(element) = &leaf.element {
                if !element.is_splittable() {
                    return Err(Error::UnsupportedSplit(format!(
                        "cut point {cut_point} falls inside a media element"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cut the tree under `root` so that the left result holds positions `1..cut_point` and the
    /// right result holds the rest.
    ///
    /// The leaf covering `cut_point - 1` is split when the cut falls inside it. The descent path
    /// is then walked bottom-up: an ancestor left through its left edge loses the width
    /// orphaned so far from its weight and gives up its right child to the orphan list; an
    /// ancestor left through its right edge is untouched. The orphans, concatenated in order,
    /// form the right tree.
    ///
    /// Every failure is detected before any slot is modified.
    pub fn partition(
        &mut self,
        cut_point: u64,
        root: Option<NodeRef>,
    ) -> Result<(Option<NodeRef>, Option<NodeRef>)> {
        self.check_cut(cut_point, root)?;
        let Some(root) = root else {
            return Ok((None, None));
        };
        let left_width = cut_point - 1;
        if left_width >= self.character_count(Some(root)) {
            return Ok((Some(root), None));
        }
        if left_width == 0 {
            return Ok((None, Some(root)));
        }

        if self.nodes[root].is_leaf() {
            let (left, right) = self.split(root, left_width)?;
            self.nodes[left].parent = None;
            self.nodes[right].parent = None;
            self.release_slot(root);
            return Ok((Some(left), Some(right)));
        }

        let descent = self.index(left_width, root)?;
        let mut path = descent.path;
        let local = left_width - descent.displacement;
        if local < self.nodes[descent.leaf].weight {
            self.split(descent.leaf, local)?;
            path.push((descent.leaf, Side::Left));
        }

        let mut orphans = Vec::new();
        let mut orphaned_width = 0;
        while let Some((ancestor, side)) = path.pop() {
            if side == Side::Right {
                continue;
            }
            self.nodes[ancestor].weight -= orphaned_width;
            if let Some(orphan) = self.nodes[ancestor].right.take() {
                self.nodes[orphan].parent = None;
                orphaned_width += self.character_count(Some(orphan));
                orphans.push(orphan);
            }
        }
        Ok((Some(root), self.concat_all(orphans)))
    }

    /// Balanced tree over fresh leaves for `elements`, in order.
    pub fn build(&mut self, elements: impl IntoIterator<Item = StreamElement>) -> Option<NodeRef> {
        let leaves: Vec<NodeRef> = elements.into_iter().map(|e| self.leaf(e)).collect();
        self.pair_up(leaves)
    }

    /// Rebuild the tree under `root` as a balanced tree over the same leaves.
    pub fn rebalance(&mut self, root: Option<NodeRef>) -> Option<NodeRef> {
        let Some(root) = root else {
            return None;
        };
        let leaves = self.leaves(Some(root));
        self.release_branches(root);
        for &leaf in &leaves {
            self.nodes[leaf].parent = None;
        }
        self.pair_up(leaves)
    }

    /// Leaves under `root` in character order.
    pub fn leaves(&self, root: Option<NodeRef>) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeRef> = root.into_iter().collect();
        while let Some(node) = stack.pop() {
            let current = &self.nodes[node];
            if current.is_leaf() {
                out.push(node);
                continue;
            }
            if let Some(right) = current.right {
                stack.push(right);
            }
            if let Some(left) = current.left {
                stack.push(left);
            }
        }
        out
    }

    /// Elements under `root` in character order.
    pub fn elements(&self, root: Option<NodeRef>) -> Vec<&StreamElement> {
        self.leaves(root)
            .into_iter()
            .filter_map(|leaf| self.nodes[leaf].element.as_ref())
            .collect()
    }

    /// Free every slot under `root`, handing back its elements in order.
    pub fn drain(&mut self, root: Option<NodeRef>) -> Vec<StreamElement> {
        let elements = self
            .leaves(root)
            .into_iter()
            .filter_map(|leaf| self.nodes[leaf].element.take())
            .collect();
        self.release(root);
        elements
    }

    /// Free every slot under `root`.
    pub fn release(&mut self, root: Option<NodeRef>) {
        let mut stack: Vec<NodeRef> = root.into_iter().collect();
        while let Some(node) = stack.pop() {
            stack.extend(self.nodes[node].left);
            stack.extend(self.nodes[node].right);
            self.release_slot(node);
        }
    }

    /// Check weights, right-spine counts, and parent handles under `root`.
    pub fn validate(&self, root: Option<NodeRef>) -> Result<()> {
        let Some(root) = root else {
            return Ok(());
        };
        if self.nodes[root].parent.is_some() {
            return Err(Error::InconsistentState("root has a parent".into()));
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let current = &self.nodes[node];
            match &current.element {
                Some(element) => {
                    if current.left.is_some() || current.right.is_some() {
                        return Err(Error::InconsistentState(format!(
                            "leaf {node} has children"
                        )));
                    }
                    if current.weight != element.width() {
                        return Err(Error::InconsistentState(format!(
                            "leaf {node} weight {} differs from element width {}",
                            current.weight,
                            element.width()
                        )));
                    }
                }
                None => {
                    let left_count = self.character_count(current.left);
                    if current.weight != left_count {
                        return Err(Error::InconsistentState(format!(
                            "branch {node} weight {} differs from left count {left_count}",
                            current.weight
                        )));
                    }
                    for child in [current.left, current.right].into_iter().flatten() {
                        if self.nodes[child].parent != Some(node) {
                            return Err(Error::InconsistentState(format!(
                                "child {child} does not point back at {node}"
                            )));
                        }
                        stack.push(child);
                    }
                }
            }
        }
        Ok(())
    }

    fn alloc(&mut self, node: Node) -> NodeRef {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release_slot(&mut self, node: NodeRef) {
        self.nodes[node] = Node::default();
        self.free.push(node);
    }

    fn release_branches(&mut self, root: NodeRef) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.nodes[node].is_leaf() {
                continue;
            }
            stack.extend(self.nodes[node].left);
            stack.extend(self.nodes[node].right);
            self.release_slot(node);
        }
    }

    fn join(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        let weight = self.character_count(Some(left));
        let parent = self.alloc(Node {
            weight,
            element: None,
            parent: None,
            left: Some(left),
            right: Some(right),
        });
        self.nodes[left].parent = Some(parent);
        self.nodes[right].parent = Some(parent);
        parent
    }

    fn pair_up(&mut self, mut level: Vec<NodeRef>) -> Option<NodeRef> {
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut iter = level.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => next.push(self.join(left, right)),
                    None => next.push(left),
                }
            }
            level = next;
        }
        level.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{MediaReference, Overlay};
    use crate::ids::{Identifier, MediaHash};
    use crate::span::InvariantSpan;
    use proptest::prelude::*;

    fn span(start: u64, width: u64) -> StreamElement {
        StreamElement::from(InvariantSpan::new(start, width, Identifier::new("home")).unwrap())
    }

    fn widths(rope: &Rope, root: Option<NodeRef>) -> Vec<u64> {
        rope.elements(root).iter().map(|e| e.width()).collect()
    }

    #[test]
    fn character_count_follows_right_spine() {
        let mut rope = Rope::new();
        let root = rope.build([span(1, 3), span(10, 4), span(20, 5)]);
        assert_eq!(rope.character_count(root), 12);
        rope.validate(root).unwrap();
    }

    #[test]
    fn index_reports_displacement() {
        let mut rope = Rope::new();
        let root = rope.build([span(1, 3), span(10, 4), span(20, 5)]).unwrap();
        let descent = rope.index(5, root).unwrap();
        assert_eq!(descent.displacement, 3);
        assert_eq!(rope.element(descent.leaf), Some(&span(10, 4)));
        assert!(matches!(
            rope.index(13, root),
            Err(Error::IndexOutOfRange { position: 13, count: 12 })
        ));
        assert!(matches!(rope.index(0, root), Err(Error::MalformedSpan(_))));
    }

    #[test]
    fn split_turns_leaf_into_branch() {
        let mut rope = Rope::new();
        let leaf = rope.leaf(span(100, 6));
        let (left, right) = rope.split(leaf, 2).unwrap();
        assert!(!rope.is_leaf(leaf));
        assert_eq!(rope.weight(leaf), Some(2));
        assert_eq!(rope.parent(left), Some(leaf));
        assert_eq!(rope.element(right), Some(&span(102, 4)));
        assert!(matches!(
            rope.split(leaf, 1),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn refs_from_another_rope_read_as_absent() {
        let mut small = Rope::new();
        small.leaf(span(1, 2));
        let mut big = Rope::new();
        let root = big.build([span(1, 3), span(10, 4), span(20, 5)]).unwrap();
        let foreign = root.max(big.live_nodes() - 1);

        assert!(!small.is_leaf(foreign));
        assert_eq!(small.weight(foreign), None);
        assert_eq!(small.element(foreign), None);
        assert_eq!(small.parent(foreign), None);
        assert_eq!(small.left(foreign), None);
        assert_eq!(small.right(foreign), None);
        assert_eq!(small.character_count(Some(foreign)), 0);
        assert!(matches!(small.index(1, foreign), Err(Error::InvalidOperation(_))));
        assert!(matches!(small.split(foreign, 1), Err(Error::InvalidOperation(_))));
        assert_eq!(small.live_nodes(), 1);
    }

    #[test]
    fn partition_single_leaf_splits_directly() {
        let mut rope = Rope::new();
        let root = rope.leaf(span(100, 6));
        let (left, right) = rope.partition(4, Some(root)).unwrap();
        assert_eq!(rope.elements(left), vec![&span(100, 3)]);
        assert_eq!(rope.elements(right), vec![&span(103, 3)]);
        assert_eq!(rope.live_nodes(), 2);
    }

    #[test]
    fn partition_edges() {
        let mut rope = Rope::new();
        let root = rope.build([span(1, 3), span(10, 4)]);
        assert_eq!(rope.partition(1, root).unwrap(), (None, root));
        assert_eq!(rope.partition(8, root).unwrap(), (root, None));
        assert!(matches!(
            rope.partition(0, root),
            Err(Error::MalformedSpan(_))
        ));
    }

    #[test]
    fn cuts_around_media_leave_it_whole() {
        let mut rope = Rope::new();
        let media = StreamElement::InvariantMedia(MediaReference {
            hash: MediaHash::new("h"),
            home: Identifier::new("m"),
        });
        let root = rope.build([span(1, 3), media.clone(), StreamElement::from(Overlay::plain(2))]);
        rope.check_cut(4, root).unwrap();
        rope.check_cut(5, root).unwrap();
        let (left, right) = rope.partition(5, root).unwrap();
        assert_eq!(widths(&rope, left), vec![3, 1]);
        assert_eq!(rope.elements(left)[1], &media);
        assert_eq!(widths(&rope, right), vec![2]);
    }

    proptest! {
        #[test]
        fn partition_preserves_counts(
            widths_in in prop::collection::vec(1u64..8, 1..24),
            cut_seed in any::<u64>(),
        ) {
            let mut rope = Rope::new();
            let mut start = 1;
            let elements: Vec<_> = widths_in
                .iter()
                .map(|&w| {
                    let e = span(start, w);
                    start += w;
                    e
                })
                .collect();
            let root = rope.build(elements.clone());
            let total = rope.character_count(root);
            let cut = cut_seed % (total + 1) + 1;

            let (left, right) = rope.partition(cut, root).unwrap();
            rope.validate(left).unwrap();
            rope.validate(right).unwrap();
            prop_assert_eq!(rope.character_count(left), cut - 1);
            prop_assert_eq!(
                rope.character_count(left) + rope.character_count(right),
                total
            );

            let rejoined = rope.concat(left, right);
            let mut merged: Vec<StreamElement> = Vec::new();
            for element in rope.elements(rejoined) {
                match merged.last_mut() {
                    Some(StreamElement::InvariantSpan(prev)) => match element {
                        StreamElement::InvariantSpan(next) if prev.end() == next.start => {
                            prev.width += next.width;
                        }
                        other => merged.push(other.clone()),
                    },
                    _ => merged.push(element.clone()),
                }
            }
            prop_assert_eq!(merged, vec![span(1, total)]);
        }

        #[test]
        fn rebalance_keeps_order_and_releases_branches(
            widths_in in prop::collection::vec(1u64..5, 1..32),
        ) {
            let mut rope = Rope::new();
            let mut root = None;
            for (i, w) in widths_in.iter().enumerate() {
                let leaf = rope.leaf(span(i as u64 * 10 + 1, *w));
                root = rope.concat(root, Some(leaf));
            }
            let before = widths(&rope, root);
            let root = rope.rebalance(root);
            rope.validate(root).unwrap();
            prop_assert_eq!(widths(&rope, root), before);
            prop_assert_eq!(rope.live_nodes(), 2 * widths_in.len() - 1);
        }
    }
}
