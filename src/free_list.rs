//! Segregated free-list index.
//!
//! Free blocks are filed under one of [`LIST_LIMIT`] size classes. Small
//! classes step by 8 bytes so that tightly packed small requests find an
//! exact fit; from 128 bytes on, each class doubles:
//!
//! ```text
//!   class   0    1    2   ...   12    13    14    15   ...   18     19
//!   max    16   24   32   ...  112   128   256   512   ...  4096    ∞
//! ```
//!
//! Each class is a doubly linked list with LIFO insertion. The links live in
//! a side table keyed by block rather than inside the free payload, which
//! keeps insertion and removal O(1) without reinterpreting heap bytes.

use std::collections::HashMap;

use crate::block::Block;

/// Number of size classes.
pub const LIST_LIMIT: usize = 20;

const CLASS_BOUNDS: [usize; LIST_LIMIT - 1] = [
  16, 24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 128, 256, 512, 1024, 2048, 4096,
];

/// Size class holding free blocks of `size` bytes.
pub fn class_of(size: usize) -> usize {
  CLASS_BOUNDS.partition_point(|&bound| bound < size)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Links {
  pred: Option<Block>,
  succ: Option<Block>,
}

pub(crate) struct SegregatedIndex {
  roots: [Option<Block>; LIST_LIMIT],
  links: HashMap<Block, Links>,
}

impl SegregatedIndex {
  pub(crate) fn new() -> Self {
    Self {
      roots: [None; LIST_LIMIT],
      links: HashMap::new(),
    }
  }

  /// Pushes `block` at the root of the class for `size`.
  pub(crate) fn insert(
    &mut self,
    block: Block,
    size: usize,
  ) {
    debug_assert!(!self.contains(block), "block {:#x} is already listed", block.offset());
    let class = class_of(size);
    let root = self.roots[class];

    self.links.insert(
      block,
      Links {
        pred: None,
        succ: root,
      },
    );
    if let Some(root) = root.and_then(|root| self.links.get_mut(&root)) {
      root.pred = Some(block);
    }
    self.roots[class] = Some(block);
  }

  /// Unlinks `block`, which must have been inserted under `size`.
  pub(crate) fn remove(
    &mut self,
    block: Block,
    size: usize,
  ) {
    let Some(Links { pred, succ }) = self.links.remove(&block) else {
      debug_assert!(false, "block {:#x} is not in any free list", block.offset());
      return;
    };

    match pred.and_then(|pred| self.links.get_mut(&pred)) {
      Some(pred) => pred.succ = succ,
      None => self.roots[class_of(size)] = succ,
    }
    if let Some(succ) = succ.and_then(|succ| self.links.get_mut(&succ)) {
      succ.pred = pred;
    }
  }

  pub(crate) fn root(
    &self,
    class: usize,
  ) -> Option<Block> {
    self.roots[class]
  }

  pub(crate) fn pred(
    &self,
    block: Block,
  ) -> Option<Block> {
    self.links.get(&block).and_then(|links| links.pred)
  }

  pub(crate) fn succ(
    &self,
    block: Block,
  ) -> Option<Block> {
    self.links.get(&block).and_then(|links| links.succ)
  }

  pub(crate) fn contains(
    &self,
    block: Block,
  ) -> bool {
    self.links.contains_key(&block)
  }

  /// Number of blocks across all classes.
  pub(crate) fn len(&self) -> usize {
    self.links.len()
  }

  /// Overwrites the links of `block` without touching its neighbours.
  #[cfg(test)]
  pub(crate) fn relink(
    &mut self,
    block: Block,
    pred: Option<Block>,
    succ: Option<Block>,
  ) {
    self.links.insert(block, Links { pred, succ });
  }

  /// Walks one class from its root.
  pub(crate) fn class(
    &self,
    class: usize,
  ) -> ClassIter<'_> {
    ClassIter {
      index: self,
      cursor: self.roots[class],
    }
  }
}

pub(crate) struct ClassIter<'a> {
  index: &'a SegregatedIndex,
  cursor: Option<Block>,
}

impl Iterator for ClassIter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    self.cursor = self.index.succ(block);
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_class_boundaries() {
    assert_eq!(class_of(16), 0);
    assert_eq!(class_of(24), 1);
    assert_eq!(class_of(25), 2);
    assert_eq!(class_of(112), 12);
    assert_eq!(class_of(120), 13);
    assert_eq!(class_of(128), 13);
    assert_eq!(class_of(136), 14);
    assert_eq!(class_of(256), 14);
    assert_eq!(class_of(4096), 18);
    assert_eq!(class_of(4104), 19);
    assert_eq!(class_of(1 << 30), LIST_LIMIT - 1);
  }

  #[test]
  fn test_insert_is_lifo() {
    let mut index = SegregatedIndex::new();
    let (a, b, c) = (Block::at(16), Block::at(64), Block::at(128));
    index.insert(a, 48);
    index.insert(b, 48);
    index.insert(c, 48);

    let class = class_of(48);
    assert_eq!(index.class(class).collect::<Vec<_>>(), vec![c, b, a]);
    assert_eq!(index.pred(c), None);
    assert_eq!(index.pred(b), Some(c));
    assert_eq!(index.pred(a), Some(b));
    assert_eq!(index.len(), 3);
  }

  #[test]
  fn test_remove_relinks_neighbours() {
    let mut index = SegregatedIndex::new();
    let (a, b, c) = (Block::at(16), Block::at(64), Block::at(128));
    index.insert(a, 48);
    index.insert(b, 48);
    index.insert(c, 48);
    let class = class_of(48);

    index.remove(b, 48);
    assert_eq!(index.class(class).collect::<Vec<_>>(), vec![c, a]);
    assert_eq!(index.pred(a), Some(c));

    index.remove(c, 48);
    assert_eq!(index.root(class), Some(a));
    assert_eq!(index.pred(a), None);

    index.remove(a, 48);
    assert_eq!(index.root(class), None);
    assert!(!index.contains(a));
    assert_eq!(index.len(), 0);
  }

  #[test]
  fn test_classes_are_independent() {
    let mut index = SegregatedIndex::new();
    index.insert(Block::at(16), 16);
    index.insert(Block::at(64), 8192);

    assert_eq!(index.class(0).count(), 1);
    assert_eq!(index.class(LIST_LIMIT - 1).count(), 1);
    assert_eq!(index.class(5).count(), 0);
  }
}
