//! Heap consistency checker.
//!
//! A full scan for tests and debugging, never run from the allocation path.
//! It walks the heap block by block, then every free list, and cross-checks
//! the number of free blocks both walks found.

use std::collections::HashSet;

use log::error;

use crate::{
  allocator::SegregatedAllocator,
  block::{ALIGNMENT, Block, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE, read_word},
  error::Corruption,
  free_list::{LIST_LIMIT, class_of},
  heap::HeapSource,
};

impl<H: HeapSource> SegregatedAllocator<H> {
  /// Verifies every heap invariant and reports the first violation found.
  pub fn check(&self) -> Result<(), Corruption> {
    let result = self.scan();
    if let Err(corruption) = &result {
      error!("heap check failed: {corruption}");
    }
    result
  }

  fn scan(&self) -> Result<(), Corruption> {
    let heap_free = self.check_blocks()?;
    let list_free = self.check_lists()?;

    if heap_free != list_free {
      return Err(Corruption::FreeCountMismatch {
        heap: heap_free,
        lists: list_free,
      });
    }
    Ok(())
  }

  /// Walks the heap and returns the number of free blocks.
  fn check_blocks(&self) -> Result<usize, Corruption> {
    let mem = self.heap.memory();
    let base = self.heap.base_addr();

    let prologue = self.prologue;
    if prologue.tag(mem) != Tag::allocated(DSIZE) || prologue.footer_tag(mem) != Tag::allocated(DSIZE) {
      return Err(Corruption::BadPrologue {
        offset: prologue.offset(),
      });
    }

    let mut block = Block::at(prologue.offset() + DSIZE);
    let mut free = 0;
    loop {
      let offset = block.offset();
      if block.header() + WSIZE > mem.len() {
        return Err(Corruption::OutOfHeap { offset });
      }

      let tag = block.tag(mem);
      if tag.size == 0 {
        break;
      }
      if (base + offset) % ALIGNMENT != 0 {
        return Err(Corruption::Misaligned { offset });
      }
      if tag.size < MIN_BLOCK_SIZE {
        return Err(Corruption::BadSize {
          offset,
          size: tag.size,
        });
      }
      if offset + tag.size > mem.len() {
        return Err(Corruption::OutOfHeap { offset });
      }

      let header = read_word(mem, block.header());
      let footer = read_word(mem, block.footer(mem));
      if header != footer {
        return Err(Corruption::TagMismatch {
          offset,
          header,
          footer,
        });
      }

      let next = block.next(mem);
      if !tag.allocated {
        free += 1;
        let next_tag = next.tag(mem);
        let mergeable = tag.size + next_tag.size <= MAX_BLOCK_SIZE;
        if next_tag.size != 0 && !next_tag.allocated && mergeable {
          return Err(Corruption::Uncoalesced { offset });
        }
      }
      block = next;
    }

    if !block.tag(mem).allocated || block.header() + WSIZE != mem.len() {
      return Err(Corruption::BadEpilogue {
        offset: block.offset(),
      });
    }

    Ok(free)
  }

  /// Walks every size class and returns the number of listed blocks.
  fn check_lists(&self) -> Result<usize, Corruption> {
    let mem = self.heap.memory();
    let (lo, hi) = (self.heap.lo(), self.heap.hi());
    let mut seen = HashSet::new();

    for class in 0..LIST_LIMIT {
      let mut prev: Option<Block> = None;
      let mut cursor = self.index.root(class);

      while let Some(block) = cursor {
        let offset = block.offset();
        if !seen.insert(block) {
          return Err(Corruption::ListCycle { class });
        }
        if offset < lo + WSIZE || offset > hi {
          return Err(Corruption::OutOfBounds { class, offset });
        }

        let tag = block.tag(mem);
        if tag.allocated {
          return Err(Corruption::AllocatedInList { class, offset });
        }
        if class_of(tag.size) != class {
          return Err(Corruption::WrongClass {
            class,
            offset,
            size: tag.size,
          });
        }

        let found = self.index.pred(block);
        if found != prev {
          return Err(Corruption::BrokenLink {
            offset,
            expected: prev.map(Block::offset),
            found: found.map(Block::offset),
          });
        }

        prev = Some(block);
        cursor = self.index.succ(block);
      }
    }

    let listed = seen.len();
    if listed != self.index.len() {
      return Err(Corruption::OrphanLinks {
        listed,
        indexed: self.index.len(),
      });
    }

    Ok(listed)
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    allocator::{Payload, SegregatedAllocator},
    block::{Block, Tag, write_word},
    error::Corruption,
    heap::{Arena, HeapSource},
  };

  fn allocator() -> SegregatedAllocator {
    SegregatedAllocator::init(Arena::with_limit(1 << 16)).unwrap()
  }

  /// Rewrites both tags of a block behind the allocator's back.
  fn retag(
    allocator: &mut SegregatedAllocator,
    ptr: Payload,
    tag: Tag,
  ) {
    Block::at(ptr.offset()).write(allocator.heap.memory_mut(), tag);
  }

  #[test]
  fn test_healthy_heap_passes() {
    let mut allocator = allocator();
    let a = allocator.allocate(24);
    let _b = allocator.allocate(300);
    allocator.free(a);

    assert_eq!(allocator.check(), Ok(()));
  }

  #[test]
  fn test_detects_bad_prologue() {
    let mut allocator = allocator();
    write_word(allocator.heap.memory_mut(), 4, Tag::free(8).pack());

    assert_eq!(allocator.check(), Err(Corruption::BadPrologue { offset: 8 }));
  }

  #[test]
  fn test_detects_bad_epilogue() {
    let mut allocator = allocator();
    allocator.allocate(4080).unwrap();
    let last = allocator.heap.len() - 4;
    write_word(allocator.heap.memory_mut(), last, Tag::free(0).pack());

    assert!(matches!(allocator.check(), Err(Corruption::BadEpilogue { .. })));
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    // Footer of the 48-byte block says free, header says allocated.
    write_word(allocator.heap.memory_mut(), a.offset() + 40, Tag::free(48).pack());

    assert_eq!(
      allocator.check(),
      Err(Corruption::TagMismatch {
        offset: a.offset(),
        header: 49,
        footer: 48,
      })
    );
  }

  #[test]
  fn test_detects_uncoalesced_neighbours() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    let b = allocator.allocate(40).unwrap();
    let _guard = allocator.allocate(40).unwrap();
    retag(&mut allocator, a, Tag::free(48));
    retag(&mut allocator, b, Tag::free(48));

    assert_eq!(
      allocator.check(),
      Err(Corruption::Uncoalesced { offset: a.offset() })
    );
  }

  #[test]
  fn test_detects_unlisted_free_block() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    let _guard = allocator.allocate(40).unwrap();
    retag(&mut allocator, a, Tag::free(48));

    assert_eq!(
      allocator.check(),
      Err(Corruption::FreeCountMismatch { heap: 2, lists: 1 })
    );
  }

  #[test]
  fn test_detects_allocated_block_in_list() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    allocator.index.insert(Block::at(a.offset()), 48);

    assert_eq!(
      allocator.check(),
      Err(Corruption::AllocatedInList {
        class: 4,
        offset: a.offset(),
      })
    );
  }

  #[test]
  fn test_detects_block_in_wrong_class() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    let _guard = allocator.allocate(40).unwrap();
    retag(&mut allocator, a, Tag::free(48));
    // Filed as if it were a 16-byte block.
    allocator.index.insert(Block::at(a.offset()), 16);

    assert_eq!(
      allocator.check(),
      Err(Corruption::WrongClass {
        class: 0,
        offset: a.offset(),
        size: 48,
      })
    );
  }

  #[test]
  fn test_detects_out_of_bounds_list_node() {
    let mut allocator = allocator();
    let beyond = allocator.heap.len() + 64;
    allocator.index.insert(Block::at(beyond), 48);

    assert_eq!(
      allocator.check(),
      Err(Corruption::OutOfBounds {
        class: 4,
        offset: beyond,
      })
    );
  }

  /// Two 48-byte free blocks in class 4, listed as `b -> a`.
  fn two_listed(allocator: &mut SegregatedAllocator) -> (Block, Block) {
    let a = allocator.allocate(40).unwrap();
    let _guard0 = allocator.allocate(40).unwrap();
    let b = allocator.allocate(40).unwrap();
    let _guard1 = allocator.allocate(40).unwrap();
    allocator.free(Some(a));
    allocator.free(Some(b));

    let (a, b) = (Block::at(a.offset()), Block::at(b.offset()));
    assert_eq!(allocator.index.class(4).collect::<Vec<_>>(), vec![b, a]);
    (a, b)
  }

  #[test]
  fn test_detects_broken_back_link() {
    let mut allocator = allocator();
    let (a, b) = two_listed(&mut allocator);
    allocator.index.relink(a, None, None);

    assert_eq!(
      allocator.check(),
      Err(Corruption::BrokenLink {
        offset: a.offset(),
        expected: Some(b.offset()),
        found: None,
      })
    );
  }

  #[test]
  fn test_detects_list_cycle() {
    let mut allocator = allocator();
    let (a, b) = two_listed(&mut allocator);
    allocator.index.relink(a, Some(b), Some(b));

    assert_eq!(allocator.check(), Err(Corruption::ListCycle { class: 4 }));
  }

  #[test]
  fn test_detects_orphan_links() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    allocator.index.relink(Block::at(a.offset()), None, None);

    assert_eq!(
      allocator.check(),
      Err(Corruption::OrphanLinks {
        listed: 1,
        indexed: 2,
      })
    );
  }

  #[test]
  fn test_detects_undersized_block() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    let _guard = allocator.allocate(40).unwrap();
    write_word(allocator.heap.memory_mut(), a.offset() - 4, Tag::allocated(8).pack());

    assert_eq!(
      allocator.check(),
      Err(Corruption::BadSize {
        offset: a.offset(),
        size: 8,
      })
    );
  }

  #[test]
  fn test_detects_block_past_heap_end() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap();
    write_word(allocator.heap.memory_mut(), a.offset() - 4, Tag::allocated(1 << 20).pack());

    assert_eq!(
      allocator.check(),
      Err(Corruption::OutOfHeap { offset: a.offset() })
    );
  }
}
