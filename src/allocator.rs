use log::{Level, debug, log_enabled, trace, warn};

use crate::{
  block::{Block, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE, block_size_for, write_word},
  config::AllocatorConfig,
  error::{GrowError, InitError},
  free_list::{LIST_LIMIT, SegregatedIndex, class_of},
  heap::{Arena, HeapSource},
};

/// Handle to an allocated payload: its offset inside the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(usize);

impl Payload {
  pub const fn offset(self) -> usize {
    self.0
  }

  fn block(self) -> Block {
    Block::at(self.0)
  }
}

/// One block seen while walking the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload offset of the block.
  pub offset: usize,
  /// Full block size including header and footer.
  pub size: usize,
  pub allocated: bool,
}

/// Heap occupancy summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
}

/// Segregated free-list allocator over a single growable heap.
///
/// ```text
///   ┌─────┬──────────┬─────────┬─────────┬─────────┬─────┬──────────┐
///   │ pad │ prologue │ block   │ block   │ block   │ ... │ epilogue │
///   │  0  │  8 | a   │ alloc'd │  free   │ alloc'd │     │  0 | a   │
///   └─────┴──────────┴─────────┴─────────┴─────────┴─────┴──────────┘
///                                  │
///           roots[class_of(size)] ─┘   (free blocks only)
/// ```
///
/// Invariants between operations:
/// - header and footer of every block agree;
/// - no two physically adjacent blocks are both free, unless together they
///   would exceed [`MAX_BLOCK_SIZE`];
/// - every free block is listed exactly once, under the class of its size.
pub struct SegregatedAllocator<H: HeapSource = Arena> {
  pub(crate) heap: H,
  pub(crate) index: SegregatedIndex,
  pub(crate) prologue: Block,
  config: AllocatorConfig,
}

impl<H: HeapSource> SegregatedAllocator<H> {
  /// Sets up the sentinels and the first chunk with the default configuration.
  pub fn init(heap: H) -> Result<Self, InitError> {
    Self::with_config(heap, AllocatorConfig::default())
  }

  pub fn with_config(
    mut heap: H,
    config: AllocatorConfig,
  ) -> Result<Self, InitError> {
    config.validate()?;

    let start = heap.extend(4 * WSIZE)?;
    let mem = heap.memory_mut();
    write_word(mem, start, 0);
    let prologue = Block::at(start + DSIZE);
    prologue.write(mem, Tag::allocated(DSIZE));
    prologue.next(mem).write_header(mem, Tag::EPILOGUE);

    let mut allocator = Self {
      heap,
      index: SegregatedIndex::new(),
      prologue,
      config,
    };
    allocator.grow(config.chunk_size)?;

    debug!(
      "heap initialized at {:#x}: {} bytes, chunk size {}",
      allocator.heap.base_addr(),
      allocator.heap.len(),
      config.chunk_size
    );
    Ok(allocator)
  }

  /// Allocates a block with at least `size` usable bytes.
  ///
  /// Returns `None` for a zero-sized request or when the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<Payload> {
    if size == 0 {
      return None;
    }

    let Some(asize) = block_size_for(size) else {
      warn!("allocation of {size} bytes exceeds the largest block");
      return None;
    };

    let block = match self.find_fit(asize) {
      Some(block) => block,
      None => match self.grow(asize.max(self.config.chunk_size)) {
        Ok(block) => block,
        Err(err) => {
          warn!("allocation of {size} bytes failed: {err}");
          return None;
        }
      },
    };

    self.place(block, asize);
    Some(Payload(block.offset()))
  }

  /// Releases a block. `None` is a no-op.
  pub fn free(
    &mut self,
    ptr: Option<Payload>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };

    let block = ptr.block();
    let mem = self.heap.memory_mut();
    let size = block.size(mem);
    block.write(mem, Tag::free(size));
    self.coalesce(block);
  }

  /// Resizes a block, growing in place whenever the neighbourhood allows.
  ///
  /// `None` behaves as [`allocate`](Self::allocate), a zero `size` as
  /// [`free`](Self::free). On failure `None` is returned and `ptr` stays
  /// valid and untouched.
  pub fn reallocate(
    &mut self,
    ptr: Option<Payload>,
    size: usize,
  ) -> Option<Payload> {
    let Some(ptr) = ptr else {
      return self.allocate(size);
    };
    if size == 0 {
      self.free(Some(ptr));
      return None;
    }

    let Some(asize) = block_size_for(size) else {
      warn!("reallocation to {size} bytes exceeds the largest block");
      return None;
    };

    let block = ptr.block();
    let mem = self.heap.memory();
    let old_size = block.size(mem);

    // Never shrinks: the slack stays with the block.
    if asize <= old_size {
      return Some(ptr);
    }

    let next = block.next(mem);
    let next_tag = next.tag(mem);

    // Absorb the free successor whole, keeping any excess as a growth buffer.
    let combined = old_size + next_tag.size;
    if !next_tag.allocated && combined >= asize && combined <= MAX_BLOCK_SIZE {
      self.index.remove(next, next_tag.size);
      block.write(self.heap.memory_mut(), Tag::allocated(combined));
      trace!("grew {:#x} in place to {} bytes", block.offset(), combined);
      return Some(ptr);
    }

    // Last block before the epilogue: extend the heap by exactly the shortfall.
    if next_tag.size == 0 {
      if let Err(err) = self.heap.extend(asize - old_size) {
        warn!("reallocation to {size} bytes failed: {err}");
        return None;
      }

      let mem = self.heap.memory_mut();
      block.write(mem, Tag::allocated(asize));
      block.next(mem).write_header(mem, Tag::EPILOGUE);
      trace!("extended tail block {:#x} to {} bytes", block.offset(), asize);
      return Some(ptr);
    }

    let moved = self.allocate(size)?;
    let copied = (old_size - DSIZE).min(size);
    self
      .heap
      .memory_mut()
      .copy_within(ptr.0..ptr.0 + copied, moved.0);
    self.free(Some(ptr));
    Some(moved)
  }

  /// Usable bytes of an allocated block.
  pub fn usable_size(
    &self,
    ptr: Payload,
  ) -> usize {
    ptr.block().size(self.heap.memory()) - DSIZE
  }

  pub fn payload(
    &self,
    ptr: Payload,
  ) -> &[u8] {
    let len = self.usable_size(ptr);
    &self.heap.memory()[ptr.0..ptr.0 + len]
  }

  pub fn payload_mut(
    &mut self,
    ptr: Payload,
  ) -> &mut [u8] {
    let len = self.usable_size(ptr);
    &mut self.heap.memory_mut()[ptr.0..ptr.0 + len]
  }

  /// Absolute address of a payload.
  pub fn address(
    &self,
    ptr: Payload,
  ) -> usize {
    self.heap.base_addr() + ptr.0
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn heap_size(&self) -> usize {
    self.heap.len()
  }

  /// Tears the allocator down and returns its heap.
  pub fn into_heap(self) -> H {
    self.heap
  }

  /// Walks every block between the prologue and the epilogue.
  pub fn blocks(&self) -> Blocks<'_> {
    let mem = self.heap.memory();
    Blocks {
      mem,
      cursor: Some(self.prologue.next(mem)),
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_bytes: self.heap.len(),
      ..HeapStats::default()
    };

    for info in self.blocks() {
      if info.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += info.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
      }
    }

    stats
  }

  /// Dumps every block and the free lists at trace level.
  pub fn log_heap(&self) {
    if !log_enabled!(Level::Trace) {
      return;
    }

    trace!("heap {:#x}..{:#x}", self.heap.lo(), self.heap.hi());
    for info in self.blocks() {
      trace!(
        "{:#08x}: [{}:{}]",
        info.offset,
        info.size,
        if info.allocated { 'a' } else { 'f' }
      );
    }
    for class in 0..LIST_LIMIT {
      let count = self.index.class(class).count();
      if count > 0 {
        trace!("list {class}: {count} blocks");
      }
    }
  }

  /// Extends the heap by `bytes` and returns the (coalesced) new free block.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<Block, GrowError> {
    let size = align!(bytes);
    let block = Block::at(self.heap.extend(size)?);

    // The new block's header overwrites the old epilogue.
    let mem = self.heap.memory_mut();
    block.write(mem, Tag::free(size));
    block.next(mem).write_header(mem, Tag::EPILOGUE);
    trace!("heap grew by {} bytes at {:#x}", size, block.offset());

    Ok(self.coalesce(block))
  }

  /// Merges a freshly freed block with free neighbours and files the result.
  ///
  /// A neighbour is left alone when merging it would exceed
  /// [`MAX_BLOCK_SIZE`], the largest size a tag can hold.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let mem = self.heap.memory_mut();
    let prev_tag = block.prev_tag(mem);
    let next = block.next(mem);
    let next_tag = next.tag(mem);
    let mut size = block.size(mem);

    let merge_next = !next_tag.allocated && size + next_tag.size <= MAX_BLOCK_SIZE;
    let after_next = if merge_next { size + next_tag.size } else { size };
    let merge_prev = !prev_tag.allocated && after_next + prev_tag.size <= MAX_BLOCK_SIZE;

    let merged = match (merge_prev, merge_next) {
      (false, false) => block,
      (false, true) => {
        self.index.remove(next, next_tag.size);
        size += next_tag.size;
        block
      }
      (true, false) => {
        let prev = block.prev(mem);
        self.index.remove(prev, prev_tag.size);
        size += prev_tag.size;
        prev
      }
      (true, true) => {
        let prev = block.prev(mem);
        self.index.remove(prev, prev_tag.size);
        self.index.remove(next, next_tag.size);
        size += prev_tag.size + next_tag.size;
        prev
      }
    };

    merged.write(mem, Tag::free(size));
    self.index.insert(merged, size);
    merged
  }

  /// Best fit inside the first size class that has any fit.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<Block> {
    let mem = self.heap.memory();

    for class in class_of(asize)..LIST_LIMIT {
      let mut best = None;
      let mut min_diff = usize::MAX;

      for block in self.index.class(class) {
        let size = block.size(mem);
        if size < asize {
          continue;
        }

        let diff = size - asize;
        if diff == 0 {
          return Some(block);
        }
        if diff < min_diff {
          min_diff = diff;
          best = Some(block);
        }
      }

      if best.is_some() {
        return best;
      }
    }

    None
  }

  /// Marks a free block allocated, splitting off a free remainder when it can
  /// hold a minimum block.
  fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let mem = self.heap.memory_mut();
    let csize = block.size(mem);
    self.index.remove(block, csize);

    if csize - asize >= MIN_BLOCK_SIZE {
      block.write(mem, Tag::allocated(asize));
      let rest = block.next(mem);
      rest.write(mem, Tag::free(csize - asize));
      self.index.insert(rest, csize - asize);
    } else {
      block.write(mem, Tag::allocated(csize));
    }
  }
}

/// Iterator returned by [`SegregatedAllocator::blocks`].
pub struct Blocks<'a> {
  mem: &'a [u8],
  cursor: Option<Block>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = self.cursor?;
    let tag = block.tag(self.mem);
    if tag.size == 0 {
      self.cursor = None;
      return None;
    }

    self.cursor = Some(Block::at(block.offset() + tag.size));
    Some(BlockInfo {
      offset: block.offset(),
      size: tag.size,
      allocated: tag.allocated,
    })
  }
}
