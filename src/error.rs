use std::io;

/// Failure to extend the heap.
#[derive(Debug, thiserror::Error)]
pub enum GrowError {
  #[error("heap exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },
  #[error("heap extension of {0} bytes is not a multiple of the alignment unit")]
  Misaligned(usize),
  #[error("program break moved externally: expected {expected:#x}, found {found:#x}")]
  Discontiguous { expected: usize, found: usize },
  #[error("sbrk failed: {0}")]
  Os(#[source] io::Error),
}

/// Failure to bring up an allocator.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
  #[error("invalid chunk size {0}")]
  InvalidChunkSize(usize),
  #[error("unable to reserve the initial heap: {0}")]
  Heap(#[from] GrowError),
}

/// Heap inconsistency found by [`SegregatedAllocator::check`](crate::SegregatedAllocator::check).
///
/// Offsets are payload offsets inside the heap.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
  #[error("bad prologue at {offset:#x}")]
  BadPrologue { offset: usize },
  #[error("bad epilogue at {offset:#x}")]
  BadEpilogue { offset: usize },
  #[error("block {offset:#x} is not 8-byte aligned")]
  Misaligned { offset: usize },
  #[error("block {offset:#x} has invalid size {size}")]
  BadSize { offset: usize, size: usize },
  #[error("block {offset:#x} extends past the end of the heap")]
  OutOfHeap { offset: usize },
  #[error("header {header:#x} does not match footer {footer:#x} at {offset:#x}")]
  TagMismatch { offset: usize, header: u32, footer: u32 },
  #[error("contiguous free blocks not coalesced at {offset:#x}")]
  Uncoalesced { offset: usize },
  #[error("free list pointer {offset:#x} out of bounds in list {class}")]
  OutOfBounds { class: usize, offset: usize },
  #[error("allocated block {offset:#x} in free list {class}")]
  AllocatedInList { class: usize, offset: usize },
  #[error("block {offset:#x} of size {size} filed under list {class}")]
  WrongClass { class: usize, offset: usize, size: usize },
  #[error("prev pointer inconsistency at {offset:#x}: expected {expected:?}, found {found:?}")]
  BrokenLink {
    offset: usize,
    expected: Option<usize>,
    found: Option<usize>,
  },
  #[error("free list {class} does not terminate")]
  ListCycle { class: usize },
  #[error("{indexed} link entries but only {listed} reachable list nodes")]
  OrphanLinks { listed: usize, indexed: usize },
  #[error("free block count mismatch: heap {heap}, lists {lists}")]
  FreeCountMismatch { heap: usize, lists: usize },
}
