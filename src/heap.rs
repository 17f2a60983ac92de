//! Heap-growth primitives.
//!
//! The allocator never asks anyone for memory except its [`HeapSource`], and
//! the only thing it can ask for is "N more bytes at the end". Everything the
//! allocator hands out is an offset into that single growing region.
//!
//! ```text
//!   lo()                                       hi()
//!   ┌──────────────────────────────────────────┐ ─ ─ ─ ─ ─ ─ ─ ┐
//!   │            bytes handed out so far       │  extend(delta)
//!   └──────────────────────────────────────────┘ ─ ─ ─ ─ ─ ─ ─ ┘
//!                                              ▲
//!                                              └── returned offset of the new bytes
//! ```

use std::slice;

use log::trace;

use crate::{block::ALIGNMENT, error::GrowError};

/// Ceiling of an [`Arena`] created with [`Arena::new`] (20 MiB).
pub const DEFAULT_HEAP_LIMIT: usize = 20 * (1 << 20);

/// A contiguous, monotonically growing region of memory.
pub trait HeapSource {
  /// Extends the region by `delta` bytes and returns the offset of the first
  /// new byte. Existing bytes never move. The content of new bytes is
  /// unspecified.
  fn extend(
    &mut self,
    delta: usize,
  ) -> Result<usize, GrowError>;

  /// Number of bytes currently in the region.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Offset of the first byte of the region.
  fn lo(&self) -> usize {
    0
  }

  /// Offset of the last byte of the region.
  fn hi(&self) -> usize {
    self.len().saturating_sub(1)
  }

  fn memory(&self) -> &[u8];

  fn memory_mut(&mut self) -> &mut [u8];

  /// Address of offset zero.
  fn base_addr(&self) -> usize {
    self.memory().as_ptr() as usize
  }
}

/// A simulated heap: a fixed, 8-byte-aligned reservation with a break pointer.
pub struct Arena {
  words: Box<[u64]>,
  brk: usize,
}

impl Arena {
  pub fn new() -> Self {
    Self::with_limit(DEFAULT_HEAP_LIMIT)
  }

  /// Creates an arena that refuses to grow past `limit` bytes.
  pub fn with_limit(limit: usize) -> Self {
    let words = align!(limit) / size_of::<u64>();
    Self {
      words: vec![0u64; words].into_boxed_slice(),
      brk: 0,
    }
  }

  pub fn limit(&self) -> usize {
    self.words.len() * size_of::<u64>()
  }

  /// Rewinds the break to zero. Any allocator built on the old content must
  /// be discarded.
  pub fn reset(&mut self) {
    self.brk = 0;
  }
}

impl Default for Arena {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapSource for Arena {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Result<usize, GrowError> {
    if delta % ALIGNMENT != 0 {
      return Err(GrowError::Misaligned(delta));
    }

    let available = self.limit() - self.brk;
    if delta > available {
      return Err(GrowError::Exhausted {
        requested: delta,
        available,
      });
    }

    let old = self.brk;
    self.brk += delta;
    trace!("arena break {:#x} -> {:#x}", old, self.brk);
    Ok(old)
  }

  fn len(&self) -> usize {
    self.brk
  }

  fn memory(&self) -> &[u8] {
    // SAFETY: the reservation is `limit()` bytes of initialized u64s and
    // `brk <= limit()`; any bit pattern is a valid u8.
    unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.brk) }
  }

  fn memory_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `memory`, and `&mut self` makes the view exclusive.
    unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.brk) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_grows_monotonically() {
    let mut arena = Arena::with_limit(64);
    assert!(arena.is_empty());

    assert_eq!(arena.extend(16).unwrap(), 0);
    assert_eq!(arena.extend(24).unwrap(), 16);
    assert_eq!(arena.len(), 40);
    assert_eq!(arena.lo(), 0);
    assert_eq!(arena.hi(), 39);
    assert_eq!(arena.base_addr() % ALIGNMENT, 0);
  }

  #[test]
  fn test_arena_preserves_bytes_across_growth() {
    let mut arena = Arena::with_limit(64);
    arena.extend(8).unwrap();
    arena.memory_mut().copy_from_slice(b"segalloc");
    let base = arena.base_addr();

    arena.extend(32).unwrap();

    assert_eq!(&arena.memory()[..8], b"segalloc");
    assert_eq!(arena.base_addr(), base);
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut arena = Arena::with_limit(32);
    arena.extend(24).unwrap();

    let err = arena.extend(16).unwrap_err();
    assert!(matches!(
      err,
      GrowError::Exhausted {
        requested: 16,
        available: 8
      }
    ));
    assert_eq!(arena.len(), 24);
  }

  #[test]
  fn test_arena_rejects_misaligned_delta() {
    let mut arena = Arena::with_limit(32);
    assert!(matches!(arena.extend(5), Err(GrowError::Misaligned(5))));
    assert!(arena.is_empty());
  }

  #[test]
  fn test_arena_reset() {
    let mut arena = Arena::with_limit(32);
    arena.extend(32).unwrap();
    arena.reset();
    assert!(arena.is_empty());
    assert_eq!(arena.extend(32).unwrap(), 0);
  }
}
