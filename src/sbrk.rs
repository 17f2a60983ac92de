use std::{io, slice};

use libc::{c_void, intptr_t, sbrk};
use log::trace;

use crate::{block::ALIGNMENT, error::GrowError, heap::HeapSource};

/// Returns the current program break.
pub fn program_break() -> *mut c_void {
  // SAFETY: a zero increment only reads the break.
  unsafe { sbrk(0) }
}

/// A heap carved out of the process data segment with `sbrk(2)`.
///
/// The region starts at the (8-byte aligned) program break observed on
/// construction. If anything else in the process moves the break between two
/// extensions the region can no longer grow contiguously, and [`extend`]
/// reports [`GrowError::Discontiguous`]. The bytes obtained by that failed
/// call stay with the process.
///
/// The system allocator may use the same break, so this is mostly useful in
/// programs that keep other allocations away from it, like the `walkthrough`
/// demo.
///
/// [`extend`]: HeapSource::extend
pub struct SbrkHeap {
  base: *mut u8,
  len: usize,
}

impl SbrkHeap {
  pub fn new() -> Result<Self, GrowError> {
    let current = program_break() as usize;
    let pad = align!(current) - current;
    if pad > 0 {
      // SAFETY: the padding bytes are never handed out.
      let previous = unsafe { Self::move_break(pad)? };
      if previous as usize != current {
        return Err(GrowError::Discontiguous {
          expected: current,
          found: previous as usize,
        });
      }
    }

    Ok(Self {
      base: (current + pad) as *mut u8,
      len: 0,
    })
  }

  /// # Safety
  ///
  /// Moving the break hands out memory nothing else may be using; the
  /// caller owns the returned `delta` bytes.
  unsafe fn move_break(delta: usize) -> Result<*mut u8, GrowError> {
    let increment = intptr_t::try_from(delta).map_err(|_| GrowError::Exhausted {
      requested: delta,
      available: intptr_t::MAX as usize,
    })?;

    // SAFETY: a positive increment only grows the data segment.
    let previous = unsafe { sbrk(increment) };
    if previous == usize::MAX as *mut c_void {
      return Err(GrowError::Os(io::Error::last_os_error()));
    }

    Ok(previous.cast::<u8>())
  }
}

impl HeapSource for SbrkHeap {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Result<usize, GrowError> {
    if delta % ALIGNMENT != 0 {
      return Err(GrowError::Misaligned(delta));
    }

    let expected = self.base.wrapping_add(self.len);
    // SAFETY: the new bytes join `[base, base + len)`, which only this heap
    // accesses.
    let previous = unsafe { Self::move_break(delta)? };
    if previous != expected {
      return Err(GrowError::Discontiguous {
        expected: expected as usize,
        found: previous as usize,
      });
    }

    let offset = self.len;
    self.len += delta;
    trace!("program break {:?} -> {:?}", previous, program_break());
    Ok(offset)
  }

  fn len(&self) -> usize {
    self.len
  }

  fn memory(&self) -> &[u8] {
    // SAFETY: `[base, base + len)` was handed to us by sbrk and is only ever
    // accessed through this heap.
    unsafe { slice::from_raw_parts(self.base, self.len) }
  }

  fn memory_mut(&mut self) -> &mut [u8] {
    // SAFETY: see `memory`; `&mut self` makes the view exclusive.
    unsafe { slice::from_raw_parts_mut(self.base, self.len) }
  }
}
