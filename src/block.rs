//! Boundary-tag block layout.
//!
//! Every block carries the same 4-byte tag at both ends. The tag packs the
//! block size (a multiple of 8, so the low three bits are free) together with
//! the allocated flag in bit 0:
//!
//! ```text
//!        header                                          footer
//!   ┌──────────────┬──────────────────────────────────┬──────────────┐
//!   │ size   | a   │             payload              │ size   | a   │
//!   └──────────────┴──────────────────────────────────┴──────────────┘
//!   ▲ bp - 4       ▲ bp                               ▲ bp + size - 8
//!                  └── block offset (handed out as the payload)
//! ```
//!
//! Blocks are addressed by the offset of their payload (`bp`) inside the heap,
//! so the header lives one word before it and the next block's payload begins
//! exactly `size` bytes later.

/// Payload alignment in bytes.
pub const ALIGNMENT: usize = 8;

/// Size of a single header or footer word.
pub const WSIZE: usize = 4;

/// Double word: the combined header and footer overhead of a block.
pub const DSIZE: usize = 8;

/// Smallest block the allocator creates.
///
/// A free block must still have room for its two list links, so even a one
/// byte request occupies 16 bytes.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Largest block size a tag word can describe.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Decoded `(size, allocated)` pair of a header or footer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  /// Zero-sized allocated tag terminating the heap.
  pub const EPILOGUE: Tag = Tag::allocated(0);

  pub const fn free(size: usize) -> Self {
    Self {
      size,
      allocated: false,
    }
  }

  pub const fn allocated(size: usize) -> Self {
    Self {
      size,
      allocated: true,
    }
  }

  pub const fn pack(self) -> u32 {
    debug_assert!(self.size <= MAX_BLOCK_SIZE);
    (self.size as u32 & SIZE_MASK) | if self.allocated { ALLOC_BIT } else { 0 }
  }

  pub const fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOC_BIT != 0,
    }
  }
}

/// Reads the tag word stored at byte offset `at`.
pub fn read_word(
  mem: &[u8],
  at: usize,
) -> u32 {
  let mut bytes = [0u8; WSIZE];
  bytes.copy_from_slice(&mem[at..at + WSIZE]);
  u32::from_ne_bytes(bytes)
}

/// Writes a tag word at byte offset `at`.
pub fn write_word(
  mem: &mut [u8],
  at: usize,
  word: u32,
) {
  mem[at..at + WSIZE].copy_from_slice(&word.to_ne_bytes());
}

/// Block size needed to serve a request of `request` payload bytes.
///
/// Returns `None` when the request cannot be described by a tag word.
pub const fn block_size_for(request: usize) -> Option<usize> {
  if request <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }

  match request.checked_add(DSIZE + ALIGNMENT - 1) {
    Some(padded) if padded & !(ALIGNMENT - 1) <= MAX_BLOCK_SIZE => Some(padded & !(ALIGNMENT - 1)),
    _ => None,
  }
}

/// A block, identified by the heap offset of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
  pub(crate) const fn at(offset: usize) -> Self {
    Self(offset)
  }

  pub(crate) const fn offset(self) -> usize {
    self.0
  }

  pub(crate) const fn header(self) -> usize {
    self.0 - WSIZE
  }

  pub(crate) fn footer(
    self,
    mem: &[u8],
  ) -> usize {
    self.0 + self.size(mem) - DSIZE
  }

  pub(crate) fn tag(
    self,
    mem: &[u8],
  ) -> Tag {
    Tag::unpack(read_word(mem, self.header()))
  }

  pub(crate) fn footer_tag(
    self,
    mem: &[u8],
  ) -> Tag {
    Tag::unpack(read_word(mem, self.footer(mem)))
  }

  pub(crate) fn size(
    self,
    mem: &[u8],
  ) -> usize {
    self.tag(mem).size
  }

  /// Tag of the physically preceding block, read from its footer.
  pub(crate) fn prev_tag(
    self,
    mem: &[u8],
  ) -> Tag {
    Tag::unpack(read_word(mem, self.0 - DSIZE))
  }

  pub(crate) fn next(
    self,
    mem: &[u8],
  ) -> Block {
    Block(self.0 + self.size(mem))
  }

  pub(crate) fn prev(
    self,
    mem: &[u8],
  ) -> Block {
    Block(self.0 - self.prev_tag(mem).size)
  }

  pub(crate) fn write_header(
    self,
    mem: &mut [u8],
    tag: Tag,
  ) {
    write_word(mem, self.header(), tag.pack());
  }

  /// Writes `tag` to both ends of a block spanning `tag.size` bytes.
  pub(crate) fn write(
    self,
    mem: &mut [u8],
    tag: Tag,
  ) {
    write_word(mem, self.header(), tag.pack());
    write_word(mem, self.0 + tag.size - DSIZE, tag.pack());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tag_packing() {
    let tag = Tag::allocated(48);
    assert_eq!(tag.pack(), 49);
    assert_eq!(Tag::unpack(49), tag);

    let tag = Tag::free(4096);
    assert_eq!(tag.pack(), 4096);
    assert_eq!(Tag::unpack(4096), tag);

    assert_eq!(Tag::EPILOGUE.pack(), 1);
  }

  #[test]
  fn test_block_size_for() {
    assert_eq!(block_size_for(1), Some(16));
    assert_eq!(block_size_for(8), Some(16));
    assert_eq!(block_size_for(9), Some(24));
    assert_eq!(block_size_for(16), Some(24));
    assert_eq!(block_size_for(17), Some(32));
    assert_eq!(block_size_for(4088), Some(4096));
    assert_eq!(block_size_for(MAX_BLOCK_SIZE - DSIZE), Some(MAX_BLOCK_SIZE));
    assert_eq!(block_size_for(MAX_BLOCK_SIZE), None);
    assert_eq!(block_size_for(usize::MAX), None);
  }

  #[test]
  fn test_block_navigation() {
    let mut mem = vec![0u8; 64];

    let first = Block::at(8);
    first.write(&mut mem, Tag::allocated(24));
    let second = first.next(&mem);
    assert_eq!(second.offset(), 32);
    second.write(&mut mem, Tag::free(16));
    second.next(&mem).write_header(&mut mem, Tag::EPILOGUE);

    assert_eq!(first.tag(&mem), first.footer_tag(&mem));
    assert_eq!(second.prev_tag(&mem), Tag::allocated(24));
    assert_eq!(second.prev(&mem), first);
    assert_eq!(second.footer(&mem), 40);
    assert_eq!(second.next(&mem).tag(&mem), Tag::EPILOGUE);
  }
}
