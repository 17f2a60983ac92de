use crate::{
  block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
  error::InitError,
};

/// Default heap extension when no free block fits (4 KiB).
pub const CHUNK_SIZE: usize = 1 << 12;

/// Tunables of a [`SegregatedAllocator`](crate::SegregatedAllocator).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Minimum number of bytes requested from the heap when no free block fits.
  /// The initial heap is one chunk as well.
  pub chunk_size: usize,
}

impl AllocatorConfig {
  pub const fn new() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
    }
  }

  pub const fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn validate(&self) -> Result<(), InitError> {
    let chunk = self.chunk_size;
    if chunk < MIN_BLOCK_SIZE || chunk > MAX_BLOCK_SIZE || align!(chunk) != chunk {
      return Err(InitError::InvalidChunkSize(chunk));
    }
    Ok(())
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_chunk() {
    let config = AllocatorConfig::default();
    assert_eq!(config.chunk_size, 4096);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_rejects_bad_chunks() {
    for chunk in [0, 8, 100, 4097] {
      let config = AllocatorConfig::new().with_chunk_size(chunk);
      assert!(matches!(config.validate(), Err(InitError::InvalidChunkSize(c)) if c == chunk));
    }
    assert!(AllocatorConfig::new().with_chunk_size(64).validate().is_ok());
  }
}
