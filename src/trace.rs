//! Allocation traces.
//!
//! A trace is the classic allocator-lab text format: four header numbers
//! followed by one operation per line.
//!
//! ```text
//!   20000        suggested heap size (unused)
//!   2            number of distinct ids
//!   4            number of operations
//!   1            weight (unused)
//!   a 0 512      allocate 512 bytes as id 0
//!   a 1 128
//!   r 0 640      reallocate id 0 to 640 bytes
//!   f 1          free id 1
//! ```
//!
//! Replaying a trace checks every result the way a grading driver would:
//! alignment, no overlap with live blocks, and that payload bytes survive
//! until the block is freed or reallocated.

use std::{collections::BTreeMap, num::ParseIntError, str::FromStr};

use log::debug;

use crate::{
  allocator::{Payload, SegregatedAllocator},
  block::ALIGNMENT,
  error::Corruption,
  heap::HeapSource,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
  Alloc { id: usize, size: usize },
  Free { id: usize },
  Realloc { id: usize, size: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
  pub suggested_heap: usize,
  pub num_ids: usize,
  pub weight: usize,
  pub ops: Vec<Op>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
  #[error("line {line}: missing {what}")]
  Missing { line: usize, what: &'static str },
  #[error("line {line}: invalid number {value:?}")]
  InvalidNumber {
    line: usize,
    value: String,
    #[source]
    source: ParseIntError,
  },
  #[error("line {line}: unknown operation {op:?}")]
  UnknownOp { line: usize, op: String },
  #[error("line {line}: id {id} is outside the {num_ids} declared ids")]
  IdOutOfRange { line: usize, id: usize, num_ids: usize },
  #[error("header declares {expected} operations, found {found}")]
  OpCount { expected: usize, found: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
  #[error("op {op}: out of memory")]
  OutOfMemory { op: usize },
  #[error("op {op}: id {id} is not allocated")]
  NotLive { op: usize, id: usize },
  #[error("op {op}: block for id {id} at {address:#x} is misaligned")]
  Misaligned { op: usize, id: usize, address: usize },
  #[error("op {op}: block for id {id} overlaps a live block")]
  Overlap { op: usize, id: usize },
  #[error("op {op}: payload of id {id} was overwritten")]
  ContentLost { op: usize, id: usize },
  #[error("op {op}: {source}")]
  Corrupted {
    op: usize,
    #[source]
    source: Corruption,
  },
}

/// Outcome of a successful replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayStats {
  pub ops: usize,
  /// Largest sum of requested sizes live at the same time.
  pub peak_live_bytes: usize,
  /// Heap size after the last operation.
  pub heap_bytes: usize,
}

impl ReplayStats {
  /// Peak payload over heap size, the lab's space utilization metric.
  pub fn utilization(&self) -> f64 {
    if self.heap_bytes == 0 {
      return 0.0;
    }
    self.peak_live_bytes as f64 / self.heap_bytes as f64
  }
}

fn number(
  line: usize,
  field: Option<&str>,
  what: &'static str,
) -> Result<usize, TraceError> {
  let value = field.ok_or(TraceError::Missing { line, what })?;
  value.parse().map_err(|source| TraceError::InvalidNumber {
    line,
    value: value.to_owned(),
    source,
  })
}

impl FromStr for Trace {
  type Err = TraceError;

  fn from_str(text: &str) -> Result<Self, TraceError> {
    let mut lines = text
      .lines()
      .enumerate()
      .map(|(i, line)| (i + 1, line.trim()))
      .filter(|(_, line)| !line.is_empty());

    let mut header = [0usize; 4];
    for (slot, what) in header
      .iter_mut()
      .zip(["heap size", "id count", "op count", "weight"])
    {
      let (line, text) = lines.next().ok_or(TraceError::Missing { line: 0, what })?;
      *slot = number(line, Some(text), what)?;
    }
    let [suggested_heap, num_ids, num_ops, weight] = header;

    // Sized by the lines present, never by the header count.
    let mut ops = Vec::new();
    for (line, text) in lines {
      let mut fields = text.split_whitespace();
      let kind = fields.next().unwrap_or_default();
      let id = number(line, fields.next(), "id")?;
      if id >= num_ids {
        return Err(TraceError::IdOutOfRange { line, id, num_ids });
      }

      let op = match kind {
        "a" => Op::Alloc {
          id,
          size: number(line, fields.next(), "size")?,
        },
        "r" => Op::Realloc {
          id,
          size: number(line, fields.next(), "size")?,
        },
        "f" => Op::Free { id },
        other => {
          return Err(TraceError::UnknownOp {
            line,
            op: other.to_owned(),
          });
        }
      };
      ops.push(op);
    }

    if ops.len() != num_ops {
      return Err(TraceError::OpCount {
        expected: num_ops,
        found: ops.len(),
      });
    }

    Ok(Self {
      suggested_heap,
      num_ids,
      weight,
      ops,
    })
  }
}

/// Byte expected at position `i` of the payload owned by `id`.
fn pattern(
  id: usize,
  i: usize,
) -> u8 {
  (id.wrapping_mul(31).wrapping_add(i) & 0xFF) as u8
}

struct Live {
  ptr: Payload,
  size: usize,
}

struct Replay<'a, H: HeapSource> {
  allocator: &'a mut SegregatedAllocator<H>,
  // id -> its live block
  live: BTreeMap<usize, Live>,
  // payload offset -> end offset of the requested bytes
  ranges: BTreeMap<usize, usize>,
  live_bytes: usize,
  peak_live_bytes: usize,
}

impl<H: HeapSource> Replay<'_, H> {
  fn claim(
    &mut self,
    op: usize,
    id: usize,
    ptr: Payload,
    size: usize,
  ) -> Result<(), ReplayError> {
    let address = self.allocator.address(ptr);
    if address % ALIGNMENT != 0 {
      return Err(ReplayError::Misaligned { op, id, address });
    }

    let (start, end) = (ptr.offset(), ptr.offset() + size);
    if let Some((_, &prev_end)) = self.ranges.range(..end).next_back() {
      if prev_end > start {
        return Err(ReplayError::Overlap { op, id });
      }
    }

    self.ranges.insert(start, end);
    self.live.insert(id, Live { ptr, size });
    self.live_bytes += size;
    self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
    Ok(())
  }

  fn release(
    &mut self,
    op: usize,
    id: usize,
  ) -> Result<Live, ReplayError> {
    let live = self.live.remove(&id).ok_or(ReplayError::NotLive { op, id })?;
    self.ranges.remove(&live.ptr.offset());
    self.live_bytes -= live.size;
    Ok(live)
  }

  fn fill(
    &mut self,
    id: usize,
    ptr: Payload,
    size: usize,
  ) {
    for (i, byte) in self.allocator.payload_mut(ptr)[..size].iter_mut().enumerate() {
      *byte = pattern(id, i);
    }
  }

  fn verify(
    &self,
    op: usize,
    id: usize,
    ptr: Payload,
    len: usize,
  ) -> Result<(), ReplayError> {
    let intact = self.allocator.payload(ptr)[..len]
      .iter()
      .enumerate()
      .all(|(i, &byte)| byte == pattern(id, i));
    if !intact {
      return Err(ReplayError::ContentLost { op, id });
    }
    Ok(())
  }

  fn step(
    &mut self,
    op: usize,
    entry: Op,
  ) -> Result<(), ReplayError> {
    match entry {
      Op::Alloc { id, size } => {
        // Reusing a live id drops the block it named.
        if self.live.contains_key(&id) {
          let live = self.release(op, id)?;
          self.verify(op, id, live.ptr, live.size)?;
          self.allocator.free(Some(live.ptr));
        }
        if size == 0 {
          return Ok(());
        }
        let ptr = self
          .allocator
          .allocate(size)
          .ok_or(ReplayError::OutOfMemory { op })?;
        self.claim(op, id, ptr, size)?;
        self.fill(id, ptr, size);
      }
      Op::Free { id } => {
        let live = self.release(op, id)?;
        self.verify(op, id, live.ptr, live.size)?;
        self.allocator.free(Some(live.ptr));
      }
      Op::Realloc { id, size } => {
        let live = self.release(op, id)?;
        self.verify(op, id, live.ptr, live.size)?;
        let Some(ptr) = self.allocator.reallocate(Some(live.ptr), size) else {
          if size == 0 {
            return Ok(());
          }
          return Err(ReplayError::OutOfMemory { op });
        };
        self.claim(op, id, ptr, size)?;
        self.verify(op, id, ptr, live.size.min(size))?;
        self.fill(id, ptr, size);
      }
    }
    Ok(())
  }
}

impl Trace {
  /// Runs every operation against `allocator`, verifying each result.
  ///
  /// With `checked`, the heap consistency checker runs after every step.
  pub fn replay<H: HeapSource>(
    &self,
    allocator: &mut SegregatedAllocator<H>,
    checked: bool,
  ) -> Result<ReplayStats, ReplayError> {
    let mut replay = Replay {
      allocator,
      live: BTreeMap::new(),
      ranges: BTreeMap::new(),
      live_bytes: 0,
      peak_live_bytes: 0,
    };

    for (op, &entry) in self.ops.iter().enumerate() {
      replay.step(op, entry)?;
      if checked {
        replay
          .allocator
          .check()
          .map_err(|source| ReplayError::Corrupted { op, source })?;
      }
    }

    let stats = ReplayStats {
      ops: self.ops.len(),
      peak_live_bytes: replay.peak_live_bytes,
      heap_bytes: replay.allocator.heap_size(),
    };
    debug!(
      "replayed {} ops, utilization {:.1}%",
      stats.ops,
      stats.utilization() * 100.0
    );
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap::Arena;

  const SHORT: &str = "
    20000
    2
    6
    1
    a 0 2040
    a 1 2040
    f 1
    r 0 4000
    f 0
    a 1 48
  ";

  #[test]
  fn test_parse() {
    let trace: Trace = SHORT.parse().unwrap();

    assert_eq!(trace.suggested_heap, 20000);
    assert_eq!(trace.num_ids, 2);
    assert_eq!(trace.weight, 1);
    assert_eq!(trace.ops[0], Op::Alloc { id: 0, size: 2040 });
    assert_eq!(trace.ops[2], Op::Free { id: 1 });
    assert_eq!(trace.ops[3], Op::Realloc { id: 0, size: 4000 });
    assert_eq!(trace.ops.len(), 6);
  }

  #[test]
  fn test_parse_errors() {
    assert!(matches!(
      "1\n1\n".parse::<Trace>(),
      Err(TraceError::Missing { what: "op count", .. })
    ));
    assert!(matches!(
      "1\n1\n1\n1\nx 0 8\n".parse::<Trace>(),
      Err(TraceError::UnknownOp { line: 5, .. })
    ));
    assert!(matches!(
      "1\n1\n1\n1\na 3 8\n".parse::<Trace>(),
      Err(TraceError::IdOutOfRange { id: 3, .. })
    ));
    assert!(matches!(
      "1\n1\n1\n1\na 0 lots\n".parse::<Trace>(),
      Err(TraceError::InvalidNumber { line: 5, .. })
    ));
    assert!(matches!(
      "1\n1\n2\n1\na 0 8\n".parse::<Trace>(),
      Err(TraceError::OpCount {
        expected: 2,
        found: 1
      })
    ));
  }

  #[test]
  fn test_parse_ignores_header_sizes() {
    assert!(matches!(
      "1\n1\n18446744073709551615\n1\na 0 8\n".parse::<Trace>(),
      Err(TraceError::OpCount {
        expected: usize::MAX,
        found: 1
      })
    ));

    let trace: Trace = "0\n18446744073709551615\n2\n1\na 4096 8\nf 4096\n".parse().unwrap();
    let mut allocator = SegregatedAllocator::init(Arena::with_limit(1 << 16)).unwrap();
    let stats = trace.replay(&mut allocator, true).unwrap();
    assert_eq!(stats.ops, 2);
    assert_eq!(stats.peak_live_bytes, 8);
  }

  #[test]
  fn test_replay_short_trace() {
    let trace: Trace = SHORT.parse().unwrap();
    let mut allocator = SegregatedAllocator::init(Arena::with_limit(1 << 20)).unwrap();

    let stats = trace.replay(&mut allocator, true).unwrap();

    assert_eq!(stats.ops, 6);
    assert_eq!(stats.peak_live_bytes, 4080);
    assert!(stats.utilization() > 0.0 && stats.utilization() <= 1.0);
  }

  #[test]
  fn test_replay_reports_exhaustion() {
    let trace: Trace = "0\n1\n1\n1\na 0 100000\n".parse().unwrap();
    let mut allocator = SegregatedAllocator::init(Arena::with_limit(1 << 16)).unwrap();

    assert!(matches!(
      trace.replay(&mut allocator, false),
      Err(ReplayError::OutOfMemory { op: 0 })
    ));
  }

  #[test]
  fn test_replay_rejects_free_of_dead_id() {
    let trace: Trace = "0\n1\n1\n1\nf 0\n".parse().unwrap();
    let mut allocator = SegregatedAllocator::init(Arena::with_limit(1 << 16)).unwrap();

    assert!(matches!(
      trace.replay(&mut allocator, false),
      Err(ReplayError::NotLive { op: 0, id: 0 })
    ));
  }
}
