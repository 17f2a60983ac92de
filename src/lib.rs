//! # segalloc - A Segregated Free-List Allocator
//!
//! This crate provides a general-purpose `malloc`/`free`/`realloc` style
//! allocator that manages **one contiguous, growable heap**. It never calls a
//! system allocator: every byte comes from a [`HeapSource`], which can only
//! extend the heap at its end (the way `sbrk(2)` moves the program break).
//!
//! ## Overview
//!
//! Every block carries a boundary tag at both ends, and free blocks are filed
//! into 20 size-classed lists:
//!
//! ```text
//!   Heap:
//!
//!   ┌─────┬──────────┬─────────┬────────┬─────────┬─────────────┬──────────┐
//!   │ pad │ prologue │  A: 48  │ F: 96  │  A: 24  │   F: 3928   │ epilogue │
//!   └─────┴──────────┴─────────┴────────┴─────────┴─────────────┴──────────┘
//!                                  ▲                    ▲
//!   Free lists:                    │                    │
//!                                  │                    │
//!   class  0  [≤16]   ─ ∅          │                    │
//!   ...                            │                    │
//!   class 13  [≤128]  ─────────────┘                    │
//!   ...                                                 │
//!   class 18  [≤4096] ──────────────────────────────────┘
//!   class 19  [>4096] ─ ∅
//! ```
//!
//! - **Placement**: best fit inside the first size class (scanning upwards
//!   from the request's class) that holds any block large enough. Leftovers
//!   of at least 16 bytes are split off as a new free block.
//! - **Coalescing**: immediate. Freeing a block merges it with free
//!   neighbours found through their boundary tags, so no two adjacent blocks
//!   are ever both free.
//! - **Reallocation**: never shrinks; grows in place by absorbing a free
//!   successor or, for the last block, by extending the heap by exactly the
//!   shortfall; only then falls back to allocate-copy-free.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - align! macro (8-byte rounding)
//!   ├── block      - boundary tags, block layout and size math
//!   ├── free_list  - segregated free-list index
//!   ├── heap       - HeapSource trait and the Arena simulated heap
//!   ├── sbrk       - HeapSource over the real program break (unix)
//!   ├── config     - AllocatorConfig
//!   ├── error      - GrowError, InitError, Corruption
//!   ├── allocator  - SegregatedAllocator
//!   ├── check      - heap consistency checker
//!   ├── trace      - allocation trace parser and replayer
//!   └── logger     - stderr logger for the demos
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Arena, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::init(Arena::new()).unwrap();
//!
//! let ptr = allocator.allocate(100).unwrap();
//! allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = allocator.reallocate(Some(ptr), 300).unwrap();
//! assert_eq!(&allocator.payload(ptr)[..5], b"hello");
//!
//! allocator.free(Some(ptr));
//! assert!(allocator.check().is_ok());
//! ```
//!
//! ## Block Handles
//!
//! The allocator hands out [`Payload`] handles, which are offsets into the
//! heap rather than raw pointers. Payload bytes are reached through
//! [`SegregatedAllocator::payload`] and [`SegregatedAllocator::payload_mut`];
//! [`SegregatedAllocator::address`] gives the absolute (8-byte aligned)
//! address when one is needed.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization; callers serialize access
//! - **No shrinking**: the heap never returns memory
//! - **Fixed alignment**: every payload is 8-byte aligned, nothing more
//! - **Block size**: tags are 32 bits wide, so a single block is below 4 GiB

#[macro_use]
pub mod align;
pub mod block;

mod allocator;
mod check;
mod config;
mod error;
mod free_list;
mod heap;
mod logger;
#[cfg(unix)]
mod sbrk;
mod trace;

pub use allocator::{BlockInfo, Blocks, HeapStats, Payload, SegregatedAllocator};
pub use config::{AllocatorConfig, CHUNK_SIZE};
pub use error::{Corruption, GrowError, InitError};
pub use free_list::{LIST_LIMIT, class_of};
pub use heap::{Arena, DEFAULT_HEAP_LIMIT, HeapSource};
pub use logger::StderrLogger;
#[cfg(unix)]
pub use sbrk::{SbrkHeap, program_break};
pub use trace::{Op, ReplayError, ReplayStats, Trace, TraceError};
