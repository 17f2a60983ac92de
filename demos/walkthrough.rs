use std::io::Read;

use log::LevelFilter;
use segalloc::{SbrkHeap, SegregatedAllocator, StderrLogger, program_break};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb`, or just watch how the program break moves.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn print_heap(allocator: &SegregatedAllocator<SbrkHeap>) {
  for block in allocator.blocks() {
    println!(
      "    {:#08x}: {:>6} bytes {}",
      block.offset,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn main() {
  StderrLogger::new(LevelFilter::Debug).init().unwrap();

  print_program_break("start");
  let heap = SbrkHeap::new().unwrap();
  let mut allocator = SegregatedAllocator::init(heap).unwrap();
  print_program_break("after init");
  print_heap(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Two small allocations are carved off the front of the first chunk.
  // --------------------------------------------------------------------
  let first = allocator.allocate(4).unwrap();
  let second = allocator.allocate(12).unwrap();
  allocator.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  println!("\n[1] allocate(4) -> {:#x}, allocate(12) -> {:#x}", allocator.address(first), allocator.address(second));
  print_heap(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Freeing the first block leaves a 16-byte hole that a small request
  //    reuses exactly.
  // --------------------------------------------------------------------
  allocator.free(Some(first));
  let third = allocator.allocate(2).unwrap();
  println!(
    "\n[2] free(first), allocate(2) -> {:#x} (reused: {})",
    allocator.address(third),
    third == first
  );
  print_heap(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Growing the second block swallows the free space behind it.
  // --------------------------------------------------------------------
  let grown = allocator.reallocate(Some(second), 200).unwrap();
  println!("\n[3] reallocate(second, 200) moved: {}", grown != second);
  print_heap(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A 64 KiB request does not fit the first chunk; the heap grows.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = allocator.allocate(64 * 1024).unwrap();
  allocator.payload_mut(big).fill(0xAB);
  println!("\n[4] allocate(64 KiB) -> {:#x}", allocator.address(big));
  print_program_break("after large alloc");
  print_heap(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Freeing everything coalesces the heap back into one free block.
  // --------------------------------------------------------------------
  for ptr in [third, grown, big] {
    allocator.free(Some(ptr));
  }
  println!("\n[5] freed everything, check = {:?}", allocator.check());
  print_heap(&allocator);
  println!("\n[6] End of example. The heap is never returned; the OS reclaims it on exit.");
}
