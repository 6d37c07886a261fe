use std::{io::Read, ptr::NonNull};

use rpool::{AllocError, Heap, Protection, page_size};
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mapping with tools like `pmap` or
/// `/proc/<pid>/maps` while the demo is paused.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block of the heap in address order.
fn print_layout(
  label: &str,
  heap: &Heap,
) -> Result<(), AllocError> {
  println!("[{}] PID = {}, blocks:", label, std::process::id());

  for block in heap.blocks()? {
    println!(
      "    offset {:>8}  size {:>8}  {:<9} {:?}",
      block.offset,
      block.size,
      if block.is_free { "free" } else { "allocated" },
      block.protection,
    );
  }

  Ok(())
}

fn print_alloc(
  heap: &Heap,
  size: usize,
  ptr: NonNull<u8>,
) {
  println!(
    "Allocated {} bytes, address = {:?}, pool offset = {:?}",
    size,
    ptr,
    heap.offset_of(ptr)
  );
}

fn main() -> Result<(), AllocError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let page = page_size();
  let heap = Heap::new(rpool::DEFAULT_POOL_CAPACITY)?;

  print_layout("start", &heap)?;
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three allocations carved from the front of the single free block.
  // --------------------------------------------------------------------
  let first = heap.allocate(100)?;
  print_alloc(&heap, 100, first);
  let second = heap.allocate(200)?;
  print_alloc(&heap, 200, second);
  let third = heap.allocate(300)?;
  print_alloc(&heap, 300, third);

  unsafe {
    first.as_ptr().copy_from_nonoverlapping(b"Hello".as_ptr(), 5);
    second.as_ptr().copy_from_nonoverlapping(b"World".as_ptr(), 5);
  }

  print_layout("after three allocations", &heap)?;
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the middle block and reuse it for a smaller request.
  // --------------------------------------------------------------------
  heap.free(second)?;
  let fourth = heap.allocate(150)?;
  println!(
    "\n[2] fourth == second? {}",
    if fourth == second {
      "Yes, first fit reused the freed block"
    } else {
      "No, it was placed somewhere else"
    }
  );

  print_layout("after reuse", &heap)?;
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Grow the first block; its contents move with it.
  // --------------------------------------------------------------------
  let moved = heap.resize(Some(first), 400)?.unwrap_or(first);
  let text = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 5) };
  println!("\n[3] resized first block, data = {:?}", String::from_utf8_lossy(text));

  // --------------------------------------------------------------------
  // 4) Make a multi-page block read-only.
  // --------------------------------------------------------------------
  let big = heap.allocate(page * 4)?;
  unsafe { big.as_ptr().write_bytes(0xAB, page * 4) };
  heap.set_protection(big, page * 4, Protection::READ)?;
  println!(
    "\n[4] read-only? {}, writable? {}",
    heap.query_protection(big, Protection::READ)?,
    heap.query_protection(big, Protection::WRITE)?
  );

  print_layout("after protection", &heap)?;
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Release everything; the pool coalesces back into one block.
  // --------------------------------------------------------------------
  for ptr in [moved, third, fourth, big] {
    heap.free(ptr)?;
  }

  print_layout("end", &heap)?;
  println!("\nHeap Allocator Statistics:\n{}", heap.stats());

  heap.destroy();

  Ok(())
}
