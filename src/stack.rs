use std::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
  align::checked_align,
  error::{AllocError, AllocResult},
  pool::Pool,
  stats::Statistics,
};

/// Bump allocator over a fixed pool with strict LIFO frees.
///
/// ```text
///   ┌──────┬──────┬──────┬──────────────────────────────────┐
///   │  A1  │  A2  │  A3  │            unused                │
///   └──────┴──────┴──────┴──────────────────────────────────┘
///                        ▲                                  ▲
///                  frame pointer                         capacity
/// ```
///
/// Only the most recent allocation can be freed; freeing anything else is
/// ignored, so callers must release frames in reverse order.
pub struct StackAllocator {
  inner: Mutex<StackState>,
}

struct StackState {
  pool: Pool,
  frame_pointer: usize,
  /// Start offset of every live allocation, oldest first.
  frames: Vec<usize>,
  stats: Statistics,
}

impl StackState {
  fn allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    if size == 0 {
      return Err(AllocError::InvalidArgument("zero-size allocation"));
    }

    let end = checked_align(size).and_then(|s| s.checked_add(self.frame_pointer));

    let Some(end) = end.filter(|end| *end <= self.pool.len()) else {
      self.stats.record_failure();
      trace!(requested = size, used = self.frame_pointer, "stack exhausted");

      return Err(AllocError::OutOfMemory {
        requested: size,
        capacity: self.pool.len(),
      });
    };

    let offset = self.frame_pointer;
    let ptr = unsafe { self.pool.at(offset) };

    self.frames.push(offset);
    self.frame_pointer = end;
    self.stats.record_allocation(end - offset);
    trace!(offset, size = end - offset, "pushed frame");

    Ok(ptr)
  }

  fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) -> bool {
    let top = self.frames.last().copied();

    match (top, self.pool.offset_of(ptr)) {
      (Some(top), Some(offset)) if top == offset => {
        self.frames.pop();
        let released = self.frame_pointer - top;
        self.frame_pointer = top;
        self.stats.record_free(released);
        trace!(offset, released, "popped frame");

        true
      }
      _ => {
        trace!(?ptr, "ignoring free of a non-top frame");

        false
      }
    }
  }
}

impl StackAllocator {
  /// Reserves a pool of `capacity` bytes (rounded up to 8).
  pub fn new(capacity: usize) -> AllocResult<Self> {
    let pool = Pool::reserve(capacity)?;

    debug!(capacity = pool.len(), "stack allocator initialized");

    Ok(Self {
      inner: Mutex::new(StackState {
        pool,
        frame_pointer: 0,
        frames: Vec::new(),
        stats: Statistics::default(),
      }),
    })
  }

  fn lock(&self) -> MutexGuard<'_, StackState> {
    self.inner.lock()
  }

  /// Bumps the frame pointer by `size` rounded up to 8 bytes.
  pub fn allocate(
    &self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    self.lock().allocate(size)
  }

  /// Pops the top frame if `ptr` is its start.
  ///
  /// Returns whether the frame was released. Any other pointer is ignored.
  pub fn free(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self.lock().free(ptr)
  }

  pub fn capacity(&self) -> usize {
    self.lock().pool.len()
  }

  /// Bytes between the pool base and the frame pointer.
  pub fn used(&self) -> usize {
    self.lock().frame_pointer
  }

  pub fn remaining(&self) -> usize {
    let state = self.lock();
    state.pool.len() - state.frame_pointer
  }

  /// Snapshot of the usage counters.
  pub fn stats(&self) -> Statistics {
    self.lock().stats
  }

  pub fn reset_stats(&self) {
    self.lock().stats = Statistics::default();
  }

  /// Unmaps the pool. Every pointer handed out by this allocator dangles
  /// afterwards.
  pub fn destroy(self) {
    debug!(capacity = self.capacity(), "destroying stack allocator");
  }
}

#[cfg(test)]
mod tests {
  use std::{mem, sync::Arc, thread};

  use super::*;

  #[test]
  fn test_alloc() {
    let allocator = StackAllocator::new(1024).unwrap();

    unsafe {
      let first_addr = allocator.allocate(mem::size_of::<u64>()).unwrap().cast::<u64>();

      first_addr.write(3);

      assert_eq!(first_addr.read(), 3);

      let size: usize = 6;

      let second_addr = allocator
        .allocate(size * mem::size_of::<u16>())
        .unwrap()
        .cast::<u16>();

      for i in 0..size {
        second_addr.add(i).write((i + 1) as u16);
      }

      assert_eq!(first_addr.read(), 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, second_addr.add(i).read());
      }

      assert!(second_addr.cast::<u8>() > first_addr.cast::<u8>());
    }

    assert_eq!(allocator.used(), 8 + 16);
  }

  #[test]
  fn test_alignment() {
    let allocator = StackAllocator::new(1024).unwrap();
    let base = allocator.allocate(3).unwrap();

    for size in [1, 7, 9, 33] {
      let ptr = allocator.allocate(size).unwrap();
      assert_eq!((ptr.as_ptr() as usize - base.as_ptr() as usize) % 8, 0);
    }
  }

  #[test]
  fn test_lifo_discipline() {
    let allocator = StackAllocator::new(1024).unwrap();

    let a = allocator.allocate(24).unwrap();
    let b = allocator.allocate(40).unwrap();

    // A is not on top: ignored, and its space is never handed out again.
    assert!(!allocator.free(a));
    let c = allocator.allocate(8).unwrap();
    assert!(c > b);
    assert!(allocator.free(c));

    assert!(allocator.free(b));
    let again = allocator.allocate(40).unwrap();
    assert_eq!(again, b);

    assert!(allocator.free(again));
    assert!(allocator.free(a));
    assert_eq!(allocator.used(), 0);
  }

  #[test]
  fn test_free_releases_whole_frame() {
    let allocator = StackAllocator::new(1024).unwrap();

    let ptr = allocator.allocate(100).unwrap();
    assert_eq!(allocator.used(), 104);

    assert!(allocator.free(ptr));
    assert_eq!(allocator.used(), 0);

    let stats = allocator.stats();
    assert_eq!(stats.total_freed, 104);
    assert_eq!(stats.current_usage, 0);
  }

  #[test]
  fn test_foreign_pointer_ignored() {
    let allocator = StackAllocator::new(64).unwrap();
    let _a = allocator.allocate(8).unwrap();
    let mut local = 0u8;

    assert!(!allocator.free(NonNull::from(&mut local)));
    assert_eq!(allocator.used(), 8);
  }

  #[test]
  fn test_out_of_memory() {
    let allocator = StackAllocator::new(64).unwrap();

    allocator.allocate(60).unwrap();
    let err = allocator.allocate(8).unwrap_err();

    assert!(err.is_out_of_memory());
    assert_eq!(allocator.remaining(), 0);
    assert_eq!(allocator.stats().failed_allocations, 1);
    assert_eq!(allocator.stats().allocation_count, 1);
  }

  #[test]
  fn test_zero_size_is_rejected() {
    let allocator = StackAllocator::new(64).unwrap();

    assert!(matches!(
      allocator.allocate(0),
      Err(AllocError::InvalidArgument(_))
    ));
    assert_eq!(allocator.stats(), Statistics::default());
  }

  #[test]
  fn test_stats_and_reset() {
    let allocator = StackAllocator::new(1024).unwrap();

    let _a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(32).unwrap();
    allocator.free(b);

    let stats = allocator.stats();
    assert_eq!(stats.total_allocated, 48);
    assert_eq!(stats.total_freed, 32);
    assert_eq!(stats.peak_usage, 48);
    assert_eq!(stats.current_usage, stats.total_allocated - stats.total_freed);

    allocator.reset_stats();
    assert_eq!(allocator.stats(), Statistics::default());

    allocator.destroy();
  }

  #[test]
  fn test_concurrent_threads() {
    let allocator = Arc::new(StackAllocator::new(64 * 1024).unwrap());

    let workers: Vec<_> = (0..4)
      .map(|t| {
        let allocator = Arc::clone(&allocator);
        thread::spawn(move || {
          for i in 0..100 {
            let size = 10 + (t * 17 + i * 7) % 100;
            if let Ok(ptr) = allocator.allocate(size) {
              unsafe { ptr.as_ptr().write_bytes(i as u8, size) };
            }
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }

    let stats = allocator.stats();
    assert_eq!(stats.allocation_count, 400);
    assert_eq!(stats.current_usage, allocator.used());
  }
}
