use std::{collections::HashMap, ops::Range, ptr, ptr::NonNull};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::{
  align::{ALIGNMENT, checked_align},
  block::{BlockHeader, BlockInfo, HEADER_SIZE, MIN_PAYLOAD},
  error::{AllocError, AllocResult},
  pool::Pool,
  protect::Protection,
  stats::Statistics,
};

/// First-fit allocator over a single fixed pool.
///
/// Blocks tile the pool with no gaps. Free blocks are chained through their
/// headers in address order, and a freed block is merged with both physical
/// neighbours on the spot, so two free blocks are never adjacent.
///
/// ```text
///   free_head ──────────┐                       ┌──────────────┐
///                       ▼                       │              ▼
///   ┌─────┬─────────┬─────┬─────────┬─────┬──────────┬─────┬──────────────┐
///   │ hdr │ used    │ hdr │ free    │ hdr │ used     │ hdr │ free         │
///   └─────┴─────────┴─────┴─────────┴─────┴──────────┴─────┴──────────────┘
///   0                                                               capacity
/// ```
pub struct Heap {
  inner: Mutex<HeapState>,
}

pub(crate) struct HeapState {
  pub(crate) pool: Pool,
  free_head: Option<usize>,
  stats: Statistics,
  /// Header offset -> pages whose OS protection differs from read/write.
  pub(crate) protected: HashMap<usize, Range<usize>>,
}

type FreeNeighbours = (Option<(usize, BlockHeader)>, Option<(usize, BlockHeader)>);

impl HeapState {
  fn new(pool: Pool) -> AllocResult<Self> {
    if pool.len() < HEADER_SIZE + MIN_PAYLOAD {
      return Err(AllocError::InvalidArgument(
        "pool capacity too small for a single block",
      ));
    }

    let mut state = Self {
      pool,
      free_head: Some(0),
      stats: Statistics::default(),
      protected: HashMap::new(),
    };

    let capacity = state.pool.len();
    *state.header_mut(0) = BlockHeader::new(capacity, None);

    Ok(state)
  }

  /// Header offset of the block whose payload starts at `ptr`.
  pub(crate) fn block_offset(
    &self,
    ptr: NonNull<u8>,
  ) -> AllocResult<usize> {
    let data = self
      .pool
      .offset_of(ptr)
      .ok_or(AllocError::InvalidArgument("pointer outside the pool"))?;

    if data < HEADER_SIZE || data % ALIGNMENT != 0 {
      return Err(AllocError::InvalidArgument("pointer is not a block payload"));
    }

    let offset = data - HEADER_SIZE;

    if self
      .protected
      .values()
      .any(|span| span.start < data && offset < span.end)
    {
      return Err(AllocError::InvalidArgument(
        "pointer lies inside protected data",
      ));
    }

    Ok(offset)
  }

  /// Reads the header at `offset`, rejecting it if the sentinel or the size
  /// has been overwritten.
  pub(crate) fn header(
    &self,
    offset: usize,
  ) -> AllocResult<BlockHeader> {
    // Free links are read from the pool and may be garbage.
    if offset % ALIGNMENT != 0 || offset + HEADER_SIZE > self.pool.len() {
      warn!(offset, "block offset outside the pool");
      return Err(AllocError::CorruptionDetected { offset });
    }

    let header = unsafe { self.pool.at(offset).cast::<BlockHeader>().read() };

    let fits = header.size >= HEADER_SIZE
      && header.size % ALIGNMENT == 0
      && header.size <= self.pool.len() - offset;

    if !header.is_intact() || !fits {
      warn!(offset, tag = header.tag, size = header.size, "corrupted block header");
      return Err(AllocError::CorruptionDetected { offset });
    }

    Ok(header)
  }

  pub(crate) fn header_mut(
    &mut self,
    offset: usize,
  ) -> &mut BlockHeader {
    debug_assert!(offset + HEADER_SIZE <= self.pool.len());

    unsafe { self.pool.at(offset).cast::<BlockHeader>().as_mut() }
  }

  /// Next free list entry after the one at `offset`. Links only ever point
  /// forward, which also rules out cycles.
  fn next_link(
    offset: usize,
    header: &BlockHeader,
  ) -> AllocResult<Option<usize>> {
    match header.next_free() {
      Some(next) if next <= offset => {
        warn!(offset, next, "free list link points backwards");
        Err(AllocError::CorruptionDetected { offset })
      }
      next => Ok(next),
    }
  }

  fn data(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    unsafe { self.pool.at(offset + HEADER_SIZE) }
  }

  fn link_after(
    &mut self,
    prev: Option<usize>,
    next: Option<usize>,
  ) {
    match prev {
      Some(prev) => self.header_mut(prev).set_next_free(next),
      None => self.free_head = next,
    }
  }

  pub(crate) fn allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    if size == 0 {
      return Err(AllocError::InvalidArgument("zero-size allocation"));
    }

    let needed = match checked_align(size).and_then(|s| s.checked_add(HEADER_SIZE)) {
      Some(needed) => needed,
      None => return Err(self.out_of_memory(size)),
    };

    let mut prev = None;
    let mut current = self.free_head;

    while let Some(offset) = current {
      let header = self.header(offset)?;
      let next = Self::next_link(offset, &header)?;

      if !header.is_free() {
        warn!(offset, "allocated block reachable from the free list");
        return Err(AllocError::CorruptionDetected { offset });
      }

      if header.size >= needed {
        let remainder = header.size - needed;

        let successor = if remainder >= HEADER_SIZE + MIN_PAYLOAD {
          let split = offset + needed;
          *self.header_mut(split) = BlockHeader::new(remainder, next);
          self.header_mut(offset).size = needed;

          debug!(offset, kept = needed, split, remainder, "split free block");
          Some(split)
        } else {
          next
        };

        self.link_after(prev, successor);

        let block = self.header_mut(offset);
        block.is_free = 0;
        block.set_next_free(None);
        let payload = block.payload();

        self.stats.record_allocation(payload);
        trace!(offset, requested = size, payload, "allocated block");

        return Ok(self.data(offset));
      }

      prev = Some(offset);
      current = next;
    }

    Err(self.out_of_memory(size))
  }

  fn out_of_memory(
    &mut self,
    requested: usize,
  ) -> AllocError {
    self.stats.record_failure();
    trace!(requested, "no free block fits");

    AllocError::OutOfMemory {
      requested,
      capacity: self.pool.len(),
    }
  }

  /// Free list entries on either side of `offset`, in address order.
  fn free_neighbours(
    &self,
    offset: usize,
  ) -> AllocResult<FreeNeighbours> {
    let mut prev = None;
    let mut current = self.free_head;

    while let Some(node) = current {
      let header = self.header(node)?;
      let link = Self::next_link(node, &header)?;

      if node == offset {
        warn!(offset, "allocated block reachable from the free list");
        return Err(AllocError::CorruptionDetected { offset });
      }
      if node > offset {
        return Ok((prev, Some((node, header))));
      }

      prev = Some((node, header));
      current = link;
    }

    Ok((prev, None))
  }

  pub(crate) fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) -> AllocResult<()> {
    let offset = self.block_offset(ptr)?;
    let header = self.header(offset)?;

    if header.is_free() {
      trace!(offset, "ignoring double free");
      return Ok(());
    }

    // Everything that can fail happens before the first write.
    let (prev, next) = self.free_neighbours(offset)?;
    self.unprotect(offset)?;

    self.stats.record_free(header.payload());

    let mut size = header.size;
    let mut successor = next.map(|(node, _)| node);

    if let Some((node, next_header)) = next.filter(|(node, _)| *node == offset + header.size) {
      size += next_header.size;
      successor = next_header.next_free();
      debug!(offset, next = node, size, "coalesced with next block");
    }

    let block = self.header_mut(offset);
    block.is_free = 1;
    block.protection = Protection::DEFAULT.bits();
    block.size = size;
    block.set_next_free(successor);

    match prev {
      Some((node, prev_header)) if node + prev_header.size == offset => {
        let merged = self.header_mut(node);
        merged.size += size;
        merged.set_next_free(successor);
        debug!(offset, prev = node, size = merged.size, "coalesced with previous block");
      }
      _ => self.link_after(prev.map(|(node, _)| node), Some(offset)),
    }

    trace!(offset, payload = header.payload(), "freed block");

    Ok(())
  }

  pub(crate) fn resize(
    &mut self,
    ptr: NonNull<u8>,
    new_size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let offset = self.block_offset(ptr)?;
    let header = self.header(offset)?;

    if header.is_free() {
      return Err(AllocError::InvalidArgument("resize of a free block"));
    }

    let payload = header.payload();

    if payload >= new_size {
      trace!(offset, payload, new_size, "resize fits in place");
      return Ok(ptr);
    }

    let moved = self.allocate(new_size)?;

    if let Err(err) = self.unprotect(offset) {
      self.free(moved)?;
      return Err(err);
    }

    unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), payload.min(new_size)) };

    self.free(ptr)?;
    trace!(from = offset, payload, new_size, "resized block by moving");

    Ok(moved)
  }

  fn blocks(&self) -> AllocResult<Vec<BlockInfo>> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < self.pool.len() {
      let header = self.header(offset)?;
      blocks.push(BlockInfo::from_header(offset, &header));
      offset += header.size;
    }

    Ok(blocks)
  }

  fn free_blocks(&self) -> AllocResult<Vec<BlockInfo>> {
    let mut blocks = Vec::new();
    let mut current = self.free_head;

    while let Some(offset) = current {
      let header = self.header(offset)?;
      blocks.push(BlockInfo::from_header(offset, &header));
      current = Self::next_link(offset, &header)?;
    }

    Ok(blocks)
  }
}

impl Heap {
  /// Reserves a pool of `capacity` bytes (rounded up to 8) and installs a
  /// single free block spanning it.
  pub fn new(capacity: usize) -> AllocResult<Self> {
    let state = HeapState::new(Pool::reserve(capacity)?)?;

    debug!(capacity = state.pool.len(), "heap initialized");

    Ok(Self {
      inner: Mutex::new(state),
    })
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, HeapState> {
    self.inner.lock()
  }

  /// Pool size in bytes.
  pub fn capacity(&self) -> usize {
    self.lock().pool.len()
  }

  /// Pool offset of `ptr`, if it points into this heap's pool.
  pub fn offset_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    self.lock().pool.offset_of(ptr)
  }

  /// Hands out at least `size` bytes, 8-byte aligned, from the first free
  /// block large enough to hold them.
  pub fn allocate(
    &self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    self.lock().allocate(size)
  }

  /// Returns the block owning `ptr` to the free list.
  ///
  /// Freeing an already free block is a no-op. A damaged header is reported
  /// as [`AllocError::CorruptionDetected`] and nothing is changed.
  pub fn free(
    &self,
    ptr: NonNull<u8>,
  ) -> AllocResult<()> {
    self.lock().free(ptr)
  }

  /// Grows or keeps the block owning `ptr` so it holds `new_size` bytes.
  ///
  /// `None` behaves like [`Heap::allocate`]; a `new_size` of zero frees the
  /// block and returns `None`. When the block has to move, the old payload is
  /// copied over and the old block freed. If no block fits, the original is
  /// left untouched.
  ///
  /// The lock is held across allocate, copy and free, so no other thread can
  /// observe or reuse the old block half-way through a move. The price is
  /// that the copy itself runs inside the critical section.
  pub fn resize(
    &self,
    ptr: Option<NonNull<u8>>,
    new_size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    let mut state = self.lock();

    match ptr {
      None => state.allocate(new_size).map(Some),
      Some(ptr) if new_size == 0 => state.free(ptr).map(|_| None),
      Some(ptr) => state.resize(ptr, new_size).map(Some),
    }
  }

  /// Snapshot of the usage counters.
  pub fn stats(&self) -> Statistics {
    self.lock().stats
  }

  pub fn reset_stats(&self) {
    self.lock().stats = Statistics::default();
  }

  /// Every block in the pool, in address order.
  pub fn blocks(&self) -> AllocResult<Vec<BlockInfo>> {
    self.lock().blocks()
  }

  /// Free list contents, in list order.
  pub fn free_blocks(&self) -> AllocResult<Vec<BlockInfo>> {
    self.lock().free_blocks()
  }

  /// Unmaps the pool. Every pointer handed out by this heap dangles
  /// afterwards.
  pub fn destroy(self) {
    debug!(capacity = self.capacity(), "destroying heap");
  }
}
