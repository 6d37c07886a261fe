use std::mem;

use crate::{align::ALIGNMENT, protect::Protection};

/// Sentinel written into every header when the block is created.
pub const TAG: u32 = 0xDEAD_BEEF;

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Smallest payload worth splitting a free block for.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

const NIL: usize = usize::MAX;

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Metadata stored in the pool immediately before each payload.
///
/// `size` includes the header itself. `next_free` is the pool offset of the
/// next block on the free list and is meaningless while the block is
/// allocated.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
  pub size: usize,
  pub next_free: usize,
  pub tag: u32,
  pub is_free: u8,
  pub protection: u8,
}

impl BlockHeader {
  pub fn new(
    size: usize,
    next_free: Option<usize>,
  ) -> Self {
    Self {
      size,
      next_free: next_free.unwrap_or(NIL),
      tag: TAG,
      is_free: 1,
      protection: Protection::DEFAULT.bits(),
    }
  }

  pub fn is_intact(&self) -> bool {
    self.tag == TAG
  }

  pub fn is_free(&self) -> bool {
    self.is_free != 0
  }

  pub fn next_free(&self) -> Option<usize> {
    (self.next_free != NIL).then_some(self.next_free)
  }

  pub fn set_next_free(
    &mut self,
    next: Option<usize>,
  ) {
    self.next_free = next.unwrap_or(NIL);
  }

  pub fn protection(&self) -> Protection {
    Protection::from_bits_truncate(self.protection)
  }

  pub fn payload(&self) -> usize {
    self.size - HEADER_SIZE
  }
}

/// A snapshot of one block, as seen by [`crate::Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Pool offset of the header.
  pub offset: usize,
  /// Total size, header included.
  pub size: usize,
  pub is_free: bool,
  pub protection: Protection,
}

impl BlockInfo {
  pub(crate) fn from_header(
    offset: usize,
    header: &BlockHeader,
  ) -> Self {
    Self {
      offset,
      size: header.size,
      is_free: header.is_free(),
      protection: header.protection(),
    }
  }

  /// Pool offset of the first payload byte.
  pub fn data_offset(&self) -> usize {
    self.offset + HEADER_SIZE
  }

  pub fn payload(&self) -> usize {
    self.size - HEADER_SIZE
  }

  /// Pool offset one past the last byte of the block.
  pub fn end(&self) -> usize {
    self.offset + self.size
  }
}
