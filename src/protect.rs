//! Per-block memory protection.
//!
//! A block header records the protection its owner asked for; the OS
//! enforces it on the whole pages inside the block's data area. Headers are
//! never covered, so the allocator can keep walking the pool while user data
//! is read-only or inaccessible.
//!
//! ```text
//!   ┌────────┬──────────────────────────────────────────────┬────────┐
//!   │ header │ payload                                      │ header │
//!   └────────┴──────────────────────────────────────────────┴────────┘
//!                 │◄──── page ────►│◄──── page ────►│
//!                 └──── mprotect(mask) applies here ┘
//! ```

use std::{fmt, io, ops::BitOr, ptr::NonNull};

use libc::{PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};
use tracing::{debug, warn};

use crate::{
  block::HEADER_SIZE,
  error::{AllocError, AllocResult},
  heap::{Heap, HeapState},
};

/// Read/write/execute bitmask recorded in every block header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Protection(u8);

impl Protection {
  pub const NONE: Self = Self(0x00);
  pub const READ: Self = Self(0x01);
  pub const WRITE: Self = Self(0x02);
  pub const EXEC: Self = Self(0x04);
  pub const ALL: Self = Self(0x07);

  /// Protection of every fresh block.
  pub const DEFAULT: Self = Self(Self::READ.0 | Self::WRITE.0);

  /// Builds a mask from raw bits; bits outside read/write/execute are dropped.
  pub const fn from_bits_truncate(bits: u8) -> Self {
    Self(bits & Self::ALL.0)
  }

  pub const fn bits(self) -> u8 {
    self.0
  }

  /// True iff every bit of `other` is set in `self`.
  pub const fn contains(
    self,
    other: Self,
  ) -> bool {
    self.0 & other.0 == other.0
  }

  pub(crate) fn to_prot(self) -> libc::c_int {
    let mut prot = PROT_NONE;

    if self.contains(Self::READ) {
      prot |= PROT_READ;
    }
    if self.contains(Self::WRITE) {
      prot |= PROT_WRITE;
    }
    if self.contains(Self::EXEC) {
      prot |= PROT_EXEC;
    }

    prot
  }
}

impl BitOr for Protection {
  type Output = Self;

  fn bitor(
    self,
    rhs: Self,
  ) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl fmt::Debug for Protection {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let flag = |bit: Self, c: char| if self.contains(bit) { c } else { '-' };

    write!(
      f,
      "{}{}{}",
      flag(Self::READ, 'r'),
      flag(Self::WRITE, 'w'),
      flag(Self::EXEC, 'x')
    )
  }
}

impl HeapState {
  pub(crate) fn set_protection(
    &mut self,
    ptr: NonNull<u8>,
    len: usize,
    mask: Protection,
  ) -> AllocResult<()> {
    let offset = self.block_offset(ptr)?;
    let header = self.header(offset)?;

    if header.is_free() {
      return Err(AllocError::InvalidArgument("cannot protect a free block"));
    }
    if len > header.payload() {
      return Err(AllocError::InvalidArgument(
        "protection range exceeds the block payload",
      ));
    }

    self.header_mut(offset).protection = mask.bits();
    self.unprotect(offset)?;

    let Some(span) = self.pool.page_span(offset + HEADER_SIZE, len) else {
      warn!(offset, len, ?mask, "protection range covers no whole page");
      return Err(AllocError::Protection(io::Error::new(
        io::ErrorKind::InvalidInput,
        "protection range covers no whole page",
      )));
    };

    if let Err(err) = self.pool.protect(span.clone(), mask) {
      warn!(offset, ?span, ?mask, error = %err, "mprotect failed");
      return Err(AllocError::Protection(err));
    }

    debug!(offset, ?span, ?mask, "protected block");
    if mask != Protection::DEFAULT {
      self.protected.insert(offset, span);
    }

    Ok(())
  }

  pub(crate) fn query_protection(
    &self,
    ptr: NonNull<u8>,
    mask: Protection,
  ) -> AllocResult<bool> {
    let offset = self.block_offset(ptr)?;
    let header = self.header(offset)?;

    Ok(header.protection().contains(mask))
  }

  /// Puts read/write back on any pages protected inside the block at
  /// `offset`, so its data can be copied and its space reused.
  pub(crate) fn unprotect(
    &mut self,
    offset: usize,
  ) -> AllocResult<()> {
    if let Some(span) = self.protected.get(&offset).cloned() {
      self
        .pool
        .protect(span.clone(), Protection::DEFAULT)
        .map_err(AllocError::Protection)?;

      debug!(offset, ?span, "restored read/write");
      self.protected.remove(&offset);
    }

    Ok(())
  }
}

impl Heap {
  /// Records `mask` on the block owning `ptr` and asks the OS to enforce it
  /// on the whole pages inside `ptr..ptr + len`.
  ///
  /// The recorded mask is updated even when the OS refuses, and the refusal
  /// is returned as [`AllocError::Protection`].
  pub fn set_protection(
    &self,
    ptr: NonNull<u8>,
    len: usize,
    mask: Protection,
  ) -> AllocResult<()> {
    self.lock().set_protection(ptr, len, mask)
  }

  /// True iff every bit of `mask` is recorded on the block owning `ptr`.
  pub fn query_protection(
    &self,
    ptr: NonNull<u8>,
    mask: Protection,
  ) -> AllocResult<bool> {
    self.lock().query_protection(ptr, mask)
  }
}
