use std::{io, ops::Range, ptr::NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};
use tracing::{debug, warn};

use crate::{
  align::{align_down, checked_align},
  align_to,
  error::{AllocError, AllocResult},
  protect::Protection,
};

/// A fixed-size, zero-filled, read/write anonymous mapping.
///
/// The base address and length never change. The mapping is released exactly
/// once, when the owning value is dropped.
///
/// ```text
///   base                                               base + len
///   ┌───────────────────────────────────────────────────────┐
///   │                 private anonymous mapping             │
///   └───────────────────────────────────────────────────────┘
///   ▲ page aligned (mmap)           len is a multiple of 8 ▲
/// ```
#[derive(Debug)]
pub struct Pool {
  base: NonNull<u8>,
  len: usize,
}

// The pool is plain memory; every mutation is serialized by the owning
// allocator's lock.
unsafe impl Send for Pool {}

impl Pool {
  /// Maps `capacity` bytes (rounded up to 8) of fresh memory.
  pub fn reserve(capacity: usize) -> AllocResult<Self> {
    if capacity == 0 {
      return Err(AllocError::InvalidArgument("pool capacity must be non-zero"));
    }

    let len = checked_align(capacity).ok_or(AllocError::OutOfMemory {
      requested: capacity,
      capacity: 0,
    })?;

    let address = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      warn!(
        requested = len,
        error = %io::Error::last_os_error(),
        "pool reservation denied by the OS"
      );
      return Err(AllocError::OutOfMemory {
        requested: len,
        capacity: 0,
      });
    }

    let base = NonNull::new(address as *mut u8).ok_or(AllocError::OutOfMemory {
      requested: len,
      capacity: 0,
    })?;

    debug!(base = ?base, len, "reserved pool");

    Ok(Self { base, len })
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Returns the pool offset of `ptr`, or `None` if it lies outside the pool.
  pub fn offset_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    let address = ptr.as_ptr() as usize;
    let base = self.base.as_ptr() as usize;

    if address < base || address >= base + self.len {
      return None;
    }

    Some(address - base)
  }

  /// Address of the byte at `offset`.
  ///
  /// # Safety
  ///
  /// `offset` must not exceed the pool length.
  pub(crate) unsafe fn at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset <= self.len);
    unsafe { self.base.add(offset) }
  }

  /// The whole pages contained in `offset..offset + len`, as pool offsets.
  pub(crate) fn page_span(
    &self,
    offset: usize,
    len: usize,
  ) -> Option<Range<usize>> {
    let page = page_size();
    let end = offset.checked_add(len)?.min(self.len);
    let start = align_to!(offset, page);
    let end = align_down(end, page);

    (start < end).then_some(start..end)
  }

  /// Applies `protection` to the pages in `span`, which must come from
  /// [`Pool::page_span`].
  pub(crate) fn protect(
    &self,
    span: Range<usize>,
    protection: Protection,
  ) -> io::Result<()> {
    let address = unsafe { self.at(span.start) };

    let rc = unsafe {
      libc::mprotect(
        address.as_ptr() as *mut c_void,
        span.end - span.start,
        protection.to_prot(),
      )
    };

    if rc == -1 {
      return Err(io::Error::last_os_error());
    }

    Ok(())
  }
}

impl Drop for Pool {
  fn drop(&mut self) {
    let rc = unsafe { libc::munmap(self.base.as_ptr() as *mut c_void, self.len) };

    if rc == -1 {
      warn!(
        base = ?self.base,
        len = self.len,
        error = %io::Error::last_os_error(),
        "failed to release pool"
      );
    } else {
      debug!(base = ?self.base, len = self.len, "released pool");
    }
  }
}

/// The OS page size, falling back to 4 KiB if it cannot be queried.
pub fn page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

  if size <= 0 { 4096 } else { size as usize }
}
