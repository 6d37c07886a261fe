use std::io;

use thiserror::Error;

/// Result alias used by every fallible allocator operation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors reported by the heap and stack allocators.
///
/// None of these are fatal to the process. `CorruptionDetected` means the
/// operation was aborted before touching any state, but the instance that
/// reported it should be treated as suspect from then on.
#[derive(Error, Debug)]
pub enum AllocError {
  #[error("out of memory: requested {requested} bytes from a {capacity} byte pool")]
  OutOfMemory { requested: usize, capacity: usize },

  #[error("memory corruption detected in block at pool offset 0x{offset:x}")]
  CorruptionDetected { offset: usize },

  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),

  #[error("failed to apply memory protection: {0}")]
  Protection(#[source] io::Error),
}

impl AllocError {
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, AllocError::OutOfMemory { .. })
  }

  pub fn is_corruption(&self) -> bool {
    matches!(self, AllocError::CorruptionDetected { .. })
  }
}
