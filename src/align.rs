/// Alignment unit for every size and offset handed out by the allocators.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use rpool::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// ```rust
/// use rpool::align_to;
///
/// assert_eq!(align_to!(5000, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` down to a multiple of `align`, which must be a power of two.
pub(crate) const fn align_down(
  value: usize,
  align: usize,
) -> usize {
  value & !(align - 1)
}

/// Rounds `value` up to [`ALIGNMENT`], or `None` if that would overflow.
pub(crate) fn checked_align(value: usize) -> Option<usize> {
  value.checked_add(ALIGNMENT - 1).map(|v| v & !(ALIGNMENT - 1))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_page() {
    assert_eq!(align_to!(1, 4096), 4096);
    assert_eq!(align_to!(4096, 4096), 4096);
    assert_eq!(align_down(4097, 4096), 4096);
    assert_eq!(align_down(4095, 4096), 0);
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(100), Some(104));
    assert_eq!(checked_align(usize::MAX), None);
  }
}
