use std::fmt;

/// Usage counters shared by both allocators.
///
/// Always updated with the owning allocator's lock held, so a copy taken
/// under that lock is a consistent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
  pub total_allocated: usize,
  pub total_freed: usize,
  pub current_usage: usize,
  pub peak_usage: usize,
  pub allocation_count: usize,
  pub free_count: usize,
  pub failed_allocations: usize,
  /// `(total_allocated - current_usage) * 100 / total_allocated`.
  pub fragmentation: usize,
}

impl Statistics {
  pub(crate) fn record_allocation(
    &mut self,
    bytes: usize,
  ) {
    self.total_allocated += bytes;
    self.current_usage += bytes;
    self.allocation_count += 1;
    self.peak_usage = self.peak_usage.max(self.current_usage);
    self.refresh_fragmentation();
  }

  pub(crate) fn record_free(
    &mut self,
    bytes: usize,
  ) {
    self.total_freed += bytes;
    // Counters may have been reset while blocks were still live.
    self.current_usage = self.current_usage.saturating_sub(bytes);
    self.free_count += 1;
    self.refresh_fragmentation();
  }

  pub(crate) fn record_failure(&mut self) {
    self.failed_allocations += 1;
    self.refresh_fragmentation();
  }

  fn refresh_fragmentation(&mut self) {
    if self.total_allocated > 0 {
      self.fragmentation =
        self.total_allocated.saturating_sub(self.current_usage) * 100 / self.total_allocated;
    }
  }
}

impl fmt::Display for Statistics {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Total Allocated: {} bytes", self.total_allocated)?;
    writeln!(f, "Total Freed: {} bytes", self.total_freed)?;
    writeln!(f, "Current Usage: {} bytes", self.current_usage)?;
    writeln!(f, "Peak Usage: {} bytes", self.peak_usage)?;
    writeln!(f, "Allocation Count: {}", self.allocation_count)?;
    writeln!(f, "Free Count: {}", self.free_count)?;
    writeln!(f, "Failed Allocations: {}", self.failed_allocations)?;
    write!(f, "Fragmentation: {}%", self.fragmentation)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_allocation_and_free() {
    let mut stats = Statistics::default();

    stats.record_allocation(100);
    stats.record_allocation(50);
    assert_eq!(stats.current_usage, 150);
    assert_eq!(stats.peak_usage, 150);
    assert_eq!(stats.fragmentation, 0);

    stats.record_free(100);
    assert_eq!(stats.current_usage, 50);
    assert_eq!(stats.peak_usage, 150);
    assert_eq!(stats.total_freed, 100);
    assert_eq!(stats.allocation_count, 2);
    assert_eq!(stats.free_count, 1);
    assert_eq!(stats.fragmentation, 66);
    assert_eq!(stats.current_usage, stats.total_allocated - stats.total_freed);
  }

  #[test]
  fn test_failure_only_counts() {
    let mut stats = Statistics::default();

    stats.record_failure();

    assert_eq!(
      stats,
      Statistics {
        failed_allocations: 1,
        ..Statistics::default()
      }
    );
  }

  #[test]
  fn test_free_after_reset_saturates() {
    let mut stats = Statistics::default();

    stats.record_free(64);

    assert_eq!(stats.current_usage, 0);
    assert_eq!(stats.total_freed, 64);
  }

  #[test]
  fn test_display() {
    let mut stats = Statistics::default();
    stats.record_allocation(200);
    stats.record_free(100);

    let report = stats.to_string();

    assert!(report.starts_with("Total Allocated: 200 bytes\n"));
    assert!(report.contains("Current Usage: 100 bytes"));
    assert!(report.ends_with("Fragmentation: 50%"));
  }
}
