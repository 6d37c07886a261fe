use std::{sync::Arc, thread};

use rpool::{AllocError, StackAllocator};
use tracing_subscriber::EnvFilter;

const THREADS: usize = 4;
const ALLOCATIONS_PER_THREAD: usize = 100;

fn main() -> Result<(), AllocError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let allocator = Arc::new(StackAllocator::new(rpool::DEFAULT_POOL_CAPACITY)?);

  // Each worker pushes frames, then tries to pop its own in reverse order.
  // Pops only succeed while that frame is still on top of the shared stack.
  let workers: Vec<_> = (0..THREADS)
    .map(|t| {
      let allocator = Arc::clone(&allocator);

      thread::spawn(move || {
        let mut frames = Vec::with_capacity(ALLOCATIONS_PER_THREAD);

        for i in 0..ALLOCATIONS_PER_THREAD {
          let size = 10 + (t * 31 + i * 13) % 100;

          if let Ok(ptr) = allocator.allocate(size) {
            unsafe { ptr.as_ptr().write_bytes(i as u8, size) };
            frames.push(ptr.as_ptr() as usize);
          }
        }

        frames
          .iter()
          .rev()
          .step_by(2)
          .filter_map(|address| std::ptr::NonNull::new(*address as *mut u8))
          .filter(|ptr| allocator.free(*ptr))
          .count()
      })
    })
    .collect();

  for (t, worker) in workers.into_iter().enumerate() {
    let popped = worker.join().unwrap_or(0);
    println!("thread {t}: popped {popped} frames");
  }

  println!(
    "\nused {} of {} bytes",
    allocator.used(),
    allocator.capacity()
  );
  println!("\nStack Allocator Statistics:\n{}", allocator.stats());

  Ok(())
}
