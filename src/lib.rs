//! # rpool - Fixed-Pool Memory Allocators
//!
//! This crate provides two thread-safe allocators, each managing one
//! fixed-size pool reserved from the OS with `mmap(2)` at construction:
//!
//! - [`Heap`]: a first-fit **free-list allocator** with block splitting,
//!   coalescing, corruption detection and per-block memory protection.
//! - [`StackAllocator`]: a **bump allocator** with O(1) allocation and strict
//!   LIFO frees.
//!
//! ## Overview
//!
//! ```text
//!   Heap Allocator:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              POOL                                    │
//!   │                                                                      │
//!   │   ┌────┬──────┬────┬──────────┬────┬──────┬────┬──────────────────┐  │
//!   │   │hdr │ A1   │hdr │  free    │hdr │ A2   │hdr │      free        │  │
//!   │   └────┴──────┴────┴──────────┴────┴──────┴────┴──────────────────┘  │
//!   │              ▲                          ▲                            │
//!   │              │      free list           │                            │
//!   │          free_head ─────────────────────┘ (address order)            │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Stack Allocator:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │   ┌─────┬─────┬─────┬─────┬───────────────────────────────────────┐  │
//!   │   │ S1  │ S2  │ S3  │ S4  │            Free Space                 │  │
//!   │   └─────┴─────┴─────┴─────┴───────────────────────────────────────┘  │
//!   │                           ▲                                     ▲    │
//!   │                     Frame Pointer                           Capacity │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rpool
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - In-pool block header and sentinel
//!   ├── error      - AllocError
//!   ├── heap       - Heap (first-fit free list)
//!   ├── pool       - mmap-backed pool reservation
//!   ├── protect    - Protection mask and per-block mprotect
//!   ├── stack      - StackAllocator (bump pointer, LIFO)
//!   └── stats      - Statistics
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rpool::{Heap, Protection};
//!
//! fn main() -> Result<(), rpool::AllocError> {
//!     let heap = Heap::new(1024 * 1024)?;
//!
//!     let ptr = heap.allocate(100)?;
//!     unsafe { ptr.as_ptr().write_bytes(0, 100) };
//!
//!     let ptr = heap.resize(Some(ptr), 400)?.expect("non-zero size");
//!     assert!(heap.query_protection(ptr, Protection::READ | Protection::WRITE)?);
//!
//!     heap.free(ptr)?;
//!     println!("{}", heap.stats());
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! Every heap block starts with a header:
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size (w/ header)│  │  ┌──────────────────────────┐  │
//!   │  │ next_free       │  │  │                          │  │
//!   │  │ tag: DEADBEEF   │  │  │   size - 24 bytes usable │  │
//!   │  │ is_free, prot   │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      24 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! - **Allocation** takes the first free block that fits and splits off the
//!   tail when it can hold another header plus 8 bytes.
//! - **Free** checks the sentinel, then merges the block with its free
//!   physical neighbours on both sides.
//! - **Protection** is recorded in the header and applied with `mprotect(2)`
//!   to the whole pages inside the data area.
//!
//! ## Concurrency
//!
//! Each allocator guards its pool, bookkeeping and statistics with a single
//! `parking_lot` mutex. Allocators are `Send + Sync` and can be shared with
//! `Arc`; no threads are spawned internally.
//!
//! ## Logging
//!
//! Events are emitted through `tracing` and go nowhere unless the embedding
//! program installs a subscriber.
//!
//! ## Safety
//!
//! Pointers returned by the allocators alias the pool. They stay valid until
//! freed or until the allocator is destroyed (or dropped).

pub mod align;
mod block;
mod error;
mod heap;
mod pool;
mod protect;
mod stack;
mod stats;

pub use block::{BlockInfo, HEADER_SIZE, MIN_PAYLOAD, TAG};
pub use error::{AllocError, AllocResult};
pub use heap::Heap;
pub use pool::{Pool, page_size};
pub use protect::Protection;
pub use stack::StackAllocator;
pub use stats::Statistics;

/// Pool capacity for embedders with no particular size in mind.
pub const DEFAULT_POOL_CAPACITY: usize = 1024 * 1024;
