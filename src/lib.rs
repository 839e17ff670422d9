//! This crate implements the TLSF (Two-Level Segregated Fit) dynamic memory
//! allocation algorithm¹ over a single application-provided region of backing
//! memory.
//!
//!  - **Allocation, deallocation, reallocation, and aligned allocation are
//!    guaranteed to complete in constant time.** The pool is suitable for
//!    real-time control loops, audio processing, and other workloads where
//!    worst-case latency matters more than raw throughput.
//!
//!  - **The backing region is acquired exactly once.** [`TlsfPool`] obtains
//!    its region from an [`UpstreamSource`] at construction and returns it on
//!    drop; the hot paths never call back into the host allocator.
//!
//!  - **Overflow can be delegated.** [`TlsfResource`] layers a fallback
//!    upstream over a pool, forwarding requests the pool cannot satisfy, and
//!    [`SyncTlsfResource`] serializes that façade behind a single lock so it
//!    can serve as a [`GlobalAlloc`](core::alloc::GlobalAlloc).
//!
//!  - **This crate supports `#![no_std]`.** The `std` feature (enabled by
//!    default) merely adds [`SystemSource`], an upstream over the host heap.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy, 2004,
//! pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Examples
//!
//! ## `TlsfPool`: Core API
//!
//! ```rust
//! use tlsf_pool::{SystemSource, TlsfPool};
//!
//! let mut pool = TlsfPool::new(65536, SystemSource::default()).unwrap();
//!
//! let ptr = pool.malloc(64).unwrap().cast::<u64>();
//! unsafe {
//!     *ptr.as_ptr() = 42;
//!     assert_eq!(*ptr.as_ptr(), 42);
//!     assert!(pool.free(ptr.cast().as_ptr()));
//! }
//! ```
//!
//! ## `TlsfResource`: Allocator façade with upstream fallback
//!
//! ```rust
//! use std::alloc::Layout;
//! use tlsf_pool::{SystemSource, TlsfResource};
//!
//! // A tiny pool; requests it cannot satisfy go to the system heap.
//! let mut resource =
//!     TlsfResource::with_upstream(4096, SystemSource::default(), SystemSource::default())
//!         .unwrap();
//!
//! let layout = Layout::from_size_align(1 << 20, 8).unwrap();
//! let big = resource.allocate(layout).unwrap();
//! unsafe { resource.deallocate(big, layout) };
//! ```
#![no_std]

mod block;
mod pool;
mod resource;
mod sync;
mod upstream;
pub mod utils;

pub use self::{
    block::{ALIGN, BLOCK_OVERHEAD, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
    pool::TlsfPool,
    resource::TlsfResource,
    sync::SyncTlsfResource,
    upstream::{GlobalAllocSource, NullSource, UpstreamSource},
};

#[cfg(unix)]
pub use self::upstream::MmapSource;

#[cfg(feature = "std")]
pub use self::upstream::SystemSource;

#[cfg(any(test, feature = "std"))]
extern crate std;
