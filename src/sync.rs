//! Mutual exclusion over the allocator façade.
//!
//! The pool core is single-threaded by design; this wrapper serializes every
//! façade entry point with one lock held for the entirety of the call. No
//! lock is ever taken inside the core, so the hot path stays branch-bounded
//! (modulo the contention the lock itself introduces).
use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
    resource::TlsfResource,
    upstream::{NullSource, UpstreamSource},
};

/// A [`TlsfResource`] behind a lock, usable from multiple threads and as a
/// [`GlobalAlloc`].
pub struct SyncTlsfResource<S: UpstreamSource, F: UpstreamSource = NullSource> {
    inner: Mutex<TlsfResource<S, F>>,
}

impl<S: UpstreamSource> SyncTlsfResource<S> {
    /// A synchronized resource over a fresh pool of `size` bytes drawn from
    /// `source`, with no fallback.
    pub fn new(size: usize, source: S) -> Option<Self> {
        TlsfResource::new(size, source).map(Self::from_resource)
    }
}

impl<S: UpstreamSource, F: UpstreamSource> SyncTlsfResource<S, F> {
    /// A synchronized resource over a fresh pool of `size` bytes drawn from
    /// `source`, forwarding overflow to `upstream`.
    pub fn with_upstream(size: usize, source: S, upstream: F) -> Option<Self> {
        TlsfResource::with_upstream(size, source, upstream).map(Self::from_resource)
    }

    /// Wrap an existing resource.
    pub fn from_resource(resource: TlsfResource<S, F>) -> Self {
        Self {
            inner: Mutex::new(resource),
        }
    }

    /// Acquire the lock for a sequence of operations.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, TlsfResource<S, F>> {
        self.inner.lock()
    }
}

unsafe impl<S: UpstreamSource, F: UpstreamSource> GlobalAlloc for SyncTlsfResource<S, F> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut inner = self.inner.lock();
        inner
            .allocate(layout)
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut inner = self.inner.lock();
        // Safety: all allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        // Safety: `ptr` denotes a previous allocation with layout `layout`
        inner.deallocate(ptr, layout);
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut inner = self.inner.lock();
        // Safety: all allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        // Safety: `ptr` denotes a previous allocation with layout `layout`,
        //         and the caller guarantees `new_size` is non-zero
        inner
            .reallocate(ptr, layout, new_size)
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }
}
