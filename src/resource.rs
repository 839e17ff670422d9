//! The allocator façade: a [`TlsfPool`] fronted by the standard layout-based
//! allocation protocol, with a fallback upstream for requests the pool cannot
//! satisfy.
use core::{alloc::Layout, fmt, ptr::NonNull};

use crate::{
    block::ALIGN,
    pool::TlsfPool,
    upstream::{NullSource, UpstreamSource},
};


/// A memory resource dispatching between a TLSF pool and a fallback
/// upstream.
///
/// Allocation goes to the pool first — [`TlsfPool::malloc`] for natural
/// alignments, [`TlsfPool::memalign`] for stricter ones — and falls through
/// to the upstream `F` only when the pool comes up empty. Deallocation is
/// routed by the pool's ownership test, so pool blocks and upstream blocks
/// never mix.
///
/// The fallback defaults to [`NullSource`], under which pool exhaustion is
/// reported as allocation failure.
///
/// The resource is stateful: it must outlive every allocation it hands out.
pub struct TlsfResource<S: UpstreamSource, F: UpstreamSource = NullSource> {
    pool: TlsfPool<S>,
    upstream: F,
}

impl<S: UpstreamSource> TlsfResource<S> {
    /// A resource over a fresh pool of `size` bytes drawn from `source`,
    /// with no fallback.
    pub fn new(size: usize, source: S) -> Option<Self> {
        Self::with_upstream(size, source, NullSource)
    }
}

impl<S: UpstreamSource, F: UpstreamSource> TlsfResource<S, F> {
    /// A resource over a fresh pool of `size` bytes drawn from `source`,
    /// forwarding overflow to `upstream`.
    pub fn with_upstream(size: usize, source: S, upstream: F) -> Option<Self> {
        Some(Self {
            pool: TlsfPool::new(size, source)?,
            upstream,
        })
    }

    /// The underlying pool.
    #[inline]
    pub fn pool(&self) -> &TlsfPool<S> {
        &self.pool
    }

    /// The fallback upstream.
    #[inline]
    pub fn upstream(&self) -> &F {
        &self.upstream
    }

    /// Allocate memory for `layout`, preferring the pool.
    ///
    /// Returns `None` when the pool cannot satisfy the request and the
    /// upstream fails too (or the request is zero-sized).
    pub fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = if layout.align() <= ALIGN {
            self.pool.malloc(layout.size())
        } else {
            self.pool.memalign(layout.align(), layout.size())
        };

        if ptr.is_none() && layout.size() != 0 {
            // Safety: the size was just checked to be non-zero
            return unsafe { self.upstream.allocate(layout) };
        }
        ptr
    }

    /// Release memory obtained from [`Self::allocate`].
    ///
    /// The pool's ownership test decides where the pointer goes; the layout
    /// is only needed by the upstream (the pool knows its block sizes).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this resource with this
    /// exact `layout`, and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        if !self.pool.free(ptr.as_ptr()) {
            self.upstream.deallocate(ptr, layout);
        }
    }

    /// Resize the allocation at `ptr` to `new_size` bytes, moving it across
    /// the pool/upstream boundary when necessary.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::allocate`] on this resource
    /// with `layout`, and `new_size` must be non-zero.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        debug_assert!(new_size != 0);
        let new_layout = Layout::from_size_align(new_size, layout.align()).ok()?;

        if self.pool.contains(ptr.as_ptr()) {
            // In-pool resizing is only safe for natural alignments: the
            // pool's moving path realigns to `ALIGN` alone.
            if layout.align() <= ALIGN {
                if let Some(new_ptr) = self.pool.realloc(ptr.as_ptr(), new_size) {
                    return Some(new_ptr);
                }
            }
            let new_ptr = self.allocate(new_layout)?;
            core::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                layout.size().min(new_size),
            );
            self.pool.free(ptr.as_ptr());
            Some(new_ptr)
        } else {
            let new_ptr = self.allocate(new_layout)?;
            core::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                layout.size().min(new_size),
            );
            self.upstream.deallocate(ptr, layout);
            Some(new_ptr)
        }
    }
}

/// Two resources are equal iff they sit over the same pool instance, i.e.
/// memory allocated from one can be deallocated through the other.
impl<S: UpstreamSource, F: UpstreamSource> PartialEq for TlsfResource<S, F> {
    fn eq(&self, other: &Self) -> bool {
        self.pool == other.pool
    }
}

impl<S: UpstreamSource, F: UpstreamSource> Eq for TlsfResource<S, F> {}

impl<S: UpstreamSource, F: UpstreamSource> fmt::Debug for TlsfResource<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsfResource")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
