//! The upstream boundary: where backing regions come from and where
//! overflowing requests go.
use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
};

/// A provider of raw aligned byte regions.
///
/// A [`TlsfPool`](crate::TlsfPool) draws its backing region from an upstream
/// source exactly once, at construction, and returns it on drop. A
/// [`TlsfResource`](crate::TlsfResource) additionally uses a source as the
/// sink for requests the pool cannot satisfy.
///
/// # Safety
///
/// A successful [`allocate`](Self::allocate) must return a pointer that is
/// valid for reads and writes of `layout.size()` bytes, aligned to
/// `layout.align()`, and not aliased by any other live allocation, and that
/// stays valid until it is passed back to [`deallocate`](Self::deallocate)
/// on the same source.
pub unsafe trait UpstreamSource {
    /// Attempt to obtain a region for `layout`.
    ///
    /// # Safety
    ///
    /// `layout.size()` must be non-zero.
    unsafe fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return a region previously obtained from [`Self::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same source with
    /// this exact `layout`, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// An [`UpstreamSource`] implemented by delegation to any [`GlobalAlloc`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalAllocSource<T>(pub T);

unsafe impl<T: GlobalAlloc> UpstreamSource for GlobalAllocSource<T> {
    #[inline]
    unsafe fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() != 0);
        NonNull::new(self.0.alloc(layout))
    }

    #[inline]
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        self.0.dealloc(ptr.as_ptr(), layout);
    }
}

/// The host ecosystem's generic heap, the default region provider.
#[cfg(feature = "std")]
pub type SystemSource = GlobalAllocSource<std::alloc::System>;

/// An upstream that refuses every request.
///
/// This is the default *fallback* of [`TlsfResource`](crate::TlsfResource):
/// with it in place, pool exhaustion surfaces as an allocation failure
/// instead of silently spilling into another allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSource;

unsafe impl UpstreamSource for NullSource {
    #[inline]
    unsafe fn allocate(&mut self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    #[inline]
    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>, _layout: Layout) {
        debug_assert!(false, "a NullSource never allocates, so nothing can come back");
    }
}

/// An upstream drawing anonymous memory mappings directly from the OS.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapSource;

#[cfg(unix)]
unsafe impl UpstreamSource for MmapSource {
    unsafe fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        // mappings are page-aligned; anything stricter cannot be honoured
        let page_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        if !page_size.is_power_of_two() || layout.align() > page_size {
            return None;
        }

        let ptr = libc::mmap(
            core::ptr::null_mut(),
            layout.size(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(ptr as *mut u8)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        libc::munmap(ptr.as_ptr() as *mut _, layout.size());
    }
}
