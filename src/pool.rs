//! The TLSF pool core.
use core::{alloc::Layout, fmt, mem, ptr::NonNull};

use crate::{
    block::{
        BlockHdr, FreeBlockHdr, ALIGN, BLOCK_OVERHEAD, FLLEN, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
        SLLEN,
    },
    upstream::UpstreamSource,
    utils::{align_down, align_up, ffs},
};

mod map;
use self::map::{map_ceil, map_floor};


#[cfg_attr(doc, svgbobdoc::transform)]
/// A Two-Level Segregated Fit memory pool.
///
/// The pool carves one contiguous region, acquired from an
/// [`UpstreamSource`] at construction, into user blocks. Free blocks are
/// indexed by a two-level bitmap so that allocation, deallocation,
/// reallocation (in place), and aligned allocation all complete in a bounded,
/// constant number of steps regardless of fragmentation.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                              ,-----+-----+-----+-----+-----+-----,
///        fl_bitmap: u32      = | ... |  0  |  1  |  0  |  0  |  0  |
///                              +-----+-----+-----+-----+-----+-----+
///                     min size | ... | 2¹² | 2¹¹ | 2¹⁰ |  2⁹ |  2⁸ |
///                              '-----+-----+--+--+-----+-----+-----'
///                                             |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second level                              v
///                                 ,-----+-----+-----+-----+-----,
///       "sl_bitmap[3]: u32"     = | ... |  0  |  1  |  0  |  0  |
///                                 +-----+-----+-----+-----+-----+
///            min size 2¹¹(1+n/32) | ... |  2  |  1  |  0  |     |
///                                 +-----+-----+-----+-----+-----+
///                      first_free | ... |     |  o  |     |     |
///                                 '-----+-----+--|--+-----+-----'
///                                                |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                                  |
///              ,---------------------------------'
///              | ,---+---+-----,   ,---+---+-----,   ,---+---+-----,
///              '-+>o | o-+-----+---+>o | o-+-----+---+>o |   |     |
///                +---+---'     |   +---+---'     |   +---+---'     |
///                '-------------'   '-------------'   '-------------'
///                  2112 bytes        2144 bytes        2112 bytes
/// ```
/// </center>
///
/// # Physical layout
///
/// The region holds a chain of blocks in address order. Each block is a size
/// word followed by its payload; the chain is capped by a zero-size,
/// permanently used sentinel so successor navigation never runs off the end.
/// Pointers returned to callers alias into the region and die with the pool.
pub struct TlsfPool<S: UpstreamSource> {
    fl_bitmap: u32,
    sl_bitmap: [u32; FLLEN],
    first_free: [[Option<NonNull<FreeBlockHdr>>; SLLEN]; FLLEN],
    region: NonNull<u8>,
    region_len: usize,
    pool_size: usize,
    source: S,
}

// Safety: all block headers reachable from a `TlsfPool` are logically owned
//         by that pool and have no interior mutability.
unsafe impl<S: UpstreamSource + Send> Send for TlsfPool<S> {}

/// Round a request up to the allocator's terms: at least the minimum block
/// size, a multiple of `align`, and strictly below the maximum. Returns 0 for
/// a zero request or one that cannot be represented.
fn adjust_request_size(size: usize, align: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let aligned = match size.checked_add(align - 1) {
        Some(x) => x & !(align - 1),
        None => return 0,
    };
    if aligned < MAX_BLOCK_SIZE {
        aligned.max(MIN_BLOCK_SIZE)
    } else {
        0
    }
}

impl<S: UpstreamSource> TlsfPool<S> {
    /// Create a pool backed by `size` bytes obtained from `source`.
    ///
    /// Returns `None` when the source cannot provide the region, when the
    /// region is not aligned to [`ALIGN`], or when the usable size (after the
    /// two bookkeeping words) falls outside
    /// `MIN_BLOCK_SIZE..MAX_BLOCK_SIZE`.
    pub fn new(size: usize, mut source: S) -> Option<Self> {
        let layout = Layout::from_size_align(size, ALIGN).ok()?;
        let pool_size = align_down(size.checked_sub(2 * BLOCK_OVERHEAD)?, ALIGN);
        if pool_size < MIN_BLOCK_SIZE || pool_size >= MAX_BLOCK_SIZE {
            log::error!(
                "pool size must put {} to {} usable bytes in the region, got {}",
                MIN_BLOCK_SIZE,
                MAX_BLOCK_SIZE - ALIGN,
                pool_size,
            );
            return None;
        }

        // Safety: `layout` has a non-zero size
        let region = unsafe { source.allocate(layout) }?;
        if (region.as_ptr() as usize) % ALIGN != 0 {
            log::error!("pool region must be aligned to {} bytes", ALIGN);
            // Safety: the region was just obtained with this layout
            unsafe { source.deallocate(region, layout) };
            return None;
        }

        let mut pool = Self {
            fl_bitmap: 0,
            sl_bitmap: [0; FLLEN],
            first_free: [[None; SLLEN]; FLLEN],
            region,
            region_len: size,
            pool_size,
            source,
        };
        // Safety: the region is owned, aligned, and large enough
        unsafe { pool.format_region() };
        Some(pool)
    }

    /// Carve the region into the primary free block and the terminal
    /// sentinel.
    ///
    /// # Safety
    ///
    /// `self.region` must be an exclusively owned, `ALIGN`-aligned region of
    /// `self.region_len` bytes with `self.pool_size` in the valid range.
    unsafe fn format_region(&mut self) {
        // The primary block's size word sits at the very start of the region
        // and its payload one word in, so the borrowed back-pointer word
        // falls just before the region and is never read (the primary block
        // never carries the prev-free flag).
        let mut block = self.region.cast::<BlockHdr>();
        block.as_ptr().write(BlockHdr::with_size(self.pool_size));
        block.as_mut().set_free();
        self.block_insert(block);

        // Cap the chain with a zero-size, permanently used sentinel.
        let mut sentinel = block.as_mut().link_next();
        sentinel.as_ptr().write(BlockHdr::with_size(0));
        sentinel.as_mut().set_prev_free();
    }

    /// The usable capacity: the payload size of the primary block right
    /// after construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool_size
    }

    /// Whether `ptr` is a payload pointer into this pool's region.
    ///
    /// This byte-address comparison is the sole ownership test; it is
    /// performed before any header dereference in [`Self::free`] and
    /// [`Self::realloc`].
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = (ptr as usize).wrapping_sub(BLOCK_OVERHEAD);
        let start = self.region.as_ptr() as usize;
        addr >= start && addr < start + self.region_len
    }

    fn owns(&self, block: NonNull<BlockHdr>) -> bool {
        let addr = block.as_ptr() as usize;
        let start = self.region.as_ptr() as usize;
        addr >= start && addr < start + self.region_len
    }

    /// Allocate `size` bytes from the pool.
    ///
    /// Returns an [`ALIGN`]-aligned pointer, or `None` when `size` is zero,
    /// when the adjusted request reaches [`MAX_BLOCK_SIZE`], or when no free
    /// block can satisfy it.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let adjusted = adjust_request_size(size, ALIGN);
        let block = self.locate_free(adjusted)?;
        // Safety: `block` is an unlinked free block of at least `adjusted`
        //         bytes
        Some(unsafe { self.prepare_used(block, adjusted) })
    }

    /// Allocate `size` bytes aligned to `align`, a power of two.
    ///
    /// For `align <= ALIGN` this is identical to [`Self::malloc`]. Larger
    /// alignments over-allocate by the alignment plus one header so that a
    /// leading gap, if any, can be trimmed off and reinserted as a free
    /// block.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    pub fn memalign(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());

        let adjusted = adjust_request_size(size, ALIGN);

        // A leading gap must be able to live as a whole free block: the
        // preceding physical block is in use, so the gap cannot be folded
        // into it through the back-pointer word.
        let gap_minimum = MIN_BLOCK_SIZE + BLOCK_OVERHEAD;
        let size_with_gap = adjust_request_size(
            adjusted.checked_add(align)?.checked_add(gap_minimum)?,
            align,
        );

        let aligned_size = if adjusted != 0 && align > ALIGN {
            size_with_gap
        } else {
            adjusted
        };

        let mut block = self.locate_free(aligned_size)?;

        // Safety: `block` is an unlinked free block of at least
        //         `aligned_size` bytes
        unsafe {
            let payload = block.as_ref().payload().as_ptr() as usize;
            let mut aligned = align_up(payload, align);
            let mut gap = aligned - payload;

            // a too-small gap is pushed out to the next aligned boundary
            if gap != 0 && gap < gap_minimum {
                let gap_remain = gap_minimum - gap;
                let offset = gap_remain.max(align);
                aligned = align_up(aligned + offset, align);
                gap = aligned - payload;
            }

            if gap != 0 {
                debug_assert!(gap >= gap_minimum, "gap too small to trim");
                block = self.trim_free_leading(block, gap);
            }

            let ptr = self.prepare_used(block, adjusted);
            debug_assert_eq!(ptr.as_ptr() as usize % align, 0);
            Some(ptr)
        }
    }

    /// Return `ptr` to the pool, coalescing with free physical neighbours.
    ///
    /// Returns `true` when the pointer was owned by this pool and freed, and
    /// `false` (without touching the pointer) when it is null or falls
    /// outside the region, so a caller can forward it elsewhere.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// # Safety
    ///
    /// If `ptr` falls inside the region it must be a payload pointer
    /// previously returned by this pool and not yet freed. Pointers outside
    /// the region (or null) are safe to pass and are reported as not owned.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        let mut block = BlockHdr::from_payload(ptr);
        if !self.owns(block) {
            return false;
        }
        debug_assert!(!block.as_ref().is_free(), "block already marked as free");
        block.as_mut().mark_free();
        let block = self.merge_prev(block);
        let block = self.merge_next(block);
        self.block_insert(block);
        true
    }

    /// Resize the allocation at `ptr` to `size` bytes.
    ///
    /// The usual edge cases apply: a null `ptr` behaves like
    /// [`Self::malloc`]; a zero `size` behaves like [`Self::free`] and
    /// returns `None`; a request that cannot be satisfied leaves the original
    /// allocation untouched. Growth into a free successor happens in place;
    /// otherwise the contents are moved to a fresh block.
    ///
    /// # Time Complexity
    ///
    /// Constant time, except the moving path, which is linear in the bytes
    /// copied.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` inside the region must be a payload pointer
    /// previously returned by this pool and not yet freed.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(ptr);
            return None;
        }

        let mut block = BlockHdr::from_payload(ptr);
        if !self.owns(block) {
            return None;
        }
        debug_assert!(!block.as_ref().is_free(), "block already marked as free");

        let next = block.as_ref().next_phys_block();
        let cur_size = block.as_ref().size();
        let combined = cur_size + next.as_ref().size() + BLOCK_OVERHEAD;
        let adjusted = adjust_request_size(size, ALIGN);
        if adjusted == 0 {
            return None;
        }

        if adjusted > cur_size && (!next.as_ref().is_free() || adjusted > combined) {
            // The successor cannot absorb the growth; move the allocation.
            let new_ptr = self.malloc(size)?;
            core::ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), cur_size.min(size));
            self.free(ptr);
            Some(new_ptr)
        } else {
            if adjusted > cur_size {
                self.merge_next(block);
                block.as_mut().mark_used();
            }
            self.trim_used(block, adjusted);
            Some(NonNull::new_unchecked(ptr))
        }
    }

    /// Take a suitable free block off its list.
    fn locate_free(&mut self, size: usize) -> Option<NonNull<BlockHdr>> {
        if size == 0 {
            return None;
        }
        let (mut fl, mut sl) = map_ceil(size)?;
        let block = self.search_suitable_block(&mut fl, &mut sl)?;
        // Safety: the index only holds live free blocks
        unsafe {
            debug_assert!(block.as_ref().common.size() >= size);
            self.remove_free_block(block, fl, sl);
        }
        Some(block.cast())
    }

    /// Mark an unlinked free block used, trimming excess space back into the
    /// pool, and hand out its payload.
    ///
    /// # Safety
    ///
    /// `block` must be an off-list free block of at least `size` bytes, with
    /// `size` non-zero and a multiple of [`ALIGN`].
    unsafe fn prepare_used(&mut self, mut block: NonNull<BlockHdr>, size: usize) -> NonNull<u8> {
        debug_assert!(size != 0);
        self.trim_free(block, size);
        block.as_mut().mark_used();
        block.as_ref().payload()
    }

    /// Trim trailing space off a free block and reinsert the remainder.
    ///
    /// # Safety
    ///
    /// `block` must be an off-list free block, `size` a multiple of
    /// [`ALIGN`] not exceeding its payload.
    unsafe fn trim_free(&mut self, mut block: NonNull<BlockHdr>, size: usize) {
        debug_assert!(block.as_ref().is_free(), "block must be free");
        if block.as_ref().can_split(size) {
            let mut remaining = block.as_mut().split(size);
            block.as_mut().link_next();
            remaining.as_mut().set_prev_free();
            self.block_insert(remaining);
        }
    }

    /// Trim trailing space off a used block and return it to the pool,
    /// coalescing with a free successor.
    ///
    /// # Safety
    ///
    /// `block` must be a live used block, `size` a multiple of [`ALIGN`] not
    /// exceeding its payload.
    unsafe fn trim_used(&mut self, mut block: NonNull<BlockHdr>, size: usize) {
        debug_assert!(!block.as_ref().is_free(), "block must be used");
        if block.as_ref().can_split(size) {
            let mut remaining = block.as_mut().split(size);
            remaining.as_mut().set_prev_used();
            let remaining = self.merge_next(remaining);
            self.block_insert(remaining);
        }
    }

    /// Trim a leading gap off a free block, reinserting the gap and
    /// returning the (still free, off-list) rest.
    ///
    /// # Safety
    ///
    /// `block` must be an off-list free block; `gap` must be a multiple of
    /// [`ALIGN`] of at least a full header footprint.
    unsafe fn trim_free_leading(
        &mut self,
        mut block: NonNull<BlockHdr>,
        gap: usize,
    ) -> NonNull<BlockHdr> {
        if block.as_ref().can_split(gap) {
            // the caller keeps the second half
            let mut remaining = block.as_mut().split(gap - BLOCK_OVERHEAD);
            remaining.as_mut().set_prev_free();
            block.as_mut().link_next();
            self.block_insert(block);
            remaining
        } else {
            block
        }
    }

    /// Absorb a free physical predecessor, unlinking it from the index.
    ///
    /// # Safety
    ///
    /// `block` must be a live, off-list block header.
    unsafe fn merge_prev(&mut self, block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        if block.as_ref().is_prev_free() {
            let prev = block.as_ref().prev_phys_block();
            debug_assert!(prev.as_ref().is_free(), "prev block is not actually free");
            self.block_remove(prev);
            BlockHdr::coalesce(prev, block)
        } else {
            block
        }
    }

    /// Absorb a free physical successor, unlinking it from the index.
    ///
    /// # Safety
    ///
    /// `block` must be a live, off-list block header other than the terminal
    /// sentinel.
    unsafe fn merge_next(&mut self, block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        let next = block.as_ref().next_phys_block();
        if next.as_ref().is_free() {
            self.block_remove(next);
            BlockHdr::coalesce(block, next)
        } else {
            block
        }
    }

    /// Insert a free block into the list its size maps to.
    ///
    /// # Safety
    ///
    /// `block` must be a free in-region block that is not currently on any
    /// list.
    unsafe fn block_insert(&mut self, block: NonNull<BlockHdr>) {
        let (fl, sl) = map_floor(block.as_ref().size());
        self.insert_free_block(block.cast(), fl, sl);
    }

    /// Remove a free block from the list its size maps to.
    ///
    /// # Safety
    ///
    /// `block` must currently be on the free list given by its size.
    unsafe fn block_remove(&mut self, block: NonNull<BlockHdr>) {
        let (fl, sl) = map_floor(block.as_ref().size());
        self.remove_free_block(block.cast(), fl, sl);
    }

    /// Splice `block` onto the head of list `(fl, sl)` and set the bitmap
    /// bits.
    ///
    /// # Safety
    ///
    /// `block` must be owned by this pool and absent from every list.
    unsafe fn insert_free_block(&mut self, mut block: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        debug_assert_eq!(
            block.as_ref().common.payload().as_ptr() as usize % ALIGN,
            0,
            "block not aligned properly"
        );

        let next = mem::replace(&mut self.first_free[fl][sl], Some(block));
        block.as_mut().next_free = next;
        block.as_mut().prev_free = None;
        if let Some(mut next) = next {
            next.as_mut().prev_free = Some(block);
        }

        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    /// Unlink `block` from list `(fl, sl)`, clearing the bitmap bits when the
    /// list empties.
    ///
    /// # Safety
    ///
    /// `block` must currently be on list `(fl, sl)`.
    unsafe fn remove_free_block(&mut self, block: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        let next = block.as_ref().next_free;
        let prev = block.as_ref().prev_free;

        if let Some(mut next) = next {
            next.as_mut().prev_free = prev;
        }

        if let Some(mut prev) = prev {
            prev.as_mut().next_free = next;
        } else {
            debug_assert_eq!(self.first_free[fl][sl], Some(block));
            self.first_free[fl][sl] = next;

            if next.is_none() {
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    /// Find the first non-empty list at `(fl, sl)` or beyond. Each step is a
    /// single word scan, which is what keeps the whole search O(1).
    fn search_suitable_block(
        &self,
        fl: &mut usize,
        sl: &mut usize,
    ) -> Option<NonNull<FreeBlockHdr>> {
        let mut sl_map = self.sl_bitmap[*fl] & (!0u32 << *sl);
        if sl_map == 0 {
            // nothing left in this class; go one first level up
            let fl_map = self.fl_bitmap & (!0u32 << (*fl + 1));
            if fl_map == 0 {
                // the pool is exhausted for this request
                return None;
            }
            *fl = ffs(fl_map) as usize;
            sl_map = self.sl_bitmap[*fl];
            debug_assert!(sl_map != 0, "second level bitmap is empty");
        }
        *sl = ffs(sl_map) as usize;
        self.first_free[*fl][*sl]
    }
}

impl<S: UpstreamSource> Drop for TlsfPool<S> {
    fn drop(&mut self) {
        // Safety: `region` was obtained from `source` with this exact layout
        //         at construction
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.region_len, ALIGN);
            self.source.deallocate(self.region, layout);
        }
    }
}

/// Pools are equal only to themselves: the region is exclusively owned, so
/// pointer identity of the region is instance identity.
impl<S: UpstreamSource> PartialEq for TlsfPool<S> {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region
    }
}

impl<S: UpstreamSource> Eq for TlsfPool<S> {}

impl<S: UpstreamSource> fmt::Debug for TlsfPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsfPool")
            .field("region", &self.region)
            .field("region_len", &self.region_len)
            .field("pool_size", &self.pool_size)
            .field("fl_bitmap", &format_args!("{:#b}", self.fl_bitmap))
            .finish_non_exhaustive()
    }
}
