//! Free block list mapper: the bijection between a byte size and its
//! `(fl, sl)` index pair.
use crate::block::{ALIGN, FLLEN, FL_SHIFT, MIN_BLOCK_SIZE, SLI, SLLEN, SMALL_BLOCK_SIZE};
use crate::utils::fls_usize;

#[inline]
fn map(size: usize) -> (usize, usize) {
    if size < SMALL_BLOCK_SIZE {
        // the whole sub-small range shares first level 0, subdivided linearly
        (0, size / (SMALL_BLOCK_SIZE / SLLEN))
    } else {
        let t = fls_usize(size) as u32;
        // isolate the top `SLI` bits below the leading one
        let sl = (size >> (t - SLI)) ^ SLLEN;
        let fl = (t - (FL_SHIFT - 1)) as usize;
        (fl, sl)
    }
}

/// Find the free list that stores free blocks of exactly the specified size.
#[inline]
pub(super) fn map_floor(size: usize) -> (usize, usize) {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    debug_assert_eq!(size % ALIGN, 0);
    let (fl, sl) = map(size);
    debug_assert!(fl < FLLEN);
    (fl, sl)
}

/// Find the first free list whose every block is at least as large as the
/// specified size, or `None` if the size falls beyond the last first-level
/// class.
///
/// Rounding the size up to the next second-level boundary before mapping is
/// what makes the subsequent bitmap search a good fit: any block found on the
/// returned list (or any higher one) is guaranteed to satisfy the request.
#[inline]
pub(super) fn map_ceil(mut size: usize) -> Option<(usize, usize)> {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    if size >= SMALL_BLOCK_SIZE {
        let round = (1usize << (fls_usize(size) as u32 - SLI)) - 1;
        size += round;
    }
    let (fl, sl) = map(size);
    if fl >= FLLEN {
        return None;
    }
    Some((fl, sl))
}
