//! Utility functions.

use core::ptr::{null_mut, NonNull};

/// Returns the smallest multiple of `align` that is greater or equal to `x`
/// or `None` if that multiple can not be contained in a `usize`.
///
/// # Panics
/// Panics if `align` is 0.
#[inline]
pub(crate) fn align_up(x: usize, align: usize) -> Option<usize> {
    if x % align == 0 {
        Some(x)
    } else {
        ((x / align) * align).checked_add(align)
    }
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}
