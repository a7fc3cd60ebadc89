/// Round `v` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(v: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    v.checked_add(align - 1).map(|x| x & !(align - 1))
}

/// Row index `y` reflected about the first and last row, then clamped into the plane.
///
/// Row -1 maps to 1 and row `h` maps to `h - 2`; planes shorter than the reflection
/// distance collapse onto their outermost row instead of reading past it.
pub(crate) fn mirror_row(y: isize, height: usize) -> usize {
    debug_assert!(height > 0);
    let last = height as isize - 1;
    let reflected = if y < 0 {
        -y
    } else if y > last {
        2 * last - y
    } else {
        y
    };
    reflected.clamp(0, last) as usize
}

/// Row index `y` clamped into the plane.
pub(crate) fn clamp_row(y: isize, height: usize) -> usize {
    debug_assert!(height > 0);
    y.clamp(0, height as isize - 1) as usize
}
