//! Size class math for the small tier.
//!
//! Small payloads are bucketed into [`SIZE_CLASS_COUNT`](crate::config::SIZE_CLASS_COUNT)
//! classes in 8-byte steps: class `c` holds blocks of exactly `8 * (c + 1)`
//! bytes, so the mapping is pure arithmetic and needs no lookup table.

use crate::config::SMALL_MAX;

/// Round `n` up to the next multiple of 8.
#[inline]
pub const fn round8(n: usize) -> usize {
    (n + 7) & !7
}

/// Map a size (already rounded to a multiple of 8) to its class index.
///
/// Valid only for `8 <= size <= SMALL_MAX`.
#[inline]
pub fn size_class(size: usize) -> usize {
    debug_assert!(size >= 8 && size <= SMALL_MAX && size % 8 == 0);
    size / 8 - 1
}

/// Block size in bytes for a class index.
#[inline]
pub const fn class_to_size(cls: usize) -> usize {
    (cls + 1) * 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SIZE_CLASS_COUNT;

    #[test]
    fn test_round8() {
        assert_eq!(round8(1), 8);
        assert_eq!(round8(7), 8);
        assert_eq!(round8(8), 8);
        assert_eq!(round8(9), 16);
        assert_eq!(round8(512), 512);
    }

    #[test]
    fn test_class_round_trip() {
        for cls in 0..SIZE_CLASS_COUNT {
            let size = class_to_size(cls);
            assert_eq!(size, 8 * (cls + 1));
            assert_eq!(size_class(size), cls);
        }
    }

    #[test]
    fn test_class_covers_every_size() {
        for s in 1..=SMALL_MAX {
            let cls = size_class(round8(s));
            assert!(cls < SIZE_CLASS_COUNT, "size {} maps to class {}", s, cls);
            assert!(
                class_to_size(cls) >= s,
                "class {} too small for size {}",
                cls,
                s
            );
            // Never over by more than the rounding step
            assert!(class_to_size(cls) - s < 8);
        }
    }

    #[test]
    fn test_extremes() {
        assert_eq!(size_class(8), 0);
        assert_eq!(size_class(SMALL_MAX), SIZE_CLASS_COUNT - 1);
        assert_eq!(class_to_size(SIZE_CLASS_COUNT - 1), SMALL_MAX);
    }
}
