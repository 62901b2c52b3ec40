//! 8-bit additive checksums.
//!
//! UX capsules carry a single checksum byte chosen so that every byte of the
//! capsule, checksum included, sums to zero modulo 256.

/// Wrapping byte sum of `buf`.
pub fn sum8(buf: &[u8]) -> u8 {
    buf.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrapping byte sum over several buffers, as if they were contiguous.
pub fn sum8_all(parts: &[&[u8]]) -> u8 {
    parts.iter().fold(0u8, |acc, part| acc.wrapping_add(sum8(part)))
}

/// The byte that brings `sum` to zero: `0x100 - sum` modulo 256.
pub fn complement(sum: u8) -> u8 {
    sum.wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_wraps() {
        assert_eq!(sum8(&[]), 0);
        assert_eq!(sum8(&[0xff, 0x02]), 0x01);
        assert_eq!(sum8(&[0x80; 4]), 0x00);
    }

    #[test]
    fn test_sum_all_matches_concatenation() {
        let a = [1u8, 2, 3, 250];
        let b = [9u8, 200];
        let joined: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
        assert_eq!(sum8_all(&[&a, &b]), sum8(&joined));
    }

    #[test]
    fn test_complement_zeroes_sum() {
        for sum in [0u8, 1, 0x7f, 0x80, 0xff] {
            assert_eq!(sum.wrapping_add(complement(sum)), 0);
        }
        assert_eq!(complement(0), 0);
        assert_eq!(complement(1), 0xff);
    }
}
