//! Unsigned base-128 varints (little-endian groups, high bit continues).

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Decode a varint starting at `pos`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffer ends mid-value or the encoding overflows 64 bits.
pub fn read_varint(buf: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in buf.get(pos..)?.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return None;
        }

        let low = u64::from(byte & 0x7F);
        // Tenth byte may only contribute the top bit.
        if shift == 63 && low > 1 {
            return None;
        }
        value |= low << shift;

        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte() {
        assert_eq!(read_varint(&[0x00], 0), Some((0, 1)));
        assert_eq!(read_varint(&[0x7F], 0), Some((127, 1)));
    }

    #[test]
    fn test_multi_byte() {
        assert_eq!(read_varint(&[0xAC, 0x02], 0), Some((300, 2)));
        assert_eq!(read_varint(&[0xFF, 0xFF, 0x03], 0), Some((65_535, 3)));
    }

    #[test]
    fn test_offset() {
        assert_eq!(read_varint(&[0x0A, 0x96, 0x01, 0x00], 1), Some((150, 2)));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(read_varint(&[0x80, 0x80], 0), None);
        assert_eq!(read_varint(&[], 0), None);
        assert_eq!(read_varint(&[0x01], 5), None);
    }

    #[test]
    fn test_u64_max_and_overflow() {
        let max = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(read_varint(&max, 0), Some((u64::MAX, 10)));

        let overflow = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        assert_eq!(read_varint(&overflow, 0), None);

        let too_long = [0x80; 11];
        assert_eq!(read_varint(&too_long, 0), None);
    }
}
