use super::{Integrity, IntegrityAlgorithm};
use crate::framing::Endian;

/// Add each little-endian 16-bit word of `dat` to `base`, wrapping at 16 bits. A
/// trailing odd byte is not counted.
pub(crate) fn word_sum(base: u16, dat: &[u8]) -> u16 {
    dat.chunks_exact(2)
        .fold(base, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

/// Running sum of little-endian words seeded with a base constant, stored as the
/// frame's trailing little-endian word.
pub struct RunningSum16 {
    base: u16,
}

impl RunningSum16 {
    #[must_use]
    pub fn new(base: u16) -> Self {
        RunningSum16 { base }
    }
}

impl IntegrityAlgorithm for RunningSum16 {
    fn check(&self, frame: &[u8]) -> Integrity {
        if frame.len() < 2 {
            return Integrity::Malformed {
                computed: u32::from(self.base),
            };
        }
        let (body, stored) = frame.split_at(frame.len() - 2);
        let computed = word_sum(self.base, body);
        let stored = u16::from_le_bytes([stored[0], stored[1]]);
        if computed == stored {
            Integrity::Ok
        } else {
            Integrity::Mismatch {
                stored: u32::from(stored),
                computed: u32::from(computed),
            }
        }
    }

    fn trailer_len(&self) -> usize {
        2
    }
}

/// Sum of raw byte values modulo `modulus`, stored as the frame's trailing 16-bit word.
pub struct ByteSum16 {
    modulus: u32,
    endian: Endian,
}

impl ByteSum16 {
    /// # Panics
    /// If `modulus` is 0.
    #[must_use]
    pub fn new(modulus: u32, endian: Endian) -> Self {
        assert!(modulus > 0, "byte sum modulus must be non-zero");
        ByteSum16 { modulus, endian }
    }
}

impl IntegrityAlgorithm for ByteSum16 {
    fn check(&self, frame: &[u8]) -> Integrity {
        let split = frame.len().saturating_sub(2);
        let (body, stored) = frame.split_at(split);
        let sum: u64 = body.iter().map(|b| u64::from(*b)).sum();
        // Cannot truncate, the remainder is below a u32 modulus
        let computed = (sum % u64::from(self.modulus)) as u32;
        if stored.len() < 2 {
            return Integrity::Malformed { computed };
        }
        let stored = u32::from(match self.endian {
            Endian::Little => u16::from_le_bytes([stored[0], stored[1]]),
            Endian::Big => u16::from_be_bytes([stored[0], stored[1]]),
        });
        if computed == stored {
            Integrity::Ok
        } else {
            Integrity::Mismatch { stored, computed }
        }
    }

    fn trailer_len(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn running_sum() {
        // 0xb58c + 0x01a5 + 0x0015 = 0xb746
        let frame = hex::decode("a501150046b7").unwrap();
        assert_eq!(RunningSum16::new(0xb58c).check(&frame), Integrity::Ok);

        let mut bad = frame.clone();
        bad[2] = 0x16;
        assert_eq!(
            RunningSum16::new(0xb58c).check(&bad),
            Integrity::Mismatch {
                stored: 0xb746,
                computed: 0xb747
            }
        );
    }

    #[test]
    fn running_sum_wraps() {
        // 0xb58c + 0xffff wraps to 0xb58b
        let frame = hex::decode("ffff8bb5").unwrap();
        assert!(RunningSum16::new(0xb58c).check(&frame).is_ok());
    }

    #[test]
    fn running_sum_too_short() {
        assert!(matches!(
            RunningSum16::new(0).check(&[1]),
            Integrity::Malformed { .. }
        ));
    }

    #[test_case("cb0100cc", 65535, Endian::Big, true; "be ok")]
    #[test_case("cb01cc00", 65535, Endian::Little, true; "le ok")]
    #[test_case("cb0100cd", 65535, Endian::Big, false; "be mismatch")]
    #[test_case("ffffffffffff0000", 255, Endian::Big, true; "modulus reduces")]
    fn byte_sum(frame: &str, modulus: u32, endian: Endian, ok: bool) {
        let frame = hex::decode(frame).unwrap();
        assert_eq!(ByteSum16::new(modulus, endian).check(&frame).is_ok(), ok);
    }
}
