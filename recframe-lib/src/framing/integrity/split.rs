use super::{sum::word_sum, Integrity, IntegrityAlgorithm};

/// Separate header and payload checksums, both stored as little-endian words inside
/// the header, as used by Nortek AD2CP data records.
///
/// The header checksum covers the header bytes before its own field; the payload
/// checksum covers every byte after the header.
pub struct SplitHeader {
    pub base: u16,
    pub header_len: usize,
    /// Offset of the stored header checksum.
    pub header_checksum: usize,
    /// Offset of the stored payload checksum.
    pub payload_checksum: usize,
}

impl SplitHeader {
    fn stored(dat: &[u8], offset: usize) -> Option<u16> {
        let b = dat.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }
}

impl IntegrityAlgorithm for SplitHeader {
    fn header_len(&self) -> Option<usize> {
        Some(self.header_len)
    }

    fn check_header(&self, header: &[u8]) -> Integrity {
        let covered = &header[..self.header_checksum.min(header.len())];
        let computed = word_sum(self.base, covered);
        match Self::stored(header, self.header_checksum) {
            Some(stored) if stored == computed => Integrity::Ok,
            Some(stored) => Integrity::Mismatch {
                stored: u32::from(stored),
                computed: u32::from(computed),
            },
            None => Integrity::Malformed {
                computed: u32::from(computed),
            },
        }
    }

    fn check(&self, frame: &[u8]) -> Integrity {
        let payload = frame.get(self.header_len..).unwrap_or_default();
        let computed = word_sum(self.base, payload);
        match Self::stored(frame, self.payload_checksum) {
            Some(stored) if stored == computed => Integrity::Ok,
            Some(stored) => Integrity::Mismatch {
                stored: u32::from(stored),
                computed: u32::from(computed),
            },
            None => Integrity::Malformed {
                computed: u32::from(computed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad2cp() -> SplitHeader {
        SplitHeader {
            base: 0xb58c,
            header_len: 10,
            header_checksum: 8,
            payload_checksum: 6,
        }
    }

    /// Header for a 4 byte payload of 01 00 02 00; payload sum 0xb58f, header
    /// sum 0x85d9.
    const FRAME: &str = "a50a1510 0400 8fb5 d985 01000200";

    fn frame() -> Vec<u8> {
        hex::decode(FRAME.replace(' ', "")).unwrap()
    }

    #[test]
    fn header_and_payload_ok() {
        let frame = frame();
        let alg = ad2cp();
        assert_eq!(alg.check_header(&frame[..10]), Integrity::Ok);
        assert_eq!(alg.check(&frame), Integrity::Ok);
    }

    #[test]
    fn payload_corruption_leaves_header_valid() {
        let mut frame = frame();
        frame[12] = 0x03;
        let alg = ad2cp();
        assert!(alg.check_header(&frame[..10]).is_ok());
        assert!(matches!(alg.check(&frame), Integrity::Mismatch { .. }));
    }

    #[test]
    fn header_corruption() {
        let mut frame = frame();
        frame[4] = 0x05;
        assert!(matches!(
            ad2cp().check_header(&frame[..10]),
            Integrity::Mismatch { .. }
        ));
    }
}
