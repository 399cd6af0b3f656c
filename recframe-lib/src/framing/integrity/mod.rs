mod nmea;
mod split;
mod sum;

use serde::{Deserialize, Serialize};

pub use nmea::*;
pub use split::*;
pub use sum::*;

use super::Endian;

/// Seed of the running word sum used by Nortek instruments.
pub const NORTEK_CHECKSUM_BASE: u16 = 0xB58C;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrity {
    Ok,
    Mismatch {
        stored: u32,
        computed: u32,
    },
    /// The stored checksum could not be located in the frame.
    Malformed {
        computed: u32,
    },
}

impl Integrity {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Integrity::Ok)
    }
}

pub trait IntegrityAlgorithm: Send + Sync {
    /// Length of a leading header protected by its own checksum, if the algorithm
    /// has one.
    fn header_len(&self) -> Option<usize> {
        None
    }

    /// Check the header only. `header` is exactly [IntegrityAlgorithm::header_len] bytes.
    fn check_header(&self, _header: &[u8]) -> Integrity {
        Integrity::Ok
    }

    /// Check a complete frame.
    fn check(&self, frame: &[u8]) -> Integrity;

    /// Number of bytes at the end of a frame occupied by the stored checksum.
    fn trailer_len(&self) -> usize {
        0
    }
}

/// Serializable selection of an [IntegrityAlgorithm].
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChecksumPolicy {
    #[default]
    None,
    /// Base plus the little-endian 16-bit words of everything but the trailing
    /// checksum word.
    RunningSum {
        #[serde(default = "default_base")]
        base: u16,
    },
    /// Sum of all bytes but the trailing checksum word, reduced by `modulus`.
    ByteSum {
        modulus: u32,
        #[serde(default)]
        endian: Endian,
    },
    /// Independent header and payload checksums, both stored in the header.
    SplitHeader {
        #[serde(default = "default_base")]
        base: u16,
        header_len: usize,
        header_checksum: usize,
        payload_checksum: usize,
    },
    /// XOR of the characters of a `$...*HH` sentence.
    NmeaXor {
        #[serde(default)]
        include_marker: bool,
    },
}

fn default_base() -> u16 {
    NORTEK_CHECKSUM_BASE
}

impl ChecksumPolicy {
    /// Construct the algorithm, or `None` for [ChecksumPolicy::None].
    #[must_use]
    pub fn algorithm(&self) -> Option<Box<dyn IntegrityAlgorithm>> {
        match *self {
            ChecksumPolicy::None => None,
            ChecksumPolicy::RunningSum { base } => Some(Box::new(RunningSum16::new(base))),
            ChecksumPolicy::ByteSum { modulus, endian } => {
                Some(Box::new(ByteSum16::new(modulus, endian)))
            }
            ChecksumPolicy::SplitHeader {
                base,
                header_len,
                header_checksum,
                payload_checksum,
            } => Some(Box::new(SplitHeader {
                base,
                header_len,
                header_checksum,
                payload_checksum,
            })),
            ChecksumPolicy::NmeaXor { include_marker } => Some(Box::new(NmeaXor { include_marker })),
        }
    }
}
