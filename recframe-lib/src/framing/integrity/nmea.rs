use super::{Integrity, IntegrityAlgorithm};

/// NMEA-0183 style sentence checksum: XOR of the characters between `$` and `*`,
/// stored as two hex digits after the `*`.
///
/// Some loggers include the leading `$` in the XOR; set `include_marker` for those.
/// The sentence may be preceded by other text on the line, e.g., a logger timestamp.
pub struct NmeaXor {
    pub include_marker: bool,
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl IntegrityAlgorithm for NmeaXor {
    fn check(&self, line: &[u8]) -> Integrity {
        let Some(start) = line.iter().position(|b| *b == b'$') else {
            return Integrity::Malformed { computed: 0 };
        };
        let Some(star) = line.iter().rposition(|b| *b == b'*').filter(|s| *s > start) else {
            return Integrity::Malformed { computed: 0 };
        };
        let first = if self.include_marker { start } else { start + 1 };
        let computed = u32::from(line[first..star].iter().fold(0u8, |acc, b| acc ^ b));

        let stored = match line.get(star + 1..star + 3) {
            Some([hi, lo]) => hex_digit(*hi).zip(hex_digit(*lo)).map(|(h, l)| (h << 4) | l),
            _ => None,
        };
        match stored {
            Some(stored) if u32::from(stored) == computed => Integrity::Ok,
            Some(stored) => Integrity::Mismatch {
                stored: u32::from(stored),
                computed,
            },
            None => Integrity::Malformed { computed },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b"$PWETA,1,2*54", false, true; "standard")]
    #[test_case(b"$PWETA,1,2*70", true, true; "marker included")]
    #[test_case(b"2014/01/01 00:00:00.000 $PWETA,1,2*54", false, true; "prefixed")]
    #[test_case(b"$PWETA,1,2*55", false, false; "mismatch")]
    #[test_case(b"$pweta,1,2*54", false, false; "case matters in body")]
    fn check_sentence(line: &[u8], include_marker: bool, ok: bool) {
        assert_eq!(NmeaXor { include_marker }.check(line).is_ok(), ok);
    }

    #[test_case(b"PWETA,1,2*54"; "no start")]
    #[test_case(b"$PWETA,1,2"; "no star")]
    #[test_case(b"$PWETA,1,2*5"; "one digit")]
    #[test_case(b"$PWETA,1,2*zz"; "not hex")]
    fn malformed(line: &[u8]) {
        assert!(matches!(
            NmeaXor {
                include_marker: false
            }
            .check(line),
            Integrity::Malformed { .. }
        ));
    }
}
