pub mod bndm;
pub mod horspool;

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// Character marking a wildcard pair in signature strings
pub const DEFAULT_WILDCARD: char = '?';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("pattern has an odd number of hex digits ({0})")]
    OddLength(usize),
    #[error("invalid character {character:?} at index {index}")]
    InvalidCharacter { character: char, index: usize },
}

/// A compiled byte signature.
///
/// `sig` holds the literal byte values and `mask` is `0xff` for literal positions
/// and `0x00` for wildcard positions. Wildcards are kept out-of-band so that every
/// byte value, including the wildcard character's own code point, stays matchable.
///
/// Both are fixed once compiled, so the cached wildcard index always agrees with
/// the mask.
#[derive(Clone, Eq, PartialEq)]
pub struct Pattern {
    sig: Vec<u8>,
    mask: Vec<u8>,
    first_wildcard: Option<usize>,
}

impl Pattern {
    fn hex_digit(c: char, index: usize) -> Result<u8, PatternError> {
        c.to_digit(16)
            .map(|d| d as u8)
            .ok_or(PatternError::InvalidCharacter {
                character: c,
                index,
            })
    }

    /// Compile a contiguous hex string such as `"8B0D??A1"`.
    ///
    /// Every pair of characters is one byte. A pair containing `wildcard` matches
    /// any single byte.
    pub fn from_hex(s: &str, wildcard: char) -> Result<Self, PatternError> {
        let chars = s.chars().collect::<Vec<_>>();
        if chars.is_empty() {
            return Err(PatternError::Empty);
        }
        if chars.len() % 2 != 0 {
            return Err(PatternError::OddLength(chars.len()));
        }

        let mut sig = Vec::with_capacity(chars.len() / 2);
        let mut mask = Vec::with_capacity(chars.len() / 2);
        for (i, pair) in chars.chunks_exact(2).enumerate() {
            let (hi, lo) = (pair[0], pair[1]);
            if hi == wildcard || lo == wildcard {
                // the other half must still be a legal character
                for (j, c) in [hi, lo].into_iter().enumerate() {
                    if c != wildcard {
                        Self::hex_digit(c, i * 2 + j)?;
                    }
                }
                sig.push(0);
                mask.push(0);
            } else {
                sig.push(Self::hex_digit(hi, i * 2)? << 4 | Self::hex_digit(lo, i * 2 + 1)?);
                mask.push(0xff);
            }
        }

        let first_wildcard = mask.iter().position(|m| *m == 0);
        Ok(Self {
            sig,
            mask,
            first_wildcard,
        })
    }

    /// Compile using [`DEFAULT_WILDCARD`]
    pub fn new<S: AsRef<str>>(s: S) -> Result<Self, PatternError> {
        Self::from_hex(s.as_ref(), DEFAULT_WILDCARD)
    }

    /// Create an exact pattern from literal bytes.
    pub fn from_bytes(sig: Vec<u8>) -> Result<Self, PatternError> {
        if sig.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            mask: vec![0xff; sig.len()],
            sig,
            first_wildcard: None,
        })
    }

    /// Literal byte values, zero at wildcard positions
    pub fn sig(&self) -> &[u8] {
        &self.sig
    }

    /// `0xff` for literal bytes, `0x00` for wildcards
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.sig.len()
    }

    /// Index of the first wildcard byte, if any
    pub fn first_wildcard(&self) -> Option<usize> {
        self.first_wildcard
    }

    pub fn has_wildcards(&self) -> bool {
        self.first_wildcard.is_some()
    }

    pub fn iter(&self) -> std::iter::Zip<std::slice::Iter<u8>, std::slice::Iter<u8>> {
        self.sig.iter().zip(&self.mask)
    }

    #[inline(always)]
    pub fn is_match(&self, data: &[u8], index: usize) -> bool {
        if index + self.len() > data.len() {
            return false;
        }
        for i in 0..self.len() {
            if data[index + i] & self.mask[i] != self.sig[i] {
                return false;
            }
        }
        true
    }

    /// Lowest index at which the pattern matches `data`.
    ///
    /// Wildcard-free patterns use Horspool, everything else BNDM.
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        if self.has_wildcards() {
            bndm::find(data, self)
        } else {
            horspool::find(data, &self.sig)
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (sig, mask) in self.iter() {
            if *mask == 0 {
                write!(f, "??")?;
            } else {
                write!(f, "{:02X}", sig)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern(\"{self}\")")
    }
}

impl FromStr for Pattern {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Pattern {
    type Error = PatternError;
    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Self::new(string)
    }
}

impl TryFrom<String> for Pattern {
    type Error = PatternError;
    fn try_from(string: String) -> Result<Self, Self::Error> {
        Self::new(string)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_parse_hex() {
        let p = Pattern::new("8b0DfF").unwrap();
        assert_eq!(p.sig(), vec![0x8b, 0x0d, 0xff]);
        assert_eq!(p.mask(), vec![0xff, 0xff, 0xff]);
        assert_eq!(p.first_wildcard(), None);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_parse_wildcards() {
        let p = Pattern::new("AA??CC").unwrap();
        assert_eq!(p.sig(), vec![0xaa, 0, 0xcc]);
        assert_eq!(p.mask(), vec![0xff, 0, 0xff]);
        assert_eq!(p.first_wildcard(), Some(1));

        // a pair with a single wildcard half is still a full wildcard byte
        let p = Pattern::new("A?").unwrap();
        assert_eq!(p.mask(), vec![0]);
        let p = Pattern::new("?A").unwrap();
        assert_eq!(p.mask(), vec![0]);
    }

    #[test]
    fn test_wildcard_index_tracks_mask() {
        let patterns = [
            Pattern::new("8B0D??????").unwrap(),
            Pattern::new("??").unwrap(),
            Pattern::from_hex("AABBxx", 'x').unwrap(),
            Pattern::new("3F3F").unwrap(),
            Pattern::from_bytes(vec![0x3f, 0x00, 0xff]).unwrap(),
        ];
        for p in &patterns {
            assert_eq!(
                p.first_wildcard(),
                p.mask().iter().position(|m| *m == 0),
                "{p}"
            );
            assert_eq!(p.sig().len(), p.mask().len());
            // wildcard bytes never carry a literal value
            assert!(p.iter().all(|(sig, mask)| sig & !mask == 0));
        }

        // exact patterns take the literal path and still agree with is_match
        let exact = &patterns[4];
        let data = [0x11, 0x3f, 0x00, 0xff];
        assert!(!exact.has_wildcards());
        assert_eq!(exact.find(&data), Some(1));
        assert!(exact.is_match(&data, 1));
    }

    #[test]
    fn test_custom_wildcard() {
        let p = Pattern::from_hex("AAxxCC", 'x').unwrap();
        assert_eq!(p.first_wildcard(), Some(1));
        assert_eq!(
            Pattern::from_hex("AA??CC", 'x'),
            Err(PatternError::InvalidCharacter {
                character: '?',
                index: 2
            })
        );
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(Pattern::new(""), Err(PatternError::Empty));
        assert_eq!(Pattern::new("A"), Err(PatternError::OddLength(1)));
        assert_eq!(Pattern::new("AABBC"), Err(PatternError::OddLength(5)));
        assert_eq!(
            Pattern::new("AAZZ"),
            Err(PatternError::InvalidCharacter {
                character: 'Z',
                index: 2
            })
        );
        assert_eq!(
            Pattern::new("AA ?"),
            Err(PatternError::InvalidCharacter {
                character: ' ',
                index: 2
            })
        );
        assert_eq!(
            Pattern::new("G?"),
            Err(PatternError::InvalidCharacter {
                character: 'G',
                index: 0
            })
        );
        assert_eq!(Pattern::from_bytes(vec![]), Err(PatternError::Empty));
    }

    #[test]
    fn test_display_pattern() {
        assert_eq!(Pattern::new("aa??cc").unwrap().to_string(), "AA??CC");
        assert_eq!(Pattern::new("0a?B").unwrap().to_string(), "0A??");
        assert_eq!(
            format!("{:?}", Pattern::from_bytes(vec![1, 2]).unwrap()),
            "Pattern(\"0102\")"
        );
    }

    #[test]
    fn test_literal_wildcard_code_point() {
        // 0x3F is the ASCII code of '?', it must stay a literal byte
        let p = Pattern::new("3F3F").unwrap();
        assert!(!p.has_wildcards());
        assert_eq!(p.find(&[0x00, 0x3f, 0x00, 0x3f, 0x3f]), Some(3));
    }

    #[test]
    fn test_find_exact_at_every_offset() {
        let mut rng = StdRng::seed_from_u64(0x5167);
        for len in 1..12 {
            // filler byte 0xEE never appears in the needle
            let needle: Vec<u8> = (0..len).map(|_| rng.gen_range(0..0xee)).collect();
            let hex: String = needle.iter().map(|b| format!("{b:02x}")).collect();
            let pattern = Pattern::new(&hex).unwrap();
            assert_eq!(pattern.len(), len);
            for i in 0..40 {
                let mut data = vec![0xee; 48];
                data[i..i + len].copy_from_slice(&needle);
                assert_eq!(pattern.find(&data), Some(i), "len {len} offset {i}");
            }
        }
    }

    #[test]
    fn test_single_wildcard_matches_every_byte() {
        let pattern = Pattern::new("10??30").unwrap();
        for value in 0..=255u8 {
            let data = [0x00, 0x10, value, 0x30, 0x00];
            assert_eq!(pattern.find(&data), Some(1), "value {value:#x}");
        }
        // dropping the byte under the wildcard leaves nothing to match
        assert_eq!(pattern.find(&[0x00, 0x10, 0x30, 0x00]), None);
    }

    #[test]
    fn test_short_haystack() {
        let pattern = Pattern::new("0102??").unwrap();
        assert_eq!(pattern.find(&[0x01, 0x02]), None);
        assert_eq!(pattern.find(&[]), None);
        let pattern = Pattern::new("010203").unwrap();
        assert_eq!(pattern.find(&[0x01, 0x02]), None);
    }

    #[test]
    fn test_is_match() {
        let pattern = Pattern::new("20??").unwrap();
        assert!(pattern.is_match(b"\x10\x20\x30", 1));
        assert!(!pattern.is_match(b"\x10\x20\x30", 0));
        assert!(!pattern.is_match(b"\x10\x20", 1));
    }
}
