//! Backward Nondeterministic DAWG Matching with single-byte wildcards
//!
//! The automaton state is a `u32`, so at most the first [`MAX_WIDTH`] bytes of a
//! pattern drive the search. Longer patterns are verified in full at every
//! candidate the automaton reports, so the result is always an exact match of the
//! whole pattern.

use crate::Pattern;

/// Number of pattern bytes the bit-parallel automaton covers
pub const MAX_WIDTH: usize = u32::BITS as usize;

/// Bitmask table over the first `width` bytes of `pattern`.
///
/// Bit `width - 1 - i` of `table[b]` is set when pattern position `i` accepts
/// byte `b`. Wildcard positions set their bit in every entry.
pub fn masks(pattern: &Pattern) -> ([u32; 256], usize) {
    let width = pattern.len().min(MAX_WIDTH);

    let mut wildcards = 0u32;
    for i in 0..width {
        if pattern.mask[i] == 0 {
            wildcards |= 1 << (width - 1 - i);
        }
    }

    let mut table = [wildcards; 256];
    for i in 0..width {
        if pattern.mask[i] != 0 {
            table[pattern.sig[i] as usize] |= 1 << (width - 1 - i);
        }
    }
    (table, width)
}

/// Returns the lowest index at which `pattern` matches `haystack`.
pub fn find(haystack: &[u8], pattern: &Pattern) -> Option<usize> {
    let len = pattern.len();
    if len == 0 || haystack.len() < len {
        return None;
    }

    let (table, width) = masks(pattern);
    let prefix = 1u32 << (width - 1);
    let end = haystack.len() - len;

    let mut pos = 0;
    while pos <= end {
        let mut j = width;
        // deepest window suffix that is also a pattern prefix
        let mut last = width;
        let mut d = u32::MAX;
        loop {
            d &= table[haystack[pos + j - 1] as usize];
            if d == 0 {
                break;
            }
            j -= 1;
            if d & prefix != 0 {
                if j == 0 {
                    if width == len || pattern.is_match(haystack, pos) {
                        return Some(pos);
                    }
                    break;
                }
                last = j;
            }
            d <<= 1;
        }
        pos += last;
    }
    None
}
