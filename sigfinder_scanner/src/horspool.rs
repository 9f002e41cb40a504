//! Boyer-Moore-Horspool search for wildcard-free patterns

/// Bad-character shift table: for every byte value, the distance from its last
/// occurrence in `needle[..len - 1]` to the end of the needle.
pub fn shift_table(needle: &[u8]) -> [usize; 256] {
    let mut table = [needle.len(); 256];
    let last = needle.len().saturating_sub(1);
    for (i, b) in needle[..last].iter().enumerate() {
        table[*b as usize] = last - i;
    }
    table
}

/// Returns the lowest index at which `needle` occurs in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let table = shift_table(needle);
    let last = needle.len() - 1;

    let mut pos = 0;
    while pos <= haystack.len() - needle.len() {
        let mut i = last;
        while haystack[pos + i] == needle[i] {
            if i == 0 {
                return Some(pos);
            }
            i -= 1;
        }
        pos += table[haystack[pos + last] as usize];
    }
    None
}
