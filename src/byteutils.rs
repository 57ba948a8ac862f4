//! Byte slice manipulation / searching routines used by the HTTP codec.

/// Return the position of `needle` in `haystack`.
///
/// # Panics
/// `needle` must not be empty.
pub fn memmem(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    assert!(!needle.is_empty(), "memmem: empty needle");
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Split `src` on a single byte, at most `max_splits` times.
///
/// Thin wrapper around `splitn` that collects into a `Vec` the way the
/// call sites here want to index into directly.
pub fn split_on(src: &[u8], b: u8, max_splits: usize) -> Vec<&[u8]> {
    src.splitn(max_splits + 1, |&c| c == b).collect()
}

/// Split `src` on `b"\r\n"`.
///
/// A final element without a trailing `\r\n` is dropped, matching how the
/// header block (which always ends in `\r\n\r\n`) is meant to be consumed.
pub fn split_on_crlf(src: &[u8]) -> Vec<&[u8]> {
    let mut start = 0;
    let mut ret = Vec::new();
    let mut idx = 0;
    for w in src.windows(2) {
        if w == b"\r\n" {
            ret.push(&src[start..idx]);
            start = idx + 2;
        }
        idx += 1;
    }
    ret
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'0'..=b'9' => Some(byte - b'0'),
        _ => None,
    }
}

/// Decode `%XX` escapes. Invalid or truncated escapes are emitted literally
/// (`%` followed by the offending bytes), per `spec.md` §4.2.
pub fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_val(input[i + 1]), hex_val(input[i + 2])) {
                ret.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        ret.push(input[i]);
        i += 1;
    }
    ret
}

/// Remove leading and trailing ASCII whitespace from `input`, matching
/// Python's argumentless `str.strip()` (space, tab, CR, LF, form feed,
/// vertical tab) used by `horned.py`'s header-value trimming.
pub fn strip(input: &[u8]) -> &[u8] {
    rstrip(lstrip(input))
}

/// Remove leading ASCII whitespace, without copying.
pub fn lstrip(input: &[u8]) -> &[u8] {
    let pos = input.iter().take_while(|c| c.is_ascii_whitespace()).count();
    &input[pos..]
}

/// Remove trailing ASCII whitespace, without copying.
pub fn rstrip(input: &[u8]) -> &[u8] {
    let mut end = input.len();
    while end > 0 && input[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memmem_finds_and_misses() {
        let a = b"hello world dude";
        assert_eq!(memmem(a, b" wor"), Some(5));
        assert_eq!(memmem(a, b" work"), None);
        assert_eq!(memmem(a, b"hell"), Some(0));
    }

    #[test]
    fn split_on_respects_max_splits() {
        let a = b"hello world dude";
        let parts = split_on(a, b' ', 10);
        assert_eq!(parts, vec![b"hello".as_slice(), b"world", b"dude"]);

        let parts = split_on(a, b' ', 1);
        assert_eq!(parts, vec![b"hello".as_slice(), b"world dude"]);

        let parts = split_on(b"    ", b' ', 2);
        assert_eq!(parts, vec![b"".as_slice(), b"", b"  "]);
    }

    #[test]
    fn split_on_crlf_drops_dangling_tail() {
        let a = b"hello world\r\ndude\r\n\r\nlast one\r\n";
        let parts = split_on_crlf(a);
        assert_eq!(
            parts,
            vec![b"hello world".as_slice(), b"dude", b"", b"last one"]
        );
    }

    #[test]
    fn percent_decode_handles_truncated_and_invalid_escapes() {
        assert_eq!(percent_decode(b"/hi%20there%ff%00"), b"/hi there\xff\x00");
        assert_eq!(percent_decode(b"/%fe%01%"), b"/\xfe\x01%");
        assert_eq!(percent_decode(b"/%fg%zz"), b"/%fg%zz");
        assert_eq!(percent_decode(b"%"), b"%");
        assert_eq!(percent_decode(b"%%"), b"%%");
        assert_eq!(percent_decode(b"%%%"), b"%%%");
    }

    #[test]
    fn strip_variants() {
        assert_eq!(lstrip(b"  there now "), b"there now ");
        assert_eq!(rstrip(b"  there now "), b"  there now");
        assert_eq!(strip(b"  there now "), b"there now");
        assert_eq!(strip(b""), b"");
    }
}
