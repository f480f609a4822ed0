//! Latin-1 boundary transcoding.
//!
//! Wire text fields are single-byte-per-character ISO-8859-1; the server
//! keeps UTF-8 internally. Both directions skip what they cannot represent
//! instead of failing the surrounding decode or encode.

/// Decode a Latin-1 byte sequence into an owned UTF-8 string.
///
/// Every Latin-1 byte maps to the Unicode scalar of the same value, so this
/// direction never loses data.
pub fn latin1_to_utf8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode an internal UTF-8 string as Latin-1 bytes.
///
/// Characters outside U+0000..=U+00FF are skipped, not replaced; the wire
/// field simply gets shorter.
pub fn utf8_to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .filter_map(|c| {
            let code = c as u32;
            if code <= 0xFF {
                Some(code as u8)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips() {
        let s = "The quick brown fox; 0123456789!";
        assert_eq!(latin1_to_utf8(&utf8_to_latin1(s)), s);
    }

    #[test]
    fn latin1_range_round_trips() {
        let s = "café naïve Ångström ÿ";
        assert_eq!(latin1_to_utf8(&utf8_to_latin1(s)), s);
    }

    #[test]
    fn unencodable_chars_are_skipped() {
        assert_eq!(utf8_to_latin1("a☃b€c"), b"abc");
        assert_eq!(utf8_to_latin1("☃☃☃"), b"");
    }

    #[test]
    fn every_byte_decodes() {
        let all: Vec<u8> = (0u8..=255).collect();
        let decoded = latin1_to_utf8(&all);
        assert_eq!(decoded.chars().count(), 256);
        assert_eq!(utf8_to_latin1(&decoded), all);
    }
}
