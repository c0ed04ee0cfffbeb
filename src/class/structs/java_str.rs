use std::borrow::Cow;

use cesu8_str::java as cesu8_java;

/// Decodes the modified UTF-8 used by class file `Utf8` entries. `None` if the bytes are
/// not valid modified UTF-8.
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Option<Cow<'_, str>> {
    let java_str = cesu8_java::JavaStr::from_java_cesu8(bytes).ok()?;
    Some(cesu8_java::from_java_cesu8(java_str))
}

pub(crate) fn encode_modified_utf8(s: &str) -> Vec<u8> {
    match cesu8_java::from_utf8(s) {
        Cow::Borrowed(b) => b.as_bytes().to_vec(),
        Cow::Owned(o) => o.into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_and_supplementary() {
        let encoded = encode_modified_utf8("a\0b\u{1F600}");
        // NUL is two bytes, the supplementary char a surrogate pair of three bytes each
        assert_eq!(encoded.len(), 1 + 2 + 1 + 6);
        assert!(!encoded.contains(&0));
        assert_eq!(
            decode_modified_utf8(&encoded).as_deref(),
            Some("a\0b\u{1F600}")
        );
    }

    #[test]
    fn test_invalid() {
        assert!(decode_modified_utf8(&[0xff, 0xfe]).is_none());
        assert!(decode_modified_utf8(&[0]).is_none());
    }
}
