//! The fixed code page table used for narrow strings.
//!
//! Narrow strings in a property set are stored in the set's code page. The table is the
//! `encoding` crate's Windows code page mapping, with 1200 always meaning UTF-16LE.

use encoding::all::UTF_16LE;
use encoding::label::encoding_from_windows_code_page;
use encoding::{DecoderTrap, EncoderTrap, EncodingRef};

use super::error::PropErrorEnum::*;
use super::error::PropResult;

pub type CodePage = u16;

/// UTF-16LE. Narrow strings in a set with this code page are stored as wide strings.
pub const CP_WINUNICODE: CodePage = 1200;
pub const CP_WINDOWS_1252: CodePage = 1252;
pub const CP_UTF8: CodePage = 65001;

fn encoding_for(cp: CodePage) -> PropResult<EncodingRef> {
    if cp == CP_WINUNICODE {
        return Ok(UTF_16LE as EncodingRef);
    }
    encoding_from_windows_code_page(cp as usize).ok_or_else(|| UnsupportedCodePage(cp).into())
}

pub fn is_supported(cp: CodePage) -> bool {
    encoding_for(cp).is_ok()
}

/// Width in bytes of one code unit, and so of the string terminator.
pub fn unit_width(cp: CodePage) -> usize {
    if cp == CP_WINUNICODE {
        2
    } else {
        1
    }
}

/// Cuts `bytes` at the first terminator of code page `cp`.
pub fn until_terminator(bytes: &[u8], cp: CodePage) -> &[u8] {
    if cp == CP_WINUNICODE {
        let units = bytes.len() / 2;
        let end = (0..units)
            .find(|&i| bytes[2 * i] == 0 && bytes[2 * i + 1] == 0)
            .unwrap_or(units);
        &bytes[..2 * end]
    } else {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        &bytes[..end]
    }
}

/// Decodes unterminated text in code page `cp`. Undecodable sequences become U+FFFD.
pub fn decode(bytes: &[u8], cp: CodePage) -> PropResult<String> {
    let enc = encoding_for(cp)?;
    Ok(enc
        .decode(bytes, DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()))
}

/// Encodes `text` in code page `cp`. Characters the code page cannot represent become `?`.
pub fn encode(text: &str, cp: CodePage) -> PropResult<Vec<u8>> {
    let enc = encoding_for(cp)?;
    enc.encode(text, EncoderTrap::Replace)
        .map_err(|_| UnsupportedCodePage(cp).into())
}

/// Re-encodes unterminated text from code page `from` to code page `to`.
pub fn transcode(bytes: &[u8], from: CodePage, to: CodePage) -> PropResult<Vec<u8>> {
    if from == to {
        return Ok(bytes.to_vec());
    }
    encode(&decode(bytes, from)?, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table() {
        assert!(is_supported(CP_WINUNICODE));
        assert!(is_supported(CP_WINDOWS_1252));
        assert!(is_supported(CP_UTF8));
        assert!(is_supported(950));
        assert!(!is_supported(1));
    }

    #[test]
    fn test_until_terminator() {
        assert_eq!(until_terminator(b"h\0i\0", CP_WINDOWS_1252), b"h");
        assert_eq!(until_terminator(b"h\0i\0\0\0", CP_WINUNICODE), b"h\0i\0");
        assert_eq!(until_terminator(b"abc", CP_WINDOWS_1252), b"abc");
    }

    #[test]
    fn test_transcode() {
        let latin = b"caf\xe9";
        let wide = transcode(latin, CP_WINDOWS_1252, CP_WINUNICODE).unwrap();
        assert_eq!(wide, vec![b'c', 0, b'a', 0, b'f', 0, 0xe9, 0]);
        assert_eq!(transcode(&wide, CP_WINUNICODE, CP_WINDOWS_1252).unwrap(), latin.to_vec());
        assert_eq!(transcode(latin, CP_WINDOWS_1252, CP_UTF8).unwrap(), "café".as_bytes());
    }

    #[test]
    fn test_unrepresentable_becomes_question_mark() {
        assert_eq!(encode("\u{4e2d}", CP_WINDOWS_1252).unwrap(), b"?".to_vec());
    }

    #[test]
    fn test_unknown_code_page() {
        assert_eq!(decode(b"x", 1), Err(UnsupportedCodePage(1).into()));
    }
}
