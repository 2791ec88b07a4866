// Copyright (c) 2015-2016, David Wood

//! Format identifiers and the names of the streams that hold them.
//!
//! A property set lives in a stream whose name is derived from its FMTID. The two summary
//! information sets use fixed names; every other FMTID is spelled out five bits at a time with a
//! 32 character alphabet. All names start with the control character `\u{5}`, which marks the
//! stream as a property set.

use std::fmt;
use std::str::FromStr;

use super::error::PropErrorEnum::*;
use super::error::{PropError, PropResult};

pub const STREAM_NAME_PREFIX: char = '\u{5}';

pub const SUMMARY_INFORMATION_NAME: &str = "\u{5}SummaryInformation";
pub const DOC_SUMMARY_INFORMATION_NAME: &str = "\u{5}DocumentSummaryInformation";

const FMT_MAP: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz012345";
const BITS_PER_BYTE: u32 = 8;
const BITS_PER_CHAR: u32 = 5;
const CHAR_MASK: u32 = 0x1f;
const FMTID_BITS: u32 = 128;

/// Length of an encoded name, prefix included.
pub const ENCODED_NAME_LEN: usize = 27;

/// A 128 bit format identifier, stored in on-disk (little-endian GUID) byte order. CLSIDs use the
/// same representation.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Default)]
pub struct FormatId {
    contents: [u8; 16],
}

pub type ClassId = FormatId;

pub const FMTID_SUMMARY_INFORMATION: FormatId = FormatId::from_fields(
    0xf29f85e0,
    0x4ff9,
    0x1068,
    [0xab, 0x91, 0x08, 0x00, 0x2b, 0x27, 0xb3, 0xd9],
);

pub const FMTID_DOC_SUMMARY_INFORMATION: FormatId = FormatId::from_fields(
    0xd5cdd502,
    0x2e9c,
    0x101b,
    [0x93, 0x97, 0x08, 0x00, 0x2b, 0x2c, 0xf9, 0xae],
);

pub const FMTID_USER_DEFINED_PROPERTIES: FormatId = FormatId::from_fields(
    0xd5cdd505,
    0x2e9c,
    0x101b,
    [0x93, 0x97, 0x08, 0x00, 0x2b, 0x2c, 0xf9, 0xae],
);

impl FormatId {
    pub const fn from_bytes(contents: [u8; 16]) -> FormatId {
        FormatId { contents }
    }

    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> FormatId {
        let d1 = data1.to_le_bytes();
        let d2 = data2.to_le_bytes();
        let d3 = data3.to_le_bytes();
        FormatId {
            contents: [
                d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], data4[0], data4[1],
                data4[2], data4[3], data4[4], data4[5], data4[6], data4[7],
            ],
        }
    }

    pub fn null() -> FormatId {
        FormatId::default()
    }

    pub fn is_null(&self) -> bool {
        self.contents == [0u8; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.contents
    }

    /// The stream name holding this property set.
    pub fn to_stream_name(&self) -> String {
        if *self == FMTID_SUMMARY_INFORMATION {
            return SUMMARY_INFORMATION_NAME.to_owned();
        }
        if *self == FMTID_DOC_SUMMARY_INFORMATION || *self == FMTID_USER_DEFINED_PROPERTIES {
            return DOC_SUMMARY_INFORMATION_NAME.to_owned();
        }

        let mut name = String::with_capacity(ENCODED_NAME_LEN);
        name.push(STREAM_NAME_PREFIX);

        let bytes = &self.contents;
        let mut idx = 0;
        let mut bits_remaining = BITS_PER_BYTE;

        while idx < bytes.len() {
            let mut i = (bytes[idx] as u32) >> (BITS_PER_BYTE - bits_remaining);

            if bits_remaining >= BITS_PER_CHAR {
                let mut c = FMT_MAP[(i & CHAR_MASK) as usize];
                // Letters starting on a byte boundary are upper case.
                if bits_remaining == BITS_PER_BYTE && c.is_ascii_lowercase() {
                    c = c.to_ascii_uppercase();
                }
                name.push(c as char);
                bits_remaining -= BITS_PER_CHAR;
                if bits_remaining == 0 {
                    idx += 1;
                    bits_remaining = BITS_PER_BYTE;
                }
            } else {
                idx += 1;
                if idx < bytes.len() {
                    i |= (bytes[idx] as u32) << bits_remaining;
                }
                name.push(FMT_MAP[(i & CHAR_MASK) as usize] as char);
                bits_remaining += BITS_PER_BYTE - BITS_PER_CHAR;
            }
        }

        name
    }

    /// Resolves a stream name back to its FMTID. The literal names compare case-insensitively and
    /// each character of an encoded name may be given in either case.
    ///
    /// "DocumentSummaryInformation" always resolves to the document summary FMTID, even though the
    /// user-defined set shares that stream.
    pub fn from_stream_name(name: &str) -> PropResult<FormatId> {
        if name.is_empty() {
            return Err(InvalidName.into());
        }
        if name.eq_ignore_ascii_case(DOC_SUMMARY_INFORMATION_NAME) {
            return Ok(FMTID_DOC_SUMMARY_INFORMATION);
        }
        if name.eq_ignore_ascii_case(SUMMARY_INFORMATION_NAME) {
            return Ok(FMTID_SUMMARY_INFORMATION);
        }

        let encoded = name.strip_prefix(STREAM_NAME_PREFIX).unwrap_or(name);
        let chars: Vec<char> = encoded.chars().collect();
        if chars.len() != ENCODED_NAME_LEN - 1 {
            return Err(InvalidName.into());
        }

        let mut contents = [0u8; 16];
        let mut bits = 0;
        let mut byte_idx = 0;

        for &c in &chars {
            let value = char_value(c).ok_or(PropError::from(InvalidName))?;
            let bits_used = bits % BITS_PER_BYTE;
            let bits_stored = (BITS_PER_BYTE - bits_used).min(BITS_PER_CHAR);

            contents[byte_idx] |= (value << bits_used) as u8;

            if bits_stored < BITS_PER_CHAR {
                let carry = value >> (BITS_PER_BYTE - bits_used);
                if bits + bits_stored == FMTID_BITS {
                    // The final character may only carry the last three bits.
                    if carry != 0 {
                        return Err(InvalidName.into());
                    }
                    break;
                }
                byte_idx += 1;
                contents[byte_idx] |= carry as u8;
            } else if bits_used + BITS_PER_CHAR == BITS_PER_BYTE {
                byte_idx += 1;
            }

            bits += BITS_PER_CHAR;
        }

        Ok(FormatId { contents })
    }
}

fn char_value(c: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        'A'..='Z' => Some(c as u32 - 'A' as u32),
        '0'..='5' => Some(c as u32 - '0' as u32 + 26),
        _ => None,
    }
}

/// Writes the stream name of `fmtid` into `name`. Either argument missing is an invalid argument.
pub fn fmtid_to_prop_stg_name(fmtid: Option<&FormatId>, name: Option<&mut String>) -> PropResult<()> {
    match (fmtid, name) {
        (Some(fmtid), Some(name)) => {
            *name = fmtid.to_stream_name();
            Ok(())
        }
        _ => Err(InvalidArgument.into()),
    }
}

/// Decodes `name` into `fmtid`. A missing output is an invalid argument; a missing or undecodable
/// name is an invalid name.
pub fn prop_stg_name_to_fmtid(name: Option<&str>, fmtid: Option<&mut FormatId>) -> PropResult<()> {
    let fmtid = match fmtid {
        Some(fmtid) => fmtid,
        None => return Err(InvalidArgument.into()),
    };
    let name = match name {
        Some(name) => name,
        None => return Err(InvalidName.into()),
    };
    *fmtid = FormatId::from_stream_name(name)?;
    Ok(())
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let c = &self.contents;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-",
            c[3], c[2], c[1], c[0], c[5], c[4], c[7], c[6], c[8], c[9]
        )?;
        for b in &c[10..] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}", self)
    }
}

impl FromStr for FormatId {
    type Err = PropError;

    /// Parses `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally wrapped in braces.
    fn from_str(s: &str) -> PropResult<FormatId> {
        let s = s.trim_start_matches('{').trim_end_matches('}');
        let s = s.as_bytes();
        if s.len() != 36 || s[8] != b'-' || s[13] != b'-' || s[18] != b'-' || s[23] != b'-' {
            return Err(InvalidArgument.into());
        }
        let hex: Vec<u8> = s.iter().cloned().filter(|&b| b != b'-').collect();
        let mut raw = [0u8; 16];
        for (i, pair) in hex.chunks(2).enumerate() {
            raw[i] = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
        }
        Ok(FormatId::from_fields(
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            u16::from_be_bytes([raw[4], raw[5]]),
            u16::from_be_bytes([raw[6], raw[7]]),
            [raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15]],
        ))
    }
}

fn hex_nibble(c: u8) -> PropResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(InvalidArgument.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IID_IPROPERTY_SET_STORAGE: FormatId =
        FormatId::from_fields(0x0000013a, 0, 0, [0xc0, 0, 0, 0, 0, 0, 0, 0x46]);

    #[test]
    fn test_known_names() {
        assert_eq!(FMTID_SUMMARY_INFORMATION.to_stream_name(), "\u{5}SummaryInformation");
        assert_eq!(
            FMTID_DOC_SUMMARY_INFORMATION.to_stream_name(),
            "\u{5}DocumentSummaryInformation"
        );
        assert_eq!(
            FMTID_USER_DEFINED_PROPERTIES.to_stream_name(),
            "\u{5}DocumentSummaryInformation"
        );
    }

    #[test]
    fn test_encoded_name() {
        let name = IID_IPROPERTY_SET_STORAGE.to_stream_name();
        assert_eq!(name, "\u{5}0jaaaaaaAaaaaadaAaaaaaaaGc");
        assert_eq!(name.chars().count(), ENCODED_NAME_LEN);
        assert_eq!(FormatId::from_stream_name(&name), Ok(IID_IPROPERTY_SET_STORAGE));
    }

    #[test]
    fn test_decode_case_insensitive() {
        let name = "\u{5}0jaaaaaaAaaaaadaAaaaaaaaGc".to_uppercase();
        assert_eq!(FormatId::from_stream_name(&name), Ok(IID_IPROPERTY_SET_STORAGE));
        assert_eq!(
            FormatId::from_stream_name("\u{5}DOCUMENTSUMMARYINFORMATION"),
            Ok(FMTID_DOC_SUMMARY_INFORMATION)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(FormatId::from_stream_name(""), Err(InvalidName.into()));
        assert_eq!(FormatId::from_stream_name("\u{5}short"), Err(InvalidName.into()));
        assert_eq!(
            FormatId::from_stream_name("\u{5}0jaaaaaaAaaaaadaAaaaaaaaG!"),
            Err(InvalidName.into())
        );
        // 'z' in the last position sets bits past the end of the identifier.
        assert_eq!(
            FormatId::from_stream_name("\u{5}0jaaaaaaAaaaaadaAaaaaaaaGz"),
            Err(InvalidName.into())
        );
    }

    #[test]
    fn test_round_trip_patterns() {
        for pattern in [0x00u8, 0xff, 0xa5, 0x5a, 0x01, 0x80].iter() {
            let mut raw = [*pattern; 16];
            raw[0] ^= 0x13;
            raw[15] ^= 0x07;
            let fmtid = FormatId::from_bytes(raw);
            if fmtid == FMTID_SUMMARY_INFORMATION {
                continue;
            }
            let name = fmtid.to_stream_name();
            assert_eq!(FormatId::from_stream_name(&name), Ok(fmtid));
            assert_eq!(FormatId::from_stream_name(&name.to_uppercase()), Ok(fmtid));
        }
    }

    #[test]
    fn test_null_arguments() {
        let mut name = String::new();
        assert_eq!(fmtid_to_prop_stg_name(None, Some(&mut name)), Err(InvalidArgument.into()));
        assert_eq!(
            fmtid_to_prop_stg_name(Some(&FMTID_SUMMARY_INFORMATION), None),
            Err(InvalidArgument.into())
        );

        let mut fmtid = FormatId::null();
        assert_eq!(prop_stg_name_to_fmtid(None, None), Err(InvalidArgument.into()));
        assert_eq!(prop_stg_name_to_fmtid(None, Some(&mut fmtid)), Err(InvalidName.into()));
        assert_eq!(
            prop_stg_name_to_fmtid(Some(DOC_SUMMARY_INFORMATION_NAME), None),
            Err(InvalidArgument.into())
        );
    }

    #[test]
    fn test_guid_string() {
        assert_eq!(
            FMTID_SUMMARY_INFORMATION.to_string(),
            "f29f85e0-4ff9-1068-ab91-08002b27b3d9"
        );
        assert_eq!(
            "{F29F85E0-4FF9-1068-AB91-08002B27B3D9}".parse::<FormatId>(),
            Ok(FMTID_SUMMARY_INFORMATION)
        );
        assert!("not-a-guid".parse::<FormatId>().is_err());
    }
}
