//! Typed property values and their on-disk encoding.
//!
//! Every value is stored as a TypedPropertyValue: a 16-bit type tag, 16 bits of zero padding and
//! a payload, padded with zeroes to a multiple of four bytes. Narrow strings (`VT_LPSTR`) carry
//! bytes in the property set's code page; they are only transcoded when crossing the API boundary,
//! see [`convert_narrow`].

use std::fmt;

use time::OffsetDateTime;

use super::codepage::{self, CodePage, CP_WINUNICODE};
use super::error::PropErrorEnum::*;
use super::error::{PropError, PropResult};
use super::fmtid::ClassId;
use super::safe_index::{pad4, ByteReader};

#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone)]
pub struct VarType(pub u16);

pub const VT_EMPTY: VarType = VarType(0x0000);
pub const VT_NULL: VarType = VarType(0x0001);
pub const VT_I2: VarType = VarType(0x0002);
pub const VT_I4: VarType = VarType(0x0003);
pub const VT_R4: VarType = VarType(0x0004);
pub const VT_R8: VarType = VarType(0x0005);
pub const VT_CY: VarType = VarType(0x0006);
pub const VT_DATE: VarType = VarType(0x0007);
pub const VT_ERROR: VarType = VarType(0x000a);
pub const VT_BOOL: VarType = VarType(0x000b);
pub const VT_VARIANT: VarType = VarType(0x000c);
pub const VT_I1: VarType = VarType(0x0010);
pub const VT_UI1: VarType = VarType(0x0011);
pub const VT_UI2: VarType = VarType(0x0012);
pub const VT_UI4: VarType = VarType(0x0013);
pub const VT_I8: VarType = VarType(0x0014);
pub const VT_UI8: VarType = VarType(0x0015);
pub const VT_INT: VarType = VarType(0x0016);
pub const VT_UINT: VarType = VarType(0x0017);
pub const VT_LPSTR: VarType = VarType(0x001e);
pub const VT_LPWSTR: VarType = VarType(0x001f);
pub const VT_FILETIME: VarType = VarType(0x0040);
pub const VT_BLOB: VarType = VarType(0x0041);
pub const VT_CLSID: VarType = VarType(0x0048);
pub const VT_VECTOR: u16 = 0x1000;

impl VarType {
    pub fn is_vector(self) -> bool {
        self.0 & VT_VECTOR != 0
    }

    pub fn vector_of(self) -> VarType {
        VarType(self.0 | VT_VECTOR)
    }

    pub fn element(self) -> VarType {
        VarType(self.0 & !VT_VECTOR)
    }

    /// Types that may appear as the element type of a vector.
    fn is_vector_element(self) -> bool {
        match self {
            VT_I1 | VT_UI1 | VT_I2 | VT_UI2 | VT_I4 | VT_UI4 | VT_I8 | VT_UI8 | VT_R4 | VT_R8
            | VT_CY | VT_DATE | VT_BOOL | VT_ERROR | VT_FILETIME | VT_LPSTR | VT_LPWSTR
            | VT_CLSID | VT_VARIANT => true,
            _ => false,
        }
    }

    /// Types introduced by version 1 of the stream format.
    pub fn needs_version1(self) -> bool {
        matches!(self, VT_I1 | VT_INT | VT_UINT) || self == VT_I1.vector_of()
    }
}

impl fmt::Debug for VarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VarType({:#06x})", self.0)
    }
}

/// Number of 100-nanosecond intervals since January 1, 1601 (UTC).
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug, Default)]
pub struct FileTime(pub u64);

const FILETIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

impl FileTime {
    pub fn as_datetime(&self) -> Option<OffsetDateTime> {
        let nanos = (self.0 as i128 - FILETIME_UNIX_EPOCH) * 100;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }

    pub fn from_datetime(dt: OffsetDateTime) -> Option<FileTime> {
        let ticks = dt.unix_timestamp_nanos() / 100 + FILETIME_UNIX_EPOCH;
        if ticks < 0 || ticks > u64::max_value() as i128 {
            None
        } else {
            Some(FileTime(ticks as u64))
        }
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropVariant {
    Empty,
    Null,
    I1(i8),
    UI1(u8),
    I2(i16),
    UI2(u16),
    I4(i32),
    UI4(u32),
    Int(i32),
    UInt(u32),
    I8(i64),
    UI8(u64),
    R4(f32),
    R8(f64),
    /// Currency, scaled by 10,000.
    Cy(i64),
    /// OLE automation date.
    Date(f64),
    Bool(bool),
    /// An HRESULT.
    Error(u32),
    FileTime(FileTime),
    /// Narrow string bytes without terminator.
    LpStr(Vec<u8>),
    LpWStr(String),
    Blob(Vec<u8>),
    Clsid(ClassId),
    /// Element type and elements. Elements of a `VT_VARIANT` vector may be of any scalar type.
    Vector(VarType, Vec<PropVariant>),
}

impl Default for PropVariant {
    fn default() -> Self {
        PropVariant::Empty
    }
}

impl PropVariant {
    /// A narrow string. The bytes are taken to be in the host code page; a NUL ends the string.
    pub fn lpstr<B: AsRef<[u8]>>(bytes: B) -> PropVariant {
        PropVariant::LpStr(bytes.as_ref().to_vec())
    }

    pub fn lpwstr<S: Into<String>>(text: S) -> PropVariant {
        PropVariant::LpWStr(text.into())
    }

    pub fn vt(&self) -> VarType {
        match *self {
            PropVariant::Empty => VT_EMPTY,
            PropVariant::Null => VT_NULL,
            PropVariant::I1(_) => VT_I1,
            PropVariant::UI1(_) => VT_UI1,
            PropVariant::I2(_) => VT_I2,
            PropVariant::UI2(_) => VT_UI2,
            PropVariant::I4(_) => VT_I4,
            PropVariant::UI4(_) => VT_UI4,
            PropVariant::Int(_) => VT_INT,
            PropVariant::UInt(_) => VT_UINT,
            PropVariant::I8(_) => VT_I8,
            PropVariant::UI8(_) => VT_UI8,
            PropVariant::R4(_) => VT_R4,
            PropVariant::R8(_) => VT_R8,
            PropVariant::Cy(_) => VT_CY,
            PropVariant::Date(_) => VT_DATE,
            PropVariant::Bool(_) => VT_BOOL,
            PropVariant::Error(_) => VT_ERROR,
            PropVariant::FileTime(_) => VT_FILETIME,
            PropVariant::LpStr(_) => VT_LPSTR,
            PropVariant::LpWStr(_) => VT_LPWSTR,
            PropVariant::Blob(_) => VT_BLOB,
            PropVariant::Clsid(_) => VT_CLSID,
            PropVariant::Vector(elem, _) => elem.vector_of(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PropVariant::Empty
    }

    /// Checks that the value can be written to a property set: vector elements must match the
    /// declared element type, and vectors do not nest.
    pub fn check_storable(&self) -> PropResult<()> {
        if let PropVariant::Vector(elem, ref elements) = *self {
            if !elem.is_vector_element() {
                return Err(InvalidParameter.into());
            }
            for element in elements {
                let ok = match element {
                    PropVariant::Vector(..) => false,
                    _ if elem == VT_VARIANT => true,
                    _ => element.vt() == elem,
                };
                if !ok {
                    return Err(InvalidParameter.into());
                }
            }
        }
        Ok(())
    }

    /// Whether this value forces version 1 of the stream format.
    pub fn needs_version1(&self) -> bool {
        match *self {
            PropVariant::Vector(VT_VARIANT, ref elements) => {
                elements.iter().any(PropVariant::needs_version1)
            }
            _ => self.vt().needs_version1(),
        }
    }
}

/// Re-encodes the narrow strings in `value` from code page `from` to code page `to`, cutting each
/// at its first terminator in `from`.
///
/// Writes call this with the host code page as `from` and the set's code page as `to`; reads the
/// other way around. The caller's bytes are therefore always interpreted in the host code page,
/// whatever code page the set declares.
pub fn convert_narrow(value: &PropVariant, from: CodePage, to: CodePage) -> PropResult<PropVariant> {
    match *value {
        PropVariant::LpStr(ref bytes) => {
            let text = codepage::until_terminator(bytes, from);
            Ok(PropVariant::LpStr(codepage::transcode(text, from, to)?))
        }
        PropVariant::Vector(elem, ref elements) if elem == VT_LPSTR || elem == VT_VARIANT => {
            let converted = elements
                .iter()
                .map(|e| convert_narrow(e, from, to))
                .collect::<PropResult<Vec<_>>>()?;
            Ok(PropVariant::Vector(elem, converted))
        }
        ref other => Ok(other.clone()),
    }
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn len_u32(len: usize) -> PropResult<u32> {
    if len > u32::max_value() as usize {
        Err(InvalidParameter.into())
    } else {
        Ok(len as u32)
    }
}

/// Appends a CodePageString: byte count including terminator, then the bytes.
fn encode_lpstr(out: &mut Vec<u8>, bytes: &[u8], cp: CodePage) -> PropResult<()> {
    let width = codepage::unit_width(cp);
    write_u32(out, len_u32(bytes.len() + width)?);
    out.extend_from_slice(bytes);
    out.extend((0..width).map(|_| 0u8));
    Ok(())
}

/// Appends a UnicodeString: character count including terminator, then UTF-16LE.
fn encode_lpwstr(out: &mut Vec<u8>, text: &str) -> PropResult<()> {
    let units: Vec<u16> = text.encode_utf16().collect();
    write_u32(out, len_u32(units.len() + 1)?);
    for unit in units {
        write_u16(out, unit);
    }
    write_u16(out, 0);
    Ok(())
}

/// Appends the payload of a scalar without padding. `cp` is the set's code page, used for
/// `VT_LPSTR`.
fn encode_scalar(value: &PropVariant, cp: CodePage, out: &mut Vec<u8>) -> PropResult<()> {
    match *value {
        PropVariant::Empty | PropVariant::Null => {}
        PropVariant::I1(v) => out.push(v as u8),
        PropVariant::UI1(v) => out.push(v),
        PropVariant::I2(v) => write_u16(out, v as u16),
        PropVariant::UI2(v) => write_u16(out, v),
        PropVariant::Bool(v) => write_u16(out, if v { 0xffff } else { 0 }),
        PropVariant::I4(v) | PropVariant::Int(v) => write_u32(out, v as u32),
        PropVariant::UI4(v) | PropVariant::UInt(v) | PropVariant::Error(v) => write_u32(out, v),
        PropVariant::R4(v) => out.extend_from_slice(&v.to_le_bytes()),
        PropVariant::I8(v) | PropVariant::Cy(v) => out.extend_from_slice(&v.to_le_bytes()),
        PropVariant::UI8(v) => out.extend_from_slice(&v.to_le_bytes()),
        PropVariant::R8(v) | PropVariant::Date(v) => out.extend_from_slice(&v.to_le_bytes()),
        PropVariant::FileTime(ft) => out.extend_from_slice(&ft.0.to_le_bytes()),
        PropVariant::Clsid(ref clsid) => out.extend_from_slice(clsid.as_bytes()),
        PropVariant::LpStr(ref bytes) => encode_lpstr(out, bytes, cp)?,
        PropVariant::LpWStr(ref text) => encode_lpwstr(out, text)?,
        PropVariant::Blob(ref bytes) => {
            write_u32(out, len_u32(bytes.len())?);
            out.extend_from_slice(bytes);
        }
        PropVariant::Vector(..) => return Err(InvalidParameter.into()),
    }
    Ok(())
}

/// Appends `value` as a TypedPropertyValue. `out` must start on a four byte boundary of the
/// section.
pub fn encode(value: &PropVariant, cp: CodePage, out: &mut Vec<u8>) -> PropResult<()> {
    value.check_storable()?;
    write_u16(out, value.vt().0);
    write_u16(out, 0);

    match *value {
        PropVariant::Vector(elem, ref elements) => {
            write_u32(out, len_u32(elements.len())?);
            for element in elements {
                match elem {
                    VT_VARIANT => encode(element, cp, out)?,
                    VT_LPWSTR => {
                        encode_scalar(element, cp, out)?;
                        pad4(out);
                    }
                    // Narrow strings in vectors are packed unless they are wide.
                    VT_LPSTR => {
                        encode_scalar(element, cp, out)?;
                        if cp == CP_WINUNICODE {
                            pad4(out);
                        }
                    }
                    _ => encode_scalar(element, cp, out)?,
                }
            }
        }
        ref scalar => encode_scalar(scalar, cp, out)?,
    }

    pad4(out);
    Ok(())
}

fn decode_lpstr(reader: &mut ByteReader, cp: CodePage) -> PropResult<Vec<u8>> {
    let size = reader.read_u32()? as usize;
    let bytes = reader.take(size)?;
    Ok(codepage::until_terminator(bytes, cp).to_vec())
}

fn decode_lpwstr(reader: &mut ByteReader) -> PropResult<String> {
    let chars = reader.read_u32()? as usize;
    let size = chars
        .checked_mul(2)
        .ok_or_else(|| PropError::corruption("UnicodeString size overflow"))?;
    let bytes = reader.take(size)?;
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn decode_scalar(reader: &mut ByteReader, vt: VarType, cp: CodePage) -> PropResult<PropVariant> {
    Ok(match vt {
        VT_EMPTY => PropVariant::Empty,
        VT_NULL => PropVariant::Null,
        VT_I1 => PropVariant::I1(reader.read_i8()?),
        VT_UI1 => PropVariant::UI1(reader.read_u8()?),
        VT_I2 => PropVariant::I2(reader.read_i16()?),
        VT_UI2 => PropVariant::UI2(reader.read_u16()?),
        VT_BOOL => PropVariant::Bool(reader.read_u16()? != 0),
        VT_I4 => PropVariant::I4(reader.read_i32()?),
        VT_INT => PropVariant::Int(reader.read_i32()?),
        VT_UI4 => PropVariant::UI4(reader.read_u32()?),
        VT_UINT => PropVariant::UInt(reader.read_u32()?),
        VT_ERROR => PropVariant::Error(reader.read_u32()?),
        VT_R4 => PropVariant::R4(reader.read_f32()?),
        VT_I8 => PropVariant::I8(reader.read_i64()?),
        VT_CY => PropVariant::Cy(reader.read_i64()?),
        VT_UI8 => PropVariant::UI8(reader.read_u64()?),
        VT_R8 => PropVariant::R8(reader.read_f64()?),
        VT_DATE => PropVariant::Date(reader.read_f64()?),
        VT_FILETIME => PropVariant::FileTime(FileTime(reader.read_u64()?)),
        VT_CLSID => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(reader.take(16)?);
            PropVariant::Clsid(ClassId::from_bytes(raw))
        }
        VT_LPSTR => PropVariant::LpStr(decode_lpstr(reader, cp)?),
        VT_LPWSTR => PropVariant::LpWStr(decode_lpwstr(reader)?),
        VT_BLOB => {
            let size = reader.read_u32()? as usize;
            PropVariant::Blob(reader.take(size)?.to_vec())
        }
        other => {
            return Err(PropError::corruption(format!("unsupported property type {:?}", other)))
        }
    })
}

/// Decodes one TypedPropertyValue starting at the reader's position, including its padding. The
/// reader must be bounded by the end of the section.
pub fn decode(reader: &mut ByteReader, cp: CodePage) -> PropResult<PropVariant> {
    decode_value(reader, cp, true)
}

/// Elements of a `VT_VECTOR | VT_VARIANT` are decoded with `allow_vector` unset, so vectors
/// never nest.
fn decode_value(reader: &mut ByteReader, cp: CodePage, allow_vector: bool) -> PropResult<PropVariant> {
    let vt = VarType(reader.read_u16()?);
    if reader.read_u16()? != 0 {
        return Err(PropError::corruption("nonzero padding after type tag"));
    }

    let value = if vt.is_vector() {
        if !allow_vector {
            return Err(PropError::corruption("nested vector"));
        }
        let elem = vt.element();
        if !elem.is_vector_element() {
            return Err(PropError::corruption(format!("unsupported vector type {:?}", vt)));
        }
        let count = reader.read_u32()? as usize;
        // Every element takes at least one byte, which bounds the allocation.
        if count > reader.remaining() {
            return Err(PropError::corruption("vector count exceeds section"));
        }
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            let element = match elem {
                VT_VARIANT => decode_value(reader, cp, false)?,
                VT_LPWSTR => {
                    let e = decode_scalar(reader, elem, cp)?;
                    reader.align4()?;
                    e
                }
                VT_LPSTR => {
                    let e = decode_scalar(reader, elem, cp)?;
                    if cp == CP_WINUNICODE {
                        reader.align4()?;
                    }
                    e
                }
                _ => decode_scalar(reader, elem, cp)?,
            };
            elements.push(element);
        }
        PropVariant::Vector(elem, elements)
    } else {
        decode_scalar(reader, vt, cp)?
    };

    reader.align4()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::CP_WINDOWS_1252;

    fn encoded(value: &PropVariant, cp: CodePage) -> Vec<u8> {
        let mut out = Vec::new();
        encode(value, cp, &mut out).unwrap();
        out
    }

    #[test]
    fn test_encode_i2_is_padded() {
        assert_eq!(
            encoded(&PropVariant::I2(1252), CP_WINDOWS_1252),
            vec![0x02, 0x00, 0x00, 0x00, 0xe4, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_bool() {
        assert_eq!(
            encoded(&PropVariant::Bool(true), CP_WINDOWS_1252),
            vec![0x0b, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_lpstr() {
        assert_eq!(
            encoded(&PropVariant::lpstr("Job"), CP_WINDOWS_1252),
            vec![0x1e, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, b'J', b'o', b'b', 0x00]
        );
        // Wide code page: byte count includes a two byte terminator.
        assert_eq!(
            encoded(&PropVariant::LpStr(vec![b'h', 0]), CP_WINUNICODE),
            vec![0x1e, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, b'h', 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_lpwstr() {
        assert_eq!(
            encoded(&PropVariant::lpwstr("hi"), CP_WINDOWS_1252),
            vec![
                0x1f, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, b'h', 0x00, b'i', 0x00, 0x00,
                0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_decode_values() {
        let values = vec![
            PropVariant::Empty,
            PropVariant::I1(-3),
            PropVariant::UI2(0xbeef),
            PropVariant::I4(-7),
            PropVariant::UI8(1 << 40),
            PropVariant::R8(2.5),
            PropVariant::Cy(12_3400),
            PropVariant::FileTime(FileTime(0x01c6_8e4e_a1d0_1600)),
            PropVariant::lpstr("caf\u{e9}"),
            PropVariant::lpwstr("\u{4e2d}\u{6587}"),
            PropVariant::Blob(vec![1, 2, 3, 4, 5]),
            PropVariant::Clsid(crate::fmtid::FMTID_SUMMARY_INFORMATION),
            PropVariant::Vector(VT_I2, vec![PropVariant::I2(1), PropVariant::I2(2), PropVariant::I2(3)]),
            PropVariant::Vector(VT_LPSTR, vec![PropVariant::lpstr("a"), PropVariant::lpstr("bcd")]),
            PropVariant::Vector(VT_VARIANT, vec![PropVariant::I4(1), PropVariant::lpwstr("x")]),
        ];
        for value in values {
            let data = encoded(&value, CP_WINDOWS_1252);
            assert_eq!(data.len() % 4, 0, "{:?}", value);
            let mut reader = ByteReader::new(&data);
            assert_eq!(decode(&mut reader, CP_WINDOWS_1252), Ok(value));
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_decode_rejects_overlong_string() {
        let data = [0x1e, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, b'a', 0x00, 0x00, 0x00];
        let mut reader = ByteReader::new(&data);
        let err = decode(&mut reader, CP_WINDOWS_1252).unwrap_err();
        assert!(matches!(err.kind(), Corruption(_)));
    }

    #[test]
    fn test_decode_rejects_huge_vector() {
        let data = [0x02, 0x10, 0x00, 0x00, 0xff, 0xff, 0xff, 0x7f];
        let mut reader = ByteReader::new(&data);
        assert!(decode(&mut reader, CP_WINDOWS_1252).is_err());
    }

    #[test]
    fn test_decode_rejects_nested_vector() {
        let mut data = Vec::new();
        for _ in 0..3 {
            data.extend_from_slice(&[0x0c, 0x10, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        }
        data.extend_from_slice(&[0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        let mut reader = ByteReader::new(&data);
        let err = decode(&mut reader, CP_WINDOWS_1252).unwrap_err();
        assert_eq!(err, PropError::corruption("nested vector"));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let data = [0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut reader = ByteReader::new(&data);
        assert!(decode(&mut reader, CP_WINDOWS_1252).is_err());
    }

    #[test]
    fn test_check_storable() {
        assert!(PropVariant::Vector(VT_I4, vec![PropVariant::I4(1)]).check_storable().is_ok());
        assert_eq!(
            PropVariant::Vector(VT_I4, vec![PropVariant::I2(1)]).check_storable(),
            Err(InvalidParameter.into())
        );
        assert_eq!(
            PropVariant::Vector(VT_BLOB, vec![]).check_storable(),
            Err(InvalidParameter.into())
        );
    }

    #[test]
    fn test_convert_narrow_uses_terminator_of_source() {
        // The bytes of a wide "hi", read as a narrow string, stop after the 'h'.
        let converted =
            convert_narrow(&PropVariant::lpstr(b"h\0i\0"), CP_WINDOWS_1252, CP_WINUNICODE).unwrap();
        assert_eq!(converted, PropVariant::LpStr(vec![b'h', 0]));
        let back = convert_narrow(&converted, CP_WINUNICODE, CP_WINDOWS_1252).unwrap();
        assert_eq!(back, PropVariant::lpstr("h"));
    }

    #[test]
    fn test_filetime_datetime() {
        let ft = FileTime(FILETIME_UNIX_EPOCH as u64);
        assert_eq!(ft.as_datetime(), Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(FileTime::from_datetime(OffsetDateTime::UNIX_EPOCH), Some(ft));
    }
}
