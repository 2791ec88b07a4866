// Copyright (c) 2015-2016, David Wood

//! The property set stream layout.
//!
//! A stream starts with a PropertySetStream header and a table of (FMTID, offset) pairs, one per
//! section. Each section is a size, a property count, a table of (ID, offset) pairs and the
//! TypedPropertyValue records those offsets point at. The dictionary, code page, locale and
//! behavior live in the section as properties with reserved identifiers.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use super::codepage::{self, CodePage, CP_WINUNICODE};
use super::dictionary::{
    self, Dictionary, PropId, PID_BEHAVIOR, PID_CODEPAGE, PID_DICTIONARY, PID_LOCALE,
};
use super::error::PropErrorEnum::*;
use super::error::{PropError, PropResult};
use super::fmtid::{ClassId, FormatId, FMTID_DOC_SUMMARY_INFORMATION};
use super::safe_index::{pad4, ByteReader, SafeIndex};
use super::variant::{self, PropVariant};

pub const BYTE_ORDER_MARK: u16 = 0xfffe;
pub const LOCALE_SYSTEM_DEFAULT: u32 = 0x0800;
/// Windows 2000, the originator written by default.
pub const DEFAULT_OS_VERSION: u32 = 0x0002_0006;
/// Behavior flag marking a set whose names compare case-sensitively.
pub const BEHAVIOR_CASE_SENSITIVE: u32 = 0x0000_0001;

const HEADER_SIZE: usize = 28;
const SECTION_ENTRY_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 8;
const PROPERTY_ENTRY_SIZE: usize = 8;

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn to_u32(v: usize) -> PropResult<u32> {
    if v > u32::max_value() as usize {
        e!(InvalidParameter)
    } else {
        Ok(v as u32)
    }
}

fn u32_at(data: &[u8], offset: usize) -> PropResult<u32> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| PropError::corruption("offset overflow"))?;
    let bytes = data
        .get_checked(offset..end)
        .ok_or_else(|| PropError::corruption("offset past end of stream"))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The decoded contents of one section.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub code_page: CodePage,
    pub locale: u32,
    /// Names and case sensitivity. Case sensitivity is persisted as the behavior property.
    pub dictionary: Dictionary,
    /// Application properties only, with narrow strings encoded in `code_page`.
    pub values: BTreeMap<PropId, PropVariant>,
}

impl Section {
    pub fn new(code_page: CodePage, locale: u32, case_sensitive: bool) -> Section {
        Section {
            code_page,
            locale,
            dictionary: Dictionary::new(case_sensitive),
            values: BTreeMap::new(),
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.dictionary.is_case_sensitive()
    }

    /// Whether writing this section requires version 1 of the stream format.
    pub fn needs_version1(&self) -> bool {
        self.is_case_sensitive()
            || self.dictionary.has_long_names()
            || self.values.values().any(PropVariant::needs_version1)
    }

    /// Decodes a section. `data` starts at the section and may run past its end.
    ///
    /// The code page is resolved before anything else so that the dictionary and narrow strings
    /// decode in it; `fallback_cp` is used when the section has no code page property.
    pub fn parse(data: &[u8], fallback_cp: CodePage) -> PropResult<Section> {
        let size = u32_at(data, 0)? as usize;
        let count = u32_at(data, 4)? as usize;
        let data = data
            .get_checked(..size)
            .ok_or_else(|| PropError::corruption("section size past end of stream"))?;

        let table_len = count
            .checked_mul(PROPERTY_ENTRY_SIZE)
            .and_then(|n| n.checked_add(SECTION_HEADER_SIZE))
            .ok_or_else(|| PropError::corruption("property count overflow"))?;
        if table_len > size {
            return e!(PropError::corruption("property table past end of section"));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = SECTION_HEADER_SIZE + i * PROPERTY_ENTRY_SIZE;
            let id = u32_at(data, at)?;
            let offset = u32_at(data, at + 4)? as usize;
            if offset < table_len || offset >= size {
                return e!(PropError::corruption(format!(
                    "property {:#x} offset {:#x} outside section",
                    id, offset
                )));
            }
            entries.push((id, offset));
        }

        let value_at = |offset: usize, cp: CodePage| -> PropResult<PropVariant> {
            let mut reader = ByteReader::new(&data[offset..]);
            variant::decode(&mut reader, cp)
        };

        let mut code_page = None;
        for &(id, offset) in entries.iter().filter(|&&(id, _)| id == PID_CODEPAGE) {
            if code_page.is_some() {
                warn!(offset, "ignoring duplicate code page property");
                continue;
            }
            // The code page record holds no strings, so the code page it is decoded in is moot.
            code_page = Some(match value_at(offset, CP_WINUNICODE)? {
                PropVariant::I2(cp) => cp as u16,
                PropVariant::UI2(cp) => cp,
                other => {
                    return e!(PropError::corruption(format!(
                        "code page property {:#x} has type {:?}",
                        id,
                        other.vt()
                    )))
                }
            });
        }
        let code_page = code_page.unwrap_or_else(|| {
            warn!(fallback_cp, "section has no code page property");
            fallback_cp
        });

        let mut locale = LOCALE_SYSTEM_DEFAULT;
        let mut case_sensitive = false;
        for &(id, offset) in &entries {
            match id {
                PID_LOCALE => {
                    locale = match value_at(offset, code_page)? {
                        PropVariant::UI4(v) => v,
                        PropVariant::I4(v) => v as u32,
                        _ => return e!(PropError::corruption("locale property is not a VT_UI4")),
                    }
                }
                PID_BEHAVIOR => {
                    let behavior = match value_at(offset, code_page)? {
                        PropVariant::UI4(v) => v,
                        PropVariant::I4(v) => v as u32,
                        _ => return e!(PropError::corruption("behavior property is not a VT_UI4")),
                    };
                    case_sensitive = behavior & BEHAVIOR_CASE_SENSITIVE != 0;
                }
                _ => {}
            }
        }

        let mut section = Section::new(code_page, locale, case_sensitive);
        for &(id, offset) in &entries {
            match id {
                PID_DICTIONARY => {
                    let mut reader = ByteReader::new(&data[offset..]);
                    parse_dictionary(&mut reader, code_page, &mut section.dictionary)?;
                }
                PID_CODEPAGE | PID_LOCALE | PID_BEHAVIOR => {}
                id if dictionary::is_application_id(id) => {
                    let value = value_at(offset, code_page)?;
                    trace!(id, vt = ?value.vt(), "decoded property");
                    section.values.insert(id, value);
                }
                id => warn!(id, "skipping property with reserved identifier"),
            }
        }
        Ok(section)
    }

    /// Encodes the section, including its size and property table.
    pub fn serialize(&self) -> PropResult<Vec<u8>> {
        let cp = self.code_page;
        let encoded = |value: &PropVariant| -> PropResult<Vec<u8>> {
            let mut out = Vec::new();
            variant::encode(value, cp, &mut out)?;
            Ok(out)
        };

        let mut records: Vec<(PropId, Vec<u8>)> = Vec::with_capacity(self.values.len() + 4);
        if !self.dictionary.is_empty() {
            records.push((PID_DICTIONARY, serialize_dictionary(&self.dictionary, cp)?));
        }
        records.push((PID_CODEPAGE, encoded(&PropVariant::I2(cp as i16))?));
        for (&id, value) in &self.values {
            records.push((id, encoded(value)?));
        }
        if self.locale != LOCALE_SYSTEM_DEFAULT {
            records.push((PID_LOCALE, encoded(&PropVariant::UI4(self.locale))?));
        }
        if self.is_case_sensitive() {
            records.push((PID_BEHAVIOR, encoded(&PropVariant::UI4(BEHAVIOR_CASE_SENSITIVE))?));
        }
        records.sort_by_key(|&(id, _)| id);

        let mut out = Vec::new();
        write_u32(&mut out, 0);
        write_u32(&mut out, to_u32(records.len())?);
        let mut offset = SECTION_HEADER_SIZE + records.len() * PROPERTY_ENTRY_SIZE;
        for &(id, ref record) in &records {
            write_u32(&mut out, id);
            write_u32(&mut out, to_u32(offset)?);
            offset += record.len();
        }
        for (_, record) in records {
            out.extend_from_slice(&record);
        }

        let size = to_u32(out.len())?.to_le_bytes();
        out[..4].copy_from_slice(&size);
        Ok(out)
    }
}

/// Reads a dictionary: an entry count, then (ID, length, name) entries. The length counts
/// characters including the terminator; wide names are padded to four bytes.
fn parse_dictionary(reader: &mut ByteReader, cp: CodePage, dict: &mut Dictionary) -> PropResult<()> {
    let count = reader.read_u32()? as usize;
    if count > reader.remaining() {
        return e!(PropError::corruption("dictionary count exceeds section"));
    }
    let width = codepage::unit_width(cp);
    for _ in 0..count {
        let id = reader.read_u32()?;
        let chars = reader.read_u32()? as usize;
        let len = chars
            .checked_mul(width)
            .ok_or_else(|| PropError::corruption("dictionary entry size overflow"))?;
        let raw = reader.take(len)?;
        if cp == CP_WINUNICODE {
            reader.align4()?;
        }
        let name = codepage::decode(codepage::until_terminator(raw, cp), cp)?;
        if dict.associate(&name, id).is_err() {
            warn!(id, name = name.as_str(), "skipping dictionary entry with reserved identifier");
        }
    }
    Ok(())
}

fn serialize_dictionary(dict: &Dictionary, cp: CodePage) -> PropResult<Vec<u8>> {
    let width = codepage::unit_width(cp);
    let mut out = Vec::new();
    write_u32(&mut out, to_u32(dict.len())?);
    for (id, name) in dict.iter() {
        let bytes = codepage::encode(name, cp)?;
        write_u32(&mut out, id);
        write_u32(&mut out, to_u32(bytes.len() / width + 1)?);
        out.extend_from_slice(&bytes);
        out.extend((0..width).map(|_| 0u8));
        if cp == CP_WINUNICODE {
            pad4(&mut out);
        }
    }
    pad4(&mut out);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub version: u16,
    pub os_version: u32,
    pub clsid: ClassId,
}

impl Default for StreamHeader {
    fn default() -> Self {
        StreamHeader {
            version: 0,
            os_version: DEFAULT_OS_VERSION,
            clsid: ClassId::null(),
        }
    }
}

/// A section kept as raw bytes, so that sections belonging to other property sets in the same
/// stream are written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSection {
    pub fmtid: FormatId,
    pub data: Vec<u8>,
    pub needs_version1: bool,
}

/// A whole property set stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertySetStream {
    pub header: StreamHeader,
    pub sections: Vec<RawSection>,
}

impl PropertySetStream {
    /// Splits a stream into its header and sections. An empty stream has no sections.
    pub fn parse(data: &[u8]) -> PropResult<PropertySetStream> {
        if data.is_empty() {
            return Ok(PropertySetStream::default());
        }
        let mut reader = ByteReader::new(
            data.get_checked(..HEADER_SIZE)
                .ok_or_else(|| PropError::corruption("truncated stream header"))?,
        );
        let byte_order = reader.read_u16()?;
        if byte_order != BYTE_ORDER_MARK {
            return e!(PropError::corruption(format!("bad byte order {:#06x}", byte_order)));
        }
        let version = reader.read_u16()?;
        if version > 1 {
            return e!(PropError::corruption(format!("unknown format version {}", version)));
        }
        let os_version = reader.read_u32()?;
        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(reader.take(16)?);
        let count = reader.read_u32()? as usize;
        if count == 0 {
            return e!(PropError::corruption("stream has no sections"));
        }
        if count > data.len() / SECTION_ENTRY_SIZE {
            return e!(PropError::corruption("section count exceeds stream"));
        }

        let mut sections = Vec::with_capacity(count);
        for i in 0..count {
            let at = HEADER_SIZE + i * SECTION_ENTRY_SIZE;
            let entry = data
                .get_checked(at..at + SECTION_ENTRY_SIZE)
                .ok_or_else(|| PropError::corruption("truncated section table"))?;
            let mut fmtid = [0u8; 16];
            fmtid.copy_from_slice(&entry[..16]);
            let offset = u32_at(entry, 16)? as usize;
            let size = u32_at(data, offset)? as usize;
            if size < SECTION_HEADER_SIZE {
                return e!(PropError::corruption("section smaller than its header"));
            }
            let end = offset
                .checked_add(size)
                .ok_or_else(|| PropError::corruption("section size overflow"))?;
            let section = data
                .get_checked(offset..end)
                .ok_or_else(|| PropError::corruption("section past end of stream"))?;
            sections.push(RawSection {
                fmtid: FormatId::from_bytes(fmtid),
                data: section.to_vec(),
                needs_version1: version == 1,
            });
        }

        Ok(PropertySetStream {
            header: StreamHeader {
                version,
                os_version,
                clsid: ClassId::from_bytes(clsid),
            },
            sections,
        })
    }

    pub fn section(&self, fmtid: &FormatId) -> Option<&RawSection> {
        self.sections.iter().find(|s| s.fmtid == *fmtid)
    }

    pub fn fmtids(&self) -> impl Iterator<Item = &FormatId> {
        self.sections.iter().map(|s| &s.fmtid)
    }

    /// Replaces the section for `fmtid`, or adds it. The document summary section always comes
    /// first in a stream.
    pub fn set_section(&mut self, fmtid: FormatId, data: Vec<u8>, needs_version1: bool) {
        let section = RawSection {
            fmtid,
            data,
            needs_version1,
        };
        match self.sections.iter().position(|s| s.fmtid == fmtid) {
            Some(i) => self.sections[i] = section,
            None if fmtid == FMTID_DOC_SUMMARY_INFORMATION => self.sections.insert(0, section),
            None => self.sections.push(section),
        }
    }

    /// Removes the section for `fmtid`. Returns whether there was one.
    pub fn remove_section(&mut self, fmtid: &FormatId) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| s.fmtid != *fmtid);
        self.sections.len() != before
    }

    pub fn serialize(&self) -> PropResult<Vec<u8>> {
        let version = if self.sections.iter().any(|s| s.needs_version1) {
            1
        } else {
            0
        };

        let mut out = Vec::new();
        write_u16(&mut out, BYTE_ORDER_MARK);
        write_u16(&mut out, version);
        write_u32(&mut out, self.header.os_version);
        out.extend_from_slice(self.header.clsid.as_bytes());
        write_u32(&mut out, to_u32(self.sections.len())?);

        let mut offset = HEADER_SIZE + self.sections.len() * SECTION_ENTRY_SIZE;
        for section in &self.sections {
            out.extend_from_slice(section.fmtid.as_bytes());
            write_u32(&mut out, to_u32(offset)?);
            offset += section.data.len() + (4 - section.data.len() % 4) % 4;
        }
        for section in &self.sections {
            out.extend_from_slice(&section.data);
            pad4(&mut out);
        }
        Ok(out)
    }
}
