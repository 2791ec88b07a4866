// Copyright (c) 2015-2016, David Wood

//! A single property set, read and written through its container stream.
//!
//! All changes are made to an in-memory [`Section`] and reach the stream only on
//! [`PropertyStorage::commit`], which rewrites the whole stream. Other sections sharing the stream
//! are carried over unchanged.

use std::fmt;
use std::ops::BitOr;

use tracing::{debug, trace, warn};

use super::codepage::CP_WINUNICODE;
use super::config::HostConfig;
use super::container::{CommitFlags, Stream, STGC_DEFAULT};
use super::dictionary::{self, Access, PropId, PID_BEHAVIOR, PID_CODEPAGE, PID_FIRST_USABLE, PID_LOCALE};
use super::error::PropErrorEnum::*;
use super::error::PropResult;
use super::fmtid::{ClassId, FormatId};
use super::format::{PropertySetStream, Section};
use super::variant::{self, PropVariant, VarType};

#[derive(Eq, PartialEq, Copy, Clone, Default)]
pub struct PropSetFlags(pub u32);

pub const PROPSETFLAG_DEFAULT: PropSetFlags = PropSetFlags(0);
pub const PROPSETFLAG_NONSIMPLE: PropSetFlags = PropSetFlags(1);
pub const PROPSETFLAG_ANSI: PropSetFlags = PropSetFlags(2);
pub const PROPSETFLAG_UNBUFFERED: PropSetFlags = PropSetFlags(4);
pub const PROPSETFLAG_CASE_SENSITIVE: PropSetFlags = PropSetFlags(8);

impl PropSetFlags {
    pub fn contains(self, other: PropSetFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropSetFlags {
    type Output = PropSetFlags;

    fn bitor(self, rhs: PropSetFlags) -> PropSetFlags {
        PropSetFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for PropSetFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PropSetFlags({:#x})", self.0)
    }
}

/// Identifies a property either by identifier or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropSpec {
    Id(PropId),
    Name(String),
}

impl From<PropId> for PropSpec {
    fn from(id: PropId) -> Self {
        PropSpec::Id(id)
    }
}

impl<'a> From<&'a str> for PropSpec {
    fn from(name: &'a str) -> Self {
        PropSpec::Name(name.to_owned())
    }
}

/// Whether a read found anything. Missing properties are not an error.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ReadStatus {
    Found,
    NotFound,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum State {
    /// Created and never committed.
    Uncommitted,
    Clean,
    Dirty,
}

/// One entry of [`PropertyStorage::enumerate`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatPropStg {
    pub name: Option<String>,
    pub propid: PropId,
    pub vt: VarType,
}

/// Description of a whole property set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatPropSetStg {
    pub fmtid: FormatId,
    pub clsid: ClassId,
    pub flags: PropSetFlags,
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    clsid: ClassId,
    section: Section,
}

fn check_array<'a, T>(count: usize, array: Option<&'a [T]>) -> PropResult<&'a [T]> {
    if count == 0 {
        return Ok(&[]);
    }
    match array {
        Some(array) if array.len() >= count => Ok(&array[..count]),
        _ => e!(InvalidArgument),
    }
}

fn check_array_mut<'a, T>(count: usize, array: Option<&'a mut [T]>) -> PropResult<&'a mut [T]> {
    if count == 0 {
        return Ok(&mut []);
    }
    match array {
        Some(array) if array.len() >= count => Ok(&mut array[..count]),
        _ => e!(InvalidArgument),
    }
}

/// The flags a stored section implies.
pub(crate) fn section_flags(section: &Section) -> PropSetFlags {
    let mut flags = PROPSETFLAG_DEFAULT;
    if section.code_page != CP_WINUNICODE {
        flags = flags | PROPSETFLAG_ANSI;
    }
    if section.is_case_sensitive() {
        flags = flags | PROPSETFLAG_CASE_SENSITIVE;
    }
    flags
}

/// Highest identifier in use by a value or a name, never below the code page.
fn highest_id(section: &Section) -> PropId {
    let value = section.values.keys().next_back().cloned().unwrap_or(PID_CODEPAGE);
    let name = section.dictionary.highest_id().unwrap_or(PID_CODEPAGE);
    value.max(name)
}

/// Reads the section for `fmtid` from `stream`. An empty stream yields `None`.
fn load(stream: &dyn Stream, fmtid: &FormatId, host: &HostConfig) -> PropResult<Option<Snapshot>> {
    let data = stream.read_all()?;
    let parsed = PropertySetStream::parse(&data)?;
    if parsed.sections.is_empty() {
        return Ok(None);
    }
    let raw = parsed.section(fmtid).ok_or(NotFound)?;
    let section = Section::parse(&raw.data, host.code_page)?;
    Ok(Some(Snapshot {
        clsid: parsed.header.clsid,
        section,
    }))
}

pub struct PropertyStorage {
    stream: Box<dyn Stream>,
    fmtid: FormatId,
    unbuffered: bool,
    writable: bool,
    host: HostConfig,
    current: Snapshot,
    /// The state a never-committed set reverts to.
    baseline: Snapshot,
    state: State,
}

impl PropertyStorage {
    /// A new, empty property set over `stream`. Narrow strings are kept in Unicode unless the set
    /// is ANSI, in which case they are kept in the host code page.
    pub(crate) fn create(
        stream: Box<dyn Stream>,
        fmtid: FormatId,
        clsid: ClassId,
        flags: PropSetFlags,
        host: HostConfig,
        writable: bool,
    ) -> PropertyStorage {
        let code_page = if flags.contains(PROPSETFLAG_ANSI) {
            host.code_page
        } else {
            CP_WINUNICODE
        };
        let snapshot = Snapshot {
            clsid,
            section: Section::new(code_page, host.locale, flags.contains(PROPSETFLAG_CASE_SENSITIVE)),
        };
        debug!(fmtid = %fmtid, code_page, flags = ?flags, "created property set");
        PropertyStorage {
            stream,
            fmtid,
            unbuffered: flags.contains(PROPSETFLAG_UNBUFFERED),
            writable,
            host,
            current: snapshot.clone(),
            baseline: snapshot,
            state: State::Uncommitted,
        }
    }

    /// Opens the property set `fmtid` kept in `stream`. An empty stream holds an empty Unicode set.
    pub(crate) fn open(
        stream: Box<dyn Stream>,
        fmtid: FormatId,
        host: HostConfig,
        writable: bool,
    ) -> PropResult<PropertyStorage> {
        let fresh = Snapshot {
            clsid: ClassId::null(),
            section: Section::new(CP_WINUNICODE, host.locale, false),
        };
        let current = load(&*stream, &fmtid, &host)?.unwrap_or_else(|| fresh.clone());
        debug!(fmtid = %fmtid, code_page = current.section.code_page, "opened property set");
        Ok(PropertyStorage {
            stream,
            fmtid,
            unbuffered: false,
            writable,
            host,
            current,
            baseline: fresh,
            state: State::Clean,
        })
    }

    pub fn fmtid(&self) -> &FormatId {
        &self.fmtid
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        match self.state {
            State::Dirty => true,
            State::Clean => false,
            State::Uncommitted => self.current != self.baseline,
        }
    }

    pub fn code_page(&self) -> u16 {
        self.current.section.code_page
    }

    fn check_writable(&self) -> PropResult<()> {
        if self.writable {
            Ok(())
        } else {
            e!(AccessDenied)
        }
    }

    /// The snapshot an unbuffered set goes back to if committing a change fails.
    fn checkpoint(&self) -> Option<Snapshot> {
        if self.unbuffered {
            Some(self.current.clone())
        } else {
            None
        }
    }

    /// Records a change, committing it straight away for unbuffered sets. A failed commit undoes
    /// the change.
    fn changed(&mut self, checkpoint: Option<Snapshot>) -> PropResult<()> {
        let state = self.state;
        if self.state == State::Clean {
            self.state = State::Dirty;
        }
        if let Some(previous) = checkpoint {
            if let Err(err) = self.commit(STGC_DEFAULT) {
                warn!(fmtid = %self.fmtid, %err, "unbuffered commit failed, undoing change");
                self.current = previous;
                self.state = state;
                return Err(err);
            }
        }
        Ok(())
    }

    fn resolve(&self, spec: &PropSpec) -> Option<PropId> {
        match *spec {
            PropSpec::Id(id) => Some(id),
            PropSpec::Name(ref name) => self.current.section.dictionary.id_of(name),
        }
    }

    fn read_one(&self, spec: &PropSpec) -> PropResult<Option<PropVariant>> {
        let id = match self.resolve(spec) {
            Some(id) => id,
            None => return Ok(None),
        };
        let section = &self.current.section;
        match dictionary::reserved(id) {
            Some(r) if r.read == Access::Synthesized => Ok(match id {
                PID_CODEPAGE => Some(PropVariant::I2(section.code_page as i16)),
                PID_LOCALE => Some(PropVariant::I4(section.locale as i32)),
                PID_BEHAVIOR if section.is_case_sensitive() => Some(PropVariant::I4(1)),
                _ => None,
            }),
            Some(_) => Ok(None),
            None => match section.values.get(&id) {
                Some(value) => {
                    Ok(Some(variant::convert_narrow(value, section.code_page, self.host.code_page)?))
                }
                None => Ok(None),
            },
        }
    }

    /// Reads `count` properties into `values`. Slots for missing properties are set to
    /// `PropVariant::Empty`.
    pub fn read_multiple(
        &self,
        count: usize,
        specs: Option<&[PropSpec]>,
        values: Option<&mut [PropVariant]>,
    ) -> PropResult<ReadStatus> {
        let specs = check_array(count, specs)?;
        let values = check_array_mut(count, values)?;

        let mut results = Vec::with_capacity(count);
        for spec in specs {
            results.push(self.read_one(spec)?);
        }

        let mut status = ReadStatus::NotFound;
        for (slot, result) in values.iter_mut().zip(results) {
            *slot = match result {
                Some(value) => {
                    status = ReadStatus::Found;
                    value
                }
                None => PropVariant::Empty,
            };
        }
        Ok(status)
    }

    /// Applies one write to `next`, the section being built for this call.
    fn plan_write(
        &self,
        next: &mut Section,
        spec: &PropSpec,
        value: &PropVariant,
        propid_name_first: PropId,
    ) -> PropResult<()> {
        let id = match *spec {
            PropSpec::Id(id) => id,
            PropSpec::Name(ref name) => {
                if name.is_empty() {
                    return e!(InvalidParameter);
                }
                match next.dictionary.id_of(name) {
                    Some(id) => id,
                    None => {
                        let id = dictionary::allocate_id(propid_name_first, highest_id(next))?;
                        next.dictionary.associate(name, id)?;
                        trace!(name = name.as_str(), id, "allocated property identifier");
                        id
                    }
                }
            }
        };

        if let Some(r) = dictionary::reserved(id) {
            return match r.write {
                Access::Ignore => Ok(()),
                Access::WhileEmpty if next.values.is_empty() => match (id, value) {
                    (PID_CODEPAGE, &PropVariant::I2(cp)) => {
                        next.code_page = cp as u16;
                        Ok(())
                    }
                    (PID_LOCALE, &PropVariant::I4(locale)) => {
                        next.locale = locale as u32;
                        Ok(())
                    }
                    _ => e!(InvalidParameter),
                },
                _ => e!(InvalidParameter),
            };
        }

        value.check_storable()?;
        let stored = variant::convert_narrow(value, self.host.code_page, next.code_page)?;
        trace!(id, vt = ?stored.vt(), "writing property");
        next.values.insert(id, stored);
        Ok(())
    }

    /// Writes `count` properties. Properties given by a name not yet in the dictionary get the
    /// identifier `propid_name_first`, or one past the highest identifier in use if that is larger.
    ///
    /// Nothing is changed unless every write succeeds.
    pub fn write_multiple(
        &mut self,
        count: usize,
        specs: Option<&[PropSpec]>,
        values: Option<&[PropVariant]>,
        propid_name_first: PropId,
    ) -> PropResult<()> {
        let specs = check_array(count, specs)?;
        let values = check_array(count, values)?;
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;

        let mut next = self.current.section.clone();
        for (spec, value) in specs.iter().zip(values) {
            self.plan_write(&mut next, spec, value, propid_name_first)?;
        }
        let checkpoint = self.checkpoint();
        self.current.section = next;
        self.changed(checkpoint)
    }

    /// Deletes the values of `count` properties. Names stay in the dictionary, and deleting a
    /// property that does not exist succeeds.
    pub fn delete_multiple(&mut self, count: usize, specs: Option<&[PropSpec]>) -> PropResult<()> {
        let specs = check_array(count, specs)?;
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;

        let mut ids = Vec::with_capacity(count);
        for spec in specs {
            match self.resolve(spec) {
                Some(id) if !dictionary::is_application_id(id) => return e!(InvalidParameter),
                Some(id) => ids.push(id),
                None => {}
            }
        }
        let checkpoint = self.checkpoint();
        for id in ids {
            if self.current.section.values.remove(&id).is_some() {
                trace!(id, "deleted property");
            }
        }
        self.changed(checkpoint)
    }

    /// Reads the names of `count` identifiers into `names`. Identifiers without a name leave
    /// `None` in their slot.
    pub fn read_property_names(
        &self,
        count: usize,
        ids: Option<&[PropId]>,
        names: Option<&mut [Option<String>]>,
    ) -> PropResult<ReadStatus> {
        let ids = check_array(count, ids)?;
        let names = check_array_mut(count, names)?;

        let dict = &self.current.section.dictionary;
        let mut status = ReadStatus::NotFound;
        for (slot, &id) in names.iter_mut().zip(ids) {
            *slot = dict.name_of(id).map(str::to_owned);
            if slot.is_some() {
                status = ReadStatus::Found;
            }
        }
        Ok(status)
    }

    /// Names `count` identifiers, replacing any previous name of each.
    pub fn write_property_names(
        &mut self,
        count: usize,
        ids: Option<&[PropId]>,
        names: Option<&[String]>,
    ) -> PropResult<()> {
        let ids = check_array(count, ids)?;
        let names = check_array(count, names)?;
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;

        let mut dict = self.current.section.dictionary.clone();
        for (&id, name) in ids.iter().zip(names) {
            if name.is_empty() {
                return e!(InvalidParameter);
            }
            dict.associate(name, id)?;
        }
        let checkpoint = self.checkpoint();
        self.current.section.dictionary = dict;
        self.changed(checkpoint)
    }

    /// Removes the names of `count` identifiers. Values are left in place.
    pub fn delete_property_names(&mut self, count: usize, ids: Option<&[PropId]>) -> PropResult<()> {
        let ids = check_array(count, ids)?;
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;

        if ids.iter().any(|&id| !dictionary::is_application_id(id)) {
            return e!(InvalidParameter);
        }
        let checkpoint = self.checkpoint();
        for &id in ids {
            self.current.section.dictionary.remove_id(id);
        }
        self.changed(checkpoint)
    }

    pub fn read(&self, spec: &PropSpec) -> PropResult<Option<PropVariant>> {
        self.read_one(spec)
    }

    /// Writes a single property. New names are numbered from `PID_FIRST_USABLE`.
    pub fn write<S: Into<PropSpec>>(&mut self, spec: S, value: PropVariant) -> PropResult<()> {
        let spec = spec.into();
        self.write_multiple(1, Some(&[spec]), Some(&[value]), PID_FIRST_USABLE)
    }

    pub fn delete<S: Into<PropSpec>>(&mut self, spec: S) -> PropResult<()> {
        let spec = spec.into();
        self.delete_multiple(1, Some(&[spec]))
    }

    /// Every property with a value, in identifier order.
    pub fn enumerate(&self) -> Vec<StatPropStg> {
        let section = &self.current.section;
        section
            .values
            .iter()
            .map(|(&propid, value)| StatPropStg {
                name: section.dictionary.name_of(propid).map(str::to_owned),
                propid,
                vt: value.vt(),
            })
            .collect()
    }

    pub fn stat(&self) -> StatPropSetStg {
        let mut flags = section_flags(&self.current.section);
        if self.unbuffered {
            flags = flags | PROPSETFLAG_UNBUFFERED;
        }
        StatPropSetStg {
            fmtid: self.fmtid,
            clsid: self.current.clsid,
            flags,
        }
    }

    pub fn set_class(&mut self, clsid: ClassId) -> PropResult<()> {
        self.check_writable()?;
        let checkpoint = self.checkpoint();
        self.current.clsid = clsid;
        self.changed(checkpoint)
    }

    /// Rewrites the stream with the current state of the set, then commits the stream.
    pub fn commit(&mut self, flags: CommitFlags) -> PropResult<()> {
        self.check_writable()?;

        let existing = self.stream.read_all()?;
        let mut stream = match PropertySetStream::parse(&existing) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(fmtid = %self.fmtid, %err, "overwriting unreadable property set stream");
                PropertySetStream::default()
            }
        };
        if stream.sections.is_empty() {
            stream.header.os_version = self.host.originator_os;
        }
        stream.header.clsid = self.current.clsid;

        let section = &self.current.section;
        stream.set_section(self.fmtid, section.serialize()?, section.needs_version1());
        let data = stream.serialize()?;
        self.stream.write_all(&data)?;
        self.stream.commit(flags)?;

        debug!(fmtid = %self.fmtid, size = data.len(), values = section.values.len(), "committed property set");
        self.baseline = self.current.clone();
        self.state = State::Clean;
        Ok(())
    }

    /// Discards changes since the last commit. A set that was never committed goes back to the
    /// state it was created in.
    pub fn revert(&mut self) -> PropResult<()> {
        match self.state {
            State::Uncommitted => {
                self.current = self.baseline.clone();
            }
            State::Clean | State::Dirty => {
                self.stream.revert()?;
                self.current = match load(&*self.stream, &self.fmtid, &self.host)? {
                    Some(snapshot) => snapshot,
                    None => self.baseline.clone(),
                };
                self.state = State::Clean;
            }
        }
        debug!(fmtid = %self.fmtid, state = ?self.state, "reverted property set");
        Ok(())
    }
}

impl Drop for PropertyStorage {
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!(fmtid = %self.fmtid, "discarding uncommitted property set changes");
            if let Err(err) = self.stream.revert() {
                warn!(fmtid = %self.fmtid, %err, "failed to revert property set stream");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::CP_WINDOWS_1252;
    use crate::container::{MemoryStorage, Storage, STGM_CREATE, STGM_READ, STGM_READWRITE};
    use crate::fmtid::FMTID_SUMMARY_INFORMATION;

    fn new_set(flags: PropSetFlags) -> (MemoryStorage, PropertyStorage) {
        let storage = MemoryStorage::new();
        let stream = storage.create_stream("\u{5}test", STGM_READWRITE | STGM_CREATE).unwrap();
        let set = PropertyStorage::create(
            stream,
            FMTID_SUMMARY_INFORMATION,
            ClassId::null(),
            flags,
            HostConfig::default(),
            true,
        );
        (storage, set)
    }

    #[test]
    fn test_check_array() {
        assert_eq!(check_array::<u32>(0, None), Ok(&[][..]));
        assert_eq!(check_array::<u32>(1, None), Err(InvalidArgument.into()));
        assert_eq!(check_array(2, Some(&[1u32][..])), Err(InvalidArgument.into()));
        assert_eq!(check_array(1, Some(&[1u32, 2][..])), Ok(&[1u32][..]));
    }

    #[test]
    fn test_states() {
        let (_storage, mut set) = new_set(PROPSETFLAG_DEFAULT);
        assert_eq!(set.state(), State::Uncommitted);
        assert!(!set.is_dirty());
        set.write(PID_FIRST_USABLE, PropVariant::I4(1)).unwrap();
        assert_eq!(set.state(), State::Uncommitted);
        assert!(set.is_dirty());
        set.revert().unwrap();
        assert_eq!(set.read(&PropSpec::Id(PID_FIRST_USABLE)), Ok(None));
        assert!(!set.is_dirty());

        set.write(PID_FIRST_USABLE, PropVariant::I4(1)).unwrap();
        set.commit(STGC_DEFAULT).unwrap();
        assert_eq!(set.state(), State::Clean);
        set.delete(PID_FIRST_USABLE).unwrap();
        assert_eq!(set.state(), State::Dirty);
        set.revert().unwrap();
        assert_eq!(set.state(), State::Clean);
        assert_eq!(set.read(&PropSpec::Id(PID_FIRST_USABLE)), Ok(Some(PropVariant::I4(1))));
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let (_storage, mut set) = new_set(PROPSETFLAG_DEFAULT);
        let specs = [PropSpec::Id(5), PropSpec::from("name"), PropSpec::Id(PID_BEHAVIOR)];
        let values = [PropVariant::I4(5), PropVariant::I4(6), PropVariant::I4(1)];
        assert_eq!(
            set.write_multiple(3, Some(&specs), Some(&values), PID_FIRST_USABLE),
            Err(InvalidParameter.into())
        );
        assert_eq!(set.read(&PropSpec::Id(5)), Ok(None));
        assert_eq!(set.read(&PropSpec::from("name")), Ok(None));
        assert!(!set.is_dirty());
    }

    #[test]
    fn test_name_allocation() {
        let (_storage, mut set) = new_set(PROPSETFLAG_DEFAULT);
        set.write(PID_FIRST_USABLE, PropVariant::I4(1)).unwrap();
        set.write("a", PropVariant::I4(2)).unwrap();
        let specs = [PropSpec::from("b")];
        set.write_multiple(1, Some(&specs), Some(&[PropVariant::I4(3)]), 100).unwrap();
        set.write("A", PropVariant::I4(4)).unwrap();

        let mut names = vec![None, None, None];
        let status = set.read_property_names(3, Some(&[3, 100, 2]), Some(&mut names[..])).unwrap();
        assert_eq!(status, ReadStatus::Found);
        assert_eq!(names, vec![Some("a".to_owned()), Some("b".to_owned()), None]);
        assert_eq!(set.read(&PropSpec::Id(3)), Ok(Some(PropVariant::I4(4))));
    }

    #[test]
    fn test_code_page_and_locale() {
        let (_storage, mut set) = new_set(PROPSETFLAG_ANSI);
        let cp = PropSpec::Id(PID_CODEPAGE);
        assert_eq!(set.read(&cp), Ok(Some(PropVariant::I2(CP_WINDOWS_1252 as i16))));
        assert_eq!(set.write(PID_CODEPAGE, PropVariant::I4(1200)), Err(InvalidParameter.into()));
        set.write(PID_LOCALE, PropVariant::I4(0x0409)).unwrap();
        assert_eq!(set.read(&PropSpec::Id(PID_LOCALE)), Ok(Some(PropVariant::I4(0x0409))));
        set.write(PID_FIRST_USABLE, PropVariant::Null).unwrap();
        assert_eq!(set.write(PID_LOCALE, PropVariant::I4(0x0411)), Err(InvalidParameter.into()));
    }

    #[test]
    fn test_reserved_identifiers() {
        let (_storage, mut set) = new_set(PROPSETFLAG_CASE_SENSITIVE);
        assert_eq!(set.read(&PropSpec::Id(PID_BEHAVIOR)), Ok(Some(PropVariant::I4(1))));
        assert_eq!(set.read(&PropSpec::Id(dictionary::PID_DICTIONARY)), Ok(None));
        set.write(dictionary::PID_ILLEGAL, PropVariant::I4(1)).unwrap();
        assert_eq!(set.read(&PropSpec::Id(dictionary::PID_ILLEGAL)), Ok(None));
        assert_eq!(set.write(PropSpec::Id(0x8000_0002), PropVariant::I4(1)), Err(InvalidParameter.into()));
        assert_eq!(set.delete(PID_CODEPAGE), Err(InvalidParameter.into()));
        assert_eq!(set.delete(dictionary::PID_ILLEGAL), Err(InvalidParameter.into()));
        assert_eq!(
            set.write_property_names(1, Some(&[PID_CODEPAGE]), Some(&["x".to_owned()])),
            Err(InvalidParameter.into())
        );
        assert_eq!(set.delete_property_names(1, Some(&[PID_LOCALE])), Err(InvalidParameter.into()));
    }

    #[test]
    fn test_enumerate_and_stat() {
        let (_storage, mut set) = new_set(PROPSETFLAG_DEFAULT);
        set.write("title", PropVariant::lpwstr("x")).unwrap();
        set.write(PropSpec::Id(7), PropVariant::Bool(true)).unwrap();
        set.write_property_names(1, Some(&[9]), Some(&["unused".to_owned()])).unwrap();
        assert_eq!(
            set.enumerate(),
            vec![
                StatPropStg {
                    name: Some("title".to_owned()),
                    propid: 2,
                    vt: variant::VT_LPWSTR,
                },
                StatPropStg {
                    name: None,
                    propid: 7,
                    vt: variant::VT_BOOL,
                },
            ]
        );

        let clsid = ClassId::from_fields(1, 2, 3, [4, 5, 6, 7, 8, 9, 10, 11]);
        set.set_class(clsid).unwrap();
        let stat = set.stat();
        assert_eq!(stat.fmtid, FMTID_SUMMARY_INFORMATION);
        assert_eq!(stat.clsid, clsid);
        assert_eq!(stat.flags, PROPSETFLAG_DEFAULT);
    }

    #[test]
    fn test_unbuffered_commits_each_write() {
        let (storage, mut set) = new_set(PROPSETFLAG_UNBUFFERED | PROPSETFLAG_ANSI);
        set.write(PID_FIRST_USABLE, PropVariant::I4(1)).unwrap();
        assert_eq!(set.state(), State::Clean);
        let stream = storage.open_stream("\u{5}test", STGM_READ).unwrap();
        let reopened =
            PropertyStorage::open(stream, FMTID_SUMMARY_INFORMATION, HostConfig::default(), false).unwrap();
        assert_eq!(reopened.read(&PropSpec::Id(PID_FIRST_USABLE)), Ok(Some(PropVariant::I4(1))));
        assert_eq!(reopened.stat().flags, PROPSETFLAG_ANSI);
    }

    #[test]
    fn test_read_only_handle() {
        let (storage, mut set) = new_set(PROPSETFLAG_DEFAULT);
        set.commit(STGC_DEFAULT).unwrap();
        let stream = storage.open_stream("\u{5}test", STGM_READ).unwrap();
        let mut reader =
            PropertyStorage::open(stream, FMTID_SUMMARY_INFORMATION, HostConfig::default(), false).unwrap();
        assert_eq!(reader.write(PID_FIRST_USABLE, PropVariant::I4(1)), Err(AccessDenied.into()));
        assert_eq!(reader.delete(PID_FIRST_USABLE), Err(AccessDenied.into()));
        assert_eq!(reader.set_class(ClassId::null()), Err(AccessDenied.into()));
        assert_eq!(reader.commit(STGC_DEFAULT), Err(AccessDenied.into()));
    }

    /// Accepts writes but refuses to commit them.
    struct UncommittableStream {
        data: Vec<u8>,
    }

    impl Stream for UncommittableStream {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> PropResult<usize> {
            let start = (offset as usize).min(self.data.len());
            let len = buf.len().min(self.data.len() - start);
            buf[..len].copy_from_slice(&self.data[start..start + len]);
            Ok(len)
        }

        fn write_at(&mut self, offset: u64, data: &[u8]) -> PropResult<()> {
            let end = offset as usize + data.len();
            if self.data.len() < end {
                self.data.resize(end, 0);
            }
            self.data[offset as usize..end].copy_from_slice(data);
            Ok(())
        }

        fn set_size(&mut self, size: u64) -> PropResult<()> {
            self.data.resize(size as usize, 0);
            Ok(())
        }

        fn size(&self) -> PropResult<u64> {
            Ok(self.data.len() as u64)
        }

        fn commit(&mut self, _flags: CommitFlags) -> PropResult<()> {
            e!(AccessDenied)
        }

        fn revert(&mut self) -> PropResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unbuffered_failed_commit_undoes_change() {
        let mut set = PropertyStorage::create(
            Box::new(UncommittableStream { data: Vec::new() }),
            FMTID_SUMMARY_INFORMATION,
            ClassId::null(),
            PROPSETFLAG_UNBUFFERED,
            HostConfig::default(),
            true,
        );
        assert_eq!(set.write("title", PropVariant::I4(1)), Err(AccessDenied.into()));
        assert_eq!(set.read(&PropSpec::from("title")), Ok(None));
        assert_eq!(set.state(), State::Uncommitted);
        assert!(!set.is_dirty());

        let clsid = ClassId::from_fields(1, 2, 3, [4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(set.set_class(clsid), Err(AccessDenied.into()));
        assert_eq!(set.stat().clsid, ClassId::null());
    }
}
