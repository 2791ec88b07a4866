// Copyright (c) 2015-2016, David Wood

use std::rc::Rc;

use tracing::{debug, warn};

use super::config::HostConfig;
use super::container::{Mode, Storage, STGC_DEFAULT, STGM_READ, STGM_READWRITE};
use super::error::PropErrorEnum::*;
use super::error::PropResult;
use super::fmtid::{ClassId, FormatId, STREAM_NAME_PREFIX};
use super::format::{PropertySetStream, Section};
use super::property_storage::{
    section_flags, PropSetFlags, PropertyStorage, StatPropSetStg, PROPSETFLAG_ANSI,
    PROPSETFLAG_CASE_SENSITIVE, PROPSETFLAG_DEFAULT, PROPSETFLAG_UNBUFFERED,
};

const CREATE_FLAGS: u32 =
    PROPSETFLAG_ANSI.0 | PROPSETFLAG_UNBUFFERED.0 | PROPSETFLAG_CASE_SENSITIVE.0;

/// Creates, opens and deletes the property sets kept in a storage.
pub struct PropertySetStorage {
    storage: Rc<dyn Storage>,
    host: HostConfig,
}

impl PropertySetStorage {
    pub fn new(storage: Rc<dyn Storage>) -> PropertySetStorage {
        PropertySetStorage::with_config(storage, HostConfig::default())
    }

    pub fn with_config(storage: Rc<dyn Storage>, host: HostConfig) -> PropertySetStorage {
        PropertySetStorage { storage, host }
    }

    /// Creates the property set `fmtid`. If the set already exists, `mode` must include
    /// `STGM_CREATE`, and the set is replaced when the new one is committed.
    pub fn create(
        &self,
        fmtid: &FormatId,
        clsid: Option<&ClassId>,
        flags: PropSetFlags,
        mode: Mode,
    ) -> PropResult<PropertyStorage> {
        if flags.0 & !CREATE_FLAGS != 0 || !mode.can_write() {
            return e!(InvalidParameter);
        }

        let name = fmtid.to_stream_name();
        let stream = match self.storage.open_stream(&name, mode) {
            Ok(stream) => {
                let data = stream.read_all()?;
                match PropertySetStream::parse(&data) {
                    Ok(ref existing) if existing.section(fmtid).is_some() && !mode.is_create() => {
                        return e!(AlreadyExists)
                    }
                    Err(err) if !mode.is_create() => return Err(err),
                    _ => {}
                }
                stream
            }
            Err(ref err) if *err.kind() == NotFound => self.storage.create_stream(&name, mode)?,
            Err(err) => return Err(err),
        };

        debug!(fmtid = %fmtid, stream = name.as_str(), "creating property set");
        Ok(PropertyStorage::create(
            stream,
            *fmtid,
            clsid.cloned().unwrap_or_else(ClassId::null),
            flags,
            self.host.clone(),
            true,
        ))
    }

    /// Opens the existing property set `fmtid`.
    pub fn open(&self, fmtid: &FormatId, mode: Mode) -> PropResult<PropertyStorage> {
        let name = fmtid.to_stream_name();
        let stream = self.storage.open_stream(&name, mode)?;
        PropertyStorage::open(stream, *fmtid, self.host.clone(), mode.can_write())
    }

    /// Deletes the property set `fmtid`. Other sets sharing its stream are kept.
    pub fn delete(&self, fmtid: &FormatId) -> PropResult<()> {
        let name = fmtid.to_stream_name();
        let mut stream = self.storage.open_stream(&name, STGM_READWRITE)?;
        let mut parsed = PropertySetStream::parse(&stream.read_all()?)?;

        if !parsed.sections.is_empty() && !parsed.remove_section(fmtid) {
            return e!(NotFound);
        }
        if parsed.sections.is_empty() {
            debug!(fmtid = %fmtid, stream = name.as_str(), "deleting property set stream");
            return self.storage.delete_stream(&name);
        }

        debug!(fmtid = %fmtid, stream = name.as_str(), "removing property set section");
        stream.write_all(&parsed.serialize()?)?;
        stream.commit(STGC_DEFAULT)
    }

    /// Every property set in the storage, one entry per section.
    pub fn enumerate(&self) -> PropResult<Vec<StatPropSetStg>> {
        let mut sets = Vec::new();
        for name in self.storage.stream_names()? {
            if !name.starts_with(STREAM_NAME_PREFIX) {
                continue;
            }
            let fmtid = match FormatId::from_stream_name(&name) {
                Ok(fmtid) => fmtid,
                Err(_) => continue,
            };

            let stream = self.storage.open_stream(&name, STGM_READ)?;
            let parsed = match PropertySetStream::parse(&stream.read_all()?) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(stream = name.as_str(), %err, "skipping unreadable property set stream");
                    continue;
                }
            };

            if parsed.sections.is_empty() {
                sets.push(StatPropSetStg {
                    fmtid,
                    clsid: ClassId::null(),
                    flags: PROPSETFLAG_DEFAULT,
                });
                continue;
            }
            for raw in &parsed.sections {
                let section = match Section::parse(&raw.data, self.host.code_page) {
                    Ok(section) => section,
                    Err(err) => {
                        warn!(stream = name.as_str(), fmtid = %raw.fmtid, %err, "skipping unreadable section");
                        continue;
                    }
                };
                sets.push(StatPropSetStg {
                    fmtid: raw.fmtid,
                    clsid: parsed.header.clsid,
                    flags: section_flags(&section),
                });
            }
        }
        Ok(sets)
    }
}
