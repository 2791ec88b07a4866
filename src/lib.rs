// Copyright (c) 2015-2016, David Wood

//! Property set storage: named and numbered typed properties kept in the streams of a
//! compound-file style container, in the Microsoft property set stream format.

macro_rules! e {
        ($e: expr) => (::std::result::Result::Err(From::from($e)))
}

pub mod codepage;
pub mod config;
pub mod container;
pub mod dictionary;
mod error;
pub mod fmtid;
pub mod format;
pub mod property_set_storage;
pub mod property_storage;
mod safe_index;
pub mod variant;

pub use config::HostConfig;
pub use container::{MemoryStorage, Mode, Storage, Stream};
pub use dictionary::PropId;
pub use error::{PropError, PropErrorEnum, PropResult};
pub use fmtid::{fmtid_to_prop_stg_name, prop_stg_name_to_fmtid, ClassId, FormatId};
pub use property_set_storage::PropertySetStorage;
pub use property_storage::{
    PropSetFlags, PropSpec, PropertyStorage, ReadStatus, StatPropSetStg, StatPropStg, State,
};
pub use variant::{FileTime, PropVariant, VarType};
