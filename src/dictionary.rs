//! Property names and the reserved property identifiers.

use std::collections::BTreeMap;

use super::error::PropErrorEnum::*;
use super::error::PropResult;

pub type PropId = u32;

pub const PID_DICTIONARY: PropId = 0x0000_0000;
pub const PID_CODEPAGE: PropId = 0x0000_0001;
pub const PID_FIRST_USABLE: PropId = 0x0000_0002;
pub const PID_LOCALE: PropId = 0x8000_0000;
pub const PID_MIN_READONLY: PropId = 0x8000_0000;
pub const PID_BEHAVIOR: PropId = 0x8000_0003;
pub const PID_ILLEGAL: PropId = 0xffff_ffff;

/// Longest name allowed by version 0 of the stream format, in characters.
pub const MAX_VERSION0_NAME_LEN: usize = 127;

/// How an operation treats a reserved identifier.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Access {
    /// Rejected with an invalid parameter error.
    Deny,
    /// Accepted and dropped.
    Ignore,
    /// Served from the set's own header fields rather than the value map.
    Synthesized,
    /// Settable only while the set holds no values.
    WhileEmpty,
}

#[derive(Debug)]
pub struct ReservedId {
    pub first: PropId,
    pub last: PropId,
    pub name: &'static str,
    pub read: Access,
    pub write: Access,
    pub delete: Access,
}

/// Policy for every identifier outside the application range. Earlier entries take precedence.
pub static RESERVED_IDS: &[ReservedId] = &[
    ReservedId {
        first: PID_DICTIONARY,
        last: PID_DICTIONARY,
        name: "dictionary",
        read: Access::Deny,
        write: Access::Deny,
        delete: Access::Deny,
    },
    ReservedId {
        first: PID_CODEPAGE,
        last: PID_CODEPAGE,
        name: "code page",
        read: Access::Synthesized,
        write: Access::WhileEmpty,
        delete: Access::Deny,
    },
    ReservedId {
        first: PID_LOCALE,
        last: PID_LOCALE,
        name: "locale",
        read: Access::Synthesized,
        write: Access::WhileEmpty,
        delete: Access::Deny,
    },
    ReservedId {
        first: PID_BEHAVIOR,
        last: PID_BEHAVIOR,
        name: "behavior",
        read: Access::Synthesized,
        write: Access::Deny,
        delete: Access::Deny,
    },
    ReservedId {
        first: PID_ILLEGAL,
        last: PID_ILLEGAL,
        name: "illegal",
        read: Access::Deny,
        write: Access::Ignore,
        delete: Access::Deny,
    },
    ReservedId {
        first: PID_MIN_READONLY,
        last: PID_ILLEGAL,
        name: "read-only",
        read: Access::Deny,
        write: Access::Deny,
        delete: Access::Deny,
    },
];

/// The policy entry for `id`, or `None` for an application identifier.
pub fn reserved(id: PropId) -> Option<&'static ReservedId> {
    RESERVED_IDS.iter().find(|r| r.first <= id && id <= r.last)
}

pub fn is_application_id(id: PropId) -> bool {
    reserved(id).is_none()
}

/// Name to identifier mapping for one property set.
///
/// Lookups fold case unless the set was created case-sensitive. The original spelling of each name
/// is kept for enumeration and serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    case_sensitive: bool,
    by_name: BTreeMap<String, PropId>,
    by_id: BTreeMap<PropId, String>,
}

impl Dictionary {
    pub fn new(case_sensitive: bool) -> Dictionary {
        Dictionary {
            case_sensitive,
            by_name: BTreeMap::new(),
            by_id: BTreeMap::new(),
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_owned()
        } else {
            name.to_lowercase()
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<PropId> {
        self.by_name.get(&self.key(name)).cloned()
    }

    pub fn name_of(&self, id: PropId) -> Option<&str> {
        self.by_id.get(&id).map(|s| s.as_str())
    }

    /// Associates `name` with `id`, replacing whatever either was previously associated with.
    pub fn associate(&mut self, name: &str, id: PropId) -> PropResult<()> {
        if !is_application_id(id) {
            return Err(InvalidParameter.into());
        }
        let key = self.key(name);
        if let Some(old_id) = self.by_name.remove(&key) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_name) = self.by_id.remove(&id) {
            let old_key = self.key(&old_name);
            self.by_name.remove(&old_key);
        }
        self.by_name.insert(key, id);
        self.by_id.insert(id, name.to_owned());
        Ok(())
    }

    /// Removes the name of `id`. Returns whether there was one.
    pub fn remove_id(&mut self, id: PropId) -> bool {
        match self.by_id.remove(&id) {
            Some(name) => {
                let key = self.key(&name);
                self.by_name.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (PropId, &str)> {
        self.by_id.iter().map(|(&id, name)| (id, name.as_str()))
    }

    pub fn highest_id(&self) -> Option<PropId> {
        self.by_id.keys().next_back().cloned()
    }

    pub fn has_long_names(&self) -> bool {
        self.by_id.values().any(|n| n.chars().count() > MAX_VERSION0_NAME_LEN)
    }
}

/// Identifier for a new name: the larger of the caller's hint and one past the highest identifier
/// in use. The hint must lie in the application range.
pub fn allocate_id(propid_name_first: PropId, highest: PropId) -> PropResult<PropId> {
    if propid_name_first < PID_FIRST_USABLE || propid_name_first >= PID_MIN_READONLY {
        return Err(InvalidParameter.into());
    }
    let next = propid_name_first.max(highest.saturating_add(1));
    if next >= PID_MIN_READONLY {
        return Err(InvalidParameter.into());
    }
    Ok(next)
}
