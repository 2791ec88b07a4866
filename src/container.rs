//! The storage container a property set is kept in.
//!
//! Property sets only need a flat namespace of byte streams from their container, so [`Storage`]
//! and [`Stream`] cover just that much of a compound file. [`MemoryStorage`] implements both in
//! memory.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::BitOr;
use std::rc::Rc;

use tracing::trace;

use super::error::PropErrorEnum::*;
use super::error::PropResult;

/// Access and creation flags, with the values of the STGM constants.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub struct Mode(pub u32);

pub const STGM_READ: Mode = Mode(0x0000_0000);
pub const STGM_WRITE: Mode = Mode(0x0000_0001);
pub const STGM_READWRITE: Mode = Mode(0x0000_0002);
pub const STGM_SHARE_EXCLUSIVE: Mode = Mode(0x0000_0010);
pub const STGM_CREATE: Mode = Mode(0x0000_1000);
pub const STGM_TRANSACTED: Mode = Mode(0x0001_0000);

impl Mode {
    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn can_write(self) -> bool {
        self.contains(STGM_WRITE) || self.contains(STGM_READWRITE)
    }

    pub fn is_create(self) -> bool {
        self.contains(STGM_CREATE)
    }

    pub fn is_transacted(self) -> bool {
        self.contains(STGM_TRANSACTED)
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

/// Flags passed through to a stream commit, with the values of the STGC constants.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub struct CommitFlags(pub u32);

pub const STGC_DEFAULT: CommitFlags = CommitFlags(0);
pub const STGC_OVERWRITE: CommitFlags = CommitFlags(1);
pub const STGC_ONLYIFCURRENT: CommitFlags = CommitFlags(2);

pub trait Stream {
    /// Reads up to `buf.len()` bytes at `offset`, returning how many were read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> PropResult<usize>;

    /// Writes `data` at `offset`, growing the stream as needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> PropResult<()>;

    fn set_size(&mut self, size: u64) -> PropResult<()>;

    fn size(&self) -> PropResult<u64>;

    /// Makes written data durable. A no-op for streams opened in direct mode.
    fn commit(&mut self, flags: CommitFlags) -> PropResult<()>;

    /// Discards writes since the last commit. A no-op for streams opened in direct mode.
    fn revert(&mut self) -> PropResult<()>;

    fn read_all(&self) -> PropResult<Vec<u8>> {
        let size = self.size()? as usize;
        let mut data = vec![0u8; size];
        let read = self.read_at(0, &mut data)?;
        data.truncate(read);
        Ok(data)
    }

    /// Replaces the entire contents of the stream.
    fn write_all(&mut self, data: &[u8]) -> PropResult<()> {
        self.set_size(0)?;
        self.write_at(0, data)
    }
}

pub trait Storage {
    /// Opens an existing stream, or fails with `NotFound`.
    fn open_stream(&self, name: &str, mode: Mode) -> PropResult<Box<dyn Stream>>;

    /// Creates a stream. An existing stream is truncated when `mode` has `STGM_CREATE`, and is an
    /// `AlreadyExists` error otherwise.
    fn create_stream(&self, name: &str, mode: Mode) -> PropResult<Box<dyn Stream>>;

    fn delete_stream(&self, name: &str) -> PropResult<()>;

    fn stream_names(&self) -> PropResult<Vec<String>>;
}

type SharedData = Rc<RefCell<Vec<u8>>>;

/// An in-memory container. Clones share the same streams, and stream names compare
/// case-insensitively as they do in compound files.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    streams: Rc<RefCell<BTreeMap<String, (String, SharedData)>>>,
}

fn fold(name: &str) -> String {
    name.to_uppercase()
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    /// Adds a stream with the given contents, replacing any stream of the same name.
    pub fn insert_stream(&self, name: &str, data: Vec<u8>) {
        self.streams
            .borrow_mut()
            .insert(fold(name), (name.to_owned(), Rc::new(RefCell::new(data))));
    }

    /// The committed contents of a stream.
    pub fn stream_data(&self, name: &str) -> Option<Vec<u8>> {
        self.streams
            .borrow()
            .get(&fold(name))
            .map(|&(_, ref data)| data.borrow().clone())
    }
}

impl Storage for MemoryStorage {
    fn open_stream(&self, name: &str, mode: Mode) -> PropResult<Box<dyn Stream>> {
        let streams = self.streams.borrow();
        let &(_, ref data) = streams.get(&fold(name)).ok_or(NotFound)?;
        trace!(name, mode = mode.0, "opening memory stream");
        Ok(Box::new(MemoryStream::new(data.clone(), mode)))
    }

    fn create_stream(&self, name: &str, mode: Mode) -> PropResult<Box<dyn Stream>> {
        let mut streams = self.streams.borrow_mut();
        let key = fold(name);
        if streams.contains_key(&key) && !mode.is_create() {
            return Err(AlreadyExists.into());
        }
        let data = Rc::new(RefCell::new(Vec::new()));
        streams.insert(key, (name.to_owned(), data.clone()));
        trace!(name, mode = mode.0, "created memory stream");
        Ok(Box::new(MemoryStream::new(data, mode)))
    }

    fn delete_stream(&self, name: &str) -> PropResult<()> {
        match self.streams.borrow_mut().remove(&fold(name)) {
            Some(_) => Ok(()),
            None => Err(NotFound.into()),
        }
    }

    fn stream_names(&self) -> PropResult<Vec<String>> {
        Ok(self.streams.borrow().values().map(|&(ref name, _)| name.clone()).collect())
    }
}

/// A stream of a [`MemoryStorage`]. Direct mode writes go straight to the shared contents; in
/// transacted mode they go to a private copy until commit.
pub struct MemoryStream {
    data: SharedData,
    pending: Option<Vec<u8>>,
    writable: bool,
}

impl MemoryStream {
    fn new(data: SharedData, mode: Mode) -> MemoryStream {
        let pending = if mode.is_transacted() {
            Some(data.borrow().clone())
        } else {
            None
        };
        MemoryStream {
            data,
            pending,
            writable: mode.can_write(),
        }
    }

    fn with_contents<T, F: FnOnce(&Vec<u8>) -> T>(&self, f: F) -> T {
        match self.pending {
            Some(ref pending) => f(pending),
            None => f(&self.data.borrow()),
        }
    }

    fn with_contents_mut<T, F: FnOnce(&mut Vec<u8>) -> T>(&mut self, f: F) -> PropResult<T> {
        if !self.writable {
            return Err(AccessDenied.into());
        }
        Ok(match self.pending {
            Some(ref mut pending) => f(pending),
            None => f(&mut self.data.borrow_mut()),
        })
    }
}

impl Stream for MemoryStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> PropResult<usize> {
        Ok(self.with_contents(|contents| {
            let start = (offset as usize).min(contents.len());
            let end = start.saturating_add(buf.len()).min(contents.len());
            buf[..end - start].copy_from_slice(&contents[start..end]);
            end - start
        }))
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> PropResult<()> {
        self.with_contents_mut(|contents| {
            let start = offset as usize;
            let end = start + data.len();
            if contents.len() < end {
                contents.resize(end, 0);
            }
            contents[start..end].copy_from_slice(data);
        })
    }

    fn set_size(&mut self, size: u64) -> PropResult<()> {
        self.with_contents_mut(|contents| contents.resize(size as usize, 0))
    }

    fn size(&self) -> PropResult<u64> {
        Ok(self.with_contents(|contents| contents.len() as u64))
    }

    fn commit(&mut self, _flags: CommitFlags) -> PropResult<()> {
        if let Some(ref pending) = self.pending {
            *self.data.borrow_mut() = pending.clone();
        }
        Ok(())
    }

    fn revert(&mut self) -> PropResult<()> {
        if let Some(ref mut pending) = self.pending {
            *pending = self.data.borrow().clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_mode_writes_through() {
        let storage = MemoryStorage::new();
        let mut stream = storage.create_stream("a", STGM_READWRITE | STGM_CREATE).unwrap();
        stream.write_at(2, b"xy").unwrap();
        assert_eq!(storage.stream_data("a"), Some(vec![0, 0, b'x', b'y']));
        stream.revert().unwrap();
        assert_eq!(stream.read_all().unwrap(), vec![0, 0, b'x', b'y']);
    }

    #[test]
    fn test_transacted_mode() {
        let storage = MemoryStorage::new();
        storage.insert_stream("a", b"old".to_vec());
        let mut stream = storage.open_stream("A", STGM_READWRITE | STGM_TRANSACTED).unwrap();
        stream.write_all(b"new!").unwrap();
        assert_eq!(storage.stream_data("a"), Some(b"old".to_vec()));
        stream.revert().unwrap();
        assert_eq!(stream.read_all().unwrap(), b"old".to_vec());
        stream.write_all(b"new!").unwrap();
        stream.commit(STGC_DEFAULT).unwrap();
        assert_eq!(storage.stream_data("a"), Some(b"new!".to_vec()));
    }

    #[test]
    fn test_read_only_stream() {
        let storage = MemoryStorage::new();
        storage.insert_stream("a", b"abc".to_vec());
        let mut stream = storage.open_stream("a", STGM_READ).unwrap();
        assert_eq!(stream.write_at(0, b"z"), Err(AccessDenied.into()));
        let mut buf = [0u8; 8];
        assert_eq!(stream.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_create_and_delete() {
        let storage = MemoryStorage::new();
        storage.create_stream("a", STGM_READWRITE).unwrap();
        assert!(storage.create_stream("A", STGM_READWRITE).is_err());
        assert!(storage.create_stream("A", STGM_READWRITE | STGM_CREATE).is_ok());
        assert_eq!(storage.stream_names().unwrap(), vec!["A".to_owned()]);
        assert!(storage.open_stream("missing", STGM_READ).is_err());
        storage.delete_stream("a").unwrap();
        assert_eq!(storage.delete_stream("a"), Err(NotFound.into()));
    }
}
