use std::ops::{Range, RangeFrom, RangeTo};

use super::error::{PropError, PropResult};

pub trait SafeIndex<Idx: ?Sized> {
    type Output: ?Sized;

    fn get_checked(&self, index: Idx) -> Option<&Self::Output>;
}

impl<T> SafeIndex<usize> for [T] {
    type Output = T;

    fn get_checked(&self, index: usize) -> Option<&Self::Output> {
        self.get(index)
    }
}

impl<T> SafeIndex<RangeTo<usize>> for [T] {
    type Output = [T];

    fn get_checked(&self, index: RangeTo<usize>) -> Option<&Self::Output> {
        if index.end > self.len() {
            None
        } else {
            Some(&self[index])
        }
    }
}

impl<T> SafeIndex<RangeFrom<usize>> for [T] {
    type Output = [T];

    fn get_checked(&self, index: RangeFrom<usize>) -> Option<&Self::Output> {
        if index.start > self.len() {
            None
        } else {
            Some(&self[index])
        }
    }
}

impl<T> SafeIndex<Range<usize>> for [T] {
    type Output = [T];

    fn get_checked(&self, index: Range<usize>) -> Option<&Self::Output> {
        if index.end < index.start || index.end > self.len() {
            None
        } else {
            Some(&self[index])
        }
    }
}

/// Little-endian cursor over a bounded byte slice. Every read past the end of the slice is a
/// corruption error, which is how the section and variant decoders reject bad length prefixes.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($name: ident, $ty: ty) => (
        pub fn $name(&mut self) -> PropResult<$ty> {
            let bytes = self.take(::std::mem::size_of::<$ty>())?;
            let mut raw = [0u8; ::std::mem::size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    );
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> ByteReader<'a> {
        ByteReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> PropResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| PropError::corruption("length overflow"))?;
        let slice = self
            .data
            .get_checked(self.pos..end)
            .ok_or_else(|| PropError::corruption("read past end of record"))?;
        self.pos = end;
        Ok(slice)
    }

    /// Skips to the next multiple of four, relative to the start of the slice.
    pub fn align4(&mut self) -> PropResult<()> {
        let pad = (4 - self.pos % 4) % 4;
        // Trailing padding may be cut short by the section end.
        let pad = pad.min(self.remaining());
        self.take(pad).map(|_| ())
    }

    read_le!(read_u8, u8);
    read_le!(read_i8, i8);
    read_le!(read_u16, u16);
    read_le!(read_i16, i16);
    read_le!(read_u32, u32);
    read_le!(read_i32, i32);
    read_le!(read_u64, u64);
    read_le!(read_i64, i64);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);
}

/// Pads `buf` with zeroes to the next multiple of four.
pub fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}
