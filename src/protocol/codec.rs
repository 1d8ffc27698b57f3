//! Primitive wire codec.
//!
//! Every scalar on the wire is big-endian. Byte blobs and strings share one
//! framing: a signed 32-bit length followed by the raw bytes, where a length
//! of `-1` encodes null. Running out of input is always reported as
//! [`FormatError::Incomplete`], never confused with a null value.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FormatError;

pub type DecodeResult<T> = Result<T, FormatError>;

/// Cursor over an inbound buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(FormatError::Incomplete {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_byte(&mut self) -> DecodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// Single-byte character, used for mode and record-type flags.
    pub fn read_char(&mut self) -> DecodeResult<char> {
        Ok(self.read_byte()? as char)
    }

    pub fn read_short(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_int(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_long(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Length-prefixed blob; `Ok(None)` is the null marker.
    pub fn read_bytes(&mut self) -> DecodeResult<Option<&'a [u8]>> {
        let len = self.read_int()?;
        match len {
            -1 => Ok(None),
            n if n < 0 => Err(FormatError::InvalidLength(n)),
            n => self.take(n as usize).map(Some),
        }
    }

    /// Step over a length-prefixed blob without copying it.
    pub fn skip_bytes(&mut self) -> DecodeResult<()> {
        self.read_bytes().map(drop)
    }

    pub fn read_string(&mut self) -> DecodeResult<Option<String>> {
        match self.read_bytes()? {
            None => Ok(None),
            Some(raw) => std::str::from_utf8(raw)
                .map(|s| Some(s.to_string()))
                .map_err(|_| FormatError::InvalidUtf8),
        }
    }
}

/// Outbound frame builder. Methods chain so an operation writer reads like
/// the wire layout it produces.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_byte(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_byte(value as u8)
    }

    pub fn write_char(&mut self, value: char) -> &mut Self {
        self.write_byte(value as u8)
    }

    pub fn write_short(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    pub fn write_int(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn write_long(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64(value);
        self
    }

    pub fn write_bytes(&mut self, value: Option<&[u8]>) -> &mut Self {
        match value {
            None => self.write_int(-1),
            Some(raw) => {
                self.buf.put_i32(raw.len() as i32);
                self.buf.put_slice(raw);
                self
            }
        }
    }

    pub fn write_string(&mut self, value: Option<&str>) -> &mut Self {
        self.write_bytes(value.map(str::as_bytes))
    }

    /// Append already-encoded bytes without a length prefix.
    pub fn write_raw(&mut self, raw: &[u8]) -> &mut Self {
        self.buf.put_slice(raw);
        self
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_big_endian() {
        let mut w = Writer::new();
        w.write_short(0x0102).write_int(0x03040506).write_long(-2);
        let bytes = w.freeze();
        assert_eq!(&bytes[..6], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&bytes[6..], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_short().unwrap(), 0x0102);
        assert_eq!(r.read_int().unwrap(), 0x03040506);
        assert_eq!(r.read_long().unwrap(), -2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn null_is_distinct_from_truncation() {
        let mut w = Writer::new();
        w.write_string(None);
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(Reader::new(&bytes).read_string().unwrap(), None);

        // length says 5, only 2 bytes follow
        let truncated = [0, 0, 0, 5, b'h', b'i'];
        let err = Reader::new(&truncated).read_string().unwrap_err();
        assert!(err.is_incomplete());
        assert_eq!(
            err,
            FormatError::Incomplete {
                offset: 4,
                needed: 5,
                available: 2
            }
        );
    }

    #[test]
    fn negative_lengths_other_than_null_are_rejected() {
        let raw = (-7i32).to_be_bytes();
        assert_eq!(
            Reader::new(&raw).read_bytes().unwrap_err(),
            FormatError::InvalidLength(-7)
        );
    }

    #[test]
    fn offset_advances_per_read() {
        let mut w = Writer::new();
        w.write_char('s').write_bool(true).write_string(Some("héllo"));
        let bytes = w.freeze();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_char().unwrap(), 's');
        assert_eq!(r.offset(), 1);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_string().unwrap().as_deref(), Some("héllo"));
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn invalid_utf8_is_a_format_error() {
        let raw = [0, 0, 0, 2, 0xc3, 0x28];
        assert_eq!(
            Reader::new(&raw).read_string().unwrap_err(),
            FormatError::InvalidUtf8
        );
    }

    #[test]
    fn empty_reader_reports_incomplete() {
        assert!(Reader::new(&[]).read_byte().unwrap_err().is_incomplete());
        assert!(Reader::new(&[0, 1, 2]).read_int().unwrap_err().is_incomplete());
    }
}
