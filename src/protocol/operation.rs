//! Request/response framing shared by every operation.
//!
//! Request: `[opcode: byte][session id: int][operation fields...]`
//!
//! Response: `[status: byte][session id: int]` followed by the operation's
//! own layout when the status is `0`, or by an error frame otherwise:
//! `([1: byte][class: string][message: string])* [0: byte][serialized: bytes]`.

use bytes::Bytes;

use super::codec::{DecodeResult, Reader, Writer};
use super::record::{Record, RecordRef, RecordType, Value};
use super::rid::RecordId;
use super::serializer;
use crate::error::{DriverError, DriverResult, FormatError, RequestError};

pub const STATUS_OK: u8 = 0;

/// A protocol request/response pair.
///
/// `write` appends the operation-specific request fields after the opcode
/// and session id. `read` consumes the response body after a successful
/// status preamble. Both halves are pure; the connection owns the socket.
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    const NAME: &'static str;
    const OPCODE: u8;

    fn write(&self, w: &mut Writer);

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Self::Output>;

    /// Step over the response body consuming exactly what `read` would,
    /// without building the output. Operations whose bodies carry record
    /// content override this to skip the content unparsed.
    fn skip(&self, r: &mut Reader<'_>) -> DecodeResult<()> {
        self.read(r).map(drop)
    }
}

pub fn encode_request<O: Operation>(op: &O, session_id: i32) -> Bytes {
    let mut w = Writer::with_capacity(64);
    w.write_byte(O::OPCODE).write_int(session_id);
    op.write(&mut w);
    w.freeze()
}

/// One decoded response frame.
#[derive(Debug)]
pub struct Decoded<T> {
    /// `Err` when the server answered with a nonzero status.
    pub result: Result<T, RequestError>,
    pub session_id: i32,
    /// Bytes consumed from the input buffer.
    pub consumed: usize,
}

/// Decode one response frame from the start of `buf`.
///
/// `Err(FormatError::Incomplete)` means `buf` does not yet hold the whole
/// frame; any other error means the stream is corrupt.
pub fn decode_response<O: Operation>(op: &O, buf: &[u8]) -> DecodeResult<Decoded<O::Output>> {
    let mut r = Reader::new(buf);
    let status = r.read_byte()?;
    let session_id = r.read_int()?;

    let result = if status == STATUS_OK {
        Ok(op.read(&mut r)?)
    } else {
        Err(read_error_frame(&mut r)?)
    };

    Ok(Decoded {
        result,
        session_id,
        consumed: r.offset(),
    })
}

/// Length of the response frame at the start of `buf`, found without
/// decoding record content.
///
/// `Err(FormatError::Incomplete)` reports the smallest buffer length that
/// could hold the frame, so callers can wait for at least that many bytes.
pub fn frame_len<O: Operation>(op: &O, buf: &[u8]) -> DecodeResult<usize> {
    let mut r = Reader::new(buf);
    let status = r.read_byte()?;
    r.read_int()?;
    if status == STATUS_OK {
        op.skip(&mut r)?;
    } else {
        read_error_frame(&mut r)?;
    }
    Ok(r.offset())
}

/// Decode a buffer that must contain exactly one complete frame.
pub fn decode_complete<O: Operation>(op: &O, buf: &[u8]) -> DriverResult<O::Output> {
    let decoded = decode_response(op, buf)?;
    if decoded.consumed != buf.len() {
        return Err(DriverError::Connection(format!(
            "{} left {} trailing bytes",
            O::NAME,
            buf.len() - decoded.consumed
        )));
    }
    decoded.result.map_err(DriverError::from)
}

fn read_error_frame(r: &mut Reader<'_>) -> DecodeResult<RequestError> {
    let mut entries = Vec::new();
    while r.read_byte()? != 0 {
        let class = r.read_string()?.unwrap_or_default();
        let message = r.read_string()?.unwrap_or_default();
        entries.push((class, message));
    }
    // serialized exception, unused by this driver
    r.read_bytes()?;

    let mut entries = entries.into_iter();
    let (class, message) = entries.next().unwrap_or_default();
    Ok(RequestError::Server {
        class,
        message,
        chain: entries.collect(),
    })
}

pub const CLASS_ID_NULL: i16 = -2;
pub const CLASS_ID_RID: i16 = -3;

/// Record sub-reader shared by record loads and result streams.
///
/// Yields [`Value::Null`], a bare [`Value::Link`], or a decoded record.
pub fn read_record(r: &mut Reader<'_>) -> DecodeResult<Value> {
    match r.read_short()? {
        CLASS_ID_NULL => Ok(Value::Null),
        CLASS_ID_RID => Ok(Value::Link(RecordId::decode(r)?)),
        _ => {
            let record_type = RecordType::from_byte(r.read_byte()?)?;
            let rid = RecordId::decode(r)?;
            let version = r.read_int()?;
            let content = r.read_bytes()?.unwrap_or_default();

            let mut record = decode_content(record_type, content)?;
            record.set_rid(rid);
            record.set_version(version);
            Ok(Value::Record(RecordRef::new(record)))
        }
    }
}

/// [`read_record`] without decoding the record content.
pub fn skip_record(r: &mut Reader<'_>) -> DecodeResult<()> {
    match r.read_short()? {
        CLASS_ID_NULL => Ok(()),
        CLASS_ID_RID => RecordId::decode(r).map(drop),
        _ => {
            RecordType::from_byte(r.read_byte()?)?;
            RecordId::decode(r)?;
            r.read_int()?;
            r.skip_bytes()
        }
    }
}

/// Build a record from its serialized content. Flat and raw byte records
/// expose their payload as the `value` field.
pub fn decode_content(record_type: RecordType, content: &[u8]) -> DecodeResult<Record> {
    let mut record = match record_type {
        RecordType::Document => {
            let text = std::str::from_utf8(content).map_err(|_| FormatError::InvalidUtf8)?;
            serializer::deserialize_record(text)?
        }
        RecordType::Flat => {
            let text = std::str::from_utf8(content).map_err(|_| FormatError::InvalidUtf8)?;
            Record::new().with("value", text)
        }
        RecordType::Bytes => Record::new().with("value", Value::Binary(content.to_vec())),
    };
    record.set_record_type(record_type);
    Ok(record)
}

/// Inverse of [`decode_content`].
pub fn encode_content(record: &Record) -> Vec<u8> {
    match (record.record_type(), record.get("value")) {
        (RecordType::Bytes, Some(Value::Binary(raw))) => raw.clone(),
        (RecordType::Flat, Some(Value::String(text))) => text.clone().into_bytes(),
        _ => serializer::serialize_record(record).into_bytes(),
    }
}
