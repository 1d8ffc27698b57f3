use crate::error::FormatError;
use crate::protocol::codec::{DecodeResult, Reader, Writer};
use crate::protocol::operation::{
    decode_content, encode_content, read_record, skip_record, Operation,
};
use crate::protocol::record::{Record, RecordRef, RecordType, Value};
use crate::protocol::rid::RecordId;

/// Server-defined mode byte. `0` is the default for every record operation;
/// other values are passed through untouched.
pub const DEFAULT_MODE: u8 = 0;

/// Version sent to skip the optimistic version check.
pub const ANY_VERSION: i32 = -1;

const LOAD_END: u8 = 0;
const LOAD_PRIMARY: u8 = 1;
const LOAD_PREFETCHED: u8 = 2;

/// Load a record, plus any records the fetch plan pulls in.
#[derive(Debug, Clone)]
pub struct RecordLoad {
    pub rid: RecordId,
    pub fetch_plan: String,
    pub ignore_cache: bool,
    pub tombstones: bool,
}

impl RecordLoad {
    pub fn new(rid: RecordId) -> Self {
        Self {
            rid,
            fetch_plan: String::new(),
            ignore_cache: false,
            tombstones: false,
        }
    }
}

impl Operation for RecordLoad {
    /// Primary record first, then prefetched records in arrival order.
    type Output = Vec<RecordRef>;

    const NAME: &'static str = "record-load";
    const OPCODE: u8 = 30;

    fn write(&self, w: &mut Writer) {
        self.rid.encode(w);
        w.write_string(Some(&self.fetch_plan))
            .write_bool(self.ignore_cache)
            .write_bool(self.tombstones);
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Vec<RecordRef>> {
        let mut records = Vec::new();
        loop {
            match r.read_byte()? {
                LOAD_END => return Ok(records),
                LOAD_PRIMARY => {
                    let record_type = RecordType::from_byte(r.read_byte()?)?;
                    let version = r.read_int()?;
                    let content = r.read_bytes()?.unwrap_or_default();

                    let mut record = decode_content(record_type, content)?;
                    record.set_rid(self.rid);
                    record.set_version(version);
                    records.push(RecordRef::new(record));
                }
                LOAD_PREFETCHED => match read_record(r)? {
                    Value::Record(record) => records.push(record),
                    other => {
                        tracing::debug!("Ignoring prefetched entry without a body: {:?}", other)
                    }
                },
                tag => return Err(unexpected_load_tag(tag)),
            }
        }
    }

    fn skip(&self, r: &mut Reader<'_>) -> DecodeResult<()> {
        loop {
            match r.read_byte()? {
                LOAD_END => return Ok(()),
                LOAD_PRIMARY => {
                    RecordType::from_byte(r.read_byte()?)?;
                    r.read_int()?;
                    r.skip_bytes()?;
                }
                LOAD_PREFETCHED => skip_record(r)?,
                tag => return Err(unexpected_load_tag(tag)),
            }
        }
    }
}

fn unexpected_load_tag(tag: u8) -> FormatError {
    FormatError::UnexpectedTag {
        tag,
        context: "record-load payload",
    }
}

/// Fetch the current version of a record without its body.
#[derive(Debug, Clone)]
pub struct RecordMetadata {
    pub rid: RecordId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub rid: RecordId,
    pub version: i32,
}

impl Operation for RecordMetadata {
    type Output = RecordMeta;

    const NAME: &'static str = "record-metadata";
    const OPCODE: u8 = 29;

    fn write(&self, w: &mut Writer) {
        self.rid.encode(w);
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<RecordMeta> {
        let rid = RecordId::decode(r)?;
        let version = r.read_int()?;
        Ok(RecordMeta { rid, version })
    }
}

#[derive(Debug, Clone)]
pub struct RecordCreate {
    pub segment: i32,
    pub cluster: i16,
    pub content: Vec<u8>,
    pub record_type: RecordType,
    pub mode: u8,
}

impl RecordCreate {
    pub fn new(cluster: i16, record: &Record) -> Self {
        Self {
            segment: -1,
            cluster,
            content: encode_content(record),
            record_type: record.record_type(),
            mode: DEFAULT_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub position: i64,
    pub version: i32,
}

impl Operation for RecordCreate {
    type Output = Created;

    const NAME: &'static str = "record-create";
    const OPCODE: u8 = 31;

    fn write(&self, w: &mut Writer) {
        w.write_int(self.segment)
            .write_short(self.cluster)
            .write_bytes(Some(&self.content))
            .write_byte(self.record_type.as_byte())
            .write_byte(self.mode);
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Created> {
        let position = r.read_long()?;
        let version = r.read_int()?;
        Ok(Created { position, version })
    }
}

#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub rid: RecordId,
    pub content: Vec<u8>,
    pub version: i32,
    pub record_type: RecordType,
    pub mode: u8,
}

impl RecordUpdate {
    pub fn new(rid: RecordId, record: &Record) -> Self {
        Self {
            rid,
            content: encode_content(record),
            version: record.version().unwrap_or(ANY_VERSION),
            record_type: record.record_type(),
            mode: DEFAULT_MODE,
        }
    }
}

impl Operation for RecordUpdate {
    /// New record version.
    type Output = i32;

    const NAME: &'static str = "record-update";
    const OPCODE: u8 = 32;

    fn write(&self, w: &mut Writer) {
        self.rid.encode(w);
        w.write_bytes(Some(&self.content))
            .write_int(self.version)
            .write_byte(self.record_type.as_byte())
            .write_byte(self.mode);
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<i32> {
        r.read_int()
    }
}

#[derive(Debug, Clone)]
pub struct RecordDelete {
    pub rid: RecordId,
    pub version: i32,
    pub mode: u8,
}

impl Operation for RecordDelete {
    /// Whether the server removed a record.
    type Output = bool;

    const NAME: &'static str = "record-delete";
    const OPCODE: u8 = 33;

    fn write(&self, w: &mut Writer) {
        self.rid.encode(w);
        w.write_int(self.version).write_byte(self.mode);
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<bool> {
        r.read_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::operation::{decode_complete, encode_request, frame_len};

    fn ok_preamble(w: &mut Writer) {
        w.write_byte(0).write_int(5);
    }

    #[test]
    fn load_request_layout() {
        let mut op = RecordLoad::new(RecordId::new(12, 7));
        op.fetch_plan = "*:1".into();
        op.tombstones = true;

        let bytes = encode_request(&op, 5);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_byte().unwrap(), 30);
        assert_eq!(r.read_int().unwrap(), 5);
        assert_eq!(RecordId::decode(&mut r).unwrap(), RecordId::new(12, 7));
        assert_eq!(r.read_string().unwrap().as_deref(), Some("*:1"));
        assert!(!r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn load_response_assigns_requested_rid_to_primary() {
        let mut w = Writer::new();
        ok_preamble(&mut w);
        w.write_byte(1)
            .write_byte(b'd')
            .write_int(4)
            .write_bytes(Some(b"name:\"x\",friend:#12:8"));
        w.write_byte(2).write_short(0).write_byte(b'd');
        RecordId::new(12, 8).encode(&mut w);
        w.write_int(1).write_bytes(Some(b"name:\"y\""));
        w.write_byte(0);

        let records = decode_complete(&RecordLoad::new(RecordId::new(12, 7)), &w.freeze()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rid(), Some(RecordId::new(12, 7)));
        assert_eq!(records[0].version(), Some(4));
        assert_eq!(records[0].get("friend"), Some(Value::Link(RecordId::new(12, 8))));
        assert_eq!(records[1].rid(), Some(RecordId::new(12, 8)));
    }

    #[test]
    fn prefetched_entries_without_body_are_ignored() {
        let mut w = Writer::new();
        ok_preamble(&mut w);
        w.write_byte(1).write_byte(b'd').write_int(1).write_bytes(Some(b"a:1"));
        w.write_byte(2).write_short(-2);
        w.write_byte(2).write_short(-3);
        RecordId::new(7, 7).encode(&mut w);
        w.write_byte(0);
        let buf = w.freeze();

        let op = RecordLoad::new(RecordId::new(7, 1));
        let records = decode_complete(&op, &buf).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(frame_len(&op, &buf).unwrap(), buf.len());
    }

    #[test]
    fn load_frame_len_skips_record_content() {
        let mut w = Writer::new();
        ok_preamble(&mut w);
        w.write_byte(1).write_byte(b'd').write_int(1).write_bytes(Some(b"not a document"));
        w.write_byte(0);
        let buf = w.freeze();

        let op = RecordLoad::new(RecordId::new(7, 1));
        assert_eq!(frame_len(&op, &buf).unwrap(), buf.len());
        assert!(frame_len(&op, &buf[..buf.len() - 1]).unwrap_err().is_incomplete());
        assert!(decode_complete(&op, &buf).is_err());
    }

    #[test]
    fn create_request_layout() {
        let record = Record::new().with("name", "x");
        let op = RecordCreate::new(12, &record);
        let bytes = encode_request(&op, -1);

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_byte().unwrap(), 31);
        assert_eq!(r.read_int().unwrap(), -1);
        assert_eq!(r.read_int().unwrap(), -1);
        assert_eq!(r.read_short().unwrap(), 12);
        assert_eq!(r.read_bytes().unwrap(), Some(&b"name:\"x\""[..]));
        assert_eq!(r.read_char().unwrap(), 'd');
        assert_eq!(r.read_byte().unwrap(), 0);
    }

    #[test]
    fn update_without_version_skips_check() {
        let op = RecordUpdate::new(RecordId::new(1, 1), &Record::new());
        assert_eq!(op.version, ANY_VERSION);
    }

    #[test]
    fn metadata_and_delete_responses() {
        let mut w = Writer::new();
        ok_preamble(&mut w);
        RecordId::new(3, 9).encode(&mut w);
        w.write_int(11);
        let op = RecordMetadata {
            rid: RecordId::new(3, 9),
        };
        let meta = decode_complete(&op, &w.freeze()).unwrap();
        assert_eq!(meta, RecordMeta { rid: RecordId::new(3, 9), version: 11 });

        let mut w = Writer::new();
        ok_preamble(&mut w);
        w.write_byte(1);
        let op = RecordDelete {
            rid: RecordId::new(3, 9),
            version: ANY_VERSION,
            mode: DEFAULT_MODE,
        };
        assert!(decode_complete(&op, &w.freeze()).unwrap());
    }
}
