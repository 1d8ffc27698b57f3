//! Heterogeneous result streams returned by command execution.
//!
//! After the status preamble the server sends a sequence of payloads, each
//! introduced by a one-byte tag, until an end tag:
//!
//! | tag        | payload                                     |
//! |------------|---------------------------------------------|
//! | `0`        | end of stream                               |
//! | `110` `n`  | null                                        |
//! | `1`, `114` | record                                      |
//! | `2`        | prefetched record (for reference resolution)|
//! | `97` `a`   | serialized scalar, as a string              |
//! | `108` `l`  | `int` count followed by that many records   |
//!
//! Any other tag is handed to the stream's fallback reader, which consumes
//! the rest of the response. Decoding is iterative: nested collections are
//! tracked on a [`ContextStack`], so stream length never grows the call stack.

use super::codec::{DecodeResult, Reader};
use super::context::ContextStack;
use super::operation::{read_record, skip_record};
use super::record::Value;
use super::serializer;
use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadTag {
    End,
    Null,
    Record,
    Prefetched,
    Serialized,
    Collection,
    Other(u8),
}

impl From<u8> for PayloadTag {
    fn from(byte: u8) -> Self {
        match byte {
            0 => PayloadTag::End,
            110 => PayloadTag::Null,
            1 | 114 => PayloadTag::Record,
            2 => PayloadTag::Prefetched,
            97 => PayloadTag::Serialized,
            108 => PayloadTag::Collection,
            other => PayloadTag::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Record(Value),
    Prefetched(Value),
    Serialized(String),
    Collection(Vec<Value>),
}

impl Payload {
    pub fn is_prefetched(&self) -> bool {
        matches!(self, Payload::Prefetched(_))
    }

    /// Collapse into a plain value. Serialized scalars are parsed.
    pub fn into_value(self) -> DecodeResult<Value> {
        match self {
            Payload::Null => Ok(Value::Null),
            Payload::Record(value) | Payload::Prefetched(value) => Ok(value),
            Payload::Serialized(text) => serializer::deserialize_value(&text),
            Payload::Collection(items) => Ok(Value::List(items)),
        }
    }
}

/// Reader invoked for a terminating tag. Receives the tag byte, the
/// reader positioned after it, and the payloads decoded so far.
pub type TerminalReader = fn(u8, &mut Reader<'_>, &mut Vec<Payload>) -> DecodeResult<()>;

#[derive(Debug, Clone, Copy)]
enum Content {
    Decode,
    Skip,
}

impl Content {
    fn record(self, r: &mut Reader<'_>) -> DecodeResult<Value> {
        match self {
            Content::Decode => read_record(r),
            Content::Skip => skip_record(r).map(|_| Value::Null),
        }
    }
}

#[derive(Debug)]
enum Frame {
    /// Top level: decoded payloads go to the stream.
    Stream,
    Collection { remaining: usize, items: Vec<Value> },
}

/// Configurable result-stream decoder.
#[derive(Clone, Copy, Default)]
pub struct ResultStream {
    on_end: Option<TerminalReader>,
    fallback: Option<TerminalReader>,
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("on_end", &self.on_end.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ResultStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader to run when the end tag is seen.
    pub fn on_end(mut self, reader: TerminalReader) -> Self {
        self.on_end = Some(reader);
        self
    }

    /// Reader for tags outside the table. Without one, an unknown tag is a
    /// format error.
    pub fn fallback(mut self, reader: TerminalReader) -> Self {
        self.fallback = Some(reader);
        self
    }

    pub fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Vec<Payload>> {
        self.walk(r, Content::Decode)
    }

    /// Consume a whole stream without decoding record content. Records come
    /// back as nulls; only the framing is checked.
    pub fn skip(&self, r: &mut Reader<'_>) -> DecodeResult<()> {
        self.walk(r, Content::Skip).map(drop)
    }

    fn walk(&self, r: &mut Reader<'_>, content: Content) -> DecodeResult<Vec<Payload>> {
        let mut payloads = Vec::new();
        let mut stack = ContextStack::new(Frame::Stream);

        loop {
            if let Frame::Collection { remaining, items } = stack.current_mut() {
                if *remaining > 0 {
                    items.push(content.record(r)?);
                    *remaining -= 1;
                    continue;
                }
                if let Some(Frame::Collection { items, .. }) = stack.pop() {
                    payloads.push(Payload::Collection(items));
                }
                continue;
            }

            let byte = r.read_byte()?;
            match PayloadTag::from(byte) {
                PayloadTag::End => {
                    if let Some(on_end) = self.on_end {
                        on_end(byte, r, &mut payloads)?;
                    }
                    break;
                }
                PayloadTag::Null => payloads.push(Payload::Null),
                PayloadTag::Record => payloads.push(Payload::Record(content.record(r)?)),
                PayloadTag::Prefetched => {
                    payloads.push(Payload::Prefetched(content.record(r)?))
                }
                PayloadTag::Serialized => {
                    let text = r.read_string()?.unwrap_or_default();
                    payloads.push(Payload::Serialized(text));
                }
                PayloadTag::Collection => {
                    let count = r.read_int()?;
                    let remaining =
                        usize::try_from(count).map_err(|_| FormatError::InvalidLength(count))?;
                    stack.push(Frame::Collection {
                        remaining,
                        items: Vec::with_capacity(remaining.min(1024)),
                    });
                }
                PayloadTag::Other(tag) => match self.fallback {
                    Some(fallback) => {
                        fallback(tag, r, &mut payloads)?;
                        break;
                    }
                    None => {
                        return Err(FormatError::UnexpectedTag {
                            tag,
                            context: "result payload",
                        })
                    }
                },
            }
        }

        stack.into_root();
        Ok(payloads)
    }
}
