//! Wire protocol: primitives, records, framing and result decoding.

pub mod codec;
pub mod context;
pub mod operation;
pub mod operations;
pub mod record;
pub mod resolver;
pub mod result_stream;
pub mod rid;
pub mod serializer;

pub use codec::{DecodeResult, Reader, Writer};
pub use operation::{
    decode_complete, decode_response, encode_request, frame_len, Decoded, Operation,
};
pub use record::{Record, RecordRef, RecordType, Value};
pub use resolver::{resolve_references, Resolver};
pub use result_stream::{Payload, PayloadTag, ResultStream};
pub use rid::RecordId;
