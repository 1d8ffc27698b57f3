//! Common test utilities for driver tests
//!
//! Provides shared helpers for:
//! - Building server response frames
//! - A scripted transport that records requests and replays canned responses
//! - Tracing setup

#![allow(dead_code)]

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use orientdb_driver::protocol::{decode_complete, encode_request, Operation, Writer};
use orientdb_driver::{DriverError, DriverResult, RecordId, Transport};

pub const SESSION: i32 = 7;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Frame builders
// ============================================================================

/// Successful status preamble.
pub fn ok(session: i32) -> Writer {
    let mut w = Writer::new();
    w.write_byte(0).write_int(session);
    w
}

pub fn error_frame(session: i32, class: &str, message: &str) -> Bytes {
    let mut w = Writer::new();
    w.write_byte(1)
        .write_int(session)
        .write_byte(1)
        .write_string(Some(class))
        .write_string(Some(message))
        .write_byte(0)
        .write_bytes(None);
    w.freeze()
}

/// Record as sent inside result streams and prefetch lists.
pub fn write_record(w: &mut Writer, rid: RecordId, version: i32, content: &str) {
    w.write_short(0).write_byte(b'd');
    rid.encode(w);
    w.write_int(version).write_bytes(Some(content.as_bytes()));
}

/// record-load response: a primary record and prefetched records.
pub fn load_response(
    session: i32,
    primary: Option<(i32, &str)>,
    prefetched: &[(RecordId, i32, &str)],
) -> Bytes {
    let mut w = ok(session);
    if let Some((version, content)) = primary {
        w.write_byte(1)
            .write_byte(b'd')
            .write_int(version)
            .write_bytes(Some(content.as_bytes()));
    }
    for (rid, version, content) in prefetched {
        w.write_byte(2);
        write_record(&mut w, *rid, *version, content);
    }
    w.write_byte(0);
    w.freeze()
}

pub fn create_response(session: i32, position: i64, version: i32) -> Bytes {
    let mut w = ok(session);
    w.write_long(position).write_int(version);
    w.freeze()
}

pub fn update_response(session: i32, version: i32) -> Bytes {
    let mut w = ok(session);
    w.write_int(version);
    w.freeze()
}

pub fn delete_response(session: i32, deleted: bool) -> Bytes {
    let mut w = ok(session);
    w.write_bool(deleted);
    w.freeze()
}

pub fn meta_response(session: i32, rid: RecordId, version: i32) -> Bytes {
    let mut w = ok(session);
    rid.encode(&mut w);
    w.write_int(version);
    w.freeze()
}

// ============================================================================
// Scripted transport
// ============================================================================

/// Transport that answers each request with the next canned frame, decoded
/// exactly as a connection would decode it.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Bytes>>,
    requests: Mutex<Vec<Bytes>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().clone()
    }

    pub fn request(&self, index: usize) -> Bytes {
        self.requests.lock()[index].clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send<O: Operation>(&self, op: O) -> DriverResult<O::Output> {
        self.requests.lock().push(encode_request(&op, SESSION));
        let frame = self
            .responses
            .lock()
            .pop_front()
            .ok_or(DriverError::Closed)?;
        decode_complete(&op, &frame)
    }
}
