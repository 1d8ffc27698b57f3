//! Persistent socket with pipelined writes and FIFO response matching.
//!
//! Two background tasks share the stream. The writer sends requests in
//! submission order without waiting for earlier responses, and hands each
//! one to the reader before its bytes go out. The reader decodes responses
//! strictly in that order, since the protocol carries no request
//! correlation. Reading never waits on writing, so a large response can
//! drain while a large request is still being written.
//!
//! A response is decoded only once its whole frame is buffered; until then
//! the reader only walks the framing. A decode failure other than "need
//! more bytes" loses byte alignment, so it fails every in-flight request and
//! closes the connection.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use super::config::ClientConfig;
use crate::error::{DriverError, DriverResult, FormatError};
use crate::protocol::operation::{decode_response, encode_request, frame_len, Operation};

const READ_CHUNK: usize = 8 * 1024;

/// Handle to a connection's I/O tasks. Cloning shares the same socket.
#[derive(Debug, Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<Submission>,
    session_id: i32,
    protocol_version: Option<i16>,
}

impl Connection {
    /// Open a TCP connection described by `config`.
    pub async fn connect(config: &ClientConfig) -> DriverResult<Self> {
        let addr = config.address();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| DriverError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

        stream
            .set_nodelay(config.nodelay)
            .map_err(|e| DriverError::Connection(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let protocol_version = if config.read_greeting {
            let version = stream.read_i16().await.map_err(|e| {
                DriverError::Connection(format!("Failed to read protocol version: {}", e))
            })?;
            Some(version)
        } else {
            None
        };

        tracing::info!(
            "Connected to {} (protocol version {:?}, session {})",
            addr,
            protocol_version,
            config.session_id
        );

        Ok(Self::spawn(
            stream,
            config.session_id,
            config.max_frame_size,
            protocol_version,
        ))
    }

    /// Run the protocol over an already established stream.
    pub fn from_stream<S>(stream: S, session_id: i32) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn(
            stream,
            session_id,
            ClientConfig::default().max_frame_size,
            None,
        )
    }

    fn spawn<S>(
        stream: S,
        session_id: i32,
        max_frame_size: usize,
        protocol_version: Option<i16>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (inflight_tx, inflight_rx) = mpsc::unbounded_channel();
        let (reader, writer) = tokio::io::split(stream);

        let write_task = WriteTask {
            rx,
            inflight: inflight_tx,
        };
        let read_task = ReadTask {
            rx: inflight_rx,
            inflight: VecDeque::new(),
            buf: BytesMut::with_capacity(READ_CHUNK),
            session_id,
            max_frame_size,
        };
        tokio::spawn(write_task.run(writer));
        tokio::spawn(read_task.run(reader));

        Self {
            tx,
            session_id,
            protocol_version,
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Version announced by the server on connect, when the greeting was read.
    pub fn protocol_version(&self) -> Option<i16> {
        self.protocol_version
    }

    /// True once the connection has shut down. Every later send fails.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue an operation. The returned handle reports when the request
    /// bytes were handed to the socket and when the response was decoded.
    pub fn send<O: Operation>(&self, op: O) -> DriverResult<Pending<O::Output>> {
        let frame = encode_request(&op, self.session_id);
        let (submitted_tx, submitted_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();

        tracing::trace!("Queueing {} ({} bytes)", O::NAME, frame.len());
        self.tx
            .send(Submission {
                frame,
                submitted: submitted_tx,
                pending: Box::new(PendingOp {
                    op,
                    tx: Some(response_tx),
                    wanted: 0,
                }),
            })
            .map_err(|_| DriverError::Closed)?;

        Ok(Pending {
            submitted: Some(submitted_rx),
            response: response_rx,
        })
    }

    /// Send and wait for the decoded response.
    pub async fn call<O: Operation>(&self, op: O) -> DriverResult<O::Output> {
        self.send(op)?.response().await
    }
}

/// In-flight request.
///
/// Dropping it does not cancel anything: the response is still read off
/// the socket and then discarded.
#[derive(Debug)]
pub struct Pending<T> {
    submitted: Option<oneshot::Receiver<()>>,
    response: oneshot::Receiver<DriverResult<T>>,
}

impl<T> Pending<T> {
    /// Resolves once the request bytes were written and flushed. This is
    /// not a server acknowledgement.
    pub async fn submitted(&mut self) -> DriverResult<()> {
        match self.submitted.as_mut() {
            Some(rx) => {
                rx.await.map_err(|_| DriverError::Closed)?;
                self.submitted = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn response(self) -> DriverResult<T> {
        self.response.await.map_err(|_| DriverError::Closed)?
    }
}

struct Submission {
    frame: Bytes,
    submitted: oneshot::Sender<()>,
    pending: Box<dyn PendingResponse>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("operation", &self.pending.name())
            .field("len", &self.frame.len())
            .finish()
    }
}

/// Type-erased response decoder for one queued operation.
trait PendingResponse: Send {
    fn name(&self) -> &'static str;

    /// Try to decode this response from the front of `buf`. `Ok(None)` means
    /// more bytes are needed. On success returns the consumed length and
    /// the session id from the preamble.
    fn try_complete(&mut self, buf: &[u8]) -> Result<Option<(usize, i32)>, FormatError>;

    fn fail(self: Box<Self>, err: DriverError);
}

struct PendingOp<O: Operation> {
    op: O,
    tx: Option<oneshot::Sender<DriverResult<O::Output>>>,
    /// Buffer length below which the frame cannot be complete.
    wanted: usize,
}

impl<O: Operation> PendingResponse for PendingOp<O> {
    fn name(&self) -> &'static str {
        O::NAME
    }

    fn try_complete(&mut self, buf: &[u8]) -> Result<Option<(usize, i32)>, FormatError> {
        if buf.len() < self.wanted {
            return Ok(None);
        }
        let len = match frame_len(&self.op, buf) {
            Ok(len) => len,
            Err(FormatError::Incomplete { offset, needed, .. }) => {
                self.wanted = offset + needed;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // The frame is whole, so running out of bytes here is corruption.
        let decoded = decode_response(&self.op, &buf[..len])?;
        let result = decoded.result.map_err(DriverError::from);
        if let Err(e) = &result {
            tracing::debug!("{} failed on the server: {}", O::NAME, e);
        }
        if let Some(tx) = self.tx.take() {
            if tx.send(result).is_err() {
                tracing::trace!("Discarding {} response, caller went away", O::NAME);
            }
        }
        Ok(Some((len, decoded.session_id)))
    }

    fn fail(mut self: Box<Self>, err: DriverError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// Message from the writer to the reader.
enum Inflight {
    /// A request is about to be written; its response comes next in line.
    Expect(Box<dyn PendingResponse>),
    /// Writing failed. Nothing queued after this will reach the server.
    Abort(DriverError),
}

impl Inflight {
    fn fail(self, err: DriverError) {
        if let Inflight::Expect(pending) = self {
            pending.fail(err);
        }
    }
}

struct WriteTask {
    rx: mpsc::UnboundedReceiver<Submission>,
    inflight: mpsc::UnboundedSender<Inflight>,
}

impl WriteTask {
    async fn run<W>(mut self, mut writer: WriteHalf<W>)
    where
        W: AsyncWrite,
    {
        loop {
            let submission = tokio::select! {
                submission = self.rx.recv() => submission,
                _ = self.inflight.closed() => break,
            };
            let Some(submission) = submission else {
                tracing::debug!("All connection handles dropped, no more requests");
                return;
            };
            if let Err(e) = self.submit(&mut writer, submission).await {
                let _ = self.inflight.send(Inflight::Abort(e));
                break;
            }
        }

        // The reader has stopped, or will once it sees the abort.
        self.rx.close();
        while let Ok(submission) = self.rx.try_recv() {
            submission.pending.fail(DriverError::Closed);
        }
    }

    async fn submit<W>(
        &mut self,
        writer: &mut WriteHalf<W>,
        submission: Submission,
    ) -> DriverResult<()>
    where
        W: AsyncWrite,
    {
        let Submission {
            frame,
            submitted,
            pending,
        } = submission;
        let name = pending.name();

        // Queued with the reader first, so it expects the response by the
        // time any of it can arrive.
        if let Err(mpsc::error::SendError(rejected)) = self.inflight.send(Inflight::Expect(pending))
        {
            rejected.fail(DriverError::Closed);
            return Err(DriverError::Closed);
        }

        let written = tokio::select! {
            written = write_frame(writer, &frame) => written,
            _ = self.inflight.closed() => return Err(DriverError::Closed),
        };
        if let Err(e) = written {
            tracing::warn!("Write of {} failed: {}", name, e);
            return Err(DriverError::Connection(format!("Write failed: {}", e)));
        }

        let _ = submitted.send(());
        Ok(())
    }
}

async fn write_frame<W>(writer: &mut WriteHalf<W>, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

struct ReadTask {
    rx: mpsc::UnboundedReceiver<Inflight>,
    inflight: VecDeque<Box<dyn PendingResponse>>,
    buf: BytesMut,
    session_id: i32,
    max_frame_size: usize,
}

impl ReadTask {
    async fn run<R>(mut self, mut reader: ReadHalf<R>)
    where
        R: AsyncRead,
    {
        let mut accepting = true;

        let err = loop {
            if !accepting && self.inflight.is_empty() {
                tracing::debug!("All connection handles dropped, closing socket");
                return;
            }

            tokio::select! {
                // Requests are registered before their bytes are written, so
                // taking queued ones first keeps every response expected.
                biased;

                message = self.rx.recv(), if accepting => {
                    match message {
                        Some(Inflight::Expect(pending)) => self.inflight.push_back(pending),
                        Some(Inflight::Abort(e)) => break e,
                        None => accepting = false,
                    }
                }

                read = read_more(&mut reader, &mut self.buf) => {
                    match read {
                        Ok(0) => {
                            tracing::debug!("Server closed the connection");
                            break DriverError::Closed;
                        }
                        Ok(_) => {
                            if let Err(e) = self.drain() {
                                break e;
                            }
                        }
                        Err(e) => break DriverError::Io(e),
                    }
                }
            }
        };

        self.shutdown(err);
    }

    /// Complete as many queued responses as the buffer holds.
    fn drain(&mut self) -> DriverResult<()> {
        while !self.buf.is_empty() {
            let Some(front) = self.inflight.front_mut() else {
                return Err(DriverError::Connection(format!(
                    "Received {} unexpected bytes with no request in flight",
                    self.buf.len()
                )));
            };

            match front.try_complete(&self.buf) {
                Ok(Some((consumed, session_id))) => {
                    if session_id != self.session_id {
                        tracing::warn!(
                            "{} answered for session {}, expected {}",
                            front.name(),
                            session_id,
                            self.session_id
                        );
                    }
                    self.buf.advance(consumed);
                    self.inflight.pop_front();
                }
                Ok(None) => {
                    if self.buf.len() > self.max_frame_size {
                        return Err(FormatError::FrameTooLarge(self.buf.len()).into());
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Failed to decode {} response: {}", front.name(), e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn shutdown(mut self, err: DriverError) {
        if !self.inflight.is_empty() {
            tracing::warn!(
                "Connection lost with {} requests in flight: {}",
                self.inflight.len(),
                err
            );
        }
        for pending in self.inflight.drain(..) {
            pending.fail(err.clone());
        }

        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            message.fail(err.clone());
        }
    }
}

async fn read_more<R>(reader: &mut ReadHalf<R>, buf: &mut BytesMut) -> std::io::Result<usize>
where
    R: AsyncRead,
{
    buf.reserve(READ_CHUNK);
    reader.read_buf(buf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::protocol::codec::{DecodeResult, Reader, Writer};
    use crate::protocol::operations::{Command, RecordDelete};
    use crate::protocol::rid::RecordId;
    use tokio::io::duplex;

    /// Reads a counted list of ints and records how often it fully decodes.
    struct IntList {
        decodes: Arc<AtomicUsize>,
    }

    impl Operation for IntList {
        type Output = Vec<i32>;
        const NAME: &'static str = "int-list";
        const OPCODE: u8 = 99;

        fn write(&self, _w: &mut Writer) {}

        fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Vec<i32>> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            let count = r.read_int()?.max(0);
            (0..count).map(|_| r.read_int()).collect()
        }

        fn skip(&self, r: &mut Reader<'_>) -> DecodeResult<()> {
            let count = r.read_int()?.max(0);
            for _ in 0..count {
                r.read_int()?;
            }
            Ok(())
        }
    }

    fn delete(pos: i64) -> RecordDelete {
        RecordDelete {
            rid: RecordId::new(9, pos),
            version: -1,
            mode: 0,
        }
    }

    fn deleted_frame(session: i32, deleted: bool) -> Bytes {
        let mut w = Writer::new();
        w.write_byte(0).write_int(session).write_bool(deleted);
        w.freeze()
    }

    #[tokio::test]
    async fn responses_complete_in_submission_order() {
        let (client, mut server) = duplex(1024);
        let conn = Connection::from_stream(client, 4);

        let mut first = conn.send(delete(1)).unwrap();
        let second = conn.send(delete(2)).unwrap();
        first.submitted().await.unwrap();
        // already observed, returns immediately
        first.submitted().await.unwrap();

        let mut request = vec![0u8; 2 * 20];
        server.read_exact(&mut request).await.unwrap();
        assert_eq!(request[0], 33);
        assert_eq!(&request[1..5], &4i32.to_be_bytes());

        let mut both = deleted_frame(4, true).to_vec();
        both.extend_from_slice(&deleted_frame(4, false));
        // split mid-frame to exercise partial reads
        server.write_all(&both[..3]).await.unwrap();
        server.flush().await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(&both[3..]).await.unwrap();

        assert!(first.response().await.unwrap());
        assert!(!second.response().await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_response_fails_everything_in_flight() {
        let (client, mut server) = duplex(1024);
        let conn = Connection::from_stream(client, -1);

        let first = conn.send(delete(1)).unwrap();
        let second = conn.send(delete(2)).unwrap();

        let mut request = vec![0u8; 40];
        server.read_exact(&mut request).await.unwrap();
        // error status whose exception class has a negative length
        server
            .write_all(&[1, 0xff, 0xff, 0xff, 0xff, 1, 0xff, 0xff, 0xff, 0xf0])
            .await
            .unwrap();

        assert!(first.response().await.unwrap_err().is_fatal());
        assert!(second.response().await.unwrap_err().is_fatal());

        tokio::task::yield_now().await;
        let later = conn.send(delete(3));
        match later {
            Err(DriverError::Closed) => {}
            Ok(pending) => assert!(matches!(pending.response().await, Err(DriverError::Closed))),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dropped_caller_does_not_misalign_stream() {
        let (client, mut server) = duplex(1024);
        let conn = Connection::from_stream(client, -1);

        drop(conn.send(delete(1)).unwrap());
        let kept = conn.send(delete(2)).unwrap();

        let mut request = vec![0u8; 40];
        server.read_exact(&mut request).await.unwrap();
        server.write_all(&deleted_frame(-1, false)).await.unwrap();
        server.write_all(&deleted_frame(-1, true)).await.unwrap();

        assert!(kept.response().await.unwrap());
    }

    #[tokio::test]
    async fn server_eof_reports_closed() {
        let (client, server) = duplex(64);
        let conn = Connection::from_stream(client, -1);
        let pending = conn.send(delete(1)).unwrap();
        drop(server);
        assert!(pending.response().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn exchange_against_scripted_stream() {
        let request = encode_request(&delete(7), 4);
        let stream = tokio_test::io::Builder::new()
            .write(&request)
            .read(&deleted_frame(4, true))
            .build();
        let conn = Connection::from_stream(stream, 4);

        assert!(conn.call(delete(7)).await.unwrap());
    }

    #[tokio::test]
    async fn trickled_response_is_decoded_once() {
        let (client, mut server) = duplex(1024);
        let conn = Connection::from_stream(client, 4);
        let decodes = Arc::new(AtomicUsize::new(0));

        let pending = conn
            .send(IntList {
                decodes: decodes.clone(),
            })
            .unwrap();
        let mut request = vec![0u8; 5];
        server.read_exact(&mut request).await.unwrap();

        let mut w = Writer::new();
        w.write_byte(0).write_int(4).write_int(100);
        for n in 0..100 {
            w.write_int(n);
        }
        let frame = w.freeze();
        for piece in frame.chunks(16) {
            server.write_all(piece).await.unwrap();
            tokio::task::yield_now().await;
        }

        let values = pending.response().await.unwrap();
        assert_eq!(values.len(), 100);
        assert_eq!(values[99], 99);
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn large_response_drains_while_request_is_written() {
        let (client, mut server) = duplex(256);
        let conn = Connection::from_stream(client, 4);

        let small = Command::query("select from V");
        let large = Command::query(format!("select from V where name = '{}'", "x".repeat(4096)));
        let small_len = encode_request(&small, 4).len();
        let large_len = encode_request(&large, 4).len();

        let server_task = tokio::spawn(async move {
            let mut request = vec![0u8; small_len];
            server.read_exact(&mut request).await.unwrap();

            // answer before reading the next request, as a busy server may
            let mut w = Writer::new();
            w.write_byte(0).write_int(4);
            for _ in 0..2000 {
                w.write_byte(110);
            }
            w.write_byte(0);
            server.write_all(&w.freeze()).await.unwrap();

            let mut request = vec![0u8; large_len];
            server.read_exact(&mut request).await.unwrap();
            let mut w = Writer::new();
            w.write_byte(0).write_int(4).write_byte(0);
            server.write_all(&w.freeze()).await.unwrap();
            server
        });

        let first = conn.send(small).unwrap();
        let second = conn.send(large).unwrap();

        let rows = tokio::time::timeout(Duration::from_secs(5), first.response())
            .await
            .expect("first response stalled behind the second request")
            .unwrap();
        assert_eq!(rows.len(), 2000);
        assert!(second.response().await.unwrap().is_empty());
        server_task.await.unwrap();
    }
}
