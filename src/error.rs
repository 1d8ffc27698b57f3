use thiserror::Error;

/// Decoding and parsing failures.
///
/// A `FormatError` raised while a response is being decoded means the byte
/// stream is no longer aligned, so the connection that produced it is torn down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid record id '{0}'")]
    InvalidRid(String),

    #[error("incomplete frame: needed {needed} bytes at offset {offset}, {available} available")]
    Incomplete {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid length prefix {0}")]
    InvalidLength(i32),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("unexpected tag {tag} while reading {context}")]
    UnexpectedTag { tag: u8, context: &'static str },

    #[error("malformed record content: {0}")]
    Content(String),

    #[error("frame of {0} bytes exceeds the configured maximum")]
    FrameTooLarge(usize),
}

impl FormatError {
    /// True when more bytes could complete the read.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FormatError::Incomplete { .. })
    }
}

/// Failures reported by the server for a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{class}: {message}")]
    Server {
        class: String,
        message: String,
        /// Remaining `(class, message)` pairs of the server-side exception chain.
        chain: Vec<(String, String)>,
    },

    #[error("{0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Whether the connection that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Format(_)
                | DriverError::Connection(_)
                | DriverError::Io(_)
                | DriverError::Closed
        )
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        DriverError::Operation(msg.into())
    }

    /// Server-side exception class, when the error came from a status frame.
    pub fn server_class(&self) -> Option<&str> {
        match self {
            DriverError::Request(RequestError::Server { class, .. }) => Some(class),
            _ => None,
        }
    }
}

impl Clone for DriverError {
    fn clone(&self) -> Self {
        match self {
            DriverError::Format(e) => DriverError::Format(e.clone()),
            DriverError::Operation(m) => DriverError::Operation(m.clone()),
            DriverError::Request(e) => DriverError::Request(e.clone()),
            DriverError::Connection(m) => DriverError::Connection(m.clone()),
            DriverError::Io(e) => DriverError::Connection(e.to_string()),
            DriverError::Closed => DriverError::Closed,
            DriverError::Config(m) => DriverError::Config(m.clone()),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
