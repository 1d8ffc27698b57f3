//! Concrete protocol operations.

mod command;
mod record;

pub use command::{Command, CommandClass, CommandMode};
pub use record::{
    Created, RecordCreate, RecordDelete, RecordLoad, RecordMeta, RecordMetadata, RecordUpdate,
    ANY_VERSION, DEFAULT_MODE,
};
