use indexmap::IndexMap;

use crate::protocol::codec::{DecodeResult, Reader, Writer};
use crate::protocol::operation::Operation;
use crate::protocol::record::Value;
use crate::protocol::result_stream::{Payload, ResultStream};
use crate::protocol::serializer::serialize_params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandMode {
    #[default]
    Sync,
    Async,
}

impl CommandMode {
    pub fn as_char(self) -> char {
        match self {
            CommandMode::Sync => 's',
            CommandMode::Async => 'a',
        }
    }
}

/// Server-side class that interprets the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    SynchQuery,
    AsynchQuery,
    Sql,
}

impl CommandClass {
    pub fn java_name(self) -> &'static str {
        match self {
            CommandClass::SynchQuery => {
                "com.orientechnologies.orient.core.sql.query.OSQLSynchQuery"
            }
            CommandClass::AsynchQuery => {
                "com.orientechnologies.orient.core.sql.query.OSQLAsynchQuery"
            }
            CommandClass::Sql => "com.orientechnologies.orient.core.sql.OCommandSQL",
        }
    }

    fn is_query(self) -> bool {
        matches!(self, CommandClass::SynchQuery | CommandClass::AsynchQuery)
    }
}

/// Execute a query or command and read its result stream.
#[derive(Debug, Clone)]
pub struct Command {
    pub mode: CommandMode,
    pub class: CommandClass,
    pub text: String,
    /// `-1` for no limit.
    pub limit: i32,
    pub fetch_plan: String,
    pub params: Option<IndexMap<String, Value>>,
}

impl Command {
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            mode: CommandMode::Sync,
            class: CommandClass::SynchQuery,
            text: text.into(),
            limit: -1,
            fetch_plan: String::new(),
            params: None,
        }
    }

    pub fn sql(text: impl Into<String>) -> Self {
        Self {
            class: CommandClass::Sql,
            ..Self::query(text)
        }
    }

    /// Class actually sent. Async mode always runs as an async query.
    pub fn effective_class(&self) -> CommandClass {
        match self.mode {
            CommandMode::Async => CommandClass::AsynchQuery,
            CommandMode::Sync => self.class,
        }
    }

    /// An empty map is still sent, as `params:{}`.
    fn params_string(&self) -> Option<String> {
        self.params.as_ref().map(serialize_params)
    }

    fn serialize_query(&self) -> Vec<u8> {
        let class = self.effective_class();
        let mut w = Writer::with_capacity(self.text.len() + 96);
        w.write_string(Some(class.java_name()))
            .write_string(Some(&self.text));

        let params = self.params_string();
        if class.is_query() {
            w.write_int(self.limit).write_string(Some(&self.fetch_plan));
            match params {
                Some(params) => w.write_string(Some(&params)),
                None => w.write_int(0),
            };
        } else {
            match params {
                Some(params) => w.write_bool(true).write_string(Some(&params)),
                None => w.write_bool(false),
            };
            w.write_bool(false);
        }
        w.freeze().to_vec()
    }
}

impl Operation for Command {
    type Output = Vec<Payload>;

    const NAME: &'static str = "command";
    const OPCODE: u8 = 41;

    fn write(&self, w: &mut Writer) {
        w.write_char(self.mode.as_char())
            .write_bytes(Some(&self.serialize_query()));
    }

    fn read(&self, r: &mut Reader<'_>) -> DecodeResult<Vec<Payload>> {
        ResultStream::new().read(r)
    }

    fn skip(&self, r: &mut Reader<'_>) -> DecodeResult<()> {
        ResultStream::new().skip(r)
    }
}
