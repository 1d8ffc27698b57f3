//! Text serialization of record content.
//!
//! Document bodies travel as a compact comma-separated format:
//!
//! ```text
//! Person@name:"Ada",age:36,born:-4039372800000t,friend:#12:3,tags:["a","b"],
//! address:(city:"London"),scores:{"math":9.5d}
//! ```
//!
//! Numbers carry a one-letter type suffix (`b` byte, `s` short, `l` long,
//! `f` float, `d` double, `c` decimal, `t` datetime, `a` date); bare integers
//! are ints and bare decimals are doubles. Binary values are base64 between
//! underscores and null is the empty string.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;

use super::record::{Record, RecordRef, Value};
use super::rid::RecordId;
use crate::error::FormatError;

type ParseResult<T> = Result<T, FormatError>;

/// Deepest collection or embedded-document nesting accepted when parsing.
pub const MAX_NESTING: usize = 128;

/// Serialize a record body, including its class prefix.
pub fn serialize_record(record: &Record) -> String {
    let mut out = String::new();
    write_record(record, &mut out);
    out
}

pub fn serialize_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Serialize query parameters as the document `params:{...}`.
///
/// Top-level string values that the server's parser would otherwise read
/// as a link, collection, embedded document or number are wrapped in an
/// extra pair of quotes. Nested values are left alone.
pub fn serialize_params(params: &IndexMap<String, Value>) -> String {
    let quoted: IndexMap<String, Value> = params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) if needs_param_quoting(s) => Value::String(format!("\"{s}\"")),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect();

    let mut out = String::from("params:");
    write_value(&Value::Map(quoted), &mut out);
    out
}

fn needs_param_quoting(s: &str) -> bool {
    match s.chars().next() {
        Some(c) => matches!(c, '#' | '<' | '[' | '(' | '{') || c.is_ascii_digit(),
        None => false,
    }
}

fn write_record(record: &Record, out: &mut String) {
    if let Some(class) = record.class() {
        out.push_str(class);
        out.push('@');
    }
    for (i, (key, value)) in record.fields().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push(':');
        write_value(value, out);
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn write_items(items: &[Value], open: char, close: char, out: &mut String) {
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(item, out);
    }
    out.push(close);
}

fn write_value(value: &Value, out: &mut String) {
    // Writing into a String cannot fail.
    let _ = match value {
        Value::Null => Ok(()),
        Value::Bool(b) => write!(out, "{b}"),
        Value::Byte(v) => write!(out, "{v}b"),
        Value::Short(v) => write!(out, "{v}s"),
        Value::Int(v) => write!(out, "{v}"),
        Value::Long(v) => write!(out, "{v}l"),
        Value::Float(v) => write!(out, "{v}f"),
        Value::Double(v) => write!(out, "{v}d"),
        Value::Decimal(v) => write!(out, "{v}c"),
        Value::String(s) => {
            write_string(s, out);
            Ok(())
        }
        Value::Binary(raw) => write!(out, "_{}_", BASE64.encode(raw)),
        Value::Date(d) => write!(out, "{}a", date_to_millis(d)),
        Value::DateTime(dt) => write!(out, "{}t", dt.timestamp_millis()),
        Value::Link(rid) => write!(out, "{rid}"),
        Value::Record(r) => {
            let record = r.read();
            match record.rid() {
                Some(rid) if rid.is_assigned() => write!(out, "{rid}"),
                _ => {
                    out.push('(');
                    write_record(&record, out);
                    out.push(')');
                    Ok(())
                }
            }
        }
        Value::List(items) => {
            write_items(items, '[', ']', out);
            Ok(())
        }
        Value::Set(items) => {
            write_items(items, '<', '>', out);
            Ok(())
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(value, out);
            }
            out.push('}');
            Ok(())
        }
    };
}

fn date_to_millis(date: &NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Parse a record body.
pub fn deserialize_record(input: &str) -> ParseResult<Record> {
    let mut parser = Parser::new(input);
    let record = parser.document(None)?;
    parser.expect_end()?;
    Ok(record)
}

/// Parse a single serialized value, as carried by scalar query results.
pub fn deserialize_value(input: &str) -> ParseResult<Value> {
    let mut parser = Parser::new(input.trim());
    let value = parser.value()?;
    parser.expect_end()?;
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn error(&self, what: &str) -> FormatError {
        FormatError::Content(format!("{what} at offset {} in '{}'", self.pos, self.src))
    }

    fn expect(&mut self, byte: u8) -> ParseResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(self.error("trailing content"))
        }
    }

    /// Parse fields up to `close` (not consumed) or the end of input.
    fn document(&mut self, close: Option<u8>) -> ParseResult<Record> {
        let mut record = Record::new();
        let at_close = |p: &Self| p.peek().is_none() || p.peek() == close;

        let rest = &self.src.as_bytes()[self.pos..];
        if let Some(idx) = rest
            .iter()
            .position(|&b| b == b'@' || b == b':' || b == b',' || b == b'"' || Some(b) == close)
        {
            if rest[idx] == b'@' {
                let class = &self.src[self.pos..self.pos + idx];
                record.set_class(class);
                self.pos += idx + 1;
            }
        }

        while !at_close(&*self) {
            let rest = &self.src[self.pos..];
            let colon = rest.find(':').ok_or_else(|| self.error("expected field name"))?;
            let name = rest[..colon].to_string();
            self.pos += colon + 1;

            let value = self.value()?;
            record.set(name, value)?;

            if self.peek() == Some(b',') {
                self.pos += 1;
            } else if !at_close(&*self) {
                return Err(self.error("expected ','"));
            }
        }
        Ok(record)
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!("nesting deeper than {MAX_NESTING}")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn value(&mut self) -> ParseResult<Value> {
        match self.peek() {
            None | Some(b',' | b')' | b']' | b'>' | b'}') => Ok(Value::Null),
            Some(b'"') => self.string().map(Value::String),
            Some(b'#') => self.link().map(Value::Link),
            Some(b'[') => self.nested(|p| p.items(b']')).map(Value::List),
            Some(b'<') => self.nested(|p| p.items(b'>')).map(Value::Set),
            Some(b'(') => self.nested(|p| {
                p.pos += 1;
                let record = p.document(Some(b')'))?;
                p.expect(b')')?;
                Ok(Value::Record(RecordRef::new(record)))
            }),
            Some(b'{') => self.nested(Self::map).map(Value::Map),
            Some(b'_') => self.delimited(b'_', b'_').map(Value::Binary),
            Some(b'%') => self.delimited(b'%', b';').map(Value::Binary),
            Some(b't' | b'f') => self.boolean().map(Value::Bool),
            Some(b) if b.is_ascii_digit() || b == b'-' || b == b'+' => self.number(),
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn link(&mut self) -> ParseResult<RecordId> {
        let start = self.pos;
        self.pos += 1;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit() || b == b':' || b == b'-') {
            self.pos += 1;
        }
        RecordId::parse(&self.src[start..self.pos])
    }

    fn items(&mut self, close: u8) -> ParseResult<Vec<Value>> {
        self.pos += 1;
        let mut items = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.value()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("unterminated collection")),
            }
        }
    }

    fn map(&mut self) -> ParseResult<IndexMap<String, Value>> {
        self.expect(b'{')?;
        let mut map = IndexMap::new();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(map);
        }
        loop {
            let key = self.string()?;
            self.expect(b':')?;
            let value = self.value()?;
            map.insert(key, value);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(map);
                }
                _ => return Err(self.error("unterminated map")),
            }
        }
    }

    fn delimited(&mut self, open: u8, close: u8) -> ParseResult<Vec<u8>> {
        self.expect(open)?;
        let rest = &self.src[self.pos..];
        let end = rest
            .bytes()
            .position(|b| b == close)
            .ok_or_else(|| self.error("unterminated binary"))?;
        let decoded = BASE64
            .decode(&rest[..end])
            .map_err(|e| self.error(&format!("invalid base64 ({e})")))?;
        self.pos += end + 1;
        Ok(decoded)
    }

    fn boolean(&mut self) -> ParseResult<bool> {
        let rest = &self.src[self.pos..];
        if rest.starts_with("true") {
            self.pos += 4;
            Ok(true)
        } else if rest.starts_with("false") {
            self.pos += 5;
            Ok(false)
        } else {
            Err(self.error("unexpected character"))
        }
    }

    fn number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b) if b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'E' | b'e')
        ) {
            self.pos += 1;
        }
        let token = &self.src[start..self.pos];
        let bad = || FormatError::Content(format!("invalid number '{token}'"));

        let suffix = match self.peek() {
            Some(s @ (b'b' | b's' | b'l' | b'f' | b'd' | b'c' | b't' | b'a')) => {
                self.pos += 1;
                Some(s)
            }
            _ => None,
        };

        let value = match suffix {
            Some(b'b') => Value::Byte(token.parse().map_err(|_| bad())?),
            Some(b's') => Value::Short(token.parse().map_err(|_| bad())?),
            Some(b'l') => Value::Long(token.parse().map_err(|_| bad())?),
            Some(b'f') => Value::Float(token.parse().map_err(|_| bad())?),
            Some(b'd') => Value::Double(token.parse().map_err(|_| bad())?),
            Some(b'c') => Value::Decimal(token.to_string()),
            Some(b't') => {
                let millis: i64 = token.parse().map_err(|_| bad())?;
                Value::DateTime(DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(bad)?)
            }
            Some(b'a') => {
                let millis: i64 = token.parse().map_err(|_| bad())?;
                let dt = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(bad)?;
                Value::Date(dt.date_naive())
            }
            _ if token.contains(['.', 'E', 'e']) => {
                Value::Double(token.parse().map_err(|_| bad())?)
            }
            _ => {
                let wide: i64 = token.parse().map_err(|_| bad())?;
                match i32::try_from(wide) {
                    Ok(narrow) => Value::Int(narrow),
                    Err(_) => Value::Long(wide),
                }
            }
        };
        Ok(value)
    }
}
