//! Records and field values.
//!
//! A [`Record`] is an ordered map of user fields plus the reserved metadata
//! keys `@rid`, `@version`, `@class` and `@type`. Reserved keys live in typed
//! slots rather than in the field map, so a user field can never shadow them.
//!
//! Linked records are shared through [`RecordRef`]. After reference
//! resolution every record with a given RID exists once in memory and all
//! links to it point at the same allocation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::rid::RecordId;
use crate::error::FormatError;

pub const RID_KEY: &str = "@rid";
pub const VERSION_KEY: &str = "@version";
pub const CLASS_KEY: &str = "@class";
pub const TYPE_KEY: &str = "@type";

pub const RESERVED_KEYS: [&str; 4] = [RID_KEY, VERSION_KEY, CLASS_KEY, TYPE_KEY];

/// Field names starting with `@` are metadata and never reference targets.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('@')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordType {
    #[default]
    Document,
    Flat,
    Bytes,
}

impl RecordType {
    pub fn as_byte(self) -> u8 {
        match self {
            RecordType::Document => b'd',
            RecordType::Flat => b'f',
            RecordType::Bytes => b'b',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, FormatError> {
        match byte {
            b'd' => Ok(RecordType::Document),
            b'f' => Ok(RecordType::Flat),
            b'b' => Ok(RecordType::Bytes),
            tag => Err(FormatError::UnexpectedTag {
                tag,
                context: "record type",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Arbitrary-precision decimal kept in its textual form.
    Decimal(String),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// Unresolved reference to another record.
    Link(RecordId),
    /// Embedded document, or a linked record after resolution.
    Record(RecordRef),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<RecordId> {
        match self {
            Value::Link(rid) => Some(*rid),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Plain JSON rendering. Records already printed on the current path are
    /// rendered as their RID string so cyclic graphs terminate.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<RecordId>) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Byte(v) => Json::from(*v),
            Value::Short(v) => Json::from(*v),
            Value::Int(v) => Json::from(*v),
            Value::Long(v) => Json::from(*v),
            Value::Float(v) => Json::from(*v),
            Value::Double(v) => Json::from(*v),
            Value::Decimal(v) | Value::String(v) => Json::String(v.clone()),
            Value::Binary(raw) => {
                use base64::Engine;
                Json::String(base64::engine::general_purpose::STANDARD.encode(raw))
            }
            Value::Date(d) => Json::String(d.to_string()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339()),
            Value::Link(rid) => Json::String(rid.to_string()),
            Value::Record(r) => r.to_json_inner(seen),
            Value::List(items) | Value::Set(items) => {
                Json::Array(items.iter().map(|v| v.to_json_inner(seen)).collect())
            }
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_inner(seen)))
                    .collect(),
            ),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    RecordId => Link,
    RecordRef => Record,
    DateTime<Utc> => DateTime,
    NaiveDate => Date,
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(RecordRef::new(record))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    /// Objects carrying any `@` key become embedded records, other objects
    /// become maps.
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => match i32::try_from(i) {
                    Ok(small) => Value::Int(small),
                    Err(_) => Value::Long(i),
                },
                None => Value::Double(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                if map.keys().any(|k| is_reserved_key(k)) {
                    match Record::from_json_map(map.clone()) {
                        Ok(record) => Value::from(record),
                        Err(_) => Value::Map(
                            map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
                        ),
                    }
                } else {
                    Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    rid: Option<RecordId>,
    version: Option<i32>,
    class: Option<String>,
    record_type: RecordType,
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::default()
        }
    }

    /// Build a record from a JSON object. Reserved keys are parsed into
    /// their typed slots.
    pub fn from_json(json: serde_json::Value) -> Result<Self, FormatError> {
        match json {
            serde_json::Value::Object(map) => Self::from_json_map(map),
            other => Err(FormatError::Content(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, FormatError> {
        let mut record = Record::new();
        for (key, value) in map {
            record.set(key, Value::from(value))?;
        }
        Ok(record)
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = Some(version);
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn set_class(&mut self, class: impl Into<String>) {
        self.class = Some(class.into());
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn set_record_type(&mut self, record_type: RecordType) {
        self.record_type = record_type;
    }

    /// User field lookup. Reserved keys are served by the typed accessors
    /// or by [`Record::meta`].
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    /// Reserved metadata rendered as a [`Value`].
    pub fn meta(&self, key: &str) -> Option<Value> {
        match key {
            RID_KEY => self.rid.map(Value::Link),
            VERSION_KEY => self.version.map(Value::Int),
            CLASS_KEY => self.class.clone().map(Value::String),
            TYPE_KEY => Some(Value::String(
                (self.record_type.as_byte() as char).to_string(),
            )),
            _ => None,
        }
    }

    /// Set a field. Reserved keys are validated and routed to their slots;
    /// unknown `@` keys are rejected.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, FormatError> {
        let key = key.into();
        let value = value.into();
        if !is_reserved_key(&key) {
            return Ok(self.fields.insert(key, value));
        }

        let previous = self.meta(&key);
        let invalid = |what: &str| FormatError::Content(format!("invalid {what} for {key}"));
        match key.as_str() {
            RID_KEY => {
                self.rid = match value {
                    Value::Link(rid) => Some(rid),
                    Value::String(s) => Some(RecordId::parse(&s)?),
                    Value::Null => None,
                    _ => return Err(invalid("value")),
                }
            }
            VERSION_KEY => {
                self.version = match value {
                    Value::Null => None,
                    other => Some(
                        other
                            .as_i64()
                            .and_then(|v| i32::try_from(v).ok())
                            .ok_or_else(|| invalid("version"))?,
                    ),
                }
            }
            CLASS_KEY => {
                self.class = match value {
                    Value::String(s) if !s.is_empty() => Some(s),
                    Value::String(_) | Value::Null => None,
                    _ => return Err(invalid("class")),
                }
            }
            TYPE_KEY => {
                self.record_type = match value.as_str().map(str::as_bytes) {
                    Some([b]) => RecordType::from_byte(*b)?,
                    _ => return Err(invalid("type")),
                }
            }
            _ => return Err(invalid("reserved key")),
        }
        Ok(previous)
    }

    /// Builder-style [`Record::set`] for user fields.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved_key(&key) {
            self.fields.insert(key, value.into());
        }
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.fields.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy `other`'s fields over this record's, `other` winning on
    /// conflicts. Metadata present on `other` also wins.
    pub fn merge_from(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        if other.rid.is_some() {
            self.rid = other.rid;
        }
        if other.version.is_some() {
            self.version = other.version;
        }
        if other.class.is_some() {
            self.class = other.class.clone();
        }
    }

    pub(crate) fn take_fields(&mut self) -> IndexMap<String, Value> {
        std::mem::take(&mut self.fields)
    }

    pub(crate) fn restore_fields(&mut self, fields: IndexMap<String, Value>) {
        self.fields = fields;
    }
}

/// Shared handle to a record.
///
/// Equality: two handles are equal when they share an allocation, or when
/// both carry a RID and the RIDs and versions match. Records without a RID
/// (embedded documents) compare structurally.
#[derive(Clone, Default)]
pub struct RecordRef(Arc<RwLock<Record>>);

impl RecordRef {
    pub fn new(record: Record) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write()
    }

    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.read().rid()
    }

    pub fn version(&self) -> Option<i32> {
        self.read().version()
    }

    /// Field lookup returning an owned copy.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Replace this record's resolved references to identified records with
    /// their RIDs. Embedded records are unlinked in place.
    pub fn unlink(&self) {
        let mut fields = self.write().take_fields();
        for value in fields.values_mut() {
            unlink_value(value);
        }
        self.write().restore_fields(fields);
    }

    /// [`RecordRef::unlink`] every record reachable from this one.
    ///
    /// Resolving a cyclic batch leaves the records holding each other alive.
    /// After this call they are freed once the caller's handles are dropped.
    pub fn unlink_graph(&self) {
        let mut visited = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(record) = pending.pop() {
            if !visited.insert(Arc::as_ptr(&record.0)) {
                continue;
            }
            let mut fields = record.write().take_fields();
            for value in fields.values_mut() {
                detach_value(value, &mut pending);
            }
            record.write().restore_fields(fields);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<RecordId>) -> serde_json::Value {
        let record = self.0.read_recursive();
        if let Some(rid) = record.rid {
            if !seen.insert(rid) {
                return serde_json::Value::String(rid.to_string());
            }
        }
        let mut out = serde_json::Map::new();
        for key in RESERVED_KEYS {
            if key == TYPE_KEY {
                continue;
            }
            if let Some(meta) = record.meta(key) {
                out.insert(key.to_string(), meta.to_json_inner(seen));
            }
        }
        for (key, value) in &record.fields {
            out.insert(key.clone(), value.to_json_inner(seen));
        }
        if let Some(rid) = record.rid {
            seen.remove(&rid);
        }
        serde_json::Value::Object(out)
    }
}

fn unlink_value(value: &mut Value) {
    match value {
        Value::Record(r) => match r.rid() {
            Some(rid) => *value = Value::Link(rid),
            None => r.unlink(),
        },
        Value::List(items) | Value::Set(items) => items.iter_mut().for_each(unlink_value),
        Value::Map(map) => map.values_mut().for_each(unlink_value),
        _ => {}
    }
}

/// Turn identified records into links and queue every record for a visit.
fn detach_value(value: &mut Value, pending: &mut Vec<RecordRef>) {
    match value {
        Value::Record(r) => {
            pending.push(r.clone());
            if let Some(rid) = r.rid() {
                *value = Value::Link(rid);
            }
        }
        Value::List(items) | Value::Set(items) => {
            for item in items {
                detach_value(item, pending);
            }
        }
        Value::Map(map) => {
            for item in map.values_mut() {
                detach_value(item, pending);
            }
        }
        _ => {}
    }
}

impl From<Record> for RecordRef {
    fn from(record: Record) -> Self {
        RecordRef::new(record)
    }
}

impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.0.read_recursive(), other.0.read_recursive());
        match (a.rid, b.rid) {
            (Some(x), Some(y)) => x == y && a.version == b.version,
            (None, None) => *a == *b,
            _ => false,
        }
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.read();
        match record.rid {
            Some(rid) => write!(f, "RecordRef({rid})"),
            None => f.debug_tuple("RecordRef").field(&*record).finish(),
        }
    }
}
