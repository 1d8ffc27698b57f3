//! Links records returned together in one response into a single graph.
//!
//! Prefetched records arrive as separate objects and refer to each other by
//! RID. Resolution replaces every [`Value::Link`] whose target is in the batch
//! with a handle to that record, so that exactly one live object exists per
//! RID across the graph. Links to records outside the batch stay as links.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::record::{RecordRef, Value};
use super::rid::RecordId;

/// Resolve `primary` against `auxiliary` and return the primary handle.
///
/// Auxiliary records are linked to each other first, then the primary is
/// linked against the same index. The returned handle is the canonical
/// object for the primary's RID.
pub fn resolve_references(primary: RecordRef, auxiliary: &[RecordRef]) -> RecordRef {
    Resolver::new(auxiliary).resolve_record(primary)
}

/// One resolution pass over a response batch.
///
/// Construction indexes the auxiliary records and links them to each other.
/// When a RID appears more than once the last record is the canonical one,
/// and every other handle with that RID is replaced by it. The visited set
/// lives as long as the resolver, so every record resolved through the same
/// instance shares one object per RID.
#[derive(Debug, Default)]
pub struct Resolver {
    index: HashMap<RecordId, RecordRef>,
    seen: HashMap<RecordId, RecordRef>,
}

impl Resolver {
    pub fn new(auxiliary: &[RecordRef]) -> Self {
        let mut index = HashMap::with_capacity(auxiliary.len());
        for record in auxiliary {
            if let Some(rid) = record.rid() {
                if index.insert(rid, record.clone()).is_some() {
                    tracing::trace!("Duplicate record {} in batch, keeping the last one", rid);
                }
            }
        }

        let mut resolver = Self {
            index,
            seen: HashMap::new(),
        };
        let indexed: Vec<RecordRef> = resolver.index.values().cloned().collect();
        for record in &indexed {
            resolver.visit_record(record);
        }
        for record in auxiliary.iter().filter(|record| record.rid().is_none()) {
            resolver.visit_record(record);
        }
        resolver
    }

    pub fn resolve_record(&mut self, primary: RecordRef) -> RecordRef {
        self.visit_record(&primary)
    }

    /// Resolve links inside a standalone value, such as a query result row.
    pub fn resolve_value(&mut self, value: &mut Value) {
        self.visit_value(value);
    }

    /// Walk a record's fields once. Returns the canonical handle for it.
    fn visit_record(&mut self, record: &RecordRef) -> RecordRef {
        if let Some(rid) = record.rid() {
            if let Some(canonical) = self.index.get(&rid) {
                if !canonical.ptr_eq(record) {
                    let canonical = canonical.clone();
                    return self.visit_record(&canonical);
                }
            }
            if let Some(canonical) = self.seen.get(&rid) {
                return canonical.clone();
            }
            self.seen.insert(rid, record.clone());
        }

        // Fields are taken out so that self references do not contend on the lock.
        let mut fields = record.write().take_fields();
        for value in fields.values_mut() {
            self.visit_value(value);
        }
        record.write().restore_fields(fields);

        record.clone()
    }

    fn visit_value(&mut self, value: &mut Value) {
        match value {
            Value::Link(rid) => {
                // indexed records are all walked by `new`
                if let Some(canonical) = self.index.get(rid).or_else(|| self.seen.get(rid)) {
                    *value = Value::Record(canonical.clone());
                }
            }
            Value::Record(nested) => {
                let canonical = self.visit_record(nested);
                *nested = canonical;
            }
            Value::List(items) | Value::Set(items) => {
                for item in items {
                    self.visit_value(item);
                }
            }
            Value::Map(entries) => self.visit_map(entries),
            _ => {}
        }
    }

    fn visit_map(&mut self, entries: &mut IndexMap<String, Value>) {
        for (key, value) in entries.iter_mut() {
            if key.starts_with('@') {
                continue;
            }
            self.visit_value(value);
        }
    }
}
