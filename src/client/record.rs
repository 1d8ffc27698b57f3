use futures::future::try_join_all;

use super::cluster::{ClusterLookup, ClusterTarget};
use super::{Database, Transport};
use crate::error::{DriverError, DriverResult, RequestError};
use crate::protocol::operations::{
    RecordCreate, RecordDelete, RecordLoad, RecordMetadata, RecordUpdate, ANY_VERSION,
};
use crate::protocol::record::{Record, RecordRef, RecordType};
use crate::protocol::resolver::resolve_references;
use crate::protocol::rid::RecordId;

/// Something a record can be addressed by: a textual RID, a parsed RID, or
/// a record carrying `@rid`.
#[derive(Debug, Clone)]
pub enum RecordArg {
    Text(String),
    Rid(RecordId),
    Record(RecordRef),
}

impl RecordArg {
    /// Pull out the RID and the record object to report results on. Bare
    /// RIDs get a fresh record holding just the RID.
    fn extract(self, action: &str) -> DriverResult<(RecordId, RecordRef)> {
        let rid = match &self {
            RecordArg::Text(text) => RecordId::parse(text)?,
            RecordArg::Rid(rid) => *rid,
            RecordArg::Record(record) => record.rid().ok_or_else(|| {
                DriverError::operation(format!("Cannot {} - no record id specified", action))
            })?,
        };

        let record = match self {
            RecordArg::Record(record) => record,
            RecordArg::Text(_) | RecordArg::Rid(_) => {
                let mut record = Record::new();
                record.set_rid(rid);
                RecordRef::new(record)
            }
        };
        Ok((rid, record))
    }
}

impl From<&str> for RecordArg {
    fn from(text: &str) -> Self {
        RecordArg::Text(text.to_string())
    }
}

impl From<String> for RecordArg {
    fn from(text: String) -> Self {
        RecordArg::Text(text)
    }
}

impl From<RecordId> for RecordArg {
    fn from(rid: RecordId) -> Self {
        RecordArg::Rid(rid)
    }
}

impl From<RecordRef> for RecordArg {
    fn from(record: RecordRef) -> Self {
        RecordArg::Record(record)
    }
}

impl From<&RecordRef> for RecordArg {
    fn from(record: &RecordRef) -> Self {
        RecordArg::Record(record.clone())
    }
}

impl From<Record> for RecordArg {
    fn from(record: Record) -> Self {
        RecordArg::Record(RecordRef::new(record))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Data segment; the server picks one when unset.
    pub segment: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub fetch_plan: Option<String>,
    pub tombstones: bool,
}

impl GetOptions {
    pub fn fetch_plan(plan: impl Into<String>) -> Self {
        Self {
            fetch_plan: Some(plan.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Merge over the stored copy instead of replacing it. This is a read
    /// followed by a full write, not a server-side patch.
    pub preserve: bool,
    /// Server-defined mode byte, `0` by default.
    pub mode: u8,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub mode: u8,
}

impl<T: Transport, C: ClusterLookup> Database<T, C> {
    /// Insert a record and assign it the RID and version the server chose.
    ///
    /// The target cluster is the one of an existing `@rid`, otherwise the
    /// default cluster of the record's class.
    pub async fn create(
        &self,
        record: impl Into<RecordRef>,
        options: CreateOptions,
    ) -> DriverResult<RecordRef> {
        let record = record.into();
        let (rid, class) = {
            let r = record.read();
            (r.rid(), r.class().map(str::to_string))
        };

        let cluster = match (rid, class) {
            (Some(rid), _) => rid.cluster,
            (None, Some(class)) => self.resolve_cluster(&class).await?,
            (None, None) => return Err(invalid_cluster()),
        };

        let op = {
            let r = record.read();
            let mut op = RecordCreate::new(cluster, &r);
            op.segment = options.segment.unwrap_or(-1);
            op
        };
        let created = self.transport.send(op).await?;

        let rid = RecordId::new(cluster, created.position);
        {
            let mut r = record.write();
            r.set_rid(rid);
            r.set_version(created.version);
        }
        tracing::debug!("Created record {} (version {})", rid, created.version);
        Ok(record)
    }

    async fn resolve_cluster(&self, class: &str) -> DriverResult<i16> {
        if let Some(id) = self.clusters.default_cluster(class) {
            return Ok(id);
        }
        self.clusters
            .get_by_name(class)
            .await?
            .map(ClusterTarget::cluster_id)
            .ok_or_else(invalid_cluster)
    }

    /// Load a record. When the fetch plan pulls in related records, they
    /// are linked into the returned record's graph.
    pub async fn get(
        &self,
        record: impl Into<RecordArg>,
        options: GetOptions,
    ) -> DriverResult<RecordRef> {
        let (rid, _) = record.into().extract("read")?;

        let mut op = RecordLoad::new(rid);
        op.fetch_plan = options.fetch_plan.unwrap_or_default();
        op.tombstones = options.tombstones;

        let mut records = self.transport.send(op).await?.into_iter();
        let primary = records
            .next()
            .ok_or_else(|| RequestError::NotFound("No such record".to_string()))?;

        let auxiliary: Vec<RecordRef> = records.collect();
        if auxiliary.is_empty() {
            return Ok(primary);
        }
        tracing::trace!("Resolving {} with {} prefetched records", rid, auxiliary.len());
        Ok(resolve_references(primary, &auxiliary))
    }

    /// Load several records. Requests are pipelined on the transport.
    pub async fn get_many<I>(&self, records: I, options: GetOptions) -> DriverResult<Vec<RecordRef>>
    where
        I: IntoIterator,
        I::Item: Into<RecordArg>,
    {
        try_join_all(
            records
                .into_iter()
                .map(|record| self.get(record, options.clone())),
        )
        .await
    }

    /// Fetch only the current version and store it on the record.
    pub async fn meta(&self, record: impl Into<RecordArg>) -> DriverResult<RecordRef> {
        let (rid, record) = record.into().extract("read")?;
        let meta = self.transport.send(RecordMetadata { rid }).await?;

        {
            let mut r = record.write();
            r.set_rid(rid);
            r.set_version(meta.version);
        }
        Ok(record)
    }

    /// Write a record back. Returns the record that was sent, holding the
    /// new version.
    pub async fn update(
        &self,
        record: impl Into<RecordArg>,
        options: UpdateOptions,
    ) -> DriverResult<RecordRef> {
        let (rid, record) = record.into().extract("update record")?;
        record.write().set_record_type(RecordType::Document);

        let target = if options.preserve {
            let stored = self.get(rid, GetOptions::default()).await?;
            {
                let incoming = record.read();
                stored.write().merge_from(&incoming);
            }
            stored
        } else {
            record
        };

        let op = {
            let r = target.read();
            let mut op = RecordUpdate::new(rid, &r);
            op.mode = options.mode;
            op
        };
        let version = self.transport.send(op).await?;

        target.write().set_version(version);
        tracing::debug!("Updated record {} to version {}", rid, version);
        Ok(target)
    }

    /// Delete a record, checking its known version when it has one.
    /// Returns the caller's record object.
    pub async fn delete(
        &self,
        record: impl Into<RecordArg>,
        options: DeleteOptions,
    ) -> DriverResult<RecordRef> {
        let (rid, record) = record.into().extract("delete")?;
        let version = record.version().unwrap_or(ANY_VERSION);

        let deleted = self
            .transport
            .send(RecordDelete {
                rid,
                version,
                mode: options.mode,
            })
            .await?;
        if !deleted {
            tracing::debug!("Server reported nothing deleted for {}", rid);
        }
        Ok(record)
    }
}

fn invalid_cluster() -> DriverError {
    DriverError::operation("Cannot create record - cluster ID and/or class is invalid.")
}
