use indexmap::IndexMap;

use super::cluster::ClusterLookup;
use super::{Database, Transport};
use crate::error::DriverResult;
use crate::protocol::operations::{Command, CommandMode};
use crate::protocol::record::{RecordRef, Value};
use crate::protocol::resolver::Resolver;
use crate::protocol::result_stream::Payload;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub params: Option<IndexMap<String, Value>>,
    pub limit: Option<i32>,
    pub fetch_plan: Option<String>,
    pub mode: CommandMode,
}

impl QueryOptions {
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fetch_plan(mut self, plan: impl Into<String>) -> Self {
        self.fetch_plan = Some(plan.into());
        self
    }
}

impl<T: Transport, C: ClusterLookup> Database<T, C> {
    /// Run a SQL query. Prefetched records are linked into the results
    /// rather than returned.
    pub async fn query(&self, text: &str, options: QueryOptions) -> DriverResult<Vec<Value>> {
        let mut cmd = Command::query(text);
        cmd.mode = options.mode;
        cmd.limit = options.limit.unwrap_or(-1);
        cmd.fetch_plan = options.fetch_plan.unwrap_or_default();
        cmd.params = options.params;

        tracing::debug!("Query: {}", text);
        let payloads = self.transport.send(cmd).await?;
        collect_results(payloads)
    }

    /// Run a non-query SQL command such as `UPDATE` or `CREATE VERTEX`.
    pub async fn command(
        &self,
        text: &str,
        params: Option<IndexMap<String, Value>>,
    ) -> DriverResult<Vec<Value>> {
        let mut cmd = Command::sql(text);
        cmd.params = params;

        tracing::debug!("Command: {}", text);
        let payloads = self.transport.send(cmd).await?;
        collect_results(payloads)
    }
}

fn collect_results(payloads: Vec<Payload>) -> DriverResult<Vec<Value>> {
    let (prefetched, primary): (Vec<Payload>, Vec<Payload>) =
        payloads.into_iter().partition(Payload::is_prefetched);

    let auxiliary: Vec<RecordRef> = prefetched
        .into_iter()
        .filter_map(|payload| match payload {
            Payload::Prefetched(Value::Record(record)) => Some(record),
            _ => None,
        })
        .collect();

    let mut resolver = Resolver::new(&auxiliary);
    let mut results = Vec::with_capacity(primary.len());
    for payload in primary {
        let mut value = payload.into_value()?;
        resolver.resolve_value(&mut value);
        results.push(value);
    }
    Ok(results)
}
