mod builder;
mod cluster;
mod config;
mod connection;
mod query;
mod record;

pub use builder::OrientClientBuilder;
pub use cluster::{ClusterCache, ClusterLookup, ClusterTarget};
pub use config::ClientConfig;
pub use connection::{Connection, Pending};
pub use query::QueryOptions;
pub use record::{CreateOptions, DeleteOptions, GetOptions, RecordArg, UpdateOptions};

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::protocol::operation::Operation;

/// Anything that can carry an operation to the server and bring back its
/// decoded response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send<O: Operation>(&self, op: O) -> DriverResult<O::Output>;
}

#[async_trait]
impl Transport for Connection {
    async fn send<O: Operation>(&self, op: O) -> DriverResult<O::Output> {
        self.call(op).await
    }
}

/// Record and query API over one transport.
pub struct Database<T = Connection, C = ClusterCache> {
    transport: T,
    clusters: C,
}

impl<T: Transport, C: ClusterLookup> Database<T, C> {
    pub fn new(transport: T, clusters: C) -> Self {
        Self {
            transport,
            clusters,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clusters(&self) -> &C {
        &self.clusters
    }
}
