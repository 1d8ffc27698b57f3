//! Class to cluster resolution for record creation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::DriverResult;
use crate::protocol::rid::RecordId;

/// Where a new record of some class should be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterTarget {
    Id(i16),
    /// A template RID; only its cluster is used.
    Rid(RecordId),
}

impl ClusterTarget {
    pub fn cluster_id(self) -> i16 {
        match self {
            ClusterTarget::Id(id) => id,
            ClusterTarget::Rid(rid) => rid.cluster,
        }
    }
}

/// Cluster and class metadata consulted by `create`.
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Default cluster already known for a class, without any I/O.
    fn default_cluster(&self, class: &str) -> Option<i16>;

    /// Resolve a cluster by class or cluster name. `Ok(None)` when nothing
    /// by that name exists.
    async fn get_by_name(&self, name: &str) -> DriverResult<Option<ClusterTarget>>;
}

/// In-memory name to cluster map, filled from schema metadata.
#[derive(Debug, Default)]
pub struct ClusterCache {
    by_name: RwLock<HashMap<String, i16>>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are matched case-insensitively, as the server does.
    pub fn insert(&self, name: &str, cluster: i16) {
        self.by_name.write().insert(name.to_lowercase(), cluster);
    }

    pub fn with(self, name: &str, cluster: i16) -> Self {
        self.insert(name, cluster);
        self
    }

    pub fn remove(&self, name: &str) -> Option<i16> {
        self.by_name.write().remove(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_name.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }
}

#[async_trait]
impl ClusterLookup for ClusterCache {
    fn default_cluster(&self, class: &str) -> Option<i16> {
        self.by_name.read().get(&class.to_lowercase()).copied()
    }

    async fn get_by_name(&self, name: &str) -> DriverResult<Option<ClusterTarget>> {
        Ok(self.default_cluster(name).map(ClusterTarget::Id))
    }
}
