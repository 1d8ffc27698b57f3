use super::cluster::ClusterCache;
use super::config::ClientConfig;
use super::connection::Connection;
use super::Database;
use crate::error::DriverResult;

pub struct OrientClientBuilder {
    config: ClientConfig,
    clusters: Vec<(String, i16)>,
    env_overrides: bool,
}

impl OrientClientBuilder {
    /// Start from an address, `host` or `host:port`.
    pub fn new(addr: &str) -> Self {
        let mut config = ClientConfig::default();
        match addr.rsplit_once(':').map(|(host, port)| (host, port.parse::<u16>())) {
            Some((host, Ok(port))) => {
                config.host = host.to_string();
                config.port = port;
            }
            _ => config.host = addr.to_string(),
        }
        Self::from_config(config)
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            clusters: Vec::new(),
            env_overrides: false,
        }
    }

    pub fn session_id(mut self, session_id: i32) -> Self {
        self.config.session_id = session_id;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn read_greeting(mut self, read_greeting: bool) -> Self {
        self.config.read_greeting = read_greeting;
        self
    }

    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Register a known class or cluster name for record creation.
    pub fn cluster(mut self, name: &str, id: i16) -> Self {
        self.clusters.push((name.to_string(), id));
        self
    }

    /// Apply `ORIENTDB_*` environment overrides at build time.
    pub fn with_env(mut self) -> Self {
        self.env_overrides = true;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn into_parts(self) -> (ClientConfig, ClusterCache) {
        let mut config = self.config;
        if self.env_overrides {
            config.apply_env_overrides();
        }

        let clusters = ClusterCache::new();
        for (name, id) in &self.clusters {
            clusters.insert(name, *id);
        }
        (config, clusters)
    }

    pub async fn build(self) -> DriverResult<Database<Connection, ClusterCache>> {
        let (config, clusters) = self.into_parts();
        let connection = Connection::connect(&config).await?;
        Ok(Database::new(connection, clusters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterLookup;

    #[test]
    fn test_address_parsing() {
        let builder = OrientClientBuilder::new("db.example.com:2425");
        assert_eq!(builder.config().host, "db.example.com");
        assert_eq!(builder.config().port, 2425);

        let builder = OrientClientBuilder::new("db.example.com");
        assert_eq!(builder.config().address(), "db.example.com:2424");
    }

    #[test]
    fn test_options_reach_config_and_cache() {
        let (config, clusters) = OrientClientBuilder::new("localhost")
            .session_id(12)
            .read_greeting(false)
            .max_frame_size(1024)
            .cluster("Person", 11)
            .into_parts();

        assert_eq!(config.session_id, 12);
        assert!(!config.read_greeting);
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(clusters.default_cluster("person"), Some(11));
    }
}
