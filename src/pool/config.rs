use std::time::Duration;

use crate::connection::Config;

/// Pool configuration builder.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) conn: Config,
    pub(crate) min_connections: usize,
    pub(crate) max_connections: usize,
    pub(crate) query_timeout: Duration,
    pub(crate) idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            conn: Config::default(),
            min_connections: 2,
            max_connections: 8,
            query_timeout: Duration::from_millis(120_000),
            idle_timeout: Duration::from_millis(300_000),
        }
    }
}

impl PoolConfig {
    pub fn new(conn: Config) -> Self {
        Self { conn, ..Self::default() }
    }

    /// Connection config from the environment, pool sizing from the
    /// defaults.
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Get the connection config.
    pub fn connection(&self) -> &Config {
        &self.conn
    }

    /// Connections the pool keeps open even when idle.
    pub fn min_connections(mut self, value: usize) -> Self {
        self.min_connections = value;
        self
    }

    /// Upper bound of open plus opening connections.
    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value.max(1);
        self
    }

    /// Window after which a running query is cancelled.
    pub fn query_timeout(mut self, value: Duration) -> Self {
        self.query_timeout = value;
        self
    }

    /// Idle window after which connections beyond the minimum are
    /// closed.
    pub fn idle_timeout(mut self, value: Duration) -> Self {
        self.idle_timeout = value;
        self
    }
}

#[cfg(test)]
mod test {
    use super::PoolConfig;

    #[test]
    fn documented_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.query_timeout.as_millis(), 120_000);
        assert_eq!(config.idle_timeout.as_millis(), 300_000);
    }

    #[test]
    fn max_connections_floor() {
        assert_eq!(PoolConfig::default().max_connections(0).max_connections, 1);
    }
}
