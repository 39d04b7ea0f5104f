use std::time::Duration;

use switchboard_core::config::{env_millis, env_parse};

use crate::frame::{DEFAULT_MAX_FRAME_SIZE, FRAME_SIZE_LIMIT};

/// Settings for every per-address pool a [`ChannelPool`](crate::ChannelPool) creates.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on live channels per address.
    pub max_connections: usize,
    /// How long `acquire` waits for a free channel. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Never above [`FRAME_SIZE_LIMIT`].
    pub max_frame_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Some(Duration::from_secs(5)),
            connect_timeout: Some(Duration::from_secs(3)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `{prefix}MAX_CONNECTIONS`, `{prefix}ACQUIRE_TIMEOUT_MS`,
    /// `{prefix}CONNECT_TIMEOUT_MS` and `{prefix}MAX_FRAME_SIZE` from the
    /// environment onto the defaults.
    pub fn from_env(prefix: &str) -> Self {
        let mut config = Self::default();
        if let Some(max) = env_parse::<usize>(&format!("{}MAX_CONNECTIONS", prefix)) {
            config.max_connections = max.max(1);
        }
        if let Some(timeout) = env_millis(&format!("{}ACQUIRE_TIMEOUT_MS", prefix)) {
            config.acquire_timeout = Some(timeout);
        }
        if let Some(timeout) = env_millis(&format!("{}CONNECT_TIMEOUT_MS", prefix)) {
            config.connect_timeout = Some(timeout);
        }
        if let Some(size) = env_parse::<usize>(&format!("{}MAX_FRAME_SIZE", prefix)) {
            config.max_frame_size = size.min(FRAME_SIZE_LIMIT);
        }
        config
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(FRAME_SIZE_LIMIT);
        self
    }
}
