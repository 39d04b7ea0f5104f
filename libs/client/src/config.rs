use std::time::Duration;

use switchboard_core::config::{env_millis, env_parse};
use switchboard_core::worker::default_workers;
use switchboard_discovery::LoadBalancePolicy;
use switchboard_fabric::PoolConfig;

/// Prefix of every environment variable read by [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "SWITCHBOARD_CLIENT_";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    /// Bound on how long a sync call waits for its response. `None` waits
    /// forever.
    pub call_timeout: Option<Duration>,
    /// Sync calls slower than this are logged as a warning.
    pub slow_call_threshold: Option<Duration>,
    /// Workers running callbacks of callback-mode calls.
    pub callback_workers: usize,
    /// Callbacks queued before completions wait for room.
    pub callback_queue: usize,
    /// How [`Client::fixed`](crate::Client::fixed) picks among its
    /// addresses.
    pub fixed_policy: LoadBalancePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            call_timeout: None,
            slow_call_threshold: Some(Duration::from_millis(5000)),
            callback_workers: default_workers(),
            callback_queue: 1024,
            fixed_policy: LoadBalancePolicy::Random,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `SWITCHBOARD_CLIENT_{CALL_TIMEOUT_MS,
    /// SLOW_CALL_MS, CALLBACK_WORKERS, CALLBACK_QUEUE, FIXED_POLICY}` plus
    /// the pool settings under the same prefix.
    pub fn from_env() -> Self {
        let mut config = Self {
            pool: PoolConfig::from_env(ENV_PREFIX),
            ..Self::default()
        };
        let var = |name: &str| format!("{}{}", ENV_PREFIX, name);

        if let Some(timeout) = env_millis(&var("CALL_TIMEOUT_MS")) {
            config.call_timeout = Some(timeout);
        }
        if let Some(threshold) = env_millis(&var("SLOW_CALL_MS")) {
            config.slow_call_threshold = Some(threshold);
        }
        if let Some(workers) = env_parse::<usize>(&var("CALLBACK_WORKERS")) {
            config.callback_workers = workers.max(1);
        }
        if let Some(queue) = env_parse::<usize>(&var("CALLBACK_QUEUE")) {
            config.callback_queue = queue.max(1);
        }
        if let Some(policy) = env_parse::<LoadBalancePolicy>(&var("FIXED_POLICY")) {
            config.fixed_policy = policy;
        }
        config
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn slow_call_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_call_threshold = threshold;
        self
    }

    pub fn callback_workers(mut self, workers: usize) -> Self {
        self.callback_workers = workers.max(1);
        self
    }

    pub fn callback_queue(mut self, queue: usize) -> Self {
        self.callback_queue = queue.max(1);
        self
    }

    pub fn fixed_policy(mut self, policy: LoadBalancePolicy) -> Self {
        self.fixed_policy = policy;
        self
    }
}
