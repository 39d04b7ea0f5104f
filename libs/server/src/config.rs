use switchboard_core::config::env_parse;
use switchboard_core::worker::default_workers;
use switchboard_fabric::frame::{DEFAULT_MAX_FRAME_SIZE, FRAME_SIZE_LIMIT};

/// Prefix of every environment variable read by [`ServerConfig::from_env`].
pub const ENV_PREFIX: &str = "SWITCHBOARD_SERVER_";

const DEFAULT_QUEUE: usize = 1024;

/// Where decoded requests are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// On the connection's own task; a slow method holds up the requests
    /// behind it on that connection.
    #[default]
    Inline,
    /// On a bounded worker pool shared by all connections.
    Offload { workers: usize, queue: usize },
}

impl DispatchPolicy {
    /// Offload with the default worker count and queue size.
    pub fn offload() -> Self {
        Self::Offload {
            workers: default_workers(),
            queue: DEFAULT_QUEUE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local `host:port` to listen on.
    pub bind: String,
    /// Address announced to the registry. Defaults to the bound address.
    pub advertise: Option<String>,
    /// Process name used for node registration.
    pub name: String,
    pub weight: u32,
    pub dispatch: DispatchPolicy,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9000".to_string(),
            advertise: None,
            name: "provider".to_string(),
            weight: 1,
            dispatch: DispatchPolicy::Inline,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `SWITCHBOARD_SERVER_{BIND, ADVERTISE, NAME,
    /// WEIGHT, WORKERS, QUEUE, MAX_FRAME_SIZE}`. Setting `WORKERS` switches
    /// dispatch to [`DispatchPolicy::Offload`].
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let var = |name: &str| format!("{}{}", ENV_PREFIX, name);

        if let Some(bind) = env_parse::<String>(&var("BIND")) {
            config.bind = bind;
        }
        if let Some(advertise) = env_parse::<String>(&var("ADVERTISE")) {
            config.advertise = Some(advertise);
        }
        if let Some(name) = env_parse::<String>(&var("NAME")) {
            config.name = name;
        }
        if let Some(weight) = env_parse::<u32>(&var("WEIGHT")) {
            config.weight = weight.max(1);
        }
        if let Some(workers) = env_parse::<usize>(&var("WORKERS")) {
            let queue = env_parse::<usize>(&var("QUEUE")).unwrap_or(DEFAULT_QUEUE);
            config.dispatch = DispatchPolicy::Offload { workers, queue };
        }
        if let Some(size) = env_parse::<usize>(&var("MAX_FRAME_SIZE")) {
            config.max_frame_size = size.min(FRAME_SIZE_LIMIT);
        }
        config
    }

    pub fn advertise(mut self, address: impl Into<String>) -> Self {
        self.advertise = Some(address.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(FRAME_SIZE_LIMIT);
        self
    }
}
