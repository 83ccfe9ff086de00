use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Lock store backend configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store (replicas must live in this process)
    #[default]
    Memory,

    /// SQLite file shared by all replicas on this host
    Sqlite {
        #[serde(default = "default_lock_db_path")]
        path: PathBuf,
    },
}

/// Pub/sub broker configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BrokerConfig {
    /// In-process broker (payloads only come from mock injection)
    #[default]
    Memory,

    /// MQTT broker, channel names are topics
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_client_id")]
        client_id: String,
        #[serde(default = "default_keep_alive_secs")]
        keep_alive_secs: u64,
    },
}

/// Host database used by the host cache and the snapshot analyzer
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostsConfig {
    #[serde(default = "default_hosts_db_path")]
    pub path: PathBuf,

    /// Seconds between two full cache rebuilds
    #[serde(default = "default_cache_refresh_secs")]
    pub refresh_interval_secs: u64,
}

/// Debug HTTP server (mock injection, stats)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DebugApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: SocketAddr,
    pub auth_token: Option<String>,
}

/// Which analyzer a porter feeds its messages to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    /// Host resource snapshots, resolved through the host cache
    Snapshot,
    /// Validate and log JSON payloads only
    Log,
}

/// Tunables shared by all porters unless a porter overrides them
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PorterDefaults {
    pub batch_size: usize,
    /// Dispatch queue capacity is `dispatch_factor * batch_size`
    pub dispatch_factor: usize,
    /// Worker count, defaults to the number of available CPUs
    pub workers: Option<usize>,
    pub receive_timeout_secs: u64,
    pub election_interval_secs: u64,
    pub lock_ttl_secs: u64,
    pub retry_delay_secs: u64,
    /// Items dropped from the dispatch queue when both queues are saturated
    pub evict_count: usize,
    /// In-process buffer in front of the overflow queue
    pub overflow_buffer: usize,
    /// Overflow queue length beyond which the whole backlog is purged
    pub overflow_cap: usize,
    pub overflow_pop_timeout_secs: u64,
    pub health_interval_secs: u64,
    pub channel_empty_after_secs: u64,
    /// Queue saturation (len / capacity) that counts towards a worker reset
    pub reset_threshold: f64,
    /// Consecutive saturated samples before a reset is broadcast
    pub reset_after: usize,
    pub reset_check_interval_secs: u64,
}

impl Default for PorterDefaults {
    fn default() -> Self {
        Self {
            batch_size: 200,
            dispatch_factor: 4,
            workers: None,
            receive_timeout_secs: 10,
            election_interval_secs: 10,
            lock_ttl_secs: 30,
            retry_delay_secs: 3,
            evict_count: 200,
            overflow_buffer: 1000,
            overflow_cap: 100_000,
            overflow_pop_timeout_secs: 30,
            health_interval_secs: 60,
            channel_empty_after_secs: 60,
            reset_threshold: 0.95,
            reset_after: 3,
            reset_check_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PorterConfig {
    pub name: String,
    pub channels: Vec<String>,
    pub analyzer: AnalyzerKind,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub overflow_cap: Option<usize>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Prefix of every lock store key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    pub hosts: Option<HostsConfig>,

    pub api: Option<DebugApiConfig>,

    #[serde(default)]
    pub defaults: PorterDefaults,

    pub porters: Vec<PorterConfig>,
}

/// Fully resolved settings of one porter, with defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedPorterConfig {
    pub name: String,
    pub channels: Vec<String>,
    pub namespace: String,
    pub batch_size: usize,
    pub dispatch_capacity: usize,
    pub workers: usize,
    pub receive_timeout: Duration,
    pub election_interval: Duration,
    pub lock_ttl: Duration,
    pub retry_delay: Duration,
    pub evict_count: usize,
    pub overflow_buffer: usize,
    pub overflow_cap: usize,
    pub overflow_pop_timeout: Duration,
    pub health_interval: Duration,
    pub channel_empty_after: Duration,
    pub reset_threshold: f64,
    pub reset_after: usize,
    pub reset_check_interval: Duration,
}

impl ResolvedPorterConfig {
    /// Settings for a porter using only built-in defaults
    pub fn new(name: impl Into<String>, channels: Vec<String>) -> Self {
        PorterDefaults::default().resolve(&default_namespace(), name.into(), channels, None, None, None)
    }
}

impl PorterDefaults {
    fn resolve(
        &self,
        namespace: &str,
        name: String,
        channels: Vec<String>,
        batch_size: Option<usize>,
        workers: Option<usize>,
        overflow_cap: Option<usize>,
    ) -> ResolvedPorterConfig {
        let batch_size = batch_size.unwrap_or(self.batch_size);
        let workers = workers.or(self.workers).unwrap_or_else(default_workers);

        ResolvedPorterConfig {
            name,
            channels,
            namespace: namespace.to_string(),
            batch_size,
            dispatch_capacity: batch_size * self.dispatch_factor,
            workers,
            receive_timeout: Duration::from_secs(self.receive_timeout_secs),
            election_interval: Duration::from_secs(self.election_interval_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            evict_count: self.evict_count,
            overflow_buffer: self.overflow_buffer,
            overflow_cap: overflow_cap.unwrap_or(self.overflow_cap),
            overflow_pop_timeout: Duration::from_secs(self.overflow_pop_timeout_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
            channel_empty_after: Duration::from_secs(self.channel_empty_after_secs),
            reset_threshold: self.reset_threshold,
            reset_after: self.reset_after,
            reset_check_interval: Duration::from_secs(self.reset_check_interval_secs),
        }
    }
}

impl Config {
    /// Resolve every porter against the shared defaults
    pub fn resolve_porters(&self) -> Vec<(ResolvedPorterConfig, AnalyzerKind)> {
        self.porters
            .iter()
            .map(|porter| {
                let resolved = self.defaults.resolve(
                    &self.namespace,
                    porter.name.clone(),
                    porter.channels.clone(),
                    porter.batch_size,
                    porter.workers,
                    porter.overflow_cap,
                );
                (resolved, porter.analyzer)
            })
            .collect()
    }

    /// Reject configurations the collector cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.porters.is_empty() {
            anyhow::bail!("at least one porter must be configured");
        }

        let mut names = HashSet::new();
        for porter in &self.porters {
            if !names.insert(porter.name.as_str()) {
                anyhow::bail!("duplicate porter name '{}'", porter.name);
            }
            if porter.channels.is_empty() {
                anyhow::bail!("porter '{}' has no channels", porter.name);
            }
            if porter.analyzer == AnalyzerKind::Snapshot && self.hosts.is_none() {
                anyhow::bail!(
                    "porter '{}' uses the snapshot analyzer but no hosts database is configured",
                    porter.name
                );
            }
            for (field, value) in [
                ("batch_size", porter.batch_size),
                ("workers", porter.workers),
                ("overflow_cap", porter.overflow_cap),
            ] {
                if value == Some(0) {
                    anyhow::bail!("porter '{}': {field} must be positive", porter.name);
                }
            }
        }

        if let Some(hosts) = &self.hosts {
            if hosts.refresh_interval_secs == 0 {
                anyhow::bail!("hosts.refresh_interval_secs must be positive");
            }
        }

        let defaults = &self.defaults;
        if defaults.batch_size == 0 || defaults.dispatch_factor == 0 {
            anyhow::bail!("batch_size and dispatch_factor must be positive");
        }
        if defaults.workers == Some(0) {
            anyhow::bail!("workers must be positive");
        }
        if defaults.evict_count == 0 || defaults.overflow_buffer == 0 || defaults.overflow_cap == 0 {
            anyhow::bail!("evict_count, overflow_buffer and overflow_cap must be positive");
        }
        for (field, secs) in [
            ("receive_timeout_secs", defaults.receive_timeout_secs),
            ("election_interval_secs", defaults.election_interval_secs),
            ("retry_delay_secs", defaults.retry_delay_secs),
            ("overflow_pop_timeout_secs", defaults.overflow_pop_timeout_secs),
            ("health_interval_secs", defaults.health_interval_secs),
            ("channel_empty_after_secs", defaults.channel_empty_after_secs),
            ("reset_check_interval_secs", defaults.reset_check_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{field} must be positive");
            }
        }
        if !(defaults.reset_threshold > 0.0 && defaults.reset_threshold <= 1.0) {
            anyhow::bail!("reset_threshold must be within (0, 1]");
        }
        if defaults.lock_ttl_secs <= defaults.election_interval_secs {
            anyhow::bail!("lock_ttl_secs must exceed election_interval_secs");
        }

        Ok(())
    }
}

fn default_namespace() -> String {
    String::from("telemetry_porter:")
}

fn default_lock_db_path() -> PathBuf {
    PathBuf::from("./porter-lock.db")
}

fn default_hosts_db_path() -> PathBuf {
    PathBuf::from("./cmdb.db")
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    String::from("telemetry-porter")
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_cache_refresh_secs() -> u64 {
    600
}

fn default_api_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8089))
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
