use std::net::SocketAddr;
use std::time::Duration;

use snafu::location;

use crate::core::detection::{ConvictThreshold, EstimationStrategy};
use crate::error::{Error, Result};

/// Default interval between two gossip rounds.
const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(1000);

/// Default interval between two heartbeats sent on every connection.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of heartbeat intervals a connection may stay silent before it is terminated.
const DEFAULT_TIMEOUT_MULTIPLIER: u32 = 10;

/// Default period all connections have to agree on a view before it is declared stable.
const DEFAULT_STABILITY_PERIOD: Duration = Duration::from_millis(2000);

/// Default silence after which an endpoint without a membership token is removed.
const DEFAULT_FAT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default silence after which a dead endpoint is purged without quarantine.
const DEFAULT_VERY_LONG_TIME: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Default capacity of the failure detector sample window.
const DEFAULT_PHI_WINDOW_SIZE: usize = 1000;

/// Default lower bound for the standard deviation used by the failure detector.
const DEFAULT_MIN_STD_DEVIATION: Duration = Duration::from_millis(500);

/// Default upper bound of endpoint states pushed in a single gossip message.
const DEFAULT_MAX_STATES_PER_MESSAGE: usize = 64;

/// Default capacity of every delivery queue between the socket reader and the workers.
const DEFAULT_DELIVERY_QUEUE_CAPACITY: usize = 1024;

/// Default number of delivery workers.
const DEFAULT_DELIVERY_WORKERS: usize = 4;

/// Default cluster identifier.
const DEFAULT_CLUSTER_ID: &str = "default";

/// Default magic number partitioning independent clusters on one network.
const DEFAULT_MAGIC: i32 = 0x6f57;

/// The buffer size for receiving new messages. Defaults to 64 KiB, the maximum UDP payload.
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 65_536;

/// Builder for creating a [`GossipConfig`] with customized settings for a gossip node.
/// Allows configuring timeouts, intervals, seeds and the stable view protocol.
#[derive(Clone, Debug)]
pub struct GossipConfigBuilder {
    seeds: Vec<String>,
    cluster_id: String,
    magic: i32,
    node_id: Option<i32>,
    has_token: bool,
    preferred_leader: bool,
    gossip_interval: Duration,
    heartbeat_interval: Duration,
    timeout_multiplier: u32,
    quiesce: Option<Duration>,
    stability_period: Duration,
    convict_threshold: f64,
    fat_client_timeout: Duration,
    quarantine_delay: Option<Duration>,
    very_long_time: Duration,
    phi_window_size: usize,
    min_std_deviation: Duration,
    bootstrap_interval: Option<Duration>,
    estimation: EstimationStrategy,
    max_states_per_message: usize,
    delivery_queue_capacity: usize,
    delivery_workers: usize,
}

impl GossipConfigBuilder {
    /// Creates a new [`GossipConfigBuilder`] with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the settings and returns a fully constructed [`GossipConfig`].
    ///
    /// Fails with [`Error::Config`] on an out of range convict threshold, a malformed
    /// seed address or inconsistent timing parameters.
    pub fn build(self) -> Result<GossipConfig> {
        let convict_threshold = ConvictThreshold::new(self.convict_threshold)?;

        let seeds = self
            .seeds
            .iter()
            .map(|seed| {
                seed.parse::<SocketAddr>().map_err(|e| Error::Config {
                    message: format!("malformed seed address '{seed}': {e}"),
                    location: location!(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if self.timeout_multiplier == 0 {
            return Err(Error::Config {
                message: "timeout multiplier must be at least 1".to_string(),
                location: location!(),
            });
        }

        let timeout = self.heartbeat_interval * self.timeout_multiplier;
        let quiesce = self.quiesce.unwrap_or(timeout * 2);
        if quiesce <= timeout {
            return Err(Error::Config {
                message: format!("quiesce period {quiesce:?} must exceed timeout {timeout:?}"),
                location: location!(),
            });
        }

        if self.phi_window_size == 0 || self.delivery_workers == 0 {
            return Err(Error::Config {
                message: "window size and delivery worker count must be positive".to_string(),
                location: location!(),
            });
        }

        let node_id = self
            .node_id
            .unwrap_or_else(|| (rand::random::<u32>() >> 1) as i32);

        Ok(GossipConfig {
            seeds,
            cluster_id: self.cluster_id,
            magic: self.magic,
            node_id,
            has_token: self.has_token,
            preferred_leader: self.preferred_leader,
            gossip_interval: self.gossip_interval,
            heartbeat_interval: self.heartbeat_interval,
            timeout,
            quiesce,
            stability_period: self.stability_period,
            convict_threshold,
            fat_client_timeout: self.fat_client_timeout,
            quarantine_delay: self
                .quarantine_delay
                .unwrap_or(self.fat_client_timeout * 2),
            very_long_time: self.very_long_time,
            phi_window_size: self.phi_window_size,
            min_std_deviation: self.min_std_deviation,
            bootstrap_interval: self
                .bootstrap_interval
                .unwrap_or(self.gossip_interval * 2),
            estimation: self.estimation,
            max_states_per_message: self.max_states_per_message.max(1),
            delivery_queue_capacity: self.delivery_queue_capacity.max(1),
            delivery_workers: self.delivery_workers,
        })
    }

    /// Sets the seed nodes contacted to bootstrap and heal the cluster.
    pub fn with_seeds<T>(mut self, seeds: T) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        self.seeds = seeds.into_iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    /// Sets the cluster identifier every gossip message is tagged with.
    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    /// Sets the magic number partitioning independent clusters sharing a network.
    pub fn with_magic(mut self, magic: i32) -> Self {
        self.magic = magic;
        self
    }

    /// Sets the node id used in views and for leader election.
    pub fn with_node_id(mut self, node_id: i32) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Sets whether this node holds a membership token. Nodes without one are fat clients.
    pub fn with_membership_token(mut self, has_token: bool) -> Self {
        self.has_token = has_token;
        self
    }

    /// Marks this node as preferred during leader election.
    pub fn with_preferred_leader(mut self, preferred_leader: bool) -> Self {
        self.preferred_leader = preferred_leader;
        self
    }

    pub fn with_gossip_interval(mut self, gossip_interval: Duration) -> Self {
        self.gossip_interval = gossip_interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets how many heartbeat intervals a connection may miss before it is terminated.
    pub fn with_timeout_multiplier(mut self, timeout_multiplier: u32) -> Self {
        self.timeout_multiplier = timeout_multiplier;
        self
    }

    /// Sets the quiescence period after a connection was terminated.
    /// Must be strictly greater than the connection timeout.
    pub fn with_quiesce(mut self, quiesce: Duration) -> Self {
        self.quiesce = Some(quiesce);
        self
    }

    pub fn with_stability_period(mut self, stability_period: Duration) -> Self {
        self.stability_period = stability_period;
        self
    }

    /// Sets the phi value above which an endpoint is convicted. Must lie in `[5, 16]`.
    pub fn with_convict_threshold(mut self, convict_threshold: f64) -> Self {
        self.convict_threshold = convict_threshold;
        self
    }

    pub fn with_fat_client_timeout(mut self, fat_client_timeout: Duration) -> Self {
        self.fat_client_timeout = fat_client_timeout;
        self
    }

    /// Sets how long a removed endpoint is quarantined. Defaults to twice the fat client timeout.
    pub fn with_quarantine_delay(mut self, quarantine_delay: Duration) -> Self {
        self.quarantine_delay = Some(quarantine_delay);
        self
    }

    pub fn with_very_long_time(mut self, very_long_time: Duration) -> Self {
        self.very_long_time = very_long_time;
        self
    }

    pub fn with_phi_window_size(mut self, phi_window_size: usize) -> Self {
        self.phi_window_size = phi_window_size;
        self
    }

    pub fn with_min_std_deviation(mut self, min_std_deviation: Duration) -> Self {
        self.min_std_deviation = min_std_deviation;
        self
    }

    /// Sets the interval assumed for an endpoint heard from exactly once.
    /// Defaults to twice the gossip interval.
    pub fn with_bootstrap_interval(mut self, bootstrap_interval: Duration) -> Self {
        self.bootstrap_interval = Some(bootstrap_interval);
        self
    }

    pub fn with_estimation(mut self, estimation: EstimationStrategy) -> Self {
        self.estimation = estimation;
        self
    }

    pub fn with_max_states_per_message(mut self, max_states_per_message: usize) -> Self {
        self.max_states_per_message = max_states_per_message;
        self
    }

    pub fn with_delivery_queue_capacity(mut self, delivery_queue_capacity: usize) -> Self {
        self.delivery_queue_capacity = delivery_queue_capacity;
        self
    }

    pub fn with_delivery_workers(mut self, delivery_workers: usize) -> Self {
        self.delivery_workers = delivery_workers;
        self
    }
}

impl Default for GossipConfigBuilder {
    fn default() -> Self {
        Self {
            seeds: vec![],
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            magic: DEFAULT_MAGIC,
            node_id: None,
            has_token: true,
            preferred_leader: false,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            quiesce: None,
            stability_period: DEFAULT_STABILITY_PERIOD,
            convict_threshold: ConvictThreshold::DEFAULT,
            fat_client_timeout: DEFAULT_FAT_CLIENT_TIMEOUT,
            quarantine_delay: None,
            very_long_time: DEFAULT_VERY_LONG_TIME,
            phi_window_size: DEFAULT_PHI_WINDOW_SIZE,
            min_std_deviation: DEFAULT_MIN_STD_DEVIATION,
            bootstrap_interval: None,
            estimation: EstimationStrategy::Mean,
            max_states_per_message: DEFAULT_MAX_STATES_PER_MESSAGE,
            delivery_queue_capacity: DEFAULT_DELIVERY_QUEUE_CAPACITY,
            delivery_workers: DEFAULT_DELIVERY_WORKERS,
        }
    }
}

/// Configuration of a gossip node, its failure detector and its stable view protocol.
#[derive(Clone, Debug)]
pub struct GossipConfig {
    seeds: Vec<SocketAddr>,
    cluster_id: String,
    magic: i32,
    node_id: i32,
    has_token: bool,
    preferred_leader: bool,
    gossip_interval: Duration,
    heartbeat_interval: Duration,
    timeout: Duration,
    quiesce: Duration,
    stability_period: Duration,
    convict_threshold: ConvictThreshold,
    fat_client_timeout: Duration,
    quarantine_delay: Duration,
    very_long_time: Duration,
    phi_window_size: usize,
    min_std_deviation: Duration,
    bootstrap_interval: Duration,
    estimation: EstimationStrategy,
    max_states_per_message: usize,
    delivery_queue_capacity: usize,
    delivery_workers: usize,
}

impl GossipConfig {
    /// Returns a new [`GossipConfigBuilder`] to construct a [`GossipConfig`].
    pub fn builder() -> GossipConfigBuilder {
        GossipConfigBuilder::new()
    }

    pub fn seeds(&self) -> &[SocketAddr] {
        &self.seeds
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn magic(&self) -> i32 {
        self.magic
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn has_token(&self) -> bool {
        self.has_token
    }

    pub fn preferred_leader(&self) -> bool {
        self.preferred_leader
    }

    pub fn gossip_interval(&self) -> Duration {
        self.gossip_interval
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the connection timeout, the heartbeat interval times the timeout multiplier.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn quiesce(&self) -> Duration {
        self.quiesce
    }

    pub fn stability_period(&self) -> Duration {
        self.stability_period
    }

    pub fn convict_threshold(&self) -> ConvictThreshold {
        self.convict_threshold
    }

    pub fn fat_client_timeout(&self) -> Duration {
        self.fat_client_timeout
    }

    pub fn quarantine_delay(&self) -> Duration {
        self.quarantine_delay
    }

    pub fn very_long_time(&self) -> Duration {
        self.very_long_time
    }

    pub fn phi_window_size(&self) -> usize {
        self.phi_window_size
    }

    pub fn min_std_deviation(&self) -> Duration {
        self.min_std_deviation
    }

    pub fn bootstrap_interval(&self) -> Duration {
        self.bootstrap_interval
    }

    pub fn estimation(&self) -> EstimationStrategy {
        self.estimation
    }

    pub fn max_states_per_message(&self) -> usize {
        self.max_states_per_message
    }

    pub fn delivery_queue_capacity(&self) -> usize {
        self.delivery_queue_capacity
    }

    pub fn delivery_workers(&self) -> usize {
        self.delivery_workers
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::api::config::{DEFAULT_CLUSTER_ID, DEFAULT_HEARTBEAT_INTERVAL};
    use crate::error::Error;

    use super::GossipConfig;

    #[test]
    fn test_gossip_config_builder() {
        let config = GossipConfig::builder()
            .with_seeds(["127.0.0.1:8080"])
            .with_gossip_interval(Duration::from_millis(200))
            .with_node_id(7)
            .build()
            .unwrap();

        assert_eq!(config.seeds()[0].to_string(), "127.0.0.1:8080");
        assert_eq!(config.node_id(), 7);
        assert_eq!(config.cluster_id(), DEFAULT_CLUSTER_ID);
        assert_eq!(config.heartbeat_interval(), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.timeout(), DEFAULT_HEARTBEAT_INTERVAL * 10);
        assert_eq!(config.quiesce(), config.timeout() * 2);
        assert_eq!(config.quarantine_delay(), config.fat_client_timeout() * 2);
        assert_eq!(config.bootstrap_interval(), Duration::from_millis(400));
    }

    #[test]
    fn test_gossip_config_rejects_convict_threshold_out_of_range() {
        for threshold in [4.99, 16.01, f64::NAN] {
            let result = GossipConfig::builder()
                .with_convict_threshold(threshold)
                .build();
            assert!(matches!(result, Err(Error::Config { .. })));
        }

        for threshold in [5.0, 16.0] {
            let result = GossipConfig::builder()
                .with_convict_threshold(threshold)
                .build();
            assert!(result.is_ok());
        }
    }

    #[test]
    fn test_gossip_config_rejects_malformed_seed() {
        let result = GossipConfig::builder()
            .with_seeds(["127.0.0.1:8080", "not-an-address"])
            .build();

        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_gossip_config_rejects_quiesce_not_exceeding_timeout() {
        let result = GossipConfig::builder()
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_timeout_multiplier(5)
            .with_quiesce(Duration::from_millis(500))
            .build();

        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
