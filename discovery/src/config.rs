use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::Deserialize;

use crate::registry::MAX_LIFETIME;

/// Well-known SSDP multicast group
pub const SSDP_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// Well-known SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Search target matching every device on the network
pub const SEARCH_ALL: &str = "ssdp:all";

/// Configuration for discovery timing and addressing.
///
/// Durations are read from config files as milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// ST header of discovery requests; also filters incoming notifications
    pub search_target: String,
    /// MX header: how long devices may wait before answering, in seconds
    pub max_wait_secs: u8,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    /// Number of sends per discovery burst
    pub burst_count: u32,
    #[serde(with = "millis")]
    pub burst_interval: Duration,
    /// Offsets from start at which bursts are issued
    #[serde(with = "millis_list")]
    pub burst_delays: Vec<Duration>,
    /// How long a burst socket listens for search responses
    #[serde(with = "millis")]
    pub search_socket_timeout: Duration,
    /// Staleness window after which a device is dropped and re-queried
    #[serde(with = "millis")]
    pub max_lifetime: Duration,
    /// Timeout for description fetches
    #[serde(with = "millis")]
    pub http_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_target: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            max_wait_secs: 2,
            multicast_group: SSDP_MULTICAST_GROUP,
            multicast_port: SSDP_PORT,
            burst_count: 4,
            burst_interval: Duration::from_millis(500),
            burst_delays: vec![
                Duration::ZERO,
                Duration::from_secs(3),
                Duration::from_secs(10),
            ],
            search_socket_timeout: Duration::from_secs(30),
            max_lifetime: MAX_LIFETIME,
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl DiscoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the search target
    pub fn with_search_target(mut self, target: impl Into<String>) -> Self {
        self.search_target = target.into();
        self
    }

    /// Set the decay window
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    /// Multicast group and port as a send target
    pub fn multicast_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_group, self.multicast_port))
    }

    /// Whether a notification type should be handled under this search target
    pub fn accepts(&self, notification_type: Option<&str>) -> bool {
        self.search_target == SEARCH_ALL
            || notification_type.is_some_and(|nt| nt.eq_ignore_ascii_case(&self.search_target))
    }

    /// Validate the configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.search_target.trim().is_empty() {
            return Err("search_target must not be empty".to_string());
        }

        if !(1..=5).contains(&self.max_wait_secs) {
            return Err(format!(
                "max_wait_secs must be between 1 and 5, got {}",
                self.max_wait_secs
            ));
        }

        if !self.multicast_group.is_multicast() {
            return Err(format!("{} is not a multicast address", self.multicast_group));
        }

        if self.burst_count == 0 {
            return Err("burst_count must be greater than 0".to_string());
        }

        if self.burst_delays.is_empty() {
            return Err("burst_delays must schedule at least one burst".to_string());
        }

        if self.search_socket_timeout.is_zero() {
            return Err("search_socket_timeout must be greater than 0".to_string());
        }

        if self.max_lifetime.is_zero() {
            return Err("max_lifetime must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_list {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<u64>::deserialize(deserializer)?;
        Ok(values.into_iter().map(Duration::from_millis).collect())
    }
}
