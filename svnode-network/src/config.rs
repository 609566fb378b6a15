use std::time::Duration;

use serde::{de, Deserialize, Deserializer};

use crate::{
    association::policy_by_name,
    constants,
    parameters::Network,
    protocol::external::{types::Version, Protoconf},
};

/// Configuration for the protocol engine.
///
/// Every field has a default, so an empty TOML document is a usable regtest
/// configuration.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Config {
    /// The network to connect to. Selects the message magic and the default
    /// port.
    pub network: Network,

    /// The protocol version advertised in our `version` messages.
    ///
    /// Each connection speaks the lower of this and the peer's version once
    /// the handshake completes.
    pub protocol_version: Version,

    /// The user agent advertised in our `version` messages.
    pub user_agent: String,

    /// The best block height advertised in our `version` messages.
    pub start_height: i32,

    /// Whether our `version` messages ask the node to relay transactions.
    pub relay: bool,

    /// The largest payload accepted or sent in one frame.
    pub max_payload_len: usize,

    /// Payloads at least this long are sent with `extmsg` framing.
    ///
    /// Values above `0xffff_ffff` behave like `0xffff_ffff`, because a legacy
    /// header can't carry a longer length.
    pub extended_message_threshold: u64,

    /// The `max_recv_payload_length` advertised in our `protoconf`.
    pub max_recv_payload_length: u32,

    /// The comma-separated stream policy names advertised in our `protoconf`,
    /// most preferred first.
    pub stream_policies: String,

    /// Throttles bytes written to each connection.
    pub send_rate_limit: Option<RateLimitConfig>,

    /// Throttles bytes read from each connection.
    pub recv_rate_limit: Option<RateLimitConfig>,

    /// How long test threads wait for a condition before giving up.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// How long the reactor waits for an outbound TCP connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How often a ping synchronisation re-checks the node's activity
    /// counter.
    #[serde(with = "humantime_serde")]
    pub sync_poll_interval: Duration,
}

impl Config {
    /// Returns the `protoconf` message we send after a `verack`.
    pub fn protoconf(&self) -> Protoconf {
        Protoconf::new(self.max_recv_payload_length, &self.stream_policies)
    }

    /// Returns the default port of the configured network.
    pub fn default_port(&self) -> u16 {
        self.network.default_port()
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            network: Network::Regtest,
            protocol_version: constants::CURRENT_NETWORK_PROTOCOL_VERSION,
            user_agent: constants::USER_AGENT.to_string(),
            start_height: 0,
            relay: true,
            max_payload_len: svnode_chain::serialization::MAX_PROTOCOL_MESSAGE_LEN,
            extended_message_threshold: constants::DEFAULT_EXTENDED_MESSAGE_THRESHOLD,
            max_recv_payload_length: constants::DEFAULT_MAX_RECV_PAYLOAD_LENGTH,
            stream_policies: constants::DEFAULT_STREAM_POLICIES.to_string(),
            send_rate_limit: None,
            recv_rate_limit: None,
            wait_timeout: constants::DEFAULT_WAIT_TIMEOUT,
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            sync_poll_interval: constants::DEFAULT_SYNC_POLL_INTERVAL,
        }
    }
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields, default)]
        struct DConfig {
            network: Network,
            protocol_version: Version,
            user_agent: String,
            start_height: i32,
            relay: bool,
            max_payload_len: usize,
            extended_message_threshold: u64,
            max_recv_payload_length: u32,
            stream_policies: String,
            send_rate_limit: Option<RateLimitConfig>,
            recv_rate_limit: Option<RateLimitConfig>,
            #[serde(with = "humantime_serde")]
            wait_timeout: Duration,
            #[serde(with = "humantime_serde")]
            connect_timeout: Duration,
            #[serde(with = "humantime_serde")]
            sync_poll_interval: Duration,
        }

        impl Default for DConfig {
            fn default() -> Self {
                let config = Config::default();
                Self {
                    network: config.network,
                    protocol_version: config.protocol_version,
                    user_agent: config.user_agent,
                    start_height: config.start_height,
                    relay: config.relay,
                    max_payload_len: config.max_payload_len,
                    extended_message_threshold: config.extended_message_threshold,
                    max_recv_payload_length: config.max_recv_payload_length,
                    stream_policies: config.stream_policies,
                    send_rate_limit: config.send_rate_limit,
                    recv_rate_limit: config.recv_rate_limit,
                    wait_timeout: config.wait_timeout,
                    connect_timeout: config.connect_timeout,
                    sync_poll_interval: config.sync_poll_interval,
                }
            }
        }

        let config = DConfig::deserialize(deserializer)?;

        for name in config.stream_policies.split(',') {
            if policy_by_name(name.trim()).is_none() {
                return Err(de::Error::custom(format!(
                    "unknown stream policy {name:?}; Hint: known policies are \"BlockPriority\" and \"Default\""
                )));
            }
        }
        for limit in config
            .send_rate_limit
            .iter()
            .chain(config.recv_rate_limit.iter())
        {
            limit.validate().map_err(de::Error::custom)?;
        }

        Ok(Config {
            network: config.network,
            protocol_version: config.protocol_version,
            user_agent: config.user_agent,
            start_height: config.start_height,
            relay: config.relay,
            max_payload_len: config.max_payload_len,
            extended_message_threshold: config.extended_message_threshold,
            max_recv_payload_length: config.max_recv_payload_length,
            stream_policies: config.stream_policies,
            send_rate_limit: config.send_rate_limit,
            recv_rate_limit: config.recv_rate_limit,
            wait_timeout: config.wait_timeout,
            connect_timeout: config.connect_timeout,
            sync_poll_interval: config.sync_poll_interval,
        })
    }
}

/// Throughput limits for one direction of a connection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// The most bytes moved in any `window`.
    pub bytes_per_window: u64,

    /// The length of the sliding measurement window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// The largest single read or write, as a fraction of `bytes_per_window`.
    #[serde(default = "RateLimitConfig::default_max_chunk_fraction")]
    pub max_chunk_fraction: f64,

    /// After each read or write, pause for this fraction of the time the
    /// transfer would take at the configured rate. `0.0` disables the pause.
    #[serde(default)]
    pub smoothing_fraction: f64,
}

impl RateLimitConfig {
    /// Returns a limit of `bytes_per_window` bytes per `window`, with the
    /// default chunk cap and no smoothing.
    pub fn new(bytes_per_window: u64, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            bytes_per_window,
            window,
            max_chunk_fraction: Self::default_max_chunk_fraction(),
            smoothing_fraction: 0.0,
        }
    }

    fn default_max_chunk_fraction() -> f64 {
        0.1
    }

    fn validate(&self) -> Result<(), String> {
        if self.bytes_per_window == 0 {
            return Err("rate limit bytes_per_window must be positive".to_string());
        }
        if self.window.is_zero() {
            return Err("rate limit window must be positive".to_string());
        }
        if !(self.max_chunk_fraction > 0.0 && self.max_chunk_fraction <= 1.0) {
            return Err(format!(
                "rate limit max_chunk_fraction must be in (0, 1], got {}",
                self.max_chunk_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_fraction) {
            return Err(format!(
                "rate limit smoothing_fraction must be in [0, 1], got {}",
                self.smoothing_fraction
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
