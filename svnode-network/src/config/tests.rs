use std::time::Duration;

use crate::{parameters::Network, protocol::external::types::Version};

use super::{Config, RateLimitConfig};

#[test]
fn empty_config_is_the_default() {
    svnode_test::init();

    let config: Config = toml::from_str("").expect("empty config is valid");
    assert_eq!(config, Config::default());
    assert_eq!(config.network, Network::Regtest);
    assert_eq!(config.protocol_version, Version(70_016));
    assert_eq!(config.extended_message_threshold, 0xffff_ffff);
    assert_eq!(config.max_recv_payload_length, 2 * 1024 * 1024);
    assert_eq!(config.stream_policies, "BlockPriority,Default");
    assert_eq!(config.wait_timeout, Duration::from_secs(60));
}

#[test]
fn parse_config_fields() {
    svnode_test::init();

    let config: Config = toml::from_str(
        r#"
        network = "Stn"
        protocol_version = 70015
        user_agent = "/fake:1.0/"
        start_height = 250
        extended_message_threshold = 4096
        stream_policies = "Default"
        wait_timeout = "5s"
        sync_poll_interval = "10ms"

        [send_rate_limit]
        bytes_per_window = 65536
        window = "1s"
        smoothing_fraction = 0.5
        "#,
    )
    .expect("valid config");

    assert_eq!(config.network, Network::Stn);
    assert_eq!(config.default_port(), 9333);
    assert_eq!(config.protocol_version, Version(70_015));
    assert_eq!(config.user_agent, "/fake:1.0/");
    assert_eq!(config.start_height, 250);
    assert_eq!(config.extended_message_threshold, 4096);
    assert_eq!(config.wait_timeout, Duration::from_secs(5));
    assert_eq!(config.sync_poll_interval, Duration::from_millis(10));
    assert_eq!(config.recv_rate_limit, None);

    let limit = config
        .send_rate_limit
        .as_ref()
        .expect("send limit was configured");
    assert_eq!(limit.bytes_per_window, 65536);
    assert_eq!(limit.window, Duration::from_secs(1));
    assert_eq!(limit.max_chunk_fraction, 0.1);
    assert_eq!(limit.smoothing_fraction, 0.5);

    let protoconf = config.protoconf();
    assert_eq!(protoconf.number_of_fields, 2);
    assert_eq!(protoconf.policy_names().collect::<Vec<_>>(), vec!["Default"]);
}

#[test]
fn reject_bad_configs() {
    svnode_test::init();

    let fixtures = [
        // Unknown fields are typos, not extensions.
        "wait_timout = '5s'",
        "network = 'Dogecoin'",
        "stream_policies = 'BlockPriority,Fastest'",
        "[recv_rate_limit]\nbytes_per_window = 0\nwindow = '1s'",
        "[recv_rate_limit]\nbytes_per_window = 10\nwindow = '0s'",
        "[recv_rate_limit]\nbytes_per_window = 10\nwindow = '1s'\nmax_chunk_fraction = 0.0",
        "[recv_rate_limit]\nbytes_per_window = 10\nwindow = '1s'\nsmoothing_fraction = 1.5",
        "[recv_rate_limit]\nbytes_per_window = 10\nwindow = '1s'\nburst = 3",
    ];

    for fixture in fixtures {
        assert!(
            toml::from_str::<Config>(fixture).is_err(),
            "config should be rejected: {fixture:?}"
        );
    }
}

#[test]
fn config_survives_toml() {
    svnode_test::init();

    let config = Config {
        network: Network::Testnet,
        recv_rate_limit: Some(RateLimitConfig::new(1_000_000, Duration::from_millis(250))),
        ..Config::default()
    };

    let text = toml::to_string(&config).expect("config serializes");
    let parsed: Config = toml::from_str(&text).expect("serialized config parses");
    assert_eq!(parsed, config);
}
