// tests/integration/config_test.rs

//! Tests for loading and validating node configuration.

use lockstep::NodeRole;
use lockstep::config::{ClusterConfig, Config};
use std::io::Write;

#[test]
fn test_empty_config_is_a_single_node_head() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.role(), NodeRole::Head);
    assert_eq!(config.log_level, "info");
    match config.cluster {
        ClusterConfig::Head {
            bind, followers, ..
        } => {
            assert_eq!(bind, "0.0.0.0:7400");
            assert_eq!(followers, 0);
        }
        other => panic!("expected a head config, got {other:?}"),
    }
    assert_eq!(config.io.chunk_size, 64 * 1024);
    assert!(!config.tls.enabled);
    assert!(!config.metrics.enabled);
}

#[test]
fn test_head_config_with_sizes() {
    let config = Config::from_toml_str(
        r#"
log_level = "debug"

[cluster]
role = "head"
bind = "127.0.0.1:9000"
followers = 3
accept_timeout_secs = 5

[io]
chunk_size = "128kb"
record_limit = "2mb"
queue_capacity = 32

[metrics]
enabled = true
port = 9100
"#,
    )
    .unwrap();

    assert_eq!(config.role(), NodeRole::Head);
    assert_eq!(config.io.chunk_size, 128 * 1024);
    assert_eq!(config.io.record_limit_bytes, 2 * 1024 * 1024);
    assert_eq!(config.io.queue_capacity, 32);
    assert_eq!(config.io.reorder_window, 64);
    assert_eq!(config.metrics.port, 9100);
    assert!(matches!(
        config.cluster,
        ClusterConfig::Head {
            followers: 3,
            accept_timeout_secs: 5,
            ..
        }
    ));
}

#[test]
fn test_binary_size_units_are_accepted() {
    let config = Config::from_toml_str(
        r#"
[io]
chunk_size = "4KiB"
record_limit = "3 MiB"
"#,
    )
    .unwrap();
    assert_eq!(config.io.chunk_size, 4 * 1024);
    assert_eq!(config.io.record_limit_bytes, 3 * 1024 * 1024);

    let config = Config::from_toml_str("[io]\nrecord_limit = \"1gib\"\n").unwrap();
    assert_eq!(config.io.record_limit_bytes, 1024 * 1024 * 1024);
}

#[test]
fn test_follower_config() {
    let config = Config::from_toml_str(
        r#"
[cluster]
role = "follower"
head_address = "10.0.0.1:7400"
node_index = 2

[tls]
enabled = true
server_name = "head.internal"

[io]
chunk_size = 4096
"#,
    )
    .unwrap();

    assert_eq!(config.role(), NodeRole::Follower);
    assert_eq!(config.io.chunk_size, 4096);
    assert_eq!(config.tls.server_name.as_deref(), Some("head.internal"));
    match config.cluster {
        ClusterConfig::Follower {
            head_address,
            node_index,
            connect_timeout_secs,
        } => {
            assert_eq!(head_address, "10.0.0.1:7400");
            assert_eq!(node_index, 2);
            assert_eq!(connect_timeout_secs, 60);
        }
        other => panic!("expected a follower config, got {other:?}"),
    }
}

#[test]
fn test_invalid_configs_are_rejected() {
    let cases = [
        // Follower without a head address.
        "[cluster]\nrole = \"follower\"\nnode_index = 0\n",
        "[cluster]\nrole = \"follower\"\nhead_address = \" \"\nnode_index = 0\n",
        "[cluster]\nrole = \"observer\"\n",
        "[io]\nchunk_size = 0\n",
        "[io]\nchunk_size = \"lots\"\n",
        "[io]\nchunk_size = \"1gb\"\n",
        "[io]\nqueue_capacity = 0\n",
        "[io]\nreorder_window = 0\n",
        "[metrics]\nenabled = true\nport = 0\n",
        "not toml at all [",
    ];
    for case in cases {
        assert!(
            Config::from_toml_str(case).is_err(),
            "config should be rejected:\n{case}"
        );
    }
}

#[test]
fn test_zero_record_limit_disables_rewind_but_is_valid() {
    let config = Config::from_toml_str("[io]\nrecord_limit = 0\n").unwrap();
    assert_eq!(config.io.record_limit_bytes, 0);
}

#[test]
fn test_from_file_reports_missing_file() {
    let err = Config::from_file("/definitely/not/here/lockstep.toml").unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here/lockstep.toml"));
}

#[test]
fn test_from_file_reads_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[cluster]\nrole = \"head\"\nfollowers = 1").unwrap();
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(matches!(
        config.cluster,
        ClusterConfig::Head { followers: 1, .. }
    ));
}
