// tests/integration/identifier_test.rs

//! Tests for resource identifier parsing and navigation.

use lockstep::{ClusterError, ResourceId};
use std::path::PathBuf;

fn invalid(identifier: &str) -> bool {
    matches!(
        ResourceId::parse(identifier),
        Err(ClusterError::InvalidResourceIdentifier(_))
    )
}

// ===== Parsing =====

#[test]
fn test_bare_and_file_paths_are_local() {
    assert_eq!(
        ResourceId::parse("data/manifest.json").unwrap(),
        ResourceId::Local(PathBuf::from("data/manifest.json"))
    );
    assert_eq!(
        ResourceId::parse("file:///srv/data").unwrap(),
        ResourceId::Local(PathBuf::from("/srv/data"))
    );
    assert_eq!(ResourceId::parse("/tmp/x").unwrap().kind(), "local");
}

#[test]
fn test_stream_schemes() {
    assert_eq!(
        ResourceId::parse("tcp://example.org:7000").unwrap(),
        ResourceId::Tcp {
            host: "example.org".into(),
            port: 7000
        }
    );
    assert_eq!(
        ResourceId::parse("TLS://example.org:443/").unwrap(),
        ResourceId::Tls {
            host: "example.org".into(),
            port: 443
        }
    );
    assert_eq!(
        ResourceId::parse("tcp://[::1]:8080").unwrap(),
        ResourceId::Tcp {
            host: "::1".into(),
            port: 8080
        }
    );
}

#[test]
fn test_http_schemes() {
    let id = ResourceId::parse("https://example.org/data/a.txt").unwrap();
    assert_eq!(id.kind(), "http");
    assert!(id.supports_directories());
    assert_eq!(id.to_string(), "https://example.org/data/a.txt");
}

#[test]
fn test_malformed_identifiers_are_rejected() {
    assert!(invalid(""));
    assert!(invalid("   "));
    assert!(invalid("ftp://example.org/file"));
    assert!(invalid("://nothing"));
    assert!(invalid("file://"));
    assert!(invalid("tcp://example.org"));
    assert!(invalid("tcp://:80"));
    assert!(invalid("tcp://example.org:0"));
    assert!(invalid("tcp://example.org:99999"));
    assert!(invalid("tcp://example.org:80/path"));
    assert!(invalid("tls://example.org:https"));
    assert!(invalid("http://"));
}

#[test]
fn test_display_round_trips_through_parse() {
    for identifier in [
        "tcp://example.org:7000",
        "tls://[::1]:9000",
        "http://example.org/a/b.txt",
    ] {
        let id: ResourceId = identifier.parse().unwrap();
        assert_eq!(id.to_string(), identifier);
        assert_eq!(ResourceId::parse(&id.to_string()).unwrap(), id);
    }
}

// ===== Navigation =====

#[test]
fn test_join_and_parent_for_local_paths() {
    let dir = ResourceId::parse("/srv/data").unwrap();
    assert_eq!(
        dir.join("a.txt").unwrap(),
        ResourceId::Local(PathBuf::from("/srv/data/a.txt"))
    );
    assert_eq!(
        dir.parent().unwrap(),
        ResourceId::Local(PathBuf::from("/srv"))
    );
    assert_eq!(
        ResourceId::parse("relative").unwrap().parent().unwrap(),
        ResourceId::Local(PathBuf::from("."))
    );
    assert!(ResourceId::parse("/").unwrap().parent().is_err());
    assert!(dir.join("/etc/passwd").is_err());
    assert!(dir.join("").is_err());
}

#[test]
fn test_join_and_parent_for_http() {
    let dir = ResourceId::parse("http://example.org/pub/data").unwrap();
    assert_eq!(
        dir.as_directory().to_string(),
        "http://example.org/pub/data/"
    );
    assert_eq!(
        dir.join("a b.txt").unwrap().to_string(),
        "http://example.org/pub/data/a%20b.txt"
    );
    assert_eq!(
        dir.join("sub/inner.txt").unwrap().to_string(),
        "http://example.org/pub/data/sub/inner.txt"
    );
    assert_eq!(
        dir.parent().unwrap().to_string(),
        "http://example.org/pub/"
    );
    assert!(
        ResourceId::parse("http://example.org/")
            .unwrap()
            .parent()
            .is_err()
    );
}

#[test]
fn test_streams_have_no_children() {
    let stream = ResourceId::parse("tcp://example.org:7000").unwrap();
    assert!(!stream.supports_directories());
    assert!(stream.join("x").is_err());
    assert!(stream.parent().is_err());
}
