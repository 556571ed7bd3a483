// tests/integration/test_helpers.rs

//! Test helpers: in-process groups whose links are `tokio::io::duplex` pairs.

#![allow(dead_code)]

use lockstep::config::IoConfig;
use lockstep::{ClusterSession, Multiplexer};
use std::future::Future;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_rustls::TlsConnector;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Upper bound for any single node program; a hang fails the test instead of blocking it.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

pub fn init_tracing() {
    // Initialize tracing (ignore error if already initialized)
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// I/O settings with small chunks so multi-chunk paths get exercised.
pub fn test_io_config() -> IoConfig {
    IoConfig {
        chunk_size: 4 * 1024,
        queue_capacity: 16,
        reorder_window: 8,
        ..IoConfig::default()
    }
}

/// A head multiplexer and its followers, wired in memory.
pub fn mux_group(followers: usize, io: &IoConfig) -> (Multiplexer, Vec<Multiplexer>) {
    let mut head_ends = Vec::with_capacity(followers);
    let mut follower_muxes = Vec::with_capacity(followers);
    for index in 0..followers {
        let (head_end, follower_end) = tokio::io::duplex(DUPLEX_CAPACITY);
        head_ends.push(head_end);
        follower_muxes.push(Multiplexer::follower_from_stream(index, follower_end, io));
    }
    (Multiplexer::head_from_streams(head_ends, io), follower_muxes)
}

/// A follower multiplexer whose head end is left to the test to drive by hand.
pub fn lone_follower(io: &IoConfig) -> (Multiplexer, DuplexStream) {
    let (head_end, follower_end) = tokio::io::duplex(DUPLEX_CAPACITY);
    (Multiplexer::follower_from_stream(0, follower_end, io), head_end)
}

/// A whole group of sessions running in one process.
pub struct TestCluster {
    pub head: ClusterSession,
    pub followers: Vec<ClusterSession>,
}

impl TestCluster {
    pub fn new(followers: usize) -> Self {
        Self::with_io(followers, test_io_config())
    }

    pub fn with_io(followers: usize, io: IoConfig) -> Self {
        init_tracing();
        let (head, followers) = mux_group(followers, &io);
        Self {
            head: ClusterSession::new(head, io.clone()).expect("head session"),
            followers: followers
                .into_iter()
                .map(|mux| ClusterSession::new(mux, io.clone()).expect("follower session"))
                .collect(),
        }
    }

    /// Sessions whose `tls://` resources trust `connector`'s roots.
    pub fn with_tls_connector(followers: usize, connector: TlsConnector) -> Self {
        init_tracing();
        let io = test_io_config();
        let (head, followers) = mux_group(followers, &io);
        Self {
            head: ClusterSession::with_tls_connector(head, io.clone(), connector.clone())
                .expect("head session"),
            followers: followers
                .into_iter()
                .map(|mux| {
                    ClusterSession::with_tls_connector(mux, io.clone(), connector.clone())
                        .expect("follower session")
                })
                .collect(),
        }
    }

    /// Every session, head first, then followers by ordinal.
    pub fn nodes(&self) -> Vec<ClusterSession> {
        std::iter::once(self.head.clone())
            .chain(self.followers.iter().cloned())
            .collect()
    }

    /// Runs the same program on every node concurrently, as a real group would.
    /// Results come back head first, then followers by ordinal.
    pub async fn run<F, Fut, T>(&self, program: F) -> Vec<T>
    where
        F: Fn(ClusterSession) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = self
            .nodes()
            .into_iter()
            .map(|session| tokio::spawn(program(session)))
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = tokio::time::timeout(TEST_TIMEOUT, handle)
                .await
                .expect("node program timed out")
                .expect("node program panicked");
            results.push(result);
        }
        results
    }
}

/// Asserts every node produced the same value and returns it.
pub fn assert_all_equal<T: PartialEq + std::fmt::Debug + Clone>(results: &[T]) -> T {
    let first = results.first().expect("at least one node").clone();
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result, &first, "node {index} diverged from the head");
    }
    first
}
