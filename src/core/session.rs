// src/core/session.rs

//! The context handle every open call goes through.
//!
//! A session ties together the node's role, the shared multiplexer, and the
//! clients the head uses to reach real resources. Pipe ids are handed out in open
//! order, which is the same on every node because every node runs the same program.

use crate::config::IoConfig;
use crate::core::ClusterError;
use crate::core::multiplexer::{ClusterEvent, Multiplexer, ReduceOp, SharedMultiplexer};
use crate::core::pipe::Pipe;
use crate::core::protocol::message::{decode_message, encode_message};
use crate::core::resource::{ClusterDirectory, ClusterFile, ResourceId};
use crate::core::role::NodeRole;
use crate::core::tls;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

struct SessionInner {
    role: NodeRole,
    node_index: Option<usize>,
    mux: SharedMultiplexer,
    next_pipe_id: AtomicU64,
    io: IoConfig,
    http: reqwest::Client,
    tls: Option<TlsConnector>,
}

/// A cheaply cloneable handle to one node's session.
#[derive(Clone)]
pub struct ClusterSession {
    inner: Arc<SessionInner>,
}

impl ClusterSession {
    /// Creates a session over a connected multiplexer.
    pub fn new(mux: Multiplexer, io: IoConfig) -> Result<Self, ClusterError> {
        Self::build(mux, io, None)
    }

    /// Like `new`, using `connector` for `tls://` resources instead of one trusting
    /// only the web PKI roots.
    pub fn with_tls_connector(
        mux: Multiplexer,
        io: IoConfig,
        connector: TlsConnector,
    ) -> Result<Self, ClusterError> {
        Self::build(mux, io, Some(connector))
    }

    fn build(
        mux: Multiplexer,
        io: IoConfig,
        tls: Option<TlsConnector>,
    ) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder()
            .user_agent(io.user_agent.clone())
            .timeout(Duration::from_secs(io.http_timeout_secs))
            .connect_timeout(Duration::from_secs(io.connect_timeout_secs))
            .build()?;
        let role = mux.role();
        let node_index = mux.node_index();
        info!(%role, ?node_index, "Cluster session started.");
        Ok(Self {
            inner: Arc::new(SessionInner {
                role,
                node_index,
                mux: Arc::new(Mutex::new(mux)),
                next_pipe_id: AtomicU64::new(1),
                io,
                http,
                tls,
            }),
        })
    }

    pub fn role(&self) -> NodeRole {
        self.inner.role
    }

    pub fn is_head(&self) -> bool {
        self.inner.role.is_head()
    }

    /// The follower ordinal, or `None` on the head.
    pub fn node_index(&self) -> Option<usize> {
        self.inner.node_index
    }

    pub fn io(&self) -> &IoConfig {
        &self.inner.io
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn tls_connector(&self) -> Result<TlsConnector, ClusterError> {
        match &self.inner.tls {
            Some(connector) => Ok(connector.clone()),
            None => tls::build_connector(None),
        }
    }

    fn allocate_pipe(&self) -> Pipe {
        let id = self.inner.next_pipe_id.fetch_add(1, Ordering::SeqCst);
        Pipe::new(
            id,
            self.inner.role,
            self.inner.mux.clone(),
            self.inner.io.record_limit_bytes,
        )
    }

    /// Opens a file, stream or HTTP resource. Parsing the identifier is purely
    /// local; a bad identifier fails on every node without any traffic.
    pub async fn open_file(&self, identifier: &str) -> Result<ClusterFile, ClusterError> {
        let id = ResourceId::parse(identifier)?;
        self.open_file_id(id).await
    }

    pub async fn open_file_id(&self, id: ResourceId) -> Result<ClusterFile, ClusterError> {
        let pipe = self.allocate_pipe();
        debug!(pipe_id = pipe.id(), "Opening file '{id}'.");
        ClusterFile::open(self, id, pipe).await
    }

    /// Opens a local directory or an HTTP index page.
    pub async fn open_directory(&self, identifier: &str) -> Result<ClusterDirectory, ClusterError> {
        let id = ResourceId::parse(identifier)?;
        self.open_directory_id(id).await
    }

    pub async fn open_directory_id(&self, id: ResourceId) -> Result<ClusterDirectory, ClusterError> {
        if !id.supports_directories() {
            return Err(ClusterError::InvalidResourceIdentifier(format!(
                "'{id}' cannot be opened as a directory"
            )));
        }
        let pipe = self.allocate_pipe();
        debug!(pipe_id = pipe.id(), "Opening directory '{id}'.");
        ClusterDirectory::open(self, id, pipe).await
    }

    /// Blocks until every live node reached this point.
    pub async fn barrier(&self) -> Result<(), ClusterError> {
        self.inner.mux.lock().await.barrier().await
    }

    /// Combines `value` across all live nodes; every node gets the result.
    pub async fn reduce(&self, value: i64, op: ReduceOp) -> Result<i64, ClusterError> {
        self.inner.mux.lock().await.reduce(value, op).await
    }

    /// A random number drawn on the head and shared with every node.
    pub async fn random_u64(&self) -> Result<u64, ClusterError> {
        let mut mux = self.inner.mux.lock().await;
        match self.inner.role {
            NodeRole::Head => {
                let mut rng = rand::rngs::SmallRng::from_entropy();
                let value: u64 = rng.r#gen();
                mux.broadcast(encode_message(&value)?).await?;
                Ok(value)
            }
            NodeRole::Follower => {
                let payload = mux.receive_broadcast().await?;
                match decode_message(&payload) {
                    Ok(value) => Ok(value),
                    Err(e) => Err(mux.poison(e.to_string())),
                }
            }
        }
    }

    /// Failure events raised since the last call. Always empty on followers.
    pub async fn events(&self) -> Vec<ClusterEvent> {
        self.inner.mux.lock().await.drain_events()
    }

    /// Ordinals of followers still receiving broadcasts.
    pub async fn live_followers(&self) -> Vec<usize> {
        self.inner.mux.lock().await.live_followers()
    }

    /// The last operation sequence number this node consumed.
    pub async fn sequence(&self) -> u64 {
        self.inner.mux.lock().await.sequence()
    }

    /// Flushes everything queued for the followers and closes the links. Resources
    /// still open fail afterwards.
    pub async fn close(&self) {
        self.inner.mux.lock().await.shutdown().await;
    }
}
