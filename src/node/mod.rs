// src/node/mod.rs

//! Brings a node into its group: the head listens for its followers, each
//! follower connects to the head, and both end up with a `ClusterSession`.

pub mod handshake;
pub mod metrics_server;
pub mod stream;

use crate::config::{ClusterConfig, Config};
use crate::core::tls;
use crate::core::{ClusterSession, Multiplexer};
use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Establishes every link described by `config` and returns the node's session.
pub async fn establish(config: &Config) -> Result<ClusterSession> {
    // Also used for `tls://` resources, so extra roots apply even without link TLS.
    let connector = if config.tls.enabled || config.tls.ca_path.is_some() {
        Some(tls::build_connector(config.tls.ca_path.as_deref())?)
    } else {
        None
    };

    let mux = match &config.cluster {
        ClusterConfig::Head {
            bind,
            followers,
            accept_timeout_secs,
        } => {
            let acceptor = if config.tls.enabled {
                info!("TLS is enabled. Loading certificate and key.");
                Some(tls::build_acceptor(&config.tls.cert_path, &config.tls.key_path)?)
            } else {
                None
            };
            let listener = TcpListener::bind(bind.as_str())
                .await
                .with_context(|| format!("Failed to bind cluster listener on '{bind}'"))?;
            info!(
                "Head listening on {} for {followers} follower(s).",
                listener.local_addr()?
            );
            let links = handshake::accept_followers(
                &listener,
                *followers,
                acceptor,
                Duration::from_secs(*accept_timeout_secs),
            )
            .await?;
            Multiplexer::head_from_framed(links, &config.io)
        }
        ClusterConfig::Follower {
            head_address,
            node_index,
            connect_timeout_secs,
        } => {
            let tls = match (&connector, config.tls.enabled) {
                (Some(connector), true) => {
                    let name = match &config.tls.server_name {
                        Some(name) => name.clone(),
                        None => host_of(head_address)?,
                    };
                    Some((connector.clone(), tls::server_name(&name)?))
                }
                _ => None,
            };
            let framed = handshake::connect_to_head(
                head_address,
                *node_index,
                tls,
                Duration::from_secs(*connect_timeout_secs),
            )
            .await
            .with_context(|| format!("Failed to join the group through '{head_address}'"))?;
            Multiplexer::follower_from_framed(*node_index, framed, &config.io)
        }
    };

    let session = match connector {
        Some(connector) => ClusterSession::with_tls_connector(mux, config.io.clone(), connector)?,
        None => ClusterSession::new(mux, config.io.clone())?,
    };
    Ok(session)
}

/// The host part of a `host:port` address, without IPv6 brackets.
fn host_of(address: &str) -> Result<String> {
    let (host, _) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("'{address}' is not of the form host:port"))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}
