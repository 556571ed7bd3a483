// tests/integration/tls_stream_test.rs

//! Integration tests for `tls://` streams: the head performs the handshake and
//! the exchange, followers replay it.

use super::test_helpers::{TestCluster, assert_all_equal};
use bytes::Bytes;
use lockstep::ClusterError;
use lockstep::core::tls::{build_acceptor, build_connector};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// PEM files for a throwaway CA and a `127.0.0.1` server certificate it signed.
struct TestPki {
    _dir: tempfile::TempDir,
    ca_path: String,
    cert_path: String,
    key_path: String,
}

fn make_pki() -> TestPki {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "lockstep test CA");
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let server_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    let server_key = KeyPair::generate().unwrap();
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, pem: String| {
        let path = dir.path().join(name);
        std::fs::write(&path, pem).unwrap();
        path.to_str().unwrap().to_string()
    };
    let ca_path = write("ca.pem", ca_cert.pem());
    let cert_path = write("server.pem", server_cert.pem());
    let key_path = write("server.key", server_key.serialize_pem());
    TestPki {
        _dir: dir,
        ca_path,
        cert_path,
        key_path,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tls_stream_read_and_write() {
    let pki = make_pki();
    let acceptor = build_acceptor(&pki.cert_path, &pki.key_path).unwrap();
    let connector = build_connector(Some(&pki.ca_path)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(socket).await.unwrap();
        tls.write_all(b"secure-hello").await.unwrap();
        tls.flush().await.unwrap();
        let mut ping = [0u8; 4];
        tls.read_exact(&mut ping).await.unwrap();
        assert_eq!(&ping, b"ping");
        tls.write_all(b"-pong").await.unwrap();
        tls.shutdown().await.unwrap();
        // Only the head ever connects.
        tokio::time::timeout(std::time::Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    });

    let identifier = format!("tls://{addr}");
    let cluster = TestCluster::with_tls_connector(2, connector);
    let results = cluster
        .run(move |session| {
            let identifier = identifier.clone();
            async move {
                let mut stream = session.open_file(&identifier).await.unwrap();
                let first = stream.read(12).await.unwrap();
                let written = stream.write(b"ping").await.unwrap();
                let rest = stream.read_to_end().await.unwrap();
                stream.close().await.unwrap();
                (first, written, rest)
            }
        })
        .await;

    let (first, written, rest) = assert_all_equal(&results);
    assert_eq!(first, Bytes::from_static(b"secure-hello"));
    assert_eq!(written, 4);
    assert_eq!(rest, Bytes::from_static(b"-pong"));
    assert!(server.await.unwrap(), "a follower connected to the TLS server");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tls_open_against_plain_tcp_fails_on_every_node() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // Not a TLS server: answer the ClientHello with plain text and hang up.
        let mut hello = [0u8; 64];
        let _ = socket.read(&mut hello).await;
        let _ = socket.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    let identifier = format!("tls://{addr}");
    let cluster = TestCluster::new(2);
    let results = cluster
        .run(move |session| {
            let identifier = identifier.clone();
            async move {
                let failure = match session.open_file(&identifier).await {
                    Err(ClusterError::ResourceOpenFailed {
                        identifier,
                        kind,
                        message,
                    }) => Some((identifier, kind, message)),
                    _ => None,
                };
                // The group is still in step afterwards.
                session.barrier().await.unwrap();
                (failure, session.sequence().await)
            }
        })
        .await;

    let (failure, sequence) = assert_all_equal(&results);
    let (failed_identifier, _kind, message) = failure.expect("open should fail");
    assert_eq!(failed_identifier, format!("tls://{addr}"));
    assert!(!message.is_empty());
    assert_eq!(sequence, 2);
}
