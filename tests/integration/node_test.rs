// tests/integration/node_test.rs

//! Bootstrap over real TCP: the Hello/Welcome handshake, follower admission,
//! and a session running on top of the established links.

use super::test_helpers::{assert_all_equal, init_tracing, test_io_config};
use bytes::Bytes;
use lockstep::core::Peer;
use lockstep::node::handshake::{accept_followers, connect_to_head};
use lockstep::{ClusterError, ClusterSession, Multiplexer};
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_followers_join_and_receive_broadcasts() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let io = test_io_config();

    // Connect in reverse order: links still end up indexed by ordinal.
    let followers: Vec<_> = (0..2)
        .rev()
        .map(|index| {
            let addr = addr.clone();
            let io = io.clone();
            tokio::spawn(async move {
                let framed = connect_to_head(&addr, index, None, TIMEOUT).await.unwrap();
                let mut mux = Multiplexer::follower_from_framed(index, framed, &io);
                let payload = mux.receive_broadcast().await.unwrap();
                mux.gather(Bytes::from(format!("ack-{index}"))).await.unwrap();
                mux.barrier().await.unwrap();
                payload
            })
        })
        .collect();

    let links = accept_followers(&listener, 2, None, TIMEOUT).await.unwrap();
    let mut head = Multiplexer::head_from_framed(links, &io);
    head.broadcast(Bytes::from("hello group")).await.unwrap();
    let replies: Vec<Bytes> = head
        .gather_all()
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(replies, vec![Bytes::from("ack-0"), Bytes::from("ack-1")]);
    head.barrier().await.unwrap();

    for follower in followers {
        assert_eq!(follower.await.unwrap(), Bytes::from("hello group"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_range_ordinal_is_rejected() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let head = tokio::spawn(async move {
        accept_followers(&listener, 1, None, TIMEOUT).await.map(|links| links.len())
    });

    // The head keeps refusing ordinal 5, so the follower gives up.
    let rejected = connect_to_head(&addr, 5, None, Duration::from_secs(1)).await;
    assert_eq!(
        rejected.err(),
        Some(ClusterError::ConnectionLost { node: Peer::Head })
    );

    // A valid follower is still admitted afterwards.
    connect_to_head(&addr, 0, None, TIMEOUT).await.unwrap();
    assert_eq!(head.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_accept_times_out_when_followers_are_missing() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = accept_followers(&listener, 1, None, Duration::from_millis(200)).await;
    assert!(matches!(result, Err(ClusterError::Io(_))));
}

#[tokio::test]
async fn test_connect_gives_up_without_a_head() {
    init_tracing();
    // Bind and drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string();
    let result = connect_to_head(&addr, 0, None, Duration::from_millis(500)).await;
    assert_eq!(
        result.err(),
        Some(ClusterError::ConnectionLost { node: Peer::Head })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_over_tcp_links() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.txt");
    std::fs::write(&path, b"over real sockets").unwrap();
    let path = path.to_str().unwrap().to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let io = test_io_config();

    let program = |session: ClusterSession, path: String| async move {
        let mut file = session.open_file(&path).await.unwrap();
        let content = file.read_to_end().await.unwrap();
        file.close().await.unwrap();
        session.barrier().await.unwrap();
        session.close().await;
        content
    };

    let follower = {
        let (addr, io, path) = (addr.clone(), io.clone(), path.clone());
        tokio::spawn(async move {
            let framed = connect_to_head(&addr, 0, None, TIMEOUT).await.unwrap();
            let mux = Multiplexer::follower_from_framed(0, framed, &io);
            program(ClusterSession::new(mux, io).unwrap(), path).await
        })
    };

    let links = accept_followers(&listener, 1, None, TIMEOUT).await.unwrap();
    let head_mux = Multiplexer::head_from_framed(links, &io);
    let head = program(ClusterSession::new(head_mux, io).unwrap(), path).await;

    let results = vec![head, follower.await.unwrap()];
    assert_eq!(
        assert_all_equal(&results),
        Bytes::from_static(b"over real sockets")
    );
}
