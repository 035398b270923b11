mod helpers;

use helpers::{build_query, init_tracing, MockBehavior, MockTcpServer, MockUdpServer, MOCK_ANSWER_IP};
use hickory_proto::rr::RData;
use polydns::{Client, ClassicClient, ClassicConfig, ClientError, VerifyPolicy};
use std::net::Ipv4Addr;
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn udp_query_returns_the_answer_section() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::Answer).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::udp(addr)).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x1111), QUERY_TIMEOUT)
        .await;

    let answers = outcome.result.unwrap();
    assert_eq!(answers.len(), 1);
    match answers[0].data() {
        RData::A(a) => assert_eq!(a.0, Ipv4Addr::from(MOCK_ANSWER_IP)),
        other => panic!("expected an A record, got {other:?}"),
    }
    assert!(outcome.elapsed > Duration::ZERO);
}

#[tokio::test]
async fn udp_query_via_dispatcher() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::Answer).await.unwrap();
    let client = Client::from_uri(&format!("udp://{addr}"), VerifyPolicy::Enforce, None)
        .await
        .unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x2222), QUERY_TIMEOUT)
        .await;

    assert_eq!(outcome.result.unwrap().len(), 1);
    client.close().await.unwrap();
}

#[tokio::test]
async fn tcp_query_returns_the_answer_section() {
    init_tracing();
    let (_server, addr) = MockTcpServer::start(MockBehavior::Answer).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::tcp(addr)).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x3333), QUERY_TIMEOUT)
        .await;

    let answers = outcome.result.unwrap();
    assert_eq!(answers.len(), 1);
}

#[tokio::test]
async fn repeated_queries_reuse_the_connection() {
    init_tracing();
    let (_server, addr) = MockTcpServer::start(MockBehavior::Answer).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::tcp(addr)).await.unwrap();

    for id in 1..=3u16 {
        let outcome = client
            .query(&build_query("example.com.", id), QUERY_TIMEOUT)
            .await;
        assert!(outcome.result.is_ok(), "query {id} failed");
    }
}

#[tokio::test]
async fn truncated_response_is_an_error() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::Truncated).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::udp(addr)).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x4444), QUERY_TIMEOUT)
        .await;

    assert!(matches!(outcome.result, Err(ClientError::Truncated { .. })));
}

#[tokio::test]
async fn mismatched_response_id_is_an_error() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::WrongId).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::udp(addr)).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x5555), QUERY_TIMEOUT)
        .await;

    match outcome.result {
        Err(ClientError::IdMismatch { query, response }) => {
            assert_eq!(query, 0x5555);
            assert_ne!(response, 0x5555);
        }
        other => panic!("expected an id mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_deadline_reports_timeout_with_elapsed_time() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::Silent).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::udp(addr)).await.unwrap();

    let timeout = Duration::from_millis(200);
    let outcome = client.query(&build_query("example.com.", 1), timeout).await;

    assert!(matches!(outcome.result, Err(ClientError::Timeout { .. })));
    // Bounded small delta past the deadline: the I/O itself is unblocked.
    assert!(outcome.elapsed >= timeout);
    assert!(outcome.elapsed < timeout + Duration::from_millis(500));
}

#[tokio::test]
async fn peer_close_surfaces_connection_lost_then_reconnect_recovers() {
    init_tracing();
    let (_server, addr) = MockTcpServer::start(MockBehavior::CloseFirstConnection)
        .await
        .unwrap();

    let mut config = ClassicConfig::tcp(addr);
    config.jitter_seed = Some(7);
    let client = ClassicClient::connect(config).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x6001), QUERY_TIMEOUT)
        .await;
    assert!(matches!(
        outcome.result,
        Err(ClientError::ConnectionLost { .. })
    ));

    // Explicit reconnect restores service without waiting for the
    // background backoff.
    client.reconnect().await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x6002), QUERY_TIMEOUT)
        .await;
    assert_eq!(outcome.result.unwrap().len(), 1);
}

#[tokio::test]
async fn background_reconnect_retries_until_the_server_returns() {
    init_tracing();
    let (server, addr) = MockTcpServer::start(MockBehavior::CloseFirstConnection)
        .await
        .unwrap();

    let mut config = ClassicConfig::tcp(addr);
    config.jitter_seed = Some(11);
    let client = ClassicClient::connect(config).await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 0x7001), QUERY_TIMEOUT)
        .await;
    assert!(matches!(
        outcome.result,
        Err(ClientError::ConnectionLost { .. })
    ));

    // Take the listener down so the first backoff attempt fails, then bring
    // it back on the same port for a later attempt. The backoff is uniform
    // in [1.0, 2.0) s, so 2.2 s covers one full round.
    drop(server);
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let revived = MockTcpServer::start_at(addr, MockBehavior::Answer).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2200)).await;

    let outcome = client
        .query(&build_query("example.com.", 0x7002), QUERY_TIMEOUT)
        .await;
    assert_eq!(outcome.result.unwrap().len(), 1);
    drop(revived);
}

#[tokio::test]
async fn queries_after_close_fail() {
    init_tracing();
    let (_server, addr) = MockUdpServer::start(MockBehavior::Answer).await.unwrap();
    let client = ClassicClient::connect(ClassicConfig::udp(addr)).await.unwrap();

    client.close().await.unwrap();

    let outcome = client
        .query(&build_query("example.com.", 1), QUERY_TIMEOUT)
        .await;
    assert!(matches!(outcome.result, Err(ClientError::Closed)));

    // Reconnect does not revive an explicitly closed client.
    assert!(matches!(
        client.reconnect().await,
        Err(ClientError::Closed)
    ));
}
