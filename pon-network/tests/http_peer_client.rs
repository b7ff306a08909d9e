//! HttpPeerClient against a mocked peer

use mockito::{Matcher, Server};
use pon_consensus::*;
use pon_network::HttpPeerClient;

fn client() -> HttpPeerClient {
    HttpPeerClient::new(2_000).unwrap()
}

#[tokio::test]
async fn test_neighbourhood_reputation() {
    let mut server = Server::new_async().await;
    let known = server
        .mock("GET", "/reputation/neighbourhood_research")
        .match_query(Matcher::UrlEncoded("node_url".into(), "10.0.0.9:5000".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"reputation": 3.5}"#)
        .create_async()
        .await;
    let unknown = server
        .mock("GET", "/reputation/neighbourhood_research")
        .match_query(Matcher::UrlEncoded("node_url".into(), "10.0.0.8:5000".into()))
        .with_status(200)
        .with_body(r#"{"reputation": -1}"#)
        .create_async()
        .await;

    // peers are registered without a scheme
    let peer = server.host_with_port();
    let client = client();
    assert_eq!(
        client.neighbourhood_reputation(&peer, "10.0.0.9:5000").await.unwrap(),
        Some(3.5)
    );
    assert_eq!(
        client.neighbourhood_reputation(&peer, "10.0.0.8:5000").await.unwrap(),
        None
    );

    known.assert_async().await;
    unknown.assert_async().await;
}

#[tokio::test]
async fn test_broadcast_reputation_sends_request_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/reputation/broadcast_research")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("node_url".into(), "10.0.0.9:5000".into()),
            Matcher::UrlEncoded("request_id".into(), "node-a1700000000.5RS".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"reputation": 0.6}"#)
        .create_async()
        .await;

    let reputation = client()
        .broadcast_reputation(&server.url(), "10.0.0.9:5000", "node-a1700000000.5RS")
        .await
        .unwrap();
    assert_eq!(reputation, Some(0.6));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_change_reputation_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/reputation/change_reputation")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("request_id".into(), "abc1.0RC".into()),
            Matcher::UrlEncoded("node_address".into(), "bob".into()),
            Matcher::UrlEncoded("change_lvl".into(), "-2".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"message": "ok"}"#)
        .create_async()
        .await;

    let notice = ReputationNotice {
        request_id: "abc1.0RC".into(),
        node_address: "bob".into(),
        change_lvl: -2,
    };
    client().change_reputation(&server.url(), &notice).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chain_is_decoded() {
    let genesis = Block::genesis(1.0, 42);
    let body = serde_json::json!({ "chain": [genesis.clone()], "length": 1 });

    let mut server = Server::new_async().await;
    server
        .mock("GET", "/chain")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let chain = client().chain(&server.url()).await.unwrap();
    assert_eq!(chain, vec![genesis]);
}

#[tokio::test]
async fn test_inconsistent_chain_length_is_rejected() {
    let body = serde_json::json!({ "chain": [Block::genesis(1.0, 42)], "length": 3 });

    let mut server = Server::new_async().await;
    server
        .mock("GET", "/chain")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let result = client().chain(&server.url()).await;
    assert!(matches!(result, Err(ConsensusError::PeerUnreachable { .. })));
}

#[tokio::test]
async fn test_candidates_are_decoded() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/candidates")
        .with_status(200)
        .with_body(
            r#"{"candidates": {"miner-1": {"url": "myself", "address": "miner-1", "reputation": 1.0}}}"#,
        )
        .create_async()
        .await;

    let candidates = client().candidates(&server.url()).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert!(candidates["miner-1"].is_myself());
}

#[tokio::test]
async fn test_invalid_candidate_is_rejected() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/candidates")
        .with_status(200)
        .with_body(
            r#"{"candidates": {"a": {"url": "10.0.0.1:5000", "address": "a", "reputation": 9.0}}}"#,
        )
        .create_async()
        .await;

    assert!(client().candidates(&server.url()).await.is_err());
}

#[tokio::test]
async fn test_pending_transaction_is_posted() {
    let tx = Transaction::new("alice", "bob", 2.0, 10.0, Some("beef".into())).unwrap();

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/transactions/new_pending")
        .match_body(Matcher::Json(serde_json::to_value(&tx).unwrap()))
        .with_status(200)
        .create_async()
        .await;

    client().new_pending(&server.url(), &tx).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_means_unreachable() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/nodes/resolve")
        .with_status(500)
        .create_async()
        .await;
    server
        .mock("GET", "/update_candidates")
        .with_status(200)
        .create_async()
        .await;

    let client = client();
    let result = client.resolve(&server.url()).await;
    assert!(matches!(result, Err(ConsensusError::PeerUnreachable { .. })));
    assert!(client.update_candidates(&server.url()).await.is_ok());
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    let result = client().chain("127.0.0.1:1").await;
    match result {
        Err(ConsensusError::PeerUnreachable { peer, .. }) => assert_eq!(peer, "127.0.0.1:1"),
        other => panic!("expected unreachable peer, got {:?}", other),
    }
}
