//! HTTP transport for the peer RPCs of a proof-of-negotiation node
//!
//! [`HttpPeerClient`] implements [`PeerClient`] over plain HTTP with JSON bodies. Peer urls may
//! omit the scheme (`192.168.0.5:5000`), in which case `http://` is assumed.

pub mod error;

pub use error::NetworkError;

use pon_consensus::{
    Block, ConsensusConfig, ConsensusError, Node, PeerClient, ReputationNotice, Transaction,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Deserialize)]
struct ReputationResponse {
    /// Negative when the peer does not know the node
    reputation: f64,
}

#[derive(Deserialize)]
struct ChainResponse {
    chain: Vec<Block>,
    length: usize,
}

#[derive(Deserialize)]
struct CandidatesResponse {
    candidates: BTreeMap<String, Node>,
}

/// Peer client speaking the node HTTP API
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
    timeout: Duration,
}

impl HttpPeerClient {
    /// Create a client whose every call gives up after `timeout_ms`
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn from_config(config: &ConsensusConfig) -> Result<Self> {
        Self::new(config.peer_timeout_ms)
    }

    /// Absolute url of `path` on the peer at `peer_url`
    pub fn endpoint(peer_url: &str, path: &str) -> Result<Url> {
        let base = if peer_url.contains("://") {
            peer_url.to_string()
        } else {
            format!("http://{}", peer_url)
        };

        Url::parse(&base)
            .and_then(|base| base.join(path))
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", peer_url, e)))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| NetworkError::Timeout("Request timeout".to_string()))??;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        peer_url: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = Self::endpoint(peer_url, path)?;
        debug!("GET {}", url);

        let response = self.send(self.client.get(url).query(query)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| NetworkError::Decode(e.to_string()))
    }

    async fn get(&self, peer_url: &str, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let url = Self::endpoint(peer_url, path)?;
        debug!("GET {}", url);

        self.send(self.client.get(url).query(query)).await?;
        Ok(())
    }

    async fn fetch_reputation(
        &self,
        peer_url: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<f64>> {
        let response: ReputationResponse = self.get_json(peer_url, path, query).await?;
        Ok((response.reputation >= 0.0).then_some(response.reputation))
    }

    async fn fetch_chain(&self, peer_url: &str) -> Result<Vec<Block>> {
        let response: ChainResponse = self.get_json(peer_url, "/chain", &[]).await?;
        if response.length != response.chain.len() {
            return Err(NetworkError::Decode(format!(
                "Advertised length {} but sent {} blocks",
                response.length,
                response.chain.len()
            )));
        }
        Ok(response.chain)
    }

    async fn post_pending(&self, peer_url: &str, transaction: &Transaction) -> Result<()> {
        let url = Self::endpoint(peer_url, "/transactions/new_pending")?;
        debug!("POST {}", url);

        self.send(self.client.post(url).json(transaction)).await?;
        Ok(())
    }
}

/// Any transport failure means the peer is unreachable for the consensus core
fn unreachable(peer_url: &str) -> impl FnOnce(NetworkError) -> ConsensusError + '_ {
    move |e| ConsensusError::unreachable(peer_url, e)
}

#[async_trait::async_trait]
impl PeerClient for HttpPeerClient {
    async fn neighbourhood_reputation(
        &self,
        peer_url: &str,
        node_url: &str,
    ) -> pon_consensus::Result<Option<f64>> {
        self.fetch_reputation(
            peer_url,
            "/reputation/neighbourhood_research",
            &[("node_url", node_url)],
        )
        .await
        .map_err(unreachable(peer_url))
    }

    async fn broadcast_reputation(
        &self,
        peer_url: &str,
        node_url: &str,
        request_id: &str,
    ) -> pon_consensus::Result<Option<f64>> {
        self.fetch_reputation(
            peer_url,
            "/reputation/broadcast_research",
            &[("node_url", node_url), ("request_id", request_id)],
        )
        .await
        .map_err(unreachable(peer_url))
    }

    async fn change_reputation(
        &self,
        peer_url: &str,
        notice: &ReputationNotice,
    ) -> pon_consensus::Result<()> {
        let change_lvl = notice.change_lvl.to_string();
        self.get(
            peer_url,
            "/reputation/change_reputation",
            &[
                ("request_id", notice.request_id.as_str()),
                ("node_address", notice.node_address.as_str()),
                ("change_lvl", change_lvl.as_str()),
            ],
        )
        .await
        .map_err(unreachable(peer_url))
    }

    async fn chain(&self, peer_url: &str) -> pon_consensus::Result<Vec<Block>> {
        self.fetch_chain(peer_url)
            .await
            .map_err(unreachable(peer_url))
    }

    async fn candidates(&self, peer_url: &str) -> pon_consensus::Result<BTreeMap<String, Node>> {
        self.get_json::<CandidatesResponse>(peer_url, "/candidates", &[])
            .await
            .map(|response| response.candidates)
            .map_err(unreachable(peer_url))
    }

    async fn update_candidates(&self, peer_url: &str) -> pon_consensus::Result<()> {
        self.get(peer_url, "/update_candidates", &[])
            .await
            .map_err(unreachable(peer_url))
    }

    async fn resolve(&self, peer_url: &str) -> pon_consensus::Result<()> {
        self.get(peer_url, "/nodes/resolve", &[])
            .await
            .map_err(unreachable(peer_url))
    }

    async fn new_pending(
        &self,
        peer_url: &str,
        transaction: &Transaction,
    ) -> pon_consensus::Result<()> {
        self.post_pending(peer_url, transaction)
            .await
            .map_err(unreachable(peer_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_adds_missing_scheme() {
        let url = HttpPeerClient::endpoint("192.168.0.5:5000", "/chain").unwrap();
        assert_eq!(url.as_str(), "http://192.168.0.5:5000/chain");

        let url = HttpPeerClient::endpoint("https://peer.example.org", "/nodes/resolve").unwrap();
        assert_eq!(url.as_str(), "https://peer.example.org/nodes/resolve");
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!(matches!(
            HttpPeerClient::endpoint("http://", "/chain"),
            Err(NetworkError::InvalidUrl(_))
        ));
    }
}
