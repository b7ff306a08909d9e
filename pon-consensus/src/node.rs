//! Network participants known to this node

use crate::constants::{MAX_REPUTATION, MYSELF};
use crate::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A neighbour or negotiation candidate.
///
/// The address is the node's stable ledger identity and never changes once created.
/// Url and reputation can only be updated through the validating setters, so a `Node`
/// always holds a url-like value (or the [`MYSELF`] sentinel) and a reputation in
/// `[0, MAX_REPUTATION]`. Decoding from the wire runs the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord")]
pub struct Node {
    url: String,
    address: String,
    reputation: f64,
}

/// Unchecked wire shape of a [`Node`]
#[derive(Deserialize)]
struct NodeRecord {
    url: String,
    address: String,
    reputation: f64,
}

impl TryFrom<NodeRecord> for Node {
    type Error = ConsensusError;

    fn try_from(record: NodeRecord) -> Result<Self> {
        Node::new(record.url, record.address, record.reputation)
    }
}

impl Node {
    /// Create a node, rejecting malformed urls and out of range reputations
    pub fn new(url: impl Into<String>, address: impl Into<String>, reputation: f64) -> Result<Self> {
        let url = url.into();
        validate_url(&url)?;
        validate_reputation(reputation)?;

        Ok(Self {
            url,
            address: address.into(),
            reputation,
        })
    }

    /// Our own candidate entry, before neighbours substitute the real url
    pub fn myself(address: impl Into<String>, reputation: f64) -> Result<Self> {
        Self::new(MYSELF, address, reputation)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn reputation(&self) -> f64 {
        self.reputation
    }

    pub fn is_myself(&self) -> bool {
        self.url.eq_ignore_ascii_case(MYSELF)
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        validate_url(&url)?;
        self.url = url;
        Ok(())
    }

    pub fn set_reputation(&mut self, reputation: f64) -> Result<()> {
        validate_reputation(reputation)?;
        self.reputation = reputation;
        Ok(())
    }
}

/// Accept urls with or without a scheme, like `192.168.0.5:5000` or `http://peer.example`
pub fn validate_url(candidate: &str) -> Result<()> {
    if candidate.eq_ignore_ascii_case(MYSELF) {
        return Ok(());
    }

    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return Err(ConsensusError::InvalidUrl(candidate.to_string()));
    }

    let parsed = if candidate.contains("://") {
        Url::parse(candidate)
    } else {
        Url::parse(&format!("http://{}", candidate))
    }
    .map_err(|e| ConsensusError::InvalidUrl(format!("{}: {}", candidate, e)))?;

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ConsensusError::InvalidUrl(candidate.to_string())),
    }
}

/// Urls a neighbour can be reached at: [`validate_url`] minus the [`MYSELF`] sentinel
pub fn validate_neighbour_url(candidate: &str) -> Result<()> {
    if candidate.eq_ignore_ascii_case(MYSELF) {
        return Err(ConsensusError::InvalidUrl(format!(
            "{} is reserved for a node's own candidate entry",
            candidate
        )));
    }
    validate_url(candidate)
}

fn validate_reputation(reputation: f64) -> Result<()> {
    if !(0.0..=MAX_REPUTATION).contains(&reputation) {
        return Err(ConsensusError::Validation(format!(
            "Reputation must be between 0 and {}, got {}",
            MAX_REPUTATION, reputation
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_forms() {
        assert!(validate_url("192.168.0.5:5000").is_ok());
        assert!(validate_url("http://127.0.0.1:8080").is_ok());
        assert!(validate_url("peer.example.org").is_ok());
        assert!(validate_url("Myself").is_ok());

        assert!(validate_url("").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("http://").is_err());
    }

    #[test]
    fn test_neighbour_url_excludes_sentinel() {
        assert!(validate_neighbour_url("192.168.0.5:5000").is_ok());
        assert!(matches!(
            validate_neighbour_url("myself"),
            Err(ConsensusError::InvalidUrl(_))
        ));
        assert!(validate_neighbour_url("MYSELF").is_err());
        assert!(validate_neighbour_url("").is_err());
    }

    #[test]
    fn test_node_rejects_out_of_range_reputation() {
        assert!(Node::new("10.0.0.1:5000", "addr", -0.1).is_err());
        assert!(Node::new("10.0.0.1:5000", "addr", MAX_REPUTATION + 0.1).is_err());

        let mut node = Node::new("10.0.0.1:5000", "addr", 1.0).unwrap();
        assert!(node.set_reputation(7.0).is_err());
        assert_eq!(node.reputation(), 1.0);
        assert!(node.set_reputation(0.0).is_ok());
    }

    #[test]
    fn test_decoding_validates() {
        let ok: Node =
            serde_json::from_str(r#"{"url":"10.0.0.1:5000","address":"a","reputation":2.5}"#)
                .unwrap();
        assert_eq!(ok.reputation(), 2.5);

        let bad = serde_json::from_str::<Node>(
            r#"{"url":"10.0.0.1:5000","address":"a","reputation":99}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_myself_sentinel() {
        let me = Node::myself("self-address", 1.0).unwrap();
        assert!(me.is_myself());
        assert_eq!(me.url(), MYSELF);
    }
}
