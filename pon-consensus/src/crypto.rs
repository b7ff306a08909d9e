//! Transaction signature verification

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

use crate::{ConsensusError, Result};

/// Network address of a key: hex encoded SubjectPublicKeyInfo DER
pub fn address_of(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| ConsensusError::Crypto(format!("Failed to encode public key: {}", e)))?;
    Ok(hex::encode(der.as_bytes()))
}

/// Checks that `signature` over `payload` was produced by the owner of `public_key`.
///
/// Addresses are hex encoded public keys, so the sender address is passed as the key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &str, signature: &str, payload: &[u8]) -> bool;
}

/// RSA PKCS#1 v1.5 signatures over SHA-256.
///
/// Keys are accepted as hex DER, either SubjectPublicKeyInfo or bare PKCS#1.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaVerifier;

impl RsaVerifier {
    pub fn new() -> Self {
        Self
    }

    fn decode_key(public_key: &str) -> Option<RsaPublicKey> {
        let der = hex::decode(public_key).ok()?;
        RsaPublicKey::from_public_key_der(&der)
            .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
            .ok()
    }
}

impl SignatureVerifier for RsaVerifier {
    fn verify(&self, public_key: &str, signature: &str, payload: &[u8]) -> bool {
        let Some(key) = Self::decode_key(public_key) else {
            tracing::debug!("Undecodable public key {}", public_key);
            return false;
        };
        let Ok(signature_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
            return false;
        };

        VerifyingKey::<Sha256>::new(key)
            .verify(payload, &signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    fn keypair() -> (SigningKey<Sha256>, String) {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let address = address_of(&private_key.to_public_key()).unwrap();
        (SigningKey::<Sha256>::new(private_key), address)
    }

    #[test]
    fn test_signature_round_trip() {
        let (signing_key, address) = keypair();
        let payload = b"{\"value\":1.0}";
        let signature = hex::encode(signing_key.sign(payload).to_bytes());

        let verifier = RsaVerifier::new();
        assert!(verifier.verify(&address, &signature, payload));
        assert!(!verifier.verify(&address, &signature, b"{\"value\":2.0}"));
    }

    #[test]
    fn test_garbage_inputs_do_not_verify() {
        let verifier = RsaVerifier::new();
        assert!(!verifier.verify("not-hex", "00", b"payload"));
        assert!(!verifier.verify("abcd", "zz", b"payload"));
    }
}
