//! Transport encryption collaborators for the RTMPE handshake
//!
//! The Diffie-Hellman group and the RC4-style keystream are provided from
//! outside through [`EncryptionProvider`]. This module only derives the
//! per-direction keys from the agreed secret and primes both ciphers.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::HandshakeError;

type HmacSha256 = Hmac<Sha256>;

/// Keystream bytes both sides drop before the first protected byte
pub const KEYSTREAM_DISCARD: usize = 1536;

/// Symmetric keystream cipher, applied in place
pub trait StreamCipher: Send {
    fn apply(&mut self, data: &mut [u8]);
}

/// One side of a key exchange
pub trait KeyAgreement: Send {
    /// Public key placed into C1/S1 (128 bytes for the RTMPE group)
    fn public_key(&self) -> Vec<u8>;

    fn shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>, HandshakeError>;
}

/// Factory for key agreements and ciphers
pub trait EncryptionProvider: Send + Sync {
    fn key_agreement(&self) -> Result<Box<dyn KeyAgreement>, HandshakeError>;

    fn cipher(&self, key: &[u8; 16]) -> Box<dyn StreamCipher>;
}

pub type SharedEncryptionProvider = Arc<dyn EncryptionProvider>;

/// Installed on a connection once an encrypted handshake completes
pub struct CipherPair {
    /// Decrypts bytes read from the peer
    pub inbound: Box<dyn StreamCipher>,
    /// Encrypts bytes written to the peer
    pub outbound: Box<dyn StreamCipher>,
}

impl std::fmt::Debug for CipherPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherPair")
    }
}

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], HandshakeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| HandshakeError::KeyAgreement(format!("Failed to create HMAC: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derive both directions from the shared secret
///
/// The outbound key is keyed on the peer's public key, the inbound key on
/// our own, so the two ends of a connection pair up crosswise.
pub fn derive_cipher_pair(
    provider: &dyn EncryptionProvider,
    secret: &[u8],
    own_public_key: &[u8],
    peer_public_key: &[u8],
) -> Result<CipherPair, HandshakeError> {
    let out_digest = hmac_sha256(secret, &[peer_public_key])?;
    let in_digest = hmac_sha256(secret, &[own_public_key])?;

    let mut out_key = [0u8; 16];
    out_key.copy_from_slice(&out_digest[..16]);
    let mut in_key = [0u8; 16];
    in_key.copy_from_slice(&in_digest[..16]);

    let mut outbound = provider.cipher(&out_key);
    let mut inbound = provider.cipher(&in_key);
    let mut scratch = [0u8; KEYSTREAM_DISCARD];
    outbound.apply(&mut scratch);
    scratch = [0u8; KEYSTREAM_DISCARD];
    inbound.apply(&mut scratch);

    Ok(CipherPair { inbound, outbound })
}

/// Deterministic stand-ins used by tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Toy exchange: secret = byte-wise sum of both public keys
    pub struct SumAgreement {
        public: Vec<u8>,
    }

    impl KeyAgreement for SumAgreement {
        fn public_key(&self) -> Vec<u8> {
            self.public.clone()
        }

        fn shared_secret(&self, peer: &[u8]) -> Result<Vec<u8>, HandshakeError> {
            if peer.len() != self.public.len() {
                return Err(HandshakeError::KeyAgreement("bad peer key length".into()));
            }
            Ok(self
                .public
                .iter()
                .zip(peer)
                .map(|(a, b)| a.wrapping_add(*b))
                .collect())
        }
    }

    /// Keystream = key bytes cycled with a running counter
    pub struct CounterCipher {
        key: [u8; 16],
        position: usize,
    }

    impl StreamCipher for CounterCipher {
        fn apply(&mut self, data: &mut [u8]) {
            for b in data.iter_mut() {
                *b ^= self.key[self.position % 16].wrapping_add((self.position / 16) as u8);
                self.position += 1;
            }
        }
    }

    #[derive(Default)]
    pub struct TestProvider {
        seed: std::sync::atomic::AtomicU8,
    }

    impl EncryptionProvider for TestProvider {
        fn key_agreement(&self) -> Result<Box<dyn KeyAgreement>, HandshakeError> {
            let seed = self.seed.fetch_add(17, std::sync::atomic::Ordering::Relaxed);
            let public = (0..128u32).map(|i| (i as u8).wrapping_mul(3).wrapping_add(seed)).collect();
            Ok(Box::new(SumAgreement { public }))
        }

        fn cipher(&self, key: &[u8; 16]) -> Box<dyn StreamCipher> {
            Box::new(CounterCipher { key: *key, position: 0 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestProvider;
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", &[&b"what do ya want "[..], &b"for nothing?"[..]]).unwrap();
        assert_eq!(mac[..4], [0x5b, 0xdc, 0xc1, 0x46]);
        assert_eq!(mac[28..], [0x64, 0xec, 0x38, 0x43]);
    }

    #[test]
    fn test_cipher_pairs_cross_match() {
        let provider = TestProvider::default();
        let client = provider.key_agreement().unwrap();
        let server = provider.key_agreement().unwrap();
        let secret = client.shared_secret(&server.public_key()).unwrap();
        assert_eq!(secret, server.shared_secret(&client.public_key()).unwrap());

        let mut client_pair =
            derive_cipher_pair(&provider, &secret, &client.public_key(), &server.public_key()).unwrap();
        let mut server_pair =
            derive_cipher_pair(&provider, &secret, &server.public_key(), &client.public_key()).unwrap();

        let plain = b"connect('vod')".to_vec();
        let mut wire = plain.clone();
        client_pair.outbound.apply(&mut wire);
        assert_ne!(wire, plain);
        server_pair.inbound.apply(&mut wire);
        assert_eq!(wire, plain);

        let mut reply = b"_result".to_vec();
        server_pair.outbound.apply(&mut reply);
        client_pair.inbound.apply(&mut reply);
        assert_eq!(reply, b"_result");
    }
}
