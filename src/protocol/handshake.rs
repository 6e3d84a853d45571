//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Packets whose version field (bytes 4-8) is zero use the simple echo
//! handshake. Otherwise C1/S1 carry an HMAC-SHA256 digest at one of two
//! layouts, and C2/S2 end with a signature keyed on the peer's digest.
//! Version byte 6 in C0 requests RTMPE: both sides then embed a public key
//! in C1/S1 and derive a cipher pair from the agreed secret.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::cipher::{
    derive_cipher_pair, hmac_sha256, CipherPair, KeyAgreement, SharedEncryptionProvider,
};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMPE_VERSION, RTMP_VERSION};

const DIGEST_SIZE: usize = 32;
const PUBLIC_KEY_SIZE: usize = 128;

/// Offset of the signature inside C2/S2
const SIGNATURE_OFFSET: usize = HANDSHAKE_SIZE - DIGEST_SIZE;

const CLIENT_KEY: &[u8] = b"Genuine Adobe Flash Player 001";
const SERVER_KEY: &[u8] = b"Genuine Adobe Flash Media Server 001";

/// Appended to the client/server keys to form the C2/S2 signing keys
const RANDOM_CRUD: [u8; 32] = [
    0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E, 0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E, 0x57,
    0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB, 0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB, 0x31, 0xAE,
];

/// Version written into C1 unless overridden
pub const DEFAULT_CLIENT_VERSION: [u8; 4] = [0x09, 0x00, 0x7C, 0x02];

/// Version written into S1 for digest handshakes
const SERVER_VERSION: [u8; 4] = [0x04, 0x05, 0x00, 0x01];

/// Length of the SWF verification payload after the event type
pub const SWF_RESPONSE_SIZE: usize = 42;

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Where the digest and the public key live inside C1/S1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestLayout {
    /// Digest near the start, key in the second half
    A,
    /// Key near the start, digest in the second half
    B,
}

impl DigestLayout {
    fn digest_offset(self, packet: &[u8]) -> usize {
        match self {
            DigestLayout::A => sum4(packet, 8) % 728 + 12,
            DigestLayout::B => sum4(packet, 772) % 728 + 776,
        }
    }

    fn key_offset(self, packet: &[u8]) -> usize {
        match self {
            DigestLayout::A => sum4(packet, 1532) % 632 + 772,
            DigestLayout::B => sum4(packet, 768) % 632 + 8,
        }
    }
}

/// Client-side SWF verification data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwfVerification {
    pub size: u32,
    /// HMAC-SHA256 of the decompressed SWF, keyed with the client key
    pub hash: [u8; 32],
}

impl SwfVerification {
    pub fn from_swf(swf: &[u8]) -> std::result::Result<Self, HandshakeError> {
        Ok(Self {
            size: swf.len() as u32,
            hash: hmac_sha256(CLIENT_KEY, &[swf])?,
        })
    }

    /// Reply to a SWF verification request: `01 01 size size digest`
    ///
    /// The digest is keyed with the last 32 bytes of the server's S1.
    pub fn response(&self, server_packet: &[u8]) -> std::result::Result<Bytes, HandshakeError> {
        if server_packet.len() != HANDSHAKE_SIZE {
            return Err(HandshakeError::InvalidState);
        }
        let digest = hmac_sha256(&server_packet[SIGNATURE_OFFSET..], &[&self.hash[..]])?;
        let mut buf = BytesMut::with_capacity(SWF_RESPONSE_SIZE);
        buf.put_u8(0x01);
        buf.put_u8(0x01);
        buf.put_u32(self.size);
        buf.put_u32(self.size);
        buf.put_slice(&digest);
        Ok(buf.freeze())
    }

    /// Server side check of a client's response
    pub fn verify(&self, server_packet: &[u8], response: &[u8]) -> bool {
        self.response(server_packet)
            .map(|expected| expected[..] == *response)
            .unwrap_or(false)
    }
}

/// Handshake options for either role
#[derive(Clone, Default)]
pub struct HandshakeConfig {
    /// Client version bytes for C1; all zero selects the simple handshake
    pub client_version: Option<[u8; 4]>,
    /// Client only: request an encrypted transport
    pub encrypted: bool,
    /// Client only: answer SWF verification requests
    pub swf: Option<SwfVerification>,
    /// Fail when the peer's digest or signature does not validate
    pub validate_peer_digest: bool,
    /// Key agreement and cipher factory for RTMPE
    pub encryption: Option<SharedEncryptionProvider>,
}

impl std::fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("client_version", &self.client_version)
            .field("encrypted", &self.encrypted)
            .field("swf", &self.swf.as_ref().map(|s| s.size))
            .field("validate_peer_digest", &self.validate_peer_digest)
            .field("encryption", &self.encryption.is_some())
            .finish()
    }
}

/// Handshake state machine
pub struct Handshake {
    role: HandshakeRole,
    config: HandshakeConfig,
    state: HandshakeState,
    /// Our C1/S1 packet
    own_packet: Vec<u8>,
    own_digest: Option<[u8; DIGEST_SIZE]>,
    peer_digest: Option<[u8; DIGEST_SIZE]>,
    key_agreement: Option<Box<dyn KeyAgreement>>,
    ciphers: Option<CipherPair>,
    encrypted: bool,
    swf_response: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Initial state - need to send C0C1/S0S1
    Initial,
    /// Waiting for peer's C0C1/S0S1
    WaitingForPeerPacket,
    /// Waiting for peer's C2/S2
    WaitingForPeerResponse,
    /// Handshake complete
    Done,
}

impl Handshake {
    pub fn new(role: HandshakeRole, config: HandshakeConfig) -> Self {
        Self {
            role,
            config,
            state: HandshakeState::Initial,
            own_packet: Vec::new(),
            own_digest: None,
            peer_digest: None,
            key_agreement: None,
            ciphers: None,
            encrypted: false,
            swf_response: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// True once an encrypted handshake was negotiated
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// True if the peer's C1/S1 carried a valid digest
    pub fn peer_digest_verified(&self) -> bool {
        self.peer_digest.is_some()
    }

    /// Cipher pair to install on the transport, available once done
    pub fn take_ciphers(&mut self) -> Option<CipherPair> {
        self.ciphers.take()
    }

    /// Client only: precomputed answer to a SWF verification request
    pub fn swf_response(&self) -> Option<Bytes> {
        self.swf_response.clone()
    }

    /// Our C1/S1 as sent
    pub fn own_packet(&self) -> &[u8] {
        &self.own_packet
    }

    /// Bytes needed before the next state transition
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => 1 + HANDSHAKE_SIZE * 2,
            (HandshakeState::WaitingForPeerResponse, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Generate the opening packet
    ///
    /// For client: returns C0+C1 (1 + 1536 bytes)
    /// For server: returns None (server waits for C0C1 first)
    pub fn generate_initial(&mut self) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }
        self.state = HandshakeState::WaitingForPeerPacket;

        match self.role {
            HandshakeRole::Server => Ok(None),
            HandshakeRole::Client => {
                let encrypted = self.config.encrypted;
                let version = self.config.client_version.unwrap_or(DEFAULT_CLIENT_VERSION);
                let mut c1 = new_packet(version);

                if encrypted || version != [0; 4] {
                    let layout = DigestLayout::A;
                    if encrypted {
                        let provider = self
                            .config
                            .encryption
                            .as_ref()
                            .ok_or(HandshakeError::EncryptionUnavailable)?;
                        let agreement = provider.key_agreement()?;
                        write_public_key(&mut c1, layout, &agreement.public_key())?;
                        self.key_agreement = Some(agreement);
                        self.encrypted = true;
                    }
                    self.own_digest = Some(sign_packet(&mut c1, layout, CLIENT_KEY)?);
                }

                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(if encrypted { RTMPE_VERSION } else { RTMP_VERSION });
                buf.put_slice(&c1);
                self.own_packet = c1;
                Ok(Some(buf.freeze()))
            }
        }
    }

    /// Feed received bytes; consumes nothing until a full packet is buffered
    ///
    /// For server receiving C0C1: returns S0+S1+S2
    /// For client receiving S0S1S2: returns C2
    /// For server receiving C2: returns None (handshake done)
    pub fn process(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        if data.len() < self.bytes_needed() {
            return Ok(None);
        }
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => {
                self.process_client_hello(data).map(Some)
            }
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => {
                self.process_server_hello(data).map(Some)
            }
            (HandshakeState::WaitingForPeerResponse, HandshakeRole::Server) => {
                self.process_client_response(data)?;
                Ok(None)
            }
            _ => Err(HandshakeError::InvalidState.into()),
        }
    }

    /// C0C1 in, S0S1S2 out
    fn process_client_hello(&mut self, data: &mut BytesMut) -> Result<Bytes> {
        let version = data.get_u8();
        // Be lenient - accept version 3-31 (some encoders send different values)
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }
        let encrypted = version == RTMPE_VERSION;
        let c1 = data.split_to(HANDSHAKE_SIZE);

        let complex = encrypted || c1[4..8] != [0, 0, 0, 0];
        let found = if complex { find_digest(&c1, CLIENT_KEY)? } else { None };
        let (s1, s2) = match found {
            Some((layout, client_digest)) => {
                self.peer_digest = Some(client_digest);
                let mut s1 = new_packet(SERVER_VERSION);
                if encrypted {
                    let provider = self
                        .config
                        .encryption
                        .clone()
                        .ok_or(HandshakeError::EncryptionUnavailable)?;
                    let agreement = provider.key_agreement()?;
                    let own_key = agreement.public_key();
                    write_public_key(&mut s1, layout, &own_key)?;
                    let peer_key = read_public_key(&c1, layout);
                    let secret = agreement.shared_secret(peer_key)?;
                    self.ciphers = Some(derive_cipher_pair(provider.as_ref(), &secret, &own_key, peer_key)?);
                    self.encrypted = true;
                }
                self.own_digest = Some(sign_packet(&mut s1, layout, SERVER_KEY)?);
                let s2 = signed_response(&client_digest, SERVER_KEY)?;
                (s1, s2)
            }
            None if complex && (encrypted || self.config.validate_peer_digest) => {
                tracing::warn!("Client digest did not validate");
                return Err(HandshakeError::DigestMismatch.into());
            }
            None => (new_packet([0; 4]), echo_packet(&c1)),
        };

        let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
        response.put_u8(if self.encrypted { RTMPE_VERSION } else { RTMP_VERSION });
        response.put_slice(&s1);
        response.put_slice(&s2);
        self.own_packet = s1;
        self.state = HandshakeState::WaitingForPeerResponse;
        tracing::debug!(
            digest = self.peer_digest.is_some(),
            encrypted = self.encrypted,
            "Sent S0S1S2"
        );
        Ok(response.freeze())
    }

    /// C2 in
    fn process_client_response(&mut self, data: &mut BytesMut) -> Result<()> {
        let c2 = data.split_to(HANDSHAKE_SIZE);
        if let Some(own_digest) = self.own_digest {
            if self.config.validate_peer_digest && !verify_response(&c2, &own_digest, CLIENT_KEY)? {
                return Err(HandshakeError::DigestMismatch.into());
            }
        }
        self.state = HandshakeState::Done;
        Ok(())
    }

    /// S0S1S2 in, C2 out
    fn process_server_hello(&mut self, data: &mut BytesMut) -> Result<Bytes> {
        let version = data.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }
        let s1 = data.split_to(HANDSHAKE_SIZE);
        let s2 = data.split_to(HANDSHAKE_SIZE);

        let c2 = match self.own_digest {
            Some(own_digest) => match find_digest(&s1, SERVER_KEY)? {
                Some((layout, server_digest)) => {
                    self.peer_digest = Some(server_digest);
                    if let Some(agreement) = self.key_agreement.take() {
                        let provider = self
                            .config
                            .encryption
                            .clone()
                            .ok_or(HandshakeError::EncryptionUnavailable)?;
                        let own_key = agreement.public_key();
                        let peer_key = read_public_key(&s1, layout);
                        let secret = agreement.shared_secret(peer_key)?;
                        self.ciphers =
                            Some(derive_cipher_pair(provider.as_ref(), &secret, &own_key, peer_key)?);
                    }
                    if self.config.validate_peer_digest && !verify_response(&s2, &own_digest, SERVER_KEY)? {
                        return Err(HandshakeError::DigestMismatch.into());
                    }
                    signed_response(&server_digest, CLIENT_KEY)?
                }
                None if self.encrypted || self.config.validate_peer_digest => {
                    return Err(HandshakeError::DigestMismatch.into());
                }
                None => echo_packet(&s1),
            },
            None => echo_packet(&s1),
        };

        if let Some(swf) = &self.config.swf {
            self.swf_response = Some(swf.response(&s1)?);
        }
        self.state = HandshakeState::Done;
        Ok(Bytes::from(c2))
    }
}

fn sum4(packet: &[u8], at: usize) -> usize {
    packet[at..at + 4].iter().map(|b| *b as usize).sum()
}

fn full_key(base: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(base.len() + RANDOM_CRUD.len());
    key.extend_from_slice(base);
    key.extend_from_slice(&RANDOM_CRUD);
    key
}

/// Digest over the packet with the 32 digest bytes left out
fn packet_digest(packet: &[u8], offset: usize, key: &[u8]) -> std::result::Result<[u8; DIGEST_SIZE], HandshakeError> {
    hmac_sha256(key, &[&packet[..offset], &packet[offset + DIGEST_SIZE..]])
}

fn sign_packet(
    packet: &mut [u8],
    layout: DigestLayout,
    key: &[u8],
) -> std::result::Result<[u8; DIGEST_SIZE], HandshakeError> {
    let offset = layout.digest_offset(packet);
    let digest = packet_digest(packet, offset, key)?;
    packet[offset..offset + DIGEST_SIZE].copy_from_slice(&digest);
    Ok(digest)
}

/// Try both layouts; returns the matching layout and the digest
fn find_digest(
    packet: &[u8],
    key: &[u8],
) -> std::result::Result<Option<(DigestLayout, [u8; DIGEST_SIZE])>, HandshakeError> {
    for layout in [DigestLayout::A, DigestLayout::B] {
        let offset = layout.digest_offset(packet);
        let expected = packet_digest(packet, offset, key)?;
        if expected[..] == packet[offset..offset + DIGEST_SIZE] {
            return Ok(Some((layout, expected)));
        }
    }
    Ok(None)
}

fn write_public_key(packet: &mut [u8], layout: DigestLayout, key: &[u8]) -> std::result::Result<(), HandshakeError> {
    if key.len() != PUBLIC_KEY_SIZE {
        return Err(HandshakeError::KeyAgreement(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_SIZE,
            key.len()
        )));
    }
    let offset = layout.key_offset(packet);
    packet[offset..offset + PUBLIC_KEY_SIZE].copy_from_slice(key);
    Ok(())
}

fn read_public_key(packet: &[u8], layout: DigestLayout) -> &[u8] {
    let offset = layout.key_offset(packet);
    &packet[offset..offset + PUBLIC_KEY_SIZE]
}

/// Random C2/S2 whose tail signs the first 1504 bytes
fn signed_response(peer_digest: &[u8], base_key: &[u8]) -> std::result::Result<Vec<u8>, HandshakeError> {
    let mut packet = vec![0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut packet);
    let key = hmac_sha256(&full_key(base_key), &[peer_digest])?;
    let signature = hmac_sha256(&key, &[&packet[..SIGNATURE_OFFSET]])?;
    packet[SIGNATURE_OFFSET..].copy_from_slice(&signature);
    Ok(packet)
}

fn verify_response(packet: &[u8], own_digest: &[u8], base_key: &[u8]) -> std::result::Result<bool, HandshakeError> {
    let key = hmac_sha256(&full_key(base_key), &[own_digest])?;
    let signature = hmac_sha256(&key, &[&packet[..SIGNATURE_OFFSET]])?;
    Ok(signature[..] == packet[SIGNATURE_OFFSET..])
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: time(4) + version(4) + random(1528)
fn new_packet(version: [u8; 4]) -> Vec<u8> {
    let mut packet = vec![0u8; HANDSHAKE_SIZE];
    packet[0..4].copy_from_slice(&now_millis().to_be_bytes());
    packet[4..8].copy_from_slice(&version);
    rand::thread_rng().fill_bytes(&mut packet[8..]);
    packet
}

/// C2/S2 for the simple handshake: peer packet with our time at 4-8
fn echo_packet(peer_packet: &[u8]) -> Vec<u8> {
    let mut echo = peer_packet.to_vec();
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
