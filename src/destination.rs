//! I2P destinations: the identity a session presents to the network.
//!
//! Binary layout of the public part:
//! <256 byte public key><128 byte signing key><cert type:1><cert len:2><cert payload>
//! A private-key blob, as returned by `SESSION STATUS`, is the public part
//! followed by the private keys.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Result, SamError};
use crate::utils::encoding::{base32_encode, i2p_base64_decode, i2p_base64_encode};

pub const DESTINATION_MIN_LEN: usize = 387;
pub const HASH_LEN: usize = 32;

const CERT_OFFSET: usize = 384;
const KEY_CERTIFICATE: u8 = 5;

/// DSA_SHA1, the signature type of a destination with a null certificate.
pub const SIG_TYPE_DSA_SHA1: u16 = 0;
pub const SIG_TYPE_ED25519: u16 = 7;

/// SHA-256 of a destination's public bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationHash([u8; HASH_LEN]);

impl DestinationHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the 44-character base64 form carried in Datagram3 headers.
    pub fn from_base64(input: &str) -> Result<Self> {
        let bytes = i2p_base64_decode(input)
            .map_err(|e| SamError::InvalidDestination(format!("hash: {e}")))?;
        let array: [u8; HASH_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            SamError::InvalidDestination(format!("hash must be {HASH_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        i2p_base64_encode(&self.0)
    }

    /// `<52 base32 chars>.b32.i2p`, the name `NAMING LOOKUP` resolves.
    pub fn to_b32_address(&self) -> String {
        format!("{}.b32.i2p", base32_encode(&self.0))
    }
}

impl fmt::Debug for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_b32_address())
    }
}

/// A network identity. Never mutated after construction; share it via `Arc`.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    public: Vec<u8>,
    public_base64: String,
    hash: DestinationHash,
    private_base64: Option<String>,
}

impl Destination {
    /// Parse the public destination in I2P base64.
    pub fn from_base64(input: &str) -> Result<Self> {
        Self::from_public_bytes(decode(input)?)
    }

    /// Parse a private-key blob. The public part is its prefix.
    pub fn from_private_base64(input: &str) -> Result<Self> {
        let mut bytes = decode(input)?;
        let len = public_len(&bytes)?;
        if bytes.len() == len {
            return Err(SamError::InvalidDestination(
                "private key blob carries no private keys".to_string(),
            ));
        }
        bytes.truncate(len);
        let mut destination = Self::from_checked(bytes);
        destination.private_base64 = Some(input.trim().to_string());
        Ok(destination)
    }

    /// Wrap raw public bytes, which must be exactly one destination.
    pub fn from_public_bytes(bytes: Vec<u8>) -> Result<Self> {
        let len = public_len(&bytes)?;
        if len != bytes.len() {
            return Err(SamError::InvalidDestination(format!(
                "expected {len} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::from_checked(bytes))
    }

    fn from_checked(bytes: Vec<u8>) -> Self {
        let hash = DestinationHash(Sha256::digest(&bytes).into());
        Self {
            public_base64: i2p_base64_encode(&bytes),
            public: bytes,
            hash,
            private_base64: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.public
    }

    pub fn to_base64(&self) -> &str {
        &self.public_base64
    }

    pub fn hash(&self) -> DestinationHash {
        self.hash
    }

    pub fn b32_address(&self) -> String {
        self.hash.to_b32_address()
    }

    /// The full private-key blob, when this destination was created or
    /// loaded with its keys.
    pub fn private_keys(&self) -> Option<&str> {
        self.private_base64.as_deref()
    }

    /// Same identity without private material.
    pub fn public(&self) -> Destination {
        Destination {
            private_base64: None,
            ..self.clone()
        }
    }

    pub fn signature_type(&self) -> u16 {
        match self.public.get(CERT_OFFSET..CERT_OFFSET + 5) {
            Some(&[KEY_CERTIFICATE, _, _, hi, lo]) => u16::from_be_bytes([hi, lo]),
            _ => SIG_TYPE_DSA_SHA1,
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("address", &self.b32_address())
            .field("has_private_keys", &self.private_base64.is_some())
            .finish()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.b32_address())
    }
}

fn decode(input: &str) -> Result<Vec<u8>> {
    i2p_base64_decode(input).map_err(|e| SamError::InvalidDestination(e.to_string()))
}

/// Length of the public part, read from the certificate header.
fn public_len(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < DESTINATION_MIN_LEN {
        return Err(SamError::InvalidDestination(format!(
            "{} bytes is shorter than the {DESTINATION_MIN_LEN} byte minimum",
            bytes.len()
        )));
    }
    let cert_len = u16::from_be_bytes([bytes[CERT_OFFSET + 1], bytes[CERT_OFFSET + 2]]) as usize;
    let total = DESTINATION_MIN_LEN + cert_len;
    if bytes.len() < total {
        return Err(SamError::InvalidDestination(format!(
            "certificate claims {cert_len} bytes but only {} remain",
            bytes.len() - DESTINATION_MIN_LEN
        )));
    }
    Ok(total)
}
