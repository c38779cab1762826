//! Body framing shared by agent and collector: gzip compression and a keyed
//! integrity tag.

use crate::constants;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt;
use std::io;
use std::io::{Read, Write};

/// Gzip `bytes`.
pub fn compress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Gunzip `bytes`, refusing output larger than `MAX_BODY_BYTES`.
pub fn decompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    decompress_limited(bytes, constants::MAX_BODY_BYTES)
}

/// Gunzip `bytes`, refusing output larger than `limit` bytes.
pub fn decompress_limited(bytes: &[u8], limit: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    GzDecoder::new(bytes).take(limit + 1).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflates past {} bytes", limit),
        ));
    }
    Ok(out)
}

/// A shared secret, stretched to a blake3 key.
#[derive(Clone)]
pub struct SigningKey {
    key: [u8; 32],
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    /// Derive a key from a shared secret.
    pub fn new(secret: &str) -> SigningKey {
        SigningKey {
            key: *blake3::hash(secret.as_bytes()).as_bytes(),
        }
    }

    /// Derive a key when a non-empty secret is configured.
    pub fn from_secret(secret: Option<&str>) -> Option<SigningKey> {
        match secret {
            Some(s) if !s.is_empty() => Some(SigningKey::new(s)),
            _ => None,
        }
    }

    /// Hex-encoded tag over `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        blake3::keyed_hash(&self.key, body).to_hex().to_string()
    }

    /// Whether `tag` is the tag of `body`. Comparison is constant time.
    pub fn verify(&self, body: &[u8], tag: &str) -> bool {
        match blake3::Hash::from_hex(tag.trim()) {
            Ok(expected) => expected == blake3::keyed_hash(&self.key, body),
            Err(_) => false,
        }
    }
}
