use openssl::hash::MessageDigest;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
}

impl DigestAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => crate::DIGEST_SHA256,
            DigestAlgorithm::Sha384 => crate::DIGEST_SHA384,
        }
    }

    pub fn signature_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => crate::SIGNATURE_RSA_SHA256,
            DigestAlgorithm::Sha384 => crate::SIGNATURE_RSA_SHA384,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            crate::DIGEST_SHA256 => Some(DigestAlgorithm::Sha256),
            crate::DIGEST_SHA384 => Some(DigestAlgorithm::Sha384),
            _ => None,
        }
    }

    pub fn from_signature_uri(uri: &str) -> Option<Self> {
        match uri {
            crate::SIGNATURE_RSA_SHA256 => Some(DigestAlgorithm::Sha256),
            crate::SIGNATURE_RSA_SHA384 => Some(DigestAlgorithm::Sha384),
            _ => None,
        }
    }

    pub(crate) fn message_digest(&self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
            DigestAlgorithm::Sha384 => MessageDigest::sha384(),
        }
    }
}

pub fn digest_raw(data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    openssl::hash::hash(algorithm.message_digest(), data)
        .map(|d| d.to_vec())
        .map_err(|e| Error::Digest(e.to_string()))
}

/// Standard base64 of the digest, as carried in `ds:DigestValue`.
pub fn digest(data: &[u8], algorithm: DigestAlgorithm) -> Result<String> {
    Ok(base64::encode(digest_raw(data, algorithm)?))
}

/// Lowercase hex of the digest, as used for CUFE/CUDE codes.
pub fn digest_hex(data: &[u8], algorithm: DigestAlgorithm) -> Result<String> {
    Ok(hex::encode(digest_raw(data, algorithm)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            digest(b"abc", DigestAlgorithm::Sha256).unwrap(),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
        assert_eq!(
            digest_hex(b"abc", DigestAlgorithm::Sha384).unwrap(),
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7"
        );
    }

    #[test]
    fn uris_round_trip() {
        for alg in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384] {
            assert_eq!(DigestAlgorithm::from_uri(alg.uri()), Some(alg));
            assert_eq!(DigestAlgorithm::from_signature_uri(alg.signature_uri()), Some(alg));
        }
        assert_eq!(DigestAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#sha1"), None);
    }
}
