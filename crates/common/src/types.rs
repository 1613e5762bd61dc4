use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Multicodec prefix for dag-pb CIDv1 bytes.
const CIDV1_DAG_PB: [u8; 2] = [0x01, 0x70];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentIdError {
    #[error("empty content identifier")]
    Empty,
    #[error("invalid base32 content identifier: {0}")]
    InvalidBase32(String),
    #[error("invalid base58 content identifier: {0}")]
    InvalidBase58(String),
    #[error("unrecognized content identifier form: {0}")]
    UnrecognizedForm(String),
}

/// Canonical content-addressed identifier.
///
/// Stored as the lowercase base32 CIDv1 string form (`b...`). Two
/// identifiers compare equal exactly when the underlying CID bytes are
/// equal, so the canonical string is safe to use as a cache key, a
/// hidden-service name, and an on-disk directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Parse an identifier from its string form.
    ///
    /// Accepts the base32 CIDv1 form (`bafy...`, any case) and the legacy
    /// base58 CIDv0 form (`Qm...`), normalizing both to canonical
    /// lowercase base32 CIDv1.
    pub fn parse(s: &str) -> Result<Self, ContentIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ContentIdError::Empty);
        }

        if s.starts_with("Qm") {
            let multihash = bs58::decode(s)
                .into_vec()
                .map_err(|e| ContentIdError::InvalidBase58(e.to_string()))?;
            return Self::from_cid_bytes(&multihash);
        }

        let lower = s.to_lowercase();
        if let Some(body) = lower.strip_prefix('b') {
            let bytes = data_encoding::BASE32_NOPAD
                .decode(body.to_uppercase().as_bytes())
                .map_err(|e| ContentIdError::InvalidBase32(e.to_string()))?;
            return Self::from_cid_bytes(&bytes);
        }

        Err(ContentIdError::UnrecognizedForm(s.to_string()))
    }

    /// Build the canonical identifier from raw CID bytes.
    ///
    /// A bare sha2-256 multihash (`0x12 0x20 ...`, the CIDv0 payload) is
    /// wrapped as a dag-pb CIDv1 so both record generations normalize to
    /// the same string.
    pub fn from_cid_bytes(bytes: &[u8]) -> Result<Self, ContentIdError> {
        if bytes.is_empty() {
            return Err(ContentIdError::Empty);
        }

        let cid = if bytes[0] == 0x12 {
            let mut v1 = CIDV1_DAG_PB.to_vec();
            v1.extend_from_slice(bytes);
            v1
        } else {
            bytes.to_vec()
        };

        let encoded = data_encoding::BASE32_NOPAD.encode(&cid).to_lowercase();
        Ok(Self(format!("b{}", encoded)))
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// How a name record reached its content identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    /// The record encoded the payload's identifier directly.
    Immutable,
    /// The record was a naming pointer; the identifier is the immutable
    /// target it currently points at and may change between resolutions.
    Mutable,
}

/// Result of resolving a naming-system label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub id: ContentId,
    pub kind: ContentKind,
}

impl ResolvedName {
    pub fn immutable(id: ContentId) -> Self {
        Self {
            id,
            kind: ContentKind::Immutable,
        }
    }

    pub fn mutable(id: ContentId) -> Self {
        Self {
            id,
            kind: ContentKind::Mutable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_multihash() -> Vec<u8> {
        let mut mh = vec![0x12, 0x20];
        mh.extend_from_slice(&[0xabu8; 32]);
        mh
    }

    #[test]
    fn cid_bytes_roundtrip_through_string_form() {
        let id = ContentId::from_cid_bytes(&sample_multihash()).unwrap();
        let reparsed = ContentId::parse(id.as_str()).unwrap();
        assert_eq!(id, reparsed);
    }

    #[test]
    fn cidv0_and_cidv1_forms_normalize_to_same_id() {
        let multihash = sample_multihash();
        let v0 = bs58::encode(&multihash).into_string();
        assert!(v0.starts_with("Qm"));

        let from_v0 = ContentId::parse(&v0).unwrap();
        let from_bytes = ContentId::from_cid_bytes(&multihash).unwrap();
        assert_eq!(from_v0, from_bytes);
        assert!(from_v0.as_str().starts_with('b'));
    }

    #[test]
    fn parse_is_case_insensitive_for_base32() {
        let id = ContentId::from_cid_bytes(&sample_multihash()).unwrap();
        let upper = id.as_str().to_uppercase().replacen('B', "b", 1);
        let reparsed = ContentId::parse(&upper).unwrap();
        assert_eq!(id, reparsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(ContentId::parse(""), Err(ContentIdError::Empty)));
        assert!(matches!(
            ContentId::parse("example.eth"),
            Err(ContentIdError::UnrecognizedForm(_))
        ));
        assert!(ContentId::parse("b!!!!").is_err());
    }

    #[test]
    fn resolved_name_carries_kind() {
        let id = ContentId::from_cid_bytes(&sample_multihash()).unwrap();
        assert_eq!(
            ResolvedName::immutable(id.clone()).kind,
            ContentKind::Immutable
        );
        assert_eq!(ResolvedName::mutable(id).kind, ContentKind::Mutable);
    }
}
