//! Manifest store format of the loopback engine.
//!
//! A signed asset is the original bytes followed by a trailer:
//! `store JSON || store length (u64 LE) || MAGIC`. The store holds one
//! manifest whose claim binds the SHA-256 of the asset bytes.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Marks the end of an embedded manifest store.
pub(super) const MAGIC: &[u8; 8] = b"C2PALOOP";

const FOOTER_LEN: usize = 8 + MAGIC.len();

/// Computes SHA-256 hash of data and returns base64-encoded string.
pub(super) fn sha256_base64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

/// What the signer signs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(super) struct Claim {
    pub claim_generator: String,
    pub format: String,
    pub definition: Value,
    pub asset_hash: String,
}

impl Claim {
    pub(super) fn new(format: &str, definition: Value, asset: &[u8]) -> Self {
        Self {
            claim_generator: format!("c2pa-bridge/{}", env!("CARGO_PKG_VERSION")),
            format: format.to_string(),
            definition,
            asset_hash: sha256_base64(asset),
        }
    }

    /// Stable label derived from the claim bytes.
    pub(super) fn label(claim_bytes: &[u8]) -> String {
        let digest = Sha256::digest(claim_bytes);
        let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        format!("urn:c2pa:loopback:{hex}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(super) struct SignatureInfo {
    pub alg: String,
    pub cert_chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_authority: Option<String>,
    /// Base64-encoded signature over the serialized claim.
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(super) struct Manifest {
    #[serde(flatten)]
    pub claim: Claim,
    pub signature: SignatureInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(super) struct ManifestStore {
    pub active_manifest: String,
    pub manifests: BTreeMap<String, Manifest>,
}

impl ManifestStore {
    pub(super) fn single(label: String, manifest: Manifest) -> Self {
        Self {
            active_manifest: label.clone(),
            manifests: BTreeMap::from([(label, manifest)]),
        }
    }
}

/// Appends the footer to serialized store bytes.
pub(super) fn trailer(store: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(store.len() + FOOTER_LEN);
    out.extend_from_slice(store);
    out.extend_from_slice(&(store.len() as u64).to_le_bytes());
    out.extend_from_slice(MAGIC);
    out
}

/// Splits an asset into its original bytes and embedded store, if any.
pub(super) fn split(bytes: &[u8]) -> Result<(&[u8], Option<ManifestStore>), String> {
    if bytes.len() < FOOTER_LEN || !bytes.ends_with(MAGIC) {
        return Ok((bytes, None));
    }
    let footer = bytes.len() - FOOTER_LEN;
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[footer..footer + 8]);
    let len = usize::try_from(u64::from_le_bytes(len))
        .ok()
        .filter(|len| *len <= footer)
        .ok_or("manifest store trailer is corrupt")?;

    let start = footer - len;
    let store = serde_json::from_slice(&bytes[start..footer])
        .map_err(|e| format!("manifest store is malformed: {e}"))?;
    Ok((&bytes[..start], Some(store)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> ManifestStore {
        let claim = Claim::new("image/png", serde_json::json!({"title": "t"}), b"asset");
        let label = Claim::label(b"claim");
        ManifestStore::single(
            label,
            Manifest {
                claim,
                signature: SignatureInfo {
                    alg: "es256".into(),
                    cert_chain: "pem".into(),
                    time_authority: None,
                    value: BASE64.encode(b"sig"),
                },
            },
        )
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(sha256_base64(b""), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn test_plain_asset_has_no_store() {
        let (asset, store) = split(b"just pixels").unwrap();
        assert_eq!(asset, b"just pixels");
        assert!(store.is_none());
    }

    #[test]
    fn test_split_recovers_asset_and_store() {
        let store = sample_store();
        let mut signed = b"asset".to_vec();
        signed.extend(trailer(&serde_json::to_vec(&store).unwrap()));

        let (asset, found) = split(&signed).unwrap();
        assert_eq!(asset, b"asset");
        assert_eq!(found.unwrap(), store);
    }

    #[test]
    fn test_corrupt_length() {
        let mut bytes = b"{}".to_vec();
        bytes.extend_from_slice(&999u64.to_le_bytes());
        bytes.extend_from_slice(MAGIC);
        assert!(split(&bytes).unwrap_err().contains("corrupt"));
    }

    #[test]
    fn test_malformed_store() {
        let signed = trailer(b"not json");
        assert!(split(&signed).unwrap_err().contains("malformed"));
    }

    #[test]
    fn test_label_is_stable() {
        assert_eq!(Claim::label(b"x"), Claim::label(b"x"));
        assert_ne!(Claim::label(b"x"), Claim::label(b"y"));
    }
}
