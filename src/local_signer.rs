//! Signer backed by a local PKCS#8 private key and PEM certificate chain.
//!
//! Supports RSA keys (PS256), P-256 keys (ES256) and Ed25519 keys. Key and
//! certificate chain are parsed up front so bad credentials fail before any
//! engine call.

use std::fmt;
use std::fs;
use std::path::Path;

use ed25519_dalek::Signer as _;
use rand::rngs::OsRng;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use sha2::Sha256;
use x509_cert::Certificate;

use crate::error::{Error, Result};
use crate::signer::{Signer, SigningAlg};

enum Key {
    Ps256(rsa::pss::SigningKey<Sha256>),
    Es256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// A [`Signer`] holding its private key in memory.
pub struct LocalSigner {
    key: Key,
    certs: String,
    tsa_url: Option<String>,
}

impl LocalSigner {
    /// Loads a signer from PEM text. The algorithm follows the key type.
    pub fn from_pem(certs: &str, key_pem: &str) -> Result<Self> {
        let chain = parse_certificate_chain(certs)?;
        let key = parse_private_key(key_pem)?;
        let signer = Self {
            key,
            certs: certs.to_string(),
            tsa_url: None,
        };
        tracing::debug!(
            certs = chain.len(),
            subject = %chain[0].tbs_certificate.subject,
            alg = %signer.alg(),
            "loaded local signer"
        );
        Ok(signer)
    }

    /// Loads a signer from a certificate chain file and a key file.
    pub fn from_files(certs: &Path, key: &Path) -> Result<Self> {
        let certs = fs::read_to_string(certs)?;
        let key = fs::read_to_string(key)?;
        Self::from_pem(&certs, &key)
    }

    pub fn with_tsa_url(mut self, url: impl Into<String>) -> Self {
        self.tsa_url = Some(url.into());
        self
    }
}

impl Signer for LocalSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = match &self.key {
            Key::Ps256(key) => key.sign_with_rng(&mut OsRng, data).to_vec(),
            Key::Es256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
            Key::Ed25519(key) => key.sign(data).to_bytes().to_vec(),
        };
        Ok(signature)
    }

    fn alg(&self) -> SigningAlg {
        match self.key {
            Key::Ps256(_) => SigningAlg::Ps256,
            Key::Es256(_) => SigningAlg::Es256,
            Key::Ed25519(_) => SigningAlg::Ed25519,
        }
    }

    fn certs(&self) -> String {
        self.certs.clone()
    }

    fn time_authority_url(&self) -> Option<String> {
        self.tsa_url.clone()
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("alg", &self.alg())
            .field("tsa_url", &self.tsa_url)
            .finish_non_exhaustive()
    }
}

fn parse_private_key(pem: &str) -> Result<Key> {
    if let Ok(key) = <p256::ecdsa::SigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem)
    {
        return Ok(Key::Es256(key));
    }
    if let Ok(key) =
        <ed25519_dalek::SigningKey as ed25519_dalek::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem)
    {
        return Ok(Key::Ed25519(key));
    }
    if let Ok(key) = <rsa::RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem) {
        return Ok(Key::Ps256(rsa::pss::SigningKey::new(key)));
    }
    Err(Error::Credentials(
        "private key is not a PKCS#8 RSA, P-256 or Ed25519 key".to_string(),
    ))
}

/// Decodes every certificate in a PEM chain. The chain must not be empty.
fn parse_certificate_chain(pem: &str) -> Result<Vec<Certificate>> {
    let chain = Certificate::load_pem_chain(pem.as_bytes())
        .map_err(|e| Error::Credentials(format!("certificate chain does not parse: {e}")))?;
    if chain.is_empty() {
        return Err(Error::Credentials("no certificates found".to_string()));
    }
    Ok(chain)
}
