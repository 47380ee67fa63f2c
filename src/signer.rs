//! Signer bridge: a managed signing capability behind one native callback.
//!
//! The engine reads the algorithm, certificate chain and timestamp authority
//! once, when the native signer is created, and then calls [`signer_sign`]
//! with the bytes to sign. A [`SignerBridge`] lives for exactly one sign
//! call.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::slice;
use std::str::FromStr;
use std::sync::Arc;

use crate::engine::{c_string, Engine};
use crate::error::{Error, Result};
use crate::ffi::{C2paSigner, C2paSigningAlg, FAILURE};
use crate::handles::{HandleTable, Token};

/// Live signer bindings, keyed by token.
pub(crate) static SIGNERS: HandleTable<dyn Signer> = HandleTable::new();

/// Asymmetric signing algorithms the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlg {
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es384,
    Es512,
    Ed25519,
}

impl SigningAlg {
    pub const ALL: [SigningAlg; 7] = [
        SigningAlg::Ps256,
        SigningAlg::Ps384,
        SigningAlg::Ps512,
        SigningAlg::Es256,
        SigningAlg::Es384,
        SigningAlg::Es512,
        SigningAlg::Ed25519,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlg::Ps256 => "ps256",
            SigningAlg::Ps384 => "ps384",
            SigningAlg::Ps512 => "ps512",
            SigningAlg::Es256 => "es256",
            SigningAlg::Es384 => "es384",
            SigningAlg::Es512 => "es512",
            SigningAlg::Ed25519 => "ed25519",
        }
    }
}

impl From<SigningAlg> for C2paSigningAlg {
    fn from(alg: SigningAlg) -> Self {
        match alg {
            SigningAlg::Ps256 => C2paSigningAlg::Ps256,
            SigningAlg::Ps384 => C2paSigningAlg::Ps384,
            SigningAlg::Ps512 => C2paSigningAlg::Ps512,
            SigningAlg::Es256 => C2paSigningAlg::Es256,
            SigningAlg::Es384 => C2paSigningAlg::Es384,
            SigningAlg::Es512 => C2paSigningAlg::Es512,
            SigningAlg::Ed25519 => C2paSigningAlg::Ed25519,
        }
    }
}

impl From<C2paSigningAlg> for SigningAlg {
    fn from(alg: C2paSigningAlg) -> Self {
        match alg {
            C2paSigningAlg::Ps256 => SigningAlg::Ps256,
            C2paSigningAlg::Ps384 => SigningAlg::Ps384,
            C2paSigningAlg::Ps512 => SigningAlg::Ps512,
            C2paSigningAlg::Es256 => SigningAlg::Es256,
            C2paSigningAlg::Es384 => SigningAlg::Es384,
            C2paSigningAlg::Es512 => SigningAlg::Es512,
            C2paSigningAlg::Ed25519 => SigningAlg::Ed25519,
        }
    }
}

impl fmt::Display for SigningAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        SigningAlg::ALL
            .into_iter()
            .find(|alg| alg.as_str() == lower)
            .ok_or_else(|| format!("Unknown signing algorithm: {}", s))
    }
}

/// A signing capability the engine can call back into.
///
/// The bridge does not check that the algorithm matches the key; the engine
/// and the implementor own that.
pub trait Signer: Send + Sync {
    /// Signs `data`, returning the raw signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn alg(&self) -> SigningAlg;

    /// PEM-encoded certificate chain, signing certificate first.
    fn certs(&self) -> String;

    /// RFC 3161 timestamp authority, if any.
    fn time_authority_url(&self) -> Option<String> {
        None
    }
}

type SignFn = dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync;

/// A [`Signer`] built from a closure and its metadata.
pub struct CallbackSigner {
    callback: Box<SignFn>,
    alg: SigningAlg,
    certs: String,
    tsa_url: Option<String>,
}

impl CallbackSigner {
    pub fn new<F>(callback: F, alg: SigningAlg, certs: impl Into<String>) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
            alg,
            certs: certs.into(),
            tsa_url: None,
        }
    }

    pub fn with_tsa_url(mut self, url: impl Into<String>) -> Self {
        self.tsa_url = Some(url.into());
        self
    }
}

impl Signer for CallbackSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        (self.callback)(data)
    }

    fn alg(&self) -> SigningAlg {
        self.alg
    }

    fn certs(&self) -> String {
        self.certs.clone()
    }

    fn time_authority_url(&self) -> Option<String> {
        self.tsa_url.clone()
    }
}

impl fmt::Debug for CallbackSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSigner")
            .field("alg", &self.alg)
            .field("tsa_url", &self.tsa_url)
            .finish_non_exhaustive()
    }
}

/// A signer registered with the engine for one sign call.
#[derive(Debug)]
pub(crate) struct SignerBridge {
    engine: Engine,
    token: Token,
    native: Option<NonNull<C2paSigner>>,
}

impl SignerBridge {
    /// Registers `signer` and creates the native signer from copies of its
    /// metadata.
    pub(crate) fn new(engine: Engine, signer: &Arc<dyn Signer>) -> Result<Self> {
        let certs = c_string(&signer.certs(), "certificate chain")?;
        let tsa_url = signer
            .time_authority_url()
            .filter(|url| !url.is_empty())
            .map(|url| c_string(&url, "timestamp authority url"))
            .transpose()?;
        let alg = signer.alg();

        let token = SIGNERS.register(Arc::clone(signer));
        // SAFETY: the strings outlive the call and the engine copies what it
        // keeps; the context is a token, never dereferenced.
        let native = unsafe {
            (engine.api().signer_create)(
                token.as_signer_context(),
                signer_sign,
                alg.into(),
                certs.as_ptr(),
                tsa_url.as_ref().map_or(ptr::null(), |url| url.as_ptr()),
            )
        };
        match NonNull::new(native) {
            Some(native) => {
                tracing::debug!(token = token.get(), %alg, "created native signer");
                Ok(Self {
                    engine,
                    token,
                    native: Some(native),
                })
            }
            None => {
                let err = engine.failure("failed to create signer");
                let _ = SIGNERS.release(token);
                Err(err)
            }
        }
    }

    pub(crate) fn native(&self) -> *mut C2paSigner {
        self.native.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }
}

impl Drop for SignerBridge {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            // SAFETY: created by this engine's `signer_create`, freed once.
            unsafe { (self.engine.api().signer_free)(native.as_ptr()) };
            if SIGNERS.release(self.token).is_err() {
                tracing::error!(token = self.token.get(), "signer token already released");
            }
        }
    }
}

fn sign_into(token: Token, data: &[u8], out: &mut [u8]) -> Result<usize> {
    let signer = SIGNERS.resolve(token)?;
    let signature = signer.sign(data)?;
    if signature.len() > out.len() {
        return Err(Error::SigningFailure(format!(
            "signature of {} bytes exceeds the {} byte buffer",
            signature.len(),
            out.len()
        )));
    }
    out[..signature.len()].copy_from_slice(&signature);
    Ok(signature.len())
}

/// Signs `len` bytes at `data` and copies the signature into `signed_bytes`.
///
/// Returns the signature length, or [`FAILURE`] if signing failed or the
/// signature does not fit in `signed_len` bytes. Nothing is written on
/// failure.
///
/// # Safety
///
/// `data` must be valid for `len` bytes of reads and `signed_bytes` for
/// `signed_len` bytes of writes.
pub unsafe extern "C" fn signer_sign(
    context: *const c_void,
    data: *const u8,
    len: usize,
    signed_bytes: *mut u8,
    signed_len: usize,
) -> isize {
    let token = Token::from_context(context);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<usize> {
        let input: &[u8] = if len == 0 || data.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(data, len) }
        };
        let out: &mut [u8] = if signed_len == 0 || signed_bytes.is_null() {
            &mut []
        } else {
            unsafe { slice::from_raw_parts_mut(signed_bytes, signed_len) }
        };
        sign_into(token, input, out)
    }));

    match outcome {
        Ok(Ok(n)) => isize::try_from(n).unwrap_or(FAILURE),
        Ok(Err(err)) => {
            tracing::warn!(token = token.get(), %err, "signer callback failed");
            FAILURE
        }
        Err(_) => {
            tracing::error!(token = token.get(), "signer callback panicked");
            FAILURE
        }
    }
}
