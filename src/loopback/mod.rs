//! In-process reference engine.
//!
//! Implements [`EngineApi`] in Rust with the C ABI so the bridge and the CLI
//! run without the native library. Like the native engine, it touches assets
//! only through the stream callbacks, signs only through the signer callback,
//! and records failures in a thread-local error slot that every entry point
//! clears on entry.
//!
//! It embeds a simple manifest store trailer (see [`store`]) and performs no
//! trust or signature validation.

mod io;
mod store;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::io::Write;
use std::ptr;
use std::sync::{Mutex, PoisonError};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

use self::io::CallbackStream;
use self::store::{Claim, Manifest, ManifestStore, SignatureInfo};
use crate::ffi::{
    C2paBuilder, C2paReader, C2paSigner, C2paSigningAlg, C2paStream, EngineApi, FlushCallback,
    ReadCallback, SeekCallback, SignerCallback, StreamContext, WriteCallback,
};
use crate::signer::SigningAlg;

/// Signature buffer handed to the signer callback.
const SIGNATURE_RESERVE: usize = 16 * 1024;

pub const API: EngineApi = EngineApi {
    version: loopback_version,
    error: loopback_error,
    release_string: loopback_release_string,
    create_stream: loopback_create_stream,
    release_stream: loopback_release_stream,
    reader_from_stream: loopback_reader_from_stream,
    reader_json: loopback_reader_json,
    reader_free: loopback_reader_free,
    builder_from_json: loopback_builder_from_json,
    builder_set_no_embed: loopback_builder_set_no_embed,
    builder_free: loopback_builder_free,
    builder_sign: loopback_builder_sign,
    manifest_bytes_free: loopback_manifest_bytes_free,
    signer_create: loopback_signer_create,
    signer_free: loopback_signer_free,
};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Manifest buffers handed out by `builder_sign`, address to length.
static MANIFESTS: Mutex<BTreeMap<usize, usize>> = Mutex::new(BTreeMap::new());

fn clear_error() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

fn set_error(message: String) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Boxes a successful result for the caller, or records the failure.
fn hand_out<T, U>(result: Result<T, String>) -> *mut U {
    match result {
        Ok(value) => Box::into_raw(Box::new(value)).cast(),
        Err(message) => {
            set_error(message);
            ptr::null_mut()
        }
    }
}

unsafe fn text<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| format!("{what} is not valid UTF-8"))
}

unsafe fn object<'a, T, U>(ptr: *mut U, what: &str) -> Result<&'a mut T, String> {
    unsafe { ptr.cast::<T>().as_mut() }.ok_or_else(|| format!("{what} is null"))
}

unsafe fn free<T, U>(ptr: *mut U) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
    }
}

fn normalize(format: &str) -> Result<&'static str, String> {
    crate::format::normalize(format).map_err(|e| e.to_string())
}

fn owned_string(value: String) -> *mut c_char {
    CString::new(value).map_or(ptr::null_mut(), CString::into_raw)
}

struct LoopbackReader {
    json: String,
}

struct LoopbackBuilder {
    definition: Value,
    no_embed: bool,
}

struct LoopbackSigner {
    context: *const c_void,
    callback: SignerCallback,
    alg: C2paSigningAlg,
    certs: String,
    tsa_url: Option<String>,
}

impl LoopbackSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let mut signature = vec![0u8; SIGNATURE_RESERVE];
        // SAFETY: both buffers are valid for their lengths.
        let n = unsafe {
            (self.callback)(
                self.context,
                data.as_ptr(),
                data.len(),
                signature.as_mut_ptr(),
                signature.len(),
            )
        };
        let n = usize::try_from(n)
            .ok()
            .filter(|n| *n <= signature.len())
            .ok_or("signer callback failed")?;
        signature.truncate(n);
        Ok(signature)
    }
}

unsafe extern "C" fn loopback_version() -> *mut c_char {
    owned_string(format!("c2pa-loopback/{}", env!("CARGO_PKG_VERSION")))
}

unsafe extern "C" fn loopback_error() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(message) => owned_string(message.clone()),
        None => ptr::null_mut(),
    })
}

unsafe extern "C" fn loopback_release_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

unsafe extern "C" fn loopback_create_stream(
    context: *mut StreamContext,
    read: ReadCallback,
    seek: SeekCallback,
    write: WriteCallback,
    flush: FlushCallback,
) -> *mut C2paStream {
    clear_error();
    hand_out(Ok(CallbackStream {
        context,
        read,
        seek,
        write,
        flush,
    }))
}

unsafe extern "C" fn loopback_release_stream(stream: *mut C2paStream) {
    unsafe { free::<CallbackStream, _>(stream) }
}

unsafe extern "C" fn loopback_reader_from_stream(
    format: *const c_char,
    stream: *mut C2paStream,
) -> *mut C2paReader {
    clear_error();
    let result = (|| -> Result<LoopbackReader, String> {
        normalize(unsafe { text(format, "format") }?)?;
        let stream: &mut CallbackStream = unsafe { object(stream, "stream") }?;
        let bytes = stream
            .read_all()
            .map_err(|e| format!("failed to read asset: {e}"))?;
        let json = match store::split(&bytes)?.1 {
            Some(store) => serde_json::to_string_pretty(&store).map_err(|e| e.to_string())?,
            None => "{}".to_string(),
        };
        Ok(LoopbackReader { json })
    })();
    hand_out(result)
}

unsafe extern "C" fn loopback_reader_json(reader: *mut C2paReader) -> *mut c_char {
    clear_error();
    match unsafe { object::<LoopbackReader, _>(reader, "reader") } {
        Ok(reader) => owned_string(reader.json.clone()),
        Err(message) => {
            set_error(message);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn loopback_reader_free(reader: *mut C2paReader) {
    unsafe { free::<LoopbackReader, _>(reader) }
}

unsafe extern "C" fn loopback_builder_from_json(json: *const c_char) -> *mut C2paBuilder {
    clear_error();
    let result = (|| -> Result<LoopbackBuilder, String> {
        let json = unsafe { text(json, "manifest definition") }?;
        let definition: Value = serde_json::from_str(json)
            .map_err(|e| format!("invalid manifest definition: {e}"))?;
        if !definition.is_object() {
            return Err("manifest definition must be a JSON object".to_string());
        }
        Ok(LoopbackBuilder {
            definition,
            no_embed: false,
        })
    })();
    hand_out(result)
}

unsafe extern "C" fn loopback_builder_set_no_embed(builder: *mut C2paBuilder) {
    clear_error();
    match unsafe { object::<LoopbackBuilder, _>(builder, "builder") } {
        Ok(builder) => builder.no_embed = true,
        Err(message) => set_error(message),
    }
}

unsafe extern "C" fn loopback_builder_free(builder: *mut C2paBuilder) {
    unsafe { free::<LoopbackBuilder, _>(builder) }
}

unsafe extern "C" fn loopback_builder_sign(
    builder: *mut C2paBuilder,
    format: *const c_char,
    source: *mut C2paStream,
    dest: *mut C2paStream,
    signer: *mut C2paSigner,
    manifest_bytes_ptr: *mut *const u8,
) -> i64 {
    clear_error();
    let result = (|| -> Result<Vec<u8>, String> {
        let builder: &mut LoopbackBuilder = unsafe { object(builder, "builder") }?;
        let format = normalize(unsafe { text(format, "format") }?)?;
        let signer: &mut LoopbackSigner = unsafe { object(signer, "signer") }?;
        let source: &mut CallbackStream = unsafe { object(source, "source stream") }?;

        let bytes = source
            .read_all()
            .map_err(|e| format!("failed to read asset: {e}"))?;
        // Re-signing replaces any store already embedded.
        let (asset, _) = store::split(&bytes)?;

        let claim = Claim::new(format, builder.definition.clone(), asset);
        let claim_bytes = serde_json::to_vec(&claim).map_err(|e| e.to_string())?;
        let signature = signer.sign(&claim_bytes)?;
        let store = ManifestStore::single(
            Claim::label(&claim_bytes),
            Manifest {
                claim,
                signature: SignatureInfo {
                    alg: SigningAlg::from(signer.alg).to_string(),
                    cert_chain: signer.certs.clone(),
                    time_authority: signer.tsa_url.clone(),
                    value: BASE64.encode(&signature),
                },
            },
        );
        let store_bytes = serde_json::to_vec(&store).map_err(|e| e.to_string())?;

        let dest: &mut CallbackStream = unsafe { object(dest, "destination stream") }?;
        let write_failed = |e: std::io::Error| format!("failed to write asset: {e}");
        dest.write_all(asset).map_err(write_failed)?;
        if !builder.no_embed {
            dest.write_all(&store::trailer(&store_bytes))
                .map_err(write_failed)?;
        }
        dest.flush().map_err(write_failed)?;
        Ok(store_bytes)
    })();

    match result {
        Ok(bytes) => {
            let len = bytes.len() as i64;
            if !manifest_bytes_ptr.is_null() {
                let len = bytes.len();
                let raw = Box::into_raw(bytes.into_boxed_slice()) as *const u8;
                MANIFESTS
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(raw as usize, len);
                unsafe { *manifest_bytes_ptr = raw };
            }
            len
        }
        Err(message) => {
            set_error(message);
            -1
        }
    }
}

unsafe extern "C" fn loopback_manifest_bytes_free(bytes: *const u8) {
    let len = MANIFESTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&(bytes as usize));
    if let Some(len) = len {
        let raw = ptr::slice_from_raw_parts_mut(bytes as *mut u8, len);
        drop(unsafe { Box::from_raw(raw) });
    }
}

unsafe extern "C" fn loopback_signer_create(
    context: *const c_void,
    callback: SignerCallback,
    alg: C2paSigningAlg,
    certs: *const c_char,
    tsa_url: *const c_char,
) -> *mut C2paSigner {
    clear_error();
    let result = (|| -> Result<LoopbackSigner, String> {
        let certs = unsafe { text(certs, "certificate chain") }?;
        if certs.trim().is_empty() {
            return Err("no certificate chain supplied".to_string());
        }
        let tsa_url = if tsa_url.is_null() {
            None
        } else {
            Some(unsafe { text(tsa_url, "timestamp authority url") }?.to_string())
        };
        Ok(LoopbackSigner {
            context,
            callback,
            alg,
            certs: certs.to_string(),
            tsa_url,
        })
    })();
    hand_out(result)
}

unsafe extern "C" fn loopback_signer_free(signer: *mut C2paSigner) {
    unsafe { free::<LoopbackSigner, _>(signer) }
}
