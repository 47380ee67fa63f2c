//! C-compatible types shared with the native provenance engine.
//!
//! The engine is reached only through [`EngineApi`], a table of C function
//! pointers shaped after the C2PA C API. Every handle the engine hands out is
//! opaque on this side; every managed object the engine needs to call back
//! into is represented by a token carried in a `context` pointer.

use std::ffi::{c_char, c_void};

/// Opaque native reader (a parsed manifest-bearing asset).
#[repr(C)]
pub struct C2paReader {
    _private: [u8; 0],
}

/// Opaque native builder (an in-progress manifest assembly).
#[repr(C)]
pub struct C2paBuilder {
    _private: [u8; 0],
}

/// Opaque native signer created per sign call.
#[repr(C)]
pub struct C2paSigner {
    _private: [u8; 0],
}

/// Opaque native stream wrapping the four stream callbacks.
#[repr(C)]
pub struct C2paStream {
    _private: [u8; 0],
}

/// Context pointer the engine passes back to the stream callbacks.
///
/// Never dereferenced: the pointer value is a handle table token.
#[repr(C)]
pub struct StreamContext {
    _private: [u8; 0],
}

/// Origin of a seek request.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C2paSeekMode {
    Start = 0,
    Current = 1,
    End = 2,
}

/// Signing algorithms understood by the engine.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C2paSigningAlg {
    Es256 = 0,
    Es384 = 1,
    Es512 = 2,
    Ps256 = 3,
    Ps384 = 4,
    Ps512 = 5,
    Ed25519 = 6,
}

/// Reads up to `len` bytes into `data`. Returns the count, `0` at end of
/// stream, or a negative value on failure.
pub type ReadCallback =
    unsafe extern "C" fn(context: *mut StreamContext, data: *mut u8, len: isize) -> isize;

/// Moves the stream position. Returns the new position or a negative value.
pub type SeekCallback =
    unsafe extern "C" fn(context: *mut StreamContext, offset: isize, mode: C2paSeekMode) -> isize;

/// Writes up to `len` bytes from `data`. Returns the count written or a
/// negative value.
pub type WriteCallback =
    unsafe extern "C" fn(context: *mut StreamContext, data: *const u8, len: isize) -> isize;

/// Commits buffered writes. Returns `0` or a negative value.
pub type FlushCallback = unsafe extern "C" fn(context: *mut StreamContext) -> isize;

/// Signs `len` bytes at `data` into `signed_bytes` (capacity `signed_len`).
/// Returns the signature length or a negative value.
pub type SignerCallback = unsafe extern "C" fn(
    context: *const c_void,
    data: *const u8,
    len: usize,
    signed_bytes: *mut u8,
    signed_len: usize,
) -> isize;

/// Function table of the native engine.
///
/// Strings passed in are NUL-terminated and only borrowed for the duration of
/// the call; the engine copies anything it retains. Strings returned by the
/// engine must be released with `release_string`, manifest buffers with
/// `manifest_bytes_free`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EngineApi {
    pub version: unsafe extern "C" fn() -> *mut c_char,
    pub error: unsafe extern "C" fn() -> *mut c_char,
    pub release_string: unsafe extern "C" fn(s: *mut c_char),

    pub create_stream: unsafe extern "C" fn(
        context: *mut StreamContext,
        read: ReadCallback,
        seek: SeekCallback,
        write: WriteCallback,
        flush: FlushCallback,
    ) -> *mut C2paStream,
    pub release_stream: unsafe extern "C" fn(stream: *mut C2paStream),

    pub reader_from_stream:
        unsafe extern "C" fn(format: *const c_char, stream: *mut C2paStream) -> *mut C2paReader,
    pub reader_json: unsafe extern "C" fn(reader: *mut C2paReader) -> *mut c_char,
    pub reader_free: unsafe extern "C" fn(reader: *mut C2paReader),

    pub builder_from_json: unsafe extern "C" fn(json: *const c_char) -> *mut C2paBuilder,
    pub builder_set_no_embed: unsafe extern "C" fn(builder: *mut C2paBuilder),
    pub builder_free: unsafe extern "C" fn(builder: *mut C2paBuilder),
    pub builder_sign: unsafe extern "C" fn(
        builder: *mut C2paBuilder,
        format: *const c_char,
        source: *mut C2paStream,
        dest: *mut C2paStream,
        signer: *mut C2paSigner,
        manifest_bytes_ptr: *mut *const u8,
    ) -> i64,
    pub manifest_bytes_free: unsafe extern "C" fn(bytes: *const u8),

    pub signer_create: unsafe extern "C" fn(
        context: *const c_void,
        callback: SignerCallback,
        alg: C2paSigningAlg,
        certs: *const c_char,
        tsa_url: *const c_char,
    ) -> *mut C2paSigner,
    pub signer_free: unsafe extern "C" fn(signer: *mut C2paSigner),
}

/// Result returned to the engine when a callback fails.
pub const FAILURE: isize = -1;
