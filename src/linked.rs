//! Function table over the system `c2pa_c` library.

use std::ffi::{c_char, c_void};

use crate::ffi::{
    C2paBuilder, C2paReader, C2paSigner, C2paSigningAlg, C2paStream, EngineApi, FlushCallback,
    ReadCallback, SeekCallback, SignerCallback, StreamContext, WriteCallback,
};

#[link(name = "c2pa_c")]
extern "C" {
    fn c2pa_version() -> *mut c_char;
    fn c2pa_error() -> *mut c_char;
    fn c2pa_release_string(s: *mut c_char);

    fn c2pa_create_stream(
        context: *mut StreamContext,
        read: ReadCallback,
        seek: SeekCallback,
        write: WriteCallback,
        flush: FlushCallback,
    ) -> *mut C2paStream;
    fn c2pa_release_stream(stream: *mut C2paStream);

    fn c2pa_reader_from_stream(format: *const c_char, stream: *mut C2paStream) -> *mut C2paReader;
    fn c2pa_reader_json(reader: *mut C2paReader) -> *mut c_char;
    fn c2pa_reader_free(reader: *mut C2paReader);

    fn c2pa_builder_from_json(json: *const c_char) -> *mut C2paBuilder;
    fn c2pa_builder_set_no_embed(builder: *mut C2paBuilder);
    fn c2pa_builder_free(builder: *mut C2paBuilder);
    fn c2pa_builder_sign(
        builder: *mut C2paBuilder,
        format: *const c_char,
        source: *mut C2paStream,
        dest: *mut C2paStream,
        signer: *mut C2paSigner,
        manifest_bytes_ptr: *mut *const u8,
    ) -> i64;
    fn c2pa_manifest_bytes_free(bytes: *const u8);

    fn c2pa_signer_create(
        context: *const c_void,
        callback: SignerCallback,
        alg: C2paSigningAlg,
        certs: *const c_char,
        tsa_url: *const c_char,
    ) -> *mut C2paSigner;
    fn c2pa_signer_free(signer: *mut C2paSigner);
}

pub(crate) static API: EngineApi = EngineApi {
    version: c2pa_version,
    error: c2pa_error,
    release_string: c2pa_release_string,
    create_stream: c2pa_create_stream,
    release_stream: c2pa_release_stream,
    reader_from_stream: c2pa_reader_from_stream,
    reader_json: c2pa_reader_json,
    reader_free: c2pa_reader_free,
    builder_from_json: c2pa_builder_from_json,
    builder_set_no_embed: c2pa_builder_set_no_embed,
    builder_free: c2pa_builder_free,
    builder_sign: c2pa_builder_sign,
    manifest_bytes_free: c2pa_manifest_bytes_free,
    signer_create: c2pa_signer_create,
    signer_free: c2pa_signer_free,
};
