//! End-to-end scenarios over the loopback engine.

use std::ffi::{c_char, c_void};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;

use c2pa_bridge::ffi::{
    C2paBuilder, C2paReader, C2paSigner, C2paSigningAlg, C2paStream, EngineApi, FlushCallback,
    ReadCallback, SeekCallback, SignerCallback, StreamContext, WriteCallback,
};
use c2pa_bridge::{
    live_handles, Builder, CallbackSigner, Engine, Error, LiveHandles, LocalSigner, ReadOnly,
    Reader, Signer, SigningAlg,
};

const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00 scanlines \xFF\xD9";

/// Tests that count live handles or engine calls take this lock.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

static ENGINE_CALLS: AtomicUsize = AtomicUsize::new(0);

fn engine_calls() -> usize {
    ENGINE_CALLS.load(Ordering::SeqCst)
}

fn loopback() -> &'static EngineApi {
    Engine::loopback().api()
}

unsafe extern "C" fn counted_create_stream(
    context: *mut StreamContext,
    read: ReadCallback,
    seek: SeekCallback,
    write: WriteCallback,
    flush: FlushCallback,
) -> *mut C2paStream {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().create_stream)(context, read, seek, write, flush) }
}

unsafe extern "C" fn counted_reader_from_stream(
    format: *const c_char,
    stream: *mut C2paStream,
) -> *mut C2paReader {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().reader_from_stream)(format, stream) }
}

unsafe extern "C" fn counted_reader_json(reader: *mut C2paReader) -> *mut c_char {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().reader_json)(reader) }
}

unsafe extern "C" fn counted_set_no_embed(builder: *mut C2paBuilder) {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().builder_set_no_embed)(builder) }
}

unsafe extern "C" fn counted_builder_sign(
    builder: *mut C2paBuilder,
    format: *const c_char,
    source: *mut C2paStream,
    dest: *mut C2paStream,
    signer: *mut C2paSigner,
    manifest_bytes_ptr: *mut *const u8,
) -> i64 {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().builder_sign)(builder, format, source, dest, signer, manifest_bytes_ptr) }
}

unsafe extern "C" fn counted_signer_create(
    context: *const c_void,
    callback: SignerCallback,
    alg: C2paSigningAlg,
    certs: *const c_char,
    tsa_url: *const c_char,
) -> *mut C2paSigner {
    ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
    unsafe { (loopback().signer_create)(context, callback, alg, certs, tsa_url) }
}

/// The loopback engine with every working call counted.
fn counting_engine() -> Engine {
    static API: OnceLock<EngineApi> = OnceLock::new();
    let api = API.get_or_init(|| EngineApi {
        create_stream: counted_create_stream,
        reader_from_stream: counted_reader_from_stream,
        reader_json: counted_reader_json,
        builder_set_no_embed: counted_set_no_embed,
        builder_sign: counted_builder_sign,
        signer_create: counted_signer_create,
        ..*loopback()
    });
    // SAFETY: every entry delegates to the loopback table.
    unsafe { Engine::from_api(api) }
}

const CHAIN: &str = include_str!("fixtures/chain.pem");
const RSA_KEY: &str = include_str!("fixtures/ps256.key");

fn cert_chain() -> String {
    CHAIN.to_string()
}

fn key_pem() -> String {
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    let secret = p256::SecretKey::from_slice(&[3u8; 32]).unwrap();
    secret.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
}

fn local_signer() -> Arc<dyn Signer> {
    Arc::new(LocalSigner::from_pem(&cert_chain(), &key_pem()).unwrap())
}

fn write_jpeg(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, JPEG).unwrap();
    path
}

#[test]
fn test_asset_without_manifest_reads_empty_store() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg");

    let mut reader = Reader::from_file(Engine::loopback(), &photo).unwrap();
    assert_eq!(reader.to_json().unwrap(), "{}");
    reader.close().unwrap();
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_sign_then_read_back() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg");
    let signed = dir.path().join("photo_signed.jpg");

    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let manifest = builder.sign(&photo, &signed, &local_signer()).unwrap();
    assert!(!manifest.is_empty());
    builder.close().unwrap();
    assert_eq!(live_handles(), LiveHandles::default());

    let bytes = fs::read(&signed).unwrap();
    assert!(bytes.starts_with(JPEG));

    let reader = Reader::from_file(Engine::loopback(), &signed).unwrap();
    let store = serde_json::Value::try_from(&reader).unwrap();
    let active = store["active_manifest"].as_str().unwrap();
    let manifest = &store["manifests"][active];
    assert_eq!(manifest["format"], "image/jpeg");
    assert_eq!(manifest["signature"]["alg"], "es256");
}

#[test]
fn test_ps256_signer_signs_photo() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg");
    let signed = dir.path().join("photo_signed.jpg");

    let signer: Arc<dyn Signer> = Arc::new(LocalSigner::from_pem(CHAIN, RSA_KEY).unwrap());
    assert_eq!(signer.alg(), SigningAlg::Ps256);

    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let manifest = builder.sign(&photo, &signed, &signer).unwrap();
    assert!(!manifest.is_empty());
    assert!(fs::metadata(&signed).unwrap().len() > JPEG.len() as u64);
    assert_eq!(live_handles(), LiveHandles::default());

    let reader = Reader::from_file(Engine::loopback(), &signed).unwrap();
    let store = serde_json::Value::try_from(&reader).unwrap();
    let active = store["active_manifest"].as_str().unwrap();
    assert_eq!(store["manifests"][active]["signature"]["alg"], "ps256");
}

#[test]
fn test_corrupt_store_leaves_reader_unopened() {
    let _guard = serial();
    let mut corrupt = b"{}".to_vec();
    corrupt.extend_from_slice(&999u64.to_le_bytes());
    corrupt.extend_from_slice(b"C2PALOOP");

    let mut reader = Reader::new(Engine::loopback());
    let err = reader.open_stream("jpg", Cursor::new(corrupt)).unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert!(!reader.is_open());
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_failed_sign_preserves_existing_output() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg");
    let signed = dir.path().join("photo_signed.jpg");
    fs::write(&signed, b"earlier signed output").unwrap();

    let signer: Arc<dyn Signer> = Arc::new(CallbackSigner::new(
        |_: &[u8]| Err(Error::SigningFailure("hardware token unplugged".into())),
        SigningAlg::Ps256,
        cert_chain(),
    ));
    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    assert!(matches!(builder.sign(&photo, &signed, &signer), Err(Error::Engine(_))));
    assert_eq!(fs::read(&signed).unwrap(), b"earlier signed output");
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_failing_signer_leaves_no_handles() {
    let _guard = serial();
    let before = live_handles();
    let signer: Arc<dyn Signer> = Arc::new(CallbackSigner::new(
        |_: &[u8]| Err(Error::SigningFailure("hardware token unplugged".into())),
        SigningAlg::Es256,
        cert_chain(),
    ));

    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let err = builder
        .sign_stream("jpg", Cursor::new(JPEG.to_vec()), Cursor::new(Vec::new()), &signer)
        .unwrap_err();
    match err {
        Error::Engine(message) => assert!(message.contains("signer callback failed"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(live_handles(), before);
}

#[test]
fn test_panicking_signer_is_contained() {
    let _guard = serial();
    let signer: Arc<dyn Signer> = Arc::new(CallbackSigner::new(
        |_: &[u8]| -> c2pa_bridge::Result<Vec<u8>> { panic!("signing routine exploded") },
        SigningAlg::Ed25519,
        cert_chain(),
    ));

    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let err = builder
        .sign_stream("png", Cursor::new(b"png".to_vec()), Cursor::new(Vec::new()), &signer)
        .unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_empty_certificate_chain_rejected_by_engine() {
    let _guard = serial();
    let signer: Arc<dyn Signer> = Arc::new(CallbackSigner::new(
        |data: &[u8]| Ok(data.to_vec()),
        SigningAlg::Es256,
        "",
    ));

    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let err = builder
        .sign_stream("jpg", Cursor::new(JPEG.to_vec()), Cursor::new(Vec::new()), &signer)
        .unwrap_err();
    match err {
        Error::Engine(message) => assert!(message.contains("certificate"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_bad_key_fails_before_signing() {
    let _guard = serial();
    let calls = engine_calls();
    let err = LocalSigner::from_pem(&cert_chain(), "not a key").unwrap_err();
    assert!(matches!(err, Error::Credentials(_)));

    let not_a_certificate =
        "-----BEGIN CERTIFICATE-----\naGVsbG8gd29ybGQ=\n-----END CERTIFICATE-----\n";
    let err = LocalSigner::from_pem(not_a_certificate, RSA_KEY).unwrap_err();
    assert!(matches!(err, Error::Credentials(_)));

    assert_eq!(engine_calls(), calls);
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_unknown_extension_never_reaches_engine() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo");
    let engine = counting_engine();

    let calls = engine_calls();
    let err = Reader::from_file(engine, &photo).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));

    let mut builder = Builder::with_json(engine, "{}").unwrap();
    let output = dir.path().join("photo_signed");
    let err = builder.sign(&photo, &output, &local_signer()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert!(!output.exists());

    assert_eq!(engine_calls(), calls);
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_closed_wrappers_never_reach_engine() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg");
    let engine = counting_engine();

    let mut reader = Reader::from_file(engine, &photo).unwrap();
    let mut builder = Builder::with_json(engine, "{}").unwrap();
    reader.close().unwrap();
    builder.close().unwrap();

    let calls = engine_calls();
    assert!(matches!(reader.to_json(), Err(Error::UseAfterClose("Reader"))));
    assert!(matches!(reader.close(), Err(Error::UseAfterClose("Reader"))));
    assert!(matches!(builder.set_no_embed(), Err(Error::UseAfterClose("Builder"))));
    let err = builder
        .sign(&photo, &dir.path().join("out.jpg"), &local_signer())
        .unwrap_err();
    assert!(matches!(err, Error::UseAfterClose("Builder")));
    assert_eq!(engine_calls(), calls);
}

#[test]
fn test_unopened_reader_never_reaches_engine() {
    let _guard = serial();
    let reader = Reader::new(counting_engine());
    let calls = engine_calls();
    assert!(matches!(reader.to_json(), Err(Error::NotOpen("Reader"))));
    assert_eq!(engine_calls(), calls);
}

#[test]
fn test_read_only_destination_aborts_sign() {
    let _guard = serial();
    let mut builder = Builder::with_json(Engine::loopback(), "{}").unwrap();
    let err = builder
        .sign_stream(
            "image/jpeg",
            Cursor::new(JPEG.to_vec()),
            ReadOnly(Cursor::new(Vec::new())),
            &local_signer(),
        )
        .unwrap_err();
    match err {
        Error::Engine(message) => assert!(message.contains("failed to write asset"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_dropped_wrappers_release_handles() {
    let _guard = serial();
    let engine = Engine::loopback();
    {
        let mut builder = Builder::with_json(engine, r#"{"title":"dropped"}"#).unwrap();
        let (_, signed) = builder
            .sign_stream("jpeg", Cursor::new(JPEG.to_vec()), Cursor::new(Vec::new()), &local_signer())
            .unwrap();
        let mut reader = Reader::new(engine);
        reader.open_stream("jpeg", Cursor::new(signed.into_inner())).unwrap();
        assert!(reader.to_json().unwrap().contains("dropped"));
    }
    assert_eq!(live_handles(), LiveHandles::default());
}

#[test]
fn test_concurrent_signing() {
    let _guard = serial();
    let signer = local_signer();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let signer = Arc::clone(&signer);
            thread::spawn(move || {
                let engine = Engine::loopback();
                let definition = format!(r#"{{"title":"worker {i}"}}"#);
                let mut builder = Builder::with_json(engine, &definition).unwrap();
                let asset = format!("asset from worker {i}").into_bytes();
                let (_, signed) = builder
                    .sign_stream("png", Cursor::new(asset), Cursor::new(Vec::new()), &signer)
                    .unwrap();

                let mut reader = Reader::new(engine);
                reader.open_stream("png", Cursor::new(signed.into_inner())).unwrap();
                reader.to_json().unwrap()
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let json = worker.join().unwrap();
        assert!(json.contains(&format!("worker {i}")));
    }
    assert_eq!(live_handles(), LiveHandles::default());
}
