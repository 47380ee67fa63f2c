//! Builder: an in-progress manifest assembly owned by the engine.

use std::fs::File;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::engine::{c_string, Engine};
use crate::error::{Error, Result};
use crate::ffi::C2paBuilder;
use crate::format;
use crate::lifecycle::Lifecycle;
use crate::signer::{Signer, SignerBridge};
use crate::stream::{StreamBridge, StreamResource};

const KIND: &str = "Builder";

/// Owns one native builder handle.
#[derive(Debug)]
pub struct Builder {
    engine: Engine,
    state: Lifecycle<C2paBuilder>,
}

impl Builder {
    /// An unopened builder.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            state: Lifecycle::Unopened,
        }
    }

    /// Creates an open builder from a manifest definition.
    pub fn with_json(engine: Engine, json: &str) -> Result<Self> {
        let mut builder = Self::new(engine);
        builder.load_json(json)?;
        Ok(builder)
    }

    /// Constructs the native builder from a manifest definition.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        self.state.ensure_unopened(KIND)?;
        let json = c_string(json, "manifest definition")?;
        // SAFETY: valid C string for the duration of the call.
        let raw = unsafe { (self.engine.api().builder_from_json)(json.as_ptr()) };
        let handle =
            NonNull::new(raw).ok_or_else(|| self.engine.failure("failed to create builder"))?;
        self.state.open(handle);
        tracing::debug!("opened builder");
        Ok(())
    }

    /// Produces a sidecar manifest instead of embedding it in the asset.
    pub fn set_no_embed(&mut self) -> Result<()> {
        let handle = self.state.handle(KIND)?;
        // SAFETY: the handle is open and owned by this builder.
        unsafe { (self.engine.api().builder_set_no_embed)(handle.as_ptr()) };
        Ok(())
    }

    /// Signs `input` into `output`, deriving the format from the input's
    /// extension. Returns the manifest bytes produced by the engine.
    ///
    /// The signed asset is staged in a temporary file next to `output` and
    /// moved into place only after the engine succeeds. On failure an
    /// existing `output` is left untouched.
    pub fn sign(&mut self, input: &Path, output: &Path, signer: &Arc<dyn Signer>) -> Result<Vec<u8>> {
        self.state.handle(KIND)?;
        let format = format::from_path(input)?;
        let source = File::open(input)?;

        let dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let staged = NamedTempFile::new_in(dir)?;
        let dest = staged.reopen()?;
        let (manifest, dest) = self.sign_stream(format, source, dest, signer)?;
        drop(dest);

        staged.persist(output).map_err(|e| Error::Io(e.error))?;
        tracing::debug!(output = %output.display(), "wrote signed asset");
        Ok(manifest)
    }

    /// Signs the asset in `input` into `output` and hands `output` back.
    ///
    /// One stream bridge is built for each resource and one signer bridge for
    /// `signer`. All three are torn down before this returns, on success and
    /// on failure.
    #[tracing::instrument(skip_all, fields(format = %format))]
    pub fn sign_stream<I, O>(
        &mut self,
        format: &str,
        input: I,
        output: O,
        signer: &Arc<dyn Signer>,
    ) -> Result<(Vec<u8>, O)>
    where
        I: StreamResource + 'static,
        O: StreamResource + 'static,
    {
        let handle = self.state.handle(KIND)?;
        let format = c_string(format::normalize(format)?, "format")?;

        let signer = SignerBridge::new(self.engine, signer)?;
        let source = StreamBridge::new(self.engine, input)?;
        let dest = StreamBridge::new(self.engine, output)?;
        tracing::debug!(
            signer = signer.token().get(),
            source = source.token().get(),
            dest = dest.token().get(),
            "signing"
        );

        let mut manifest_ptr: *const u8 = ptr::null();
        // SAFETY: every pointer is live for the call; the manifest buffer is
        // owned by the engine until released below.
        let len = unsafe {
            (self.engine.api().builder_sign)(
                handle.as_ptr(),
                format.as_ptr(),
                source.native(),
                dest.native(),
                signer.native(),
                &mut manifest_ptr,
            )
        };
        if len < 0 {
            return Err(self.engine.failure("failed to sign asset"));
        }

        let manifest = self.take_manifest(manifest_ptr, len)?;
        drop(source);
        drop(signer);
        let output = dest.into_inner()?;
        Ok((manifest, output))
    }

    /// Copies the engine's manifest buffer and frees it.
    fn take_manifest(&self, ptr: *const u8, len: i64) -> Result<Vec<u8>> {
        if ptr.is_null() {
            return Ok(Vec::new());
        }
        let copied = usize::try_from(len)
            .map(|len| {
                // SAFETY: the engine reported `len` bytes at `ptr`.
                unsafe { slice::from_raw_parts(ptr, len) }.to_vec()
            })
            .map_err(|_| Error::Engine(format!("invalid manifest length {len}")));
        // SAFETY: returned by `builder_sign` and freed once.
        unsafe { (self.engine.api().manifest_bytes_free)(ptr) };
        copied
    }

    /// Releases the native handle. Closing twice fails with
    /// [`Error::UseAfterClose`].
    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.state.close(KIND)? {
            // SAFETY: the state machine hands the handle out exactly once.
            unsafe { (self.engine.api().builder_free)(handle.as_ptr()) };
            tracing::debug!("closed builder");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if let Err(err) = self.close() {
            tracing::error!(%err, "failed to release builder");
        }
    }
}
