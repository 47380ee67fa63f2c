//! Reader: a parsed manifest-bearing asset owned by the engine.

use std::fs::File;
use std::path::Path;
use std::ptr::NonNull;

use crate::engine::{c_string, Engine};
use crate::error::{Error, Result};
use crate::ffi::C2paReader;
use crate::format;
use crate::lifecycle::Lifecycle;
use crate::stream::{StreamBridge, StreamResource};

const KIND: &str = "Reader";

/// Owns one native reader handle.
///
/// ```no_run
/// use c2pa_bridge::{Engine, Reader};
///
/// let mut reader = Reader::from_file(Engine::default(), "photo.jpg".as_ref())?;
/// println!("{}", reader.to_json()?);
/// reader.close()?;
/// # Ok::<(), c2pa_bridge::Error>(())
/// ```
#[derive(Debug)]
pub struct Reader {
    engine: Engine,
    state: Lifecycle<C2paReader>,
}

impl Reader {
    /// An unopened reader.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            state: Lifecycle::Unopened,
        }
    }

    /// Opens a reader over a file, deriving the format from its extension.
    ///
    /// Fails with [`Error::UnsupportedFormat`] before touching the engine if
    /// the path has no recognizable extension.
    pub fn from_file(engine: Engine, path: &Path) -> Result<Self> {
        let format = format::from_path(path)?;
        let file = File::open(path)?;
        let mut reader = Self::new(engine);
        reader.open_stream(format, file)?;
        Ok(reader)
    }

    /// Parses the asset in `stream` and moves to `Open`.
    ///
    /// The stream bridge is torn down before this returns. On failure the
    /// reader stays unopened.
    pub fn open_stream(
        &mut self,
        format: &str,
        stream: impl StreamResource + 'static,
    ) -> Result<()> {
        self.state.ensure_unopened(KIND)?;
        let format = c_string(format::normalize(format)?, "format")?;
        let stream = StreamBridge::new(self.engine, stream)?;

        // SAFETY: both pointers stay valid for the duration of the call.
        let raw = unsafe { (self.engine.api().reader_from_stream)(format.as_ptr(), stream.native()) };
        match NonNull::new(raw) {
            Some(handle) => {
                tracing::debug!(token = stream.token().get(), "opened reader");
                self.state.open(handle);
                Ok(())
            }
            None => Err(self.engine.failure("failed to read manifest")),
        }
    }

    /// The manifest store serialized by the engine. An asset without a
    /// manifest yields an empty store.
    pub fn to_json(&self) -> Result<String> {
        let handle = self.state.handle(KIND)?;
        // SAFETY: the handle is open and owned by this reader.
        let raw = unsafe { (self.engine.api().reader_json)(handle.as_ptr()) };
        self.engine
            .take_string(raw)
            .ok_or_else(|| self.engine.failure("failed to serialize manifest"))
    }

    /// Releases the native handle. Closing twice fails with
    /// [`Error::UseAfterClose`].
    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.state.close(KIND)? {
            // SAFETY: the state machine hands the handle out exactly once.
            unsafe { (self.engine.api().reader_free)(handle.as_ptr()) };
            tracing::debug!("closed reader");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if let Err(err) = self.close() {
            tracing::error!(%err, "failed to release reader");
        }
    }
}

impl TryFrom<&Reader> for serde_json::Value {
    type Error = Error;

    fn try_from(reader: &Reader) -> Result<Self> {
        Ok(serde_json::from_str(&reader.to_json()?)?)
    }
}
