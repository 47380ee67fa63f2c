//! Handle on a native engine function table, plus the error channel.

use std::ffi::{c_char, CStr, CString};
use std::fmt;

use crate::error::{Error, Result};
use crate::ffi::EngineApi;

static LOOPBACK: EngineApi = crate::loopback::API;

/// A native provenance engine reached through its C function table.
#[derive(Clone, Copy)]
pub struct Engine {
    api: &'static EngineApi,
}

impl Engine {
    /// Wraps an engine function table.
    ///
    /// # Safety
    ///
    /// Every function in `api` must honor the calling contract documented on
    /// [`EngineApi`]: handles it returns stay valid until their matching free
    /// call, callbacks are only invoked during the call that was given their
    /// context, and returned strings are released with `release_string`.
    pub unsafe fn from_api(api: &'static EngineApi) -> Self {
        Self { api }
    }

    /// The in-process reference engine.
    pub fn loopback() -> Self {
        // SAFETY: the loopback table is implemented in this crate against the
        // same contract.
        unsafe { Self::from_api(&LOOPBACK) }
    }

    /// The system `c2pa_c` library, linked at build time.
    #[cfg(feature = "c2pa-c")]
    pub fn linked() -> Self {
        // SAFETY: the table points at the C2PA C API, which defines the contract.
        unsafe { Self::from_api(&crate::linked::API) }
    }

    pub fn api(&self) -> &'static EngineApi {
        self.api
    }

    /// Version string reported by the engine.
    pub fn version(&self) -> String {
        // SAFETY: no arguments; the result is released by `take_string`.
        let raw = unsafe { (self.api.version)() };
        self.take_string(raw).unwrap_or_default()
    }

    /// Message recorded by the engine for its most recent failed call on
    /// this thread.
    ///
    /// Fetch it immediately after observing a failure result: the next call
    /// into the engine overwrites the slot.
    pub fn last_error(&self) -> String {
        // SAFETY: no arguments; the result is released by `take_string`.
        let raw = unsafe { (self.api.error)() };
        match self.take_string(raw) {
            Some(message) if !message.is_empty() => message,
            _ => "unknown engine error".to_string(),
        }
    }

    /// Builds an [`Error::Engine`] from the error slot.
    pub(crate) fn failure(&self, context: &str) -> Error {
        let message = self.last_error();
        tracing::debug!(%message, "{context} failed");
        Error::Engine(format!("{context}: {message}"))
    }

    /// Copies an engine-owned string and releases it.
    pub(crate) fn take_string(&self, raw: *mut c_char) -> Option<String> {
        if raw.is_null() {
            return None;
        }
        // SAFETY: non-null strings from the engine are NUL-terminated and
        // owned by us until released.
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        unsafe { (self.api.release_string)(raw) };
        Some(text)
    }
}

impl Default for Engine {
    #[cfg(feature = "c2pa-c")]
    fn default() -> Self {
        Self::linked()
    }

    #[cfg(not(feature = "c2pa-c"))]
    fn default() -> Self {
        Self::loopback()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("api", &(self.api as *const EngineApi))
            .finish()
    }
}

/// NUL-terminated copy of a string argument.
pub(crate) fn c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::Engine(format!("{what} contains a NUL byte")))
}
