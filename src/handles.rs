//! Process-wide handle tables.
//!
//! Native code cannot hold references to objects on this side of the
//! boundary, so each object a callback must reach is registered here under an
//! opaque integer [`Token`]. The engine stores the token verbatim (as a
//! `context` pointer) and hands it back on every callback.
//!
//! Tokens come from one process-wide counter shared by every table. They
//! start at 1, so a null context never resolves, and they are never reused:
//! once released, a token fails to resolve forever.

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique key for a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    fn next() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Encodes the token as a native context pointer.
    pub fn as_context<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    /// Decodes a context pointer handed back by the engine.
    pub fn from_context<T>(context: *const T) -> Self {
        Token(context as usize as u64)
    }

    pub(crate) fn as_signer_context(self) -> *const c_void {
        self.0 as usize as *const c_void
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry mapping tokens to shared objects of type `T`.
pub struct HandleTable<T: ?Sized> {
    entries: Mutex<BTreeMap<u64, Arc<T>>>,
}

impl<T: ?Sized> HandleTable<T> {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds a fresh token to `value`.
    pub fn register(&self, value: Arc<T>) -> Token {
        let token = Token::next();
        self.entries().insert(token.0, value);
        tracing::debug!(token = token.0, "registered handle");
        token
    }

    /// Looks up the object bound to `token`.
    ///
    /// The table lock is released before returning, so callers may hold the
    /// object across nested registrations.
    pub fn resolve(&self, token: Token) -> Result<Arc<T>> {
        self.entries()
            .get(&token.0)
            .cloned()
            .ok_or(Error::InvalidHandle(token.0))
    }

    /// Removes the binding for `token` and returns the object.
    pub fn release(&self, token: Token) -> Result<Arc<T>> {
        let value = self
            .entries()
            .remove(&token.0)
            .ok_or(Error::InvalidHandle(token.0))?;
        tracing::debug!(token = token.0, "released handle");
        Ok(value)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries().contains_key(&token.0)
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
