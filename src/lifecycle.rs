//! Ownership state of a native handle held by a wrapper.
//!
//! `Unopened -> Open -> Closed`. The handle is only reachable while `Open`
//! and leaves the state exactly once, so the wrapper frees it exactly once.

use std::fmt;
use std::ptr::NonNull;

use crate::error::{Error, Result};

pub(crate) enum Lifecycle<T> {
    Unopened,
    Open(NonNull<T>),
    Closed,
}

impl<T> Lifecycle<T> {
    /// The live handle, or the error for using it in the current state.
    pub(crate) fn handle(&self, kind: &'static str) -> Result<NonNull<T>> {
        match self {
            Lifecycle::Open(handle) => Ok(*handle),
            Lifecycle::Unopened => Err(Error::NotOpen(kind)),
            Lifecycle::Closed => Err(Error::UseAfterClose(kind)),
        }
    }

    /// Checks that a handle may be attached.
    pub(crate) fn ensure_unopened(&self, kind: &'static str) -> Result<()> {
        match self {
            Lifecycle::Unopened => Ok(()),
            Lifecycle::Open(_) => Err(Error::AlreadyOpen(kind)),
            Lifecycle::Closed => Err(Error::UseAfterClose(kind)),
        }
    }

    pub(crate) fn open(&mut self, handle: NonNull<T>) {
        debug_assert!(matches!(self, Lifecycle::Unopened));
        *self = Lifecycle::Open(handle);
    }

    /// Moves to `Closed`, returning the handle to free if one was held.
    pub(crate) fn close(&mut self, kind: &'static str) -> Result<Option<NonNull<T>>> {
        match std::mem::replace(self, Lifecycle::Closed) {
            Lifecycle::Open(handle) => Ok(Some(handle)),
            Lifecycle::Unopened => Ok(None),
            Lifecycle::Closed => Err(Error::UseAfterClose(kind)),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self, Lifecycle::Open(_))
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self, Lifecycle::Closed)
    }
}

// No `T: Debug` bound: the opaque ffi handle types do not implement it.
impl<T> fmt::Debug for Lifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Unopened => f.write_str("Unopened"),
            Lifecycle::Open(handle) => f.debug_tuple("Open").field(handle).finish(),
            Lifecycle::Closed => f.write_str("Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dangling() -> NonNull<u8> {
        NonNull::dangling()
    }

    #[test]
    fn test_unopened_operations() {
        let state: Lifecycle<u8> = Lifecycle::Unopened;
        assert!(matches!(state.handle("Reader"), Err(Error::NotOpen("Reader"))));
        assert!(state.ensure_unopened("Reader").is_ok());
    }

    #[test]
    fn test_close_hands_back_handle_once() {
        let mut state = Lifecycle::Unopened;
        state.open(dangling());
        assert!(state.is_open());
        assert!(matches!(state.ensure_unopened("Builder"), Err(Error::AlreadyOpen(_))));

        assert_eq!(state.close("Builder").unwrap(), Some(dangling()));
        assert!(state.is_closed());
        assert!(matches!(state.close("Builder"), Err(Error::UseAfterClose("Builder"))));
        assert!(matches!(state.handle("Builder"), Err(Error::UseAfterClose(_))));
    }

    #[test]
    fn test_close_unopened() {
        let mut state: Lifecycle<u8> = Lifecycle::Unopened;
        assert_eq!(state.close("Reader").unwrap(), None);
        assert!(matches!(state.ensure_unopened("Reader"), Err(Error::UseAfterClose(_))));
    }

    #[test]
    fn test_debug_for_opaque_handles() {
        let mut state: Lifecycle<crate::ffi::C2paReader> = Lifecycle::Unopened;
        assert_eq!(format!("{state:?}"), "Unopened");
        state.open(NonNull::dangling());
        assert!(format!("{state:?}").starts_with("Open("));
        state.close("Reader").unwrap();
        assert_eq!(format!("{state:?}"), "Closed");
    }
}
