//! C2PA Engine Bridge
//!
//! Lets Rust code hand its own streams and signing routines to a native
//! C2PA provenance engine through a C function table.
//!
//! Resources never cross the boundary as pointers. Each stream or signer is
//! registered in a handle table and the engine receives an opaque token as
//! callback context. Callbacks resolve the token, do the work, and report
//! failure as a `-1` sentinel. Native handles are owned by [`Reader`] and
//! [`Builder`], which release them exactly once.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use c2pa_bridge::{Builder, Engine, LocalSigner, Signer};
//!
//! let signer: Arc<dyn Signer> = Arc::new(LocalSigner::from_files(
//!     Path::new("chain.pem"),
//!     Path::new("key.pem"),
//! )?);
//! let mut builder = Builder::with_json(Engine::default(), "{}")?;
//! builder.sign(Path::new("photo.jpg"), Path::new("photo_signed.jpg"), &signer)?;
//! # Ok::<(), c2pa_bridge::Error>(())
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod format;
pub mod handles;
mod lifecycle;
#[cfg(feature = "c2pa-c")]
mod linked;
pub mod local_signer;
mod loopback;
pub mod reader;
pub mod signer;
pub mod stream;

pub use builder::Builder;
pub use engine::Engine;
pub use error::{Error, Result};
pub use handles::{HandleTable, Token};
pub use local_signer::LocalSigner;
pub use reader::Reader;
pub use signer::{CallbackSigner, Signer, SigningAlg};
pub use stream::{ReadOnly, StreamResource};

/// Number of live entries in the process-wide handle tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveHandles {
    pub streams: usize,
    pub signers: usize,
}

/// Counts registered streams and signers. Both are zero whenever no engine
/// call is in flight.
pub fn live_handles() -> LiveHandles {
    LiveHandles {
        streams: stream::STREAMS.len(),
        signers: signer::SIGNERS.len(),
    }
}
