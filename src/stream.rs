//! Stream bridge: byte resources the engine reads and writes via callbacks.
//!
//! A [`StreamBridge`] registers a [`StreamResource`] in the process-wide
//! stream table and asks the engine to create a native stream whose context
//! is the resulting token. While a native call runs, the engine calls
//! [`stream_read`], [`stream_seek`], [`stream_write`] and [`stream_flush`] on
//! the calling thread, in any order and any number of times. Each callback
//! resolves the token, operates on the resource and reports a count, a
//! position, or [`FAILURE`]. Errors never cross the boundary as panics.
//!
//! Dropping the bridge releases the native stream, then the token, then the
//! resource, on every exit path.

use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;
use std::sync::{Arc, Mutex};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::ffi::{C2paSeekMode, C2paStream, StreamContext, FAILURE};
use crate::handles::{HandleTable, Token};

/// Live stream bindings, keyed by token.
pub(crate) static STREAMS: HandleTable<Mutex<dyn StreamResource>> = HandleTable::new();

/// A byte resource the engine can read, seek, write and flush.
///
/// Resources that are only read can rely on the default `write`, which
/// refuses, and the default `flush`, which does nothing.
pub trait StreamResource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(ErrorKind::Unsupported, "stream is read-only"))
    }

    /// Commits buffered writes to durable storage.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamResource for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)?;
        self.sync_all()
    }
}

impl StreamResource for Cursor<Vec<u8>> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

impl<S: StreamResource + ?Sized> StreamResource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek(pos)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Adapts any `Read + Seek` source into a read-only stream resource.
#[derive(Debug)]
pub struct ReadOnly<R>(pub R);

impl<R: Read + Seek + Send> StreamResource for ReadOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// A stream resource registered with the engine for one operation.
pub(crate) struct StreamBridge<T: StreamResource + 'static> {
    engine: Engine,
    token: Token,
    native: Option<NonNull<C2paStream>>,
    resource: Option<Arc<Mutex<T>>>,
}

impl<T: StreamResource + 'static> StreamBridge<T> {
    /// Registers `resource` and creates its native stream.
    pub(crate) fn new(engine: Engine, resource: T) -> Result<Self> {
        let resource = Arc::new(Mutex::new(resource));
        let shared: Arc<Mutex<dyn StreamResource>> = resource.clone();
        let token = STREAMS.register(shared);

        // SAFETY: the callbacks match the declared signatures and the context
        // is a token, never dereferenced.
        let native = unsafe {
            (engine.api().create_stream)(
                token.as_context(),
                stream_read,
                stream_seek,
                stream_write,
                stream_flush,
            )
        };
        match NonNull::new(native) {
            Some(native) => Ok(Self {
                engine,
                token,
                native: Some(native),
                resource: Some(resource),
            }),
            None => {
                let err = engine.failure("failed to create stream");
                let _ = STREAMS.release(token);
                Err(err)
            }
        }
    }

    /// Native stream to hand to the engine.
    pub(crate) fn native(&self) -> *mut C2paStream {
        self.native.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    fn teardown(&mut self) {
        if let Some(native) = self.native.take() {
            // SAFETY: created by this engine's `create_stream` and released once.
            unsafe { (self.engine.api().release_stream)(native.as_ptr()) };
            if STREAMS.release(self.token).is_err() {
                tracing::error!(token = self.token.get(), "stream token already released");
            }
        }
    }

    /// Tears the bridge down and hands the resource back.
    pub(crate) fn into_inner(mut self) -> Result<T> {
        self.teardown();
        let resource = self
            .resource
            .take()
            .ok_or(Error::InvalidHandle(self.token.get()))?;
        let mutex =
            Arc::try_unwrap(resource).map_err(|_| Error::InvalidHandle(self.token.get()))?;
        Ok(mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl<T: StreamResource + 'static> Drop for StreamBridge<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Runs `op` on the stream bound to `context`, converting every failure,
/// panics included, into [`FAILURE`].
fn with_stream(
    op: &'static str,
    context: *mut StreamContext,
    f: impl FnOnce(&mut dyn StreamResource) -> io::Result<isize>,
) -> isize {
    let token = Token::from_context(context);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<isize> {
        let stream = STREAMS.resolve(token)?;
        let mut guard = stream
            .lock()
            .map_err(|_| io::Error::other("stream poisoned by an earlier panic"))?;
        Ok(f(&mut *guard)?)
    }));

    match outcome {
        Ok(Ok(n)) => n,
        Ok(Err(err)) => {
            tracing::warn!(token = token.get(), op, %err, "stream callback failed");
            FAILURE
        }
        Err(_) => {
            tracing::error!(token = token.get(), op, "stream callback panicked");
            FAILURE
        }
    }
}

fn retry_interrupted<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn to_count(n: usize) -> io::Result<isize> {
    isize::try_from(n).map_err(|_| io::Error::other("count exceeds isize"))
}

fn buffer_len(len: isize) -> io::Result<usize> {
    usize::try_from(len).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "negative length"))
}

/// Reads up to `len` bytes into `data`. End of stream is `0`, not a failure.
///
/// # Safety
///
/// `data` must be valid for `len` bytes of writes.
pub unsafe extern "C" fn stream_read(
    context: *mut StreamContext,
    data: *mut u8,
    len: isize,
) -> isize {
    with_stream("read", context, |stream| {
        let len = buffer_len(len)?;
        if len == 0 {
            return Ok(0);
        }
        if data.is_null() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "null read buffer"));
        }
        let buf = unsafe { slice::from_raw_parts_mut(data, len) };
        to_count(retry_interrupted(|| stream.read(buf))?)
    })
}

/// Moves the stream position and returns the new absolute position.
///
/// # Safety
///
/// Safe to call with any context; unknown tokens yield [`FAILURE`].
pub unsafe extern "C" fn stream_seek(
    context: *mut StreamContext,
    offset: isize,
    mode: C2paSeekMode,
) -> isize {
    with_stream("seek", context, |stream| {
        let pos = match mode {
            C2paSeekMode::Start => SeekFrom::Start(u64::try_from(offset).map_err(|_| {
                io::Error::new(ErrorKind::InvalidInput, "negative seek from start")
            })?),
            C2paSeekMode::Current => SeekFrom::Current(offset as i64),
            C2paSeekMode::End => SeekFrom::End(offset as i64),
        };
        let new_pos = stream.seek(pos)?;
        isize::try_from(new_pos).map_err(|_| io::Error::other("position exceeds isize"))
    })
}

/// Writes up to `len` bytes from `data`.
///
/// A short write reports its exact count and is not retried here. A failed
/// write reports [`FAILURE`] so the engine aborts instead of continuing with
/// a truncated asset.
///
/// # Safety
///
/// `data` must be valid for `len` bytes of reads.
pub unsafe extern "C" fn stream_write(
    context: *mut StreamContext,
    data: *const u8,
    len: isize,
) -> isize {
    with_stream("write", context, |stream| {
        let len = buffer_len(len)?;
        if len == 0 {
            return Ok(0);
        }
        if data.is_null() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "null write buffer"));
        }
        let buf = unsafe { slice::from_raw_parts(data, len) };
        to_count(retry_interrupted(|| stream.write(buf))?)
    })
}

/// Commits buffered writes. Returns `0` on success.
///
/// # Safety
///
/// Safe to call with any context; unknown tokens yield [`FAILURE`].
pub unsafe extern "C" fn stream_flush(context: *mut StreamContext) -> isize {
    with_stream("flush", context, |stream| {
        stream.flush()?;
        Ok(0)
    })
}
