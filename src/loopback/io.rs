//! `std::io` view of a native stream, driven purely through its callbacks.

use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

use crate::ffi::{C2paSeekMode, FlushCallback, ReadCallback, SeekCallback, StreamContext, WriteCallback};

const CHUNK: usize = 64 * 1024;

/// The loopback engine's representation of a `C2paStream`.
pub(super) struct CallbackStream {
    pub(super) context: *mut StreamContext,
    pub(super) read: ReadCallback,
    pub(super) seek: SeekCallback,
    pub(super) write: WriteCallback,
    pub(super) flush: FlushCallback,
}

fn callback_failed(op: &str) -> io::Error {
    io::Error::other(format!("stream {op} callback failed"))
}

impl CallbackStream {
    /// Reads the whole stream from the start.
    pub(super) fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; CHUNK];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(bytes);
            }
            bytes.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Read for CallbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = isize::try_from(buf.len()).unwrap_or(isize::MAX);
        // SAFETY: `buf` is valid for `len` bytes of writes.
        let n = unsafe { (self.read)(self.context, buf.as_mut_ptr(), len) };
        usize::try_from(n).map_err(|_| callback_failed("read"))
    }
}

impl Seek for CallbackStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, mode) = match pos {
            SeekFrom::Start(n) => (i64::try_from(n).unwrap_or(i64::MAX), C2paSeekMode::Start),
            SeekFrom::Current(n) => (n, C2paSeekMode::Current),
            SeekFrom::End(n) => (n, C2paSeekMode::End),
        };
        let offset = isize::try_from(offset)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "seek offset out of range"))?;
        // SAFETY: plain values only.
        let n = unsafe { (self.seek)(self.context, offset, mode) };
        u64::try_from(n).map_err(|_| callback_failed("seek"))
    }
}

impl Write for CallbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = isize::try_from(buf.len()).unwrap_or(isize::MAX);
        // SAFETY: `buf` is valid for `len` bytes of reads.
        let n = unsafe { (self.write)(self.context, buf.as_ptr(), len) };
        usize::try_from(n).map_err(|_| callback_failed("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        // SAFETY: plain values only.
        match unsafe { (self.flush)(self.context) } {
            n if n < 0 => Err(callback_failed("flush")),
            _ => Ok(()),
        }
    }
}
