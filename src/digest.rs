//! Pass-through SHA-256 taps for the archive byte stream.
//!
//! The digest is computed over exactly the bytes that cross the tap, in the same pass that moves
//! them between the tar codec and the archive file.  Nothing is buffered beyond what the inner
//! stream does itself.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use crate::util::Sha256Digest;

/// Forwards writes to `W` and folds every byte that `W` accepted into a running digest.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    context: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            context: Sha256::new(),
        }
    }

    /// Returns the inner writer and the digest of everything written so far.  The inner writer
    /// is not flushed.
    pub fn finish(self) -> (W, Sha256Digest) {
        (self.inner, self.context.finalize().into())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.context.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads from `R` and folds every byte handed to the caller into a running digest.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    context: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        HashingReader {
            inner,
            context: Sha256::new(),
        }
    }

    pub fn finish(self) -> (R, Sha256Digest) {
        (self.inner, self.context.finalize().into())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.context.update(&buf[..n]);
        Ok(n)
    }
}
