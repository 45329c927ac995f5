//! Bounded, integrity-checked reads from a [`Mirror`].

use std::io::{self, Read};

use log::debug;
use ring::digest;

use crate::crypto::HashAlgorithm;
use crate::error::Error;
use crate::metadata::FileHash;
use crate::mirror::Mirror;
use crate::Result;

const CHUNK_SIZE: usize = 8192;

/// Reads all of `path` from `mirror`, failing with `OversizeError` the moment more than
/// `max_length` bytes have been produced. Used for manifests whose size is bounded by
/// configuration rather than by a prior trusted declaration (root, index).
pub fn fetch_bounded(mirror: &dyn Mirror, path: &str, max_length: u64) -> Result<Vec<u8>> {
    let mut reader = mirror.open(path)?;
    let mut buf = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).map_err(|e| Error::TransportError {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() as u64 > max_length {
            return Err(Error::OversizeError {
                path: path.to_string(),
                max_length,
            });
        }
    }
    debug!("fetched {path} ({} bytes)", buf.len());
    Ok(buf)
}

/// Reads all of `path`, requiring the result to match a previously-trusted `hash` exactly. Used
/// for manifests whose length and digest are already pinned by a parent manifest (snapshot,
/// timestamp's declared snapshot, component manifests).
pub fn fetch_hashed(mirror: &dyn Mirror, path: &str, hash: &FileHash) -> Result<Vec<u8>> {
    let buf = fetch_bounded(mirror, path, hash.length)?;
    hash.verify(&buf).map_err(|e| match e {
        Error::IntegrityError { message, .. } => Error::IntegrityError {
            path: path.to_string(),
            message,
        },
        other => other,
    })?;
    Ok(buf)
}

/// Wraps a reader with a bound on total bytes and a running digest, so that a component artifact
/// can be streamed straight to a caller's writer while this engine still enforces the integrity
/// declaration from the trusted manifest. Any size or digest mismatch surfaces as an `io::Error`
/// at the point it's detected, so the caller's partial output should be discarded.
pub struct HashingReader<R> {
    inner: R,
    path: String,
    remaining: u64,
    expect_empty: bool,
    ctx: digest::Context,
    hash: FileHash,
    finished: bool,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, path: impl Into<String>, hash: FileHash) -> Self {
        HashingReader {
            inner,
            path: path.into(),
            remaining: hash.length,
            expect_empty: hash.length == 0,
            ctx: digest::Context::new(&digest::SHA256),
            hash,
            finished: false,
        }
    }

    fn fail(&self, message: impl Into<String>) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            Error::IntegrityError {
                path: self.path.clone(),
                message: message.into(),
            },
        )
    }

    fn oversize(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            Error::OversizeError {
                path: self.path.clone(),
                max_length: self.hash.length,
            },
        )
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.finished = true;
            if self.remaining != 0 && !self.expect_empty {
                return Err(self.fail(format!("stream ended {} bytes short", self.remaining)));
            }
            let digest = self.ctx.clone().finish();
            match self.hash.hashes.get(&HashAlgorithm::Sha256) {
                Some(expected) if digest.as_ref() == expected.value() => {}
                Some(_) => return Err(self.fail("digest mismatch at end of stream")),
                None => return Err(self.fail("no supported hash algorithm present (sha256 required)")),
            }
            return Ok(0);
        }
        if n as u64 > self.remaining {
            self.finished = true;
            return Err(self.oversize());
        }
        self.ctx.update(&buf[..n]);
        self.remaining -= n as u64;
        Ok(n)
    }
}
