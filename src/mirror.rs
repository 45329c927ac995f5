//! The mirror client capability: read-only, path-addressed byte access to a repository.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use crate::error::Error;
use crate::metadata::RoleName;
use crate::Result;

/// Read-only access to a mirror's byte-addressable resources. Implementations need not be
/// thread-safe: the engine that drives them is single-threaded and sequential.
pub trait Mirror {
    /// Opens `path` for reading. Returns `Error::NotFound` if the resource does not exist at
    /// this mirror; any other failure to reach the mirror is `Error::TransportError`.
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>>;
}

/// An in-memory mirror, useful for tests and for embedding a small fixed repository.
#[derive(Debug, Default)]
pub struct EphemeralMirror {
    resources: RefCell<HashMap<String, Vec<u8>>>,
}

impl EphemeralMirror {
    pub fn new() -> Self {
        EphemeralMirror::default()
    }

    pub fn put(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.resources.borrow_mut().insert(path.into(), bytes);
    }
}

impl Mirror for EphemeralMirror {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let resources = self.resources.borrow();
        match resources.get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(Error::not_found(RoleName::Root, path)),
        }
    }
}

/// A mirror backed by a directory tree on the local filesystem, for production use where the
/// mirror has already been synced down by some other process (e.g. rsync) or is served over a
/// mounted network share.
#[derive(Debug)]
pub struct FilesystemMirror {
    root: PathBuf,
}

impl FilesystemMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemMirror { root: root.into() }
    }
}

impl Mirror for FilesystemMirror {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let full = self.root.join(path.trim_start_matches('/'));
        match fs::File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::not_found(RoleName::Root, path)),
            Err(err) => Err(Error::TransportError {
                path: path.to_string(),
                message: err.to_string(),
            }),
        }
    }
}
