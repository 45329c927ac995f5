//! The local store capability: a durable cache of the last-verified manifest for each role.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::metadata::{decode, encode, Metadata, SignedMetadata};
use crate::Result;

/// Durable storage for the bytes of the last manifest this engine trusted for each named
/// resource. Writes must be atomic: a crash mid-write must never leave a corrupt or partial
/// document behind.
pub trait LocalStore {
    fn load_raw(&self, filename: &str) -> Result<Option<Vec<u8>>>;
    fn save_raw(&self, filename: &str, bytes: &[u8]) -> Result<()>;
}

/// Typed convenience layer over [`LocalStore`] shared by every concrete implementation.
pub trait LocalStoreExt: LocalStore {
    fn load<M: Metadata>(&self, filename: &str) -> Result<Option<SignedMetadata<M>>> {
        match self.load_raw(filename)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Loads the root manifest. Unlike every other role, an absent root is always an error: it
    /// is the trust anchor and must have been seeded before this engine can do anything.
    fn load_root(&self) -> Result<SignedMetadata<crate::metadata::RootMetadata>> {
        self.load("root.json")?.ok_or_else(|| Error::NotFound {
            role: crate::metadata::RoleName::Root,
            path: "root.json".into(),
        })
    }

    fn save<M: Metadata>(&self, filename: &str, signed: &SignedMetadata<M>) -> Result<()> {
        self.save_raw(filename, &encode(signed)?)
    }
}

impl<T: LocalStore + ?Sized> LocalStoreExt for T {}

/// An in-memory store, useful for tests and for short-lived processes that re-sync from scratch
/// every run.
#[derive(Debug, Default)]
pub struct EphemeralStore {
    files: RefCell<HashMap<String, Vec<u8>>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        EphemeralStore::default()
    }

    /// Seeds the store with an initial trusted root, as a deployment would when bootstrapping a
    /// fresh install.
    pub fn with_root(root_bytes: Vec<u8>) -> Self {
        let store = EphemeralStore::new();
        store.files.borrow_mut().insert("root.json".into(), root_bytes);
        store
    }
}

impl LocalStore for EphemeralStore {
    fn load_raw(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.borrow().get(filename).cloned())
    }

    fn save_raw(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        self.files.borrow_mut().insert(filename.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// A store backed by a directory on the local filesystem. Writes go through a temp file in the
/// same directory, then an atomic rename, so a reader never observes a half-written document.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FilesystemStore { root })
    }
}

impl LocalStore for FilesystemStore {
    fn load_raw(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(filename);
        match fs::File::open(&path) {
            Ok(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save_raw(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&path)?;
        Ok(())
    }
}
