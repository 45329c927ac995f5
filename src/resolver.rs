//! Resolving a component id to its manifest, and opening verified artifact downloads.

use std::io::Read;

use chrono::Utc;

use crate::error::Error;
use crate::fetch::{fetch_bounded, HashingReader};
use crate::metadata::{decode, fname_with_version, ComponentMetadata, Metadata, RoleName, SignedMetadata, VersionItem};
use crate::mirror::Mirror;
use crate::store::{LocalStore, LocalStoreExt};
use crate::trust::Trust;
use crate::Result;

/// Looks up and verifies an individual component's manifest against the index and snapshot.
pub struct ComponentResolver<'a> {
    mirror: &'a dyn Mirror,
    store: &'a dyn LocalStore,
    max_component_size: u64,
}

impl<'a> ComponentResolver<'a> {
    pub fn new(mirror: &'a dyn Mirror, store: &'a dyn LocalStore, max_component_size: u64) -> Self {
        ComponentResolver {
            mirror,
            store,
            max_component_size,
        }
    }

    /// Resolves `component_id` to its verified, version-pinned manifest. Returns the cached copy
    /// without touching the mirror when the snapshot already pins the version on disk.
    pub fn resolve(&self, trust: &Trust, component_id: &str) -> Result<SignedMetadata<ComponentMetadata>> {
        let index = trust.index.as_ref().ok_or_else(|| Error::NotFound {
            role: RoleName::Index,
            path: "index.json".into(),
        })?;
        let (record, owner) = index.signed().owner_of(component_id)?;

        let snapshot = trust.snapshot.as_ref().ok_or_else(|| Error::NotFound {
            role: RoleName::Snapshot,
            path: "snapshot.json".into(),
        })?;

        let filename = format!("{component_id}.json");
        let declared = snapshot
            .signed()
            .meta
            .get(&filename)
            .ok_or_else(|| Error::InconsistentManifest(format!("snapshot has no entry for {filename}")))?
            .version;

        let cached: Option<SignedMetadata<ComponentMetadata>> = self.store.load(&filename)?;
        if let Some(local) = &cached {
            if local.signed().version() == declared {
                return Ok(local.clone());
            }
        }

        let path = fname_with_version(&filename, declared);
        let bytes = fetch_bounded(self.mirror, &path, self.max_component_size)?;
        let candidate = decode::<ComponentMetadata>(&bytes)?;

        candidate.verify(record.threshold, &owner.keys)?;

        if candidate.signed().version() != declared {
            return Err(Error::VersionError {
                role: RoleName::Component,
                message: format!("{path} declares version {} but snapshot pinned {declared}", candidate.signed().version()),
            });
        }

        if candidate.signed().expired(Utc::now()) {
            return Err(Error::ExpiredError {
                role: RoleName::Component,
                expires: *candidate.signed().expires(),
            });
        }

        if let Some(local) = &cached {
            if candidate.signed().version() < local.signed().version() {
                return Err(Error::VersionError {
                    role: RoleName::Component,
                    message: format!(
                        "{component_id} rolled back from version {} to {}",
                        local.signed().version(),
                        candidate.signed().version()
                    ),
                });
            }
        }

        self.store.save(&filename, &candidate)?;
        Ok(candidate)
    }

    /// Opens a verified byte stream for a specific version's artifact. The stream enforces the
    /// declared length and digest as it is read; a caller that reads it to completion either gets
    /// exactly the bytes the manifest promised or an `io::Error` partway through.
    pub fn download(&self, item: &VersionItem) -> Result<impl Read + 'a> {
        let reader = self.mirror.open(&item.url)?;
        Ok(HashingReader::new(reader, item.url.clone(), item.hash.clone()))
    }
}
