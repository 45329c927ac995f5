//! The trust chain updater: walks root, timestamp, snapshot, and index to a new consistent
//! state, enforcing rollback and freeze protection at every step.

use chrono::Utc;
use log::{info, warn};

use crate::error::Error;
use crate::fetch::{fetch_bounded, fetch_hashed};
use crate::metadata::{
    decode, fname_with_version, FileHash, IndexMetadata, Metadata, RoleName, RootMetadata,
    SnapshotMetadata, TimestampMetadata,
};
use crate::mirror::Mirror;
use crate::store::{LocalStore, LocalStoreExt};
use crate::Result;

/// Size and rotation ceilings applied while walking the trust chain. Defaults mirror what a
/// small-to-medium component repository should never legitimately exceed; callers managing an
/// unusually large index or component count should raise them explicitly rather than disable
/// them.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_root_size: u64,
    pub max_timestamp_size: u64,
    pub max_index_size: u64,
    pub max_component_size: u64,
    pub max_root_rotations: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_root_size: 1024 * 1024,
            max_timestamp_size: 32 * 1024,
            max_index_size: 10 * 1024 * 1024,
            max_component_size: 10 * 1024 * 1024,
            max_root_rotations: 1024,
        }
    }
}

/// The engine's current view of the four manifests. Always holds at least a root; the other
/// three are populated the first time `ensure_manifests` runs.
pub struct Trust {
    pub root: crate::metadata::SignedMetadata<RootMetadata>,
    pub timestamp: Option<crate::metadata::SignedMetadata<TimestampMetadata>>,
    pub snapshot: Option<crate::metadata::SignedMetadata<SnapshotMetadata>>,
    pub index: Option<crate::metadata::SignedMetadata<IndexMetadata>>,
}

impl Trust {
    pub fn new(root: crate::metadata::SignedMetadata<RootMetadata>) -> Self {
        Trust {
            root,
            timestamp: None,
            snapshot: None,
            index: None,
        }
    }

    /// Loads whatever manifests the local store already has cached, so a sync can resume from a
    /// warm cache instead of pretending every role is unknown.
    pub fn load_cached(store: &dyn LocalStore) -> Result<Self> {
        let root = store.load_root()?;
        let timestamp = store.load("timestamp.json")?;
        let snapshot = store.load("snapshot.json")?;
        let index = store.load("index.json")?;
        Ok(Trust {
            root,
            timestamp,
            snapshot,
            index,
        })
    }
}

/// One attempt at a signature-gated step, and whether it has already consumed its one permitted
/// retry after a root refresh.
enum RetryState {
    Initial,
    RootRefreshed,
}

/// Drives root/timestamp/snapshot/index to a fresh, mutually consistent state against a single
/// mirror and local store.
pub struct TrustChainUpdater<'a> {
    mirror: &'a dyn Mirror,
    store: &'a dyn LocalStore,
    limits: Limits,
}

impl<'a> TrustChainUpdater<'a> {
    pub fn new(mirror: &'a dyn Mirror, store: &'a dyn LocalStore, limits: Limits) -> Self {
        TrustChainUpdater { mirror, store, limits }
    }

    /// Runs one full sync: root rotation, then timestamp, then snapshot and index as the
    /// timestamp/snapshot declare them necessary. Returns whether anything actually changed.
    pub fn ensure_manifests(&self, trust: &mut Trust) -> Result<bool> {
        let root_changed = self.update_root(trust)?;

        let snapshot_hash = self.with_root_refresh_retry(trust, |s, t| s.check_timestamp(t))?;
        let timestamp_changed = snapshot_hash.is_some();

        let snapshot_changed = self.with_root_refresh_retry(trust, |s, t| s.update_snapshot(t, snapshot_hash.clone()))?;

        let index_changed = self.update_index(trust)?;

        if snapshot_changed || index_changed {
            self.check_consistency(trust)?;
        }

        Ok(root_changed || timestamp_changed || snapshot_changed || index_changed)
    }

    /// Retries `attempt` exactly once, refreshing root first, if it fails with a signature error.
    /// A second signature failure after the refresh is final.
    fn with_root_refresh_retry<T: Clone>(
        &self,
        trust: &mut Trust,
        mut attempt: impl FnMut(&Self, &mut Trust) -> Result<T>,
    ) -> Result<T> {
        let mut state = RetryState::Initial;
        loop {
            match attempt(self, trust) {
                Ok(value) => return Ok(value),
                Err(Error::SignatureError { role, message }) => match state {
                    RetryState::Initial => {
                        warn!("{role} signature check failed ({message}); refreshing root and retrying once");
                        self.update_root(trust)?;
                        state = RetryState::RootRefreshed;
                    }
                    RetryState::RootRefreshed => {
                        return Err(Error::SignatureError { role, message });
                    }
                },
                Err(other) => return Err(other),
            }
        }
    }

    /// Walks `root.json` forward one version at a time: `N+1.root.json`, `N+2.root.json`, ...
    /// until the mirror reports no such file. Each candidate must be signed by a threshold of
    /// both the currently-trusted key set and its own newly-declared key set before it becomes
    /// trusted, so a compromised root key alone can never install a replacement root.
    fn update_root(&self, trust: &mut Trust) -> Result<bool> {
        let mut rotated = false;
        let mut rotations = 0u64;

        loop {
            if rotations >= self.limits.max_root_rotations {
                return Err(Error::VersionError {
                    role: RoleName::Root,
                    message: format!("exceeded the maximum of {} root rotations in one sync", self.limits.max_root_rotations),
                });
            }

            let next_version = trust.root.signed().version() + 1;
            let path = fname_with_version("root.json", next_version);

            let bytes = match fetch_bounded(self.mirror, &path, self.limits.max_root_size) {
                Ok(bytes) => bytes,
                Err(Error::NotFound { .. }) => break,
                Err(other) => return Err(other),
            };

            let candidate = decode::<RootMetadata>(&bytes)?;
            if candidate.signed().version() != next_version {
                return Err(Error::VersionError {
                    role: RoleName::Root,
                    message: format!("{path} declares version {} but was fetched as version {next_version}", candidate.signed().version()),
                });
            }

            let old_def = trust.root.signed().role(RoleName::Root)?;
            candidate.verify(old_def.threshold, &old_def.keys)?;

            let new_def = candidate.signed().role(RoleName::Root)?;
            candidate.verify(new_def.threshold, &new_def.keys)?;

            if candidate.signed().expired(Utc::now()) {
                return Err(Error::ExpiredError {
                    role: RoleName::Root,
                    expires: *candidate.signed().expires(),
                });
            }

            self.store.save(&path, &candidate)?;
            self.store.save("root.json", &candidate)?;
            info!("root rotated to version {next_version}");
            trust.root = candidate;
            rotated = true;
            rotations += 1;
        }

        Ok(rotated)
    }

    /// Fetches `timestamp.json`, verifies it against the current root, and checks it for
    /// rollback and freeze. Returns the declared snapshot hash when the timestamp is new (or
    /// first-seen), so the caller knows a snapshot fetch is needed; `None` means the local
    /// timestamp is already current.
    fn check_timestamp(&self, trust: &mut Trust) -> Result<Option<FileHash>> {
        let bytes = fetch_bounded(self.mirror, "timestamp.json", self.limits.max_timestamp_size)?;
        let candidate = decode::<TimestampMetadata>(&bytes)?;

        let def = trust.root.signed().role(RoleName::Timestamp)?;
        candidate.verify(def.threshold, &def.keys)?;

        if candidate.signed().expired(Utc::now()) {
            return Err(Error::ExpiredError {
                role: RoleName::Timestamp,
                expires: *candidate.signed().expires(),
            });
        }

        if let Some(local) = &trust.timestamp {
            if candidate.signed().version() < local.signed().version() {
                return Err(Error::VersionError {
                    role: RoleName::Timestamp,
                    message: format!(
                        "mirror offered version {} but {} is already trusted",
                        candidate.signed().version(),
                        local.signed().version()
                    ),
                });
            }
            let (_, local_hash) = local.signed().snapshot_entry()?;
            let (_, remote_hash) = candidate.signed().snapshot_entry()?;
            if candidate.signed().version() == local.signed().version() && remote_hash == local_hash {
                return Ok(None);
            }
        }

        let (_, snapshot_hash) = candidate.signed().snapshot_entry()?;
        let result = snapshot_hash.clone();
        self.store.save("timestamp.json", &candidate)?;
        trust.timestamp = Some(candidate);
        Ok(Some(result))
    }

    /// Fetches and verifies `snapshot.json` against the hash the timestamp declared for it, then
    /// enforces monotonic versions for every manifest url both snapshots mention in common.
    fn update_snapshot(&self, trust: &mut Trust, snapshot_hash: Option<FileHash>) -> Result<bool> {
        let hash = match snapshot_hash {
            Some(hash) => hash,
            None => return Ok(false),
        };

        let bytes = fetch_hashed(self.mirror, "snapshot.json", &hash)?;
        let candidate = decode::<SnapshotMetadata>(&bytes)?;

        let def = trust.root.signed().role(RoleName::Snapshot)?;
        candidate.verify(def.threshold, &def.keys)?;

        if candidate.signed().expired(Utc::now()) {
            return Err(Error::ExpiredError {
                role: RoleName::Snapshot,
                expires: *candidate.signed().expires(),
            });
        }

        if let Some(local) = &trust.snapshot {
            for (url, local_version) in &local.signed().meta {
                if let Some(remote_version) = candidate.signed().meta.get(url) {
                    if remote_version.version < local_version.version {
                        return Err(Error::VersionError {
                            role: RoleName::Snapshot,
                            message: format!(
                                "{url} rolled back from version {} to {}",
                                local_version.version, remote_version.version
                            ),
                        });
                    }
                }
            }
        }

        self.store.save("snapshot.json", &candidate)?;
        trust.snapshot = Some(candidate);
        Ok(true)
    }

    /// Fetches `index.json` at the version the trusted snapshot declares for it, if that differs
    /// from what is already trusted.
    fn update_index(&self, trust: &mut Trust) -> Result<bool> {
        let snapshot = trust
            .snapshot
            .as_ref()
            .ok_or_else(|| Error::Programming("index update attempted before any snapshot was trusted".into()))?;

        let declared = snapshot
            .signed()
            .meta
            .get("index.json")
            .ok_or_else(|| Error::InconsistentManifest("snapshot has no entry for index.json".into()))?
            .version;

        if let Some(local) = &trust.index {
            if local.signed().version() == declared {
                return Ok(false);
            }
        }

        let path = fname_with_version("index.json", declared);
        let bytes = fetch_bounded(self.mirror, &path, self.limits.max_index_size)?;
        let candidate = decode::<IndexMetadata>(&bytes)?;

        let def = trust.root.signed().role(RoleName::Index)?;
        candidate.verify(def.threshold, &def.keys)?;

        if candidate.signed().version() != declared {
            return Err(Error::VersionError {
                role: RoleName::Index,
                message: format!("{path} declares version {} but snapshot pinned {declared}", candidate.signed().version()),
            });
        }

        if candidate.signed().expired(Utc::now()) {
            return Err(Error::ExpiredError {
                role: RoleName::Index,
                expires: *candidate.signed().expires(),
            });
        }

        self.store.save("index.json", &candidate)?;
        trust.index = Some(candidate);
        Ok(true)
    }

    /// After any snapshot or index change, confirms the snapshot's declared root version still
    /// matches the root this updater actually trusts. A mismatch means two manifests, each valid
    /// on its own, tell an inconsistent joint story, and neither should be acted on.
    fn check_consistency(&self, trust: &Trust) -> Result<()> {
        if let Some(snapshot) = &trust.snapshot {
            if let Some(declared) = snapshot.signed().meta.get("root.json") {
                if declared.version != trust.root.signed().version() {
                    return Err(Error::InconsistentManifest(format!(
                        "snapshot declares root at version {} but version {} is trusted",
                        declared.version,
                        trust.root.signed().version()
                    )));
                }
            }
        }
        Ok(())
    }
}
