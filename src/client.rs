//! The top-level façade most callers use: load trust, sync, resolve, and download.

use std::io::Read;

use crate::metadata::{ComponentMetadata, SignedMetadata, VersionItem};
use crate::mirror::Mirror;
use crate::resolver::ComponentResolver;
use crate::store::{LocalStore, LocalStoreExt};
use crate::trust::{Limits, Trust, TrustChainUpdater};
use crate::version::select_version;
use crate::Result;

/// Configuration for a [`Client`]. `limits` bounds the sizes and rotation count this engine will
/// accept while walking the trust chain.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub limits: Limits,
}

/// Synchronizes and queries a mirrored component repository against a local trust state.
///
/// A `Client` is single-threaded and sequential by construction: `sync()` runs root, timestamp,
/// snapshot, and index updates one after another, and nothing about this type is safe to drive
/// from more than one thread at a time.
pub struct Client<'a, M: Mirror, S: LocalStore> {
    mirror: &'a M,
    store: &'a S,
    config: Config,
    trust: Trust,
}

impl<'a, M: Mirror, S: LocalStore> Client<'a, M, S> {
    /// Loads trust state from `store` (which must already hold a root manifest) and binds it to
    /// `mirror` for subsequent syncs.
    pub fn load(mirror: &'a M, store: &'a S, config: Config) -> Result<Self> {
        let trust = Trust::load_cached(store)?;
        Ok(Client {
            mirror,
            store,
            config,
            trust,
        })
    }

    /// Brings root, timestamp, snapshot, and index up to date. Returns whether anything changed.
    pub fn sync(&mut self) -> Result<bool> {
        let updater = TrustChainUpdater::new(self.mirror, self.store, self.config.limits.clone());
        updater.ensure_manifests(&mut self.trust)
    }

    /// Resolves a component id to its verified manifest, fetching it if the trusted snapshot
    /// pins a version not yet cached locally.
    pub fn resolve_component(&self, component_id: &str) -> Result<SignedMetadata<ComponentMetadata>> {
        let resolver = ComponentResolver::new(self.mirror, self.store, self.config.limits.max_component_size);
        resolver.resolve(&self.trust, component_id)
    }

    /// Selects a version of `component` for `platform`: the highest semver version when
    /// `requested` is `None`, or the exact match otherwise.
    pub fn select_version<'c>(
        &self,
        component: &'c SignedMetadata<ComponentMetadata>,
        platform: &str,
        requested: Option<&str>,
    ) -> Result<(&'c str, &'c VersionItem)> {
        let available = component
            .signed()
            .platforms
            .get(platform)
            .ok_or_else(|| crate::error::Error::NoVersions {
                component: component.signed().name.clone(),
                platform: platform.to_string(),
            })?;
        select_version(&component.signed().name, platform, available, requested)
    }

    /// Opens a verified, streaming download of `item`'s artifact.
    pub fn download(&self, item: &VersionItem) -> Result<impl Read + 'a> {
        let resolver = ComponentResolver::new(self.mirror, self.store, self.config.limits.max_component_size);
        resolver.download(item)
    }

    pub fn trust(&self) -> &Trust {
        &self.trust
    }
}
