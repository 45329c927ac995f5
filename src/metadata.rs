//! The manifest data model: roles, signed envelopes, and the four manifest kinds.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::{sha256_digest, HashAlgorithm, HashValue, KeyId, PrivateKey, PublicKey, Signature};
use crate::error::Error;
use crate::interchange::canonicalize;
use crate::verify::verify_threshold;
use crate::Result;

/// Spec-version major this engine understands. A manifest whose `spec_version` has a different
/// major is rejected outright; minor/patch differences are tolerated.
pub const SUPPORTED_SPEC_MAJOR: u32 = 1;

/// Checks that `spec_version` (e.g. `"1.0.0"`) has the major version this build understands.
pub fn check_spec_version(role: RoleName, spec_version: &str) -> Result<()> {
    let major = spec_version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::SchemaError {
            role,
            message: format!("unparseable spec_version {spec_version:?}"),
        })?;
    if major != SUPPORTED_SPEC_MAJOR {
        return Err(Error::SchemaError {
            role,
            message: format!(
                "spec_version {spec_version:?} is incompatible with supported major {SUPPORTED_SPEC_MAJOR}"
            ),
        });
    }
    Ok(())
}

/// The roles a signed document can play. `Component` stands for any individual component
/// manifest, which is keyed by id rather than by a fixed filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleName {
    #[serde(rename = "root")]
    Root,
    #[serde(rename = "timestamp")]
    Timestamp,
    #[serde(rename = "snapshot")]
    Snapshot,
    #[serde(rename = "index")]
    Index,
    #[serde(rename = "component")]
    Component,
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleName::Root => "root",
            RoleName::Timestamp => "timestamp",
            RoleName::Snapshot => "snapshot",
            RoleName::Index => "index",
            RoleName::Component => "component",
        };
        write!(f, "{s}")
    }
}

/// A declared hash/length pair for a resource, as found inside a trusted manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub hashes: HashMap<HashAlgorithm, HashValue>,
    pub length: u64,
}

impl FileHash {
    pub fn new(length: u64, algorithm: HashAlgorithm, value: HashValue) -> Self {
        let mut hashes = HashMap::new();
        hashes.insert(algorithm, value);
        FileHash { hashes, length }
    }

    /// Hashes `reader` and builds a `FileHash` describing it (SHA-256 only).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let (length, digest) = sha256_digest(reader)?;
        Ok(FileHash::new(length, HashAlgorithm::Sha256, digest))
    }

    /// Checks that `bytes` matches this declaration's length and its SHA-256 digest. Hash
    /// algorithms other than SHA-256 are present only for forward compatibility with mirrors
    /// that add a second digest; they are never consulted here. SHA-256 must be present.
    pub fn verify(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 != self.length {
            return Err(Error::IntegrityError {
                path: String::new(),
                message: format!("expected {} bytes, got {}", self.length, bytes.len()),
            });
        }
        let expected = self.hashes.get(&HashAlgorithm::Sha256).ok_or_else(|| Error::SchemaError {
            role: RoleName::Root,
            message: "no supported hash algorithm present (sha256 required)".into(),
        })?;
        let actual = sha256_digest(bytes)?.1;
        if &actual != expected {
            return Err(Error::IntegrityError {
                path: String::new(),
                message: "sha256 digest mismatch".into(),
            });
        }
        Ok(())
    }
}

/// The declared version of a manifest file, as recorded inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub version: u32,
}

/// Builds the versioned filename for a consistent-snapshot fetch: `root.json` at version 4
/// becomes `4.root.json`; `sub/root.json` becomes `sub/4.root.json`.
pub fn fname_with_version(base: &str, version: u32) -> String {
    match base.rfind('/') {
        Some(idx) => format!("{}/{}.{}", &base[..idx], version, &base[idx + 1..]),
        None => format!("{version}.{base}"),
    }
}

/// A role's authorized key set and signature threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    pub keys: HashMap<KeyId, PublicKey>,
    pub threshold: u32,
}

impl RoleDefinition {
    pub fn new(keys: HashMap<KeyId, PublicKey>, threshold: u32) -> Result<Self> {
        if threshold == 0 {
            return Err(Error::IllegalArgument("threshold must be at least 1".into()));
        }
        if (keys.len() as u32) < threshold {
            return Err(Error::IllegalArgument(format!(
                "threshold {threshold} exceeds available key count {}",
                keys.len()
            )));
        }
        Ok(RoleDefinition {
            url: None,
            keys,
            threshold,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Trait shared by every manifest payload type: the part of a signed document that actually gets
/// hashed and signed, as opposed to the envelope around it.
pub trait Metadata: fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned {
    const ROLE: RoleName;

    /// The `_type` tag as it actually appeared on the wire, independent of what `M` the caller
    /// asked `decode` to parse it as.
    fn ty(&self) -> &str;
    fn spec_version(&self) -> &str;
    fn version(&self) -> u32;
    fn expires(&self) -> &DateTime<Utc>;

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires() <= &now
    }
}

/// The root manifest: the trust anchor naming every other role's keys and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootMetadata {
    #[serde(rename = "_type")]
    pub ty: String,
    pub spec_version: String,
    pub version: u32,
    pub expires: DateTime<Utc>,
    pub roles: HashMap<RoleName, RoleDefinition>,
}

impl RootMetadata {
    pub fn role(&self, role: RoleName) -> Result<&RoleDefinition> {
        self.roles.get(&role).ok_or_else(|| Error::SchemaError {
            role: RoleName::Root,
            message: format!("root metadata has no definition for role {role}"),
        })
    }
}

impl Metadata for RootMetadata {
    const ROLE: RoleName = RoleName::Root;

    fn ty(&self) -> &str {
        &self.ty
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

/// Builds a [`RootMetadata`]. Every role must be registered before `build()`.
#[derive(Debug, Default)]
pub struct RootMetadataBuilder {
    version: u32,
    expires: Option<DateTime<Utc>>,
    roles: HashMap<RoleName, RoleDefinition>,
}

impl RootMetadataBuilder {
    pub fn new() -> Self {
        RootMetadataBuilder {
            version: 1,
            expires: None,
            roles: HashMap::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn role(mut self, role: RoleName, definition: RoleDefinition) -> Self {
        self.roles.insert(role, definition);
        self
    }

    pub fn build(self) -> Result<RootMetadata> {
        for role in [RoleName::Root, RoleName::Timestamp, RoleName::Snapshot, RoleName::Index] {
            if !self.roles.contains_key(&role) {
                return Err(Error::IllegalArgument(format!(
                    "root metadata is missing a definition for role {role}"
                )));
            }
        }
        Ok(RootMetadata {
            ty: "root".into(),
            spec_version: format!("{SUPPORTED_SPEC_MAJOR}.0.0"),
            version: self.version,
            expires: self
                .expires
                .ok_or_else(|| Error::IllegalArgument("root metadata requires an expiry".into()))?,
            roles: self.roles,
        })
    }
}

/// The timestamp manifest: the single small document every sync starts by fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    #[serde(rename = "_type")]
    pub ty: String,
    pub spec_version: String,
    pub version: u32,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, FileHash>,
}

impl TimestampMetadata {
    /// The lone `(url, hash)` entry a timestamp carries. More than one or zero entries is a
    /// malformed document.
    pub fn snapshot_entry(&self) -> Result<(&str, &FileHash)> {
        if self.meta.len() != 1 {
            return Err(Error::SchemaError {
                role: RoleName::Timestamp,
                message: format!("expected exactly one meta entry, found {}", self.meta.len()),
            });
        }
        let (url, hash) = self.meta.iter().next().expect("checked len == 1 above");
        Ok((url.as_str(), hash))
    }
}

impl Metadata for TimestampMetadata {
    const ROLE: RoleName = RoleName::Timestamp;

    fn ty(&self) -> &str {
        &self.ty
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

#[derive(Debug, Default)]
pub struct TimestampMetadataBuilder {
    version: u32,
    expires: Option<DateTime<Utc>>,
    snapshot_url: Option<String>,
    snapshot_hash: Option<FileHash>,
}

impl TimestampMetadataBuilder {
    pub fn from_snapshot(snapshot_url: impl Into<String>, hash: FileHash) -> Self {
        TimestampMetadataBuilder {
            version: 1,
            expires: None,
            snapshot_url: Some(snapshot_url.into()),
            snapshot_hash: Some(hash),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn build(self) -> Result<TimestampMetadata> {
        let mut meta = HashMap::new();
        let url = self
            .snapshot_url
            .ok_or_else(|| Error::IllegalArgument("timestamp metadata requires a snapshot url".into()))?;
        let hash = self
            .snapshot_hash
            .ok_or_else(|| Error::IllegalArgument("timestamp metadata requires a snapshot hash".into()))?;
        meta.insert(url, hash);
        Ok(TimestampMetadata {
            ty: "timestamp".into(),
            spec_version: format!("{SUPPORTED_SPEC_MAJOR}.0.0"),
            version: self.version,
            expires: self
                .expires
                .ok_or_else(|| Error::IllegalArgument("timestamp metadata requires an expiry".into()))?,
            meta,
        })
    }
}

/// The snapshot manifest: pins the versions of the root, index, and every component manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "_type")]
    pub ty: String,
    pub spec_version: String,
    pub version: u32,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, FileVersion>,
}

impl Metadata for SnapshotMetadata {
    const ROLE: RoleName = RoleName::Snapshot;

    fn ty(&self) -> &str {
        &self.ty
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

#[derive(Debug, Default)]
pub struct SnapshotMetadataBuilder {
    version: u32,
    expires: Option<DateTime<Utc>>,
    meta: HashMap<String, FileVersion>,
}

impl SnapshotMetadataBuilder {
    pub fn new() -> Self {
        SnapshotMetadataBuilder {
            version: 1,
            expires: None,
            meta: HashMap::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn insert(mut self, url: impl Into<String>, version: u32) -> Self {
        self.meta.insert(url.into(), FileVersion { version });
        self
    }

    pub fn build(self) -> Result<SnapshotMetadata> {
        Ok(SnapshotMetadata {
            ty: "snapshot".into(),
            spec_version: format!("{SUPPORTED_SPEC_MAJOR}.0.0"),
            version: self.version,
            expires: self
                .expires
                .ok_or_else(|| Error::IllegalArgument("snapshot metadata requires an expiry".into()))?,
            meta: self.meta,
        })
    }
}

/// A registered signer in the index: a display name plus the keys it signs component manifests
/// with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub keys: HashMap<KeyId, PublicKey>,
}

/// The index's record of one component: who owns it, where its manifest lives, and the
/// signature threshold required of that owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub owner_id: String,
    pub url: String,
    pub threshold: u32,
    #[serde(default)]
    pub yanked: bool,
}

/// The index manifest: the registry of owners, components, and default component selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(rename = "_type")]
    pub ty: String,
    pub spec_version: String,
    pub version: u32,
    pub expires: DateTime<Utc>,
    pub owners: HashMap<String, Owner>,
    pub components: HashMap<String, ComponentRecord>,
    #[serde(default)]
    pub defaults: Vec<String>,
}

impl IndexMetadata {
    pub fn owner_of(&self, component_id: &str) -> Result<(&ComponentRecord, &Owner)> {
        let record = self.components.get(component_id).ok_or_else(|| Error::NotFound {
            role: RoleName::Component,
            path: component_id.to_string(),
        })?;
        let owner = self.owners.get(&record.owner_id).ok_or_else(|| {
            Error::InconsistentManifest(format!(
                "component {component_id} names unknown owner {}",
                record.owner_id
            ))
        })?;
        Ok((record, owner))
    }
}

impl Metadata for IndexMetadata {
    const ROLE: RoleName = RoleName::Index;

    fn ty(&self) -> &str {
        &self.ty
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

#[derive(Debug, Default)]
pub struct IndexMetadataBuilder {
    version: u32,
    expires: Option<DateTime<Utc>>,
    owners: HashMap<String, Owner>,
    components: HashMap<String, ComponentRecord>,
    defaults: Vec<String>,
}

impl IndexMetadataBuilder {
    pub fn new() -> Self {
        IndexMetadataBuilder {
            version: 1,
            expires: None,
            owners: HashMap::new(),
            components: HashMap::new(),
            defaults: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn owner(mut self, id: impl Into<String>, owner: Owner) -> Self {
        self.owners.insert(id.into(), owner);
        self
    }

    pub fn component(mut self, id: impl Into<String>, record: ComponentRecord) -> Self {
        self.components.insert(id.into(), record);
        self
    }

    pub fn defaults(mut self, defaults: Vec<String>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn build(self) -> Result<IndexMetadata> {
        Ok(IndexMetadata {
            ty: "index".into(),
            spec_version: format!("{SUPPORTED_SPEC_MAJOR}.0.0"),
            version: self.version,
            expires: self
                .expires
                .ok_or_else(|| Error::IllegalArgument("index metadata requires an expiry".into()))?,
            owners: self.owners,
            components: self.components,
            defaults: self.defaults,
        })
    }
}

/// One other component this version depends on. Resolution of the dependency graph itself is
/// left to the caller; this engine only carries the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDependency {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version_req: Option<String>,
}

/// One published version of a component, scoped to a single platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionItem {
    pub url: String,
    #[serde(flatten)]
    pub hash: FileHash,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ComponentDependency>,
}

/// The component manifest: the full set of published versions across platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    #[serde(rename = "_type")]
    pub ty: String,
    pub spec_version: String,
    pub version: u32,
    pub expires: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub platforms: HashMap<String, HashMap<String, VersionItem>>,
}

impl Metadata for ComponentMetadata {
    const ROLE: RoleName = RoleName::Component;

    fn ty(&self) -> &str {
        &self.ty
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

#[derive(Debug, Default)]
pub struct ComponentMetadataBuilder {
    version: u32,
    expires: Option<DateTime<Utc>>,
    name: Option<String>,
    description: String,
    platforms: HashMap<String, HashMap<String, VersionItem>>,
}

impl ComponentMetadataBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ComponentMetadataBuilder {
            version: 1,
            expires: None,
            name: Some(name.into()),
            description: String::new(),
            platforms: HashMap::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn insert_version(mut self, platform: impl Into<String>, version: impl Into<String>, item: VersionItem) -> Self {
        self.platforms
            .entry(platform.into())
            .or_default()
            .insert(version.into(), item);
        self
    }

    pub fn build(self) -> Result<ComponentMetadata> {
        Ok(ComponentMetadata {
            ty: "component".into(),
            spec_version: format!("{SUPPORTED_SPEC_MAJOR}.0.0"),
            version: self.version,
            expires: self
                .expires
                .ok_or_else(|| Error::IllegalArgument("component metadata requires an expiry".into()))?,
            name: self
                .name
                .ok_or_else(|| Error::IllegalArgument("component metadata requires a name".into()))?,
            description: self.description,
            platforms: self.platforms,
        })
    }
}

/// A manifest payload bundled with zero or more signatures over its canonical encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMetadata<M> {
    pub signed: M,
    pub signatures: Vec<Signature>,
}

impl<M: Metadata> SignedMetadata<M> {
    pub fn new(signed: M) -> Self {
        SignedMetadata {
            signed,
            signatures: Vec::new(),
        }
    }

    pub fn signed(&self) -> &M {
        &self.signed
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Bytes the signatures are computed over: the canonical encoding of the payload alone, not
    /// the envelope.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonicalize(&self.signed)
    }

    /// Signs with `key`, replacing any existing signature from the same key id.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<()> {
        let bytes = self.canonical_bytes()?;
        let sig = key.sign(&bytes);
        self.signatures.retain(|s| s.key_id() != sig.key_id());
        self.signatures.push(sig);
        Ok(())
    }

    pub fn verify(&self, threshold: u32, authorized_keys: &HashMap<KeyId, PublicKey>) -> Result<()> {
        let bytes = self.canonical_bytes()?;
        verify_threshold(&bytes, &self.signatures, authorized_keys, threshold, M::ROLE)
    }
}

/// Parses `bytes` as a `SignedMetadata<M>`, checking that its `_type` tag and `spec_version` are
/// what the caller expects before returning it unverified.
pub fn decode<M: Metadata>(bytes: &[u8]) -> Result<SignedMetadata<M>> {
    let parsed: SignedMetadata<M> = serde_json::from_slice(bytes).map_err(|e| Error::SchemaError {
        role: M::ROLE,
        message: format!("{e}"),
    })?;
    let expected_ty = M::ROLE.to_string();
    if parsed.signed.ty() != expected_ty {
        return Err(Error::SchemaError {
            role: M::ROLE,
            message: format!("expected _type {expected_ty:?}, found {:?}", parsed.signed.ty()),
        });
    }
    check_spec_version(M::ROLE, parsed.signed.spec_version())?;
    Ok(parsed)
}

pub fn encode<M: Metadata>(signed: &SignedMetadata<M>) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(signed)?)
}
