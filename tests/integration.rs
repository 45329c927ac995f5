//! End-to-end sync and resolution scenarios, built against in-memory mirror and store.

use std::collections::HashMap;
use std::io::Read;

use chrono::{Duration, Utc};
use mirrortrust::client::{Client, Config};
use mirrortrust::crypto::{PrivateKey, SignatureScheme};
use mirrortrust::error::Error;
use mirrortrust::metadata::{
    encode, fname_with_version, ComponentMetadataBuilder, FileHash, IndexMetadataBuilder, Owner,
    ComponentRecord, RoleDefinition, RoleName, RootMetadataBuilder, SignedMetadata, SnapshotMetadataBuilder,
    TimestampMetadataBuilder,
};
use mirrortrust::mirror::EphemeralMirror;
use mirrortrust::store::EphemeralStore;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;

struct Keys {
    root: PrivateKey,
    timestamp: PrivateKey,
    snapshot: PrivateKey,
    index: PrivateKey,
    owner: PrivateKey,
}

fn generate_key() -> PrivateKey {
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
    PrivateKey::from_pkcs8(pkcs8.as_ref(), SignatureScheme::Ed25519).unwrap()
}

fn generate_keys() -> Keys {
    Keys {
        root: generate_key(),
        timestamp: generate_key(),
        snapshot: generate_key(),
        index: generate_key(),
        owner: generate_key(),
    }
}

fn build_root(keys: &Keys, version: u32) -> SignedMetadata<mirrortrust::metadata::RootMetadata> {
    let mut root_keys = HashMap::new();
    root_keys.insert(keys.root.public().key_id().clone(), keys.root.public().clone());
    let mut ts_keys = HashMap::new();
    ts_keys.insert(keys.timestamp.public().key_id().clone(), keys.timestamp.public().clone());
    let mut snap_keys = HashMap::new();
    snap_keys.insert(keys.snapshot.public().key_id().clone(), keys.snapshot.public().clone());
    let mut idx_keys = HashMap::new();
    idx_keys.insert(keys.index.public().key_id().clone(), keys.index.public().clone());

    let signed = RootMetadataBuilder::new()
        .version(version)
        .expires(Utc::now() + Duration::days(365))
        .role(RoleName::Root, RoleDefinition::new(root_keys, 1).unwrap())
        .role(RoleName::Timestamp, RoleDefinition::new(ts_keys, 1).unwrap())
        .role(RoleName::Snapshot, RoleDefinition::new(snap_keys, 1).unwrap())
        .role(RoleName::Index, RoleDefinition::new(idx_keys, 1).unwrap())
        .build()
        .unwrap();

    let mut signed = SignedMetadata::new(signed);
    signed.sign(&keys.root).unwrap();
    signed
}

fn build_component(keys: &Keys, artifact: &[u8]) -> SignedMetadata<mirrortrust::metadata::ComponentMetadata> {
    let hash = FileHash::from_reader(artifact).unwrap();
    let item = mirrortrust::metadata::VersionItem {
        url: "demo-1.0.0.bin".into(),
        hash,
        entry_point: Some("bin/demo".into()),
        dependencies: vec![],
    };
    let signed = ComponentMetadataBuilder::new("demo")
        .expires(Utc::now() + Duration::days(30))
        .insert_version("linux-x86_64", "1.0.0", item)
        .build()
        .unwrap();
    let mut signed = SignedMetadata::new(signed);
    signed.sign(&keys.owner).unwrap();
    signed
}

/// Publishes a complete, internally-consistent repository at version 1 of every manifest, with
/// one component ("demo") and one platform.
fn publish_initial(mirror: &EphemeralMirror, keys: &Keys, artifact: &[u8]) {
    let root = build_root(keys, 1);
    mirror.put("root.json", encode(&root).unwrap());
    mirror.put(fname_with_version("root.json", 1), encode(&root).unwrap());

    let component = build_component(keys, artifact);
    mirror.put("demo.json", encode(&component).unwrap());
    mirror.put(fname_with_version("demo.json", 1), encode(&component).unwrap());
    mirror.put("demo-1.0.0.bin", artifact.to_vec());

    let mut owners = HashMap::new();
    let mut owner_keys = HashMap::new();
    owner_keys.insert(keys.owner.public().key_id().clone(), keys.owner.public().clone());
    owners.insert(
        "acme".to_string(),
        Owner {
            name: "Acme Corp".into(),
            keys: owner_keys,
        },
    );
    let mut components = HashMap::new();
    components.insert(
        "demo".to_string(),
        ComponentRecord {
            owner_id: "acme".into(),
            url: "demo.json".into(),
            threshold: 1,
            yanked: false,
        },
    );
    let index = IndexMetadataBuilder::new()
        .expires(Utc::now() + Duration::days(90))
        .owner("acme", owners["acme"].clone())
        .component("demo", components["demo"].clone())
        .defaults(vec!["demo".into()])
        .build()
        .unwrap();
    let mut index = SignedMetadata::new(index);
    index.sign(&keys.index).unwrap();
    mirror.put("index.json", encode(&index).unwrap());
    mirror.put(fname_with_version("index.json", 1), encode(&index).unwrap());

    let snapshot = SnapshotMetadataBuilder::new()
        .expires(Utc::now() + Duration::days(7))
        .insert("root.json", 1)
        .insert("index.json", 1)
        .insert("demo.json", 1)
        .build()
        .unwrap();
    let mut snapshot = SignedMetadata::new(snapshot);
    snapshot.sign(&keys.snapshot).unwrap();
    mirror.put("snapshot.json", encode(&snapshot).unwrap());

    let snapshot_hash = FileHash::from_reader(encode(&snapshot).unwrap().as_slice()).unwrap();
    let timestamp = TimestampMetadataBuilder::from_snapshot("snapshot.json", snapshot_hash)
        .expires(Utc::now() + Duration::hours(24))
        .build()
        .unwrap();
    let mut timestamp = SignedMetadata::new(timestamp);
    timestamp.sign(&keys.timestamp).unwrap();
    mirror.put("timestamp.json", encode(&timestamp).unwrap());
}

#[test]
fn first_sync_trusts_every_role_and_resolves_component() {
    let keys = generate_keys();
    let artifact = b"things fade, alternatives exclude".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();

    let changed = client.sync().unwrap();
    assert!(changed);

    let component = client.resolve_component("demo").unwrap();
    assert_eq!(component.signed().name, "demo");

    let (version, item) = client.select_version(&component, "linux-x86_64", None).unwrap();
    assert_eq!(version, "1.0.0");

    let mut reader = client.download(item).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, artifact);
}

#[test]
fn second_sync_with_unchanged_timestamp_reports_no_change() {
    let keys = generate_keys();
    let artifact = b"second sync fixture".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    assert!(client.sync().unwrap());
    assert!(!client.sync().unwrap());
}

#[test]
fn snapshot_rollback_is_rejected() {
    let keys = generate_keys();
    let artifact = b"rollback fixture".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    client.sync().unwrap();

    // Publish a new timestamp/snapshot pair where the snapshot claims an older index version
    // than what is already trusted.
    let stale_snapshot = SnapshotMetadataBuilder::new()
        .version(2)
        .expires(Utc::now() + Duration::days(7))
        .insert("root.json", 1)
        .insert("index.json", 0)
        .insert("demo.json", 1)
        .build()
        .unwrap();
    let mut stale_snapshot = SignedMetadata::new(stale_snapshot);
    stale_snapshot.sign(&keys.snapshot).unwrap();
    mirror.put("snapshot.json", encode(&stale_snapshot).unwrap());

    let hash = FileHash::from_reader(encode(&stale_snapshot).unwrap().as_slice()).unwrap();
    let new_timestamp = TimestampMetadataBuilder::from_snapshot("snapshot.json", hash)
        .version(2)
        .expires(Utc::now() + Duration::hours(24))
        .build()
        .unwrap();
    let mut new_timestamp = SignedMetadata::new(new_timestamp);
    new_timestamp.sign(&keys.timestamp).unwrap();
    mirror.put("timestamp.json", encode(&new_timestamp).unwrap());

    let err = client.sync().unwrap_err();
    assert!(matches!(err, Error::VersionError { role: RoleName::Snapshot, .. }));
}

#[test]
fn timestamp_with_bad_signature_is_rejected() {
    let keys = generate_keys();
    let artifact = b"bad signature fixture".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);

    let rogue = generate_key();
    let timestamp = TimestampMetadataBuilder::from_snapshot(
        "snapshot.json",
        FileHash::from_reader(b"whatever".as_slice()).unwrap(),
    )
    .expires(Utc::now() + Duration::hours(24))
    .build()
    .unwrap();
    let mut timestamp = SignedMetadata::new(timestamp);
    timestamp.sign(&rogue).unwrap();
    mirror.put("timestamp.json", encode(&timestamp).unwrap());

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    let err = client.sync().unwrap_err();
    assert!(matches!(err, Error::SignatureError { .. }));
}

#[test]
fn root_rotation_follows_the_chain_to_the_latest_version() {
    let keys = generate_keys();
    let artifact = b"rotation fixture".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);

    let new_root_keys = generate_keys();
    let root_v2_signed = build_root(&new_root_keys, 2).signed;
    // Re-sign version 2 so it carries both the old root's authorization and its own.
    let mut root_v2 = SignedMetadata::new(root_v2_signed);
    root_v2.sign(&keys.root).unwrap();
    root_v2.sign(&new_root_keys.root).unwrap();
    mirror.put(fname_with_version("root.json", 2), encode(&root_v2).unwrap());
    mirror.put("root.json", encode(&root_v2).unwrap());

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    let err = client.sync();
    // The republished timestamp/snapshot/index/demo manifests are still signed under the
    // original keys, so once root has rotated to version 2 those signatures no longer satisfy
    // the new root's declared key set and the sync must fail rather than silently trust them.
    assert!(err.is_err());
    assert_eq!(client.trust().root.signed().version(), 2);
}

#[test]
fn expired_index_is_rejected() {
    let keys = generate_keys();
    let mirror = EphemeralMirror::new();

    let root = build_root(&keys, 1);
    mirror.put("root.json", encode(&root).unwrap());
    mirror.put(fname_with_version("root.json", 1), encode(&root).unwrap());

    let index = IndexMetadataBuilder::new()
        .expires(Utc::now() - Duration::days(1))
        .build()
        .unwrap();
    let mut index = SignedMetadata::new(index);
    index.sign(&keys.index).unwrap();
    mirror.put("index.json", encode(&index).unwrap());
    mirror.put(fname_with_version("index.json", 1), encode(&index).unwrap());

    let snapshot = SnapshotMetadataBuilder::new()
        .expires(Utc::now() + Duration::days(7))
        .insert("root.json", 1)
        .insert("index.json", 1)
        .build()
        .unwrap();
    let mut snapshot = SignedMetadata::new(snapshot);
    snapshot.sign(&keys.snapshot).unwrap();
    mirror.put("snapshot.json", encode(&snapshot).unwrap());

    let hash = FileHash::from_reader(encode(&snapshot).unwrap().as_slice()).unwrap();
    let timestamp = TimestampMetadataBuilder::from_snapshot("snapshot.json", hash)
        .expires(Utc::now() + Duration::hours(24))
        .build()
        .unwrap();
    let mut timestamp = SignedMetadata::new(timestamp);
    timestamp.sign(&keys.timestamp).unwrap();
    mirror.put("timestamp.json", encode(&timestamp).unwrap());

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    let err = client.sync().unwrap_err();
    assert!(matches!(err, Error::ExpiredError { role: RoleName::Index, .. }));
}

#[test]
fn tampered_artifact_fails_hash_verification_on_download() {
    let keys = generate_keys();
    let artifact = b"the real bytes".to_vec();
    let mirror = EphemeralMirror::new();
    publish_initial(&mirror, &keys, &artifact);
    // Swap in different bytes at the same url after the manifest (with the original hash) was
    // already published.
    mirror.put("demo-1.0.0.bin", b"not the real bytes at all".to_vec());

    let store = EphemeralStore::with_root(encode(&build_root(&keys, 1)).unwrap());
    let mut client = Client::load(&mirror, &store, Config::default()).unwrap();
    client.sync().unwrap();

    let component = client.resolve_component("demo").unwrap();
    let (_, item) = client.select_version(&component, "linux-x86_64", None).unwrap();
    let mut reader = client.download(item).unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

