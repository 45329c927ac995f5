//! Threshold signature verification.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::crypto::{KeyId, PublicKey, Signature};
use crate::error::Error;
use crate::metadata::RoleName;
use crate::Result;

/// Verifies that `signatures` contains at least `threshold` distinct, valid signatures over
/// `canonical_bytes` from keys in `authorized_keys`. A key id appearing more than once in
/// `signatures` counts once. Signatures from unauthorized key ids are ignored, not rejected.
pub fn verify_threshold(
    canonical_bytes: &[u8],
    signatures: &[Signature],
    authorized_keys: &HashMap<KeyId, PublicKey>,
    threshold: u32,
    role: RoleName,
) -> Result<()> {
    if threshold == 0 {
        return Err(Error::Programming(format!(
            "{role} role definition has a zero threshold"
        )));
    }

    let mut satisfied: HashSet<&KeyId> = HashSet::new();
    for sig in signatures {
        if satisfied.contains(sig.key_id()) {
            continue;
        }
        match authorized_keys.get(sig.key_id()) {
            Some(public_key) => match public_key.verify(canonical_bytes, sig) {
                Ok(()) => {
                    debug!("{role}: signature by {} verified", sig.key_id());
                    satisfied.insert(sig.key_id());
                }
                Err(_) => warn!("{role}: signature by {} did not verify", sig.key_id()),
            },
            None => warn!("{role}: signature by unauthorized key {}", sig.key_id()),
        }
        if satisfied.len() as u32 >= threshold {
            return Ok(());
        }
    }

    Err(Error::SignatureError {
        role,
        message: format!(
            "only {} of {} required signatures verified",
            satisfied.len(),
            threshold
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PrivateKey, SignatureScheme};
    use ring::rand::SystemRandom;
    use ring::signature::Ed25519KeyPair;

    fn key() -> PrivateKey {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        PrivateKey::from_pkcs8(pkcs8.as_ref(), SignatureScheme::Ed25519).unwrap()
    }

    #[test]
    fn single_signature_meets_threshold_one() {
        let k = key();
        let msg = b"payload";
        let sig = k.sign(msg);
        let mut keys = HashMap::new();
        keys.insert(k.public().key_id().clone(), k.public().clone());
        verify_threshold(msg, &[sig], &keys, 1, RoleName::Root).unwrap();
    }

    #[test]
    fn duplicate_signatures_from_same_key_do_not_satisfy_higher_threshold() {
        let k = key();
        let msg = b"payload";
        let sig = k.sign(msg);
        let mut keys = HashMap::new();
        keys.insert(k.public().key_id().clone(), k.public().clone());
        let err = verify_threshold(msg, &[sig.clone(), sig], &keys, 2, RoleName::Root).unwrap_err();
        assert!(matches!(err, Error::SignatureError { .. }));
    }

    #[test]
    fn unauthorized_key_is_ignored_not_rejected() {
        let authorized = key();
        let rogue = key();
        let msg = b"payload";
        let rogue_sig = rogue.sign(msg);
        let mut keys = HashMap::new();
        keys.insert(authorized.public().key_id().clone(), authorized.public().clone());
        let err = verify_threshold(msg, &[rogue_sig], &keys, 1, RoleName::Snapshot).unwrap_err();
        assert!(matches!(err, Error::SignatureError { .. }));
    }

    #[test]
    fn two_of_three_threshold_met_by_two_distinct_keys() {
        let a = key();
        let b = key();
        let c = key();
        let msg = b"payload";
        let mut keys = HashMap::new();
        for k in [&a, &b, &c] {
            keys.insert(k.public().key_id().clone(), k.public().clone());
        }
        let sigs = vec![a.sign(msg), b.sign(msg)];
        verify_threshold(msg, &sigs, &keys, 2, RoleName::Index).unwrap();
    }
}
