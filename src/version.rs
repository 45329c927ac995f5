//! Selecting which published version of a component to install.

use std::collections::HashMap;

use log::warn;
use semver::Version;

use crate::error::Error;
use crate::metadata::VersionItem;
use crate::Result;

/// Picks a version from `available` (version string -> item) for `component` on `platform`.
///
/// With `requested` set, the exact version string must be present, parseable or not. With
/// `requested` absent, the highest version that parses as semver wins; version strings that
/// don't parse as semver are logged and skipped rather than rejected outright, since a manifest
/// may legitimately carry entries meant to be reached only by exact request.
pub fn select_version<'a>(
    component: &str,
    platform: &str,
    available: &'a HashMap<String, VersionItem>,
    requested: Option<&str>,
) -> Result<(&'a str, &'a VersionItem)> {
    if available.is_empty() {
        return Err(Error::NoVersions {
            component: component.to_string(),
            platform: platform.to_string(),
        });
    }

    if let Some(requested) = requested {
        return available
            .get_key_value(requested)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| Error::UnknownVersion {
                component: component.to_string(),
                version: requested.to_string(),
            });
    }

    let mut best: Option<(&str, Version)> = None;
    for key in available.keys() {
        match Version::parse(key) {
            Ok(parsed) => {
                let better = match &best {
                    Some((_, current)) => parsed > *current,
                    None => true,
                };
                if better {
                    best = Some((key.as_str(), parsed));
                }
            }
            Err(_) => warn!("component {component} has a non-semver version string {key:?}; ignoring for latest selection"),
        }
    }

    let (key, _) = best.ok_or_else(|| Error::NoVersions {
        component: component.to_string(),
        platform: platform.to_string(),
    })?;
    Ok((key, &available[key]))
}
