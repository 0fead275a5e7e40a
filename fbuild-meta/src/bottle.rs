//! Bottle table: precompiled artifact identities keyed by platform tag

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    platform::{Os, Platform},
    Formula,
};

/// Tag matching every platform
pub const ALL_TAG: &str = "all";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BottleSpec {
    #[serde(default)]
    pub root_url: Option<String>,

    #[serde(default)]
    pub rebuild: u32,

    /// Platform tag to SHA-256 of the bottle archive
    #[serde(default)]
    pub sha256: IndexMap<String, String>,
}

/// A bottle chosen for a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bottle {
    pub name: String,
    pub version: String,
    pub tag: String,
    pub sha256: String,
    pub rebuild: u32,
    pub url: Option<String>,
}

impl Bottle {
    /// `<name>--<version>.<tag>.bottle[.<rebuild>].tar.gz`
    pub fn file_name(&self) -> String {
        if self.rebuild > 0 {
            format!(
                "{}--{}.{}.bottle.{}.tar.gz",
                self.name, self.version, self.tag, self.rebuild
            )
        } else {
            format!("{}--{}.{}.bottle.tar.gz", self.name, self.version, self.tag)
        }
    }
}

impl BottleSpec {
    /// Select the bottle to pour on `platform`.
    ///
    /// An exact tag wins. On macOS the newest bottle of the same architecture
    /// built for an older release is accepted next, then the `all` bottle.
    pub fn select(&self, platform: &Platform) -> Option<(&str, &str)> {
        let tag = platform.tag();
        if let Some((key, sha)) = self.sha256.get_key_value(tag.as_str()) {
            return Some((key.as_str(), sha.as_str()));
        }

        if let Os::MacOs(current) = platform.os {
            let fallback = self
                .sha256
                .iter()
                .filter_map(|(key, sha)| {
                    let candidate = Platform::from_tag(key).ok()?;
                    match candidate.os {
                        Os::MacOs(release)
                            if candidate.arch == platform.arch
                                && release.version <= current.version =>
                        {
                            Some((release.version, key.as_str(), sha.as_str()))
                        }
                        _ => None,
                    }
                })
                .max_by_key(|(version, _, _)| *version);

            if let Some((_, key, sha)) = fallback {
                return Some((key, sha));
            }
        }

        self.sha256
            .get_key_value(ALL_TAG)
            .map(|(key, sha)| (key.as_str(), sha.as_str()))
    }

    /// Tags that do not name a known platform
    pub fn unknown_tags(&self) -> Vec<&str> {
        self.sha256
            .keys()
            .filter(|tag| tag.as_str() != ALL_TAG && Platform::from_tag(tag).is_err())
            .map(String::as_str)
            .collect()
    }
}

impl Formula {
    /// The bottle for `platform`, if the formula declares one
    pub fn bottle_for(&self, platform: &Platform) -> Option<Bottle> {
        let spec = self.bottle.as_ref()?;
        let (tag, sha256) = spec.select(platform)?;
        let url = spec.root_url.as_ref().map(|root| {
            format!(
                "{}/{}/blobs/sha256:{}",
                root.trim_end_matches('/'),
                self.name,
                sha256
            )
        });

        Some(Bottle {
            name: self.name.clone(),
            version: self.version.clone(),
            tag: tag.to_string(),
            sha256: sha256.to_string(),
            rebuild: spec.rebuild,
            url,
        })
    }
}
