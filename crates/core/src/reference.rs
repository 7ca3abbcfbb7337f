//! Model references: `owner/name` repo ids and the hub URLs that embed them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;

/// Canonical `owner/name` identifier of a hub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    owner: String,
    name: String,
}

/// Patterns tried in order; the first capture wins.
fn patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?:huggingface\.co|hf\.co)/([^/?#\s]+/[^/?#\s]+)")
                .expect("hub URL pattern is valid"),
            Regex::new(r"^([^/\s]+/[^/\s]+)$").expect("bare repo pattern is valid"),
        ]
    })
}

impl RepoId {
    /// Resolve a hub URL or bare `owner/name` into a canonical repo id.
    pub fn resolve(reference: &str) -> Result<Self, Error> {
        let trimmed = reference.trim();
        patterns()
            .iter()
            .find_map(|pattern| pattern.captures(trimmed))
            .and_then(|caps| caps.get(1))
            .and_then(|m| Self::split(m.as_str()))
            .ok_or_else(|| Error::InvalidReference {
                reference: reference.to_string(),
            })
    }

    fn split(pair: &str) -> Option<Self> {
        let (owner, name) = pair.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory name used in the local model store, e.g. `IDKiro_sdxs-512-0.9`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl TryFrom<String> for RepoId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::resolve(&value)
    }
}

impl From<RepoId> for String {
    fn from(repo: RepoId) -> Self {
        repo.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bare_repo_id_is_returned_unchanged() {
        let repo = RepoId::resolve("stabilityai/stable-diffusion-2-1-base").unwrap();
        assert_eq!(repo.to_string(), "stabilityai/stable-diffusion-2-1-base");
        assert_eq!(repo.owner(), "stabilityai");
        assert_eq!(repo.name(), "stable-diffusion-2-1-base");
    }

    #[test]
    fn hub_url_yields_the_embedded_pair() {
        let repo = RepoId::resolve("https://huggingface.co/IDKiro/sdxs-512-0.9").unwrap();
        assert_eq!(repo.to_string(), "IDKiro/sdxs-512-0.9");
    }

    #[test]
    fn deep_hub_urls_stop_at_the_repo() {
        for url in [
            "https://huggingface.co/IDKiro/sdxs-512-0.9/tree/main/unet",
            "https://huggingface.co/IDKiro/sdxs-512-0.9?library=diffusers",
            "https://huggingface.co/IDKiro/sdxs-512-0.9#usage",
            "hf.co/IDKiro/sdxs-512-0.9",
            "  https://huggingface.co/IDKiro/sdxs-512-0.9  ",
        ] {
            assert_eq!(
                RepoId::resolve(url).unwrap().to_string(),
                "IDKiro/sdxs-512-0.9",
                "{url}"
            );
        }
    }

    #[test]
    fn malformed_references_are_rejected() {
        for bad in [
            "",
            "sdxs",
            "/name",
            "owner/",
            "a/b/c",
            "https://example.com/a/b/c",
            "https://huggingface.co/IDKiro",
            "owner name/model",
        ] {
            match RepoId::resolve(bad) {
                Err(Error::InvalidReference { reference }) => assert_eq!(reference, bad),
                other => panic!("expected InvalidReference for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn dir_name_replaces_the_separator() {
        let repo: RepoId = "stabilityai/stable-diffusion-2-1-base".parse().unwrap();
        assert_eq!(repo.dir_name(), "stabilityai_stable-diffusion-2-1-base");
    }

    #[test]
    fn serde_uses_the_canonical_string() {
        let repo: RepoId = "IDKiro/sdxs-512-0.9".parse().unwrap();
        let json = serde_json::to_string(&repo).unwrap();
        assert_eq!(json, "\"IDKiro/sdxs-512-0.9\"");
        let back: RepoId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
        assert!(serde_json::from_str::<RepoId>("\"nope\"").is_err());
    }

    proptest! {
        #[test]
        fn any_bare_pair_resolves_to_itself(
            owner in "[A-Za-z0-9][A-Za-z0-9_.-]{0,20}",
            name in "[A-Za-z0-9][A-Za-z0-9_.-]{0,40}",
        ) {
            let reference = format!("{owner}/{name}");
            let repo = RepoId::resolve(&reference).unwrap();
            prop_assert_eq!(repo.to_string(), reference);
        }

        #[test]
        fn any_hub_url_yields_its_pair(
            owner in "[A-Za-z0-9][A-Za-z0-9_-]{0,20}",
            name in "[A-Za-z0-9][A-Za-z0-9_.-]{0,40}",
            suffix in prop::sample::select(vec!["", "/", "/tree/main", "/blob/main/README.md"]),
        ) {
            let url = format!("https://huggingface.co/{owner}/{name}{suffix}");
            let repo = RepoId::resolve(&url).unwrap();
            prop_assert_eq!(repo.owner(), owner.as_str());
            prop_assert_eq!(repo.name(), name.as_str());
        }

        #[test]
        fn strings_without_a_pair_are_invalid(s in "[A-Za-z0-9_.-]{0,40}") {
            prop_assert!(
                matches!(RepoId::resolve(&s), Err(Error::InvalidReference { .. })),
                "expected InvalidReference"
            );
        }
    }
}
