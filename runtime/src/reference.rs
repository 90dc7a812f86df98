//! Cluster image reference parsing.
//!
//! Parses names like `registry.local:5000/platform/kubernetes:v1.22.8` into
//! structured components. The raw string given by the user is kept as the
//! image store key.

use cimg_core::error::{CimgError, Result};

/// Registry used when the name carries none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when neither a tag nor a digest is given.
const DEFAULT_TAG: &str = "latest";

/// Marker for "no parent image".
pub const SCRATCH: &str = "scratch";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    raw: String,
    /// Registry hostname, optionally with port
    pub registry: String,
    /// Repository path (e.g., "platform/kubernetes")
    pub repository: String,
    /// Tag (e.g., "v1.22.8")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `kubernetes` → docker.io/kubernetes:latest
    /// - `platform/kubernetes:v1.22` → docker.io/platform/kubernetes:v1.22
    /// - `reg.local:5000/k8s:v1` → reg.local:5000/k8s:v1
    /// - `reg.local/k8s@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference.trim();
        if raw.is_empty() {
            return Err(CimgError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(CimgError::InvalidReference(format!(
                "Reference '{}' contains whitespace",
                raw
            )));
        }

        let (name_tag, digest) = match raw.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(CimgError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        raw
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (raw, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry(name, raw)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            raw: raw.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The reference exactly as the user wrote it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this names the empty base.
    pub fn is_scratch(&self) -> bool {
        self.raw == SCRATCH
    }

    /// Get the normalized reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]`. A colon only starts a tag after the last `/`, and a
/// purely numeric suffix on a slash-less name is a port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_component_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let last_component = &name_tag[last_component_start..];

    match last_component.rfind(':') {
        Some(colon) => {
            let tag = &last_component[colon + 1..];
            if last_component_start == 0 && tag.chars().all(|c| c.is_ascii_digit()) {
                (name_tag, None)
            } else {
                (&name_tag[..last_component_start + colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry(name: &str, raw: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(CimgError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    raw
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() {
        return Err(CimgError::InvalidReference(format!(
            "Empty repository in reference '{}'",
            raw
        )));
    }

    Ok((DEFAULT_REGISTRY.to_string(), name.to_string()))
}
