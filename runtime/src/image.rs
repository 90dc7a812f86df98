//! Cluster image metadata.
//!
//! An image is an ordered list of layers plus annotations. Its identity is
//! the SHA256 of the canonical JSON encoding of everything except the
//! identity field itself.

use std::collections::BTreeMap;

use cimg_core::error::Result;
use cimg_core::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::reference::SCRATCH;

/// Maximum number of layers (inherited + new) in one image.
pub const MAX_LAYER_DEPTH: usize = 128;

/// Annotation key carrying the cluster configuration file.
pub const ANNOTATION_CLUSTERFILE: &str = "sealer.aliyun.com/clusterfile";

/// Kind of a build instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerType {
    /// `FROM <image|scratch>`
    From,
    /// `COPY <src>... <dst>`
    Copy,
    /// `RUN <command>`
    Run,
    /// `CMD <command>`, executed like RUN
    Cmd,
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::From => write!(f, "FROM"),
            Self::Copy => write!(f, "COPY"),
            Self::Run => write!(f, "RUN"),
            Self::Cmd => write!(f, "CMD"),
        }
    }
}

/// One instruction's record in an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(rename = "type")]
    pub kind: LayerType,
    pub value: String,
    /// Content identity, unset until executed or resolved from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentDigest>,
}

impl Layer {
    pub fn new(kind: LayerType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            id: None,
        }
    }

    /// `COPY` sources and destination, split on whitespace.
    ///
    /// Returns `None` for other kinds or when fewer than two fields exist.
    pub fn copy_args(&self) -> Option<(Vec<&str>, &str)> {
        if self.kind != LayerType::Copy {
            return None;
        }
        let fields: Vec<&str> = self.value.split_whitespace().collect();
        let (dst, srcs) = fields.split_last()?;
        if srcs.is_empty() {
            return None;
        }
        Some((srcs.to_vec(), dst))
    }

    /// Human-readable instruction text (e.g., `RUN echo hi`).
    pub fn instruction(&self) -> String {
        format!("{} {}", self.kind, self.value)
    }
}

/// Layer list and identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

/// Cluster image metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: ImageSpec,
}

impl Image {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            annotations: BTreeMap::new(),
            spec: ImageSpec {
                id: String::new(),
                layers,
            },
        }
    }

    /// The base declaration, if the first layer is a FROM.
    pub fn base(&self) -> Option<&str> {
        match self.spec.layers.first() {
            Some(layer) if layer.kind == LayerType::From => Some(layer.value.as_str()),
            _ => None,
        }
    }

    /// Whether the image starts from the empty filesystem.
    pub fn is_scratch(&self) -> bool {
        self.base() == Some(SCRATCH)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }
}

/// Compute the image identity: SHA256 hex over the canonical JSON encoding
/// with the identity field cleared.
pub fn generate_image_id(image: &Image) -> Result<String> {
    let mut canonical = image.clone();
    canonical.spec.id.clear();
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(ContentDigest::from_bytes(&bytes).hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(s: &str) -> ContentDigest {
        ContentDigest::from_bytes(s.as_bytes())
    }

    fn sample() -> Image {
        let mut copy = Layer::new(LayerType::Copy, "manifests .");
        copy.id = Some(digest("manifests"));
        let mut image = Image::new(vec![
            Layer::new(LayerType::From, "scratch"),
            copy,
            Layer::new(LayerType::Cmd, "kubectl apply -f manifests"),
        ]);
        image.set_annotation(ANNOTATION_CLUSTERFILE, "kind: Cluster");
        image
    }

    #[test]
    fn test_image_id_is_deterministic() {
        let a = generate_image_id(&sample()).unwrap();
        let b = generate_image_id(&sample()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_image_id_ignores_existing_id() {
        let mut image = sample();
        let before = generate_image_id(&image).unwrap();
        image.spec.id = before.clone();
        assert_eq!(generate_image_id(&image).unwrap(), before);
    }

    #[test]
    fn test_image_id_changes_with_layers() {
        let mut image = sample();
        let before = generate_image_id(&image).unwrap();
        image.spec.layers.swap(1, 2);
        assert_ne!(generate_image_id(&image).unwrap(), before);
    }

    #[test]
    fn test_image_id_changes_with_annotations() {
        let mut image = sample();
        let before = generate_image_id(&image).unwrap();
        image.set_annotation("extra", "1");
        assert_ne!(generate_image_id(&image).unwrap(), before);
    }

    #[test]
    fn test_annotation_insertion_order_irrelevant() {
        let mut a = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        a.set_annotation("a", "1");
        a.set_annotation("b", "2");
        let mut b = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        b.set_annotation("b", "2");
        b.set_annotation("a", "1");
        assert_eq!(generate_image_id(&a).unwrap(), generate_image_id(&b).unwrap());
    }

    #[test]
    fn test_base_and_scratch() {
        let image = sample();
        assert_eq!(image.base(), Some("scratch"));
        assert!(image.is_scratch());

        let image = Image::new(vec![Layer::new(LayerType::Run, "true")]);
        assert_eq!(image.base(), None);
        assert!(!image.is_scratch());
    }

    #[test]
    fn test_copy_args() {
        let layer = Layer::new(LayerType::Copy, "a.yaml b.yaml manifests/");
        let (srcs, dst) = layer.copy_args().unwrap();
        assert_eq!(srcs, vec!["a.yaml", "b.yaml"]);
        assert_eq!(dst, "manifests/");

        assert!(Layer::new(LayerType::Copy, "only-one").copy_args().is_none());
        assert!(Layer::new(LayerType::Run, "a b").copy_args().is_none());
    }

    #[test]
    fn test_layer_serialization_omits_missing_id() {
        let json = serde_json::to_string(&Layer::new(LayerType::Run, "true")).unwrap();
        assert_eq!(json, r#"{"type":"RUN","value":"true"}"#);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let image = sample();
        let yaml = serde_yaml::to_string(&image).unwrap();
        let back: Image = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, image);
    }
}
