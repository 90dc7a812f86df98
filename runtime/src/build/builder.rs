//! Local build pipeline.
//!
//! Orchestrates a build: reads and validates the Kubefile, makes sure the
//! base image is present, executes each instruction (reusing cached COPY
//! layers where the chain allows), and saves the finalized image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cimg_core::error::{CimgError, Result};
use cimg_core::{BuildConfig, StoreConfig, DEFAULT_CLUSTER_FILE_NAME};

use super::handler::{handle_copy, handle_run, relative_path};
use super::kubefile::Kubefile;
use super::report::{BuildReport, BuildWarning, LayerOutcome};
use crate::cache::{CacheId, CacheProbe, ChainId, ChainService};
use crate::image::{generate_image_id, Image, Layer, LayerType, ANNOTATION_CLUSTERFILE, MAX_LAYER_DEPTH};
use crate::pull::{ImageService, LocalImageService};
use crate::reference::ImageReference;
use crate::store::{FsImageStore, FsLayerStore, ImageStore, LayerStore};

/// Layer metadata key holding the cache identity of a COPY layer.
pub const CACHE_ID_KEY: &str = "cacheID";

/// An image's layers split at the base image boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderLayers {
    /// Inherited unchanged from the base image
    pub base: Vec<Layer>,
    /// This build's own instructions, after the FROM line
    pub new: Vec<Layer>,
}

impl BuilderLayers {
    /// Total layers once squashed.
    pub fn depth(&self) -> usize {
        self.base.len() + self.new.len()
    }

    /// Flatten into the final layer list.
    pub fn squash(self) -> Vec<Layer> {
        let mut layers = self.base;
        layers.extend(self.new);
        layers
    }
}

/// Results of the instruction loop.
struct ExecOutcome {
    layers: Vec<LayerOutcome>,
    warnings: Vec<BuildWarning>,
}

/// Builds cluster images on the local host.
pub struct LocalBuilder {
    config: BuildConfig,
    store_config: StoreConfig,
    layer_store: Arc<dyn LayerStore>,
    image_store: Arc<dyn ImageStore>,
    image_service: Arc<dyn ImageService>,
    chain: ChainService,
}

impl LocalBuilder {
    /// Create a builder over the filesystem stores under `store_config.root`.
    pub fn new(config: BuildConfig, store_config: StoreConfig) -> Result<Self> {
        let layer_store: Arc<dyn LayerStore> = Arc::new(FsLayerStore::new(&store_config)?);
        let image_store: Arc<dyn ImageStore> = Arc::new(FsImageStore::new(&store_config)?);
        let image_service: Arc<dyn ImageService> =
            Arc::new(LocalImageService::new(image_store.clone()));
        Self::with_stores(config, store_config, layer_store, image_store, image_service)
    }

    /// Create a builder over caller-provided collaborators.
    pub fn with_stores(
        config: BuildConfig,
        store_config: StoreConfig,
        layer_store: Arc<dyn LayerStore>,
        image_store: Arc<dyn ImageStore>,
        image_service: Arc<dyn ImageService>,
    ) -> Result<Self> {
        let chain = ChainService::new(&store_config.cache_dir(), layer_store.clone())?;
        Ok(Self {
            config,
            store_config,
            layer_store,
            image_store,
            image_service,
            chain,
        })
    }

    /// Build the image described by `kubefile` with `context_dir` as the
    /// build context and save it as `name`.
    ///
    /// Stops at the first failing stage. Layers registered before the
    /// failure stay in the layer store.
    pub async fn build(&self, name: &str, context_dir: &Path, kubefile: &Path) -> Result<BuildReport> {
        let reference = ImageReference::parse(name)?;
        tracing::info!(
            image = %reference.raw(),
            build_type = %self.config.build_type,
            no_cache = self.config.no_cache,
            "Starting build"
        );

        let image = self.init_image_spec(kubefile)?;
        tracing::info!(
            kubefile = %kubefile.display(),
            instructions = image.spec.layers.len(),
            "Parsed Kubefile"
        );

        self.pull_base_image_if_absent(&image).await?;

        let mut layers = self.partition_layers(&image).await?;
        let exec = self.exec(&mut layers, context_dir)?;
        tracing::info!(
            layers = exec.layers.len(),
            cache_hits = exec.layers.iter().filter(|l| l.cached).count(),
            "Executed all build instructions"
        );

        let image = self
            .update_image_metadata(image, layers, context_dir, &reference)
            .await?;

        Ok(BuildReport {
            image_id: image.spec.id.clone(),
            reference: reference.raw().to_string(),
            layer_count: image.spec.layers.len(),
            layers: exec.layers,
            warnings: exec.warnings,
        })
    }

    /// Read and validate the Kubefile.
    pub fn init_image_spec(&self, kubefile: &Path) -> Result<Image> {
        let parsed = Kubefile::from_file(kubefile)?;
        match parsed.layers.first() {
            None => Err(CimgError::InvalidKubefile(format!(
                "{} contains no instructions",
                kubefile.display()
            ))),
            Some(first) if first.kind != LayerType::From => Err(CimgError::InvalidKubefile(
                "first line of Kubefile must start with FROM".to_string(),
            )),
            Some(_) => Ok(Image::new(parsed.layers)),
        }
    }

    /// Make sure the base image is in the local image store.
    pub async fn pull_base_image_if_absent(&self, image: &Image) -> Result<()> {
        let base = image
            .base()
            .ok_or_else(|| CimgError::InvalidKubefile("image has no base layer".to_string()))?;
        if image.is_scratch() {
            tracing::debug!("Building from scratch, nothing to pull");
            return Ok(());
        }

        self.image_service
            .pull_if_not_exist(base)
            .await
            .map_err(|e| CimgError::PullFailed {
                reference: base.to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(base, "Base image is present");
        Ok(())
    }

    /// Split the image's layers into inherited and new, enforcing the
    /// depth limit.
    pub async fn partition_layers(&self, image: &Image) -> Result<BuilderLayers> {
        let base = if image.is_scratch() {
            Vec::new()
        } else {
            let name = image
                .base()
                .ok_or_else(|| CimgError::InvalidKubefile("image has no base layer".to_string()))?;
            self.image_store
                .get_by_name(name)
                .await
                .map_err(|e| CimgError::BaseImageNotFound(format!("{}: {}", name, e)))?
                .spec
                .layers
        };
        let new = image.spec.layers.iter().skip(1).cloned().collect();

        let layers = BuilderLayers { base, new };
        if layers.depth() > MAX_LAYER_DEPTH {
            return Err(CimgError::LayerDepthExceeded {
                count: layers.depth(),
                max: MAX_LAYER_DEPTH,
            });
        }
        Ok(layers)
    }

    /// Execute every new layer in order, filling in layer identities.
    fn exec(&self, layers: &mut BuilderLayers, context_dir: &Path) -> Result<ExecOutcome> {
        let mut base_paths: Vec<PathBuf> = layers
            .base
            .iter()
            .filter_map(|layer| layer.id.as_ref())
            .map(|id| self.layer_store.layer_data_dir(id))
            .collect();
        let mut chain = ChainId::root();
        let mut continue_cache = !self.config.no_cache;
        let mut outcome = ExecOutcome {
            layers: Vec::with_capacity(layers.new.len()),
            warnings: Vec::new(),
        };

        for layer in layers.new.iter_mut() {
            tracing::info!(kind = %layer.kind, value = %layer.value, "Running build instruction");

            let (id, cached) = match layer.kind {
                LayerType::Run | LayerType::Cmd => {
                    (handle_run(layer, &base_paths, self.layer_store.as_ref())?, false)
                }
                LayerType::Copy => {
                    let (id, cached) = self.exec_copy(
                        layer,
                        context_dir,
                        &chain,
                        &mut continue_cache,
                        &mut outcome.warnings,
                    )?;
                    (Some(id), cached)
                }
                LayerType::From => {
                    return Err(CimgError::UnsupportedInstruction(format!(
                        "{} may only appear on the first line",
                        layer.instruction()
                    )))
                }
            };

            layer.id = id.clone();
            outcome.layers.push(LayerOutcome {
                kind: layer.kind,
                value: layer.value.clone(),
                id: id.clone(),
                cached,
            });

            if let Some(id) = id {
                chain = chain.extend(&id);
                base_paths.push(self.layer_store.layer_data_dir(&id));
            }
        }

        Ok(outcome)
    }

    /// COPY with cache threading. Returns the layer identity and whether it
    /// came from the cache.
    fn exec_copy(
        &self,
        layer: &Layer,
        context_dir: &Path,
        chain: &ChainId,
        continue_cache: &mut bool,
        warnings: &mut Vec<BuildWarning>,
    ) -> Result<(cimg_core::ContentDigest, bool)> {
        let instruction = layer.instruction();
        let (srcs, _) = layer.copy_args().ok_or_else(|| CimgError::InstructionFailed {
            instruction: instruction.clone(),
            message: "COPY requires a source and a destination".to_string(),
        })?;
        let cache_id = CacheId::for_copy(&instruction, context_dir, &srcs)?;

        if *continue_cache {
            if let CacheProbe::Hit { layer_id, .. } = self.chain.probe(chain, &cache_id) {
                tracing::info!(instruction = %instruction, layer = %layer_id, "Using cache");
                return Ok((layer_id, true));
            }
            *continue_cache = false;
        }

        let layer_id = handle_copy(layer, context_dir, self.layer_store.as_ref())?;

        if let Err(e) = self.chain.record(chain, &cache_id, &layer_id) {
            tracing::warn!(layer = %layer_id, error = %e, "Failed to index layer in build cache");
            warnings.push(BuildWarning::CacheIndexWrite {
                layer: layer_id.clone(),
                message: e.to_string(),
            });
        }

        if !*continue_cache {
            let value = cache_id.to_string();
            if let Err(e) = self
                .layer_store
                .set_metadata(&layer_id, CACHE_ID_KEY, value.as_bytes())
            {
                tracing::warn!(layer = %layer_id, error = %e, "Failed to store cache id");
                warnings.push(BuildWarning::CacheMetadataWrite {
                    layer: layer_id.clone(),
                    message: e.to_string(),
                });
            }
        }

        Ok((layer_id, false))
    }

    /// Resolve the cluster file, squash the layers, compute the image
    /// identity and save the image.
    async fn update_image_metadata(
        &self,
        mut image: Image,
        layers: BuilderLayers,
        context_dir: &Path,
        reference: &ImageReference,
    ) -> Result<Image> {
        let cluster_file = self.resolve_cluster_file(&image, context_dir).await;
        image.set_annotation(ANNOTATION_CLUSTERFILE, cluster_file);

        image.spec.layers = layers.squash();
        image.spec.id = generate_image_id(&image)?;
        self.image_store.save(&image, reference.raw()).await?;

        tracing::info!(
            image = %reference.raw(),
            id = %image.spec.id,
            layers = image.spec.layers.len(),
            "Saved image metadata"
        );
        Ok(image)
    }

    /// Cluster file content, first match wins: a COPY of `Clusterfile` from
    /// the build context, the base image's annotation, the local default
    /// file, then empty. An unreadable context file falls through.
    async fn resolve_cluster_file(&self, image: &Image, context_dir: &Path) -> String {
        if let Some(src) = cluster_file_source(image) {
            match relative_path(src) {
                Some(rel) => {
                    let path = context_dir.join(rel);
                    match std::fs::read_to_string(&path) {
                        Ok(data) => {
                            tracing::info!(
                                path = %path.display(),
                                "Using cluster file from build context"
                            );
                            return data;
                        }
                        Err(e) => tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to read cluster file from build context"
                        ),
                    }
                }
                None => tracing::warn!(src, "Cluster file source escapes the build context"),
            }
        }

        if let (Some(base), false) = (image.base(), image.is_scratch()) {
            let data = self.image_service.cluster_file_from_image(base).await;
            if !data.is_empty() {
                tracing::info!(base, "Using cluster file from base image");
                return data;
            }
        }

        let default_path = self.store_config.cluster_file_path();
        match std::fs::read_to_string(&default_path) {
            Ok(data) => {
                tracing::info!(path = %default_path.display(), "Using default cluster file");
                data
            }
            Err(_) => {
                tracing::debug!(path = %default_path.display(), "No cluster file found");
                String::new()
            }
        }
    }
}

/// Source path of the first COPY that installs the cluster file.
fn cluster_file_source(image: &Image) -> Option<&str> {
    image.spec.layers.iter().find_map(|layer| {
        let (srcs, dst) = layer.copy_args()?;
        let dst = dst.trim_start_matches("./").trim_matches('/');
        let first = *srcs.first()?;
        let first_name = first.trim_start_matches("./").trim_matches('/');
        if dst == DEFAULT_CLUSTER_FILE_NAME || first_name == DEFAULT_CLUSTER_FILE_NAME {
            Some(first)
        } else {
            None
        }
    })
}
