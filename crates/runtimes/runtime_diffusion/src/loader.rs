//! Pipeline loader: builds a pipeline from the first strategy that works,
//! swaps in the fast scheduler and keeps the result for the caller.

use onestep_core::config::{Config, LoaderMode};
use onestep_core::{Error, LoadAttempt, RepoId, Result};
use onestep_runtime_api::{DiffusionPipeline, Precision, RuntimeStatus, SchedulerSpec};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::strategy::LoadStrategy;
use crate::PipelineBackend;

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub mode: LoaderMode,
    pub graft_base: RepoId,
    pub attention_slice_size: usize,
}

impl LoaderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.loader.mode,
            graft_base: config.loader.graft_base.clone(),
            attention_slice_size: config.inference.attention_slice_size.max(1),
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Non-fatal problems met while configuring a freshly built pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// The fast scheduler could not be installed; the checkpoint's own is used.
    SchedulerKept { reason: String },
    /// Attention slicing could not be enabled.
    AttentionSlicingUnavailable { reason: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::SchedulerKept { reason } => {
                write!(f, "could not set fast scheduler, using default: {}", reason)
            }
            LoadWarning::AttentionSlicingUnavailable { reason } => {
                write!(f, "attention slicing unavailable: {}", reason)
            }
        }
    }
}

/// What a successful `load` did.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub repo_id: RepoId,
    pub strategy: LoadStrategy,
    pub precision: Precision,
    pub device: String,
    pub scheduler: SchedulerSpec,
    /// Strategies that failed before `strategy` succeeded
    pub fallbacks: Vec<LoadAttempt>,
    pub warnings: Vec<LoadWarning>,
}

struct LoadedModel<P> {
    repo_id: RepoId,
    pipeline: P,
}

/// A loading session owned by the caller. Holds at most one pipeline.
pub struct ModelLoader<B: PipelineBackend> {
    backend: Arc<B>,
    options: LoaderOptions,
    status: RuntimeStatus,
    current: Option<LoadedModel<B::Pipeline>>,
}

impl<B: PipelineBackend> ModelLoader<B> {
    pub fn new(backend: B, options: LoaderOptions) -> Self {
        Self::with_backend(Arc::new(backend), options)
    }

    pub fn with_backend(backend: Arc<B>, options: LoaderOptions) -> Self {
        tracing::info!("Using device: {}", backend.device_label());
        Self {
            backend,
            options,
            status: RuntimeStatus::Unloaded,
            current: None,
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn loaded_repo(&self) -> Option<&RepoId> {
        self.current.as_ref().map(|m| &m.repo_id)
    }

    pub fn pipeline(&self) -> Result<&B::Pipeline> {
        self.current
            .as_ref()
            .map(|m| &m.pipeline)
            .ok_or(Error::NoModelLoaded)
    }

    pub fn unload(&mut self) -> Option<RepoId> {
        self.status = RuntimeStatus::Unloaded;
        self.current.take().map(|m| {
            tracing::info!("Unloaded model {}", m.repo_id);
            m.repo_id
        })
    }

    /// Build and configure a pipeline for `repo_id`. On failure the previously
    /// loaded pipeline, if any, stays in place.
    pub async fn load(&mut self, repo_id: &RepoId, local_path: &Path) -> Result<LoadReport> {
        let previous = self.status;
        self.status = RuntimeStatus::Loading;
        tracing::info!("Loading model {} from {}...", repo_id, local_path.display());

        match self.build(repo_id, local_path).await {
            Ok((pipeline, report)) => {
                self.current = Some(LoadedModel {
                    repo_id: repo_id.clone(),
                    pipeline,
                });
                self.status = RuntimeStatus::Loaded;
                tracing::info!("Model {} loaded successfully", repo_id);
                Ok(report)
            }
            Err(e) => {
                self.status = previous;
                tracing::error!("Error loading model: {}", e);
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        repo_id: &RepoId,
        local_path: &Path,
    ) -> Result<(B::Pipeline, LoadReport)> {
        let precision = Precision::for_device(self.backend.is_accelerated());
        let strategies = LoadStrategy::plan(
            self.options.mode,
            repo_id,
            local_path,
            &self.options.graft_base,
        );

        let strict = self.options.mode == LoaderMode::Graft;
        let slice_size = (!strict && self.backend.is_accelerated())
            .then_some(self.options.attention_slice_size);

        let mut attempts = Vec::new();
        let mut built = None;
        for strategy in strategies {
            let backend = Arc::clone(&self.backend);
            let job = strategy.clone();
            let outcome =
                tokio::task::spawn_blocking(move || backend.build(&job, precision, slice_size))
                    .await;

            let cause = match outcome {
                Ok(Ok(pipeline)) => {
                    tracing::info!("Loaded {} via {}", repo_id, strategy);
                    built = Some((strategy, pipeline));
                    break;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(e) => e.to_string(),
            };
            tracing::warn!("Could not load via {}: {}", strategy, cause);
            attempts.push(LoadAttempt {
                strategy: strategy.to_string(),
                cause,
            });
        }

        let Some((strategy, pipeline)) = built else {
            return Err(Error::ModelLoadFailed {
                repo_id: repo_id.clone(),
                attempts,
            });
        };

        let configured =
            tokio::task::spawn_blocking(move || configure(pipeline, strict, slice_size)).await;

        let (pipeline, warnings) = match configured.map_err(|e| e.to_string()).and_then(|r| r) {
            Ok(done) => done,
            Err(cause) => {
                attempts.push(LoadAttempt {
                    strategy: strategy.to_string(),
                    cause,
                });
                return Err(Error::ModelLoadFailed {
                    repo_id: repo_id.clone(),
                    attempts,
                });
            }
        };

        let device = self.backend.device_label();
        tracing::info!("Pipeline placed on {} ({:?})", device, precision);

        let report = LoadReport {
            repo_id: repo_id.clone(),
            strategy,
            precision,
            device,
            scheduler: *pipeline.scheduler(),
            fallbacks: attempts,
            warnings,
        };
        Ok((pipeline, report))
    }
}

/// Install the fast scheduler and, when asked, attention slicing. In strict
/// mode a scheduler failure aborts the load.
fn configure<P: DiffusionPipeline>(
    mut pipeline: P,
    strict: bool,
    slice_size: Option<usize>,
) -> std::result::Result<(P, Vec<LoadWarning>), String> {
    let mut warnings = Vec::new();

    let swapped = SchedulerSpec::fast_from(pipeline.scheduler())
        .map_err(anyhow::Error::from)
        .and_then(|spec| pipeline.set_scheduler(spec));
    match swapped {
        Ok(()) => tracing::info!("Using {:?} scheduler", pipeline.scheduler().kind),
        Err(e) if strict => return Err(format!("fast scheduler: {:#}", e)),
        Err(e) => {
            let warning = LoadWarning::SchedulerKept {
                reason: format!("{:#}", e),
            };
            tracing::warn!("{}", warning);
            warnings.push(warning);
        }
    }

    if let Some(size) = slice_size {
        if let Err(e) = pipeline.enable_attention_slicing(size) {
            let warning = LoadWarning::AttentionSlicingUnavailable {
                reason: format!("{:#}", e),
            };
            tracing::debug!("{}", warning);
            warnings.push(warning);
        }
    }

    Ok((pipeline, warnings))
}
