use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::reference::RepoId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local model store
    #[serde(default)]
    pub models: ModelsConfig,

    /// Hub connection settings
    #[serde(default)]
    pub hub: HubConfig,

    /// Inference defaults
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Pipeline construction
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory to store models (default: ~/.config/onestep/models/)
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// How an existing model directory is judged complete
    #[serde(default)]
    pub completeness: CompletenessPolicy,
}

/// Rule deciding whether a model directory already on disk can be reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletenessPolicy {
    /// Reuse only directories carrying a snapshot manifest; resume the rest.
    #[default]
    Manifest,
    /// Any existing directory counts as downloaded.
    Existence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base URL of the model hub
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HuggingFace token for private or gated models
    #[serde(default)]
    pub token: Option<String>,

    /// Draw per-file progress bars while downloading
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Use GPU acceleration (Metal on macOS, CUDA on Linux)
    #[serde(default = "default_true")]
    pub use_gpu: bool,

    /// Default number of denoising steps
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Default classifier-free guidance scale (<= 1.0 disables guidance)
    #[serde(default)]
    pub guidance_scale: f32,

    #[serde(default = "default_size")]
    pub width: u32,

    #[serde(default = "default_size")]
    pub height: u32,

    /// Attention slice size used on accelerated devices
    #[serde(default = "default_slice_size")]
    pub attention_slice_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub mode: LoaderMode,

    /// Base pipeline the local UNet is grafted onto in `graft` mode
    #[serde(default = "default_graft_base")]
    pub graft_base: RepoId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderMode {
    /// Full pipeline from the local directory, falling back to the hub
    #[default]
    Pipeline,
    /// Local UNet grafted onto the base pipeline, failures are fatal
    Graft,
}

fn default_storage_path() -> PathBuf {
    Config::base_dir()
        .map(|p| p.join("models"))
        .unwrap_or_else(|_| PathBuf::from("~/.config/onestep/models"))
}

fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_true() -> bool {
    true
}

fn default_steps() -> u32 {
    1
}

fn default_size() -> u32 {
    512
}

fn default_slice_size() -> usize {
    1
}

fn default_graft_base() -> RepoId {
    RepoId::resolve("stabilityai/stable-diffusion-2-1-base").expect("default graft base is a repo id")
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            completeness: CompletenessPolicy::default(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            show_progress: default_true(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            use_gpu: default_true(),
            steps: default_steps(),
            guidance_scale: 0.0,
            width: default_size(),
            height: default_size(),
            attention_slice_size: default_slice_size(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            mode: LoaderMode::default(),
            graft_base: default_graft_base(),
        }
    }
}

impl Config {
    /// Get the base directory: ~/.config/onestep/
    pub fn base_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("USERPROFILE").map(PathBuf::from))
            .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(".config").join("onestep"))
    }

    /// Load config from default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from an explicit file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            crate::Error::Config {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Save config to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the config file path: ~/.config/onestep/config.toml
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Get the models directory from config
    pub fn models_dir(&self) -> PathBuf {
        self.models.storage_path.clone()
    }

    /// Read a dotted key such as `inference.steps`
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "models.storage_path" => self.models.storage_path.display().to_string(),
            "models.completeness" => enum_str(&self.models.completeness)?,
            "hub.endpoint" => self.hub.endpoint.clone(),
            "hub.token" => self
                .hub
                .token
                .as_ref()
                .map(|_| "***".to_string())
                .unwrap_or_default(),
            "hub.show_progress" => self.hub.show_progress.to_string(),
            "inference.use_gpu" => self.inference.use_gpu.to_string(),
            "inference.steps" => self.inference.steps.to_string(),
            "inference.guidance_scale" => self.inference.guidance_scale.to_string(),
            "inference.width" => self.inference.width.to_string(),
            "inference.height" => self.inference.height.to_string(),
            "inference.attention_slice_size" => self.inference.attention_slice_size.to_string(),
            "loader.mode" => enum_str(&self.loader.mode)?,
            "loader.graft_base" => self.loader.graft_base.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }

    /// Update a dotted key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "models.storage_path" => self.models.storage_path = value.into(),
            "models.completeness" => self.models.completeness = parse_enum(value)?,
            "hub.endpoint" => self.hub.endpoint = value.trim_end_matches('/').to_string(),
            "hub.token" => {
                self.hub.token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "hub.show_progress" => self.hub.show_progress = value.parse()?,
            "inference.use_gpu" => self.inference.use_gpu = value.parse()?,
            "inference.steps" => self.inference.steps = value.parse()?,
            "inference.guidance_scale" => self.inference.guidance_scale = value.parse()?,
            "inference.width" => self.inference.width = value.parse()?,
            "inference.height" => self.inference.height = value.parse()?,
            "inference.attention_slice_size" => {
                self.inference.attention_slice_size = value.parse()?
            }
            "loader.mode" => self.loader.mode = parse_enum(value)?,
            "loader.graft_base" => self.loader.graft_base = RepoId::resolve(value)?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

fn enum_str<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| anyhow::anyhow!("Invalid value: {}", value))
}
