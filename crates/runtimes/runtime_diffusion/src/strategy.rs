//! Ordered ways of constructing a pipeline.

use onestep_core::config::LoaderMode;
use onestep_core::RepoId;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Every component from a downloaded snapshot directory
    LocalDirectory(PathBuf),
    /// Every component straight from the hub
    HubRepository(RepoId),
    /// Denoising network from `unet_dir`, everything else from `base`
    UnetGraft { base: RepoId, unet_dir: PathBuf },
}

impl LoadStrategy {
    /// Strategies to try, in order, for one load request.
    pub fn plan(mode: LoaderMode, repo_id: &RepoId, local_path: &Path, graft_base: &RepoId) -> Vec<Self> {
        match mode {
            LoaderMode::Pipeline => vec![
                LoadStrategy::LocalDirectory(local_path.to_path_buf()),
                LoadStrategy::HubRepository(repo_id.clone()),
            ],
            LoaderMode::Graft => vec![LoadStrategy::UnetGraft {
                base: graft_base.clone(),
                unet_dir: local_path.to_path_buf(),
            }],
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::LocalDirectory(path) => write!(f, "local directory {}", path.display()),
            LoadStrategy::HubRepository(repo) => write!(f, "hub repository {}", repo),
            LoadStrategy::UnetGraft { base, unet_dir } => {
                write!(f, "UNet from {} on base {}", unet_dir.display(), base)
            }
        }
    }
}
