use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::params::{validate_set, ConfigError, ParameterSpec};
use crate::core::window::DEFAULT_ALPHA;
use crate::engine::external::deck::DeckConfig;
use crate::solvers::MinimizerKind;

/// How the runner drives evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// One evaluation at the initial parameter vector.
    Snapshot,
    /// Bounded minimization from the initial vector.
    Iterative,
    /// Exhaustive sweep over the per-parameter sample grid.
    Grid,
}

impl RunMode {
    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Snapshot => "snapshot",
            RunMode::Iterative => "iterative",
            RunMode::Grid => "grid",
        }
    }
}

/// Boundary-discount window settings (iterative mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    pub enabled: bool,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: DEFAULT_ALPHA,
        }
    }
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

fn default_minimizer() -> MinimizerKind {
    MinimizerKind::BoundedBfgs
}

fn default_max_iter() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-3
}

fn default_optim_points() -> usize {
    51
}

fn default_cache_capacity() -> usize {
    crate::core::cache::DEFAULT_CAPACITY
}

/// Full description of one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub title: String,
    pub mode: RunMode,
    #[serde(default = "default_minimizer")]
    pub minimizer: MinimizerKind,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Resolution used to derive the per-parameter Jacobian step; raising it
    /// dramatically increases optimization time. Clamped to [11, 201].
    #[serde(default = "default_optim_points")]
    pub optim_points: usize,
    #[serde(default)]
    pub weight: WeightConfig,
    pub params: Vec<ParameterSpec>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Where the result log, sentinels and telemetry files live.
    pub output_dir: PathBuf,
    /// External simulator invocation; absent when the caller supplies its
    /// own [`crate::engine::simulator::Simulator`] implementation.
    #[serde(default)]
    pub deck: Option<DeckConfig>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_set(&self.params, self.mode == RunMode::Grid)?;
        if self.mode == RunMode::Iterative {
            if !(2..=1024).contains(&self.max_iter) {
                return Err(ConfigError::InvalidParameterSet(format!(
                    "max_iter {} outside [2, 1024]",
                    self.max_iter
                )));
            }
            if !(1e-6..=1.0).contains(&self.tolerance) {
                return Err(ConfigError::InvalidParameterSet(format!(
                    "tolerance {} outside [1e-6, 1]",
                    self.tolerance
                )));
            }
            if self.weight.enabled && !(self.weight.alpha > 0.0 && self.weight.alpha <= 1.0) {
                return Err(ConfigError::InvalidParameterSet(format!(
                    "weight alpha {} outside (0, 1]",
                    self.weight.alpha
                )));
            }
        }
        Ok(())
    }

    pub fn clamped_optim_points(&self) -> usize {
        self.optim_points.clamp(11, 201)
    }
}
