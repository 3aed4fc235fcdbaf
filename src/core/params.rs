use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Constants ---

/// Maximum number of parameters handled by the iterative optimizer.
pub const MAX_PARAMS: usize = 20;
/// Maximum number of parameters handled by the brute-force sweep.
pub const MAX_GRID_PARAMS: usize = 5;
/// Maximum per-parameter sample count for brute-force sweeps.
pub const MAX_GRID_POINTS: usize = 1001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("parameter set not valid: {0}")]
    InvalidParameterSet(String),
}

/// Fixed-precision rendering of a parameter value.
///
/// Doping-like quantities are rendered in scientific notation, geometric
/// quantities in plain decimal. The rendered string is also the cache key
/// component for the parameter, so the precision bounds how finely two
/// candidate points are distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueFormat {
    Fixed(usize),
    Scientific(usize),
}

impl ValueFormat {
    pub fn render(&self, value: f64) -> String {
        match *self {
            ValueFormat::Fixed(prec) => format!("{:.*}", prec, value),
            ValueFormat::Scientific(prec) => format!("{:.*e}", prec, value),
        }
    }
}

/// One optimizable device parameter.
///
/// `divisor` scales the natural value into the optimizer's normalized space;
/// log-scale parameters (dopings spanning decades) are normalized through
/// log10 instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub unit: String,
    pub start: f64,
    pub end: f64,
    pub init: f64,
    pub divisor: f64,
    pub log_scale: bool,
    /// Sample count for brute-force sweeps. 1 pins the parameter at `init`.
    pub points: usize,
    /// Full-precision rendering, used for cache keys and result logs.
    pub format: ValueFormat,
    /// Short rendering, used when substituting values into the input deck.
    pub format_short: ValueFormat,
}

impl ParameterSpec {
    fn err(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidParameter {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidParameterSet("unnamed parameter".into()));
        }
        if !(self.start <= self.init && self.init <= self.end) {
            return Err(self.err(format!(
                "init {} outside [{}, {}]",
                self.init, self.start, self.end
            )));
        }
        if self.divisor <= 0.0 {
            return Err(self.err("normalization divisor must be positive"));
        }
        if self.log_scale {
            if self.start <= 0.0 {
                return Err(self.err("log-scale range must be strictly positive"));
            }
            if self.divisor == 1.0 {
                return Err(self.err("log-scale divisor of 1 has no normalizing effect"));
            }
        }
        if self.points < 1 || self.points > MAX_GRID_POINTS {
            return Err(self.err(format!(
                "sample count {} outside [1, {}]",
                self.points, MAX_GRID_POINTS
            )));
        }
        Ok(())
    }

    /// Natural physical value -> normalized optimizer coordinate.
    pub fn to_normalized(&self, natural: f64) -> Result<f64, ConfigError> {
        if self.log_scale {
            if self.divisor <= 0.0 {
                return Err(self.err("log-scale divisor must be positive"));
            }
            if natural <= 0.0 {
                return Err(self.err(format!("log-scale value {} must be positive", natural)));
            }
            Ok(natural.log10() / self.divisor.log10())
        } else {
            if self.divisor <= 0.0 {
                return Err(self.err("divisor must be positive"));
            }
            Ok(natural / self.divisor)
        }
    }

    /// Normalized optimizer coordinate -> natural physical value.
    pub fn to_natural(&self, normalized: f64) -> f64 {
        if self.log_scale {
            10f64.powf(normalized * self.divisor.log10())
        } else {
            normalized * self.divisor
        }
    }

    /// The parameter's [start, end] range mapped into normalized space.
    pub fn normalized_bounds(&self) -> Result<(f64, f64), ConfigError> {
        Ok((self.to_normalized(self.start)?, self.to_normalized(self.end)?))
    }

    pub fn normalized_init(&self) -> Result<f64, ConfigError> {
        self.to_normalized(self.init)
    }
}

/// Validate a full parameter set for the given run mode.
pub fn validate_set(specs: &[ParameterSpec], grid_mode: bool) -> Result<(), ConfigError> {
    if specs.is_empty() || specs.len() > MAX_PARAMS {
        return Err(ConfigError::InvalidParameterSet(format!(
            "parameter count {} outside [1, {}]",
            specs.len(),
            MAX_PARAMS
        )));
    }
    if grid_mode && specs.len() > MAX_GRID_PARAMS {
        return Err(ConfigError::InvalidParameterSet(format!(
            "brute-force sweeps are limited to {} parameters, got {}",
            MAX_GRID_PARAMS,
            specs.len()
        )));
    }
    for spec in specs {
        spec.validate()?;
    }
    Ok(())
}

/// Render a natural vector as the tab-joined cache/log key.
pub fn render_key(specs: &[ParameterSpec], natural: &[f64]) -> String {
    specs
        .iter()
        .zip(natural.iter())
        .map(|(s, &v)| s.format.render(v))
        .collect::<Vec<_>>()
        .join("\t")
}
