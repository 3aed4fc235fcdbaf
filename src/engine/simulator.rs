use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Filesystem artifacts produced by one simulator run.
#[derive(Debug, Clone)]
pub struct SimulationArtifacts {
    /// The J(V) characteristic file (voltage/current rows).
    pub curve_path: PathBuf,
    /// Leading data rows of the curve file to discard (solver warm-up).
    pub header_skip: usize,
    /// Efficiency as computed by the simulator itself, when it reports one.
    /// Only used for cross-checking in logs; the analyzer's value is
    /// authoritative.
    pub reported_efficiency: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("failed to launch simulator: {0}")]
    Launch(#[source] io::Error),

    #[error("simulator exited with failure: {0}")]
    Failed(String),

    #[error("simulator reported an error: {0}")]
    Marker(String),

    #[error("input deck problem: {0}")]
    Deck(String),
}

/// A device simulator driven through the filesystem.
///
/// One call runs the external process synchronously for one natural
/// parameter vector and may block for minutes. Implementations own their
/// working directory and input-deck handling; the optimization core only
/// needs success/failure and the artifact paths.
pub trait Simulator {
    fn name(&self) -> &str;

    fn run(&mut self, natural: &[f64]) -> Result<SimulationArtifacts, SimulationError>;
}
