#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use pvexplore::core::params::{ParameterSpec, ValueFormat};
use pvexplore::engine::simulator::{SimulationArtifacts, SimulationError, Simulator};
use pvexplore::run::STOP_FILE;

/// Fresh per-test scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pvexplore_test_{}_{}", std::process::id(), tag));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

/// Synthetic single-diode J(V) characteristic in text form, including four
/// warm-up rows that the header skip discards. Currents are negative in the
/// power quadrant, matching the simulator convention.
pub fn ideal_diode_curve(jl: f64, j0: f64, vt: f64, v_min: f64, v_max: f64, dv: f64) -> String {
    let mut s = String::from("# synthetic J-V characteristic\n");
    for _ in 0..4 {
        s.push_str(&format!("{:.6} {:.6}\n", v_min - 0.05, 0.0));
    }
    let mut v = v_min;
    while v <= v_max + dv * 0.5 {
        let j = j0 * ((v / vt).exp() - 1.0) - jl;
        s.push_str(&format!("{:.6} {:.6}\n", v, j));
        v += dv;
    }
    s
}

/// The diode parameters used across the end-to-end tests.
pub const DIODE_JL: f64 = 30.0;
pub const DIODE_J0: f64 = 1e-9;
pub const DIODE_VT: f64 = 0.025;

pub fn standard_diode_curve() -> String {
    ideal_diode_curve(DIODE_JL, DIODE_J0, DIODE_VT, -0.1, 0.7, 0.005)
}

/// Stand-in for the external device simulator: writes a fixed curve file on
/// every run. Optionally drops the stop sentinel into a run directory after
/// a given number of invocations to exercise cooperative cancellation.
pub struct MockSimulator {
    pub dir: PathBuf,
    pub curve: String,
    pub runs: usize,
    pub stop_into: Option<(PathBuf, usize)>,
    /// When false, the curve file is not written (missing-artifact tests).
    pub produce_curve: bool,
}

impl MockSimulator {
    pub fn new(dir: PathBuf, curve: String) -> Self {
        Self {
            dir,
            curve,
            runs: 0,
            stop_into: None,
            produce_curve: true,
        }
    }
}

impl Simulator for MockSimulator {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&mut self, _natural: &[f64]) -> Result<SimulationArtifacts, SimulationError> {
        self.runs += 1;
        let path = self.dir.join("jv_curve.log");
        if self.produce_curve {
            fs::write(&path, &self.curve).map_err(|e| SimulationError::Failed(e.to_string()))?;
        } else {
            let _ = fs::remove_file(&path);
        }
        if let Some((stop_dir, after)) = &self.stop_into {
            if self.runs >= *after {
                let _ = fs::write(stop_dir.join(STOP_FILE), "stop\n");
            }
        }
        Ok(SimulationArtifacts {
            curve_path: path,
            header_skip: 4,
            reported_efficiency: None,
        })
    }
}

/// Simulator that always fails, for abort-path tests.
pub struct FailingSimulator;

impl Simulator for FailingSimulator {
    fn name(&self) -> &str {
        "failing"
    }

    fn run(&mut self, _natural: &[f64]) -> Result<SimulationArtifacts, SimulationError> {
        Err(SimulationError::Failed("synthetic failure".into()))
    }
}

pub fn linear_spec(name: &str, start: f64, end: f64, init: f64, points: usize) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        unit: String::new(),
        start,
        end,
        init,
        divisor: 1.0,
        log_scale: false,
        points,
        format: ValueFormat::Fixed(6),
        format_short: ValueFormat::Fixed(4),
    }
}
