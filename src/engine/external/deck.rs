use std::fs;
use std::path::PathBuf;
use std::process::Command;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::params::ValueFormat;
use crate::engine::simulator::{SimulationArtifacts, SimulationError, Simulator};

/// How many lines of simulator output to keep after a fatal marker.
const MARKER_CONTEXT_LINES: usize = 12;

/// A fatal pattern in the simulator's text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub pattern: String,
    pub description: String,
}

/// External simulator invocation settings (serde-loaded with the run
/// configuration). All filenames are relative to `work_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Input deck rewritten before every run.
    pub deck_file: String,
    /// J(V) characteristic produced by the run.
    pub curve_file: String,
    /// Leading data rows of the curve file to discard.
    #[serde(default = "default_header_skip")]
    pub header_skip: usize,
    /// Optional `Efficiency=<value>` key/value artifact.
    #[serde(default)]
    pub efficiency_file: Option<String>,
    /// Captured simulator output, scanned for error markers.
    pub output_file: String,
    #[serde(default)]
    pub error_markers: Vec<ErrorMarker>,
}

fn default_header_skip() -> usize {
    4
}

/// File-based simulator wrapper: substitutes parameter assignments into the
/// input deck, launches the external command, and scans its captured output
/// for fatal markers.
pub struct DeckSimulator {
    config: DeckConfig,
    /// Parameter names with their deck-substitution rendering.
    params: Vec<(String, ValueFormat)>,
    efficiency_re: Regex,
}

impl DeckSimulator {
    pub fn new(config: DeckConfig, params: Vec<(String, ValueFormat)>) -> Self {
        Self {
            config,
            params,
            // anchored to line starts when scanning the artifact line by line
            efficiency_re: Regex::new(r"^Efficiency=\s*([0-9eE.+-]+)\s*$").unwrap(),
        }
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    /// Rewrite `set NAME=value` assignment lines for every optimized
    /// parameter. Comment lines are left untouched. The rendered value uses
    /// the parameter's short format so the deck matches the simulator's own
    /// floating representation.
    fn substitute_deck(&self, natural: &[f64]) -> Result<(), SimulationError> {
        let path = self.config.work_dir.join(&self.config.deck_file);
        let text = fs::read_to_string(&path)
            .map_err(|e| SimulationError::Deck(format!("{}: {}", path.display(), e)))?;

        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            let stripped = line.trim_start();
            let mut replaced = None;
            if !stripped.starts_with('#') {
                for (i, (name, format)) in self.params.iter().enumerate() {
                    let Some(rest) = stripped
                        .strip_prefix("set ")
                        .and_then(|r| r.strip_prefix(name.as_str()))
                    else {
                        continue;
                    };
                    // guard against parameter names that prefix one another
                    if rest.is_empty() || rest.starts_with('=') || rest.starts_with(char::is_whitespace) {
                        replaced = Some(format!("set {}={}", name, format.render(natural[i])));
                        break;
                    }
                }
            }
            out.push_str(replaced.as_deref().unwrap_or(line));
            out.push('\n');
        }

        fs::write(&path, out)
            .map_err(|e| SimulationError::Deck(format!("{}: {}", path.display(), e)))
    }

    /// Scan the captured output for the configured fatal markers; on a hit,
    /// keep the marker line plus a few following lines as the diagnostic.
    fn scan_for_markers(&self, output: &str) -> Option<String> {
        let mut diagnostic: Option<String> = None;
        let mut kept = 0usize;
        for line in output.lines() {
            if let Some(diag) = diagnostic.as_mut() {
                diag.push('\n');
                diag.push_str(line);
                kept += 1;
                if kept >= MARKER_CONTEXT_LINES {
                    break;
                }
                continue;
            }
            for marker in &self.config.error_markers {
                if line.contains(&marker.pattern) {
                    diagnostic = Some(format!("{}: {}", marker.description, line.trim()));
                    break;
                }
            }
        }
        diagnostic
    }

    /// Read and consume the simulator-reported efficiency artifact, if any.
    fn read_reported_efficiency(&self) -> Option<f64> {
        let name = self.config.efficiency_file.as_ref()?;
        let path = self.config.work_dir.join(name);
        let text = fs::read_to_string(&path).ok()?;
        let mut value = None;
        for line in text.lines() {
            if let Some(cap) = self.efficiency_re.captures(line) {
                value = cap[1].parse::<f64>().ok();
            }
        }
        // consumed once read so a stale value never leaks into the next run
        if let Err(e) = fs::remove_file(&path) {
            warn!("could not remove {}: {}", path.display(), e);
        }
        value
    }
}

impl Simulator for DeckSimulator {
    fn name(&self) -> &str {
        &self.config.command
    }

    fn run(&mut self, natural: &[f64]) -> Result<SimulationArtifacts, SimulationError> {
        self.substitute_deck(natural)?;

        // stale artifacts must not satisfy this run
        let curve_path = self.config.work_dir.join(&self.config.curve_file);
        let output_path = self.config.work_dir.join(&self.config.output_file);
        let _ = fs::remove_file(&curve_path);
        let _ = fs::remove_file(&output_path);

        debug!("launching {} in {}", self.config.command, self.config.work_dir.display());
        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .current_dir(&self.config.work_dir)
            .output()
            .map_err(SimulationError::Launch)?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        if let Err(e) = fs::write(&output_path, &captured) {
            warn!("could not capture simulator output to {}: {}", output_path.display(), e);
        }

        if !output.status.success() {
            let tail: String = captured
                .lines()
                .rev()
                .take(MARKER_CONTEXT_LINES)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(SimulationError::Failed(format!(
                "exit status {}: {}",
                output.status, tail
            )));
        }

        if let Some(diagnostic) = self.scan_for_markers(&captured) {
            return Err(SimulationError::Marker(diagnostic));
        }

        Ok(SimulationArtifacts {
            curve_path,
            header_skip: self.config.header_skip,
            reported_efficiency: self.read_reported_efficiency(),
        })
    }
}
