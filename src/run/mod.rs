use std::fs::{self, File};
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use thiserror::Error;

use crate::core::cache::EvalCache;
use crate::core::curve::{analyze, JvCurve, PvMetrics};
use crate::core::grid::{linspace_or_pin, sample_grid};
use crate::core::params::{render_key, ConfigError, ParameterSpec};
use crate::core::window::WeightWindow;
use crate::engine::simulator::Simulator;
use crate::solvers::{CostModel, EvalKind, ForwardJacobian, MinimizeReport};

pub mod config;

pub use config::{RunConfig, RunMode, WeightConfig};

// --- Output directory contract ---

/// Sentinel whose presence requests a cooperative stop; consumed by renaming.
pub const STOP_FILE: &str = "stop.txt";
const STOP_CONSUMED_FILE: &str = "_stop.txt";
/// Written once at finalization so external tooling can observe completion.
pub const STOPPED_FILE: &str = "stopped.txt";
/// Append-only per-evaluation record consumed by monitors/plotters.
pub const RESULT_LOG_FILE: &str = "optim_results.txt";
/// Per-evaluation duration statistics for external ETA estimation.
pub const DELAY_FILE: &str = "delay.txt";
const WINDOW_FILE: &str = "weight_window.txt";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("simulation failed: {0}")]
    Simulation(String),

    #[error("simulation artifact missing or unreadable: {0}")]
    MissingArtifact(String),

    /// Cooperative user stop. Not a failure: the run finalizes cleanly.
    #[error("stop requested")]
    Stopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e.to_string())
    }
}

/// Lifecycle of one run. Transitions happen only inside the [`Runner`];
/// `Finished` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    StopRequested,
    Finished,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
    Aborted,
}

/// Events emitted to an attached monitor channel.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateChanged(RunState),
    Evaluated {
        index: usize,
        natural: Vec<f64>,
        metrics: PvMetrics,
        objective: f64,
        duration_secs: f64,
    },
    NewBest {
        efficiency: f64,
        natural: Vec<f64>,
    },
    Finished(RunOutcome),
}

/// Running maxima over a run. Efficiency and its parameter vector move
/// together; |Jsc|, |Voc| and FF are tracked independently and need not
/// come from the best-efficiency point.
#[derive(Debug, Clone, Default)]
pub struct BestResult {
    pub efficiency: f64,
    pub params: Vec<f64>,
    pub jsc_abs: f64,
    pub voc_abs: f64,
    pub ff: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    /// User-visible evaluation index (jacobian probes excluded).
    pub iteration: usize,
    pub func_evals: usize,
    pub jac_evals: usize,
}

/// Per-evaluation duration statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timing {
    pub evals: usize,
    pub elapsed_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub mean_secs: f64,
}

impl Timing {
    fn update(&mut self, secs: f64) {
        self.evals += 1;
        self.elapsed_secs += secs;
        self.mean_secs = self.elapsed_secs / self.evals as f64;
        if self.min_secs == 0.0 || secs < self.min_secs {
            self.min_secs = secs;
        }
        if secs > self.max_secs {
            self.max_secs = secs;
        }
    }
}

/// Readable rendering of a duration in seconds.
fn print_time(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0} s", secs)
    } else if secs < 3600.0 {
        format!("{:.2} min", secs / 60.0)
    } else {
        format!("{:.2} h", secs / 3600.0)
    }
}

fn counter_width(max_count: usize) -> usize {
    match max_count {
        0..=99 => 2,
        100..=999 => 3,
        1000..=9999 => 4,
        _ => 7,
    }
}

/// The top-level run driver: maps optimizer candidates to natural values,
/// delegates to the simulator, turns curves into metrics, and keeps every
/// counter, log and sentinel honest while doing so. Strictly sequential;
/// one instance drives one run.
pub struct Runner<S: Simulator> {
    config: RunConfig,
    simulator: S,
    cache: EvalCache,
    window: WeightWindow,
    state: RunState,
    best: BestResult,
    counters: Counters,
    timing: Timing,
    /// Normalized [start, end] per parameter, fixed at prepare time.
    norm_bounds: Vec<(f64, f64)>,
    /// Per-parameter Jacobian step (iterative mode).
    steps: Vec<f64>,
    /// Tolerance after clamping below the smallest step (iterative mode).
    tolerance: f64,
    grid_total: usize,
    counter_width: usize,
    log_file: Option<File>,
    events: Option<Sender<RunEvent>>,
    last_report: Option<MinimizeReport>,
    finalized: bool,
}

impl<S: Simulator> Runner<S> {
    pub fn new(config: RunConfig, simulator: S) -> Self {
        let cache = EvalCache::new(config.cache_capacity);
        Self {
            config,
            simulator,
            cache,
            window: WeightWindow::disabled(),
            state: RunState::Idle,
            best: BestResult::default(),
            counters: Counters::default(),
            timing: Timing::default(),
            norm_bounds: Vec::new(),
            steps: Vec::new(),
            tolerance: 0.0,
            grid_total: 0,
            counter_width: 2,
            log_file: None,
            events: None,
            last_report: None,
            finalized: false,
        }
    }

    /// Attach a monitor channel. Sends are best-effort.
    pub fn set_events(&mut self, tx: Sender<RunEvent>) {
        self.events = Some(tx);
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn best(&self) -> &BestResult {
        &self.best
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn minimize_report(&self) -> Option<&MinimizeReport> {
        self.last_report.as_ref()
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: RunState) {
        self.state = state;
        self.emit(RunEvent::StateChanged(state));
    }

    fn out_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// Check for the stop sentinel; consume it (rename) when present.
    fn stop_requested(&self) -> bool {
        let stop = self.out_path(STOP_FILE);
        if stop.is_file() {
            if let Err(e) = fs::rename(&stop, self.out_path(STOP_CONSUMED_FILE)) {
                warn!("could not consume stop sentinel: {}", e);
            }
            return true;
        }
        false
    }

    /// Drive the configured mode to completion. Always finalizes, whatever
    /// the outcome; a user stop is reported as `Ok(Interrupted)`.
    pub fn run(&mut self) -> Result<RunOutcome, RunError> {
        if let Err(e) = self.prepare() {
            self.finalize(RunOutcome::Aborted);
            return Err(e);
        }
        let result = match self.config.mode {
            RunMode::Snapshot => self.drive_snapshot(),
            RunMode::Iterative => self.drive_iterative(),
            RunMode::Grid => self.drive_grid(),
        };
        match result {
            Ok(()) => {
                self.finalize(RunOutcome::Completed);
                Ok(RunOutcome::Completed)
            }
            Err(RunError::Stopped) => {
                self.finalize(RunOutcome::Interrupted);
                Ok(RunOutcome::Interrupted)
            }
            Err(e) => {
                self.finalize(RunOutcome::Aborted);
                Err(e)
            }
        }
    }

    /// Validate the configuration, reset all per-run state, derive the
    /// normalized bounds and Jacobian steps, and open the result log.
    fn prepare(&mut self) -> Result<(), RunError> {
        if self.state != RunState::Idle {
            return Err(RunError::Config("run already started".into()));
        }
        self.config.validate()?;
        self.set_state(RunState::Preparing);

        self.best = BestResult::default();
        self.counters = Counters::default();
        self.timing = Timing::default();
        self.cache.clear();
        self.last_report = None;
        self.tolerance = self.config.tolerance;

        fs::create_dir_all(&self.config.output_dir)?;
        // a stale sentinel from a previous run must not stop this one
        let _ = self.stop_requested();
        let _ = fs::remove_file(self.out_path(STOPPED_FILE));

        self.norm_bounds = self
            .config
            .params
            .iter()
            .map(|s| s.normalized_bounds())
            .collect::<Result<_, _>>()?;

        if self.config.mode == RunMode::Iterative {
            let optim_points = self.config.clamped_optim_points();
            self.counter_width = counter_width(2 * optim_points);

            self.steps.clear();
            let mut range_min = f64::INFINITY;
            for &(ns, ne) in &self.norm_bounds {
                let range = ne - ns;
                range_min = range_min.min(range);
                let step = range / (optim_points - 1) as f64;
                // tolerance must stay below the smallest probing step
                if step <= self.tolerance {
                    self.tolerance = 0.2 * step;
                }
                self.steps.push(step);
            }
            if range_min < 1e-9 {
                return Err(RunError::Config(
                    "a normalized parameter range is empty or inverted".into(),
                ));
            }
            let eps = range_min / (optim_points - 1) as f64;
            if eps <= self.tolerance {
                self.tolerance = 0.2 * eps;
            }

            if self.config.weight.enabled {
                self.window = WeightWindow::new(2 * optim_points, self.config.weight.alpha);
                self.dump_window();
            } else {
                self.window = WeightWindow::disabled();
            }
        } else {
            self.window = WeightWindow::disabled();
            self.counter_width = counter_width(2);
        }

        self.open_result_log()?;
        self.set_state(RunState::Running);
        info!(
            "{}: {} run started ({} parameters, simulator '{}')",
            self.config.title,
            self.config.mode.label(),
            self.config.params.len(),
            self.simulator.name()
        );
        Ok(())
    }

    fn dump_window(&self) {
        if !self.window.is_enabled() {
            return;
        }
        let mut text = format!("# {}\n# Parameter weight window (tapered cosine)\n", self.config.title);
        for (i, w) in self.window.samples().iter().enumerate() {
            text.push_str(&format!("{}\t{:.6}\n", i, w));
        }
        if let Err(e) = fs::write(self.out_path(WINDOW_FILE), text) {
            warn!("could not write weight window: {}", e);
        }
    }

    fn open_result_log(&mut self) -> Result<(), RunError> {
        let mut file = File::create(self.out_path(RESULT_LOG_FILE))?;
        let specs = &self.config.params;
        let started = Local::now().format("%Y-%m-%d %H:%M:%S");

        let render_row = |pick: &dyn Fn(&ParameterSpec) -> String| -> String {
            specs.iter().map(|s| pick(s)).collect::<Vec<_>>().join("\t")
        };

        writeln!(file, "# ---------------------------------------------------------------")?;
        writeln!(file, "# {}", self.config.title)?;
        match self.config.mode {
            RunMode::Iterative => {
                let minimizer = self.config.minimizer.build();
                writeln!(
                    file,
                    "# Optimization ({} {}) started @ {}",
                    self.config.mode.label(),
                    minimizer.name(),
                    started
                )?;
                let steps = self
                    .steps
                    .iter()
                    .map(|s| format!("{:.5}", s))
                    .collect::<Vec<_>>()
                    .join("  ");
                writeln!(
                    file,
                    "# With tolerance = {:e} and steps = [ {} ]{}",
                    self.tolerance,
                    steps,
                    if self.window.is_enabled() { " weighted" } else { "" }
                )?;
            }
            _ => {
                writeln!(
                    file,
                    "# Optimization ({}) started @ {}",
                    self.config.mode.label(),
                    started
                )?;
            }
        }
        writeln!(file, "# Parameter:\t{}", render_row(&|s| s.name.clone()))?;
        writeln!(file, "# StartValue:\t{}", render_row(&|s| s.format.render(s.start)))?;
        writeln!(file, "# EndValue:  \t{}", render_row(&|s| s.format.render(s.end)))?;
        writeln!(file, "# InitValue: \t{}", render_row(&|s| s.format.render(s.init)))?;
        writeln!(file, "# NormValue: \t{}", render_row(&|s| s.format.render(s.divisor)))?;
        if self.config.mode == RunMode::Grid {
            writeln!(file, "# Points:    \t{}", render_row(&|s| s.points.to_string()))?;
        }
        writeln!(file, "# ---------------------------------------------------------------")?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(&mut file);
        let mut header = vec!["Index".to_string(), "Time".to_string()];
        header.extend(specs.iter().map(|s| s.name.clone()));
        header.extend(
            ["Jm(mA/cm2)", "Vm(V)", "FF(%)", "Jsc(mA/cm2)", "Voc(V)", "Efficiency"]
                .iter()
                .map(|s| s.to_string()),
        );
        writer
            .write_record(&header)
            .map_err(|e| RunError::Config(format!("result log header: {}", e)))?;
        writer
            .flush()
            .map_err(RunError::Io)?;
        drop(writer);

        self.log_file = Some(file);
        Ok(())
    }

    fn write_result_row(&mut self, natural: &[f64], metrics: &PvMetrics) {
        let Some(file) = self.log_file.as_mut() else {
            return;
        };
        let mut record = vec![
            format!("{:0w$}", self.counters.iteration, w = self.counter_width),
            Local::now().format("%Y%m%d-%H%M%S").to_string(),
        ];
        record.extend(
            self.config
                .params
                .iter()
                .zip(natural.iter())
                .map(|(s, &v)| s.format.render(v)),
        );
        record.extend([
            format!("{:08.5}", metrics.jm.abs()),
            format!("{:08.5}", metrics.vm),
            format!("{:08.5}", metrics.ff),
            format!("{:08.5}", metrics.jsc),
            format!("{:08.5}", metrics.voc),
            format!("{:08.5}", metrics.efficiency),
        ]);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(&mut *file);
        if writer.write_record(&record).and_then(|_| writer.flush().map_err(Into::into)).is_err() {
            warn!("could not append to result log");
        }
    }

    fn write_delay_file(&self) {
        let t = self.timing;
        let text = format!(
            "DelayMin = {:.1}\nDelayMax = {:.1}\nDelayMean = {:.1}\n",
            t.min_secs, t.max_secs, t.mean_secs
        );
        if let Err(e) = fs::write(self.out_path(DELAY_FILE), text) {
            debug!("could not write delay file: {}", e);
        }
    }

    /// One full evaluation of a normalized candidate vector. The heart of
    /// every mode; see the state checks and accounting inline.
    pub fn evaluate(&mut self, normalized: &[f64], kind: EvalKind) -> Result<f64, RunError> {
        if self.state != RunState::Running {
            return Err(RunError::Config(format!(
                "evaluate called in state {:?}",
                self.state
            )));
        }
        if self.stop_requested() {
            self.set_state(RunState::StopRequested);
            return Err(RunError::Stopped);
        }
        if normalized.len() != self.config.params.len() {
            return Err(RunError::Config(format!(
                "candidate dimension {} does not match parameter count {}",
                normalized.len(),
                self.config.params.len()
            )));
        }

        let natural: Vec<f64> = self
            .config
            .params
            .iter()
            .zip(normalized.iter())
            .map(|(s, &x)| s.to_natural(x))
            .collect();

        let key = render_key(&self.config.params, &natural);
        if let Some(cached) = self.cache.lookup(&key) {
            debug!("cache hit for [{}]", key.replace('\t', "  "));
            return Ok(cached);
        }

        let tic = Instant::now();
        let artifacts = self
            .simulator
            .run(&natural)
            .map_err(|e| RunError::Simulation(e.to_string()))?;

        let curve = JvCurve::from_file(&artifacts.curve_path, artifacts.header_skip)
            .map_err(|_| RunError::MissingArtifact(artifacts.curve_path.display().to_string()))?;
        let metrics = analyze(&curve);

        // the weight penalty only shapes the minimized objective; best-result
        // tracking always sees the raw efficiency
        let mut output = metrics.efficiency;
        if self.config.mode == RunMode::Iterative && self.window.is_enabled() {
            output *= self.window.penalty(&self.norm_bounds, normalized);
        }

        if metrics.efficiency > self.best.efficiency {
            self.best.efficiency = metrics.efficiency;
            self.best.params = natural.clone();
            self.emit(RunEvent::NewBest {
                efficiency: metrics.efficiency,
                natural: natural.clone(),
            });
        }
        self.best.jsc_abs = self.best.jsc_abs.max(metrics.jsc.abs());
        self.best.voc_abs = self.best.voc_abs.max(metrics.voc.abs());
        self.best.ff = self.best.ff.max(metrics.ff);

        let duration = tic.elapsed().as_secs_f64();
        self.timing.update(duration);
        self.write_delay_file();

        let objective = match self.config.mode {
            RunMode::Snapshot => output,
            RunMode::Iterative | RunMode::Grid => 1.0 - output / 100.0,
        };

        match kind {
            EvalKind::Direct => {
                self.counters.iteration += 1;
                self.counters.func_evals += 1;
                self.write_result_row(&natural, &metrics);

                let reported = artifacts
                    .reported_efficiency
                    .map(|e| format!(" (simulator: {:.5} %)", e))
                    .unwrap_or_default();
                info!(
                    "[{:0w$}] efficiency {:.5} %{} | FF {:.3} % Jsc {:.5} mA/cm2 Voc {:.5} V | best {:.5} % | {} (mean {})",
                    self.counters.iteration,
                    metrics.efficiency,
                    reported,
                    metrics.ff,
                    metrics.jsc,
                    metrics.voc,
                    self.best.efficiency,
                    print_time(duration),
                    print_time(self.timing.mean_secs),
                    w = self.counter_width
                );
                if self.config.mode == RunMode::Grid && self.grid_total > self.counters.func_evals {
                    let remaining =
                        self.grid_total as f64 * self.timing.mean_secs - self.timing.elapsed_secs;
                    info!("estimated remaining time: {}", print_time(remaining.max(0.0)));
                }

                self.emit(RunEvent::Evaluated {
                    index: self.counters.iteration,
                    natural: natural.clone(),
                    metrics,
                    objective,
                    duration_secs: duration,
                });
            }
            EvalKind::JacobianProbe => {
                self.counters.jac_evals += 1;
            }
        }

        self.cache.record(key, objective);
        Ok(objective)
    }

    fn drive_snapshot(&mut self) -> Result<(), RunError> {
        let x0 = self.initial_normalized()?;
        self.evaluate(&x0, EvalKind::Direct)?;
        Ok(())
    }

    fn drive_iterative(&mut self) -> Result<(), RunError> {
        let x0 = self.initial_normalized()?;
        let bounds = self.norm_bounds.clone();
        let jacobian = ForwardJacobian::new(self.steps.clone());
        let minimizer = self.config.minimizer.build();
        let tolerance = self.tolerance;
        let max_iter = self.config.max_iter;

        let report = minimizer.minimize(self, &jacobian, &x0, &bounds, tolerance, max_iter)?;
        info!(
            "{} finished after {} iterations: {} (converged: {}, cost {:.6e})",
            minimizer.name(),
            report.iterations,
            report.message,
            report.converged,
            report.cost
        );
        let natural_best: Vec<String> = self
            .config
            .params
            .iter()
            .zip(report.x.iter())
            .map(|(s, &x)| s.format.render(s.to_natural(x)))
            .collect();
        info!("minimizer endpoint (natural): [{}]", natural_best.join("  "));
        self.last_report = Some(report);
        Ok(())
    }

    fn drive_grid(&mut self) -> Result<(), RunError> {
        let mut per_param = Vec::with_capacity(self.config.params.len());
        for (spec, &(ns, ne)) in self.config.params.iter().zip(self.norm_bounds.iter()) {
            let ni = spec.normalized_init()?;
            per_param.push(linspace_or_pin(ns, ne, ni, spec.points));
        }
        let rows = sample_grid(&per_param);
        self.grid_total = rows.len();
        self.counter_width = counter_width((10 * rows.len() * per_param.len()).max(10));
        info!("grid sweep: {} evaluations", rows.len());

        for row in &rows {
            self.evaluate(row, EvalKind::Direct)?;
        }
        Ok(())
    }

    fn initial_normalized(&self) -> Result<Vec<f64>, RunError> {
        Ok(self
            .config
            .params
            .iter()
            .map(|s| s.normalized_init())
            .collect::<Result<_, _>>()?)
    }

    /// Terminal bookkeeping. Idempotent: only the first call logs the
    /// summary, stamps the result log and writes the stopped marker.
    pub fn finalize(&mut self, outcome: RunOutcome) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let ended = Local::now().format("%Y-%m-%d %H:%M:%S");
        match outcome {
            RunOutcome::Completed | RunOutcome::Interrupted => {
                if !self.best.params.is_empty() {
                    let rendered: Vec<String> = self
                        .config
                        .params
                        .iter()
                        .zip(self.best.params.iter())
                        .map(|(s, &v)| format!("{}={}", s.name, s.format.render(v)))
                        .collect();
                    info!(
                        "maximum efficiency {:.5} % with Jsc {:.5} mA/cm2, Voc {:.4} V, FF {:.3} % for [{}]",
                        self.best.efficiency,
                        self.best.jsc_abs,
                        self.best.voc_abs,
                        self.best.ff,
                        rendered.join("  ")
                    );
                }
                info!(
                    "total duration {} for {} evaluations ({} for the jacobian approximation)",
                    print_time(self.timing.elapsed_secs),
                    self.counters.func_evals + self.counters.jac_evals,
                    self.counters.jac_evals
                );
            }
            RunOutcome::Aborted => {
                warn!("run aborted after {} evaluations", self.counters.func_evals);
            }
        }

        if let Some(file) = self.log_file.as_mut() {
            let stamp = match outcome {
                RunOutcome::Completed => "ended",
                RunOutcome::Interrupted => "interrupted",
                RunOutcome::Aborted => "aborted",
            };
            let _ = writeln!(file, "# Optimization {} @ {}", stamp, ended);
            let _ = file.flush();
        }

        if let Err(e) = fs::write(
            self.out_path(STOPPED_FILE),
            format!("{}\n{:?}\n", self.config.title, outcome),
        ) {
            warn!("could not write stopped marker: {}", e);
        }

        self.emit(RunEvent::Finished(outcome));
        match outcome {
            RunOutcome::Aborted => self.set_state(RunState::Aborted),
            _ => self.set_state(RunState::Finished),
        }
    }
}

impl<S: Simulator> CostModel for Runner<S> {
    fn cost(&mut self, x: &[f64], kind: EvalKind) -> Result<f64, RunError> {
        self.evaluate(x, kind)
    }
}
