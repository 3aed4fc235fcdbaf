use std::fs;
use std::path::Path;

use crossbeam_channel::unbounded;

use pvexplore::core::curve::{analyze, JvCurve};
use pvexplore::core::params::ParameterSpec;
use pvexplore::run::{
    RunConfig, RunError, RunEvent, RunMode, RunOutcome, RunState, Runner, WeightConfig,
    RESULT_LOG_FILE, STOPPED_FILE, STOP_FILE,
};
use pvexplore::solvers::{EvalKind, MinimizerKind};

mod common;

use crate::common::{linear_spec, scratch_dir, standard_diode_curve, FailingSimulator, MockSimulator};

fn run_config(dir: &Path, mode: RunMode, params: Vec<ParameterSpec>) -> RunConfig {
    RunConfig {
        title: "Test PV cell".into(),
        mode,
        minimizer: MinimizerKind::BoundedBfgs,
        max_iter: 20,
        tolerance: 1e-3,
        optim_points: 51,
        weight: WeightConfig::default(),
        params,
        cache_capacity: 12,
        output_dir: dir.to_path_buf(),
        deck: None,
    }
}

#[test]
fn test_snapshot_run_end_to_end() {
    let dir = scratch_dir("snapshot");
    let curve = standard_diode_curve();
    let expected = analyze(&JvCurve::parse(&curve, 4));

    let config = run_config(&dir, RunMode::Snapshot, vec![linear_spec("Thick", 0.0, 1.0, 0.5, 1)]);
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), curve));
    let (tx, rx) = unbounded();
    runner.set_events(tx);

    let outcome = runner.run().expect("snapshot run failed");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(runner.state(), RunState::Finished);

    // exactly one simulator invocation and one logged evaluation
    assert_eq!(runner.simulator().runs, 1);
    let counters = runner.counters();
    assert_eq!(counters.func_evals, 1);
    assert_eq!(counters.iteration, 1);
    assert_eq!(counters.jac_evals, 0);

    // the extracted efficiency is deterministic and matches a direct parse
    assert!(expected.efficiency > 0.0);
    assert_eq!(runner.best().efficiency, expected.efficiency);
    assert_eq!(runner.best().params, vec![0.5]);

    // state sequence Idle -> Preparing -> Running -> Finished, once each
    let events: Vec<RunEvent> = rx.try_iter().collect();
    let states: Vec<RunState> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![RunState::Preparing, RunState::Running, RunState::Finished]
    );
    let finished: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Finished(_)))
        .collect();
    assert_eq!(finished.len(), 1);

    // result log: preamble, header row, one data row, end stamp
    let log = fs::read_to_string(dir.join(RESULT_LOG_FILE)).expect("result log missing");
    let data_rows: Vec<&str> = log
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with("Index"))
        .collect();
    assert_eq!(data_rows.len(), 1);
    let cols: Vec<&str> = data_rows[0].split('\t').collect();
    // Index, Time, 1 parameter, Jm, Vm, FF, Jsc, Voc, Efficiency
    assert_eq!(cols.len(), 9);
    assert!(log.contains("# Optimization ended @"));
    assert!(dir.join(STOPPED_FILE).is_file());
}

#[test]
fn test_grid_run_evaluates_every_row() {
    let dir = scratch_dir("grid");
    let config = run_config(
        &dir,
        RunMode::Grid,
        vec![
            linear_spec("A", 0.0, 1.0, 0.5, 3),
            linear_spec("B", 2.0, 4.0, 3.0, 2),
        ],
    );
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), standard_diode_curve()));

    let outcome = runner.run().expect("grid run failed");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(runner.simulator().runs, 6);
    assert_eq!(runner.counters().func_evals, 6);
    assert!(runner.best().efficiency > 0.0);
}

#[test]
fn test_grid_rejects_more_than_five_parameters() {
    let dir = scratch_dir("grid_too_wide");
    let params: Vec<_> = (0..6)
        .map(|i| linear_spec(&format!("p{}", i), 0.0, 1.0, 0.5, 2))
        .collect();
    let config = run_config(&dir, RunMode::Grid, params);
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), standard_diode_curve()));

    let err = runner.run().unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
    assert_eq!(runner.state(), RunState::Aborted);
    assert_eq!(runner.simulator().runs, 0);
}

#[test]
fn test_cache_folds_rows_with_identical_keys() {
    let dir = scratch_dir("grid_cache");
    // three grid samples all render to "0.000000" at the display precision
    let config = run_config(
        &dir,
        RunMode::Grid,
        vec![linear_spec("Tiny", 0.0, 1e-9, 0.0, 3)],
    );
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), standard_diode_curve()));

    let outcome = runner.run().expect("grid run failed");
    assert_eq!(outcome, RunOutcome::Completed);
    // one real evaluation; the other two rows hit the cache
    assert_eq!(runner.simulator().runs, 1);
    assert_eq!(runner.counters().func_evals, 1);
}

#[test]
fn test_stop_sentinel_interrupts_cleanly() {
    let dir = scratch_dir("stop");
    let config = run_config(&dir, RunMode::Grid, vec![linear_spec("A", 0.0, 1.0, 0.5, 6)]);
    let mut simulator = MockSimulator::new(dir.clone(), standard_diode_curve());
    simulator.stop_into = Some((dir.clone(), 1));
    let mut runner = Runner::new(config, simulator);

    let outcome = runner.run().expect("stopped run is not an error");
    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(runner.state(), RunState::Finished);
    assert_eq!(runner.counters().func_evals, 1);

    // the sentinel was consumed by renaming
    assert!(!dir.join(STOP_FILE).exists());
    assert!(dir.join("_stop.txt").is_file());
    assert!(dir.join(STOPPED_FILE).is_file());
}

#[test]
fn test_simulator_failure_aborts_run() {
    let dir = scratch_dir("sim_failure");
    let config = run_config(&dir, RunMode::Snapshot, vec![linear_spec("A", 0.0, 1.0, 0.5, 1)]);
    let mut runner = Runner::new(config, FailingSimulator);

    let err = runner.run().unwrap_err();
    assert!(matches!(err, RunError::Simulation(_)));
    assert_eq!(runner.state(), RunState::Aborted);
}

#[test]
fn test_missing_curve_artifact_aborts_run() {
    let dir = scratch_dir("missing_artifact");
    let config = run_config(&dir, RunMode::Snapshot, vec![linear_spec("A", 0.0, 1.0, 0.5, 1)]);
    let mut simulator = MockSimulator::new(dir.clone(), standard_diode_curve());
    simulator.produce_curve = false;
    let mut runner = Runner::new(config, simulator);

    let err = runner.run().unwrap_err();
    assert!(matches!(err, RunError::MissingArtifact(_)));
    assert_eq!(runner.state(), RunState::Aborted);
}

#[test]
fn test_evaluate_rejected_outside_running_state() {
    let dir = scratch_dir("eval_after_finish");
    let config = run_config(&dir, RunMode::Snapshot, vec![linear_spec("A", 0.0, 1.0, 0.5, 1)]);
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), standard_diode_curve()));
    runner.run().expect("snapshot run failed");

    let err = runner.evaluate(&[0.5], EvalKind::Direct).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
}

#[test]
fn test_iterative_run_drives_minimizer() {
    let dir = scratch_dir("iterative");
    let mut config = run_config(
        &dir,
        RunMode::Iterative,
        vec![linear_spec("A", 0.0, 1.0, 0.5, 1)],
    );
    config.max_iter = 3;
    let mut runner = Runner::new(config, MockSimulator::new(dir.clone(), standard_diode_curve()));

    // the mock returns the same curve everywhere, so the objective is flat
    // and the minimizer stops on stagnation almost immediately
    let outcome = runner.run().expect("iterative run failed");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(runner.state(), RunState::Finished);
    let counters = runner.counters();
    assert!(counters.func_evals >= 1);
    // the flat landscape still costs one jacobian probe per dimension
    assert!(counters.jac_evals >= 1);
    assert!(runner.minimize_report().is_some());
}
