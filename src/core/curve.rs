use std::fs;
use std::io;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

// --- Constants ---

/// AM1.5 reference power density in mW/cm2 (the Atlas default AM1.5
/// spectrum integrates to 100.037 mW/cm2, not a round 100).
pub const REFERENCE_SOLAR_POWER: f64 = 100.037;

/// Minimum number of samples in the power-generating quadrant (V*J < 0)
/// for a curve to be usable.
pub const MIN_QUADRANT_POINTS: usize = 12;

/// Upsampling factor applied before metric extraction; also the margin kept
/// around the Pmax detector.
const UPSAMPLE: usize = 8;

const V_EPSILON: f64 = 1e-13;

/// A J(V) characteristic after voltage-monotonicity filtering.
///
/// `voltage` is strictly increasing; `power = |V*J|`. `quadrant_points`
/// counts retained samples with V*J < 0 and `voc_hint` remembers the voltage
/// preceding the first forward-polarization sample, used as a Voc fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JvCurve {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub power: Vec<f64>,
    pub quadrant_points: usize,
    pub voc_hint: f64,
}

/// Accredited performance metrics of one simulator run.
///
/// Units: Jsc/Jm in mA/cm2, Voc/Vm in V, Pmax in mW/cm2, FF and efficiency
/// in percent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PvMetrics {
    pub jsc: f64,
    pub voc: f64,
    pub jm: f64,
    pub vm: f64,
    pub pmax: f64,
    pub ff: f64,
    pub efficiency: f64,
    pub found_jsc: bool,
    pub found_voc: bool,
    pub found_pmax: bool,
}

impl PvMetrics {
    /// The degraded all-zero outcome for unusable curves.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.efficiency == 0.0
    }
}

impl JvCurve {
    /// Parse raw simulator rows (voltage, current), dropping `#` comment
    /// lines and the first `skip_rows` data rows (solver warm-up).
    ///
    /// Voltage must be strictly increasing to be retained: a sample that
    /// does not exceed the previously seen voltage replaces the remembered
    /// previous sample, and the first strictly-increasing pair contributes
    /// its *previous* sample so the first valid point is not lost. Reading
    /// stops once more than two consecutive forward-polarization samples
    /// (V > 0 and J > 0) have been seen. Malformed rows end the scan; the
    /// caller decides whether what was collected is enough.
    pub fn parse(text: &str, skip_rows: usize) -> Self {
        let mut voltage = Vec::new();
        let mut current = Vec::new();
        let mut power = Vec::new();

        let mut skipped = 0usize;
        let mut started = false;
        let mut first_pushed = false;
        let (mut prev_v, mut prev_j, mut prev_p) = (0.0f64, 0.0f64, 0.0f64);
        let mut quadrant_points = 0usize;
        let mut voc_hint = 0.0f64;
        let mut forward_count = 0usize;

        'lines: for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            if skipped < skip_rows {
                skipped += 1;
                continue;
            }
            let mut cols = line.split_whitespace();
            let (Some(col_v), Some(col_j)) = (cols.next(), cols.next()) else {
                continue;
            };
            let (mut v, j) = match (col_v.parse::<f64>(), col_j.parse::<f64>()) {
                (Ok(v), Ok(j)) => (v, j),
                _ => break 'lines,
            };
            let p = (v * j).abs();

            if !started {
                started = true;
                (prev_v, prev_j, prev_p) = (v, j, p);
                continue;
            }
            if v <= prev_v {
                (prev_v, prev_j, prev_p) = (v, j, p);
                continue;
            }
            if v.abs() < V_EPSILON {
                v = 0.0;
            }
            if !first_pushed {
                first_pushed = true;
                voltage.push(prev_v);
                current.push(prev_j);
                power.push(prev_p);
                continue;
            }

            voltage.push(v);
            current.push(j);
            power.push(p);

            if v > 0.0 && j > 0.0 {
                if forward_count == 0 {
                    voc_hint = prev_v;
                }
                forward_count += 1;
                if forward_count > 2 {
                    break;
                }
            }
            if v * j < 0.0 {
                quadrant_points += 1;
            }
            prev_v = v;
        }

        Self {
            voltage,
            current,
            power,
            quadrant_points,
            voc_hint,
        }
    }

    /// Read and parse a J(V) file. A missing or unreadable file is a hard
    /// error (the simulator produced nothing); content problems are not.
    pub fn from_file(path: &Path, skip_rows: usize) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text, skip_rows))
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}

/// Extract Jsc, Voc and the maximum power point from a filtered curve.
///
/// The curve is resampled 8x (current linearly, power with a cubic spline)
/// and scanned once left to right. Pmax uses a strict five-point local
/// maximum (two rises then two falls) to reject numerical jitter, and keeps
/// the first candidate found. A curve with fewer than
/// [`MIN_QUADRANT_POINTS`] power-quadrant samples yields the all-zero
/// degraded result.
pub fn analyze(curve: &JvCurve) -> PvMetrics {
    let n = curve.len();
    if curve.quadrant_points < MIN_QUADRANT_POINTS || n < 2 {
        warn!(
            "J-V curve has {} power-quadrant points of {} required; reporting zero metrics",
            curve.quadrant_points, MIN_QUADRANT_POINTS
        );
        return PvMetrics::zero();
    }

    // Resample onto a uniform grid, trimming overshoot past the last sample.
    let v0 = curve.voltage[0];
    let v_last = curve.voltage[n - 1];
    let target = n * UPSAMPLE;
    let dv = (v_last - v0) / (target - 1) as f64;
    let mut grid = Vec::with_capacity(target + 1);
    let mut i = 0usize;
    loop {
        let x = v0 + i as f64 * dv;
        if x >= v_last + dv {
            break;
        }
        grid.push(x);
        i += 1;
    }
    while grid.last().is_some_and(|&x| x > v_last) {
        grid.pop();
    }

    let j_up = interp_linear(&curve.voltage, &curve.current, &grid);
    let p_up = interp_cubic(&curve.voltage, &curve.power, &grid);
    let m = grid.len();

    let mut found_jsc = false;
    let mut found_voc = false;
    let mut found_pmax = false;
    let (mut jsc, mut voc, mut jm, mut vm, mut pmax) = (0.0, 0.0, 0.0, 0.0, 0.0);

    for i in 0..m - 1 {
        if !found_jsc {
            if grid[i] < 0.0 && grid[i + 1] > 0.0 {
                jsc = 0.5 * (j_up[i] + j_up[i + 1]);
                found_jsc = true;
            } else if grid[i] >= 0.0 && grid[i] <= dv {
                jsc = j_up[i];
                found_jsc = true;
            }
            if found_jsc && found_voc && found_pmax {
                break;
            }
        }
        if !found_voc {
            if j_up[i] < 0.0 && j_up[i + 1] > 0.0 {
                voc = 0.5 * (grid[i] + grid[i + 1]);
                found_voc = true;
            } else if j_up[i] < 0.0 && j_up[i + 1] >= 0.0 {
                voc = grid[i + 1];
                found_voc = true;
            }
            if found_jsc && found_voc && found_pmax {
                break;
            }
        }
        if !found_pmax && i >= UPSAMPLE && i + UPSAMPLE <= m {
            // Strict rise-rise-fall-fall around i; first hit wins.
            if p_up[i - 2] < p_up[i - 1]
                && p_up[i - 1] < p_up[i]
                && p_up[i] > p_up[i + 1]
                && p_up[i + 1] > p_up[i + 2]
            {
                jm = j_up[i];
                vm = grid[i];
                pmax = p_up[i];
                found_pmax = true;
                if found_jsc && found_voc {
                    break;
                }
            }
        }
        let forward = (grid[i] > 0.0 && j_up[i] > 0.0) || (grid[i] < 0.0 && j_up[i] < 0.0);
        if forward && found_pmax {
            break;
        }
    }

    if found_jsc {
        // Crossing-rule current is negative in the power quadrant.
        jsc = -jsc;
    } else if j_up[0] < 0.0 && grid[0] > 0.0 {
        // Sweep started past V=0: take the first sample.
        jsc = -j_up[0];
        found_jsc = true;
    }

    if !found_voc {
        if j_up[m - 1] < 0.0 && grid[m - 1] > 0.0 {
            voc = grid[m - 1];
            found_voc = true;
        } else if curve.voc_hint > 0.01 {
            voc = curve.voc_hint;
            found_voc = true;
        }
    }

    let mut ff = 0.0;
    let mut efficiency = 0.0;
    if found_jsc && found_voc && found_pmax {
        ff = 100.0 * pmax / (jsc * voc).abs();
        efficiency = 100.0 * pmax / REFERENCE_SOLAR_POWER;
    } else {
        warn!(
            "incomplete J-V extraction (Jsc {}, Voc {}, Pmax {}); increase the V-range or decrease the V-step",
            if found_jsc { "found" } else { "missing" },
            if found_voc { "found" } else { "missing" },
            if found_pmax { "found" } else { "missing" },
        );
    }
    if efficiency == 0.0 {
        jsc = 0.0;
        voc = 0.0;
        ff = 0.0;
    }

    PvMetrics {
        jsc,
        voc,
        jm,
        vm,
        pmax,
        ff,
        efficiency,
        found_jsc,
        found_voc,
        found_pmax,
    }
}

/// Piecewise-linear resampling of (xs, ys) at the given grid points.
/// xs must be strictly increasing; grid points are clamped to its range.
fn interp_linear(xs: &[f64], ys: &[f64], grid: &[f64]) -> Vec<f64> {
    grid.iter()
        .map(|&x| {
            let i = segment_index(xs, x);
            let h = xs[i + 1] - xs[i];
            let t = ((x - xs[i]) / h).clamp(0.0, 1.0);
            ys[i] + t * (ys[i + 1] - ys[i])
        })
        .collect()
}

/// Natural cubic-spline resampling of (xs, ys) at the given grid points.
/// Falls back to linear interpolation when there are too few samples.
fn interp_cubic(xs: &[f64], ys: &[f64], grid: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n < 3 {
        return interp_linear(xs, ys, grid);
    }

    // Second derivatives from the natural-spline tridiagonal system,
    // solved with the Thomas algorithm.
    let mut sub = vec![0.0f64; n];
    let mut diag = vec![0.0f64; n];
    let mut sup = vec![0.0f64; n];
    let mut rhs = vec![0.0f64; n];
    diag[0] = 1.0;
    diag[n - 1] = 1.0;
    for i in 1..n - 1 {
        let h0 = xs[i] - xs[i - 1];
        let h1 = xs[i + 1] - xs[i];
        sub[i] = h0;
        diag[i] = 2.0 * (h0 + h1);
        sup[i] = h1;
        rhs[i] = 6.0 * ((ys[i + 1] - ys[i]) / h1 - (ys[i] - ys[i - 1]) / h0);
    }
    for i in 1..n {
        let w = sub[i] / diag[i - 1];
        diag[i] -= w * sup[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    let mut d2 = vec![0.0f64; n];
    d2[n - 1] = rhs[n - 1] / diag[n - 1];
    for i in (0..n - 1).rev() {
        d2[i] = (rhs[i] - sup[i] * d2[i + 1]) / diag[i];
    }

    grid.iter()
        .map(|&x| {
            let i = segment_index(xs, x);
            let h = xs[i + 1] - xs[i];
            let a = (xs[i + 1] - x).clamp(0.0, h);
            let b = (x - xs[i]).clamp(0.0, h);
            (d2[i] * a * a * a + d2[i + 1] * b * b * b) / (6.0 * h)
                + (ys[i] / h - d2[i] * h / 6.0) * a
                + (ys[i + 1] / h - d2[i + 1] * h / 6.0) * b
        })
        .collect()
}

fn segment_index(xs: &[f64], x: f64) -> usize {
    let n = xs.len();
    match xs.partition_point(|&v| v <= x) {
        0 => 0,
        k if k >= n => n - 2,
        k => k - 1,
    }
}
