use serde::{Deserialize, Serialize};

// --- Constants ---
pub const DEFAULT_ALPHA: f64 = 0.20;

/// Minimum usable window length; anything shorter weighs everything 1.0.
const MIN_WINDOW_LEN: usize = 7;

/// Build a Tukey (tapered cosine) window: a flat top with cosine ramps over
/// the fraction `alpha` of each edge. `alpha` near 0 approaches a rectangular
/// window, near 1 a Hann window.
pub fn tukey(points: usize, alpha: f64) -> Vec<f64> {
    if points == 0 {
        return Vec::new();
    }
    if points == 1 || alpha <= 0.0 {
        return vec![1.0; points];
    }
    let alpha = alpha.min(1.0);
    let nm1 = (points - 1) as f64;
    let edge = (alpha * nm1 / 2.0).floor() as usize;

    (0..points)
        .map(|i| {
            let x = i as f64;
            if i <= edge {
                0.5 * (1.0 + (std::f64::consts::PI * (-1.0 + 2.0 * x / alpha / nm1)).cos())
            } else if i < points - edge - 1 {
                1.0
            } else {
                0.5 * (1.0
                    + (std::f64::consts::PI * (-2.0 / alpha + 1.0 + 2.0 * x / alpha / nm1)).cos())
            }
        })
        .collect()
}

/// Discounts objective values for candidates close to the parameter-domain
/// boundary. If the optimum sits near a bound, disable the window or enlarge
/// the domain instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightWindow {
    samples: Vec<f64>,
}

impl WeightWindow {
    pub fn new(points: usize, alpha: f64) -> Self {
        Self {
            samples: tukey(points, alpha),
        }
    }

    /// An empty window weighs everything 1.0 (weighting disabled).
    pub fn disabled() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.samples.len() >= MIN_WINDOW_LEN
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Weight of a normalized parameter value within its normalized bounds:
    /// 0 outside the bounds, the proportional window sample inside, 1.0 when
    /// the window is disabled or degenerate.
    pub fn weight(&self, bounds: (f64, f64), normalized: f64) -> f64 {
        if !self.is_enabled() {
            return 1.0;
        }
        let (lo, hi) = bounds;
        if hi <= lo || normalized < lo || normalized > hi {
            return 0.0;
        }
        let len = self.samples.len();
        let idx = (((normalized - lo) * len as f64) / (hi - lo)) as usize;
        self.samples[idx.min(len - 1)]
    }

    /// Aggregate penalty factor for a candidate point: sum(x_i^2 * w_i^2) /
    /// sum(x_i^2) over all normalized coordinates, in [0, 1].
    pub fn penalty(&self, bounds: &[(f64, f64)], normalized: &[f64]) -> f64 {
        if !self.is_enabled() {
            return 1.0;
        }
        let mut num = 0.0;
        let mut den = 0.0;
        for (&x, &b) in normalized.iter().zip(bounds.iter()) {
            let x2 = x * x;
            let w = self.weight(b, x);
            den += x2;
            num += x2 * w * w;
        }
        if den > 0.0 {
            num / den
        } else {
            1.0
        }
    }
}
