use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::run::RunError;
use crate::solvers::{
    clamp_to_bounds, CostModel, EvalKind, ForwardJacobian, MinimizeReport, Minimizer,
};

/// Bounded quasi-Newton minimizer with a dense inverse-Hessian update.
///
/// Bound handling distinguishes it from the plain descent strategy: the
/// convergence test uses the *projected* gradient, whose components vanish
/// when a coordinate is pinned against an active bound, so a minimum on the
/// boundary is still recognized. Steps are clamped into the box and the
/// curvature pair (s, y) is taken from the clamped step.
pub struct BoundedBfgs {
    pub armijo_c: f64,
    pub backtrack_factor: f64,
    pub max_backtracks: usize,
}

impl Default for BoundedBfgs {
    fn default() -> Self {
        Self {
            armijo_c: 1e-4,
            backtrack_factor: 0.5,
            max_backtracks: 12,
        }
    }
}

impl BoundedBfgs {
    /// Gradient with active-bound components zeroed: descending further into
    /// a bound the iterate already sits on is not a feasible direction.
    fn projected_gradient(x: &[f64], grad: &DVector<f64>, bounds: &[(f64, f64)]) -> DVector<f64> {
        let mut pg = grad.clone();
        for i in 0..x.len() {
            let (lo, hi) = bounds[i];
            let at_lower = x[i] <= lo && grad[i] > 0.0;
            let at_upper = x[i] >= hi && grad[i] < 0.0;
            if at_lower || at_upper {
                pg[i] = 0.0;
            }
        }
        pg
    }
}

impl Minimizer for BoundedBfgs {
    fn name(&self) -> &'static str {
        "bounded-bfgs"
    }

    fn minimize(
        &self,
        model: &mut dyn CostModel,
        jacobian: &ForwardJacobian,
        x0: &[f64],
        bounds: &[(f64, f64)],
        tolerance: f64,
        max_iter: usize,
    ) -> Result<MinimizeReport, RunError> {
        let n = x0.len();
        let mut x = x0.to_vec();
        clamp_to_bounds(&mut x, bounds);

        let mut cost = model.cost(&x, EvalKind::Direct)?;
        let mut grad = jacobian.gradient(model, &x, cost)?;
        let mut h_inv = DMatrix::<f64>::identity(n, n);

        for iter in 1..=max_iter {
            let pg = Self::projected_gradient(&x, &grad, bounds);
            if pg.norm() < tolerance {
                return Ok(MinimizeReport {
                    x,
                    cost,
                    iterations: iter,
                    converged: true,
                    message: "projected gradient below tolerance".into(),
                });
            }

            let mut direction = -(&h_inv * &grad);
            if direction.dot(&grad) >= 0.0 {
                // curvature estimate went bad; restart from steepest descent
                h_inv = DMatrix::identity(n, n);
                direction = -grad.clone();
            }

            let mut alpha = 1.0f64;
            let mut accepted = None;
            for _ in 0..self.max_backtracks {
                let mut trial: Vec<f64> = (0..n).map(|i| x[i] + alpha * direction[i]).collect();
                clamp_to_bounds(&mut trial, bounds);
                let trial_cost = model.cost(&trial, EvalKind::Direct)?;
                let slope: f64 = (0..n).map(|i| grad[i] * (trial[i] - x[i])).sum();
                if trial_cost <= cost + self.armijo_c * slope.min(0.0) && trial_cost < cost {
                    accepted = Some((trial, trial_cost));
                    break;
                }
                alpha *= self.backtrack_factor;
            }

            let Some((next, next_cost)) = accepted else {
                return Ok(MinimizeReport {
                    x,
                    cost,
                    iterations: iter,
                    converged: false,
                    message: "no acceptable step along quasi-Newton direction".into(),
                });
            };

            let next_grad = jacobian.gradient(model, &next, next_cost)?;
            let s = DVector::from_iterator(n, (0..n).map(|i| next[i] - x[i]));
            let y = &next_grad - &grad;
            let sy = s.dot(&y);
            if sy > 1e-12 {
                // standard BFGS inverse update
                let rho = 1.0 / sy;
                let identity = DMatrix::<f64>::identity(n, n);
                let left = &identity - rho * (&s * y.transpose());
                let right = &identity - rho * (&y * s.transpose());
                h_inv = &left * h_inv * &right + rho * (&s * s.transpose());
            }

            let change = cost - next_cost;
            x = next;
            cost = next_cost;
            grad = next_grad;
            debug!("bfgs iteration {}: cost {:.6e} (improved {:.3e})", iter, cost, change);
            if change.abs() < tolerance {
                return Ok(MinimizeReport {
                    x,
                    cost,
                    iterations: iter,
                    converged: true,
                    message: "cost change below tolerance".into(),
                });
            }
        }

        Ok(MinimizeReport {
            x,
            cost,
            iterations: max_iter,
            converged: false,
            message: "maximum iterations reached".into(),
        })
    }
}
