use log::debug;

use crate::run::RunError;
use crate::solvers::{
    clamp_to_bounds, CostModel, EvalKind, ForwardJacobian, MinimizeReport, Minimizer,
};

/// Projected steepest descent with Armijo backtracking.
///
/// Bound handling is projection only: every trial point is clamped into the
/// bounds box before evaluation. Convergence is declared on cost stagnation
/// between accepted iterates. Simple, but each iteration costs n probes for
/// the gradient plus a handful of line-search evaluations.
pub struct ArmijoDescent {
    pub initial_step: f64,
    pub armijo_c: f64,
    pub backtrack_factor: f64,
    pub max_backtracks: usize,
}

impl Default for ArmijoDescent {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            armijo_c: 1e-4,
            backtrack_factor: 0.5,
            max_backtracks: 10,
        }
    }
}

impl Minimizer for ArmijoDescent {
    fn name(&self) -> &'static str {
        "armijo-descent"
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
        let mut x = x0.to_vec();
        clamp_to_bounds(&mut x, bounds);
        let mut cost = model.cost(&x, EvalKind::Direct)?;

        for iter in 1..=max_iter {
            let grad = jacobian.gradient(model, &x, cost)?;
            let grad_norm_sq: f64 = grad.iter().map(|g| g * g).sum();
            if grad_norm_sq.sqrt() < tolerance {
                return Ok(MinimizeReport {
                    x,
                    cost,
                    iterations: iter,
                    converged: true,
                    message: "gradient norm below tolerance".into(),
                });
            }

            let mut alpha = self.initial_step;
            let mut accepted = None;
            for _ in 0..self.max_backtracks {
                let mut trial: Vec<f64> =
                    x.iter().zip(grad.iter()).map(|(xi, g)| xi - alpha * g).collect();
                clamp_to_bounds(&mut trial, bounds);
                let trial_cost = model.cost(&trial, EvalKind::Direct)?;
                if trial_cost <= cost - self.armijo_c * alpha * grad_norm_sq {
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
                    message: "line search stalled".into(),
                });
            };

            let change = cost - next_cost;
            x = next;
            cost = next_cost;
            debug!("descent iteration {}: cost {:.6e} (improved {:.3e})", iter, cost, change);
            if change.abs() < tolerance {
                return Ok(MinimizeReport {
                    x,
                    cost,
                    iterations: iter,
                    converged: true,
                    message: "cost stagnated below tolerance".into(),
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
