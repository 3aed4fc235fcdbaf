use log::debug;
use nalgebra::DVector;

use crate::run::RunError;
use crate::solvers::{CostModel, EvalKind};

/// Forward-difference gradient adapter around a [`CostModel`].
///
/// Each gradient costs exactly one probe evaluation per dimension, on top of
/// the base value `f0` the caller already paid for. With an expensive
/// simulator behind the model this dominates the run time, so the step
/// vector is chosen by the run driver from the normalized parameter ranges
/// rather than from machine epsilon.
#[derive(Debug, Clone)]
pub struct ForwardJacobian {
    steps: Vec<f64>,
}

impl ForwardJacobian {
    pub fn new(steps: Vec<f64>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    /// Gradient of the scalar objective at `x`, given its already-computed
    /// value `f0`: entry i is `(f(x + steps[i]*e_i) - f0) / steps[i]`.
    pub fn gradient(
        &self,
        model: &mut dyn CostModel,
        x: &[f64],
        f0: f64,
    ) -> Result<DVector<f64>, RunError> {
        let n = x.len();
        debug_assert_eq!(n, self.steps.len());

        let mut grad = DVector::zeros(n);
        let mut probe = x.to_vec();
        for i in 0..n {
            debug!("jacobian approximation [{} / {}]", i + 1, n);
            probe[i] = x[i] + self.steps[i];
            let fi = model.cost(&probe, EvalKind::JacobianProbe)?;
            grad[i] = (fi - f0) / self.steps[i];
            probe[i] = x[i];
        }
        Ok(grad)
    }
}
