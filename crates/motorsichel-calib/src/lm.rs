use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// A residual function of a flat parameter vector.
pub(crate) trait ResidualModel {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Central-difference Jacobian. Models with structure may override.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let r0 = self.residuals(params);
        let mut jac = DMatrix::zeros(r0.len(), params.len());
        let mut x = params.clone();
        for j in 0..params.len() {
            let h = 1e-6 * params[j].abs().max(1.0);
            x[j] = params[j] + h;
            let plus = self.residuals(&x);
            x[j] = params[j] - h;
            let minus = self.residuals(&x);
            x[j] = params[j];
            jac.set_column(j, &((plus - minus) / (2.0 * h)));
        }
        jac
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Evaluation budget as a multiple of `(parameters + 1)`.
    pub patience: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            patience: 100,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SolveReport {
    pub evaluations: usize,
    /// Half the squared residual norm at the solution.
    pub cost: f64,
    pub converged: bool,
}

struct LmWrapper<'a, M: ResidualModel> {
    model: &'a M,
    params: DVector<f64>,
}

impl<M: ResidualModel> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, M> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.model.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.model.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

pub(crate) fn minimize<M: ResidualModel>(
    model: &M,
    x0: DVector<f64>,
    opts: &SolveOptions,
) -> (DVector<f64>, SolveReport) {
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.patience.max(1));
    let (wrapper, report) = lm.minimize(LmWrapper { model, params: x0 });
    (
        wrapper.params,
        SolveReport {
            evaluations: report.number_of_evaluations,
            cost: report.objective_function,
            converged: report.termination.was_successful(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // r(x) = [x0 - 3, 10 (x1 - x0^2)]
    struct Rosenbrockish;

    impl ResidualModel for Rosenbrockish {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![p[0] - 3.0, 10.0 * (p[1] - p[0] * p[0])])
        }
    }

    #[test]
    fn numeric_jacobian_drives_solver_to_minimum() {
        let (x, report) = minimize(
            &Rosenbrockish,
            DVector::from_vec(vec![-1.0, 5.0]),
            &SolveOptions::default(),
        );
        assert!((x[0] - 3.0).abs() < 1e-6, "x0 = {}", x[0]);
        assert!((x[1] - 9.0).abs() < 1e-5, "x1 = {}", x[1]);
        assert!(report.cost < 1e-10);
        assert!(report.evaluations > 0);
    }
}
