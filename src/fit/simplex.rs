//! Derivative-free Nelder-Mead minimization.
//!
//! The search runs `argmin`'s `NelderMead` in unbounded coordinates; callers
//! map bounded parameters in and out (see `ParameterSlot::to_internal`).
//!
//! A run converges when the standard deviation of the simplex objective values
//! drops below `f_tolerance`. A simplex can collapse long before the optimum
//! on narrow valleys, so a converged run that still made progress is restarted
//! from its best vertex with a fresh simplex. Budgets (iterations, evaluations,
//! wall clock) are shared by every restart. Running out of budget is a normal
//! outcome and is reported through `Termination`, not as an error.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Error as ArgminError, Executor, KV, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use crate::domain::Termination;

/// Relative perturbation for the initial simplex.
const NONZERO_DELTA: f64 = 0.05;
/// Absolute perturbation for coordinates that start at zero.
const ZERO_DELTA: f64 = 0.00025;
/// Upper limit on fresh simplexes after the first converged run.
const MAX_RESTARTS: usize = 16;

/// Default evaluation budget for `dimension` free coordinates.
pub fn default_max_evaluations(dimension: usize) -> usize {
    2000 * (dimension + 1)
}

/// Budgets and tolerances for one minimization.
#[derive(Debug, Clone)]
pub struct NelderMeadOptions {
    /// Iteration cap over all restarts; `None` means the evaluation budget.
    pub max_iterations: Option<usize>,
    /// Objective evaluation cap; `None` means `default_max_evaluations`.
    pub max_evaluations: Option<usize>,
    /// Convergence threshold on the spread of simplex objective values, and
    /// the least improvement that triggers a restart.
    pub f_tolerance: f64,
    pub time_budget: Option<Duration>,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_evaluations: None,
            f_tolerance: 1e-8,
            time_budget: None,
        }
    }
}

/// Result of a minimization run.
#[derive(Debug, Clone)]
pub struct SimplexOutcome {
    /// Best point evaluated, the start point included.
    pub x: Vec<f64>,
    pub fx: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub restarts: usize,
    pub termination: Termination,
}

/// Minimize `objective` starting from `x0`.
///
/// A NaN objective counts as `+inf`, so points in infeasible regions are
/// rejected. The returned point is never worse than `x0`.
pub fn nelder_mead<F>(objective: F, x0: &[f64], opts: &NelderMeadOptions) -> SimplexOutcome
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let budget = Budgeted {
        objective: &objective,
        limit: opts
            .max_evaluations
            .unwrap_or_else(|| default_max_evaluations(n))
            .max(n + 2),
        calls: Cell::new(0),
        best: RefCell::new((x0.to_vec(), f64::INFINITY)),
    };
    let mut prev = budget.eval(x0).unwrap_or(f64::INFINITY);

    if n == 0 {
        return budget.outcome(0, 0, Termination::NoFreeParameters);
    }

    let max_iterations = opts.max_iterations.unwrap_or(budget.limit).max(1) as u64;
    let started = Instant::now();
    let mut iterations = 0u64;
    let mut restarts = 0usize;

    let termination = loop {
        if iterations >= max_iterations {
            break Termination::MaxIterations;
        }
        let timeout = match opts.time_budget {
            Some(total) => match total.checked_sub(started.elapsed()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => break Termination::TimeBudget,
            },
            None => None,
        };

        let start = budget.best.borrow().0.clone();
        let (run_iters, run_end) = run_once(&budget, &start, max_iterations - iterations, opts.f_tolerance, timeout);
        iterations += run_iters;
        if run_end != Termination::Converged {
            break run_end;
        }

        let now = budget.best_cost();
        if now <= 0.0 || prev - now <= opts.f_tolerance || restarts >= MAX_RESTARTS {
            break Termination::Converged;
        }
        debug!(restart = restarts + 1, from = prev, to = now, "simplex still improving, restarting");
        prev = now;
        restarts += 1;
    };

    budget.outcome(iterations as usize, restarts, termination)
}

/// One `argmin` run from `start`. Returns its iteration count and how it ended.
fn run_once<F>(
    budget: &Budgeted<'_, F>,
    start: &[f64],
    max_iters: u64,
    sd_tolerance: f64,
    timeout: Option<Duration>,
) -> (u64, Termination)
where
    F: Fn(&[f64]) -> f64,
{
    let solver = match NelderMead::new(initial_simplex(start)).with_sd_tolerance(sd_tolerance.max(0.0)) {
        Ok(solver) => solver,
        Err(err) => {
            debug!(error = %err, "rejected simplex tolerance");
            return (0, Termination::MaxIterations);
        }
    };

    let tap = IterationTap::default();
    let mut executor = Executor::new(budget, solver)
        .configure(|state| state.max_iters(max_iters).target_cost(0.0))
        .add_observer(tap.clone(), ObserverMode::Always);
    if let Some(left) = timeout {
        executor = executor.timeout(left);
    }

    match executor.run() {
        Ok(res) => {
            let state = res.state();
            (state.get_iter(), termination_of(state.get_termination_status()))
        }
        // The cost function only fails once the evaluation budget is spent.
        Err(err) => {
            debug!(error = %err, "simplex run aborted");
            let end = if budget.exhausted() {
                Termination::MaxEvaluations
            } else {
                Termination::MaxIterations
            };
            (tap.iterations(), end)
        }
    }
}

/// `x0` plus one vertex per coordinate, perturbed by 5% (or 0.00025 at zero).
fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(x0.len() + 1);
    vertices.push(x0.to_vec());
    for k in 0..x0.len() {
        let mut v = x0.to_vec();
        v[k] = if v[k] != 0.0 {
            (1.0 + NONZERO_DELTA) * v[k]
        } else {
            ZERO_DELTA
        };
        vertices.push(v);
    }
    vertices
}

fn termination_of(status: &TerminationStatus) -> Termination {
    match status {
        TerminationStatus::Terminated(TerminationReason::SolverConverged | TerminationReason::TargetCostReached) => {
            Termination::Converged
        }
        TerminationStatus::Terminated(TerminationReason::Timeout) => Termination::TimeBudget,
        _ => Termination::MaxIterations,
    }
}

/// Objective with an evaluation cap that remembers the best point it saw.
struct Budgeted<'a, F> {
    objective: &'a F,
    limit: usize,
    calls: Cell<usize>,
    best: RefCell<(Vec<f64>, f64)>,
}

impl<F: Fn(&[f64]) -> f64> Budgeted<'_, F> {
    fn eval(&self, x: &[f64]) -> Result<f64, ArgminError> {
        if self.exhausted() {
            return Err(ArgminError::msg(format!("evaluation budget of {} spent", self.limit)));
        }
        self.calls.set(self.calls.get() + 1);
        let v = (self.objective)(x);
        let v = if v.is_nan() { f64::INFINITY } else { v };
        let mut best = self.best.borrow_mut();
        if v < best.1 {
            *best = (x.to_vec(), v);
        }
        Ok(v)
    }

    fn exhausted(&self) -> bool {
        self.calls.get() >= self.limit
    }

    fn best_cost(&self) -> f64 {
        self.best.borrow().1
    }

    fn outcome(&self, iterations: usize, restarts: usize, termination: Termination) -> SimplexOutcome {
        let (x, fx) = self.best.borrow().clone();
        SimplexOutcome {
            x,
            fx,
            iterations,
            evaluations: self.calls.get(),
            restarts,
            termination,
        }
    }
}

impl<F: Fn(&[f64]) -> f64> CostFunction for &Budgeted<'_, F> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        self.eval(param)
    }
}

/// Records the iteration count of a run that ends in an error.
#[derive(Clone, Default)]
struct IterationTap(Arc<AtomicU64>);

impl IterationTap {
    fn iterations(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl<I: State> Observe<I> for IterationTap {
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), ArgminError> {
        self.0.store(state.get_iter(), Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rosenbrock(x: &[f64]) -> f64 {
        (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
    }

    #[test]
    fn minimizes_shifted_quadratic() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2) + 0.5;
        let out = nelder_mead(f, &[0.0, 0.0], &NelderMeadOptions::default());
        assert_eq!(out.termination, Termination::Converged);
        assert!((out.x[0] - 3.0).abs() < 1e-2);
        assert!((out.x[1] + 1.0).abs() < 1e-2);
        assert!((out.fx - 0.5).abs() < 1e-3);
    }

    #[test]
    fn minimizes_rosenbrock_with_default_budget() {
        let out = nelder_mead(rosenbrock, &[-1.2, 1.0], &NelderMeadOptions::default());
        assert_eq!(out.termination, Termination::Converged);
        assert!((out.x[0] - 1.0).abs() < 1e-3);
        assert!((out.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn default_budget_scales_with_dimension() {
        assert_eq!(default_max_evaluations(0), 2000);
        assert_eq!(default_max_evaluations(13), 28_000);
    }

    #[test]
    fn exhausted_budget_is_reported_not_raised() {
        let opts = NelderMeadOptions {
            max_evaluations: Some(10),
            f_tolerance: 0.0,
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(rosenbrock, &[-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::MaxEvaluations);
        assert!(!out.termination.is_success());
        assert_eq!(out.evaluations, 10);
        assert!(out.fx <= rosenbrock(&[-1.2, 1.0]));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let opts = NelderMeadOptions {
            max_iterations: Some(3),
            f_tolerance: 0.0,
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(rosenbrock, &[-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::MaxIterations);
        assert!(out.iterations <= 3);
    }

    #[test]
    fn zero_time_budget_stops_before_searching() {
        let opts = NelderMeadOptions {
            time_budget: Some(Duration::ZERO),
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(rosenbrock, &[-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::TimeBudget);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.x, vec![-1.2, 1.0]);
    }

    #[test]
    fn empty_dimension_evaluates_once() {
        let out = nelder_mead(|_| 7.0, &[], &NelderMeadOptions::default());
        assert_eq!(out.termination, Termination::NoFreeParameters);
        assert_eq!(out.evaluations, 1);
        assert_eq!(out.fx, 7.0);
    }

    #[test]
    fn nan_objective_is_treated_as_infeasible() {
        let f = |x: &[f64]| if x[0] < 0.0 { f64::NAN } else { (x[0] - 1.0).powi(2) };
        let out = nelder_mead(f, &[0.5], &NelderMeadOptions::default());
        assert!(out.fx.is_finite());
        assert!((out.x[0] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn initial_simplex_perturbs_one_coordinate_per_vertex() {
        let sim = initial_simplex(&[2.0, 0.0]);
        assert_eq!(sim, vec![vec![2.0, 0.0], vec![2.1, 0.0], vec![2.0, 0.00025]]);
    }

    #[test]
    fn collapsed_simplex_is_restarted() {
        // Narrow curved valley; a loose tolerance stops the first run early.
        let opts = NelderMeadOptions {
            f_tolerance: 1e-6,
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(rosenbrock, &[-1.2, 1.0], &opts);
        assert!(out.termination.is_success());
        assert!(out.fx < 1e-4, "fx = {}", out.fx);
    }
}
