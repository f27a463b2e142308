pub mod program_terms;

use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
use mockall::automock;
use optimization_engine::{constraints, Optimizer, Problem, SolverError};
use optimization_engine::alm::{AlmCache, AlmFactory, AlmOptimizer, AlmProblem, NO_JACOBIAN_MAPPING, NO_MAPPING};
use optimization_engine::core::ExitStatus;
use optimization_engine::panoc::{PANOCCache, PANOCOptimizer};
use serde::{Deserialize, Serialize};
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::finite_difference::FiniteDifferenceUtils;

/// A scalar function of a handful of decision variables.
///
/// Terms only ever see their own variables: `local[i]` is the value of the global variable
/// `variable_indices()[i]`.  The default gradient is a central finite difference over those
/// local variables, so a term only needs an analytic gradient when it is cheap to write.
pub trait ProgramTerm: Send + Sync {
    fn variable_indices(&self) -> &[usize];
    fn evaluate(&self, local: &[f64]) -> f64;
    fn local_gradient(&self, local: &[f64]) -> Vec<f64> {
        let mut x = local.to_vec();
        FiniteDifferenceUtils::central_difference_gradient(|v: &[f64]| self.evaluate(v), &mut x, FiniteDifferenceUtils::DEFAULT_STEP)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    Dynamics { body_idx: usize },
    Goal { body_idx: usize },
    NonPenetration { pair_idx: usize },
    ContactDistance { pair_idx: usize },
    StickingVelocity { pair_idx: usize },
    SlidingDirection { pair_idx: usize },
    FrictionCone { pair_idx: usize },
    SlidingFriction { pair_idx: usize },
    ContactActivation { pair_idx: usize }
}

/// Where a constraint comes from, so residuals can be traced back to a knot and a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintTag {
    pub knot: usize,
    pub segment: usize,
    pub kind: ConstraintKind
}

#[derive(Clone)]
pub struct TaggedConstraint {
    tag: ConstraintTag,
    term: Arc<dyn ProgramTerm>
}
impl TaggedConstraint {
    pub fn tag(&self) -> &ConstraintTag {
        &self.tag
    }
    pub fn term(&self) -> &Arc<dyn ProgramTerm> {
        &self.term
    }
}

#[derive(Clone)]
struct WeightedCostTerm {
    weight: f64,
    term: Arc<dyn ProgramTerm>
}

/// Minimize a weighted sum of terms subject to `h(x) = 0`, `g(x) <= 0` and box bounds.
#[derive(Clone)]
pub struct NonlinearProgram {
    num_variables: usize,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    cost_terms: Vec<WeightedCostTerm>,
    equality_constraints: Vec<TaggedConstraint>,
    inequality_constraints: Vec<TaggedConstraint>
}
impl NonlinearProgram {
    pub fn new(num_variables: usize) -> Self {
        Self {
            num_variables,
            lower_bounds: vec![-f64::INFINITY; num_variables],
            upper_bounds: vec![f64::INFINITY; num_variables],
            cost_terms: vec![],
            equality_constraints: vec![],
            inequality_constraints: vec![]
        }
    }
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }
    pub fn set_bounds(&mut self, idx: usize, lower: f64, upper: f64) -> Result<(), PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(idx, self.num_variables, file!(), line!())?;
        if lower > upper {
            return Err(PlanningError::new_generic_error_str(&format!("lower bound {} is above upper bound {} for variable {}.", lower, upper, idx), file!(), line!()));
        }
        self.lower_bounds[idx] = lower;
        self.upper_bounds[idx] = upper;
        Ok(())
    }
    pub fn bounds(&self) -> (&[f64], &[f64]) {
        (&self.lower_bounds, &self.upper_bounds)
    }
    pub fn add_cost_term<T: ProgramTerm + 'static>(&mut self, weight: f64, term: T) -> Result<(), PlanningError> {
        self.check_term_indices(&term)?;
        self.cost_terms.push(WeightedCostTerm { weight, term: Arc::new(term) });
        Ok(())
    }
    pub fn add_equality_constraint(&mut self, tag: ConstraintTag, term: Arc<dyn ProgramTerm>) -> Result<(), PlanningError> {
        self.check_term_indices(&*term)?;
        self.equality_constraints.push(TaggedConstraint { tag, term });
        Ok(())
    }
    pub fn add_less_than_zero_inequality_constraint(&mut self, tag: ConstraintTag, term: Arc<dyn ProgramTerm>) -> Result<(), PlanningError> {
        self.check_term_indices(&*term)?;
        self.inequality_constraints.push(TaggedConstraint { tag, term });
        Ok(())
    }
    pub fn equality_constraints(&self) -> &Vec<TaggedConstraint> {
        &self.equality_constraints
    }
    pub fn inequality_constraints(&self) -> &Vec<TaggedConstraint> {
        &self.inequality_constraints
    }
    pub fn num_constraints(&self) -> usize {
        self.equality_constraints.len() + self.inequality_constraints.len()
    }
    pub fn has_constraints(&self) -> bool {
        self.num_constraints() > 0
    }
    pub fn cost(&self, x: &[f64]) -> f64 {
        self.cost_terms.iter().map(|c| c.weight * c.term.evaluate(&Self::gather(&*c.term, x))).sum()
    }
    pub fn cost_gradient(&self, x: &[f64], grad: &mut [f64]) {
        grad.iter_mut().for_each(|g| *g = 0.0);
        for c in &self.cost_terms {
            let local_grad = c.term.local_gradient(&Self::gather(&*c.term, x));
            for (idx, g) in c.term.variable_indices().iter().zip(local_grad.iter()) {
                grad[*idx] += c.weight * g;
            }
        }
    }
    pub fn num_equality_constraints(&self) -> usize {
        self.equality_constraints.len()
    }
    /// Stacked constraint values: every `h(x)`, then every `g(x)`.
    pub fn constraint_values(&self, x: &[f64], out: &mut [f64]) {
        for (i, c) in self.stacked_constraints().enumerate() {
            out[i] = c.term.evaluate(&Self::gather(&*c.term, x));
        }
    }
    /// Limits on the stacked values of `constraint_values`: `[0, 0]` for every equality and
    /// `(-inf, 0]` for every inequality.
    pub fn constraint_value_limits(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lower = vec![0.0; self.equality_constraints.len()];
        lower.extend(std::iter::repeat(-f64::INFINITY).take(self.inequality_constraints.len()));
        (lower, vec![0.0; self.num_constraints()])
    }
    /// `J(x)^T d` for the stacked values of `constraint_values`.
    pub fn constraint_jacobian_transpose_product(&self, x: &[f64], d: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        for (i, c) in self.stacked_constraints().enumerate() {
            if d[i] == 0.0 { continue; }
            let local_grad = c.term.local_gradient(&Self::gather(&*c.term, x));
            for (idx, g) in c.term.variable_indices().iter().zip(local_grad.iter()) { out[*idx] += d[i] * g; }
        }
    }
    /// Sparse gradient of every stacked constraint as `(variable, derivative)` entries.
    pub fn constraint_gradients(&self, x: &[f64]) -> Vec<Vec<(usize, f64)>> {
        self.stacked_constraints()
            .map(|c| {
                let local_grad = c.term.local_gradient(&Self::gather(&*c.term, x));
                c.term.variable_indices().iter().cloned().zip(local_grad.into_iter()).collect()
            })
            .collect()
    }
    /// Every constraint with its violation (`|h|` or `max(0, g)`).
    pub fn constraint_violations(&self, x: &[f64]) -> Vec<(ConstraintTag, f64)> {
        let mut out = vec![];
        for c in &self.equality_constraints {
            out.push((c.tag, c.term.evaluate(&Self::gather(&*c.term, x)).abs()));
        }
        for c in &self.inequality_constraints {
            let g = c.term.evaluate(&Self::gather(&*c.term, x));
            out.push((c.tag, if g.is_nan() { f64::INFINITY } else { g.max(0.0) }));
        }
        out
    }
    pub fn bound_violation(&self, x: &[f64]) -> f64 {
        let mut out: f64 = 0.0;
        for (i, v) in x.iter().enumerate() {
            out = out.max(self.lower_bounds[i] - v).max(v - self.upper_bounds[i]);
        }
        out
    }
    /// Infinity norm of all constraint and bound violations.  Non-finite values count as
    /// infinitely violated.
    pub fn residual(&self, x: &[f64]) -> f64 {
        let mut out = self.bound_violation(x);
        for (_, v) in self.constraint_violations(x) {
            if !v.is_finite() { return f64::INFINITY; }
            out = out.max(v);
        }
        out
    }
    pub fn residual_per_segment(&self, x: &[f64], num_segments: usize) -> Vec<f64> {
        let mut out = vec![0.0_f64; num_segments];
        for (tag, v) in self.constraint_violations(x) {
            if tag.segment < num_segments {
                let v = if v.is_finite() { v } else { f64::INFINITY };
                out[tag.segment] = out[tag.segment].max(v);
            }
        }
        out
    }
    pub fn project_onto_bounds(&self, x: &[f64]) -> Vec<f64> {
        x.iter().enumerate().map(|(i, v)| v.max(self.lower_bounds[i]).min(self.upper_bounds[i])).collect()
    }
    fn stacked_constraints(&self) -> impl Iterator<Item = &TaggedConstraint> {
        self.equality_constraints.iter().chain(self.inequality_constraints.iter())
    }
    fn gather(term: &dyn ProgramTerm, x: &[f64]) -> Vec<f64> {
        term.variable_indices().iter().map(|i| x[*i]).collect()
    }
    fn check_term_indices(&self, term: &dyn ProgramTerm) -> Result<(), PlanningError> {
        for idx in term.variable_indices() {
            PlanningError::new_check_for_idx_out_of_bound_error(*idx, self.num_variables, file!(), line!())?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Black-box numerical solver.  Implementations must be stateless between calls: the same
/// program, initial guess and parameters always give the same output.
#[cfg_attr(test, automock)]
pub trait NumericalSolver: Send + Sync {
    fn solve(&self, program: &NonlinearProgram, initial_guess: &[f64], parameters: &SolverParameters) -> Result<SolverOutput, PlanningError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverExitStatus {
    Converged,
    NotConvergedIterations,
    NotConvergedOutOfTime
}
impl SolverExitStatus {
    pub fn from_open_exit_status(e: ExitStatus) -> Self {
        match e {
            ExitStatus::Converged => { Self::Converged }
            ExitStatus::NotConvergedIterations => { Self::NotConvergedIterations }
            ExitStatus::NotConvergedOutOfTime => { Self::NotConvergedOutOfTime }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolverOutput {
    pub solution: Vec<f64>,
    pub exit_status: SolverExitStatus,
    pub num_outer_iterations: usize,
    pub num_inner_iterations: usize,
    pub solve_time: Duration,
    pub cost: f64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    pub max_iterations: usize,
    pub max_outer_iterations: usize,
    pub max_time: Option<Duration>,
    /// Inner (PANOC) optimality tolerance.
    pub tolerance: f64,
    /// A converged point whose residual is at most this is `Optimal`.
    pub constraint_tolerance: f64,
    /// A converged point whose residual is above this is `Infeasible`.
    pub infeasibility_threshold: f64,
    pub lbfgs_memory: usize,
    /// Penalty of the first augmented Lagrangian iteration.
    pub initial_penalty: f64,
    pub penalty_update_factor: f64,
    /// Constraints and the cost are scaled down so their gradients at the initial guess are at
    /// most this large (infinity norm).
    pub max_scaled_gradient: f64
}
impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            max_outer_iterations: 20,
            max_time: Some(Duration::from_secs(5)),
            tolerance: 1e-5,
            constraint_tolerance: 1e-4,
            infeasibility_threshold: 1e-2,
            lbfgs_memory: 5,
            initial_penalty: 100.0,
            penalty_update_factor: 2.0,
            max_scaled_gradient: 10.0
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolverResult {
    Optimal,
    SubOptimal(f64),
    Infeasible,
    SolverError(String)
}
impl SolverResult {
    /// Classifies a finished solve from its exit status and residuals.
    ///
    /// Converged runs are `Optimal` within `constraint_tolerance` and `Infeasible` above
    /// `infeasibility_threshold`.  Runs that hit their budget are `Infeasible` only if the
    /// residual did not go down from the initial guess.
    pub fn classify(exit_status: SolverExitStatus, initial_residual: f64, final_residual: f64, parameters: &SolverParameters) -> Self {
        if !final_residual.is_finite() { return Self::Infeasible; }
        return match exit_status {
            SolverExitStatus::Converged => {
                if final_residual <= parameters.constraint_tolerance { Self::Optimal }
                else if final_residual > parameters.infeasibility_threshold { Self::Infeasible }
                else { Self::SubOptimal(final_residual) }
            }
            _ => {
                if final_residual > parameters.constraint_tolerance && final_residual >= initial_residual { Self::Infeasible }
                else { Self::SubOptimal(final_residual) }
            }
        }
    }
    pub fn residual(&self) -> Option<f64> {
        match self {
            SolverResult::Optimal => { Some(0.0) }
            SolverResult::SubOptimal(r) => { Some(*r) }
            _ => { None }
        }
    }
    pub fn is_acceptable(&self, residual_tolerance: f64) -> bool {
        match self {
            SolverResult::Optimal => { true }
            SolverResult::SubOptimal(r) => { *r <= residual_tolerance }
            _ => { false }
        }
    }
    pub fn is_failure(&self) -> bool {
        matches!(self, SolverResult::Infeasible | SolverResult::SolverError(_))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// OpEn-backed solver.  Bound-only programs go straight to PANOC; programs with constraints
/// use the augmented Lagrangian method with the stacked constraint values as `F1` and the set
/// `C = {0}^n_eq x (-inf, 0]^n_in`.
///
/// Every constraint row, and the cost, is scaled once at the initial guess so that no gradient
/// exceeds `max_scaled_gradient`.  Near-feasible initial guesses also get least-squares
/// estimates of the Lagrange multipliers, so a warm start does not have to rediscover them.
#[derive(Clone, Debug, Default)]
pub struct OpEnNumericalSolver;
impl OpEnNumericalSolver {
    const MULTIPLIER_BOUND: f64 = 1e12;
    const MULTIPLIER_ITERATIONS: usize = 500;
    const ACTIVITY_TOLERANCE: f64 = 1e-6;

    pub fn new() -> Self {
        Self
    }
    fn optimize_panoc(&self, program: &NonlinearProgram, initial_guess: &[f64], parameters: &SolverParameters) -> Result<SolverOutput, PlanningError> {
        let mut panoc_cache = PANOCCache::new(program.num_variables(), parameters.tolerance, parameters.lbfgs_memory);

        let df = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            program.cost_gradient(u, grad);
            if grad.iter().all(|g| g.is_finite()) { Ok(()) } else { Err(SolverError::Cost) }
        };
        let f = |u: &[f64], cost: &mut f64| -> Result<(), SolverError> {
            *cost = program.cost(u);
            if cost.is_finite() { Ok(()) } else { Err(SolverError::Cost) }
        };

        let (lower_bounds, upper_bounds) = program.bounds();
        let bounds = constraints::Rectangle::new(Some(lower_bounds), Some(upper_bounds));

        let problem = Problem::new(&bounds, df, f);

        let mut panoc = PANOCOptimizer::new(problem, &mut panoc_cache).with_max_iter(parameters.max_iterations);
        if let Some(a) = &parameters.max_time { panoc = panoc.with_max_duration(a.clone()); }

        let mut u = program.project_onto_bounds(initial_guess);
        let status = panoc.solve(&mut u)
            .map_err(|e| PlanningError::new_solve_error(&format!("PANOC failed: {:?}", e), file!(), line!()))?;

        Ok(SolverOutput {
            solution: u,
            exit_status: SolverExitStatus::from_open_exit_status(status.exit_status()),
            num_outer_iterations: 0,
            num_inner_iterations: status.iterations(),
            solve_time: status.solve_time(),
            cost: status.cost_value()
        })
    }
    fn optimize_alm(&self, program: &NonlinearProgram, initial_guess: &[f64], parameters: &SolverParameters) -> Result<SolverOutput, PlanningError> {
        let n1 = program.num_constraints();
        let mut u = program.project_onto_bounds(initial_guess);
        let (cost_scale, row_scales) = Self::gradient_scaling(program, &u, parameters.max_scaled_gradient);
        let initial_multipliers = if program.residual(&u) <= parameters.infeasibility_threshold {
            Some(Self::estimate_multipliers(program, &u, cost_scale, &row_scales))
        } else { None };

        let panoc_cache = PANOCCache::new(program.num_variables(), parameters.tolerance, parameters.lbfgs_memory);
        let mut alm_cache = AlmCache::new(panoc_cache, n1, 0);

        let (lower_bounds, upper_bounds) = program.bounds();
        let bounds = constraints::Rectangle::new(Some(lower_bounds), Some(upper_bounds));
        let (c_lower, c_upper) = program.constraint_value_limits();
        let y_lower: Vec<f64> = c_lower.iter().map(|l| if l.is_finite() { -Self::MULTIPLIER_BOUND } else { 0.0 }).collect();
        let y_upper = vec![Self::MULTIPLIER_BOUND; n1];

        let df = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            program.cost_gradient(u, grad);
            grad.iter_mut().for_each(|g| *g *= cost_scale);
            if grad.iter().all(|g| g.is_finite()) { Ok(()) } else { Err(SolverError::Cost) }
        };
        let f = |u: &[f64], cost: &mut f64| -> Result<(), SolverError> {
            *cost = cost_scale * program.cost(u);
            if cost.is_finite() { Ok(()) } else { Err(SolverError::Cost) }
        };
        let f1 = |u: &[f64], f1u: &mut [f64]| -> Result<(), SolverError> {
            program.constraint_values(u, f1u);
            f1u.iter_mut().zip(row_scales.iter()).for_each(|(v, s)| *v *= s);
            if f1u.iter().all(|v| v.is_finite()) { Ok(()) } else { Err(SolverError::Cost) }
        };
        let f1_jacobian_product = |u: &[f64], d: &[f64], res: &mut [f64]| -> Result<(), SolverError> {
            let scaled: Vec<f64> = d.iter().zip(row_scales.iter()).map(|(d, s)| d * s).collect();
            program.constraint_jacobian_transpose_product(u, &scaled, res);
            if res.iter().all(|v| v.is_finite()) { Ok(()) } else { Err(SolverError::Cost) }
        };

        let factory = AlmFactory::new(
            f,
            df,
            Some(f1),
            Some(f1_jacobian_product),
            NO_MAPPING,
            NO_JACOBIAN_MAPPING,
            Some(constraints::Rectangle::new(Some(&c_lower), Some(&c_upper))),
            0,
        );

        let alm_problem = AlmProblem::new(
            bounds,
            Some(constraints::Rectangle::new(Some(&c_lower), Some(&c_upper))),
            Some(constraints::Rectangle::new(Some(&y_lower), Some(&y_upper))),
            |u: &[f64], xi: &[f64], cost: &mut f64| -> Result<(), SolverError> {
                factory.psi(u, xi, cost)
            },
            |u: &[f64], xi: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
                factory.d_psi(u, xi, grad)
            },
            Some(f1),
            NO_MAPPING,
            n1,
            0
        );

        let min_row_scale = row_scales.iter().cloned().fold(1.0, f64::min);
        let mut alm_optimizer = AlmOptimizer::new(&mut alm_cache, alm_problem)
            .with_max_inner_iterations(parameters.max_iterations)
            .with_max_outer_iterations(parameters.max_outer_iterations)
            .with_initial_penalty(parameters.initial_penalty)
            .with_penalty_update_factor(parameters.penalty_update_factor)
            .with_delta_tolerance(parameters.constraint_tolerance * min_row_scale)
            .with_epsilon_tolerance(parameters.tolerance);
        if let Some(y) = &initial_multipliers { alm_optimizer = alm_optimizer.with_initial_lagrange_multipliers(y); }
        if let Some(a) = &parameters.max_time { alm_optimizer = alm_optimizer.with_max_duration(a.clone()); }

        let r = alm_optimizer.solve(&mut u)
            .map_err(|e| PlanningError::new_solve_error(&format!("ALM failed: {:?}", e), file!(), line!()))?;

        Ok(SolverOutput {
            cost: program.cost(&u),
            solution: u,
            exit_status: SolverExitStatus::from_open_exit_status(r.exit_status()),
            num_outer_iterations: r.num_outer_iterations(),
            num_inner_iterations: r.num_inner_iterations(),
            solve_time: r.solve_time()
        })
    }
    /// `(cost_scale, row_scales)` such that every scaled gradient at `x` is at most
    /// `max_gradient` in the infinity norm.  Nothing is ever scaled up.
    fn gradient_scaling(program: &NonlinearProgram, x: &[f64], max_gradient: f64) -> (f64, Vec<f64>) {
        let scale_for = |norm: f64| if norm.is_finite() && norm > max_gradient { max_gradient / norm } else { 1.0 };

        let mut grad = vec![0.0; program.num_variables()];
        program.cost_gradient(x, &mut grad);
        let cost_scale = scale_for(grad.iter().fold(0.0, |m: f64, g| m.max(g.abs())));

        let row_scales = program.constraint_gradients(x).iter()
            .map(|row| scale_for(row.iter().fold(0.0, |m: f64, (_, g)| m.max(g.abs()))))
            .collect();
        (cost_scale, row_scales)
    }
    /// Multipliers `y` of the scaled program minimizing `|s_f grad f(x) + sum_i y_i s_i grad c_i(x)|`
    /// over the variables strictly inside their bounds, by projected coordinate descent.
    /// Inequality multipliers stay nonnegative and are zero on inactive rows.
    fn estimate_multipliers(program: &NonlinearProgram, x: &[f64], cost_scale: f64, row_scales: &[f64]) -> Vec<f64> {
        let n_eq = program.num_equality_constraints();
        let (lower_bounds, upper_bounds) = program.bounds();
        let free: Vec<bool> = x.iter().enumerate()
            .map(|(i, v)| *v > lower_bounds[i] + Self::ACTIVITY_TOLERANCE && *v < upper_bounds[i] - Self::ACTIVITY_TOLERANCE)
            .collect();

        let mut values = vec![0.0; program.num_constraints()];
        program.constraint_values(x, &mut values);
        let rows: Vec<Vec<(usize, f64)>> = program.constraint_gradients(x).into_iter().zip(row_scales.iter())
            .map(|(row, s)| row.into_iter().filter(|(j, _)| free[*j]).map(|(j, g)| (j, g * s)).collect())
            .collect();
        let active: Vec<bool> = (0..rows.len()).map(|i| i < n_eq || values[i] >= -Self::ACTIVITY_TOLERANCE).collect();

        let row_norms: Vec<f64> = rows.iter().map(|row| row.iter().map(|(_, g)| g * g).sum()).collect();
        let mut r = vec![0.0; program.num_variables()];
        program.cost_gradient(x, &mut r);
        for (j, g) in r.iter_mut().enumerate() { *g = if free[j] { cost_scale * *g } else { 0.0 }; }

        let mut y = vec![0.0; rows.len()];
        for _ in 0..Self::MULTIPLIER_ITERATIONS {
            for (i, row) in rows.iter().enumerate() {
                if !active[i] || row_norms[i] <= 0.0 { continue; }
                let directional: f64 = row.iter().map(|(j, g)| g * r[*j]).sum();
                let mut y_new = y[i] - directional / row_norms[i];
                if i >= n_eq { y_new = y_new.max(0.0); }
                y_new = y_new.max(-Self::MULTIPLIER_BOUND).min(Self::MULTIPLIER_BOUND);
                let dy = y_new - y[i];
                if dy != 0.0 {
                    for (j, g) in row { r[*j] += dy * g; }
                    y[i] = y_new;
                }
            }
        }
        if y.iter().all(|v| v.is_finite()) { y } else { vec![0.0; rows.len()] }
    }
}
impl NumericalSolver for OpEnNumericalSolver {
    fn solve(&self, program: &NonlinearProgram, initial_guess: &[f64], parameters: &SolverParameters) -> Result<SolverOutput, PlanningError> {
        if initial_guess.len() != program.num_variables() {
            return Err(PlanningError::new_solve_error(&format!("initial guess has {} entries but the program has {} variables.", initial_guess.len(), program.num_variables()), file!(), line!()));
        }
        if parameters.max_time == Some(Duration::ZERO) { return Err(PlanningError::SolveTimeout(Duration::ZERO)); }
        return if program.has_constraints() {
            self.optimize_alm(program, initial_guess, parameters)
        } else {
            self.optimize_panoc(program, initial_guess, parameters)
        }
    }
}
