//! Continuous trajectory optimization for one fixed contact-mode sequence.
//!
//! Every mode sequence of a request is transcribed onto the same knot grid with the same
//! `DecisionVariableLayout`, so a solution of one candidate is a valid initial iterate for any
//! other.  The optimizer never retries on its own and never mutates the shared model; it
//! builds the program, hands it to the `NumericalSolver`, and classifies what comes back.

pub mod decision_variables;
pub mod dynamics;
pub mod trajectory_segment;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::contact_modes::{PairKnotContext, PairMode};
use crate::contact_modes::contact_terms::{tangential_velocity, SignedDistanceTerm};
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::nonlinear_optimization::{ConstraintKind, ConstraintTag, NonlinearProgram, NumericalSolver, SolverExitStatus, SolverResult};
use crate::nonlinear_optimization::program_terms::{LinearTerm, RegionDistanceTerm, SquaredDifferenceTerm, SquaredDistanceTerm};
use crate::planning_request::{GoalSpecification, ResolvedPlanningRequest};
use crate::rigid_body_model::{BodyKind, PlanarTwist, RigidBodyModel};
use crate::trajectory_optimization::decision_variables::DecisionVariableLayout;
use crate::trajectory_optimization::dynamics::{actuated_dynamics_terms, DynamicsContact, QuasiStaticDynamicsTerm};
use crate::trajectory_optimization::trajectory_segment::{ContactForce, KnotPoint, TrajectorySegment};
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::interpolation::{LinearInterpolationMode, SimpleInterpolationUtils};

/// Numbers describing one solve, whatever its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveDiagnostics {
    pub cost: f64,
    pub residual: f64,
    pub initial_residual: f64,
    /// Largest constraint violation among the constraints tagged with each segment.
    pub segment_residuals: Vec<f64>,
    pub exit_status: Option<SolverExitStatus>,
    pub num_outer_iterations: usize,
    pub num_inner_iterations: usize,
    pub solve_time: Duration,
    /// The solver's point was worse than the (bound-projected) initial guess, which was kept
    /// in its place.
    pub kept_initial_guess: bool
}

#[derive(Clone, Debug)]
pub struct SegmentSolveOutcome {
    pub segments: Vec<TrajectorySegment>,
    pub result: SolverResult,
    pub diagnostics: SolveDiagnostics,
    /// Full decision vector, reusable as a warm start for any candidate of the same request.
    pub solution: Vec<f64>
}
impl SegmentSolveOutcome {
    /// Why this outcome cannot be accepted, or `None` if it can.
    pub fn failure(&self, residual_tolerance: f64) -> Option<PlanningError> {
        if self.result.is_acceptable(residual_tolerance) { return None; }
        return match &self.result {
            SolverResult::SolverError(msg) => { Some(PlanningError::new_solve_error(msg, file!(), line!())) }
            _ if self.diagnostics.exit_status == Some(SolverExitStatus::NotConvergedOutOfTime) => {
                Some(PlanningError::SolveTimeout(self.diagnostics.solve_time))
            }
            _ => {
                Some(PlanningError::new_solve_infeasible_error(&format!("residual {:e} above tolerance {:e}.", self.diagnostics.residual, residual_tolerance), file!(), line!()))
            }
        }
    }
}

/// Solution of the contact-activation relaxation, sampled per knot.
#[derive(Clone, Debug)]
pub struct RelaxationOutcome {
    pub result: SolverResult,
    pub solution: Vec<f64>,
    /// `activations[k][pair]` is the activation of `pair` at knot `k`.
    pub activations: Vec<BTreeMap<usize, f64>>,
    /// `tangential_velocities[k][pair]` is `v_t` over the interval ending at knot `k`; zero at
    /// knot 0.
    pub tangential_velocities: Vec<BTreeMap<usize, f64>>
}

pub struct TrajectorySegmentOptimizer {
    model: Arc<dyn RigidBodyModel>,
    request: Arc<ResolvedPlanningRequest>,
    solver: Arc<dyn NumericalSolver>,
    layout: DecisionVariableLayout,
    relaxed_layout: DecisionVariableLayout
}
impl TrajectorySegmentOptimizer {
    pub fn new(model: Arc<dyn RigidBodyModel>, request: Arc<ResolvedPlanningRequest>, solver: Arc<dyn NumericalSolver>) -> Result<Self, PlanningError> {
        if request.start_state.num_bodies() != model.num_bodies() {
            return Err(PlanningError::new_model_error(&format!("start state has {} bodies but the model has {}.", request.start_state.num_bodies(), model.num_bodies()), file!(), line!()));
        }
        let layout = DecisionVariableLayout::new(&*model, &request.active_pairs, request.horizon_steps)?;
        let relaxed_layout = DecisionVariableLayout::new_relaxed(&*model, &request.active_pairs, request.horizon_steps)?;
        Ok(Self { model, request, solver, layout, relaxed_layout })
    }
    pub fn model(&self) -> &Arc<dyn RigidBodyModel> {
        &self.model
    }
    pub fn request(&self) -> &Arc<ResolvedPlanningRequest> {
        &self.request
    }
    pub fn layout(&self) -> &DecisionVariableLayout {
        &self.layout
    }
    pub fn relaxed_layout(&self) -> &DecisionVariableLayout {
        &self.relaxed_layout
    }
    /// Solves the program of `sequence`.  `warm_start` only replaces the initial iterate.
    ///
    /// Setup problems (a mode on a pair that cannot touch, a sequence over the wrong pairs or
    /// horizon) are returned as errors.  Anything that goes wrong inside the solver is
    /// reported through the returned `SolverResult` instead.
    pub fn solve(&self, sequence: &ModeSequence, warm_start: Option<&[f64]>) -> Result<SegmentSolveOutcome, PlanningError> {
        self.solve_before(sequence, warm_start, None)
    }
    /// `solve` with the solver's time limit cut down to whatever is left before `deadline`.
    pub fn solve_before(&self, sequence: &ModeSequence, warm_start: Option<&[f64]>, deadline: Option<Instant>) -> Result<SegmentSolveOutcome, PlanningError> {
        let program = self.build_program(sequence)?;
        let initial_guess = match warm_start {
            None => { self.cold_start_initial_guess()? }
            Some(w) => {
                if w.len() != program.num_variables() {
                    return Err(PlanningError::new_solve_error(&format!("warm start has {} entries but the program has {} variables.", w.len(), program.num_variables()), file!(), line!()));
                }
                w.to_vec()
            }
        };

        let (solution, result, diagnostics) = self.run_solver(&program, initial_guess, sequence.num_segments(), deadline)?;
        let segments = self.extract_segments(sequence, &solution)?;

        debug!(sequence = %sequence, result = ?result, residual = diagnostics.residual, inner_iterations = diagnostics.num_inner_iterations, "segment solve finished");

        Ok(SegmentSolveOutcome { segments, result, diagnostics, solution })
    }
    /// Solves the relaxation in which every pair carries a continuous activation instead of a
    /// discrete mode.
    pub fn solve_relaxation(&self) -> Result<RelaxationOutcome, PlanningError> {
        self.solve_relaxation_before(None)
    }
    pub fn solve_relaxation_before(&self, deadline: Option<Instant>) -> Result<RelaxationOutcome, PlanningError> {
        let program = self.build_relaxation_program()?;
        let initial_guess = self.initial_guess_for_layout(&self.relaxed_layout)?;
        let (solution, result, _) = self.run_solver(&program, initial_guess, 1, deadline)?;

        let dt = self.request.dt();
        let mut activations = vec![];
        let mut tangential_velocities = vec![];
        for knot in 0..self.relaxed_layout.num_knots() {
            let mut a = BTreeMap::new();
            let mut v = BTreeMap::new();
            for pair_idx in &self.request.active_pairs {
                if let Some(idx) = self.relaxed_layout.activation_idx(*pair_idx, knot) { a.insert(*pair_idx, solution[idx]); }
                let v_t = if knot == 0 { 0.0 } else {
                    let pair = self.model.contact_pair(*pair_idx)?;
                    tangential_velocity(&*self.model,
                                        *pair_idx,
                                        &self.relaxed_layout.read_pose(&solution, pair.body_a(), knot)?,
                                        &self.relaxed_layout.read_pose(&solution, pair.body_b(), knot)?,
                                        &self.relaxed_layout.read_pose(&solution, pair.body_a(), knot - 1)?,
                                        &self.relaxed_layout.read_pose(&solution, pair.body_b(), knot - 1)?,
                                        dt)?
                };
                v.insert(*pair_idx, v_t);
            }
            activations.push(a);
            tangential_velocities.push(v);
        }

        debug!(result = ?result, "relaxation solve finished");

        Ok(RelaxationOutcome { result, solution, activations, tangential_velocities })
    }
    /// Start poses held for bodies without a goal; bodies with a goal move on a straight line
    /// from their start pose to the goal's nominal pose.  Controls follow the poses, forces are
    /// zero.
    pub fn cold_start_initial_guess(&self) -> Result<Vec<f64>, PlanningError> {
        self.initial_guess_for_layout(&self.layout)
    }
    pub fn build_program(&self, sequence: &ModeSequence) -> Result<NonlinearProgram, PlanningError> {
        self.check_sequence(sequence)?;
        let layout = &self.layout;
        let mut program = NonlinearProgram::new(layout.num_variables());
        self.set_pose_and_control_bounds(&mut program, layout)?;

        let max_normal_force = self.request.config.max_normal_force;
        for knot in 0..layout.num_knots() {
            let mode = sequence.mode_of_knot(knot)?;
            for pair_idx in &self.request.active_pairs {
                let pair_mode = Self::pair_mode(mode.get(*pair_idx), *pair_idx)?;
                let (n, t) = self.force_idxs(layout, *pair_idx, knot)?;
                let ((n_lo, n_hi), (t_lo, t_hi)) = if knot == 0 { ((0.0, 0.0), (0.0, 0.0)) } else {
                    pair_mode.force_bounds(self.model.contact_pair(*pair_idx)?.friction_coefficient(), max_normal_force)
                };
                program.set_bounds(n, n_lo, n_hi)?;
                program.set_bounds(t, t_lo, t_hi)?;
            }
        }

        for step in 0..self.request.horizon_steps {
            let knot = step + 1;
            let segment = sequence.segment_of_knot(knot)?;
            let mode = sequence.mode_of_knot(knot)?;
            let in_contact: Vec<usize> = self.request.active_pairs.iter().filter(|p| mode.get(**p).map(|m| m.is_in_contact()).unwrap_or(false)).cloned().collect();
            self.add_dynamics_constraints(&mut program, layout, step, segment, &in_contact)?;
        }

        for knot in 0..layout.num_knots() {
            let segment = sequence.segment_of_knot(knot)?;
            let mode = sequence.mode_of_knot(knot)?;
            let next = sequence.next_segment_at_boundary(knot);
            for pair_idx in &self.request.active_pairs {
                let pair_mode = Self::pair_mode(mode.get(*pair_idx), *pair_idx)?;
                let ctx = self.pair_knot_context(layout, *pair_idx, knot, segment)?;
                for c in pair_mode.constraints(&ctx)? { c.add_to_program(&mut program)?; }

                if let Some(next_segment) = next {
                    let next_mode = Self::pair_mode(sequence.segments()[next_segment].mode.get(*pair_idx), *pair_idx)?;
                    if next_mode.is_in_contact() != pair_mode.is_in_contact() {
                        let next_ctx = PairKnotContext { segment: next_segment, ..ctx };
                        for c in next_mode.geometric_constraints(&next_ctx)? { c.add_to_program(&mut program)?; }
                    }
                }
            }
        }

        self.add_goal_constraints(&mut program, layout, sequence.num_segments() - 1)?;
        self.add_costs(&mut program, layout)?;

        Ok(program)
    }
    /// Program of the relaxation: every pair may push at every knot, but only as hard as its
    /// activation `alpha` allows (`lambda_n <= alpha * f_max`), and only when close
    /// (`phi <= (1 - alpha) * phi_max`).
    pub fn build_relaxation_program(&self) -> Result<NonlinearProgram, PlanningError> {
        let layout = &self.relaxed_layout;
        let mut program = NonlinearProgram::new(layout.num_variables());
        self.set_pose_and_control_bounds(&mut program, layout)?;

        let max_normal_force = self.request.config.max_normal_force;
        let max_activation_distance = self.request.config.guided_search.max_activation_distance;
        let mut activation_idxs = vec![];
        for knot in 0..layout.num_knots() {
            for pair_idx in &self.request.active_pairs {
                let (n, t) = self.force_idxs(layout, *pair_idx, knot)?;
                let ((n_lo, n_hi), (t_lo, t_hi)) = if knot == 0 { ((0.0, 0.0), (0.0, 0.0)) } else {
                    PairMode::Sticking.force_bounds(self.model.contact_pair(*pair_idx)?.friction_coefficient(), max_normal_force)
                };
                program.set_bounds(n, n_lo, n_hi)?;
                program.set_bounds(t, t_lo, t_hi)?;
                let alpha = layout.activation_idx(*pair_idx, knot)
                    .ok_or_else(|| PlanningError::new_generic_error_str("relaxed layout has no activation variables.", file!(), line!()))?;
                program.set_bounds(alpha, 0.0, 1.0)?;
                activation_idxs.push(alpha);
            }
        }

        for step in 0..self.request.horizon_steps {
            self.add_dynamics_constraints(&mut program, layout, step, 0, &self.request.active_pairs)?;
        }

        for knot in 0..layout.num_knots() {
            for pair_idx in &self.request.active_pairs {
                let ctx = self.pair_knot_context(layout, *pair_idx, knot, 0)?;
                for c in PairMode::Separated.geometric_constraints(&ctx)? { c.add_to_program(&mut program)?; }
                // the sticking cone without its velocity constraint
                let cone = PairKnotContext { previous_poses: None, ..ctx.clone() };
                for c in PairMode::Sticking.force_velocity_constraints(&cone)? { c.add_to_program(&mut program)?; }

                let alpha = layout.activation_idx(*pair_idx, knot)
                    .ok_or_else(|| PlanningError::new_generic_error_str("relaxed layout has no activation variables.", file!(), line!()))?;
                let tag = ConstraintTag { knot, segment: 0, kind: ConstraintKind::ContactActivation { pair_idx: *pair_idx } };
                let distance = SignedDistanceTerm::new_with_linear_part(self.model.clone(), *pair_idx, &ctx.pose_a, &ctx.pose_b, 1.0, &[(alpha, max_activation_distance)], -max_activation_distance);
                program.add_less_than_zero_inequality_constraint(tag, Arc::new(distance))?;
                let force = LinearTerm::new(vec![ctx.normal_force_idx, alpha], vec![1.0, -max_normal_force], 0.0)?;
                program.add_less_than_zero_inequality_constraint(tag, Arc::new(force))?;
            }
        }

        self.add_goal_constraints(&mut program, layout, 0)?;
        self.add_costs(&mut program, layout)?;
        let w = self.request.config.cost_weights.force_regularization;
        if w > 0.0 && !activation_idxs.is_empty() {
            program.add_cost_term(w, SquaredDistanceTerm::new_sum_of_squares(activation_idxs))?;
        }

        Ok(program)
    }
    /// Splits a decision vector into per-segment knot lists.  Boundary knots appear in both
    /// adjacent segments.
    pub fn extract_segments(&self, sequence: &ModeSequence, x: &[f64]) -> Result<Vec<TrajectorySegment>, PlanningError> {
        let mut out_vec = vec![];
        for (segment_idx, segment) in sequence.segments().iter().enumerate() {
            let (start, end) = sequence.segment_knot_range(segment_idx)?;
            let mut knots = vec![];
            for knot in start..=end {
                knots.push(self.extract_knot(x, knot)?);
            }
            out_vec.push(TrajectorySegment::new(segment_idx, segment.mode.clone(), knots));
        }
        Ok(out_vec)
    }
    pub fn extract_knot(&self, x: &[f64], knot: usize) -> Result<KnotPoint, PlanningError> {
        let dt = self.request.dt();
        let state = self.layout.read_state(x, knot, dt)?;
        let mut controls = BTreeMap::new();
        for body_idx in self.layout.actuated_bodies() {
            if let Some(i) = self.layout.control_idxs(body_idx, knot) {
                PlanningError::new_check_for_idx_out_of_bound_error(i[2], x.len(), file!(), line!())?;
                controls.insert(body_idx, PlanarTwist::new(x[i[0]], x[i[1]], x[i[2]]));
            }
        }
        let mut contact_forces = BTreeMap::new();
        for pair_idx in &self.request.active_pairs {
            let (n, t) = self.force_idxs(&self.layout, *pair_idx, knot)?;
            PlanningError::new_check_for_idx_out_of_bound_error(n.max(t), x.len(), file!(), line!())?;
            contact_forces.insert(*pair_idx, ContactForce::new(x[n], x[t]));
        }
        Ok(KnotPoint { time: knot as f64 * dt, state, controls, contact_forces })
    }

    fn run_solver(&self, program: &NonlinearProgram, initial_guess: Vec<f64>, num_segments: usize, deadline: Option<Instant>) -> Result<(Vec<f64>, SolverResult, SolveDiagnostics), PlanningError> {
        let mut parameters = self.request.config.solver_parameters.clone();
        if let Some(deadline) = deadline {
            let time_left = deadline.saturating_duration_since(Instant::now());
            parameters.max_time = Some(parameters.max_time.map(|t| t.min(time_left)).unwrap_or(time_left));
        }
        let initial_guess = program.project_onto_bounds(&initial_guess);
        let initial_residual = program.residual(&initial_guess);
        let mut kept_initial_guess = false;

        let (solution, result, exit_status, num_outer_iterations, num_inner_iterations, solve_time) = match self.solver.solve(program, &initial_guess, &parameters) {
            Ok(output) => {
                if output.solution.len() != program.num_variables() {
                    let msg = format!("solver returned {} values for {} variables.", output.solution.len(), program.num_variables());
                    (initial_guess, SolverResult::SolverError(msg), Some(output.exit_status), output.num_outer_iterations, output.num_inner_iterations, output.solve_time)
                } else {
                    let final_residual = program.residual(&output.solution);
                    let (solution, residual) = if Self::is_better_point(program, &initial_guess, initial_residual, &output.solution, final_residual, parameters.constraint_tolerance) {
                        debug!(initial_residual, final_residual, "solver ended on a worse point than its initial guess; keeping the initial guess");
                        kept_initial_guess = true;
                        (initial_guess, initial_residual)
                    } else {
                        (output.solution, final_residual)
                    };
                    let result = SolverResult::classify(output.exit_status, initial_residual, residual, &parameters);
                    (solution, result, Some(output.exit_status), output.num_outer_iterations, output.num_inner_iterations, output.solve_time)
                }
            }
            Err(PlanningError::SolveTimeout(elapsed)) => {
                warn!(?elapsed, "solver ran out of time before its first iteration");
                kept_initial_guess = true;
                let result = SolverResult::classify(SolverExitStatus::NotConvergedOutOfTime, initial_residual, initial_residual, &parameters);
                (initial_guess, result, Some(SolverExitStatus::NotConvergedOutOfTime), 0, 0, elapsed)
            }
            Err(e) => {
                if e.is_fatal() { return Err(e); }
                (initial_guess, SolverResult::SolverError(e.to_string()), None, 0, 0, Duration::from_secs(0))
            }
        };

        let diagnostics = SolveDiagnostics {
            cost: program.cost(&solution),
            residual: program.residual(&solution),
            initial_residual,
            segment_residuals: program.residual_per_segment(&solution, num_segments),
            exit_status,
            num_outer_iterations,
            num_inner_iterations,
            solve_time,
            kept_initial_guess
        };

        Ok((solution, result, diagnostics))
    }
    /// True if `a` beats `b`: a lower residual, or a lower cost when both are within
    /// `constraint_tolerance`.  Non-finite residuals always lose.
    fn is_better_point(program: &NonlinearProgram, a: &[f64], residual_a: f64, b: &[f64], residual_b: f64, constraint_tolerance: f64) -> bool {
        if !residual_a.is_finite() { return false; }
        if !residual_b.is_finite() { return true; }
        if residual_a <= constraint_tolerance && residual_b <= constraint_tolerance {
            return program.cost(a) < program.cost(b);
        }
        residual_a < residual_b
    }
    fn check_sequence(&self, sequence: &ModeSequence) -> Result<(), PlanningError> {
        if sequence.total_steps() != self.request.horizon_steps {
            return Err(PlanningError::new_invalid_mode_sequence_error(&format!("sequence covers {} steps but the horizon has {}.", sequence.total_steps(), self.request.horizon_steps), file!(), line!()));
        }
        if sequence.pair_idxs() != self.request.active_pairs {
            return Err(PlanningError::new_invalid_mode_sequence_error(&format!("sequence covers pairs {:?} but the active pairs are {:?}.", sequence.pair_idxs(), self.request.active_pairs), file!(), line!()));
        }
        for segment in sequence.segments() { segment.mode.check_against_model(&*self.model)?; }
        Ok(())
    }
    fn pair_mode(pair_mode: Option<&PairMode>, pair_idx: usize) -> Result<PairMode, PlanningError> {
        pair_mode.cloned().ok_or_else(|| PlanningError::new_invalid_mode_sequence_error(&format!("mode has no entry for pair {}.", pair_idx), file!(), line!()))
    }
    fn force_idxs(&self, layout: &DecisionVariableLayout, pair_idx: usize, knot: usize) -> Result<(usize, usize), PlanningError> {
        layout.force_idxs(pair_idx, knot)
            .ok_or_else(|| PlanningError::new_model_error(&format!("pair {} has no force variables.", pair_idx), file!(), line!()))
    }
    fn pair_knot_context(&self, layout: &DecisionVariableLayout, pair_idx: usize, knot: usize, segment: usize) -> Result<PairKnotContext, PlanningError> {
        let pair = self.model.contact_pair(pair_idx)?;
        let (n, t) = self.force_idxs(layout, pair_idx, knot)?;
        let previous_poses = if knot == 0 { None } else {
            Some((layout.pose_source(pair.body_a(), knot - 1)?, layout.pose_source(pair.body_b(), knot - 1)?))
        };
        Ok(PairKnotContext {
            model: self.model.clone(),
            pair_idx,
            knot,
            segment,
            pose_a: layout.pose_source(pair.body_a(), knot)?,
            pose_b: layout.pose_source(pair.body_b(), knot)?,
            previous_poses,
            dt: self.request.dt(),
            normal_force_idx: n,
            tangential_force_idx: t
        })
    }
    /// Start poses pinned, later poses inside the workspace box, actuation limits on controls,
    /// knot-0 controls zero.
    fn set_pose_and_control_bounds(&self, program: &mut NonlinearProgram, layout: &DecisionVariableLayout) -> Result<(), PlanningError> {
        let (workspace_lower, workspace_upper) = self.workspace_box()?;
        for body_idx in layout.movable_bodies() {
            let start = self.request.start_state.pose(body_idx)?.to_array();
            if let Some(idxs) = layout.pose_idxs(body_idx, 0) {
                for c in 0..3 { program.set_bounds(idxs[c], start[c], start[c])?; }
            }
            for knot in 1..layout.num_knots() {
                if let Some(idxs) = layout.pose_idxs(body_idx, knot) {
                    for c in 0..3 { program.set_bounds(idxs[c], workspace_lower[c], workspace_upper[c])?; }
                }
            }
        }
        for body_idx in layout.actuated_bodies() {
            let limits = match &self.model.body(body_idx)?.kind {
                BodyKind::Actuated { velocity_limits } => { *velocity_limits }
                _ => { continue; }
            };
            for knot in 0..layout.num_knots() {
                if let Some(idxs) = layout.control_idxs(body_idx, knot) {
                    for c in 0..3 {
                        let l = if knot == 0 { 0.0 } else { limits[c].abs() };
                        program.set_bounds(idxs[c], -l, l)?;
                    }
                }
            }
        }
        Ok(())
    }
    /// Box around every start, goal and static pose, grown by `workspace_margin` in position
    /// and by `max_rotation` in orientation.  Static poses only widen the position range.
    pub fn workspace_box(&self) -> Result<([f64; 3], [f64; 3]), PlanningError> {
        let mut lower = [f64::INFINITY; 3];
        let mut upper = [-f64::INFINITY; 3];
        let mut include = |p: [f64; 3], with_orientation: bool| {
            let num_coordinates = if with_orientation { 3 } else { 2 };
            for c in 0..num_coordinates {
                lower[c] = lower[c].min(p[c]);
                upper[c] = upper[c].max(p[c]);
            }
        };
        for body_idx in 0..self.model.num_bodies() {
            match self.model.static_pose(body_idx)? {
                Some(p) => { include(p.to_array(), false); }
                None => { include(self.request.start_state.pose(body_idx)?.to_array(), true); }
            }
        }
        for (_, goal) in &self.request.goals { include(goal.nominal_pose().to_array(), true); }

        let margin = [self.request.config.workspace_margin, self.request.config.workspace_margin, self.request.config.max_rotation];
        for c in 0..3 {
            if !lower[c].is_finite() || !upper[c].is_finite() {
                lower[c] = -f64::INFINITY;
                upper[c] = f64::INFINITY;
            } else {
                lower[c] -= margin[c];
                upper[c] += margin[c];
            }
        }
        Ok((lower, upper))
    }
    fn add_dynamics_constraints(&self, program: &mut NonlinearProgram, layout: &DecisionVariableLayout, step: usize, segment: usize, in_contact: &[usize]) -> Result<(), PlanningError> {
        let knot = step + 1;
        let dt = self.request.dt();
        for body_idx in layout.movable_bodies() {
            let tag = ConstraintTag { knot, segment, kind: ConstraintKind::Dynamics { body_idx } };
            let prev = layout.pose_source(body_idx, step)?;
            let next = layout.pose_source(body_idx, knot)?;
            match (&self.model.body(body_idx)?.kind, layout.pose_idxs(body_idx, step), layout.pose_idxs(body_idx, knot)) {
                (BodyKind::Actuated { .. }, Some(p), Some(q)) => {
                    let u = layout.control_idxs(body_idx, knot)
                        .ok_or_else(|| PlanningError::new_model_error(&format!("actuated body {} has no control variables.", body_idx), file!(), line!()))?;
                    for term in actuated_dynamics_terms(&p, &q, &u, dt)? {
                        program.add_equality_constraint(tag, Arc::new(term))?;
                    }
                }
                (BodyKind::Unactuated { .. }, _, _) => {
                    let mut contacts = vec![];
                    for pair_idx in in_contact {
                        let pair = self.model.contact_pair(*pair_idx)?;
                        if !pair.involves_body(body_idx) { continue; }
                        let (n, t) = self.force_idxs(layout, *pair_idx, knot)?;
                        contacts.push(DynamicsContact {
                            pair_idx: *pair_idx,
                            pose_a: layout.pose_source(pair.body_a(), knot)?,
                            pose_b: layout.pose_source(pair.body_b(), knot)?,
                            normal_force_idx: n,
                            tangential_force_idx: t
                        });
                    }
                    for c in 0..3 {
                        let term = QuasiStaticDynamicsTerm::new(self.model.clone(), body_idx, c, &prev, &next, &contacts, dt)?;
                        program.add_equality_constraint(tag, Arc::new(term))?;
                    }
                }
                _ => { }
            }
        }
        Ok(())
    }
    fn add_goal_constraints(&self, program: &mut NonlinearProgram, layout: &DecisionVariableLayout, segment: usize) -> Result<(), PlanningError> {
        let knot = layout.num_knots() - 1;
        for (body_idx, goal) in &self.request.goals {
            let idxs = layout.pose_idxs(*body_idx, knot)
                .ok_or_else(|| PlanningError::new_model_error(&format!("goal body {} has no pose variables.", body_idx), file!(), line!()))?;
            let tag = ConstraintTag { knot, segment, kind: ConstraintKind::Goal { body_idx: *body_idx } };
            match goal {
                GoalSpecification::State(p) => {
                    let target = p.to_array();
                    for c in 0..3 {
                        program.add_equality_constraint(tag, Arc::new(LinearTerm::new(vec![idxs[c]], vec![1.0], -target[c])?))?;
                    }
                }
                GoalSpecification::Region { center, half_extents, orientation_tolerance } => {
                    let c = center.to_array();
                    let mut extents = vec![(0, half_extents[0]), (1, half_extents[1])];
                    if let Some(o) = orientation_tolerance { extents.push((2, *o)); }
                    for (i, h) in extents {
                        program.add_less_than_zero_inequality_constraint(tag, Arc::new(LinearTerm::new(vec![idxs[i]], vec![1.0], -(c[i] + h))?))?;
                        program.add_less_than_zero_inequality_constraint(tag, Arc::new(LinearTerm::new(vec![idxs[i]], vec![-1.0], c[i] - h)?))?;
                    }
                }
            }
        }
        Ok(())
    }
    fn add_costs(&self, program: &mut NonlinearProgram, layout: &DecisionVariableLayout) -> Result<(), PlanningError> {
        let weights = &self.request.config.cost_weights;
        let num_knots = layout.num_knots();

        let mut control_idxs = vec![];
        for body_idx in layout.actuated_bodies() {
            for knot in 1..num_knots {
                if let Some(i) = layout.control_idxs(body_idx, knot) { control_idxs.extend_from_slice(&i); }
            }
        }
        if weights.control_effort > 0.0 && !control_idxs.is_empty() {
            program.add_cost_term(weights.control_effort, SquaredDistanceTerm::new_sum_of_squares(control_idxs))?;
        }

        let mut displacement_pairs = vec![];
        for body_idx in layout.movable_bodies() {
            for knot in 0..num_knots - 1 {
                if let (Some(a), Some(b)) = (layout.pose_idxs(body_idx, knot), layout.pose_idxs(body_idx, knot + 1)) {
                    for c in 0..3 { displacement_pairs.push((a[c], b[c])); }
                }
            }
        }
        if weights.path_length > 0.0 && !displacement_pairs.is_empty() {
            program.add_cost_term(weights.path_length, SquaredDifferenceTerm::new(&displacement_pairs))?;
        }

        let mut force_idxs = vec![];
        for pair_idx in layout.active_pairs() {
            for knot in 0..num_knots {
                let (n, t) = self.force_idxs(layout, pair_idx, knot)?;
                force_idxs.push(n);
                force_idxs.push(t);
            }
        }
        if weights.force_regularization > 0.0 && !force_idxs.is_empty() {
            program.add_cost_term(weights.force_regularization, SquaredDistanceTerm::new_sum_of_squares(force_idxs))?;
        }

        if weights.terminal_goal > 0.0 {
            for (body_idx, goal) in &self.request.goals {
                let idxs = match layout.pose_idxs(*body_idx, num_knots - 1) {
                    Some(i) => { i }
                    None => { continue; }
                };
                match goal {
                    GoalSpecification::State(p) => {
                        program.add_cost_term(weights.terminal_goal, SquaredDistanceTerm::new(idxs.to_vec(), p.to_array().to_vec(), None)?)?;
                    }
                    GoalSpecification::Region { center, half_extents, orientation_tolerance } => {
                        program.add_cost_term(weights.terminal_goal, RegionDistanceTerm::new(vec![idxs[0], idxs[1]], vec![center.x, center.y], half_extents.to_vec())?)?;
                        if let Some(o) = orientation_tolerance {
                            program.add_cost_term(weights.terminal_goal, RegionDistanceTerm::new(vec![idxs[2]], vec![center.theta], vec![*o])?)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
    fn initial_guess_for_layout(&self, layout: &DecisionVariableLayout) -> Result<Vec<f64>, PlanningError> {
        let num_knots = layout.num_knots();
        let dt = self.request.dt();
        let mut x = vec![0.0; layout.num_knot_variables()];

        for body_idx in layout.movable_bodies() {
            let start = self.request.start_state.pose(body_idx)?.to_array();
            let end = match self.request.goals.iter().find(|(b, _)| *b == body_idx) {
                Some((_, goal)) => { goal.nominal_pose().to_array() }
                None => { start }
            };
            let path = SimpleInterpolationUtils::linear_interpolation(&DVector::from_row_slice(&start),
                                                                      &DVector::from_row_slice(&end),
                                                                      &LinearInterpolationMode::FixedNumKnots { num_knots });
            for (knot, p) in path.iter().enumerate().take(num_knots) {
                if let Some(idxs) = layout.pose_idxs(body_idx, knot) {
                    for c in 0..3 { x[idxs[c]] = p[c]; }
                }
            }
        }

        for body_idx in layout.actuated_bodies() {
            for knot in 1..num_knots {
                if let (Some(u), Some(a), Some(b)) = (layout.control_idxs(body_idx, knot), layout.pose_idxs(body_idx, knot - 1), layout.pose_idxs(body_idx, knot)) {
                    for c in 0..3 { x[u[c]] = (x[b[c]] - x[a[c]]) / dt; }
                }
            }
        }

        Ok(layout.resize_decision_vector(&x, 0.5))
    }
}
