//! Drives the search: pulls candidate mode sequences, solves them, and decides when to stop.
//!
//! ```text
//! Searching --(candidates pulled)--> Solving --(none acceptable)--> Searching
//!                                    Solving --(acceptable)-------> Accepted
//! Searching --(budget, deadline or sequencer exhausted)-----------> Exhausted
//! ```
//!
//! A batch of up to `parallel_workers` candidates is solved at a time.  Each worker owns its
//! decision vector; the model and the optimizer are shared read-only.  Results are folded in
//! candidate order by the coordinating thread only, so the outcome does not depend on which
//! worker finishes first.

pub mod plan;

use std::sync::Arc;
use std::time::{Duration, Instant};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::mode_sequencer::{pairs_separated_at_start, ModeSequencer, SequenceLimits, SequencerOutput};
use crate::mode_sequencer::enumeration::EnumerationSequencer;
use crate::mode_sequencer::guided_search::GuidedSearchSequencer;
use crate::nonlinear_optimization::{NumericalSolver, OpEnNumericalSolver, SolverResult};
use crate::plan_coordinator::plan::Plan;
use crate::planning_request::{ExhaustionPolicy, PlanningRequest, SearchStrategy, WarmStartStrategy};
use crate::rigid_body_model::RigidBodyModel;
use crate::trajectory_optimization::{SegmentSolveOutcome, TrajectorySegmentOptimizer};
use crate::utils::utils_console::PrintColor;
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_sampling::SimpleSamplers;

#[derive(Clone, Debug, PartialEq)]
pub enum PlanOutcome {
    Accepted(Plan),
    /// The budget ran out.  Holds the best sub-optimal plan found, tagged best effort.
    Exhausted(Option<Plan>)
}
impl PlanOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PlanOutcome::Accepted(_))
    }
    pub fn plan(&self) -> Option<&Plan> {
        match self {
            PlanOutcome::Accepted(p) => { Some(p) }
            PlanOutcome::Exhausted(p) => { p.as_ref() }
        }
    }
    pub fn into_plan(self) -> Option<Plan> {
        match self {
            PlanOutcome::Accepted(p) => { Some(p) }
            PlanOutcome::Exhausted(p) => { p }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Searching,
    Solving,
    Accepted,
    Exhausted
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CoordinatorState,
    pub to: CoordinatorState,
    pub num_attempts: usize,
    pub elapsed: Duration
}

/// What happened to one candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub attempt: usize,
    pub sequence: ModeSequence,
    pub result: SolverResult,
    pub residual: f64,
    pub num_solver_calls: usize,
    pub warm_started: bool
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningStatistics {
    pub num_attempts: usize,
    pub num_solver_calls: usize,
    pub num_retries: usize,
    pub num_warm_starts: usize,
    pub num_infeasible: usize,
    pub num_solver_errors: usize,
    /// Rejected candidates whose last solve ran out of time.
    pub num_solver_timeouts: usize,
    pub num_rejected_suboptimal: usize,
    pub candidates: Vec<CandidateRecord>,
    pub transitions: Vec<StateTransition>,
    pub elapsed: Duration
}

struct CandidateJob {
    attempt: usize,
    sequence: ModeSequence,
    warm_start: Option<Vec<f64>>
}

struct CandidateAttempt {
    attempt: usize,
    sequence: ModeSequence,
    result: SolverResult,
    outcome: Option<SegmentSolveOutcome>,
    num_solver_calls: usize,
    warm_started: bool
}
impl CandidateAttempt {
    fn residual(&self) -> f64 {
        self.outcome.as_ref().map(|o| o.diagnostics.residual).unwrap_or(f64::INFINITY)
    }
    fn failure(&self, residual_tolerance: f64) -> Option<PlanningError> {
        match (&self.outcome, &self.result) {
            (Some(o), _) => { o.failure(residual_tolerance) }
            (None, SolverResult::SolverError(msg)) => { Some(PlanningError::new_solve_error(msg, file!(), line!())) }
            (None, r) => {
                if r.is_acceptable(residual_tolerance) { None }
                else { Some(PlanningError::new_solve_infeasible_error(&format!("{:?} without a solution.", r), file!(), line!())) }
            }
        }
    }
}

/// Entry point of the planner.
pub struct PlanCoordinator {
    model: Arc<dyn RigidBodyModel>,
    solver: Arc<dyn NumericalSolver>
}
impl PlanCoordinator {
    pub fn new(model: Arc<dyn RigidBodyModel>, solver: Arc<dyn NumericalSolver>) -> Self {
        Self { model, solver }
    }
    pub fn new_with_open_solver(model: Arc<dyn RigidBodyModel>) -> Self {
        Self::new(model, Arc::new(OpEnNumericalSolver::new()))
    }
    pub fn model(&self) -> &Arc<dyn RigidBodyModel> {
        &self.model
    }
    /// Plans a request.  Model and configuration problems fail before any candidate is
    /// solved; an exhausted search is returned as `Exhausted` unless the request's exhaustion
    /// policy is `Fail` and no best-effort plan exists.
    pub fn plan(&self, request: &PlanningRequest) -> Result<PlanOutcome, PlanningError> {
        Ok(self.plan_with_statistics(request)?.0)
    }
    pub fn plan_with_statistics(&self, request: &PlanningRequest) -> Result<(PlanOutcome, PlanningStatistics), PlanningError> {
        let start = Instant::now();
        let resolved = Arc::new(request.resolve(&*self.model)?);
        let config = resolved.config.clone();
        let deadline = config.time_budget.map(|b| start + b);

        let optimizer = Arc::new(TrajectorySegmentOptimizer::new(self.model.clone(), resolved.clone(), self.solver.clone())?);
        let mut sequencer: Box<dyn ModeSequencer> = match config.search_strategy {
            SearchStrategy::Enumeration => {
                let separated = pairs_separated_at_start(&*self.model, &resolved, config.residual_tolerance)?;
                Box::new(EnumerationSequencer::new(&resolved.active_pairs, config.allow_sliding, SequenceLimits::new_from_request(&resolved), separated, resolved.seed_sequence.clone()))
            }
            SearchStrategy::GuidedSearch => {
                Box::new(GuidedSearchSequencer::new(optimizer.clone(), resolved.seed_sequence.clone(), deadline))
            }
        };

        let mut statistics = PlanningStatistics::default();
        let mut state = CoordinatorState::Searching;
        let mut best_effort: Option<CandidateAttempt> = None;
        let mut warm_reference: Option<(ModeSequence, Vec<f64>, f64)> = None;

        info!(strategy = ?config.search_strategy, max_attempts = config.max_attempts, "planning started");

        let accepted = loop {
            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                debug!("deadline passed; no more candidates are dispatched");
                break None;
            }
            if statistics.num_attempts >= config.max_attempts { break None; }

            let batch_size = config.parallel_workers.min(config.max_attempts - statistics.num_attempts);
            let mut batch = vec![];
            for _ in 0..batch_size {
                match sequencer.next_candidate()? {
                    SequencerOutput::Candidate(s) => { batch.push(s); }
                    SequencerOutput::Exhausted => { break; }
                }
            }
            if batch.is_empty() { break None; }
            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                debug!(num_dropped = batch.len(), "deadline passed while pulling candidates; none are dispatched");
                break None;
            }

            let jobs: Vec<CandidateJob> = batch.into_iter().enumerate().map(|(i, sequence)| {
                let warm_start = match (&config.warm_start_strategy, &warm_reference) {
                    (WarmStartStrategy::SingleSwitchReuse, Some((reference, solution, _))) if sequence.differs_by_single_mode(reference) => { Some(solution.clone()) }
                    _ => { None }
                };
                CandidateJob { attempt: statistics.num_attempts + i, sequence, warm_start }
            }).collect();
            statistics.num_attempts += jobs.len();
            self.transition(&mut state, CoordinatorState::Solving, &mut statistics, start);

            for j in &jobs {
                info!(attempt = j.attempt, sequence = %j.sequence, warm_start = j.warm_start.is_some(), "dispatching candidate");
            }
            let results: Vec<Result<CandidateAttempt, PlanningError>> = if jobs.len() == 1 {
                jobs.iter().map(|j| Self::solve_candidate(&optimizer, j, deadline)).collect()
            } else {
                jobs.par_iter().map(|j| Self::solve_candidate(&optimizer, j, deadline)).collect()
            };

            let mut accepted_attempt = None;
            for r in results {
                let attempt = r?;
                statistics.num_solver_calls += attempt.num_solver_calls;
                statistics.num_retries += attempt.num_solver_calls.saturating_sub(1);
                if attempt.warm_started { statistics.num_warm_starts += 1; }
                statistics.candidates.push(CandidateRecord {
                    attempt: attempt.attempt,
                    sequence: attempt.sequence.clone(),
                    result: attempt.result.clone(),
                    residual: attempt.residual(),
                    num_solver_calls: attempt.num_solver_calls,
                    warm_started: attempt.warm_started
                });

                if accepted_attempt.is_some() { continue; }
                if attempt.result.is_acceptable(config.residual_tolerance) {
                    sequencer.report_outcome(&attempt.sequence, true);
                    info!(attempt = attempt.attempt, sequence = %attempt.sequence, result = ?attempt.result, "candidate accepted");
                    accepted_attempt = Some(attempt);
                    continue;
                }

                sequencer.report_outcome(&attempt.sequence, false);
                let failure = attempt.failure(config.residual_tolerance);
                match &failure {
                    Some(PlanningError::SolveTimeout(elapsed)) => {
                        statistics.num_solver_timeouts += 1;
                        warn!(attempt = attempt.attempt, sequence = %attempt.sequence, ?elapsed, "candidate solve ran out of time");
                    }
                    Some(PlanningError::SolveError(_)) => { statistics.num_solver_errors += 1; }
                    _ => {
                        if attempt.result == SolverResult::Infeasible { statistics.num_infeasible += 1; } else { statistics.num_rejected_suboptimal += 1; }
                    }
                }
                let reason = failure.map(|e| e.to_string()).unwrap_or_default();
                info!(attempt = attempt.attempt, sequence = %attempt.sequence, result = ?attempt.result, residual = attempt.residual(), reason = %reason, "candidate rejected");
                config.debug.print(&format!("rejected {} ({:?})", attempt.sequence, attempt.result), PrintColor::Yellow);

                if let Some(o) = &attempt.outcome {
                    let r = o.diagnostics.residual;
                    if r.is_finite() && warm_reference.as_ref().map(|w| r < w.2).unwrap_or(true) {
                        warm_reference = Some((attempt.sequence.clone(), o.solution.clone(), r));
                    }
                }
                if let SolverResult::SubOptimal(r) = &attempt.result {
                    let better = best_effort.as_ref().map(|b| *r < b.residual()).unwrap_or(true);
                    if better { best_effort = Some(attempt); }
                }
            }

            if let Some(a) = accepted_attempt {
                self.transition(&mut state, CoordinatorState::Accepted, &mut statistics, start);
                break Some(a);
            }
            self.transition(&mut state, CoordinatorState::Searching, &mut statistics, start);
        };
        statistics.num_solver_calls += sequencer.num_solver_calls();

        let outcome = match accepted {
            Some(a) => {
                config.debug.print(&format!("accepted {} after {} attempts", a.sequence, statistics.num_attempts), PrintColor::Green);
                PlanOutcome::Accepted(Self::assemble_plan(a, resolved.time_horizon)?)
            }
            None => {
                self.transition(&mut state, CoordinatorState::Exhausted, &mut statistics, start);
                let best = match best_effort {
                    Some(a) => { Some(Self::assemble_plan(a, resolved.time_horizon)?.into_best_effort()) }
                    None => { None }
                };
                warn!(attempts = statistics.num_attempts, best_effort = best.is_some(), "search exhausted");
                config.debug.print(&format!("search exhausted after {} attempts", statistics.num_attempts), PrintColor::Red);
                if best.is_none() && config.exhaustion_policy == ExhaustionPolicy::Fail {
                    return Err(PlanningError::SearchExhausted { attempts: statistics.num_attempts });
                }
                PlanOutcome::Exhausted(best)
            }
        };

        statistics.elapsed = start.elapsed();
        Ok((outcome, statistics))
    }

    /// Solves one candidate, retrying failed solves from a perturbed initial guess.
    fn solve_candidate(optimizer: &TrajectorySegmentOptimizer, job: &CandidateJob, deadline: Option<Instant>) -> Result<CandidateAttempt, PlanningError> {
        let config = &optimizer.request().config;
        let mut initial_guess = job.warm_start.clone();
        let mut num_solver_calls = 0;

        loop {
            num_solver_calls += 1;
            let (result, outcome) = match optimizer.solve_before(&job.sequence, initial_guess.as_deref(), deadline) {
                Ok(o) => { (o.result.clone(), Some(o)) }
                Err(e) => {
                    if e.is_fatal() { return Err(e); }
                    (SolverResult::SolverError(e.to_string()), None)
                }
            };

            let retries_left = num_solver_calls <= config.max_solve_retries;
            let out_of_time = deadline.map(|d| Instant::now() >= d).unwrap_or(false);
            if !result.is_failure() || !retries_left || out_of_time {
                return Ok(CandidateAttempt {
                    attempt: job.attempt,
                    sequence: job.sequence.clone(),
                    result,
                    outcome,
                    num_solver_calls,
                    warm_started: job.warm_start.is_some()
                });
            }

            let base = match initial_guess {
                Some(g) => { g }
                None => { optimizer.cold_start_initial_guess()? }
            };
            let seed = config.seed.wrapping_add((job.attempt as u64) << 16).wrapping_add(num_solver_calls as u64);
            debug!(attempt = job.attempt, retry = num_solver_calls, result = ?result, "retrying candidate from a perturbed initial guess");
            initial_guess = Some(SimpleSamplers::perturb_with_normal_noise(&base, config.retry_perturbation_std, Some(seed)));
        }
    }
    fn assemble_plan(attempt: CandidateAttempt, time_horizon: f64) -> Result<Plan, PlanningError> {
        let outcome = attempt.outcome
            .ok_or_else(|| PlanningError::new_generic_error_str("candidate without a solve cannot become a plan.", file!(), line!()))?;
        Plan::new(outcome.segments, attempt.sequence, attempt.result, &outcome.diagnostics, attempt.attempt + 1, time_horizon, outcome.solution)
    }
    fn transition(&self, state: &mut CoordinatorState, to: CoordinatorState, statistics: &mut PlanningStatistics, start: Instant) {
        debug!(from = ?*state, to = ?to, "coordinator state transition");
        statistics.transitions.push(StateTransition { from: *state, to, num_attempts: statistics.num_attempts, elapsed: start.elapsed() });
        *state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonlinear_optimization::{MockNumericalSolver, SolverExitStatus, SolverOutput};
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    fn coordinator(solver: MockNumericalSolver) -> PlanCoordinator {
        PlanCoordinator::new(Arc::new(PlanarSceneModel::new_test_pusher_slider_scene()), Arc::new(solver))
    }

    #[test]
    fn zero_deadline_dispatches_nothing() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().times(0);
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.config.time_budget = Some(Duration::from_secs(0));
        let (outcome, statistics) = coordinator(solver).plan_with_statistics(&request).unwrap();
        assert_eq!(outcome, PlanOutcome::Exhausted(None));
        assert_eq!(statistics.num_attempts, 0);
        assert_eq!(statistics.transitions.last().unwrap().to, CoordinatorState::Exhausted);
    }

    #[test]
    fn failed_solves_are_retried_then_rejected() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().times(6).returning(|_, _, _| Err(PlanningError::new_solve_error("diverged", file!(), line!())));
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.config.max_attempts = 3;
        request.config.max_solve_retries = 1;
        let (outcome, statistics) = coordinator(solver).plan_with_statistics(&request).unwrap();
        assert_eq!(outcome, PlanOutcome::Exhausted(None));
        assert_eq!(statistics.num_solver_calls, 6);
        assert_eq!(statistics.num_retries, 3);
        assert_eq!(statistics.num_solver_errors, 3);
    }

    #[test]
    fn fail_policy_surfaces_exhaustion() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().returning(|_, _, _| Err(PlanningError::new_solve_error("diverged", file!(), line!())));
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.config.max_attempts = 2;
        request.config.max_solve_retries = 0;
        request.config.exhaustion_policy = ExhaustionPolicy::Fail;
        let r = coordinator(solver).plan(&request);
        assert!(matches!(r, Err(PlanningError::SearchExhausted { attempts: 2 })));
    }

    #[test]
    fn timed_out_solves_are_counted_as_timeouts() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().times(2).returning(|_, x, _| Ok(SolverOutput {
            solution: x.to_vec(),
            exit_status: SolverExitStatus::NotConvergedOutOfTime,
            num_outer_iterations: 1,
            num_inner_iterations: 10,
            solve_time: Duration::from_millis(5),
            cost: 0.0
        }));
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.config.max_attempts = 2;
        request.config.max_solve_retries = 0;
        let (_, statistics) = coordinator(solver).plan_with_statistics(&request).unwrap();
        assert_eq!(statistics.num_solver_timeouts, 2);
        assert_eq!(statistics.num_infeasible, 0);
        assert_eq!(statistics.num_solver_errors, 0);
    }

    #[test]
    fn guided_relaxation_is_counted_and_bounded_by_the_deadline() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().times(1).returning(|_, x, params| {
            // a solver that always uses its whole time limit
            std::thread::sleep(params.max_time.unwrap_or(Duration::from_secs(2)).min(Duration::from_secs(2)));
            Ok(SolverOutput {
                solution: x.to_vec(),
                exit_status: SolverExitStatus::NotConvergedOutOfTime,
                num_outer_iterations: 1,
                num_inner_iterations: 1,
                solve_time: params.max_time.unwrap_or(Duration::ZERO),
                cost: 0.0
            })
        });
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.config.search_strategy = SearchStrategy::GuidedSearch;
        request.config.time_budget = Some(Duration::from_millis(100));
        request.config.solver_parameters.max_time = Some(Duration::from_secs(10));
        let (outcome, statistics) = coordinator(solver).plan_with_statistics(&request).unwrap();
        assert_eq!(outcome, PlanOutcome::Exhausted(None));
        assert_eq!(statistics.num_attempts, 0);
        assert_eq!(statistics.num_solver_calls, 1);
        assert!(statistics.elapsed < Duration::from_secs(1), "{:?}", statistics.elapsed);
    }

    #[test]
    fn unknown_active_pair_fails_before_search() {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().times(0);
        let mut request = PlanningRequest::new_test_pusher_slider_request(4);
        request.active_pairs = Some(vec!["no_such_pair".to_string()]);
        assert!(matches!(coordinator(solver).plan(&request), Err(PlanningError::ModelError(_))));
    }
}
