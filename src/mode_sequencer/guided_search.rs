use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use ordered_float::OrderedFloat;
use tracing::{debug, warn};
use crate::contact_modes::{ContactMode, PairMode, SlidingDirection};
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::mode_sequencer::{all_contact_modes, ModeSequencer, SequenceLimits, SequencerOutput};
use crate::planning_request::GuidedSearchParameters;
use crate::trajectory_optimization::{RelaxationOutcome, TrajectorySegmentOptimizer};
use crate::utils::utils_errors::PlanningError;

/// Relaxation-guided search.
///
/// On the first pull the contact-activation relaxation is solved and rounded into a mode
/// sequence, which is handed out first (after the seed, if any).  After that, candidates come
/// from a best-first frontier ordered by per-step distance to the rounded sequence.  The
/// frontier grows with the neighbors of the rounded sequence and of every rejected candidate,
/// and at most `local_search_budget` frontier candidates are handed out.
///
/// The relaxation solve only gets the time left before `deadline`, and none at all once it
/// has passed.
pub struct GuidedSearchSequencer {
    optimizer: Arc<TrajectorySegmentOptimizer>,
    deadline: Option<Instant>,
    num_relaxation_solves: usize,
    parameters: GuidedSearchParameters,
    limits: SequenceLimits,
    allow_sliding: bool,
    modes: Vec<ContactMode>,
    seed: Option<ModeSequence>,
    seed_pending: bool,
    rounded: Option<ModeSequence>,
    rounded_pending: bool,
    frontier: BinaryHeap<Reverse<(OrderedFloat<f64>, usize, ModeSequence)>>,
    visited: HashSet<ModeSequence>,
    num_pushed: usize,
    num_local_search_candidates: usize
}
impl GuidedSearchSequencer {
    pub fn new(optimizer: Arc<TrajectorySegmentOptimizer>, seed: Option<ModeSequence>, deadline: Option<Instant>) -> Self {
        let request = optimizer.request().clone();
        let seed_pending = seed.is_some();
        Self {
            parameters: request.config.guided_search.clone(),
            limits: SequenceLimits::new_from_request(&request),
            allow_sliding: request.config.allow_sliding,
            modes: all_contact_modes(&request.active_pairs, request.config.allow_sliding),
            optimizer,
            deadline,
            num_relaxation_solves: 0,
            seed,
            seed_pending,
            rounded: None,
            rounded_pending: true,
            frontier: BinaryHeap::new(),
            visited: HashSet::new(),
            num_pushed: 0,
            num_local_search_candidates: 0
        }
    }
    /// Rounded sequence of the relaxation, solving it on first use.  `None` if the deadline
    /// passed before the relaxation could be solved.
    pub fn rounded_sequence(&mut self) -> Result<Option<ModeSequence>, PlanningError> {
        if let Some(r) = &self.rounded { return Ok(Some(r.clone())); }
        if self.deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            debug!("deadline passed before the relaxation was solved");
            return Ok(None);
        }
        self.num_relaxation_solves += 1;
        let relaxation = self.optimizer.solve_relaxation_before(self.deadline)?;
        if relaxation.result.is_failure() {
            warn!(result = ?relaxation.result, "relaxation did not converge to a feasible point; rounding it anyway");
        }
        let rounded = round_relaxation(&relaxation, &self.optimizer.request().active_pairs, &self.parameters, self.allow_sliding, &self.limits)?;
        debug!(rounded = %rounded, "rounded relaxation");
        self.rounded = Some(rounded.clone());
        Ok(Some(rounded))
    }
    fn push_neighbors(&mut self, center: &ModeSequence) {
        let rounded = match &self.rounded {
            Some(r) => { r.clone() }
            None => { return; }
        };
        for n in neighbors(center, &self.modes, &self.limits, self.parameters.neighborhood_size) {
            if self.visited.contains(&n) { continue; }
            let priority = OrderedFloat(n.per_step_distance(&rounded) as f64 + 1e-3 * n.unevenness() as f64);
            self.visited.insert(n.clone());
            self.frontier.push(Reverse((priority, self.num_pushed, n)));
            self.num_pushed += 1;
        }
    }
}
impl ModeSequencer for GuidedSearchSequencer {
    fn next_candidate(&mut self) -> Result<SequencerOutput, PlanningError> {
        if self.seed_pending {
            self.seed_pending = false;
            if let Some(seed) = self.seed.clone() {
                if self.limits.admits(&seed) {
                    self.visited.insert(seed.clone());
                    return Ok(SequencerOutput::Candidate(seed));
                }
            }
        }

        if self.rounded_pending {
            self.rounded_pending = false;
            let rounded = match self.rounded_sequence()? {
                Some(r) => { r }
                None => { return Ok(SequencerOutput::Exhausted); }
            };
            let admitted = self.limits.admits(&rounded);
            let fresh = admitted && self.visited.insert(rounded.clone());
            self.push_neighbors(&rounded);
            if fresh { return Ok(SequencerOutput::Candidate(rounded)); }
            if !admitted { debug!(rounded = %rounded, "rounded sequence breaks the search limits and is only used to seed the local search"); }
        }

        if self.num_local_search_candidates >= self.parameters.local_search_budget { return Ok(SequencerOutput::Exhausted); }
        return match self.frontier.pop() {
            Some(Reverse((_, _, s))) => {
                self.num_local_search_candidates += 1;
                Ok(SequencerOutput::Candidate(s))
            }
            None => { Ok(SequencerOutput::Exhausted) }
        }
    }
    fn restart(&mut self) {
        self.seed_pending = self.seed.is_some();
        self.rounded_pending = true;
        self.frontier.clear();
        self.visited.clear();
        self.num_pushed = 0;
        self.num_local_search_candidates = 0;
    }
    fn report_outcome(&mut self, sequence: &ModeSequence, accepted: bool) {
        if !accepted { self.push_neighbors(sequence); }
    }
    fn num_solver_calls(&self) -> usize {
        self.num_relaxation_solves
    }
}

/// Rounds the relaxation step by step: a pair is in contact over step `k` if its activation at
/// knot `k + 1` reaches the rounding threshold; in contact, it slides if `|v_t|` exceeds the
/// sliding velocity threshold and sticks otherwise.  The per-step modes are then repaired
/// into an admissible sequence.
pub fn round_relaxation(relaxation: &RelaxationOutcome, pair_idxs: &[usize], parameters: &GuidedSearchParameters, allow_sliding: bool, limits: &SequenceLimits) -> Result<ModeSequence, PlanningError> {
    let mut per_step = vec![];
    for step in 0..limits.horizon_steps {
        let knot = step + 1;
        let activations = relaxation.activations.get(knot)
            .ok_or_else(|| PlanningError::new_idx_out_of_bound_error(knot, relaxation.activations.len(), file!(), line!()))?;
        let velocities = relaxation.tangential_velocities.get(knot)
            .ok_or_else(|| PlanningError::new_idx_out_of_bound_error(knot, relaxation.tangential_velocities.len(), file!(), line!()))?;
        let mut modes = vec![];
        for pair_idx in pair_idxs {
            let alpha = activations.get(pair_idx).cloned().unwrap_or(0.0);
            let v_t = velocities.get(pair_idx).cloned().unwrap_or(0.0);
            let m = if alpha < parameters.rounding_threshold { PairMode::Separated }
                else if allow_sliding && v_t.abs() > parameters.sliding_velocity_threshold { PairMode::Sliding(SlidingDirection::from_velocity(v_t)) }
                else { PairMode::Sticking };
            modes.push((*pair_idx, m));
        }
        per_step.push(ContactMode::new_from_pairs(&modes));
    }
    repair_per_step_modes(&per_step, limits)
}

/// Merges segments until every segment has at least `min_segment_steps` steps and there are
/// at most `max_mode_switches` switches.  The shortest offending segment is folded into its
/// predecessor (or successor, for the first segment) each round.  A horizon shorter than
/// `min_segment_steps` still comes back as one segment, which the limits do not admit.
pub fn repair_per_step_modes(per_step: &[ContactMode], limits: &SequenceLimits) -> Result<ModeSequence, PlanningError> {
    let mut segments = ModeSequence::new_from_per_step_modes(per_step)?.segments().iter().map(|s| (s.mode.clone(), s.num_steps)).collect::<Vec<(ContactMode, usize)>>();

    while segments.len() > 1 {
        let too_short = segments.iter().enumerate().filter(|(_, s)| s.1 < limits.min_segment_steps).min_by_key(|(_, s)| s.1).map(|(i, _)| i);
        let idx = match too_short {
            Some(i) => { i }
            None => {
                if segments.len() - 1 <= limits.max_mode_switches { break; }
                match segments.iter().enumerate().min_by_key(|(_, s)| s.1) {
                    Some((i, _)) => { i }
                    None => { break; }
                }
            }
        };
        let (_, num_steps) = segments.remove(idx);
        let target = if idx > 0 { idx - 1 } else { 0 };
        segments[target].1 += num_steps;

        let mut merged: Vec<(ContactMode, usize)> = vec![];
        for (m, n) in segments.drain(..) {
            match merged.last_mut() {
                Some(last) if last.0 == m => { last.1 += n; }
                _ => { merged.push((m, n)); }
            }
        }
        segments = merged;
    }

    ModeSequence::new(segments, limits.horizon_steps)
}

/// Boundary shifts of up to `neighborhood_size` steps, single-segment mode changes, and
/// merges of adjacent segments; only admissible sequences are returned.
pub fn neighbors(sequence: &ModeSequence, modes: &[ContactMode], limits: &SequenceLimits, neighborhood_size: usize) -> Vec<ModeSequence> {
    let mut out_vec = vec![];
    let counts = sequence.step_counts();
    let segment_modes: Vec<ContactMode> = sequence.segments().iter().map(|s| s.mode.clone()).collect();

    let mut push = |candidate: Result<ModeSequence, PlanningError>| {
        if let Ok(c) = candidate {
            if &c != sequence && limits.admits(&c) && !out_vec.contains(&c) { out_vec.push(c); }
        }
    };

    for boundary in 0..counts.len().saturating_sub(1) {
        for shift in 1..=neighborhood_size {
            for direction in [-1i64, 1] {
                let left = counts[boundary] as i64 + direction * shift as i64;
                let right = counts[boundary + 1] as i64 - direction * shift as i64;
                if left < 1 || right < 1 { continue; }
                let mut new_counts = counts.clone();
                new_counts[boundary] = left as usize;
                new_counts[boundary + 1] = right as usize;
                push(ModeSequence::new(segment_modes.iter().cloned().zip(new_counts.into_iter()).collect(), limits.horizon_steps));
            }
        }
    }

    let per_step: Vec<ContactMode> = sequence.expand_per_step().into_iter().cloned().collect();
    for segment_idx in 0..segment_modes.len() {
        let (start, end) = match sequence.segment_knot_range(segment_idx) {
            Ok(r) => { r }
            Err(_) => { continue; }
        };
        for m in modes {
            if *m == segment_modes[segment_idx] { continue; }
            let mut changed = per_step.clone();
            for step in start..end { changed[step] = m.clone(); }
            push(ModeSequence::new_from_per_step_modes(&changed));
        }
    }

    for boundary in 0..counts.len().saturating_sub(1) {
        let mut merged = segment_modes.iter().cloned().zip(counts.iter().cloned()).collect::<Vec<(ContactMode, usize)>>();
        let (_, n) = merged.remove(boundary + 1);
        merged[boundary].1 += n;
        push(ModeSequence::new(merged, limits.horizon_steps));
    }

    out_vec
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use super::*;
    use std::time::Duration;
    use crate::nonlinear_optimization::{MockNumericalSolver, SolverExitStatus, SolverOutput, SolverResult};
    use crate::planning_request::PlanningRequest;
    use crate::rigid_body_model::RigidBodyModel;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    fn sep() -> ContactMode { ContactMode::new_all_separated(&[0]) }
    fn stick() -> ContactMode { ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]) }
    fn limits() -> SequenceLimits { SequenceLimits { horizon_steps: 6, max_mode_switches: 2, min_segment_steps: 2 } }

    fn echo_optimizer(request: PlanningRequest) -> Arc<TrajectorySegmentOptimizer> {
        let mut solver = MockNumericalSolver::new();
        solver.expect_solve().returning(|_, x, _| Ok(SolverOutput {
            solution: x.to_vec(),
            exit_status: SolverExitStatus::Converged,
            num_outer_iterations: 1,
            num_inner_iterations: 1,
            solve_time: Duration::from_millis(1),
            cost: 0.0
        }));
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let resolved = request.resolve(&*model).unwrap();
        Arc::new(TrajectorySegmentOptimizer::new(model, Arc::new(resolved), Arc::new(solver)).unwrap())
    }

    fn relaxation(alphas: &[f64], velocities: &[f64]) -> RelaxationOutcome {
        RelaxationOutcome {
            result: SolverResult::Optimal,
            solution: vec![],
            activations: alphas.iter().map(|a| [(0, *a)].into_iter().collect::<BTreeMap<usize, f64>>()).collect(),
            tangential_velocities: velocities.iter().map(|v| [(0, *v)].into_iter().collect::<BTreeMap<usize, f64>>()).collect()
        }
    }

    #[test]
    fn rounding_thresholds_activation_and_velocity() {
        let r = relaxation(&[0.0, 0.1, 0.2, 0.9, 0.8, 0.9, 0.7], &[0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);
        let s = round_relaxation(&r, &[0], &GuidedSearchParameters::default(), true, &limits()).unwrap();
        let expected = ModeSequence::new(vec![(sep(), 2), (stick(), 2), (ContactMode::new_from_pairs(&[(0, PairMode::Sliding(SlidingDirection::Positive))]), 2)], 6).unwrap();
        assert_eq!(s, expected);

        let s = round_relaxation(&r, &[0], &GuidedSearchParameters::default(), false, &limits()).unwrap();
        assert_eq!(s, ModeSequence::new(vec![(sep(), 2), (stick(), 4)], 6).unwrap());
    }

    #[test]
    fn repair_folds_short_segments() {
        let per_step = vec![sep(), stick(), stick(), sep(), stick(), stick()];
        let s = repair_per_step_modes(&per_step, &limits()).unwrap();
        assert!(limits().admits(&s), "{}", s);
        assert_eq!(s.total_steps(), 6);

        let too_many = SequenceLimits { max_mode_switches: 0, ..limits() };
        let s = repair_per_step_modes(&[sep(), sep(), sep(), stick(), stick(), stick()], &too_many).unwrap();
        assert_eq!(s.num_segments(), 1);
    }

    #[test]
    fn neighbors_are_admissible_and_distinct() {
        let s = ModeSequence::new(vec![(sep(), 3), (stick(), 3)], 6).unwrap();
        let modes = all_contact_modes(&[0], false);
        let n = neighbors(&s, &modes, &limits(), 1);
        assert!(n.iter().all(|c| limits().admits(c) && *c != s));
        assert!(n.contains(&ModeSequence::new(vec![(sep(), 2), (stick(), 4)], 6).unwrap()));
        assert!(n.contains(&ModeSequence::new(vec![(sep(), 4), (stick(), 2)], 6).unwrap()));
        assert!(n.contains(&ModeSequence::new_single_mode(sep(), 6).unwrap()));
        assert!(n.contains(&ModeSequence::new_single_mode(stick(), 6).unwrap()));
    }

    #[test]
    fn rounded_sequence_outside_the_limits_is_not_handed_out() {
        // one step cannot hold a two-step segment, so nothing is admissible
        let mut request = PlanningRequest::new_test_pusher_slider_request(1);
        request.config.min_segment_steps = 2;
        let mut sequencer = GuidedSearchSequencer::new(echo_optimizer(request), None, None);
        let rounded = sequencer.rounded_sequence().unwrap().unwrap();
        assert!(!sequencer.limits.admits(&rounded));
        assert_eq!(sequencer.next_candidate().unwrap(), SequencerOutput::Exhausted);
        assert_eq!(sequencer.num_solver_calls(), 1);
    }

    #[test]
    fn rounded_sequence_is_handed_out_first_and_counted_once() {
        let mut sequencer = GuidedSearchSequencer::new(echo_optimizer(PlanningRequest::new_test_pusher_slider_request(4)), None, None);
        let first = match sequencer.next_candidate().unwrap() {
            SequencerOutput::Candidate(c) => { c }
            SequencerOutput::Exhausted => { panic!("no candidate") }
        };
        assert_eq!(Some(first), sequencer.rounded.clone());
        sequencer.restart();
        assert!(matches!(sequencer.next_candidate().unwrap(), SequencerOutput::Candidate(_)));
        assert_eq!(sequencer.num_solver_calls(), 1);
    }

    #[test]
    fn passed_deadline_skips_the_relaxation() {
        let deadline = Instant::now();
        let mut sequencer = GuidedSearchSequencer::new(echo_optimizer(PlanningRequest::new_test_pusher_slider_request(4)), None, Some(deadline));
        assert_eq!(sequencer.next_candidate().unwrap(), SequencerOutput::Exhausted);
        assert_eq!(sequencer.num_solver_calls(), 0);
    }
}
