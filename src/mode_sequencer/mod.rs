//! Producers of candidate contact-mode sequences.
//!
//! A `ModeSequencer` is lazy and restartable: candidates are generated only when pulled, in
//! the order the sequencer expects them to succeed, and `restart` rewinds it to its first
//! candidate.  The coordinator reports every verdict back through `report_outcome`.

pub mod enumeration;
pub mod guided_search;

use std::collections::BTreeSet;
use itertools::Itertools;
use crate::contact_modes::{ContactMode, PairMode};
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::planning_request::ResolvedPlanningRequest;
use crate::rigid_body_model::RigidBodyModel;
use crate::utils::utils_errors::PlanningError;

#[derive(Clone, Debug, PartialEq)]
pub enum SequencerOutput {
    Candidate(ModeSequence),
    Exhausted
}

pub trait ModeSequencer: Send {
    fn next_candidate(&mut self) -> Result<SequencerOutput, PlanningError>;
    fn restart(&mut self);
    /// Feedback on a candidate previously handed out.
    fn report_outcome(&mut self, _sequence: &ModeSequence, _accepted: bool) { }
    /// Numerical solves the sequencer ran on its own to produce candidates.
    fn num_solver_calls(&self) -> usize { 0 }
}

/// Structural limits every candidate has to respect.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceLimits {
    pub horizon_steps: usize,
    pub max_mode_switches: usize,
    pub min_segment_steps: usize
}
impl SequenceLimits {
    pub fn new_from_request(request: &ResolvedPlanningRequest) -> Self {
        Self {
            horizon_steps: request.horizon_steps,
            max_mode_switches: request.config.max_mode_switches,
            min_segment_steps: request.config.min_segment_steps
        }
    }
    pub fn admits(&self, sequence: &ModeSequence) -> bool {
        sequence.total_steps() == self.horizon_steps
            && sequence.num_switches() <= self.max_mode_switches
            && sequence.step_counts().iter().all(|n| *n >= self.min_segment_steps)
    }
}

/// Every joint contact mode over `pair_idxs`, in lexicographic rank order.
pub fn all_contact_modes(pair_idxs: &[usize], allow_sliding: bool) -> Vec<ContactMode> {
    if pair_idxs.is_empty() { return vec![ContactMode::new_from_pairs(&[])]; }
    pair_idxs.iter()
        .map(|_| PairMode::all(allow_sliding))
        .multi_cartesian_product()
        .map(|modes| ContactMode::new(pair_idxs.iter().cloned().zip(modes.into_iter()).collect()))
        .collect()
}

/// Active pairs whose signed distance at the start state is above `tolerance`.
pub fn pairs_separated_at_start(model: &dyn RigidBodyModel, request: &ResolvedPlanningRequest, tolerance: f64) -> Result<BTreeSet<usize>, PlanningError> {
    let mut out = BTreeSet::new();
    for pair_idx in &request.active_pairs {
        let pair = model.contact_pair(*pair_idx)?;
        let pose_a = request.start_state.pose(pair.body_a())?.to_array();
        let pose_b = request.start_state.pose(pair.body_b())?.to_array();
        if model.signed_distance(*pair_idx, &pose_a, &pose_b)? > tolerance { out.insert(*pair_idx); }
    }
    Ok(out)
}

/// True if every pair that is separated at the start state starts the sequence separated.
pub fn is_start_consistent(sequence: &ModeSequence, separated_at_start: &BTreeSet<usize>) -> bool {
    is_start_consistent_mode(&sequence.segments()[0].mode, separated_at_start)
}

pub fn is_start_consistent_mode(mode: &ContactMode, separated_at_start: &BTreeSet<usize>) -> bool {
    separated_at_start.iter().all(|p| mode.get(*p).map(|m| !m.is_in_contact()).unwrap_or(true))
}
