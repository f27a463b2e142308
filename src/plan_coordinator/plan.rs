use std::collections::BTreeMap;
use std::time::Duration;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use crate::contact_modes::ContactMode;
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::nonlinear_optimization::SolverResult;
use crate::rigid_body_model::{PlanarPose, PlanarTwist, RigidBodyState};
use crate::trajectory_optimization::SolveDiagnostics;
use crate::trajectory_optimization::trajectory_segment::{ContactForce, KnotPoint, TrajectorySegment};
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::interpolation::SimpleInterpolationUtils;
use crate::utils::utils_traits::SaveAndLoadable;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentDiagnostics {
    pub segment_idx: usize,
    pub mode: ContactMode,
    pub num_steps: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub residual: f64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanDiagnostics {
    pub result: SolverResult,
    pub cost: f64,
    pub residual: f64,
    pub solve_time: Duration,
    pub num_outer_iterations: usize,
    pub num_inner_iterations: usize,
    /// Candidates pulled from the sequencer up to and including this one.
    pub num_attempts: usize
}

/// One time sample of a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanSample {
    pub time: f64,
    pub poses: Vec<PlanarPose>,
    pub controls: BTreeMap<usize, PlanarTwist>,
    pub contact_forces: BTreeMap<usize, ContactForce>
}

/// A solved trajectory for one mode sequence.  Immutable once returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    segments: Vec<TrajectorySegment>,
    mode_sequence: ModeSequence,
    diagnostics: PlanDiagnostics,
    segment_diagnostics: Vec<SegmentDiagnostics>,
    best_effort: bool,
    time_horizon: f64,
    solution: Vec<f64>
}
impl Plan {
    pub fn new(segments: Vec<TrajectorySegment>,
               mode_sequence: ModeSequence,
               result: SolverResult,
               solve_diagnostics: &SolveDiagnostics,
               num_attempts: usize,
               time_horizon: f64,
               solution: Vec<f64>) -> Result<Self, PlanningError> {
        if segments.len() != mode_sequence.num_segments() {
            return Err(PlanningError::new_generic_error_str(&format!("{} segments given for a sequence of {} modes.", segments.len(), mode_sequence.num_segments()), file!(), line!()));
        }
        let mut segment_diagnostics = vec![];
        for (i, s) in segments.iter().enumerate() {
            segment_diagnostics.push(SegmentDiagnostics {
                segment_idx: i,
                mode: s.mode().clone(),
                num_steps: mode_sequence.segments()[i].num_steps,
                start_time: s.start_time(),
                end_time: s.end_time(),
                residual: solve_diagnostics.segment_residuals.get(i).cloned().unwrap_or(f64::NAN)
            });
        }
        Ok(Self {
            segments,
            mode_sequence,
            diagnostics: PlanDiagnostics {
                result,
                cost: solve_diagnostics.cost,
                residual: solve_diagnostics.residual,
                solve_time: solve_diagnostics.solve_time,
                num_outer_iterations: solve_diagnostics.num_outer_iterations,
                num_inner_iterations: solve_diagnostics.num_inner_iterations,
                num_attempts
            },
            segment_diagnostics,
            best_effort: false,
            time_horizon,
            solution
        })
    }
    pub fn into_best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
    pub fn segments(&self) -> &Vec<TrajectorySegment> {
        &self.segments
    }
    pub fn mode_sequence(&self) -> &ModeSequence {
        &self.mode_sequence
    }
    pub fn diagnostics(&self) -> &PlanDiagnostics {
        &self.diagnostics
    }
    pub fn segment_diagnostics(&self) -> &Vec<SegmentDiagnostics> {
        &self.segment_diagnostics
    }
    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }
    pub fn residual(&self) -> f64 {
        self.diagnostics.residual
    }
    pub fn time_horizon(&self) -> f64 {
        self.time_horizon
    }
    /// The decision vector the plan was read from.  Valid as a warm start for any candidate of
    /// the same request.
    pub fn solution(&self) -> &Vec<f64> {
        &self.solution
    }
    /// Every knot once, in time order.  Boundary knots are taken from the later segment.
    pub fn knots(&self) -> Vec<&KnotPoint> {
        let mut out_vec: Vec<&KnotPoint> = vec![];
        for s in &self.segments {
            for (i, k) in s.knots().iter().enumerate() {
                if i == 0 && !out_vec.is_empty() { out_vec.pop(); }
                out_vec.push(k);
            }
        }
        out_vec
    }
    pub fn final_state(&self) -> Option<&RigidBodyState> {
        self.knots().last().map(|k| &k.state)
    }
    /// Samples at the knot time step.
    pub fn samples(&self) -> Vec<PlanSample> {
        self.knots().iter().map(|k| PlanSample {
            time: k.time,
            poses: k.state.poses().clone(),
            controls: k.controls.clone(),
            contact_forces: k.contact_forces.clone()
        }).collect()
    }
    /// Samples every `dt` seconds by first-order hold between knots.
    pub fn resample(&self, dt: f64) -> Result<Vec<PlanSample>, PlanningError> {
        if !(dt > 0.0) {
            return Err(PlanningError::new_config_error(&format!("resampling step must be positive, got {}.", dt), file!(), line!()));
        }
        let samples = self.samples();
        let template = match samples.first() {
            Some(s) => { s.clone() }
            None => { return Ok(vec![]); }
        };

        let flattened: Vec<DVector<f64>> = samples.iter().map(|s| {
            let mut v = vec![];
            for p in &s.poses { v.extend_from_slice(&p.to_array()); }
            for c in s.controls.values() { v.extend_from_slice(&c.to_array()); }
            for f in s.contact_forces.values() { v.push(f.normal); v.push(f.tangential); }
            DVector::from_vec(v)
        }).collect();

        let held = SimpleInterpolationUtils::first_order_hold(&flattened, template.time, self.time_horizon, dt);
        let mut out_vec = vec![];
        for (time, v) in held {
            let mut i = 0;
            let mut poses = vec![];
            for _ in 0..template.poses.len() {
                poses.push(PlanarPose::new(v[i], v[i + 1], v[i + 2]));
                i += 3;
            }
            let mut controls = BTreeMap::new();
            for body_idx in template.controls.keys() {
                controls.insert(*body_idx, PlanarTwist::new(v[i], v[i + 1], v[i + 2]));
                i += 3;
            }
            let mut contact_forces = BTreeMap::new();
            for pair_idx in template.contact_forces.keys() {
                contact_forces.insert(*pair_idx, ContactForce::new(v[i], v[i + 1]));
                i += 2;
            }
            out_vec.push(PlanSample { time, poses, controls, contact_forces });
        }
        Ok(out_vec)
    }
}
impl SaveAndLoadable for Plan { }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact_modes::PairMode;

    fn knot(time: f64, x: f64, force: f64) -> KnotPoint {
        KnotPoint {
            time,
            state: RigidBodyState::new(vec![PlanarPose::new(x, 0.0, 0.0)], None).unwrap(),
            controls: [(0, PlanarTwist::new(1.0, 0.0, 0.0))].into_iter().collect(),
            contact_forces: [(0, ContactForce::new(force, 0.0))].into_iter().collect()
        }
    }

    fn plan() -> Plan {
        let sep = ContactMode::new_all_separated(&[0]);
        let stick = ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]);
        let sequence = ModeSequence::new(vec![(sep.clone(), 1), (stick.clone(), 1)], 2).unwrap();
        let segments = vec![
            TrajectorySegment::new(0, sep, vec![knot(0.0, 0.0, 0.0), knot(0.5, 0.5, 0.0)]),
            TrajectorySegment::new(1, stick, vec![knot(0.5, 0.5, 0.0), knot(1.0, 1.0, 2.0)])
        ];
        let d = SolveDiagnostics {
            cost: 1.0,
            residual: 1e-6,
            initial_residual: 1.0,
            segment_residuals: vec![1e-6, 0.0],
            exit_status: None,
            num_outer_iterations: 2,
            num_inner_iterations: 20,
            solve_time: Duration::from_millis(3),
            kept_initial_guess: false
        };
        Plan::new(segments, sequence, SolverResult::Optimal, &d, 4, 1.0, vec![]).unwrap()
    }

    #[test]
    fn boundary_knots_are_shared() {
        let p = plan();
        let times: Vec<f64> = p.knots().iter().map(|k| k.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0]);
        assert_eq!(p.segment_diagnostics()[1].start_time, 0.5);
        assert_eq!(p.final_state().unwrap().pose(0).unwrap().x, 1.0);
        assert!(!p.is_best_effort());
        assert!(p.clone().into_best_effort().is_best_effort());
    }

    #[test]
    fn resample_by_first_order_hold() {
        let p = plan();
        let s = p.resample(0.25).unwrap();
        assert_eq!(s.len(), 5);
        assert!((s[1].poses[0].x - 0.25).abs() < 1e-12);
        assert!((s[3].contact_forces[&0].normal - 1.0).abs() < 1e-12);
        assert_eq!(s[4].controls[&0].vx, 1.0);
        assert!(p.resample(0.0).is_err());
    }
}
