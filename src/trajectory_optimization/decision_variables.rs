use std::collections::BTreeMap;
use crate::nonlinear_optimization::program_terms::PlanarPoseSource;
use crate::rigid_body_model::{BodyKind, PlanarPose, PlanarTwist, RigidBodyModel, RigidBodyState};
use crate::utils::utils_errors::PlanningError;

/// Index layout of the decision vector on the shared knot grid.
///
/// Each knot holds, in order, the poses of every movable body (3 each), the velocity
/// controls of every actuated body (3 each) and `(lambda_n, lambda_t)` for every active
/// pair.  The layout only depends on the model, the active pairs and the horizon, never on
/// the mode sequence, so any decision vector of a request is a valid initial guess for any
/// of its candidates.  The relaxed program appends one activation per pair and knot after
/// the knot blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionVariableLayout {
    num_knots: usize,
    per_knot: usize,
    pose_offsets: BTreeMap<usize, usize>,
    control_offsets: BTreeMap<usize, usize>,
    force_offsets: BTreeMap<usize, usize>,
    static_poses: BTreeMap<usize, [f64; 3]>,
    with_activations: bool
}
impl DecisionVariableLayout {
    pub fn new(model: &dyn RigidBodyModel, active_pairs: &[usize], horizon_steps: usize) -> Result<Self, PlanningError> {
        let mut pose_offsets = BTreeMap::new();
        let mut control_offsets = BTreeMap::new();
        let mut force_offsets = BTreeMap::new();
        let mut static_poses = BTreeMap::new();

        let mut offset = 0;
        for (body_idx, body) in model.bodies().iter().enumerate() {
            match &body.kind {
                BodyKind::Static { pose } => { static_poses.insert(body_idx, pose.to_array()); }
                _ => {
                    pose_offsets.insert(body_idx, offset);
                    offset += 3;
                }
            }
        }
        for (body_idx, body) in model.bodies().iter().enumerate() {
            if body.kind.is_actuated() {
                control_offsets.insert(body_idx, offset);
                offset += 3;
            }
        }
        for pair_idx in active_pairs {
            model.contact_pair(*pair_idx)?;
            force_offsets.insert(*pair_idx, offset);
            offset += 2;
        }

        Ok(Self {
            num_knots: horizon_steps + 1,
            per_knot: offset,
            pose_offsets,
            control_offsets,
            force_offsets,
            static_poses,
            with_activations: false
        })
    }
    pub fn new_relaxed(model: &dyn RigidBodyModel, active_pairs: &[usize], horizon_steps: usize) -> Result<Self, PlanningError> {
        let mut out = Self::new(model, active_pairs, horizon_steps)?;
        out.with_activations = true;
        Ok(out)
    }
    pub fn num_knots(&self) -> usize {
        self.num_knots
    }
    pub fn num_knot_variables(&self) -> usize {
        self.num_knots * self.per_knot
    }
    pub fn num_variables(&self) -> usize {
        let activations = if self.with_activations { self.num_knots * self.force_offsets.len() } else { 0 };
        self.num_knot_variables() + activations
    }
    pub fn movable_bodies(&self) -> Vec<usize> {
        self.pose_offsets.keys().cloned().collect()
    }
    pub fn actuated_bodies(&self) -> Vec<usize> {
        self.control_offsets.keys().cloned().collect()
    }
    pub fn active_pairs(&self) -> Vec<usize> {
        self.force_offsets.keys().cloned().collect()
    }
    pub fn pose_idxs(&self, body_idx: usize, knot: usize) -> Option<[usize; 3]> {
        let o = self.pose_offsets.get(&body_idx)?;
        let base = knot * self.per_knot + o;
        Some([base, base + 1, base + 2])
    }
    pub fn control_idxs(&self, body_idx: usize, knot: usize) -> Option<[usize; 3]> {
        let o = self.control_offsets.get(&body_idx)?;
        let base = knot * self.per_knot + o;
        Some([base, base + 1, base + 2])
    }
    /// `(lambda_n, lambda_t)` indices.
    pub fn force_idxs(&self, pair_idx: usize, knot: usize) -> Option<(usize, usize)> {
        let o = self.force_offsets.get(&pair_idx)?;
        let base = knot * self.per_knot + o;
        Some((base, base + 1))
    }
    pub fn activation_idx(&self, pair_idx: usize, knot: usize) -> Option<usize> {
        if !self.with_activations { return None; }
        let p = self.force_offsets.keys().position(|k| *k == pair_idx)?;
        Some(self.num_knot_variables() + knot * self.force_offsets.len() + p)
    }
    pub fn pose_source(&self, body_idx: usize, knot: usize) -> Result<PlanarPoseSource, PlanningError> {
        if let Some(p) = self.static_poses.get(&body_idx) { return Ok(PlanarPoseSource::Fixed(*p)); }
        self.pose_idxs(body_idx, knot)
            .map(PlanarPoseSource::Variables)
            .ok_or_else(|| PlanningError::new_model_error(&format!("body {} has no pose variables.", body_idx), file!(), line!()))
    }
    pub fn read_pose(&self, x: &[f64], body_idx: usize, knot: usize) -> Result<[f64; 3], PlanningError> {
        return match self.pose_source(body_idx, knot)? {
            PlanarPoseSource::Fixed(p) => { Ok(p) }
            PlanarPoseSource::Variables(i) => {
                PlanningError::new_check_for_idx_out_of_bound_error(i[2], x.len(), file!(), line!())?;
                Ok([x[i[0]], x[i[1]], x[i[2]]])
            }
        }
    }
    /// Full state (every body, static ones included) at a knot, with backward-difference
    /// velocities.
    pub fn read_state(&self, x: &[f64], knot: usize, dt: f64) -> Result<RigidBodyState, PlanningError> {
        let num_bodies = self.pose_offsets.len() + self.static_poses.len();
        let mut poses = vec![];
        let mut velocities = vec![];
        for body_idx in 0..num_bodies {
            let p = self.read_pose(x, body_idx, knot)?;
            poses.push(PlanarPose::from_array(&p));
            if knot == 0 {
                velocities.push(PlanarTwist::zero());
            } else {
                let prev = self.read_pose(x, body_idx, knot - 1)?;
                velocities.push(PlanarTwist::new((p[0] - prev[0]) / dt, (p[1] - prev[1]) / dt, (p[2] - prev[2]) / dt));
            }
        }
        RigidBodyState::new(poses, Some(velocities))
    }
    /// Copies the knot block of `x` into a vector sized for this layout.  Used to seed the
    /// relaxed program from a regular decision vector and back.
    pub fn resize_decision_vector(&self, x: &[f64], fill: f64) -> Vec<f64> {
        let mut out = vec![fill; self.num_variables()];
        let n = self.num_knot_variables().min(x.len());
        out[..n].copy_from_slice(&x[..n]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    #[test]
    fn layout_indices() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let l = DecisionVariableLayout::new(&model, &[0], 4).unwrap();
        // pusher pose, slider pose, pusher control, one force pair
        assert_eq!(l.num_variables(), 5 * 11);
        assert_eq!(l.pose_idxs(1, 2), Some([25, 26, 27]));
        assert_eq!(l.control_idxs(0, 1), Some([17, 18, 19]));
        assert_eq!(l.control_idxs(1, 1), None);
        assert_eq!(l.force_idxs(0, 0), Some((9, 10)));
        assert_eq!(l.activation_idx(0, 0), None);

        let r = DecisionVariableLayout::new_relaxed(&model, &[0], 4).unwrap();
        assert_eq!(r.num_variables(), 5 * 11 + 5);
        assert_eq!(r.activation_idx(0, 3), Some(58));
        assert_eq!(r.resize_decision_vector(&vec![1.0; 55], 0.5)[56], 0.5);
    }

    #[test]
    fn read_state_differences_poses() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let l = DecisionVariableLayout::new(&model, &[0], 1).unwrap();
        let mut x = vec![0.0; l.num_variables()];
        x[l.pose_idxs(1, 1).unwrap()[0]] = 0.5;
        let s = l.read_state(&x, 1, 0.5).unwrap();
        assert_eq!(s.velocity(1).unwrap().vx, 1.0);
        assert_eq!(s.pose(1).unwrap().x, 0.5);
    }
}
