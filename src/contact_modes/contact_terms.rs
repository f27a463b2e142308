use std::sync::Arc;
use nalgebra::Vector2;
use crate::nonlinear_optimization::ProgramTerm;
use crate::nonlinear_optimization::program_terms::{LocalPose, LocalVariableMap, PlanarPoseSource};
use crate::rigid_body_model::RigidBodyModel;
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::geometry::{omega_cross_r, perpendicular};

/// `scale * phi(pose_a, pose_b) + sum_j c_j * x_j + constant`, where `phi` is the signed
/// distance of a contact pair.  The linear part carries the activation variable of the
/// relaxed program.
#[derive(Clone)]
pub struct SignedDistanceTerm {
    model: Arc<dyn RigidBodyModel>,
    pair_idx: usize,
    indices: Vec<usize>,
    pose_a: LocalPose,
    pose_b: LocalPose,
    scale: f64,
    linear_part: Vec<(usize, f64)>,
    constant: f64
}
impl SignedDistanceTerm {
    pub fn new(model: Arc<dyn RigidBodyModel>, pair_idx: usize, pose_a: &PlanarPoseSource, pose_b: &PlanarPoseSource, scale: f64) -> Self {
        Self::new_with_linear_part(model, pair_idx, pose_a, pose_b, scale, &[], 0.0)
    }
    pub fn new_with_linear_part(model: Arc<dyn RigidBodyModel>, pair_idx: usize, pose_a: &PlanarPoseSource, pose_b: &PlanarPoseSource, scale: f64, linear_part: &[(usize, f64)], constant: f64) -> Self {
        let mut map = LocalVariableMap::new();
        let pose_a = map.register_pose(pose_a);
        let pose_b = map.register_pose(pose_b);
        let linear_part = linear_part.iter().map(|(global_idx, c)| (map.register(*global_idx), *c)).collect();
        Self {
            model,
            pair_idx,
            indices: map.into_indices(),
            pose_a,
            pose_b,
            scale,
            linear_part,
            constant
        }
    }
}
impl ProgramTerm for SignedDistanceTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let phi = match self.model.signed_distance(self.pair_idx, &self.pose_a.read(local), &self.pose_b.read(local)) {
            Ok(phi) => { phi }
            Err(_) => { return f64::NAN; }
        };
        let mut out = self.scale * phi + self.constant;
        for (l, c) in &self.linear_part { out += c * local[*l]; }
        out
    }
}

/// Tangential velocity of body B relative to body A at the contact point, using the
/// backward difference of the poses over one knot interval.  The tangent is the
/// counter-clockwise perpendicular of the contact normal (A towards B).
pub fn tangential_velocity(model: &dyn RigidBodyModel,
                           pair_idx: usize,
                           pose_a: &[f64; 3],
                           pose_b: &[f64; 3],
                           previous_pose_a: &[f64; 3],
                           previous_pose_b: &[f64; 3],
                           dt: f64) -> Result<f64, PlanningError> {
    let q = model.contact_query(pair_idx, pose_a, pose_b)?;
    let c = q.contact_point();
    let t = perpendicular(&q.normal);

    let point_velocity = |pose: &[f64; 3], previous: &[f64; 3]| -> Vector2<f64> {
        let v = Vector2::new(pose[0] - previous[0], pose[1] - previous[1]) / dt;
        let omega = (pose[2] - previous[2]) / dt;
        v + omega_cross_r(omega, &(c - Vector2::new(pose[0], pose[1])))
    };

    let relative = point_velocity(pose_b, previous_pose_b) - point_velocity(pose_a, previous_pose_a);
    Ok(t.dot(&relative))
}

/// `scale * v_t` at one knot.
#[derive(Clone)]
pub struct TangentialVelocityTerm {
    model: Arc<dyn RigidBodyModel>,
    pair_idx: usize,
    indices: Vec<usize>,
    pose_a: LocalPose,
    pose_b: LocalPose,
    previous_pose_a: LocalPose,
    previous_pose_b: LocalPose,
    dt: f64,
    scale: f64
}
impl TangentialVelocityTerm {
    pub fn new(model: Arc<dyn RigidBodyModel>,
               pair_idx: usize,
               poses: (&PlanarPoseSource, &PlanarPoseSource),
               previous_poses: (&PlanarPoseSource, &PlanarPoseSource),
               dt: f64,
               scale: f64) -> Self {
        let mut map = LocalVariableMap::new();
        let pose_a = map.register_pose(poses.0);
        let pose_b = map.register_pose(poses.1);
        let previous_pose_a = map.register_pose(previous_poses.0);
        let previous_pose_b = map.register_pose(previous_poses.1);
        Self {
            model,
            pair_idx,
            indices: map.into_indices(),
            pose_a,
            pose_b,
            previous_pose_a,
            previous_pose_b,
            dt,
            scale
        }
    }
}
impl ProgramTerm for TangentialVelocityTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let v_t = tangential_velocity(&*self.model,
                                      self.pair_idx,
                                      &self.pose_a.read(local),
                                      &self.pose_b.read(local),
                                      &self.previous_pose_a.read(local),
                                      &self.previous_pose_b.read(local),
                                      self.dt);
        match v_t {
            Ok(v) => { self.scale * v }
            Err(_) => { f64::NAN }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    #[test]
    fn tangential_velocity_of_sideways_slide() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        // pusher touching the left face of the slider, slider moves +y by 0.1 in dt = 0.1
        let v = tangential_velocity(&model, 0, &[-0.15, 0.0, 0.0], &[0.0, 0.1, 0.0], &[-0.15, 0.0, 0.0], &[0.0, 0.0, 0.0], 0.1).unwrap();
        // normal is +x, tangent is +y
        assert!((v - 1.0).abs() < 1e-6, "{}", v);
    }

    #[test]
    fn signed_distance_term_with_activation() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let term = SignedDistanceTerm::new_with_linear_part(model, 0, &PlanarPoseSource::Variables([0, 1, 2]), &PlanarPoseSource::Fixed([0.0, 0.0, 0.0]), 1.0, &[(3, 2.0)], -2.0);
        assert_eq!(term.variable_indices(), &[0, 1, 2, 3]);
        // phi = 0.35, alpha = 0.5: 0.35 - (1 - 0.5) * 2
        let v = term.evaluate(&[-0.5, 0.0, 0.0, 0.5]);
        assert!((v - (0.35 - 1.0)).abs() < 1e-9, "{}", v);
        let g = term.local_gradient(&[-0.5, 0.0, 0.0, 0.5]);
        assert!((g[0] + 1.0).abs() < 1e-5);
        assert!((g[3] - 2.0).abs() < 1e-6);
    }
}
