use std::sync::Arc;
use nalgebra::{Matrix2, Vector2, Vector3};
use crate::nonlinear_optimization::ProgramTerm;
use crate::nonlinear_optimization::program_terms::{LinearTerm, LocalPose, LocalVariableMap, PlanarPoseSource};
use crate::rigid_body_model::{BodyKind, RigidBodyModel};
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::geometry::{perpendicular, two_d_rotation_matrix_from_angle};

/// Implicit-Euler velocity constraint of an actuated body, one per pose component:
/// `q[k+1] - q[k] - dt * u[k+1]`.
pub fn actuated_dynamics_terms(pose_prev: &[usize; 3], pose_next: &[usize; 3], control_next: &[usize; 3], dt: f64) -> Result<Vec<LinearTerm>, PlanningError> {
    let mut out_vec = vec![];
    for c in 0..3 {
        out_vec.push(LinearTerm::new(vec![pose_next[c], pose_prev[c], control_next[c]], vec![1.0, -1.0, -dt], 0.0)?);
    }
    Ok(out_vec)
}

/// A contact pair acting on the body of a `QuasiStaticDynamicsTerm` at knot `k + 1`.
#[derive(Clone, Debug)]
pub struct DynamicsContact {
    pub pair_idx: usize,
    /// Poses of the pair's body A and body B at knot `k + 1`.
    pub pose_a: PlanarPoseSource,
    pub pose_b: PlanarPoseSource,
    pub normal_force_idx: usize,
    pub tangential_force_idx: usize
}

#[derive(Clone, Debug)]
struct LocalContact {
    pair_idx: usize,
    body_is_b: bool,
    pose_a: LocalPose,
    pose_b: LocalPose,
    normal_force: usize,
    tangential_force: usize
}

/// Quasi-static motion of an unactuated body through its limit surface, for one pose
/// component:
///
/// `q[k+1] - q[k] - dt * A_world(theta[k+1]) * w[k+1]`
///
/// where `A_world` rotates the body-frame diagonal limit surface into the world and `w` is
/// the sum of the contact wrenches on the body about its origin.  A pair pushes its body B
/// with `lambda_n * n + lambda_t * t` and its body A with the opposite force, both applied
/// at the midpoint of the witness points.
#[derive(Clone)]
pub struct QuasiStaticDynamicsTerm {
    model: Arc<dyn RigidBodyModel>,
    component: usize,
    indices: Vec<usize>,
    pose_prev: LocalPose,
    pose_next: LocalPose,
    limit_surface: [f64; 3],
    contacts: Vec<LocalContact>,
    dt: f64
}
impl QuasiStaticDynamicsTerm {
    pub fn new(model: Arc<dyn RigidBodyModel>,
               body_idx: usize,
               component: usize,
               pose_prev: &PlanarPoseSource,
               pose_next: &PlanarPoseSource,
               contacts: &[DynamicsContact],
               dt: f64) -> Result<Self, PlanningError> {
        let limit_surface = match &model.body(body_idx)?.kind {
            BodyKind::Unactuated { limit_surface } => { *limit_surface }
            _ => { return Err(PlanningError::new_model_error(&format!("body {} is not unactuated and has no limit surface.", body_idx), file!(), line!())); }
        };
        if component > 2 {
            return Err(PlanningError::new_idx_out_of_bound_error(component, 3, file!(), line!()));
        }

        let mut map = LocalVariableMap::new();
        let pose_prev = map.register_pose(pose_prev);
        let pose_next = map.register_pose(pose_next);
        let mut local_contacts = vec![];
        for c in contacts {
            let pair = model.contact_pair(c.pair_idx)?;
            if !pair.involves_body(body_idx) {
                return Err(PlanningError::new_model_error(&format!("contact pair {} does not touch body {}.", pair.name(), body_idx), file!(), line!()));
            }
            local_contacts.push(LocalContact {
                pair_idx: c.pair_idx,
                body_is_b: pair.body_b() == body_idx,
                pose_a: map.register_pose(&c.pose_a),
                pose_b: map.register_pose(&c.pose_b),
                normal_force: map.register(c.normal_force_idx),
                tangential_force: map.register(c.tangential_force_idx)
            });
        }

        Ok(Self {
            model,
            component,
            indices: map.into_indices(),
            pose_prev,
            pose_next,
            limit_surface,
            contacts: local_contacts,
            dt
        })
    }
    fn wrench(&self, local: &[f64], body_pose: &[f64; 3]) -> Result<Vector3<f64>, PlanningError> {
        let mut out = Vector3::zeros();
        for c in &self.contacts {
            let q = self.model.contact_query(c.pair_idx, &c.pose_a.read(local), &c.pose_b.read(local))?;
            let point = q.contact_point();
            let force_on_b: Vector2<f64> = local[c.normal_force] * q.normal + local[c.tangential_force] * perpendicular(&q.normal);
            let force = if c.body_is_b { force_on_b } else { -force_on_b };
            out += self.model.contact_wrench(body_pose, &point, &force);
        }
        Ok(out)
    }
    fn twist(&self, local: &[f64], body_pose: &[f64; 3]) -> Result<Vector3<f64>, PlanningError> {
        let w = self.wrench(local, body_pose)?;
        let r = two_d_rotation_matrix_from_angle(body_pose[2]);
        let a_xy = r * Matrix2::new(self.limit_surface[0], 0.0, 0.0, self.limit_surface[1]) * r.transpose();
        let v = a_xy * Vector2::new(w[0], w[1]);
        Ok(Vector3::new(v[0], v[1], self.limit_surface[2] * w[2]))
    }
}
impl ProgramTerm for QuasiStaticDynamicsTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let prev = self.pose_prev.read(local);
        let next = self.pose_next.read(local);
        match self.twist(local, &next) {
            Ok(twist) => { next[self.component] - prev[self.component] - self.dt * twist[self.component] }
            Err(_) => { f64::NAN }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    fn contact() -> DynamicsContact {
        DynamicsContact {
            pair_idx: 0,
            pose_a: PlanarPoseSource::Fixed([-0.15, 0.0, 0.0]),
            pose_b: PlanarPoseSource::Variables([3, 4, 5]),
            normal_force_idx: 6,
            tangential_force_idx: 7
        }
    }

    #[test]
    fn centered_push_moves_slider_along_normal() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let terms: Vec<QuasiStaticDynamicsTerm> = (0..3).map(|c| {
            QuasiStaticDynamicsTerm::new(model.clone(), 1, c, &PlanarPoseSource::Variables([0, 1, 2]), &PlanarPoseSource::Variables([3, 4, 5]), &[contact()], 0.1).unwrap()
        }).collect();
        // slider at rest at the origin, then 0.2 further along +x; lambda_n = 2 gives 0.1 * 1 * 2
        let mut x = vec![0.0; 8];
        x[3] = 0.2;
        x[6] = 2.0;
        let local = |t: &QuasiStaticDynamicsTerm| -> Vec<f64> { t.variable_indices().iter().map(|i| x[*i]).collect() };
        assert!((terms[0].evaluate(&local(&terms[0])) - 0.0).abs() < 1e-6, "{}", terms[0].evaluate(&local(&terms[0])));
        assert!(terms[1].evaluate(&local(&terms[1])).abs() < 1e-6);
        assert!(terms[2].evaluate(&local(&terms[2])).abs() < 1e-6);
    }

    #[test]
    fn friction_force_turns_slider() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let mut c = contact();
        c.pose_a = PlanarPoseSource::Fixed([-0.16, 0.0, 0.0]);
        let t = QuasiStaticDynamicsTerm::new(model, 1, 2, &PlanarPoseSource::Variables([0, 1, 2]), &PlanarPoseSource::Variables([3, 4, 5]), &[c], 0.1).unwrap();
        // tangential force along +y applied at (-0.105, 0)
        let x = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let local: Vec<f64> = t.variable_indices().iter().map(|i| x[*i]).collect();
        // torque = rx * fy = -0.105, omega = 10 * -0.105, residual = 0 - 0.1 * omega
        assert!((t.evaluate(&local) - 0.105).abs() < 1e-6, "{}", t.evaluate(&local));
    }

    #[test]
    fn only_unactuated_bodies_have_limit_surfaces() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let r = QuasiStaticDynamicsTerm::new(model, 0, 0, &PlanarPoseSource::Variables([0, 1, 2]), &PlanarPoseSource::Variables([3, 4, 5]), &[], 0.1);
        assert!(matches!(r, Err(PlanningError::ModelError(_))));
    }

    #[test]
    fn actuated_terms_follow_controls() {
        let terms = actuated_dynamics_terms(&[0, 1, 2], &[3, 4, 5], &[6, 7, 8], 0.5).unwrap();
        assert_eq!(terms[1].variable_indices(), &[4, 1, 7]);
        assert_eq!(terms[1].evaluate(&[1.0, 0.0, 2.0]), 0.0);
    }
}
