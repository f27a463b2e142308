//! The kinematic/dynamic model the planner consumes.
//!
//! Planning never mutates a model: it is built once (usually from a scene file), wrapped in
//! an `Arc`, and shared read-only by the sequencer, every segment optimizer and every worker
//! thread.  `RigidBodyModel` is the seam; `PlanarSceneModel` is the implementation shipped
//! with the crate.

pub mod contact_pair;
pub mod planar_scene_model;

use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use crate::rigid_body_model::contact_pair::ContactPair;
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_math::finite_difference::FiniteDifferenceUtils;
use crate::utils::utils_math::geometry::two_d_rotation_matrix_from_angle;
use crate::utils::utils_shape_geometry::geometric_shape::PlanarContactQuery;

/// Planar pose of a body frame in the world.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanarPose {
    pub x: f64,
    pub y: f64,
    pub theta: f64
}
impl PlanarPose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
    pub fn from_array(a: &[f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.theta]
    }
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        two_d_rotation_matrix_from_angle(self.theta)
    }
}
impl Default for PlanarPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Planar twist `(vx, vy, omega)` expressed in the world frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanarTwist {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64
}
impl PlanarTwist {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
    pub fn to_array(&self) -> [f64; 3] {
        [self.vx, self.vy, self.omega]
    }
}
impl Default for PlanarTwist {
    fn default() -> Self {
        Self::zero()
    }
}

/// Immutable snapshot of every body (static ones included) at one time sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyState {
    poses: Vec<PlanarPose>,
    velocities: Vec<PlanarTwist>
}
impl RigidBodyState {
    pub fn new(poses: Vec<PlanarPose>, velocities: Option<Vec<PlanarTwist>>) -> Result<Self, PlanningError> {
        let velocities = match velocities {
            None => { vec![PlanarTwist::zero(); poses.len()] }
            Some(v) => {
                if v.len() != poses.len() {
                    return Err(PlanningError::new_generic_error_str(&format!("state has {} poses but {} velocities.", poses.len(), v.len()), file!(), line!()));
                }
                v
            }
        };
        Ok(Self { poses, velocities })
    }
    pub fn poses(&self) -> &Vec<PlanarPose> {
        &self.poses
    }
    pub fn velocities(&self) -> &Vec<PlanarTwist> {
        &self.velocities
    }
    pub fn pose(&self, body_idx: usize) -> Result<&PlanarPose, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(body_idx, self.poses.len(), file!(), line!())?;
        Ok(&self.poses[body_idx])
    }
    pub fn velocity(&self, body_idx: usize) -> Result<&PlanarTwist, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(body_idx, self.velocities.len(), file!(), line!())?;
        Ok(&self.velocities[body_idx])
    }
    pub fn num_bodies(&self) -> usize {
        self.poses.len()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Velocity-controlled robot link (finger, pusher, gripper jaw).
    Actuated { velocity_limits: [f64; 3] },
    /// Movable object pushed around quasi-statically.  `limit_surface` holds the body-frame
    /// diagonal `(a_x, a_y, a_theta)` of the ellipsoidal limit surface: twist = A * wrench.
    Unactuated { limit_surface: [f64; 3] },
    /// Fixed obstacle or fixture.
    Static { pose: PlanarPose }
}
impl BodyKind {
    pub fn is_movable(&self) -> bool {
        !matches!(self, BodyKind::Static { .. })
    }
    pub fn is_actuated(&self) -> bool {
        matches!(self, BodyKind::Actuated { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BodyGeometry {
    Box { half_extents: [f64; 2] },
    Disk { radius: f64 }
}
impl BodyGeometry {
    /// Radius of the smallest disk around the body origin that contains the geometry.
    pub fn bounding_radius(&self) -> f64 {
        match self {
            BodyGeometry::Box { half_extents } => { (half_extents[0].powi(2) + half_extents[1].powi(2)).sqrt() }
            BodyGeometry::Disk { radius } => { *radius }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyInfo {
    pub name: String,
    pub kind: BodyKind,
    pub geometry: BodyGeometry
}

/// Everything the trajectory optimizer needs to know about the physical system.
///
/// Implementations must be immutable after construction: planning shares one instance
/// across threads without locking.
pub trait RigidBodyModel: Send + Sync {
    fn bodies(&self) -> &[RigidBodyInfo];
    fn contact_pairs(&self) -> &[ContactPair];
    fn are_welded(&self, body_a: usize, body_b: usize) -> bool;
    /// Signed distance, witness points and normal (from body A towards body B) of a pair.
    fn contact_query(&self, pair_idx: usize, pose_a: &[f64; 3], pose_b: &[f64; 3]) -> Result<PlanarContactQuery, PlanningError>;

    fn num_bodies(&self) -> usize {
        self.bodies().len()
    }
    fn body(&self, body_idx: usize) -> Result<&RigidBodyInfo, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(body_idx, self.bodies().len(), file!(), line!())?;
        Ok(&self.bodies()[body_idx])
    }
    fn contact_pair(&self, pair_idx: usize) -> Result<&ContactPair, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(pair_idx, self.contact_pairs().len(), file!(), line!())?;
        Ok(&self.contact_pairs()[pair_idx])
    }
    fn body_idx_from_name(&self, name: &str) -> Result<usize, PlanningError> {
        self.bodies().iter().position(|b| b.name == name)
            .ok_or_else(|| PlanningError::new_model_error(&format!("body {:?} does not exist in the model.", name), file!(), line!()))
    }
    fn pair_idx_from_name(&self, name: &str) -> Result<usize, PlanningError> {
        self.contact_pairs().iter().position(|p| p.name() == name)
            .ok_or_else(|| PlanningError::new_model_error(&format!("contact pair {:?} does not exist in the model.", name), file!(), line!()))
    }
    fn static_pose(&self, body_idx: usize) -> Result<Option<PlanarPose>, PlanningError> {
        let body = self.body(body_idx)?;
        return match &body.kind {
            BodyKind::Static { pose } => { Ok(Some(*pose)) }
            _ => { Ok(None) }
        }
    }
    fn signed_distance(&self, pair_idx: usize, pose_a: &[f64; 3], pose_b: &[f64; 3]) -> Result<f64, PlanningError> {
        Ok(self.contact_query(pair_idx, pose_a, pose_b)?.signed_distance)
    }
    /// Gradient of the signed distance with respect to `[pose_a, pose_b]` (6 entries).
    fn signed_distance_gradient(&self, pair_idx: usize, pose_a: &[f64; 3], pose_b: &[f64; 3]) -> Result<[f64; 6], PlanningError> {
        // validate once so the closure below can fall back on NaN without hiding errors
        self.contact_query(pair_idx, pose_a, pose_b)?;
        let mut x = [pose_a[0], pose_a[1], pose_a[2], pose_b[0], pose_b[1], pose_b[2]];
        let g = FiniteDifferenceUtils::central_difference_gradient(|x: &[f64]| {
            self.signed_distance(pair_idx, &[x[0], x[1], x[2]], &[x[3], x[4], x[5]]).unwrap_or(f64::NAN)
        }, &mut x, FiniteDifferenceUtils::DEFAULT_STEP);
        Ok([g[0], g[1], g[2], g[3], g[4], g[5]])
    }
    /// Maps a body twist `(vx, vy, omega)` to the world velocity of `point`.
    fn point_jacobian(&self, body_pose: &[f64; 3], point: &Vector2<f64>) -> Matrix2x3<f64> {
        let rx = point[0] - body_pose[0];
        let ry = point[1] - body_pose[1];
        Matrix2x3::new(1.0, 0.0, -ry,
                       0.0, 1.0, rx)
    }
    /// World-frame wrench `(fx, fy, tau)` on a body from a force applied at `point`.
    fn contact_wrench(&self, body_pose: &[f64; 3], point: &Vector2<f64>, force: &Vector2<f64>) -> Vector3<f64> {
        self.point_jacobian(body_pose, point).transpose() * force
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;

    #[test]
    fn state_velocity_length_must_match() {
        let poses = vec![PlanarPose::identity(), PlanarPose::new(1.0, 0.0, 0.0)];
        assert!(RigidBodyState::new(poses.clone(), Some(vec![PlanarTwist::zero()])).is_err());
        let s = RigidBodyState::new(poses, None).unwrap();
        assert_eq!(s.num_bodies(), 2);
        assert!(s.pose(2).is_err());
    }

    #[test]
    fn wrench_from_off_center_push() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let w = model.contact_wrench(&[0.0, 0.0, 0.0], &Vector2::new(-0.5, 0.1), &Vector2::new(1.0, 0.0));
        assert!((w[0] - 1.0).abs() < 1e-12);
        assert!(w[1].abs() < 1e-12);
        assert!((w[2] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn signed_distance_gradient_points_apart() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let g = model.signed_distance_gradient(0, &[-1.0, 0.0, 0.0], &[0.0, 0.0, 0.0]).unwrap();
        assert!((g[0] + 1.0).abs() < 1e-5);
        assert!((g[3] - 1.0).abs() < 1e-5);
    }
}
