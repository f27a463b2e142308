use std::sync::Arc;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector2, Vector3};
use parry3d_f64::query::Contact;
use parry3d_f64::shape::{Ball, Cuboid, Shape};
use serde::{Deserialize, Serialize};
use crate::utils::utils_errors::PlanningError;

/// Half height of the extrusion used for planar boxes.  Balls are centered on the z = 0
/// plane, so any half height larger than the largest radius in a scene gives exact planar
/// distances.
pub const PLANAR_EXTRUSION_HALF_HEIGHT: f64 = 1.0e3;

/// A `GeometricShape` wraps a parry shape that lives in the z = 0 plane of a 3D world.
/// Planar boxes are cuboids extruded along z and disks are balls, which makes every
/// parry3d distance/contact query between them an exact planar query.
///
/// The `local_offset` is the fixed planar pose of the shape relative to its body frame.
/// All queries take the *body* pose and compose it with this offset.
pub struct GeometricShape {
    shape: Box<Arc<dyn Shape>>,
    signature: GeometricShapeSignature,
    local_offset: [f64; 3]
}
impl GeometricShape {
    pub fn new_box(half_extent_x: f64, half_extent_y: f64, signature: GeometricShapeSignature, local_offset: Option<[f64; 3]>) -> Result<Self, PlanningError> {
        if !(half_extent_x > 0.0 && half_extent_y > 0.0) {
            return Err(PlanningError::new_model_error(&format!("box half extents must be positive, got ({}, {}).", half_extent_x, half_extent_y), file!(), line!()));
        }
        let cube = Cuboid::new(Vector3::new(half_extent_x, half_extent_y, PLANAR_EXTRUSION_HALF_HEIGHT));

        Ok(Self {
            shape: Box::new(Arc::new(cube)),
            signature,
            local_offset: local_offset.unwrap_or([0.0; 3])
        })
    }
    pub fn new_disk(radius: f64, signature: GeometricShapeSignature, local_offset: Option<[f64; 3]>) -> Result<Self, PlanningError> {
        if !(radius > 0.0) {
            return Err(PlanningError::new_model_error(&format!("disk radius must be positive, got {}.", radius), file!(), line!()));
        }
        let sphere = Ball::new(radius);

        Ok(Self {
            shape: Box::new(Arc::new(sphere)),
            signature,
            local_offset: local_offset.unwrap_or([0.0; 3])
        })
    }
    pub fn signature(&self) -> &GeometricShapeSignature {
        &self.signature
    }
    pub fn local_offset(&self) -> &[f64; 3] {
        &self.local_offset
    }
    fn recover_isometry(&self, body_pose: &[f64; 3]) -> Isometry3<f64> {
        let (s, c) = body_pose[2].sin_cos();
        let ox = self.local_offset[0];
        let oy = self.local_offset[1];
        let x = body_pose[0] + c * ox - s * oy;
        let y = body_pose[1] + s * ox + c * oy;
        let theta = body_pose[2] + self.local_offset[2];

        Isometry3::from_parts(Translation3::new(x, y, 0.0), UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta))
    }
}
impl Clone for GeometricShape {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            signature: self.signature.clone(),
            local_offset: self.local_offset.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeometricShapeSignature {
    None,
    Body { body_idx: usize }
}

/// Planar result of a contact query.  `normal` points from the first shape towards the
/// second; `signed_distance` is negative on penetration.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanarContactQuery {
    pub signed_distance: f64,
    pub point_on_first: Vector2<f64>,
    pub point_on_second: Vector2<f64>,
    pub normal: Vector2<f64>
}
impl PlanarContactQuery {
    pub fn contact_point(&self) -> Vector2<f64> {
        (self.point_on_first + self.point_on_second) * 0.5
    }
}

pub struct GeometricShapeQueries;
impl GeometricShapeQueries {
    /// Returns None if the objects are separated by a distance greater than prediction.
    pub fn contact(object1: &GeometricShape,
                   object1_pose: &[f64; 3],
                   object2: &GeometricShape,
                   object2_pose: &[f64; 3],
                   prediction: f64) -> Result<Option<Contact>, PlanningError> {
        let pos1 = object1.recover_isometry(object1_pose);
        let pos2 = object2.recover_isometry(object2_pose);

        parry3d_f64::query::contact(&pos1, &**object1.shape, &pos2, &**object2.shape, prediction)
            .map_err(|_| PlanningError::new_model_error("unsupported shape pair for contact query.", file!(), line!()))
    }
    /// Planar contact query.  Shapes farther apart than `prediction` report a signed distance
    /// of exactly `prediction` with a normal along the line between the shape origins.
    pub fn planar_contact(object1: &GeometricShape,
                          object1_pose: &[f64; 3],
                          object2: &GeometricShape,
                          object2_pose: &[f64; 3],
                          prediction: f64) -> Result<PlanarContactQuery, PlanningError> {
        let res = Self::contact(object1, object1_pose, object2, object2_pose, prediction)?;
        return match res {
            Some(c) => {
                Ok(PlanarContactQuery {
                    signed_distance: c.dist,
                    point_on_first: Vector2::new(c.point1[0], c.point1[1]),
                    point_on_second: Vector2::new(c.point2[0], c.point2[1]),
                    normal: Vector2::new(c.normal1[0], c.normal1[1])
                })
            }
            None => {
                let p1 = object1.recover_isometry(object1_pose).translation.vector;
                let p2 = object2.recover_isometry(object2_pose).translation.vector;
                let p1 = Vector2::new(p1[0], p1[1]);
                let p2 = Vector2::new(p2[0], p2[1]);
                let diff = p2 - p1;
                let normal = if diff.norm() > 1e-12 { diff / diff.norm() } else { Vector2::new(1.0, 0.0) };
                Ok(PlanarContactQuery {
                    signed_distance: prediction,
                    point_on_first: p1,
                    point_on_second: p2,
                    normal
                })
            }
        }
    }
    pub fn intersection_test(object1: &GeometricShape,
                             object1_pose: &[f64; 3],
                             object2: &GeometricShape,
                             object2_pose: &[f64; 3]) -> Result<bool, PlanningError> {
        let pos1 = object1.recover_isometry(object1_pose);
        let pos2 = object2.recover_isometry(object2_pose);

        parry3d_f64::query::intersection_test(&pos1, &**object1.shape, &pos2, &**object2.shape)
            .map_err(|_| PlanningError::new_model_error("unsupported shape pair for intersection test.", file!(), line!()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_to_box_signed_distance() {
        let disk = GeometricShape::new_disk(0.1, GeometricShapeSignature::None, None).unwrap();
        let b = GeometricShape::new_box(0.5, 0.5, GeometricShapeSignature::None, None).unwrap();
        let q = GeometricShapeQueries::planar_contact(&disk, &[-1.0, 0.0, 0.0], &b, &[0.0, 0.0, 0.0], 10.0).unwrap();
        assert!((q.signed_distance - 0.4).abs() < 1e-9);
        assert!((q.normal - Vector2::new(1.0, 0.0)).norm() < 1e-9);
        assert!((q.contact_point() - Vector2::new(-0.7, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn penetration_is_negative() {
        let a = GeometricShape::new_disk(0.5, GeometricShapeSignature::None, None).unwrap();
        let b = GeometricShape::new_disk(0.5, GeometricShapeSignature::None, None).unwrap();
        let q = GeometricShapeQueries::planar_contact(&a, &[0.0, 0.0, 0.0], &b, &[0.8, 0.0, 0.0], 10.0).unwrap();
        assert!((q.signed_distance + 0.2).abs() < 1e-9);
        assert!(GeometricShapeQueries::intersection_test(&a, &[0.0, 0.0, 0.0], &b, &[0.8, 0.0, 0.0]).unwrap());
    }

    #[test]
    fn far_apart_shapes_report_prediction() {
        let a = GeometricShape::new_disk(0.1, GeometricShapeSignature::None, None).unwrap();
        let b = GeometricShape::new_disk(0.1, GeometricShapeSignature::None, None).unwrap();
        let q = GeometricShapeQueries::planar_contact(&a, &[0.0, 0.0, 0.0], &b, &[0.0, 5.0, 0.0], 1.0).unwrap();
        assert_eq!(q.signed_distance, 1.0);
        assert!((q.normal - Vector2::new(0.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn local_offset_moves_the_shape_with_the_body() {
        let a = GeometricShape::new_disk(0.1, GeometricShapeSignature::None, Some([1.0, 0.0, 0.0])).unwrap();
        let b = GeometricShape::new_disk(0.1, GeometricShapeSignature::None, None).unwrap();
        let q = GeometricShapeQueries::planar_contact(&a, &[0.0, 0.0, std::f64::consts::FRAC_PI_2], &b, &[0.0, 2.0, 0.0], 10.0).unwrap();
        assert!((q.signed_distance - 0.8).abs() < 1e-9);
        assert!(GeometricShape::new_box(0.0, 1.0, GeometricShapeSignature::None, None).is_err());
    }
}
