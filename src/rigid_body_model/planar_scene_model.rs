use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::rigid_body_model::{BodyGeometry, BodyKind, RigidBodyInfo, RigidBodyModel};
use crate::rigid_body_model::contact_pair::{ContactPair, ContactPairSkipReason};
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_shape_geometry::geometric_shape::{GeometricShape, GeometricShapeQueries, GeometricShapeSignature, PlanarContactQuery};
use crate::utils::utils_traits::SaveAndLoadable;
use crate::rigid_body_model::PlanarPose;

pub const GRAVITY: f64 = 9.81;

/// Serialized form of a planar scene.  This is what scene files (json, ron or toml) hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub bodies: Vec<BodyDescription>,
    /// If empty, every pair of bodies that can physically touch is used.
    #[serde(default)]
    pub contact_pairs: Vec<ContactPairDescription>,
    #[serde(default)]
    pub welds: Vec<(String, String)>,
    #[serde(default = "default_friction_coefficient")]
    pub default_friction_coefficient: f64,
    /// Shapes farther apart than this report this value as their signed distance.
    #[serde(default = "default_contact_query_margin")]
    pub contact_query_margin: f64
}
impl SaveAndLoadable for SceneDescription { }

fn default_friction_coefficient() -> f64 { 0.5 }
fn default_contact_query_margin() -> f64 { 100.0 }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyDescription {
    pub name: String,
    pub kind: BodyKindDescription,
    pub geometry: BodyGeometry
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BodyKindDescription {
    Actuated { velocity_limits: [f64; 3] },
    Unactuated { limit_surface: LimitSurfaceDescription },
    Static { pose: PlanarPose }
}

/// Ellipsoidal limit surface of a body sliding on a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LimitSurfaceDescription {
    /// Diagonal entries of `A` directly.
    Diagonal { a_xy: f64, a_theta: f64 },
    /// `f_max = mu * m * g`, `tau_max = f_max * c`, `A = diag(1/f_max^2, 1/f_max^2, 1/tau_max^2)`.
    FrictionalSupport { mass: f64, ground_friction_coefficient: f64, characteristic_length: f64 }
}
impl LimitSurfaceDescription {
    pub fn to_diagonal(&self) -> Result<[f64; 3], PlanningError> {
        let out = match self {
            LimitSurfaceDescription::Diagonal { a_xy, a_theta } => { [*a_xy, *a_xy, *a_theta] }
            LimitSurfaceDescription::FrictionalSupport { mass, ground_friction_coefficient, characteristic_length } => {
                let f_max = ground_friction_coefficient * mass * GRAVITY;
                let tau_max = f_max * characteristic_length;
                if !(f_max > 0.0 && tau_max > 0.0) {
                    return Err(PlanningError::new_model_error(&format!("limit surface needs positive mass, ground friction and characteristic length, got f_max {} and tau_max {}.", f_max, tau_max), file!(), line!()));
                }
                [1.0 / (f_max * f_max), 1.0 / (f_max * f_max), 1.0 / (tau_max * tau_max)]
            }
        };
        if out.iter().any(|a| !(*a > 0.0) || !a.is_finite()) {
            return Err(PlanningError::new_model_error(&format!("limit surface entries must be positive and finite, got {:?}.", out), file!(), line!()));
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactPairDescription {
    #[serde(default)]
    pub name: Option<String>,
    pub body_a: String,
    pub body_b: String,
    #[serde(default)]
    pub friction_coefficient: Option<f64>
}

/// `RigidBodyModel` of boxes and disks moving in the plane.
#[derive(Clone)]
pub struct PlanarSceneModel {
    bodies: Vec<RigidBodyInfo>,
    shapes: Vec<GeometricShape>,
    contact_pairs: Vec<ContactPair>,
    welds: Vec<(usize, usize)>,
    contact_query_margin: f64
}
impl PlanarSceneModel {
    pub fn new(description: &SceneDescription) -> Result<Self, PlanningError> {
        if description.bodies.is_empty() {
            return Err(PlanningError::new_model_error("scene has no bodies.", file!(), line!()));
        }
        if !(description.contact_query_margin > 0.0) {
            return Err(PlanningError::new_model_error(&format!("contact query margin must be positive, got {}.", description.contact_query_margin), file!(), line!()));
        }

        let mut bodies = vec![];
        let mut shapes = vec![];
        for (body_idx, b) in description.bodies.iter().enumerate() {
            if description.bodies[..body_idx].iter().any(|other| other.name == b.name) {
                return Err(PlanningError::new_model_error(&format!("body name {:?} is used more than once.", b.name), file!(), line!()));
            }
            let kind = match &b.kind {
                BodyKindDescription::Actuated { velocity_limits } => {
                    if velocity_limits.iter().any(|v| !(*v > 0.0)) {
                        return Err(PlanningError::new_model_error(&format!("velocity limits of {:?} must be positive, got {:?}.", b.name, velocity_limits), file!(), line!()));
                    }
                    BodyKind::Actuated { velocity_limits: velocity_limits.clone() }
                }
                BodyKindDescription::Unactuated { limit_surface } => { BodyKind::Unactuated { limit_surface: limit_surface.to_diagonal()? } }
                BodyKindDescription::Static { pose } => { BodyKind::Static { pose: *pose } }
            };
            let signature = GeometricShapeSignature::Body { body_idx };
            let shape = match &b.geometry {
                BodyGeometry::Box { half_extents } => { GeometricShape::new_box(half_extents[0], half_extents[1], signature, None)? }
                BodyGeometry::Disk { radius } => { GeometricShape::new_disk(*radius, signature, None)? }
            };
            bodies.push(RigidBodyInfo { name: b.name.clone(), kind, geometry: b.geometry.clone() });
            shapes.push(shape);
        }

        let find = |name: &str| -> Result<usize, PlanningError> {
            bodies.iter().position(|b: &RigidBodyInfo| b.name == name)
                .ok_or_else(|| PlanningError::new_model_error(&format!("body {:?} does not exist in the scene.", name), file!(), line!()))
        };

        let mut welds = vec![];
        for (a, b) in &description.welds {
            let a = find(a)?;
            let b = find(b)?;
            if a == b {
                return Err(PlanningError::new_model_error(&format!("body {:?} cannot be welded to itself.", bodies[a].name), file!(), line!()));
            }
            welds.push((a.min(b), a.max(b)));
        }

        let skip_reason = |a: usize, b: usize| -> Option<ContactPairSkipReason> {
            if a == b { return Some(ContactPairSkipReason::SameBody); }
            if welds.contains(&(a.min(b), a.max(b))) { return Some(ContactPairSkipReason::Welded); }
            if !bodies[a].kind.is_movable() && !bodies[b].kind.is_movable() { return Some(ContactPairSkipReason::BothStatic); }
            None
        };

        let mut contact_pairs = vec![];
        if description.contact_pairs.is_empty() {
            for a in 0..bodies.len() {
                for b in (a + 1)..bodies.len() {
                    if skip_reason(a, b).is_some() { continue; }
                    let name = format!("{}_{}", bodies[a].name, bodies[b].name);
                    contact_pairs.push(ContactPair::new(&name, a, b, description.default_friction_coefficient, None)?);
                }
            }
        } else {
            for p in &description.contact_pairs {
                let a = find(&p.body_a)?;
                let b = find(&p.body_b)?;
                let name = p.name.clone().unwrap_or(format!("{}_{}", p.body_a, p.body_b));
                if contact_pairs.iter().any(|c: &ContactPair| c.name() == name) {
                    return Err(PlanningError::new_model_error(&format!("contact pair name {:?} is used more than once.", name), file!(), line!()));
                }
                let mu = p.friction_coefficient.unwrap_or(description.default_friction_coefficient);
                contact_pairs.push(ContactPair::new(&name, a, b, mu, skip_reason(a, b))?);
            }
        }

        Ok(Self {
            bodies,
            shapes,
            contact_pairs,
            welds,
            contact_query_margin: description.contact_query_margin
        })
    }
    pub fn new_from_path(path: &Path) -> Result<Self, PlanningError> {
        let description = SceneDescription::load_from_path(path)?;
        Self::new(&description)
    }
    pub fn contact_query_margin(&self) -> f64 {
        self.contact_query_margin
    }
    pub fn shape(&self, body_idx: usize) -> Result<&GeometricShape, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(body_idx, self.shapes.len(), file!(), line!())?;
        Ok(&self.shapes[body_idx])
    }
    /// Disk pusher `pusher` (r = 0.05) and unactuated box `slider` (half extents 0.1).
    #[cfg(test)]
    pub fn new_test_pusher_slider_scene() -> Self {
        Self::new(&SceneDescription {
            bodies: vec![
                BodyDescription { name: "pusher".to_string(), kind: BodyKindDescription::Actuated { velocity_limits: [2.0, 2.0, 2.0] }, geometry: BodyGeometry::Disk { radius: 0.05 } },
                BodyDescription { name: "slider".to_string(), kind: BodyKindDescription::Unactuated { limit_surface: LimitSurfaceDescription::Diagonal { a_xy: 1.0, a_theta: 10.0 } }, geometry: BodyGeometry::Box { half_extents: [0.1, 0.1] } }
            ],
            contact_pairs: vec![],
            welds: vec![],
            default_friction_coefficient: 0.5,
            contact_query_margin: 100.0
        }).unwrap()
    }
}
impl RigidBodyModel for PlanarSceneModel {
    fn bodies(&self) -> &[RigidBodyInfo] {
        &self.bodies
    }
    fn contact_pairs(&self) -> &[ContactPair] {
        &self.contact_pairs
    }
    fn are_welded(&self, body_a: usize, body_b: usize) -> bool {
        self.welds.contains(&(body_a.min(body_b), body_a.max(body_b)))
    }
    fn contact_query(&self, pair_idx: usize, pose_a: &[f64; 3], pose_b: &[f64; 3]) -> Result<PlanarContactQuery, PlanningError> {
        let pair = self.contact_pair(pair_idx)?;
        let shape_a = self.shape(pair.body_a())?;
        let shape_b = self.shape(pair.body_b())?;
        GeometricShapeQueries::planar_contact(shape_a, pose_a, shape_b, pose_b, self.contact_query_margin)
    }
}
