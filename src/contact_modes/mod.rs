//! Discrete contact modes and the constraints they induce at a knot.
//!
//! Let `phi` be the signed distance of a pair, `v_t` the tangential velocity of body B
//! relative to body A at the contact point, and `(lambda_n, lambda_t)` the contact force on B
//! in the contact frame.  Then
//!
//! | mode          | geometry    | velocity        | force                                          |
//! |---------------|-------------|-----------------|------------------------------------------------|
//! | `Separated`   | `phi >= 0`  |                 | `lambda_n = 0`, `lambda_t = 0`                 |
//! | `Sticking`    | `phi = 0`   | `v_t = 0`       | `lambda_n >= 0`, `abs(lambda_t) <= mu lambda_n`  |
//! | `Sliding(s)`  | `phi = 0`   | `s v_t >= 0`    | `lambda_n >= 0`, `lambda_t = -s mu lambda_n`   |
//!
//! Geometric constraints are generated separately from force/velocity constraints so that a
//! boundary knot can carry the geometry of both adjacent modes.

pub mod contact_terms;
pub mod mode_sequence;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use crate::contact_modes::contact_terms::{SignedDistanceTerm, TangentialVelocityTerm};
use crate::nonlinear_optimization::{ConstraintKind, ConstraintTag, NonlinearProgram, ProgramTerm};
use crate::nonlinear_optimization::program_terms::{LinearTerm, PlanarPoseSource};
use crate::rigid_body_model::contact_pair::ContactPair;
use crate::rigid_body_model::RigidBodyModel;
use crate::utils::utils_errors::PlanningError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Serialize, Deserialize)]
pub enum ContactModeType {
    Separated,
    Sticking,
    Sliding
}
impl ContactModeType {
    /// Lower ranks are tried first when ordering candidates.
    pub fn rank(&self) -> usize {
        match self {
            ContactModeType::Separated => { 0 }
            ContactModeType::Sticking => { 1 }
            ContactModeType::Sliding => { 2 }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlidingDirection {
    Positive,
    Negative
}
impl SlidingDirection {
    pub fn sign(&self) -> f64 {
        match self {
            SlidingDirection::Positive => { 1.0 }
            SlidingDirection::Negative => { -1.0 }
        }
    }
    pub fn from_velocity(v_t: f64) -> Self {
        if v_t >= 0.0 { Self::Positive } else { Self::Negative }
    }
}

/// Discrete contact state of one pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PairMode {
    Separated,
    Sticking,
    Sliding(SlidingDirection)
}
impl PairMode {
    pub fn mode_type(&self) -> ContactModeType {
        match self {
            PairMode::Separated => { ContactModeType::Separated }
            PairMode::Sticking => { ContactModeType::Sticking }
            PairMode::Sliding(_) => { ContactModeType::Sliding }
        }
    }
    pub fn is_in_contact(&self) -> bool {
        !matches!(self, PairMode::Separated)
    }
    /// Every pair mode, in rank order.
    pub fn all(allow_sliding: bool) -> Vec<PairMode> {
        let mut out_vec = vec![];
        for t in ContactModeType::iter() {
            match t {
                ContactModeType::Separated => { out_vec.push(PairMode::Separated); }
                ContactModeType::Sticking => { out_vec.push(PairMode::Sticking); }
                ContactModeType::Sliding => {
                    if allow_sliding {
                        out_vec.push(PairMode::Sliding(SlidingDirection::Positive));
                        out_vec.push(PairMode::Sliding(SlidingDirection::Negative));
                    }
                }
            }
        }
        out_vec
    }
    /// `((lambda_n_lower, lambda_n_upper), (lambda_t_lower, lambda_t_upper))`.
    pub fn force_bounds(&self, friction_coefficient: f64, max_normal_force: f64) -> ((f64, f64), (f64, f64)) {
        let t_max = friction_coefficient * max_normal_force;
        match self {
            PairMode::Separated => { ((0.0, 0.0), (0.0, 0.0)) }
            PairMode::Sticking => { ((0.0, max_normal_force), (-t_max, t_max)) }
            PairMode::Sliding(SlidingDirection::Positive) => { ((0.0, max_normal_force), (-t_max, 0.0)) }
            PairMode::Sliding(SlidingDirection::Negative) => { ((0.0, max_normal_force), (0.0, t_max)) }
        }
    }
    /// Distance constraints of this mode at one knot.
    pub fn geometric_constraints(&self, ctx: &PairKnotContext) -> Result<Vec<ModeConstraint>, PlanningError> {
        ctx.checked_pair()?;
        let idx = ctx.pair_idx;
        return match self {
            PairMode::Separated => {
                let term = SignedDistanceTerm::new(ctx.model.clone(), idx, &ctx.pose_a, &ctx.pose_b, -1.0);
                Ok(vec![ctx.constraint(ConstraintKind::NonPenetration { pair_idx: idx }, ConstraintSense::LessThanZero, Arc::new(term))])
            }
            _ => {
                let term = SignedDistanceTerm::new(ctx.model.clone(), idx, &ctx.pose_a, &ctx.pose_b, 1.0);
                Ok(vec![ctx.constraint(ConstraintKind::ContactDistance { pair_idx: idx }, ConstraintSense::Equality, Arc::new(term))])
            }
        }
    }
    /// Friction and tangential velocity constraints of this mode at one knot.  Separated
    /// forces are pinned to zero through `force_bounds`; velocity constraints are skipped at
    /// knots without a previous knot.
    pub fn force_velocity_constraints(&self, ctx: &PairKnotContext) -> Result<Vec<ModeConstraint>, PlanningError> {
        let pair = ctx.checked_pair()?;
        let idx = ctx.pair_idx;
        let mu = pair.friction_coefficient();
        let (n, t) = (ctx.normal_force_idx, ctx.tangential_force_idx);

        let mut out_vec = vec![];
        match self {
            PairMode::Separated => { }
            PairMode::Sticking => {
                out_vec.push(ctx.constraint(ConstraintKind::FrictionCone { pair_idx: idx }, ConstraintSense::LessThanZero, Arc::new(LinearTerm::new(vec![t, n], vec![1.0, -mu], 0.0)?)));
                out_vec.push(ctx.constraint(ConstraintKind::FrictionCone { pair_idx: idx }, ConstraintSense::LessThanZero, Arc::new(LinearTerm::new(vec![t, n], vec![-1.0, -mu], 0.0)?)));
                if let Some((prev_a, prev_b)) = &ctx.previous_poses {
                    let term = TangentialVelocityTerm::new(ctx.model.clone(), idx, (&ctx.pose_a, &ctx.pose_b), (prev_a, prev_b), ctx.dt, 1.0);
                    out_vec.push(ctx.constraint(ConstraintKind::StickingVelocity { pair_idx: idx }, ConstraintSense::Equality, Arc::new(term)));
                }
            }
            PairMode::Sliding(direction) => {
                let s = direction.sign();
                out_vec.push(ctx.constraint(ConstraintKind::SlidingFriction { pair_idx: idx }, ConstraintSense::Equality, Arc::new(LinearTerm::new(vec![t, n], vec![1.0, s * mu], 0.0)?)));
                if let Some((prev_a, prev_b)) = &ctx.previous_poses {
                    let term = TangentialVelocityTerm::new(ctx.model.clone(), idx, (&ctx.pose_a, &ctx.pose_b), (prev_a, prev_b), ctx.dt, -s);
                    out_vec.push(ctx.constraint(ConstraintKind::SlidingDirection { pair_idx: idx }, ConstraintSense::LessThanZero, Arc::new(term)));
                }
            }
        }
        Ok(out_vec)
    }
    pub fn constraints(&self, ctx: &PairKnotContext) -> Result<Vec<ModeConstraint>, PlanningError> {
        let mut out_vec = self.geometric_constraints(ctx)?;
        out_vec.extend(self.force_velocity_constraints(ctx)?);
        Ok(out_vec)
    }
}
impl fmt::Display for PairMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairMode::Separated => { write!(f, "separated") }
            PairMode::Sticking => { write!(f, "sticking") }
            PairMode::Sliding(SlidingDirection::Positive) => { write!(f, "sliding+") }
            PairMode::Sliding(SlidingDirection::Negative) => { write!(f, "sliding-") }
        }
    }
}

/// Mapping from every active contact pair (by model pair index) to its discrete state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactMode {
    pair_modes: BTreeMap<usize, PairMode>
}
impl ContactMode {
    pub fn new(pair_modes: BTreeMap<usize, PairMode>) -> Self {
        Self { pair_modes }
    }
    pub fn new_from_pairs(pairs: &[(usize, PairMode)]) -> Self {
        Self { pair_modes: pairs.iter().cloned().collect() }
    }
    pub fn new_all_separated(pair_idxs: &[usize]) -> Self {
        Self { pair_modes: pair_idxs.iter().map(|p| (*p, PairMode::Separated)).collect() }
    }
    pub fn pair_modes(&self) -> &BTreeMap<usize, PairMode> {
        &self.pair_modes
    }
    pub fn pair_idxs(&self) -> Vec<usize> {
        self.pair_modes.keys().cloned().collect()
    }
    pub fn get(&self, pair_idx: usize) -> Option<&PairMode> {
        self.pair_modes.get(&pair_idx)
    }
    pub fn num_pairs(&self) -> usize {
        self.pair_modes.len()
    }
    /// Sum of the mode-type ranks of every pair.
    pub fn rank(&self) -> usize {
        self.pair_modes.values().map(|m| m.mode_type().rank()).sum()
    }
    pub fn num_differing_pairs(&self, other: &ContactMode) -> usize {
        let mut count = 0;
        for (p, m) in &self.pair_modes {
            if other.get(*p) != Some(m) { count += 1; }
        }
        for p in other.pair_modes.keys() {
            if !self.pair_modes.contains_key(p) { count += 1; }
        }
        count
    }
    /// Errors with a `ModelError` if any pair of this mode can never be in contact.
    pub fn check_against_model(&self, model: &dyn RigidBodyModel) -> Result<(), PlanningError> {
        for pair_idx in self.pair_modes.keys() {
            model.contact_pair(*pair_idx)?.check_contact_possible()?;
        }
        Ok(())
    }
}
impl fmt::Display for ContactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<String> = self.pair_modes.iter().map(|(p, m)| format!("{}: {}", p, m)).collect();
        write!(f, "{{{}}}", strings.join(", "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintSense {
    Equality,
    LessThanZero
}

/// One constraint produced by a contact mode, ready to be added to a program.
#[derive(Clone)]
pub struct ModeConstraint {
    pub tag: ConstraintTag,
    pub sense: ConstraintSense,
    pub term: Arc<dyn ProgramTerm>
}
impl ModeConstraint {
    pub fn add_to_program(self, program: &mut NonlinearProgram) -> Result<(), PlanningError> {
        match self.sense {
            ConstraintSense::Equality => { program.add_equality_constraint(self.tag, self.term) }
            ConstraintSense::LessThanZero => { program.add_less_than_zero_inequality_constraint(self.tag, self.term) }
        }
    }
}

/// Where one pair's quantities live at one knot.
#[derive(Clone)]
pub struct PairKnotContext {
    pub model: Arc<dyn RigidBodyModel>,
    pub pair_idx: usize,
    pub knot: usize,
    pub segment: usize,
    pub pose_a: PlanarPoseSource,
    pub pose_b: PlanarPoseSource,
    /// Poses at the previous knot, `None` at knot 0.
    pub previous_poses: Option<(PlanarPoseSource, PlanarPoseSource)>,
    pub dt: f64,
    pub normal_force_idx: usize,
    pub tangential_force_idx: usize
}
impl PairKnotContext {
    fn checked_pair(&self) -> Result<&ContactPair, PlanningError> {
        let pair = self.model.contact_pair(self.pair_idx)?;
        pair.check_contact_possible()?;
        Ok(pair)
    }
    fn constraint(&self, kind: ConstraintKind, sense: ConstraintSense, term: Arc<dyn ProgramTerm>) -> ModeConstraint {
        ModeConstraint {
            tag: ConstraintTag { knot: self.knot, segment: self.segment, kind },
            sense,
            term
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::{BodyDescription, BodyKindDescription, ContactPairDescription, LimitSurfaceDescription, PlanarSceneModel, SceneDescription};
    use crate::rigid_body_model::BodyGeometry;

    fn ctx(model: Arc<dyn RigidBodyModel>, previous: bool) -> PairKnotContext {
        PairKnotContext {
            model,
            pair_idx: 0,
            knot: 3,
            segment: 1,
            pose_a: PlanarPoseSource::Variables([0, 1, 2]),
            pose_b: PlanarPoseSource::Fixed([0.0, 0.0, 0.0]),
            previous_poses: if previous { Some((PlanarPoseSource::Variables([3, 4, 5]), PlanarPoseSource::Fixed([0.0, 0.0, 0.0]))) } else { None },
            dt: 0.1,
            normal_force_idx: 6,
            tangential_force_idx: 7
        }
    }

    #[test]
    fn constraint_counts_per_mode() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let c = ctx(model.clone(), true);
        assert_eq!(PairMode::Separated.constraints(&c).unwrap().len(), 1);
        assert_eq!(PairMode::Sticking.constraints(&c).unwrap().len(), 4);
        assert_eq!(PairMode::Sliding(SlidingDirection::Negative).constraints(&c).unwrap().len(), 3);
        let c0 = ctx(model, false);
        assert_eq!(PairMode::Sticking.constraints(&c0).unwrap().len(), 3);
        let tags: Vec<ConstraintTag> = PairMode::Sticking.constraints(&c0).unwrap().iter().map(|m| m.tag).collect();
        assert!(tags.iter().all(|t| t.knot == 3 && t.segment == 1));
    }

    #[test]
    fn sticking_friction_cone_values() {
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new_test_pusher_slider_scene());
        let cs = PairMode::Sticking.force_velocity_constraints(&ctx(model, false)).unwrap();
        // mu = 0.5, lambda_n = 2, lambda_t = 1.5: violates the cone by 0.5
        let upper = cs[0].term.evaluate(&[1.5, 2.0]);
        let lower = cs[1].term.evaluate(&[1.5, 2.0]);
        assert!((upper - 0.5).abs() < 1e-12);
        assert!((lower + 2.5).abs() < 1e-12);
    }

    #[test]
    fn sliding_bounds_oppose_motion() {
        let b = PairMode::Sliding(SlidingDirection::Positive).force_bounds(0.5, 10.0);
        assert_eq!(b, ((0.0, 10.0), (-5.0, 0.0)));
        assert_eq!(PairMode::Separated.force_bounds(0.5, 10.0), ((0.0, 0.0), (0.0, 0.0)));
    }

    #[test]
    fn modes_on_welded_pair_are_model_errors() {
        let d = SceneDescription {
            bodies: vec![
                BodyDescription { name: "hand".to_string(), kind: BodyKindDescription::Actuated { velocity_limits: [1.0, 1.0, 1.0] }, geometry: BodyGeometry::Disk { radius: 0.05 } },
                BodyDescription { name: "tool".to_string(), kind: BodyKindDescription::Unactuated { limit_surface: LimitSurfaceDescription::Diagonal { a_xy: 1.0, a_theta: 1.0 } }, geometry: BodyGeometry::Box { half_extents: [0.1, 0.1] } }
            ],
            contact_pairs: vec![ContactPairDescription { name: None, body_a: "hand".to_string(), body_b: "tool".to_string(), friction_coefficient: None }],
            welds: vec![("hand".to_string(), "tool".to_string())],
            default_friction_coefficient: 0.5,
            contact_query_margin: 10.0
        };
        let model: Arc<dyn RigidBodyModel> = Arc::new(PlanarSceneModel::new(&d).unwrap());
        for m in PairMode::all(true) {
            assert!(matches!(m.constraints(&ctx(model.clone(), true)), Err(PlanningError::ModelError(_))));
        }
        assert!(ContactMode::new_all_separated(&[0]).check_against_model(&*model).is_err());
    }

    #[test]
    fn mode_ordering_and_display() {
        assert_eq!(PairMode::all(false), vec![PairMode::Separated, PairMode::Sticking]);
        assert_eq!(PairMode::all(true).len(), 4);
        let m = ContactMode::new_from_pairs(&[(0, PairMode::Sticking), (2, PairMode::Sliding(SlidingDirection::Positive))]);
        assert_eq!(m.rank(), 3);
        assert_eq!(format!("{}", m), "{0: sticking, 2: sliding+}");
        assert_eq!(m.num_differing_pairs(&ContactMode::new_all_separated(&[0, 2])), 2);
    }
}
