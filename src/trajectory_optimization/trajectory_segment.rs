use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::contact_modes::ContactMode;
use crate::rigid_body_model::{PlanarTwist, RigidBodyState};

/// Contact force on a pair's body B, in the pair's contact frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactForce {
    pub normal: f64,
    pub tangential: f64
}
impl ContactForce {
    pub fn new(normal: f64, tangential: f64) -> Self {
        Self { normal, tangential }
    }
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnotPoint {
    pub time: f64,
    pub state: RigidBodyState,
    /// Velocity command of every actuated body, by body index.
    pub controls: BTreeMap<usize, PlanarTwist>,
    /// Contact force of every active pair, by pair index.
    pub contact_forces: BTreeMap<usize, ContactForce>
}

/// The knots spanned by one mode of a solved sequence, boundary knots included on both
/// sides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySegment {
    segment_idx: usize,
    mode: ContactMode,
    knots: Vec<KnotPoint>
}
impl TrajectorySegment {
    pub fn new(segment_idx: usize, mode: ContactMode, knots: Vec<KnotPoint>) -> Self {
        Self { segment_idx, mode, knots }
    }
    pub fn segment_idx(&self) -> usize {
        self.segment_idx
    }
    pub fn mode(&self) -> &ContactMode {
        &self.mode
    }
    pub fn knots(&self) -> &Vec<KnotPoint> {
        &self.knots
    }
    pub fn num_knots(&self) -> usize {
        self.knots.len()
    }
    pub fn start_time(&self) -> f64 {
        self.knots.first().map(|k| k.time).unwrap_or(0.0)
    }
    pub fn end_time(&self) -> f64 {
        self.knots.last().map(|k| k.time).unwrap_or(0.0)
    }
}
