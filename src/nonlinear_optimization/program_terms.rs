use crate::nonlinear_optimization::ProgramTerm;
use crate::utils::utils_errors::PlanningError;

/// `sum_i coefficients[i] * x[indices[i]] + constant`.
#[derive(Clone, Debug)]
pub struct LinearTerm {
    indices: Vec<usize>,
    coefficients: Vec<f64>,
    constant: f64
}
impl LinearTerm {
    pub fn new(indices: Vec<usize>, coefficients: Vec<f64>, constant: f64) -> Result<Self, PlanningError> {
        if indices.len() != coefficients.len() {
            return Err(PlanningError::new_generic_error_str(&format!("linear term has {} indices but {} coefficients.", indices.len(), coefficients.len()), file!(), line!()));
        }
        Ok(Self { indices, coefficients, constant })
    }
    pub fn constant(&self) -> f64 {
        self.constant
    }
}
impl ProgramTerm for LinearTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let mut out = self.constant;
        for (c, x) in self.coefficients.iter().zip(local.iter()) { out += c * x; }
        out
    }
    fn local_gradient(&self, _local: &[f64]) -> Vec<f64> {
        self.coefficients.clone()
    }
}

/// `sum_i weights[i] * (x[indices[i]] - targets[i])^2`.
#[derive(Clone, Debug)]
pub struct SquaredDistanceTerm {
    indices: Vec<usize>,
    targets: Vec<f64>,
    weights: Vec<f64>
}
impl SquaredDistanceTerm {
    pub fn new(indices: Vec<usize>, targets: Vec<f64>, weights: Option<Vec<f64>>) -> Result<Self, PlanningError> {
        let weights = weights.unwrap_or(vec![1.0; indices.len()]);
        if indices.len() != targets.len() || indices.len() != weights.len() {
            return Err(PlanningError::new_generic_error_str("squared distance term needs as many targets and weights as indices.", file!(), line!()));
        }
        Ok(Self { indices, targets, weights })
    }
    /// Plain sum of squares of the given variables.
    pub fn new_sum_of_squares(indices: Vec<usize>) -> Self {
        let n = indices.len();
        Self { indices, targets: vec![0.0; n], weights: vec![1.0; n] }
    }
}
impl ProgramTerm for SquaredDistanceTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let mut out = 0.0;
        for i in 0..local.len() { out += self.weights[i] * (local[i] - self.targets[i]).powi(2); }
        out
    }
    fn local_gradient(&self, local: &[f64]) -> Vec<f64> {
        (0..local.len()).map(|i| 2.0 * self.weights[i] * (local[i] - self.targets[i])).collect()
    }
}

/// `sum_j (x[to_j] - x[from_j])^2` over consecutive-knot pairs.  Indices are stored as
/// `[from_0, to_0, from_1, to_1, ...]`.
#[derive(Clone, Debug)]
pub struct SquaredDifferenceTerm {
    indices: Vec<usize>
}
impl SquaredDifferenceTerm {
    pub fn new(pairs: &[(usize, usize)]) -> Self {
        let mut indices = vec![];
        for (from, to) in pairs { indices.push(*from); indices.push(*to); }
        Self { indices }
    }
}
impl ProgramTerm for SquaredDifferenceTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        local.chunks(2).map(|c| (c[1] - c[0]).powi(2)).sum()
    }
    fn local_gradient(&self, local: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; local.len()];
        for (j, c) in local.chunks(2).enumerate() {
            let d = 2.0 * (c[1] - c[0]);
            out[2 * j] = -d;
            out[2 * j + 1] = d;
        }
        out
    }
}

/// Squared distance of a point to an axis-aligned box `center +- half_extents`.  Zero
/// inside the box.
#[derive(Clone, Debug)]
pub struct RegionDistanceTerm {
    indices: Vec<usize>,
    center: Vec<f64>,
    half_extents: Vec<f64>
}
impl RegionDistanceTerm {
    pub fn new(indices: Vec<usize>, center: Vec<f64>, half_extents: Vec<f64>) -> Result<Self, PlanningError> {
        if indices.len() != center.len() || indices.len() != half_extents.len() {
            return Err(PlanningError::new_generic_error_str("region term needs as many centers and half extents as indices.", file!(), line!()));
        }
        Ok(Self { indices, center, half_extents })
    }
}
impl ProgramTerm for RegionDistanceTerm {
    fn variable_indices(&self) -> &[usize] {
        &self.indices
    }
    fn evaluate(&self, local: &[f64]) -> f64 {
        let mut out = 0.0;
        for i in 0..local.len() {
            let excess = ((local[i] - self.center[i]).abs() - self.half_extents[i]).max(0.0);
            out += excess * excess;
        }
        out
    }
    fn local_gradient(&self, local: &[f64]) -> Vec<f64> {
        (0..local.len()).map(|i| {
            let d = local[i] - self.center[i];
            let excess = (d.abs() - self.half_extents[i]).max(0.0);
            2.0 * excess * d.signum()
        }).collect()
    }
}

/// Where a planar pose comes from inside a program: three decision variables, or a
/// constant (static bodies and pinned start poses).
#[derive(Clone, Debug, PartialEq)]
pub enum PlanarPoseSource {
    Variables([usize; 3]),
    Fixed([f64; 3])
}

/// Pose reference into a term's local variable slice.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalPose {
    Local([usize; 3]),
    Fixed([f64; 3])
}
impl LocalPose {
    pub fn read(&self, local: &[f64]) -> [f64; 3] {
        match self {
            LocalPose::Local(i) => { [local[i[0]], local[i[1]], local[i[2]]] }
            LocalPose::Fixed(p) => { *p }
        }
    }
}

/// Collects the global variable indices a nonlinear term reads and hands out their
/// positions in the term's local slice.
#[derive(Clone, Debug, Default)]
pub struct LocalVariableMap {
    global: Vec<usize>
}
impl LocalVariableMap {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(&mut self, global_idx: usize) -> usize {
        match self.global.iter().position(|g| *g == global_idx) {
            Some(p) => { p }
            None => {
                self.global.push(global_idx);
                self.global.len() - 1
            }
        }
    }
    pub fn register_pose(&mut self, source: &PlanarPoseSource) -> LocalPose {
        match source {
            PlanarPoseSource::Variables(idxs) => {
                LocalPose::Local([self.register(idxs[0]), self.register(idxs[1]), self.register(idxs[2])])
            }
            PlanarPoseSource::Fixed(p) => { LocalPose::Fixed(*p) }
        }
    }
    pub fn into_indices(self) -> Vec<usize> {
        self.global
    }
}
