//! What a caller hands the planner: start and goal states, the horizon, and every knob of
//! the search.  All of these types load from json, ron or toml files.

use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::contact_modes::{ContactMode, PairMode};
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::nonlinear_optimization::SolverParameters;
use crate::rigid_body_model::{PlanarPose, RigidBodyModel, RigidBodyState};
use crate::utils::utils_console::PlanningDebug;
use crate::utils::utils_errors::PlanningError;
use crate::utils::utils_traits::SaveAndLoadable;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GoalSpecification {
    /// Exact final pose.
    State(PlanarPose),
    /// Final position inside `center +- half_extents`; orientation within
    /// `orientation_tolerance` of `center.theta`, or free if `None`.
    Region { center: PlanarPose, half_extents: [f64; 2], orientation_tolerance: Option<f64> }
}
impl GoalSpecification {
    /// Pose the cold-start guess interpolates towards.
    pub fn nominal_pose(&self) -> PlanarPose {
        match self {
            GoalSpecification::State(p) => { *p }
            GoalSpecification::Region { center, .. } => { *center }
        }
    }
    fn validate(&self) -> Result<(), PlanningError> {
        if let GoalSpecification::Region { half_extents, orientation_tolerance, .. } = self {
            if half_extents.iter().any(|h| !(*h >= 0.0)) || orientation_tolerance.map(|o| !(o >= 0.0)).unwrap_or(false) {
                return Err(PlanningError::new_config_error(&format!("goal region extents must be non-negative, got {:?} and {:?}.", half_extents, orientation_tolerance), file!(), line!()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedSegment {
    /// Pair name to mode.  Active pairs that are not listed are separated.
    pub modes: BTreeMap<String, PairMode>,
    pub num_steps: usize
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanningRequest {
    /// Poses of every movable body by name.  Static bodies use the pose from the model.
    pub start_state: BTreeMap<String, PlanarPose>,
    pub goals: BTreeMap<String, GoalSpecification>,
    /// Seconds.
    pub time_horizon: f64,
    pub horizon_steps: usize,
    #[serde(default)]
    pub seed_sequence: Option<Vec<SeedSegment>>,
    /// Pair names the planner may put in contact.  Defaults to every pair that can touch.
    #[serde(default)]
    pub active_pairs: Option<Vec<String>>,
    #[serde(default)]
    pub config: PlannerConfig
}
impl SaveAndLoadable for PlanningRequest { }
impl PlanningRequest {
    pub fn dt(&self) -> f64 {
        self.time_horizon / self.horizon_steps as f64
    }
    /// Push the slider of `PlanarSceneModel::new_test_pusher_slider_scene` from the origin to
    /// `x = 0.3`, starting with the pusher at `x = -0.5`.
    #[cfg(test)]
    pub fn new_test_pusher_slider_request(horizon_steps: usize) -> Self {
        Self {
            start_state: [("pusher".to_string(), PlanarPose::new(-0.5, 0.0, 0.0)), ("slider".to_string(), PlanarPose::identity())].into_iter().collect(),
            goals: [("slider".to_string(), GoalSpecification::State(PlanarPose::new(0.3, 0.0, 0.0)))].into_iter().collect(),
            time_horizon: 1.0,
            horizon_steps,
            seed_sequence: None,
            active_pairs: None,
            config: PlannerConfig::default()
        }
    }
    /// Turns names into indices and checks everything against the model.  Every error here is
    /// raised before any search starts.
    pub fn resolve(&self, model: &dyn RigidBodyModel) -> Result<ResolvedPlanningRequest, PlanningError> {
        self.config.validate()?;
        if self.horizon_steps == 0 {
            return Err(PlanningError::new_config_error("horizon_steps must be at least 1.", file!(), line!()));
        }
        if !(self.time_horizon > 0.0) || !self.time_horizon.is_finite() {
            return Err(PlanningError::new_config_error(&format!("time_horizon must be positive and finite, got {}.", self.time_horizon), file!(), line!()));
        }

        for name in self.start_state.keys() { model.body_idx_from_name(name)?; }
        let mut poses = vec![];
        for (body_idx, body) in model.bodies().iter().enumerate() {
            let pose = match model.static_pose(body_idx)? {
                Some(p) => { p }
                None => {
                    *self.start_state.get(&body.name)
                        .ok_or_else(|| PlanningError::new_model_error(&format!("start state is missing movable body {:?}.", body.name), file!(), line!()))?
                }
            };
            poses.push(pose);
        }
        let start_state = RigidBodyState::new(poses, None)?;

        let mut goals = vec![];
        for (name, goal) in &self.goals {
            let body_idx = model.body_idx_from_name(name)?;
            if !model.body(body_idx)?.kind.is_movable() {
                return Err(PlanningError::new_model_error(&format!("goal given for static body {:?}.", name), file!(), line!()));
            }
            goal.validate()?;
            goals.push((body_idx, goal.clone()));
        }

        let active_pairs = match &self.active_pairs {
            None => {
                (0..model.contact_pairs().len()).filter(|p| model.contact_pairs()[*p].is_physically_possible()).collect::<Vec<usize>>()
            }
            Some(names) => {
                let mut out_vec = vec![];
                for name in names {
                    let pair_idx = model.pair_idx_from_name(name)?;
                    model.contact_pair(pair_idx)?.check_contact_possible()?;
                    if !out_vec.contains(&pair_idx) { out_vec.push(pair_idx); }
                }
                out_vec.sort();
                out_vec
            }
        };
        if active_pairs.is_empty() {
            return Err(PlanningError::new_model_error("no contact pair can be put in contact.", file!(), line!()));
        }

        let seed_sequence = match &self.seed_sequence {
            None => { None }
            Some(segments) => {
                let mut out_vec = vec![];
                for s in segments {
                    let mut mode: BTreeMap<usize, PairMode> = active_pairs.iter().map(|p| (*p, PairMode::Separated)).collect();
                    for (pair_name, pair_mode) in &s.modes {
                        let pair_idx = model.pair_idx_from_name(pair_name)?;
                        model.contact_pair(pair_idx)?.check_contact_possible()?;
                        if !mode.contains_key(&pair_idx) {
                            return Err(PlanningError::new_invalid_mode_sequence_error(&format!("seed sequence uses pair {:?}, which is not active.", pair_name), file!(), line!()));
                        }
                        mode.insert(pair_idx, *pair_mode);
                    }
                    out_vec.push((ContactMode::new(mode), s.num_steps));
                }
                Some(ModeSequence::new(out_vec, self.horizon_steps)?)
            }
        };

        Ok(ResolvedPlanningRequest {
            start_state,
            goals,
            active_pairs,
            seed_sequence,
            time_horizon: self.time_horizon,
            horizon_steps: self.horizon_steps,
            config: self.config.clone()
        })
    }
}

/// A `PlanningRequest` with every name replaced by a model index.
#[derive(Clone, Debug)]
pub struct ResolvedPlanningRequest {
    pub start_state: RigidBodyState,
    pub goals: Vec<(usize, GoalSpecification)>,
    pub active_pairs: Vec<usize>,
    pub seed_sequence: Option<ModeSequence>,
    pub time_horizon: f64,
    pub horizon_steps: usize,
    pub config: PlannerConfig
}
impl ResolvedPlanningRequest {
    pub fn dt(&self) -> f64 {
        self.time_horizon / self.horizon_steps as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    Enumeration,
    GuidedSearch
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarmStartStrategy {
    None,
    SingleSwitchReuse
}

/// What to do when the candidate budget runs out without an accepted plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustionPolicy {
    /// Return the best sub-optimal plan, if any, tagged as best effort.
    BestEffort,
    /// Fail with `SearchExhausted` unless a best-effort plan exists.
    Fail
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub control_effort: f64,
    pub path_length: f64,
    pub force_regularization: f64,
    pub terminal_goal: f64
}
impl Default for CostWeights {
    fn default() -> Self {
        Self {
            control_effort: 1.0,
            path_length: 1.0,
            force_regularization: 0.01,
            terminal_goal: 10.0
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidedSearchParameters {
    /// Activation at or above which a knot is rounded to contact.
    pub rounding_threshold: f64,
    /// Largest boundary shift (in steps) explored by local search.
    pub neighborhood_size: usize,
    /// Maximum number of neighbors the local search yields.
    pub local_search_budget: usize,
    /// `abs(v_t)` above which a rounded contact is sliding instead of sticking.
    pub sliding_velocity_threshold: f64,
    /// `phi_max` of the relaxed distance constraint `phi <= (1 - alpha) * phi_max`.
    pub max_activation_distance: f64
}
impl Default for GuidedSearchParameters {
    fn default() -> Self {
        Self {
            rounding_threshold: 0.5,
            neighborhood_size: 2,
            local_search_budget: 32,
            sliding_velocity_threshold: 1e-3,
            max_activation_distance: 1.0
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub search_strategy: SearchStrategy,
    pub max_mode_switches: usize,
    pub min_segment_steps: usize,
    pub allow_sliding: bool,
    pub guided_search: GuidedSearchParameters,
    /// Wall-clock deadline for the whole request.  No candidate is dispatched after it.
    pub time_budget: Option<Duration>,
    /// Maximum number of candidates pulled from the sequencer.
    pub max_attempts: usize,
    pub residual_tolerance: f64,
    pub warm_start_strategy: WarmStartStrategy,
    pub cost_weights: CostWeights,
    pub solver_parameters: SolverParameters,
    pub max_normal_force: f64,
    /// Poses after the start knot stay within this distance of the box spanned by the start,
    /// goal and static poses.
    pub workspace_margin: f64,
    /// Orientations after the start knot stay within this angle of the start and goal
    /// orientations.
    pub max_rotation: f64,
    pub max_solve_retries: usize,
    pub retry_perturbation_std: f64,
    pub seed: u64,
    pub parallel_workers: usize,
    pub exhaustion_policy: ExhaustionPolicy,
    pub debug: PlanningDebug
}
impl SaveAndLoadable for PlannerConfig { }
impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            search_strategy: SearchStrategy::Enumeration,
            max_mode_switches: 2,
            min_segment_steps: 1,
            allow_sliding: true,
            guided_search: GuidedSearchParameters::default(),
            time_budget: None,
            max_attempts: 50,
            residual_tolerance: 1e-3,
            warm_start_strategy: WarmStartStrategy::SingleSwitchReuse,
            cost_weights: CostWeights::default(),
            solver_parameters: SolverParameters::default(),
            max_normal_force: 100.0,
            workspace_margin: 1.0,
            max_rotation: 2.0 * std::f64::consts::PI,
            max_solve_retries: 1,
            retry_perturbation_std: 0.01,
            seed: 0,
            parallel_workers: 1,
            exhaustion_policy: ExhaustionPolicy::BestEffort,
            debug: PlanningDebug::False
        }
    }
}
impl PlannerConfig {
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.min_segment_steps == 0 {
            return Err(PlanningError::new_config_error("min_segment_steps must be at least 1.", file!(), line!()));
        }
        if self.parallel_workers == 0 {
            return Err(PlanningError::new_config_error("parallel_workers must be at least 1.", file!(), line!()));
        }
        if !(self.residual_tolerance >= 0.0) {
            return Err(PlanningError::new_config_error(&format!("residual_tolerance must be non-negative, got {}.", self.residual_tolerance), file!(), line!()));
        }
        if !(self.max_normal_force > 0.0) {
            return Err(PlanningError::new_config_error(&format!("max_normal_force must be positive, got {}.", self.max_normal_force), file!(), line!()));
        }
        if !(self.workspace_margin >= 0.0) || !(self.max_rotation > 0.0) {
            return Err(PlanningError::new_config_error(&format!("workspace_margin must be non-negative and max_rotation positive, got {} and {}.", self.workspace_margin, self.max_rotation), file!(), line!()));
        }
        if !(self.retry_perturbation_std >= 0.0) {
            return Err(PlanningError::new_config_error(&format!("retry_perturbation_std must be non-negative, got {}.", self.retry_perturbation_std), file!(), line!()));
        }
        let g = &self.guided_search;
        if !(g.rounding_threshold > 0.0 && g.rounding_threshold < 1.0) {
            return Err(PlanningError::new_config_error(&format!("rounding_threshold must be in (0, 1), got {}.", g.rounding_threshold), file!(), line!()));
        }
        if !(g.sliding_velocity_threshold >= 0.0) || !(g.max_activation_distance > 0.0) {
            return Err(PlanningError::new_config_error("sliding_velocity_threshold must be non-negative and max_activation_distance positive.", file!(), line!()));
        }
        let s = &self.solver_parameters;
        if !(s.tolerance > 0.0 && s.constraint_tolerance > 0.0) || s.infeasibility_threshold < s.constraint_tolerance || s.max_iterations == 0
            || !(s.initial_penalty > 0.0) || !(s.penalty_update_factor > 1.0) || !(s.max_scaled_gradient > 0.0) {
            return Err(PlanningError::new_config_error(&format!("invalid solver parameters {:?}.", s), file!(), line!()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body_model::planar_scene_model::PlanarSceneModel;
    use crate::utils::utils_files::{load_object_from_string, SerializationFormat};

    fn request() -> PlanningRequest {
        PlanningRequest::new_test_pusher_slider_request(4)
    }

    #[test]
    fn resolve_fills_in_indices() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let r = request().resolve(&model).unwrap();
        assert_eq!(r.active_pairs, vec![0]);
        assert_eq!(r.goals[0].0, 1);
        assert_eq!(r.start_state.pose(0).unwrap().x, -0.5);
        assert!((r.dt() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn missing_start_pose_and_bad_horizon() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let mut r = request();
        r.start_state.remove("slider");
        assert!(matches!(r.resolve(&model), Err(PlanningError::ModelError(_))));
        let mut r = request();
        r.horizon_steps = 0;
        assert!(matches!(r.resolve(&model), Err(PlanningError::ConfigError(_))));
    }

    #[test]
    fn seed_sequence_must_cover_the_horizon() {
        let model = PlanarSceneModel::new_test_pusher_slider_scene();
        let mut r = request();
        r.seed_sequence = Some(vec![
            SeedSegment { modes: BTreeMap::new(), num_steps: 2 },
            SeedSegment { modes: [("pusher_slider".to_string(), PairMode::Sticking)].into_iter().collect(), num_steps: 1 }
        ]);
        assert!(matches!(r.resolve(&model), Err(PlanningError::InvalidModeSequence(_))));
        if let Some(s) = r.seed_sequence.as_mut() { s[1].num_steps = 2; }
        let resolved = r.resolve(&model).unwrap();
        assert_eq!(resolved.seed_sequence.unwrap().step_counts(), vec![2, 2]);
    }

    #[test]
    fn partial_config_files_use_defaults() {
        let c: PlannerConfig = load_object_from_string("max_mode_switches = 1\nresidual_tolerance = 0.01\n", &SerializationFormat::Toml).unwrap();
        assert_eq!(c.max_mode_switches, 1);
        assert_eq!(c.max_attempts, 50);
        let c = PlannerConfig::load_from_json_string(r#"{"search_strategy": "GuidedSearch", "guided_search": {"rounding_threshold": 0.7}}"#).unwrap();
        assert_eq!(c.search_strategy, SearchStrategy::GuidedSearch);
        assert_eq!(c.guided_search.neighborhood_size, 2);
        let mut bad = PlannerConfig::default();
        bad.guided_search.rounding_threshold = 1.5;
        assert!(matches!(bad.validate(), Err(PlanningError::ConfigError(_))));
        let mut bad = PlannerConfig::default();
        bad.solver_parameters.penalty_update_factor = 1.0;
        assert!(matches!(bad.validate(), Err(PlanningError::ConfigError(_))));
        let mut bad = PlannerConfig::default();
        bad.workspace_margin = -0.1;
        assert!(matches!(bad.validate(), Err(PlanningError::ConfigError(_))));
    }
}
