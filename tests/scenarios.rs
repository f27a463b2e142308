//! End-to-end planning scenarios on a pusher/slider scene.
//!
//! Most scenarios swap the numerical solver for a scripted one, so the outcome only depends on
//! the coordinator, the sequencer and the transcription:
//! 1. A straight push is accepted on the separated-then-sticking sequence
//! 2. An unreachable goal exhausts the search
//! 3. A zero deadline dispatches nothing
//! 4. A welded pair is rejected before any search
//!
//! The OpEn-backed tests check that solves are reproducible, that a warm start from a feasible
//! push is kept feasible at every knot, and that a cold solve stays finite and inside the
//! workspace box.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use planning_through_contact::contact_modes::{ContactMode, PairMode};
use planning_through_contact::contact_modes::mode_sequence::ModeSequence;
use planning_through_contact::nonlinear_optimization::{NonlinearProgram, NumericalSolver, OpEnNumericalSolver, SolverExitStatus, SolverOutput, SolverParameters, SolverResult};
use planning_through_contact::plan_coordinator::PlanCoordinator;
use planning_through_contact::plan_coordinator::plan::Plan;
use planning_through_contact::planning_request::{ExhaustionPolicy, GoalSpecification, PlannerConfig, PlanningRequest};
use planning_through_contact::rigid_body_model::{BodyGeometry, PlanarPose, RigidBodyModel};
use planning_through_contact::rigid_body_model::planar_scene_model::{BodyDescription, BodyKindDescription, ContactPairDescription, PlanarSceneModel, SceneDescription};
use planning_through_contact::trajectory_optimization::TrajectorySegmentOptimizer;
use planning_through_contact::trajectory_optimization::decision_variables::DecisionVariableLayout;
use planning_through_contact::utils::utils_errors::PlanningError;
use planning_through_contact::utils::utils_traits::SaveAndLoadable;

const SCENE_JSON: &str = r#"{
    "bodies": [
        { "name": "pusher", "kind": { "Actuated": { "velocity_limits": [2.0, 2.0, 2.0] } }, "geometry": { "Disk": { "radius": 0.05 } } },
        { "name": "slider", "kind": { "Unactuated": { "limit_surface": { "Diagonal": { "a_xy": 1.0, "a_theta": 10.0 } } } }, "geometry": { "Box": { "half_extents": [0.1, 0.1] } } }
    ],
    "default_friction_coefficient": 0.5
}"#;

const HORIZON_STEPS: usize = 4;
const DT: f64 = 0.25;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn scene_description() -> SceneDescription {
    SceneDescription::load_from_json_string(SCENE_JSON).unwrap()
}

fn model_from(description: &SceneDescription) -> Arc<dyn RigidBodyModel> {
    Arc::new(PlanarSceneModel::new(description).unwrap())
}

fn push_request() -> PlanningRequest {
    PlanningRequest {
        start_state: [("pusher".to_string(), PlanarPose::new(-0.5, 0.0, 0.0)), ("slider".to_string(), PlanarPose::identity())].into_iter().collect(),
        goals: [("slider".to_string(), GoalSpecification::State(PlanarPose::new(0.3, 0.0, 0.0)))].into_iter().collect(),
        time_horizon: DT * HORIZON_STEPS as f64,
        horizon_steps: HORIZON_STEPS,
        seed_sequence: None,
        active_pairs: None,
        config: PlannerConfig::default()
    }
}

fn separated_then_sticking() -> ModeSequence {
    ModeSequence::new(vec![(ContactMode::new_all_separated(&[0]), 2), (ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]), 2)], HORIZON_STEPS).unwrap()
}

/// The pusher closes the gap in two steps, then pushes the slider 0.15 per step while sticking,
/// plus `overshoot` on the last step.  With `overshoot = 0` this is feasible for
/// `separated_then_sticking`; otherwise it misses the goal by exactly `overshoot`.
fn pushing_solution(model: &dyn RigidBodyModel, overshoot: f64) -> Vec<f64> {
    let layout = DecisionVariableLayout::new(model, &[0], HORIZON_STEPS).unwrap();
    let pusher_x = [-0.5, -0.325, -0.15, 0.0, 0.15 + overshoot];
    let slider_x = [0.0, 0.0, 0.0, 0.15, 0.3 + overshoot];
    let mut x = vec![0.0; layout.num_variables()];
    for knot in 0..layout.num_knots() {
        x[layout.pose_idxs(0, knot).unwrap()[0]] = pusher_x[knot];
        x[layout.pose_idxs(1, knot).unwrap()[0]] = slider_x[knot];
        if knot > 0 {
            x[layout.control_idxs(0, knot).unwrap()[0]] = (pusher_x[knot] - pusher_x[knot - 1]) / DT;
            x[layout.force_idxs(0, knot).unwrap().0] = (slider_x[knot] - slider_x[knot - 1]) / DT;
        }
    }
    x
}

/// Returns the same point for every program, reporting convergence.
struct ScriptedSolver {
    solution: Vec<f64>,
    num_calls: AtomicUsize
}
impl ScriptedSolver {
    fn new(solution: Vec<f64>) -> Self {
        Self { solution, num_calls: AtomicUsize::new(0) }
    }
}
impl NumericalSolver for ScriptedSolver {
    fn solve(&self, program: &NonlinearProgram, _initial_guess: &[f64], _parameters: &SolverParameters) -> Result<SolverOutput, PlanningError> {
        self.num_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SolverOutput {
            solution: self.solution.clone(),
            exit_status: SolverExitStatus::Converged,
            num_outer_iterations: 1,
            num_inner_iterations: 1,
            solve_time: Duration::from_millis(1),
            cost: program.cost(&self.solution)
        })
    }
}

/// Hands the initial guess back, clipped to the bounds.
struct EchoSolver {
    num_calls: AtomicUsize
}
impl NumericalSolver for EchoSolver {
    fn solve(&self, program: &NonlinearProgram, initial_guess: &[f64], _parameters: &SolverParameters) -> Result<SolverOutput, PlanningError> {
        self.num_calls.fetch_add(1, Ordering::SeqCst);
        let solution = program.project_onto_bounds(initial_guess);
        Ok(SolverOutput {
            cost: program.cost(&solution),
            solution,
            exit_status: SolverExitStatus::Converged,
            num_outer_iterations: 1,
            num_inner_iterations: 1,
            solve_time: Duration::from_millis(1)
        })
    }
}

#[test]
fn straight_push_is_accepted() {
    init_logging();
    let model = model_from(&scene_description());
    let solver = Arc::new(ScriptedSolver::new(pushing_solution(&*model, 0.0)));
    let coordinator = PlanCoordinator::new(model, solver.clone());

    let (outcome, statistics) = coordinator.plan_with_statistics(&push_request()).unwrap();
    assert!(outcome.is_accepted());
    let plan = outcome.plan().unwrap();
    assert!(!plan.is_best_effort());
    assert_eq!(plan.mode_sequence(), &separated_then_sticking());
    assert_eq!(plan.diagnostics().result, SolverResult::Optimal);
    assert_eq!(plan.diagnostics().num_attempts, statistics.num_attempts);
    assert!(plan.residual() <= 1e-3);
    assert!(plan.segment_diagnostics().iter().all(|d| d.residual <= 1e-3));

    // everything before the accepted candidate was rejected
    let (last, rejected) = statistics.candidates.split_last().unwrap();
    assert_eq!(last.sequence, separated_then_sticking());
    assert!(rejected.iter().all(|c| !c.result.is_acceptable(1e-3)));
    assert!(solver.num_calls.load(Ordering::SeqCst) >= statistics.num_attempts);

    assert_eq!(plan.segments().len(), 2);
    assert_eq!(plan.knots().len(), HORIZON_STEPS + 1);
    let slider = plan.final_state().unwrap().pose(1).unwrap();
    assert!((slider.x - 0.3).abs() < 1e-9);
    let forces: Vec<f64> = plan.knots().iter().map(|k| k.contact_forces[&0].normal).collect();
    assert_eq!(forces[..3], [0.0, 0.0, 0.0]);
    assert!((forces[3] - 0.6).abs() < 1e-9);

    let reloaded = Plan::load_from_json_string(&plan.get_serialization_string().unwrap()).unwrap();
    assert_eq!(reloaded.mode_sequence(), plan.mode_sequence());
    assert_eq!(reloaded.knots().len(), plan.knots().len());
}

#[test]
fn near_miss_is_kept_as_best_effort() {
    init_logging();
    let model = model_from(&scene_description());
    // misses the goal by 2e-3: sub-optimal, and above the acceptance tolerance below
    let solver = Arc::new(ScriptedSolver::new(pushing_solution(&*model, 2e-3)));
    let coordinator = PlanCoordinator::new(model, solver);
    let mut request = push_request();
    request.config.max_attempts = 12;
    request.config.residual_tolerance = 1e-3;

    let (outcome, statistics) = coordinator.plan_with_statistics(&request).unwrap();
    assert!(!outcome.is_accepted());
    assert_eq!(statistics.num_attempts, 12);
    let plan = outcome.plan().unwrap();
    assert!(plan.is_best_effort());
    assert_eq!(plan.mode_sequence(), &separated_then_sticking());
    assert!((plan.residual() - 2e-3).abs() < 1e-9);

    request.config.exhaustion_policy = ExhaustionPolicy::Fail;
    assert!(coordinator.plan(&request).unwrap().plan().unwrap().is_best_effort());
}

#[test]
fn goal_inside_an_obstacle_exhausts_the_search() {
    init_logging();
    let mut description = scene_description();
    description.bodies.push(BodyDescription {
        name: "wall".to_string(),
        kind: BodyKindDescription::Static { pose: PlanarPose::new(0.3, 0.0, 0.0) },
        geometry: BodyGeometry::Box { half_extents: [0.05, 0.5] }
    });
    let model = model_from(&description);
    assert_eq!(model.contact_pairs().len(), 3);
    let solver = Arc::new(EchoSolver { num_calls: AtomicUsize::new(0) });
    let coordinator = PlanCoordinator::new(model, solver.clone());
    let mut request = push_request();
    request.config.max_attempts = 6;
    request.config.max_mode_switches = 1;

    let (outcome, statistics) = coordinator.plan_with_statistics(&request).unwrap();
    assert!(outcome.plan().is_none());
    assert_eq!(statistics.num_infeasible, 6);
    assert_eq!(solver.num_calls.load(Ordering::SeqCst), 12);

    request.config.exhaustion_policy = ExhaustionPolicy::Fail;
    assert!(matches!(coordinator.plan(&request), Err(PlanningError::SearchExhausted { attempts: 6 })));
}

#[test]
fn zero_time_budget_solves_nothing() {
    let model = model_from(&scene_description());
    let solver = Arc::new(EchoSolver { num_calls: AtomicUsize::new(0) });
    let coordinator = PlanCoordinator::new(model, solver.clone());
    let mut request = push_request();
    request.config.time_budget = Some(Duration::ZERO);

    let outcome = coordinator.plan(&request).unwrap();
    assert!(!outcome.is_accepted());
    assert!(outcome.into_plan().is_none());
    assert_eq!(solver.num_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn welded_pair_is_a_model_error() {
    let mut description = scene_description();
    description.welds.push(("pusher".to_string(), "slider".to_string()));
    description.contact_pairs.push(ContactPairDescription { name: None, body_a: "pusher".to_string(), body_b: "slider".to_string(), friction_coefficient: None });
    let model = model_from(&description);
    let solver = Arc::new(EchoSolver { num_calls: AtomicUsize::new(0) });
    let coordinator = PlanCoordinator::new(model, solver.clone());

    let mut request = push_request();
    assert!(matches!(coordinator.plan(&request), Err(PlanningError::ModelError(_))));
    request.active_pairs = Some(vec!["pusher_slider".to_string()]);
    assert!(matches!(coordinator.plan(&request), Err(PlanningError::ModelError(_))));
    assert_eq!(solver.num_calls.load(Ordering::SeqCst), 0);
}

fn short_open_request() -> PlanningRequest {
    let mut request = push_request();
    request.config.solver_parameters = SolverParameters {
        max_iterations: 100,
        max_outer_iterations: 5,
        max_time: None,
        ..SolverParameters::default()
    };
    request
}

#[test]
fn open_solves_are_reproducible() {
    init_logging();
    let model = model_from(&scene_description());
    let request = short_open_request();
    let resolved = Arc::new(request.resolve(&*model).unwrap());
    let optimizer = TrajectorySegmentOptimizer::new(model, resolved, Arc::new(OpEnNumericalSolver::new())).unwrap();

    let sequence = separated_then_sticking();
    let first = optimizer.solve(&sequence, None).unwrap();
    let second = optimizer.solve(&sequence, None).unwrap();
    assert_eq!(first.solution, second.solution);
    assert_eq!(first.result, second.result);

    let warm = optimizer.solve(&sequence, Some(&first.solution)).unwrap();
    let warm_again = optimizer.solve(&sequence, Some(&first.solution)).unwrap();
    assert_eq!(warm.solution, warm_again.solution);
}

#[test]
fn open_warm_start_from_a_feasible_push_stays_feasible() {
    init_logging();
    let model = model_from(&scene_description());
    let request = short_open_request();
    let tolerance = request.config.residual_tolerance;
    let resolved = Arc::new(request.resolve(&*model).unwrap());
    let feasible = pushing_solution(&*model, 0.0);
    let optimizer = TrajectorySegmentOptimizer::new(model, resolved, Arc::new(OpEnNumericalSolver::new())).unwrap();

    let sequence = separated_then_sticking();
    let program = optimizer.build_program(&sequence).unwrap();
    assert!(program.residual(&feasible) <= 1e-4);

    let warm = optimizer.solve(&sequence, Some(&feasible)).unwrap();
    assert!(warm.result.is_acceptable(tolerance), "{:?}", warm.result);
    assert!(warm.diagnostics.residual <= 1e-4, "{:e}", warm.diagnostics.residual);
    assert_eq!(warm.diagnostics.segment_residuals.len(), 2);
    assert!(warm.diagnostics.segment_residuals.iter().all(|r| *r <= tolerance));

    // every knot after the start carries its own constraints, and all of them hold
    let violations = program.constraint_violations(&warm.solution);
    for knot in 1..=HORIZON_STEPS {
        assert!(violations.iter().any(|(tag, _)| tag.knot == knot), "knot {} is unconstrained", knot);
    }
    for (tag, v) in &violations {
        assert!(*v <= tolerance, "{:?} violated by {:e}", tag, v);
    }
    let separated_force = warm.segments[0].knots()[1].contact_forces[&0].normal;
    assert!(separated_force.abs() <= tolerance, "{}", separated_force);
}

#[test]
fn open_cold_solve_stays_bounded() {
    init_logging();
    let model = model_from(&scene_description());
    let request = short_open_request();
    let resolved = Arc::new(request.resolve(&*model).unwrap());
    let optimizer = TrajectorySegmentOptimizer::new(model.clone(), resolved, Arc::new(OpEnNumericalSolver::new())).unwrap();

    let cold = optimizer.solve(&separated_then_sticking(), None).unwrap();
    let d = &cold.diagnostics;
    assert!(!matches!(cold.result, SolverResult::SolverError(_)), "{:?}", cold.result);
    assert!(d.residual.is_finite());
    assert!(d.residual <= d.initial_residual.max(request.config.solver_parameters.constraint_tolerance), "{:e} > {:e}", d.residual, d.initial_residual);
    assert!(cold.solution.iter().all(|v| v.is_finite()));

    let (lower, upper) = optimizer.workspace_box().unwrap();
    let layout = DecisionVariableLayout::new(&*model, &[0], HORIZON_STEPS).unwrap();
    for body_idx in 0..2 {
        for knot in 0..layout.num_knots() {
            let idxs = layout.pose_idxs(body_idx, knot).unwrap();
            for c in 0..3 {
                let v = cold.solution[idxs[c]];
                assert!(v >= lower[c] - 1e-9 && v <= upper[c] + 1e-9, "body {} knot {} coordinate {}: {} outside [{}, {}]", body_idx, knot, c, v, lower[c], upper[c]);
            }
        }
    }
}

#[test]
fn open_warm_start_from_a_solved_push_needs_no_more_iterations() {
    init_logging();
    let model = model_from(&scene_description());
    let resolved = Arc::new(short_open_request().resolve(&*model).unwrap());
    let optimizer = TrajectorySegmentOptimizer::new(model, resolved, Arc::new(OpEnNumericalSolver::new())).unwrap();

    let sequence = separated_then_sticking();
    let cold = optimizer.solve(&sequence, None).unwrap();
    let warm = optimizer.solve(&sequence, Some(&cold.solution)).unwrap();
    assert!(warm.diagnostics.num_inner_iterations <= cold.diagnostics.num_inner_iterations,
            "warm {} > cold {}", warm.diagnostics.num_inner_iterations, cold.diagnostics.num_inner_iterations);
    assert!(warm.diagnostics.residual <= cold.diagnostics.residual.max(1e-4));
}
