//! A contact-mode-aware trajectory optimizer for planar quasi-static manipulation.
//! Given a scene of rigid bodies (an actuated pusher and one or more unactuated sliders), a start
//! state and a goal, it searches over sequences of discrete contact modes and, for each candidate
//! sequence, solves a nonlinear program over poses, controls and contact forces.  The first
//! candidate whose solve is feasible within tolerance becomes the plan.
//!
//! The usual entry point is `plan_coordinator::PlanCoordinator`.

pub mod contact_modes;
pub mod mode_sequencer;
pub mod nonlinear_optimization;
pub mod plan_coordinator;
pub mod planning_request;
pub mod rigid_body_model;
pub mod trajectory_optimization;
pub mod utils;
