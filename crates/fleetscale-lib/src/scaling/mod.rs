//! Scale-out control
//!
//! Turns fleet readings into scale-up decisions, resolves the cached
//! deployment template for the live fleet, and tracks the resulting
//! deployment to a terminal state.

mod controller;
mod decision;
mod mutator;
mod status;
mod tracker;


pub use controller::{Controller, ControllerBuilder};
pub use decision::{next_streak, ScaleDecisionEngine};
pub use mutator::{DeploymentMutator, ResolvedTemplate};
pub use status::{ControllerPhase, ControllerStatus, StatusSnapshot};
pub use tracker::{
    deployment_name, map_provisioning_state, DeploymentStatus, DeploymentTracker, TrackOutcome,
};
