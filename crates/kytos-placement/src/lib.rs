//! kytos-placement — decides where pods run.
//!
//! Takes the working pod set produced by `kytos-autoscale`, expresses the
//! placement question as a weighted objective over a binary pods x nodes
//! matrix, searches it with simulated annealing, and decodes the best
//! feasible matrix into CREATE / MOVE / KEEP / REMOVE actions.
//!
//! # Components
//!
//! - **`formulator`** — Cost matrices, objective, soft constraints
//! - **`annealer`** — Parallel Metropolis reads with feasibility selection
//! - **`decoder`** — Assignment matrix back to pods and actions
//! - **`solver`** — The end-to-end `solve_placement` pipeline

pub mod annealer;
pub mod decoder;
pub mod formulator;
pub mod solver;

pub use annealer::{AnnealOutcome, AnnealParams, Schedule, anneal};
pub use decoder::{DecodedPlan, decode};
pub use formulator::{
    Assignment, Constraint, ConstraintKind, FEASIBILITY_TOLERANCE, ObjectiveTerms, ObjectiveWeights,
    Problem, Violations, formulate,
};
pub use solver::solve_placement;
