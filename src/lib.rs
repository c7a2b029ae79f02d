//! Chunk placement and deadline slot scheduling.
//!
//! A [`Workload`] of jobs needing timed access to chunks is turned into an
//! integer program by [`ModelBuilder`], solved by any [`Solver`], and read
//! back into an [`AssignmentPlan`] by [`extract_plan`].

pub mod error;
pub mod extract;
pub mod model;
pub mod solver;
pub mod types;
pub mod workload;

pub use error::{Error, Result};
pub use extract::{extract_plan, AssignmentPlan, MachinePlan, PlanViolation, SlotAllocation};
pub use model::{Model, ModelBuilder};
pub use solver::{BranchAndBound, CancelToken, SolveOptions, SolveStatus, Solution, Solver};
pub use types::*;
pub use workload::{Chunk, Workload};

/// Builds the model for `workload`, solves it and extracts the plan.
pub fn solve<S: Solver + ?Sized>(
    workload: &Workload,
    capacities: Capacities,
    solver: &S,
    options: &SolveOptions,
) -> Result<AssignmentPlan> {
    let model = ModelBuilder::new(workload, capacities).build()?;
    let solution = solver.solve(&model, options);
    extract_plan(&model, &solution)
}
