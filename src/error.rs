use thiserror::Error;

/// Everything that can end a planning run. None of these are retried
/// internally; callers decide whether to rebuild with other capacities.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed workload: {0}")]
    MalformedInput(String),

    #[error("degenerate workload: {0}")]
    DegenerateWorkload(String),

    #[error("no plan exists for these capacities and workload")]
    NoFeasiblePlan,

    #[error("solver stopped before reaching a definitive status: {0}")]
    SolverAborted(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
