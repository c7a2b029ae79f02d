//! The solving capability the planner depends on, and a small exact engine
//! that implements it.
//!
//! [`BranchAndBound`] is meant for reference and for tests over small
//! workloads; larger models should go to a real MILP solver, for example via
//! the LP file written by [`crate::model::lp`].

mod node;

use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::model::Model;
use crate::solver::node::*;

pub trait Solver {
    /// Blocks until the model is solved, proven infeasible, or the options
    /// stop the search.
    fn solve(&self, model: &Model, options: &SolveOptions) -> Solution;
}

/// Shared flag for stopping a running solve from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    pub time_limit: Option<Duration>,
    pub node_limit: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl SolveOptions {
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn interrupted(&self, started: Instant, nodes: usize) -> Option<AbortReason> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            Some(AbortReason::Cancelled)
        } else if let Some(limit) = self.time_limit.filter(|&limit| started.elapsed() >= limit) {
            Some(AbortReason::TimeLimit(limit))
        } else {
            self.node_limit
                .filter(|&limit| nodes >= limit)
                .map(AbortReason::NodeLimit)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    TimeLimit(Duration),
    NodeLimit(usize),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::TimeLimit(limit) => write!(f, "time limit of {:?} reached", limit),
            AbortReason::NodeLimit(limit) => write!(f, "node limit of {} reached", limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unsolved(AbortReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub nodes: usize,
    pub pruned: usize,
    pub elapsed: Duration,
}

/// Solver outcome. `values` holds one entry per model variable when the
/// status is optimal and is empty otherwise.
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    pub objective: Option<i64>,
    pub values: Vec<i64>,
    pub stats: SearchStats,
}

impl Solution {
    pub fn optimal(objective: i64, values: Vec<i64>) -> Self {
        Solution {
            status: SolveStatus::Optimal,
            objective: Some(objective),
            values,
            stats: SearchStats::default(),
        }
    }

    pub fn infeasible() -> Self {
        Solution {
            status: SolveStatus::Infeasible,
            objective: None,
            values: Vec::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn unsolved(reason: AbortReason) -> Self {
        Solution {
            status: SolveStatus::Unsolved(reason),
            objective: None,
            values: Vec::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn with_stats(mut self, stats: SearchStats) -> Self {
        self.stats = stats;
        self
    }
}

/// Best-first branch and bound over the variables' finite domains, with
/// bound propagation on every linear row. Exact, and exponential in the
/// worst case.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

impl Solver for BranchAndBound {
    fn solve(&self, model: &Model, options: &SolveOptions) -> Solution {
        info!(
            "Solving model: {} variables, {} constraints",
            model.variables().len(),
            model.constraints().len()
        );
        let started = Instant::now();
        let mut stats = SearchStats::default();
        let rows = Rows::new(model);

        let Some(root) = SearchNode::root(model, &rows) else {
            info!("Root propagation proved the model infeasible");
            stats.elapsed = started.elapsed();
            return Solution::infeasible().with_stats(stats);
        };
        let mut heap = BinaryHeap::new();
        heap.push(root);
        let mut visited = HashSet::new();
        let mut best: Option<(i64, Vec<i64>)> = None;

        while let Some(node) = heap.pop() {
            if let Some(reason) = options.interrupted(started, stats.nodes) {
                warn!("Search stopped after {} nodes: {}", stats.nodes, reason);
                stats.elapsed = started.elapsed();
                return Solution::unsolved(reason).with_stats(stats);
            }
            if !visited.insert(node.fingerprint()) {
                continue;
            }
            stats.nodes += 1;
            if best
                .as_ref()
                .is_some_and(|(objective, _)| node.lower_bound() >= *objective)
            {
                stats.pruned += 1;
                continue;
            }
            if let Some(values) = node.assignment() {
                if let Some(violation) = model.first_violation(&values) {
                    warn!("Discarding leaf that violates {}", violation);
                    continue;
                }
                let objective = model.objective_value(&values);
                if best.as_ref().map_or(true, |(incumbent, _)| objective < *incumbent) {
                    info!("New incumbent: objective {}", objective);
                    best = Some((objective, values));
                }
            } else {
                heap.extend(node.branch(model, &rows));
            }
        }

        stats.elapsed = started.elapsed();
        debug!(
            "Total unique nodes visited: {}, pruned: {}, in {:?}",
            stats.nodes, stats.pruned, stats.elapsed
        );
        match best {
            Some((objective, values)) => {
                info!("Optimal objective: {}", objective);
                Solution::optimal(objective, values).with_stats(stats)
            }
            None => {
                info!("No solution found");
                Solution::infeasible().with_stats(stats)
            }
        }
    }
}
