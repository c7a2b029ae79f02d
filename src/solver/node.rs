use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use im::Vector;
use log::trace;

use crate::model::{Model, Sense, VarId};

/// Every model constraint rewritten as `Σ coeff·var <= rhs`, with the rows
/// each variable appears in.
pub(crate) struct Rows {
    rows: Vec<Row>,
    watch: Vec<Vec<usize>>,
}

struct Row {
    terms: Vec<(VarId, i64)>,
    rhs: i64,
}

impl Rows {
    pub fn new(model: &Model) -> Self {
        let mut rows = Vec::with_capacity(model.constraints().len());
        for constraint in model.constraints() {
            let negated = || -> Vec<(VarId, i64)> {
                constraint.terms.iter().map(|&(var, coeff)| (var, -coeff)).collect()
            };
            match constraint.sense {
                Sense::Le => rows.push(Row {
                    terms: constraint.terms.clone(),
                    rhs: constraint.rhs,
                }),
                Sense::Ge => rows.push(Row {
                    terms: negated(),
                    rhs: -constraint.rhs,
                }),
                Sense::Eq => {
                    rows.push(Row {
                        terms: constraint.terms.clone(),
                        rhs: constraint.rhs,
                    });
                    rows.push(Row {
                        terms: negated(),
                        rhs: -constraint.rhs,
                    });
                }
            }
        }
        let mut watch = vec![Vec::new(); model.variables().len()];
        for (idx, row) in rows.iter().enumerate() {
            for &(var, _) in &row.terms {
                watch[var].push(idx);
            }
        }
        Rows { rows, watch }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Domain {
    pub lo: i64,
    pub hi: i64,
}

impl Domain {
    pub fn is_fixed(&self) -> bool {
        self.lo == self.hi
    }
}

/// A box of variable domains still to be searched. Domains live in a
/// persistent vector so that branching clones are cheap.
#[derive(Debug, Clone)]
pub(crate) struct SearchNode {
    domains: Vector<Domain>,
    lower_bound: i64,
    depth: usize,
}

/// Heap order: lowest objective bound first, deepest first among equals.
impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .lower_bound
            .cmp(&self.lower_bound)
            .then(self.depth.cmp(&other.depth))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl SearchNode {
    /// The root node after propagating every row, or `None` when propagation
    /// alone proves the model infeasible.
    pub fn root(model: &Model, rows: &Rows) -> Option<Self> {
        let domains = model
            .variables()
            .iter()
            .map(|var| Domain {
                lo: var.lower,
                hi: var.upper,
            })
            .collect();
        let mut node = SearchNode {
            domains,
            lower_bound: 0,
            depth: 0,
        };
        if node.domains.iter().any(|domain| domain.lo > domain.hi)
            || !node.propagate(rows, 0..rows.len())
        {
            return None;
        }
        node.lower_bound = node.objective_bound(model);
        Some(node)
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    #[cfg(test)]
    pub fn domain(&self, var: VarId) -> Domain {
        self.domains[var]
    }

    /// The assignment when every domain is a single value.
    pub fn assignment(&self) -> Option<Vec<i64>> {
        self.domains
            .iter()
            .map(|domain| domain.is_fixed().then_some(domain.lo))
            .collect()
    }

    /// Splits the first unfixed variable's domain in two. Children that
    /// propagation refutes are dropped.
    pub fn branch(&self, model: &Model, rows: &Rows) -> Vec<SearchNode> {
        let Some(var) = self.domains.iter().position(|domain| !domain.is_fixed()) else {
            return Vec::new();
        };
        let Domain { lo, hi } = self.domains[var];
        let mid = (lo + hi).div_euclid(2);
        [Domain { lo, hi: mid }, Domain { lo: mid + 1, hi }]
            .into_iter()
            .filter_map(|domain| {
                let mut child = self.clone();
                child.depth += 1;
                child.domains.set(var, domain);
                if !child.propagate(rows, rows.watch[var].iter().copied()) {
                    trace!(
                        "Depth {}: {} in [{}, {}] refuted",
                        child.depth,
                        var,
                        domain.lo,
                        domain.hi
                    );
                    return None;
                }
                child.lower_bound = child.objective_bound(model);
                Some(child)
            })
            .collect()
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.domains.hash(&mut hasher);
        hasher.finish()
    }

    fn objective_bound(&self, model: &Model) -> i64 {
        model
            .objective()
            .iter()
            .map(|&(var, coeff)| {
                let domain = self.domains[var];
                if coeff >= 0 {
                    coeff * domain.lo
                } else {
                    coeff * domain.hi
                }
            })
            .sum()
    }

    /// Tightens domains against the given rows, and every row touched by a
    /// tightened variable, until nothing changes. Returns false on an empty
    /// domain or a row that cannot be met.
    fn propagate(&mut self, rows: &Rows, seeds: impl IntoIterator<Item = usize>) -> bool {
        let mut queued = vec![false; rows.rows.len()];
        let mut queue = VecDeque::new();
        for idx in seeds {
            if !queued[idx] {
                queued[idx] = true;
                queue.push_back(idx);
            }
        }
        while let Some(idx) = queue.pop_front() {
            queued[idx] = false;
            let row = &rows.rows[idx];
            let min_activity: i64 = row
                .terms
                .iter()
                .map(|&(var, coeff)| self.min_term(var, coeff))
                .sum();
            if min_activity > row.rhs {
                return false;
            }
            for &(var, coeff) in &row.terms {
                let slack = row.rhs - (min_activity - self.min_term(var, coeff));
                let mut domain = self.domains[var];
                if coeff > 0 {
                    let hi = slack.div_euclid(coeff);
                    if hi >= domain.hi {
                        continue;
                    }
                    domain.hi = hi;
                } else if coeff < 0 {
                    let lo = -slack.div_euclid(-coeff);
                    if lo <= domain.lo {
                        continue;
                    }
                    domain.lo = lo;
                } else {
                    continue;
                }
                if domain.lo > domain.hi {
                    return false;
                }
                self.domains.set(var, domain);
                for &other in &rows.watch[var] {
                    if other != idx && !queued[other] {
                        queued[other] = true;
                        queue.push_back(other);
                    }
                }
            }
        }
        true
    }

    fn min_term(&self, var: VarId, coeff: i64) -> i64 {
        let domain = self.domains[var];
        if coeff >= 0 {
            coeff * domain.lo
        } else {
            coeff * domain.hi
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, Variable, VariableLayout};
    use crate::workload::Workload;

    fn model(variables: Vec<Variable>, constraints: Vec<Constraint>) -> Model {
        let empty = Workload::from_jobs(Vec::new()).unwrap();
        Model::new(variables, constraints, vec![(0, 1)], VariableLayout::new(&empty, 0))
    }

    #[test]
    fn root_propagation_tightens_bounds() {
        // x + 2y <= 5, x >= 3, y in [0, 4]
        let model = model(
            vec![
                Variable::integer("x".into(), 0, 10),
                Variable::integer("y".into(), 0, 4),
            ],
            vec![
                Constraint::new("cap".into(), vec![(0, 1), (1, 2)], Sense::Le, 5),
                Constraint::new("min".into(), vec![(0, 1)], Sense::Ge, 3),
            ],
        );
        let rows = Rows::new(&model);
        let root = SearchNode::root(&model, &rows).unwrap();
        assert_eq!(root.domain(0), Domain { lo: 3, hi: 5 });
        assert_eq!(root.domain(1), Domain { lo: 0, hi: 1 });
        assert_eq!(root.lower_bound(), 3);
    }

    #[test]
    fn negative_coefficients_round_up() {
        // 7 - 2z <= 0  =>  z >= 4
        let model = model(
            vec![Variable::integer("z".into(), 0, 9)],
            vec![Constraint::new("need".into(), vec![(0, -2)], Sense::Le, -7)],
        );
        let rows = Rows::new(&model);
        let root = SearchNode::root(&model, &rows).unwrap();
        assert_eq!(root.domain(0), Domain { lo: 4, hi: 9 });
    }

    #[test]
    fn equality_fixes_variable() {
        let model = model(
            vec![Variable::integer("x".into(), 0, 9)],
            vec![Constraint::new("pin".into(), vec![(0, 3)], Sense::Eq, 6)],
        );
        let rows = Rows::new(&model);
        assert_eq!(rows.len(), 2);
        let root = SearchNode::root(&model, &rows).unwrap();
        assert_eq!(root.assignment(), Some(vec![2]));
    }

    #[test]
    fn root_detects_infeasibility() {
        let model = model(
            vec![Variable::binary("a".into()), Variable::binary("b".into())],
            vec![Constraint::new("both".into(), vec![(0, 1), (1, 1)], Sense::Ge, 3)],
        );
        let rows = Rows::new(&model);
        assert!(SearchNode::root(&model, &rows).is_none());
    }

    #[test]
    fn branching_splits_and_propagates() {
        // b - a <= 0: fixing a = 0 forces b = 0
        let model = model(
            vec![Variable::binary("a".into()), Variable::integer("b".into(), 0, 3)],
            vec![Constraint::new("gate".into(), vec![(1, 1), (0, -3)], Sense::Le, 0)],
        );
        let rows = Rows::new(&model);
        let root = SearchNode::root(&model, &rows).unwrap();
        assert!(root.assignment().is_none());

        let children = root.branch(&model, &rows);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].assignment(), Some(vec![0, 0]));
        assert_eq!(children[1].domain(0), Domain { lo: 1, hi: 1 });
        assert_eq!(children[1].domain(1), Domain { lo: 0, hi: 3 });
        assert_eq!(children[1].lower_bound(), 1);
        assert_ne!(children[0].fingerprint(), children[1].fingerprint());
    }

    #[test]
    fn heap_prefers_low_bound_then_depth() {
        let node = |lower_bound, depth| SearchNode {
            domains: Vector::new(),
            lower_bound,
            depth,
        };
        let mut heap = std::collections::BinaryHeap::from(vec![node(2, 9), node(1, 1), node(1, 4)]);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|node| (node.lower_bound, node.depth))
            .collect();
        assert_eq!(order, vec![(1, 4), (1, 1), (2, 9)]);
    }
}
