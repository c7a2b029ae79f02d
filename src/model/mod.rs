//! Integer program handed to a [`Solver`](crate::solver::Solver): bounded
//! integer variables, linear constraints over them and a linear objective to
//! minimise. The [`VariableLayout`] records which variable is which so that
//! solutions can be read back.

mod builder;
pub mod lp;

pub use builder::ModelBuilder;

use serde::Serialize;

use crate::types::*;
use crate::workload::Workload;

pub type VarId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VarKind {
    Binary,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    pub lower: i64,
    pub upper: i64,
}

impl Variable {
    pub fn binary(name: String) -> Self {
        Variable {
            name,
            kind: VarKind::Binary,
            lower: 0,
            upper: 1,
        }
    }

    pub fn integer(name: String, lower: i64, upper: i64) -> Self {
        Variable {
            name,
            kind: VarKind::Integer,
            lower,
            upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Sense {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl Sense {
    pub fn symbol(&self) -> &'static str {
        match self {
            Sense::Le => "<=",
            Sense::Ge => ">=",
            Sense::Eq => "=",
        }
    }

    pub fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Sense::Le => lhs <= rhs,
            Sense::Ge => lhs >= rhs,
            Sense::Eq => lhs == rhs,
        }
    }
}

/// `Σ coeff·var  sense  rhs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(VarId, i64)>,
    pub sense: Sense,
    pub rhs: i64,
}

impl Constraint {
    pub fn new(name: String, terms: Vec<(VarId, i64)>, sense: Sense, rhs: i64) -> Self {
        Constraint {
            name,
            terms,
            sense,
            rhs,
        }
    }

    pub fn activity(&self, values: &[i64]) -> i64 {
        self.terms
            .iter()
            .map(|&(var, coeff)| coeff * values[var])
            .sum()
    }

    pub fn is_satisfied(&self, values: &[i64]) -> bool {
        self.sense.holds(self.activity(values), self.rhs)
    }
}

/// Dense indexing of the decision variables. Actives come first, then
/// placements by (chunk rank, machine), then slots by
/// (chunk rank, deadline rank within the chunk, machine). Machine indexes
/// here are 0-based; [`MachineId`]s are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableLayout {
    machines: usize,
    chunks: Vec<ChunkId>,
    chunk_deadlines: Vec<Vec<Deadline>>,
    /// First (chunk, deadline) row of each chunk.
    slot_rows: Vec<usize>,
    placement_base: usize,
    slots_base: usize,
    len: usize,
}

impl VariableLayout {
    pub fn new(workload: &Workload, machines: usize) -> Self {
        let chunks: Vec<ChunkId> = workload.chunks().iter().map(|chunk| chunk.id()).collect();
        let chunk_deadlines: Vec<Vec<Deadline>> = workload
            .chunks()
            .iter()
            .map(|chunk| chunk.deadlines().collect())
            .collect();
        let mut slot_rows = Vec::with_capacity(chunks.len());
        let mut rows = 0;
        for deadlines in &chunk_deadlines {
            slot_rows.push(rows);
            rows += deadlines.len();
        }
        let placement_base = machines;
        let slots_base = placement_base + chunks.len() * machines;
        VariableLayout {
            machines,
            chunks,
            chunk_deadlines,
            slot_rows,
            placement_base,
            slots_base,
            len: slots_base + rows * machines,
        }
    }

    pub fn num_machines(&self) -> usize {
        self.machines
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_id(&self, chunk: usize) -> ChunkId {
        self.chunks[chunk]
    }

    pub fn machine_id(&self, machine: usize) -> MachineId {
        machine + 1
    }

    pub fn chunk_deadlines(&self, chunk: usize) -> &[Deadline] {
        &self.chunk_deadlines[chunk]
    }

    pub fn active(&self, machine: usize) -> VarId {
        debug_assert!(machine < self.machines);
        machine
    }

    pub fn placement(&self, chunk: usize, machine: usize) -> VarId {
        debug_assert!(machine < self.machines);
        self.placement_base + chunk * self.machines + machine
    }

    pub fn slots(&self, chunk: usize, deadline_rank: usize, machine: usize) -> VarId {
        debug_assert!(deadline_rank < self.chunk_deadlines[chunk].len());
        self.slots_base + (self.slot_rows[chunk] + deadline_rank) * self.machines + machine
    }

    /// Every (chunk rank, deadline rank, deadline) triple with a slot
    /// variable per machine.
    pub fn slot_entries(&self) -> impl Iterator<Item = (usize, usize, Deadline)> + '_ {
        self.chunk_deadlines
            .iter()
            .enumerate()
            .flat_map(|(chunk, deadlines)| {
                deadlines
                    .iter()
                    .enumerate()
                    .map(move |(rank, &deadline)| (chunk, rank, deadline))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    /// Minimised.
    objective: Vec<(VarId, i64)>,
    layout: VariableLayout,
}

impl Model {
    pub fn new(
        variables: Vec<Variable>,
        constraints: Vec<Constraint>,
        objective: Vec<(VarId, i64)>,
        layout: VariableLayout,
    ) -> Self {
        Model {
            variables,
            constraints,
            objective,
            layout,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(VarId, i64)] {
        &self.objective
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    pub fn objective_value(&self, values: &[i64]) -> i64 {
        self.objective
            .iter()
            .map(|&(var, coeff)| coeff * values[var])
            .sum()
    }

    /// First constraint or bound the assignment breaks, if any.
    pub fn first_violation(&self, values: &[i64]) -> Option<String> {
        if values.len() != self.variables.len() {
            return Some(format!(
                "expected {} values, got {}",
                self.variables.len(),
                values.len()
            ));
        }
        if let Some((var, value)) = self
            .variables
            .iter()
            .zip(values)
            .find(|(var, value)| **value < var.lower || **value > var.upper)
        {
            return Some(format!(
                "{} = {} outside [{}, {}]",
                var.name, value, var.lower, var.upper
            ));
        }
        self.constraints
            .iter()
            .find(|constraint| !constraint.is_satisfied(values))
            .map(|constraint| {
                format!(
                    "{}: {} {} {} does not hold",
                    constraint.name,
                    constraint.activity(values),
                    constraint.sense.symbol(),
                    constraint.rhs
                )
            })
    }

    pub fn to_lp_string(&self) -> String {
        lp::LpFormat(self).to_string()
    }
}
