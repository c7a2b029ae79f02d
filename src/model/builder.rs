use std::iter::once;

use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::model::*;
use crate::types::*;
use crate::workload::{Chunk, Workload};

/// Translates a workload and per-machine capacities into a [`Model`].
///
/// The candidate machine count defaults to `⌊total accesses / storage⌋`.
/// Building never tries to prove feasibility; an unsatisfiable workload
/// produces a model the solver reports as infeasible.
pub struct ModelBuilder<'a> {
    workload: &'a Workload,
    capacities: Capacities,
    machine_bound: Option<usize>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(workload: &'a Workload, capacities: Capacities) -> Self {
        ModelBuilder {
            workload,
            capacities,
            machine_bound: None,
        }
    }

    /// Use `machines` candidates instead of the bound derived from demand.
    pub fn machine_bound(mut self, machines: usize) -> Self {
        self.machine_bound = Some(machines);
        self
    }

    pub fn candidate_machines(&self) -> Result<usize> {
        if self.workload.chunks().is_empty() {
            return Err(Error::DegenerateWorkload(
                "workload accesses no chunks".to_string(),
            ));
        }
        let machines = match self.machine_bound {
            Some(machines) => machines,
            None if self.capacities.storage == 0 => {
                return Err(Error::DegenerateWorkload(
                    "storage capacity is zero".to_string(),
                ))
            }
            None => (self.workload.total_accesses() / self.capacities.storage as u64) as usize,
        };
        if machines == 0 {
            return Err(Error::DegenerateWorkload(format!(
                "{} accesses with storage capacity {} leave no candidate machines",
                self.workload.total_accesses(),
                self.capacities.storage
            )));
        }
        Ok(machines)
    }

    pub fn build(&self) -> Result<Model> {
        let machines = self.candidate_machines()?;
        let layout = VariableLayout::new(self.workload, machines);
        let chunks = self.workload.chunks();

        let variables = variables(&layout, chunks);
        debug_assert_eq!(variables.len(), layout.len());

        let mut constraints = storage_constraints(&layout, self.capacities.storage as i64);
        // Chunk blocks are independent; collecting keeps them in chunk order.
        let chunk_blocks: Vec<Vec<Constraint>> = chunks
            .par_iter()
            .enumerate()
            .map(|(chunk_idx, chunk)| demand_constraints(&layout, chunk_idx, chunk))
            .collect();
        constraints.extend(chunk_blocks.into_iter().flatten());
        constraints.extend(throughput_constraints(
            &layout,
            self.workload.deadlines(),
            self.capacities.throughput as i64,
        )?);

        let objective = (0..machines)
            .map(|machine| (layout.active(machine), 1))
            .collect_vec();

        info!(
            "Built model: {} candidate machines, {} variables, {} constraints",
            machines,
            variables.len(),
            constraints.len()
        );
        Ok(Model::new(variables, constraints, objective, layout))
    }
}

fn variables(layout: &VariableLayout, chunks: &[Chunk]) -> Vec<Variable> {
    let machines = layout.num_machines();
    let mut variables = Vec::with_capacity(layout.len());
    variables.extend(
        (0..machines).map(|machine| Variable::binary(format!("active_{}", machine + 1))),
    );
    variables.extend(chunks.iter().flat_map(|chunk| {
        let id = chunk.id();
        (0..machines).map(move |machine| Variable::binary(format!("place_{}_{}", id, machine + 1)))
    }));
    variables.extend(layout.slot_entries().flat_map(|(chunk_idx, _, deadline)| {
        let id = layout.chunk_id(chunk_idx);
        (0..machines).map(move |machine| {
            Variable::integer(
                format!("slots_{}_{}_{}", id, machine + 1, deadline),
                0,
                deadline as i64,
            )
        })
    }));
    variables
}

/// A machine stores at most `storage` chunks, and none unless active.
fn storage_constraints(layout: &VariableLayout, storage: i64) -> Vec<Constraint> {
    (0..layout.num_machines())
        .map(|machine| {
            let terms = (0..layout.num_chunks())
                .map(|chunk_idx| (layout.placement(chunk_idx, machine), 1))
                .chain(once((layout.active(machine), -storage)))
                .collect();
            Constraint::new(format!("capacity_{}", machine + 1), terms, Sense::Le, 0)
        })
        .collect()
}

/// Slot gating and cumulative deadline sufficiency for one chunk.
fn demand_constraints(layout: &VariableLayout, chunk_idx: usize, chunk: &Chunk) -> Vec<Constraint> {
    let machines = layout.num_machines();
    let id = chunk.id();
    let mut block = Vec::with_capacity(chunk.demand().len() * (2 * machines + 1));
    for (rank, (deadline, required)) in chunk.cumulative_demand().enumerate() {
        let ticks = deadline as i64;
        for machine in 0..machines {
            let slots = layout.slots(chunk_idx, rank, machine);
            block.push(Constraint::new(
                format!("place_gate_{}_{}_{}", id, machine + 1, deadline),
                vec![(slots, 1), (layout.placement(chunk_idx, machine), -ticks)],
                Sense::Le,
                0,
            ));
            block.push(Constraint::new(
                format!("active_gate_{}_{}_{}", id, machine + 1, deadline),
                vec![(slots, 1), (layout.active(machine), -ticks)],
                Sense::Le,
                0,
            ));
        }
        let served = (0..machines)
            .map(|machine| (layout.slots(chunk_idx, rank, machine), 1))
            .collect();
        block.push(Constraint::new(
            format!("demand_{}_{}", id, deadline),
            served,
            Sense::Ge,
            required as i64,
        ));
    }
    debug!("Chunk {}: {} constraints", id, block.len());
    block
}

/// By deadline `d` an active machine serves at most `d·throughput` slots
/// over the chunks due at `d`; an inactive one serves none.
fn throughput_constraints(
    layout: &VariableLayout,
    deadlines: &[Deadline],
    throughput: i64,
) -> Result<Vec<Constraint>> {
    let rows_by_deadline = layout
        .slot_entries()
        .map(|(chunk_idx, rank, deadline)| (deadline, (chunk_idx, rank)))
        .into_group_map();
    let ceilings = deadlines
        .iter()
        .map(|&deadline| {
            (deadline as i64)
                .checked_mul(throughput)
                .map(|ceiling| (deadline, ceiling))
                .ok_or_else(|| {
                    Error::DegenerateWorkload(format!(
                        "throughput ceiling {} x {} overflows",
                        deadline, throughput
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    let constraints = (0..layout.num_machines())
        .cartesian_product(ceilings)
        .map(|(machine, (deadline, ceiling))| {
            let rows = rows_by_deadline
                .get(&deadline)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let terms = rows
                .iter()
                .map(|&(chunk_idx, rank)| (layout.slots(chunk_idx, rank, machine), 1))
                .chain(once((layout.active(machine), -ceiling)))
                .collect();
            Constraint::new(
                format!("throughput_{}_{}", machine + 1, deadline),
                terms,
                Sense::Le,
                0,
            )
        })
        .collect();
    Ok(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(jobs: &[(JobId, i64, &[ChunkId])]) -> Workload {
        Workload::from_jobs(
            jobs.iter()
                .map(|&(id, deadline, chunks)| JobRecord::new(id, deadline, chunks.to_vec())),
        )
        .unwrap()
    }

    fn constraint<'m>(model: &'m Model, name: &str) -> &'m Constraint {
        model
            .constraints()
            .iter()
            .find(|constraint| constraint.name == name)
            .unwrap_or_else(|| panic!("no constraint named {}", name))
    }

    fn var(model: &Model, name: &str) -> VarId {
        model
            .variables()
            .iter()
            .position(|var| var.name == name)
            .unwrap_or_else(|| panic!("no variable named {}", name))
    }

    #[test]
    fn derives_machine_bound_from_total_accesses() {
        let w = workload(&[(1, 3, &[1, 2, 3]), (2, 4, &[1, 2])]);
        assert_eq!(ModelBuilder::new(&w, Capacities::new(2, 1)).candidate_machines().unwrap(), 2);
        assert_eq!(ModelBuilder::new(&w, Capacities::new(5, 1)).candidate_machines().unwrap(), 1);
        assert_eq!(
            ModelBuilder::new(&w, Capacities::new(5, 1))
                .machine_bound(4)
                .candidate_machines()
                .unwrap(),
            4
        );
    }

    #[test]
    fn zero_machine_bound_is_degenerate() {
        let w = workload(&[(1, 3, &[1, 2])]);
        for builder in [
            ModelBuilder::new(&w, Capacities::new(3, 1)),
            ModelBuilder::new(&w, Capacities::new(0, 1)),
            ModelBuilder::new(&w, Capacities::new(1, 1)).machine_bound(0),
        ] {
            assert!(matches!(builder.build(), Err(Error::DegenerateWorkload(_))));
        }
        let empty = Workload::from_jobs(Vec::new()).unwrap();
        assert!(matches!(
            ModelBuilder::new(&empty, Capacities::new(1, 1)).build(),
            Err(Error::DegenerateWorkload(_))
        ));
    }

    #[test]
    fn creates_every_variable_family() {
        let w = workload(&[(1, 3, &[7, 8]), (2, 5, &[7]), (3, 5, &[8])]);
        let model = ModelBuilder::new(&w, Capacities::new(2, 1)).build().unwrap();
        // N = 4 / 2
        let layout = model.layout();
        assert_eq!(layout.num_machines(), 2);
        assert_eq!(model.variables().len(), 2 + 2 * 2 + 4 * 2);

        let slots = &model.variables()[var(&model, "slots_8_2_5")];
        assert_eq!(slots.kind, VarKind::Integer);
        assert_eq!((slots.lower, slots.upper), (0, 5));
        assert_eq!(model.variables()[var(&model, "place_7_1")].kind, VarKind::Binary);
        assert_eq!(var(&model, "slots_7_1_3"), layout.slots(0, 0, 0));
        assert_eq!(model.objective(), &[(0, 1), (1, 1)]);
    }

    #[test]
    fn storage_constraint_gates_on_active() {
        let w = workload(&[(1, 3, &[7, 8, 9])]);
        let model = ModelBuilder::new(&w, Capacities::new(3, 1)).build().unwrap();
        let capacity = constraint(&model, "capacity_1");
        assert_eq!(capacity.sense, Sense::Le);
        assert_eq!(capacity.rhs, 0);
        assert_eq!(
            capacity.terms,
            vec![
                (var(&model, "place_7_1"), 1),
                (var(&model, "place_8_1"), 1),
                (var(&model, "place_9_1"), 1),
                (var(&model, "active_1"), -3),
            ]
        );
    }

    #[test]
    fn slot_gates_scale_with_deadline() {
        let w = workload(&[(1, 6, &[4])]);
        let model = ModelBuilder::new(&w, Capacities::new(1, 1)).build().unwrap();
        let slots = var(&model, "slots_4_1_6");
        assert_eq!(
            constraint(&model, "place_gate_4_1_6").terms,
            vec![(slots, 1), (var(&model, "place_4_1"), -6)]
        );
        assert_eq!(
            constraint(&model, "active_gate_4_1_6").terms,
            vec![(slots, 1), (var(&model, "active_1"), -6)]
        );
    }

    #[test]
    fn demand_constraints_are_cumulative() {
        let w = workload(&[(1, 2, &[4]), (2, 5, &[4]), (3, 5, &[4, 6])]);
        let model = ModelBuilder::new(&w, Capacities::new(2, 1)).build().unwrap();
        // 4 accesses / 2 => 2 machines
        let early = constraint(&model, "demand_4_2");
        assert_eq!(early.sense, Sense::Ge);
        assert_eq!(early.rhs, 1);
        assert_eq!(
            early.terms,
            vec![(var(&model, "slots_4_1_2"), 1), (var(&model, "slots_4_2_2"), 1)]
        );
        assert_eq!(constraint(&model, "demand_4_5").rhs, 3);
        assert_eq!(constraint(&model, "demand_6_5").rhs, 1);
    }

    #[test]
    fn throughput_covers_only_chunks_due_at_deadline() {
        let w = workload(&[(1, 2, &[4]), (2, 5, &[4, 6])]);
        let model = ModelBuilder::new(&w, Capacities::new(3, 2)).build().unwrap();
        assert_eq!(
            constraint(&model, "throughput_1_2").terms,
            vec![(var(&model, "slots_4_1_2"), 1), (var(&model, "active_1"), -4)]
        );
        assert_eq!(
            constraint(&model, "throughput_1_5").terms,
            vec![
                (var(&model, "slots_4_1_5"), 1),
                (var(&model, "slots_6_1_5"), 1),
                (var(&model, "active_1"), -10),
            ]
        );
    }

    #[test]
    fn oversized_throughput_ceiling_is_rejected() {
        let deadline = Deadline::MAX as i64;
        let w = workload(&[(1, deadline, &[4])]);
        let err = ModelBuilder::new(&w, Capacities::new(1, u32::MAX))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DegenerateWorkload(_)), "{}", err);

        let model = ModelBuilder::new(&w, Capacities::new(1, 1)).build().unwrap();
        assert_eq!(
            constraint(&model, &format!("throughput_1_{}", deadline)).terms,
            vec![(var(&model, &format!("slots_4_1_{}", deadline)), 1), (0, -deadline)]
        );
    }

    #[test]
    fn constraint_counts_per_family() {
        let w = workload(&[(1, 3, &[7, 8]), (2, 5, &[7]), (3, 5, &[8, 9])]);
        let model = ModelBuilder::new(&w, Capacities::new(1, 1)).build().unwrap();
        let machines = 5;
        let rows = 5; // (7,3) (7,5) (8,3) (8,5) (9,5)
        let families = model
            .constraints()
            .iter()
            .map(|constraint| constraint.name.split('_').next().unwrap_or_default().to_string())
            .counts();
        assert_eq!(families["capacity"], machines);
        assert_eq!(families["place"], rows * machines);
        assert_eq!(families["active"], rows * machines);
        assert_eq!(families["demand"], rows);
        assert_eq!(families["throughput"], machines * 2);
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let w = workload(&[(1, 3, &[7, 8]), (2, 5, &[9, 7]), (3, 4, &[8, 10, 11])]);
        let builder = ModelBuilder::new(&w, Capacities::new(2, 3));
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.to_lp_string(), second.to_lp_string());
    }
}
