//! Turns a solver's variable assignment back into an operational plan.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::model::Model;
use crate::solver::{Solution, SolveStatus};
use crate::types::*;
use crate::workload::Workload;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePlan {
    pub machine: MachineId,
    pub chunks: Vec<ChunkId>,
}

/// Slots given to `chunk` on `machine`, counted up to `deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAllocation {
    pub chunk: ChunkId,
    pub machine: MachineId,
    pub deadline: Deadline,
    pub slots: u64,
}

/// Active machines with the chunks each stores, and every nonzero slot
/// allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    pub machines: Vec<MachinePlan>,
    pub slots: Vec<SlotAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanViolation {
    #[error("machine {machine} stores {stored} chunks, capacity is {capacity}")]
    StorageExceeded {
        machine: MachineId,
        stored: usize,
        capacity: u32,
    },
    #[error("chunk {chunk} has slots on machine {machine} which does not store it")]
    UnplacedSlots { chunk: ChunkId, machine: MachineId },
    #[error("chunk {chunk} has {slots} slots on machine {machine} by deadline {deadline}")]
    SlotsBeyondDeadline {
        chunk: ChunkId,
        machine: MachineId,
        deadline: Deadline,
        slots: u64,
    },
    #[error("chunk {chunk} gets {allocated} slots by deadline {deadline}, needs {required}")]
    DemandUnmet {
        chunk: ChunkId,
        deadline: Deadline,
        allocated: u64,
        required: u64,
    },
    #[error("machine {machine} serves {used} slots by deadline {deadline}, ceiling is {ceiling}")]
    ThroughputExceeded {
        machine: MachineId,
        deadline: Deadline,
        used: u64,
        ceiling: u64,
    },
}

/// Reads the plan out of an optimal solution. Infeasible and unfinished
/// solves are errors; no partial plan is ever produced.
pub fn extract_plan(model: &Model, solution: &Solution) -> Result<AssignmentPlan> {
    match solution.status {
        SolveStatus::Optimal => {}
        SolveStatus::Infeasible => return Err(Error::NoFeasiblePlan),
        SolveStatus::Unsolved(reason) => return Err(Error::SolverAborted(reason.to_string())),
    }
    let values = solution.values.as_slice();
    if let Some(violation) = model.first_violation(values) {
        return Err(Error::SolverAborted(format!(
            "solver reported an optimum that is not a valid assignment: {}",
            violation
        )));
    }

    let layout = model.layout();
    let machines = (0..layout.num_machines())
        .filter(|&machine| values[layout.active(machine)] == 1)
        .map(|machine| MachinePlan {
            machine: layout.machine_id(machine),
            chunks: (0..layout.num_chunks())
                .filter(|&chunk| values[layout.placement(chunk, machine)] == 1)
                .map(|chunk| layout.chunk_id(chunk))
                .collect(),
        })
        .collect_vec();
    let slots = layout
        .slot_entries()
        .flat_map(|(chunk, rank, deadline)| {
            (0..layout.num_machines()).filter_map(move |machine| {
                let slots = values[layout.slots(chunk, rank, machine)];
                (slots > 0).then(|| SlotAllocation {
                    chunk: layout.chunk_id(chunk),
                    machine: layout.machine_id(machine),
                    deadline,
                    slots: slots as u64,
                })
            })
        })
        .collect_vec();

    info!(
        "Plan uses {} of {} candidate machines",
        machines.len(),
        layout.num_machines()
    );
    Ok(AssignmentPlan { machines, slots })
}

impl AssignmentPlan {
    pub fn active_machines(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.machines.iter().map(|plan| plan.machine)
    }

    pub fn chunks_on(&self, machine: MachineId) -> &[ChunkId] {
        self.machines
            .iter()
            .find(|plan| plan.machine == machine)
            .map(|plan| plan.chunks.as_slice())
            .unwrap_or(&[])
    }

    pub fn slots_for(&self, chunk: ChunkId, machine: MachineId, deadline: Deadline) -> u64 {
        self.slots
            .iter()
            .find(|alloc| {
                alloc.chunk == chunk && alloc.machine == machine && alloc.deadline == deadline
            })
            .map_or(0, |alloc| alloc.slots)
    }

    /// Total slots for `chunk` across machines by `deadline`.
    pub fn served(&self, chunk: ChunkId, deadline: Deadline) -> u64 {
        self.slots
            .iter()
            .filter(|alloc| alloc.chunk == chunk && alloc.deadline == deadline)
            .map(|alloc| alloc.slots)
            .sum()
    }

    /// Re-checks the plan against the workload it was built for.
    pub fn verify(
        &self,
        workload: &Workload,
        capacities: Capacities,
    ) -> std::result::Result<(), PlanViolation> {
        for plan in &self.machines {
            if plan.chunks.len() > capacities.storage as usize {
                return Err(PlanViolation::StorageExceeded {
                    machine: plan.machine,
                    stored: plan.chunks.len(),
                    capacity: capacities.storage,
                });
            }
        }

        let mut used: BTreeMap<(MachineId, Deadline), u64> = BTreeMap::new();
        for alloc in &self.slots {
            if !self.chunks_on(alloc.machine).contains(&alloc.chunk) {
                return Err(PlanViolation::UnplacedSlots {
                    chunk: alloc.chunk,
                    machine: alloc.machine,
                });
            }
            if alloc.slots > alloc.deadline as u64 {
                return Err(PlanViolation::SlotsBeyondDeadline {
                    chunk: alloc.chunk,
                    machine: alloc.machine,
                    deadline: alloc.deadline,
                    slots: alloc.slots,
                });
            }
            *used.entry((alloc.machine, alloc.deadline)).or_default() += alloc.slots;
        }

        for chunk in workload.chunks() {
            for (deadline, required) in chunk.cumulative_demand() {
                let allocated = self.served(chunk.id(), deadline);
                if allocated < required {
                    return Err(PlanViolation::DemandUnmet {
                        chunk: chunk.id(),
                        deadline,
                        allocated,
                        required,
                    });
                }
            }
        }

        for ((machine, deadline), used) in used {
            let ceiling = deadline as u64 * capacities.throughput as u64;
            if used > ceiling {
                return Err(PlanViolation::ThroughputExceeded {
                    machine,
                    deadline,
                    used,
                    ceiling,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for AssignmentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Active machines: {}", self.machines.len())?;
        for plan in &self.machines {
            writeln!(
                f,
                "Chunks mapped to machine {}: [{}]",
                plan.machine,
                plan.chunks.iter().join(", ")
            )?;
        }
        for alloc in &self.slots {
            writeln!(
                f,
                "Slots for chunk {} on machine {} by deadline {}: {}",
                alloc.chunk, alloc.machine, alloc.deadline, alloc.slots
            )?;
        }
        Ok(())
    }
}
