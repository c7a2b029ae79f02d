use serde::{Deserialize, Serialize};

// --- Workload definitions ---

pub type JobId = u64;
pub type ChunkId = u64;
pub type Deadline = u32;
/// Candidate machines are numbered from 1.
pub type MachineId = usize;

/// Per-machine limits: `storage` chunks stored, `throughput` demand units
/// served per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capacities {
    pub storage: u32,
    pub throughput: u32,
}

impl Capacities {
    pub fn new(storage: u32, throughput: u32) -> Self {
        Capacities {
            storage,
            throughput,
        }
    }
}

/// One job as read from the workload. Only its contribution to chunk demand
/// survives ingestion. The deadline is signed so that bad input can be
/// rejected rather than wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRecord {
    pub id: JobId,
    pub deadline: i64,
    pub chunks: Vec<ChunkId>,
}

impl JobRecord {
    pub fn new(id: JobId, deadline: i64, chunks: Vec<ChunkId>) -> Self {
        JobRecord {
            id,
            deadline,
            chunks,
        }
    }
}
