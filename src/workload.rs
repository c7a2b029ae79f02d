//! Workload model: per-chunk deadline demand aggregated from job records,
//! plus the reader for the plain-text workload format.
//!
//! The format is three header lines (`B`, `S`, job count) followed by two
//! lines per job: `job_id deadline chunk_count`, then the chunk ids.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;
use log::debug;

use crate::error::{Error, Result};
use crate::types::*;

/// A chunk and its demand, one entry per deadline at which some job needs
/// it, in ascending deadline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: ChunkId,
    demand: Vec<(Deadline, u32)>,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn demand(&self) -> &[(Deadline, u32)] {
        &self.demand
    }

    pub fn deadlines(&self) -> impl Iterator<Item = Deadline> + '_ {
        self.demand.iter().map(|&(deadline, _)| deadline)
    }

    /// Running total of demand over ascending deadlines. Slots served for an
    /// earlier deadline count toward every later one, so the total never
    /// resets.
    pub fn cumulative_demand(&self) -> impl Iterator<Item = (Deadline, u64)> + '_ {
        self.demand.iter().scan(0u64, |total, &(deadline, count)| {
            *total += count as u64;
            Some((deadline, *total))
        })
    }

    pub fn total_demand(&self) -> u64 {
        self.demand.iter().map(|&(_, count)| count as u64).sum()
    }
}

/// Immutable view of a workload after ingestion. Chunks are ordered by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    chunks: Vec<Chunk>,
    deadlines: Vec<Deadline>,
    total_accesses: u64,
    num_jobs: usize,
}

impl Workload {
    /// Aggregates one demand unit per (job, chunk) pair at the job's
    /// deadline. A chunk listed twice by the same job is needed twice.
    pub fn from_jobs<I>(jobs: I) -> Result<Self>
    where
        I: IntoIterator<Item = JobRecord>,
    {
        let mut demand: BTreeMap<ChunkId, BTreeMap<Deadline, u32>> = BTreeMap::new();
        let mut deadlines = BTreeSet::new();
        let mut total_accesses = 0u64;
        let mut num_jobs = 0;

        for job in jobs {
            if job.chunks.is_empty() {
                return Err(Error::MalformedInput(format!(
                    "job {} references no chunks",
                    job.id
                )));
            }
            let deadline = Deadline::try_from(job.deadline)
                .ok()
                .filter(|&deadline| deadline > 0)
                .ok_or_else(|| {
                    Error::MalformedInput(format!(
                        "job {} has deadline {}, expected a positive tick count",
                        job.id, job.deadline
                    ))
                })?;
            deadlines.insert(deadline);
            total_accesses += job.chunks.len() as u64;
            num_jobs += 1;
            for &chunk in &job.chunks {
                *demand.entry(chunk).or_default().entry(deadline).or_insert(0) += 1;
            }
        }

        let chunks = demand
            .into_iter()
            .map(|(id, by_deadline)| Chunk {
                id,
                demand: by_deadline.into_iter().collect(),
            })
            .collect_vec();
        debug!(
            "Workload: {} jobs, {} chunks, {} deadlines, {} accesses",
            num_jobs,
            chunks.len(),
            deadlines.len(),
            total_accesses
        );
        Ok(Workload {
            chunks,
            deadlines: deadlines.into_iter().collect(),
            total_accesses,
            num_jobs,
        })
    }

    /// Parses the text workload format, returning the capacities from its
    /// header alongside the workload.
    pub fn parse(text: &str) -> Result<(Capacities, Workload)> {
        let mut lines = Lines::new(text);
        let storage = lines.next_value("storage capacity")?;
        let throughput = lines.next_value("throughput capacity")?;
        let declared_jobs: usize = lines.next_value("job count")?;

        let mut jobs = Vec::with_capacity(declared_jobs);
        for _ in 0..declared_jobs {
            let (line_no, line) = lines.next_line("a job header")?;
            let header: Vec<i64> = parse_fields(line_no, line)?;
            let &[id, deadline, chunk_count] = header.as_slice() else {
                return Err(Error::MalformedInput(format!(
                    "line {}: expected `job_id deadline chunk_count`, found {} fields",
                    line_no,
                    header.len()
                )));
            };
            let id = JobId::try_from(id).map_err(|_| {
                Error::MalformedInput(format!("line {}: negative job id {}", line_no, id))
            })?;
            if chunk_count <= 0 {
                return Err(Error::MalformedInput(format!(
                    "line {}: job {} references no chunks",
                    line_no, id
                )));
            }

            let (line_no, line) = lines.next_line("a chunk list")?;
            let chunks: Vec<ChunkId> = parse_fields(line_no, line)?;
            if chunks.len() as i64 != chunk_count {
                return Err(Error::MalformedInput(format!(
                    "line {}: job {} declares {} chunks but lists {}",
                    line_no,
                    id,
                    chunk_count,
                    chunks.len()
                )));
            }
            jobs.push(JobRecord::new(id, deadline, chunks));
        }

        if let Some((line_no, _)) = lines.next_nonblank() {
            return Err(Error::MalformedInput(format!(
                "line {}: content after the {} declared jobs",
                line_no, declared_jobs
            )));
        }

        let workload = Workload::from_jobs(jobs)?;
        Ok((Capacities::new(storage, throughput), workload))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<(Capacities, Workload)> {
        let text = std::fs::read_to_string(path)?;
        Workload::parse(&text)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks
            .binary_search_by_key(&id, |chunk| chunk.id)
            .ok()
            .map(|idx| &self.chunks[idx])
    }

    /// Distinct deadlines across all jobs, ascending.
    pub fn deadlines(&self) -> &[Deadline] {
        &self.deadlines
    }

    pub fn max_deadline(&self) -> Option<Deadline> {
        self.deadlines.last().copied()
    }

    /// Sum over jobs of the number of chunks each accesses.
    pub fn total_accesses(&self) -> u64 {
        self.total_accesses
    }

    pub fn num_jobs(&self) -> usize {
        self.num_jobs
    }
}

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Lines {
            inner: text.lines().enumerate(),
        }
    }

    fn next_nonblank(&mut self) -> Option<(usize, &'a str)> {
        self.inner
            .by_ref()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .find(|(_, line)| !line.is_empty())
    }

    fn next_line(&mut self, expected: &str) -> Result<(usize, &'a str)> {
        self.next_nonblank().ok_or_else(|| {
            Error::MalformedInput(format!("unexpected end of input, expected {}", expected))
        })
    }

    fn next_value<T: FromStr>(&mut self, expected: &str) -> Result<T> {
        let (line_no, line) = self.next_line(expected)?;
        line.parse().map_err(|_| {
            Error::MalformedInput(format!(
                "line {}: expected {}, found `{}`",
                line_no, expected, line
            ))
        })
    }
}

fn parse_fields<T: FromStr>(line_no: usize, line: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|field| {
            field.parse().map_err(|_| {
                Error::MalformedInput(format!(
                    "line {}: `{}` is not a valid number",
                    line_no, field
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: JobId, deadline: i64, chunks: &[ChunkId]) -> JobRecord {
        JobRecord::new(id, deadline, chunks.to_vec())
    }

    #[test]
    fn aggregates_demand_per_deadline() {
        let workload = Workload::from_jobs(vec![
            job(1, 5, &[10, 11]),
            job(2, 5, &[10]),
            job(3, 2, &[10]),
        ])
        .unwrap();

        assert_eq!(workload.num_jobs(), 3);
        assert_eq!(workload.total_accesses(), 4);
        assert_eq!(workload.deadlines(), &[2, 5]);
        let chunk = workload.chunk(10).unwrap();
        assert_eq!(chunk.demand(), &[(2, 1), (5, 2)]);
        assert_eq!(workload.chunk(11).unwrap().demand(), &[(5, 1)]);
        assert!(workload.chunk(12).is_none());
    }

    #[test]
    fn cumulative_demand_never_resets() {
        let workload = Workload::from_jobs(vec![
            job(1, 3, &[4]),
            job(2, 7, &[4]),
            job(3, 7, &[4]),
            job(4, 9, &[4]),
        ])
        .unwrap();
        let chunk = workload.chunk(4).unwrap();

        let cumulative = chunk.cumulative_demand().collect_vec();
        assert_eq!(cumulative, vec![(3, 1), (7, 3), (9, 4)]);
        assert_eq!(cumulative.last().unwrap().1, chunk.total_demand());
    }

    #[test]
    fn duplicate_chunk_in_one_job_counts_twice() {
        let workload = Workload::from_jobs(vec![job(1, 4, &[9, 9])]).unwrap();
        assert_eq!(workload.chunk(9).unwrap().demand(), &[(4, 2)]);
        assert_eq!(workload.total_accesses(), 2);
    }

    #[test]
    fn rejects_job_without_chunks() {
        let err = Workload::from_jobs(vec![job(1, 4, &[])]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn rejects_non_positive_deadline() {
        for deadline in [-3, 0] {
            let err = Workload::from_jobs(vec![job(1, deadline, &[1])]).unwrap_err();
            assert!(matches!(err, Error::MalformedInput(_)), "deadline {}", deadline);
        }
    }

    #[test]
    fn parses_workload_text() {
        let text = "2\n1\n2\n1 3 2\n7 8\n\n2 5 1\n7\n";
        let (capacities, workload) = Workload::parse(text).unwrap();

        assert_eq!(capacities, Capacities::new(2, 1));
        assert_eq!(workload.num_jobs(), 2);
        assert_eq!(workload.total_accesses(), 3);
        assert_eq!(workload.chunk(7).unwrap().demand(), &[(3, 1), (5, 1)]);
        assert_eq!(workload.chunk(8).unwrap().demand(), &[(3, 1)]);
    }

    #[test]
    fn parse_rejects_missing_records() {
        let err = Workload::parse("2\n1\n2\n1 3 1\n7\n").unwrap_err();
        assert!(err.to_string().contains("expected a job header"), "{}", err);
    }

    #[test]
    fn parse_rejects_extra_records() {
        let err = Workload::parse("2\n1\n1\n1 3 1\n7\n2 3 1\n8\n").unwrap_err();
        assert!(err.to_string().contains("line 6"), "{}", err);
    }

    #[test]
    fn parse_rejects_chunk_count_mismatch() {
        let err = Workload::parse("2\n1\n1\n1 3 2\n7\n").unwrap_err();
        assert!(err.to_string().contains("declares 2 chunks but lists 1"), "{}", err);
    }

    #[test]
    fn parse_rejects_negative_deadline() {
        let err = Workload::parse("2\n1\n1\n1 -3 1\n7\n").unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn parse_rejects_zero_chunk_job() {
        let err = Workload::parse("2\n1\n1\n1 3 0\n\n").unwrap_err();
        assert!(err.to_string().contains("references no chunks"), "{}", err);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = Workload::parse("two\n1\n1\n").unwrap_err();
        assert!(err.to_string().contains("storage capacity"), "{}", err);
        let err = Workload::parse("2\n1\n1\n1 3 x\n7\n").unwrap_err();
        assert!(err.to_string().contains("`x`"), "{}", err);
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workload.txt");
        std::fs::write(&path, "4\n2\n1\n1 6 2\n1 2\n").unwrap();

        let (capacities, workload) = Workload::read(&path).unwrap();
        assert_eq!(capacities, Capacities::new(4, 2));
        assert_eq!(workload.chunks().len(), 2);
        assert_eq!(workload.max_deadline(), Some(6));

        let err = Workload::read(dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
