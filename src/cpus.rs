//! CPU sets for pinned workers
//!
//! The allowed CPUs come from an explicit list or the process affinity
//! mask; they are cut into disjoint chunks of `cpus_per_job`, one per
//! worker container.

use crate::error::PipelineError;
use anyhow::Result;
use nix::sched::{sched_getaffinity, CpuSet};
use nix::unistd::Pid;

/// CPUs this process may run on; all online CPUs when the mask is unavailable.
pub fn allowed_cpus() -> Vec<usize> {
    match sched_getaffinity(Pid::from_raw(0)) {
        Ok(set) => {
            let cpus: Vec<usize> = (0..CpuSet::count())
                .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
                .collect();
            if !cpus.is_empty() {
                return cpus;
            }
        }
        Err(e) => tracing::debug!("sched_getaffinity failed: {}", e),
    }
    let online = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (0..online).collect()
}

/// Parse a cpuset list such as `0-3,8,10-11`.
pub fn parse_cpu_list(spec: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().map_err(|_| bad_list(spec))?;
                let hi: usize = hi.trim().parse().map_err(|_| bad_list(spec))?;
                if hi < lo {
                    return Err(bad_list(spec).into());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse().map_err(|_| bad_list(spec))?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

fn bad_list(spec: &str) -> PipelineError {
    PipelineError::config(format!("Invalid cpu list: {}", spec))
}

/// Render CPUs in docker `--cpuset-cpus` form.
pub fn format_cpu_list(cpus: &[usize]) -> String {
    cpus.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Disjoint chunks of exactly `per_job` CPUs, at most `max_jobs` of them.
///
/// Fails when not even one chunk fits.
pub fn partition(cpus: &[usize], per_job: usize, max_jobs: usize) -> Result<Vec<String>> {
    if per_job == 0 {
        return Err(PipelineError::config("cpus_per_job must be >= 1").into());
    }
    let chunks: Vec<String> = cpus
        .chunks_exact(per_job)
        .take(max_jobs)
        .map(format_cpu_list)
        .collect();
    if chunks.is_empty() {
        return Err(PipelineError::config(format!(
            "Cannot allocate {} CPU(s) per worker from {} allowed CPU(s)",
            per_job,
            cpus.len()
        ))
        .into());
    }
    Ok(chunks)
}

/// Worker cpusets from an optional explicit list.
pub fn worker_cpusets(explicit: Option<&str>, per_job: usize, max_jobs: usize) -> Result<Vec<String>> {
    let cpus = match explicit {
        Some(spec) => parse_cpu_list(spec)?,
        None => allowed_cpus(),
    };
    let sets = partition(&cpus, per_job, max_jobs)?;
    tracing::info!("Allocated {} worker cpuset(s): {:?}", sets.len(), sets);
    Ok(sets)
}
