// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CPU pinning for the host and guest processes.
//!
//! Pinning both sides (on the host, the QEMU vCPU thread as well) keeps the
//! polling loops from migrating mid-measurement.

use anyhow::{bail, Context};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// Pin the calling process to the CPUs in `list`.
///
/// Returns the CPUs actually requested.
pub fn pin_current_process(list: &str) -> anyhow::Result<Vec<usize>> {
    let cpus = parse_cpu_list(list);
    if cpus.is_empty() {
        bail!("No CPUs in list '{}'", list);
    }

    let mut cpuset = CpuSet::new();
    for &cpu in &cpus {
        cpuset
            .set(cpu)
            .with_context(|| format!("CPU {} is out of range", cpu))?;
    }
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .with_context(|| format!("Failed to pin process to CPUs {}", list))?;

    tracing::info!(cpus = ?cpus, "Process pinned");
    Ok(cpus)
}

/// Parse a CPU list string like "0-3,8-11" into a Vec of CPU indices.
fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>())
            {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sched::sched_getaffinity;

    #[test]
    fn test_parse_cpu_list_range() {
        assert_eq!(parse_cpu_list("0-3"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_mixed() {
        assert_eq!(
            parse_cpu_list("0,2-4,7,10-12"),
            vec![0, 2, 3, 4, 7, 10, 11, 12]
        );
    }

    #[test]
    fn test_parse_cpu_list_rejects_garbage() {
        assert_eq!(parse_cpu_list(""), Vec::<usize>::new());
        assert_eq!(parse_cpu_list("a-b,x"), Vec::<usize>::new());
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(pin_current_process("none").is_err());
    }

    #[test]
    fn test_pin_to_an_allowed_cpu() {
        // Only the test thread is affected
        let allowed = sched_getaffinity(Pid::from_raw(0)).unwrap();
        let cpu = (0..CpuSet::count())
            .find(|&i| allowed.is_set(i).unwrap_or(false))
            .unwrap();

        assert_eq!(pin_current_process(&cpu.to_string()).unwrap(), vec![cpu]);

        let pinned = sched_getaffinity(Pid::from_raw(0)).unwrap();
        assert!(pinned.is_set(cpu).unwrap());
    }
}
