use crate::config::HostOs;
use crate::process::{CommandRunner, CommandSpec};
use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Virtual hardware handed to an Android emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorResources {
    pub cores: u32,
    pub memory_mib: u32,
}

impl EmulatorResources {
    /// 8+ host cores get 4 virtual cores, 8+ GiB of host RAM gets 4096 MiB.
    pub fn from_host(cpu_count: usize, total_memory_bytes: u64) -> Self {
        Self {
            cores: if cpu_count >= 8 { 4 } else { 2 },
            memory_mib: if total_memory_bytes >= 8 * GIB {
                4096
            } else {
                2048
            },
        }
    }

    pub async fn detect(runner: &dyn CommandRunner, host_os: HostOs) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let memory = total_memory_bytes(runner, host_os).await.unwrap_or(0);
        Self::from_host(cpus, memory)
    }
}

async fn total_memory_bytes(runner: &dyn CommandRunner, host_os: HostOs) -> Option<u64> {
    match host_os {
        HostOs::Mac => {
            let spec = CommandSpec::new("sysctl").args(["-n", "hw.memsize"]);
            let output = runner.output(&spec).await.ok()?;
            output.stdout.trim().parse().ok()
        }
        HostOs::Linux => {
            let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok()?;
            parse_meminfo_total(&meminfo)
        }
        HostOs::Windows => {
            let spec = CommandSpec::new("wmic").args(["ComputerSystem", "get", "TotalPhysicalMemory"]);
            let output = runner.output(&spec).await.ok()?;
            output
                .stdout
                .lines()
                .filter_map(|l| l.trim().parse::<u64>().ok())
                .next()
        }
    }
}

fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
