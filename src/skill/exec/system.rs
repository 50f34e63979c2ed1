//! System status skill
//!
//! Host metrics via sysinfo; GPU details via nvidia-smi when present.

use super::{opt_u64, run_command};
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sysinfo::{Disks, System};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }

    fn cpu_status() -> String {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        // Two samples are needed for a meaningful usage figure.
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();

        let cpus = sys.cpus();
        let avg: f32 = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let per_core: Vec<String> = cpus.iter().map(|c| format!("{:.0}%", c.cpu_usage())).collect();
        let load = System::load_average();

        let mut lines = vec![
            format!("CPU Cores: {}", cpus.len()),
            format!("Average Usage: {avg:.1}%"),
            format!("Per-Core: {}", per_core.join(", ")),
            format!(
                "Load Average: {:.2} / {:.2} / {:.2} (1/5/15 min)",
                load.one, load.five, load.fifteen
            ),
        ];
        if let Some(cpu) = cpus.first() {
            if cpu.frequency() > 0 {
                lines.push(format!("Frequency: {} MHz", cpu.frequency()));
            }
        }
        lines.join("\n")
    }

    fn memory_status() -> String {
        let mut sys = System::new();
        sys.refresh_memory();

        let total = sys.total_memory() as f64 / GB;
        let used = sys.used_memory() as f64 / GB;
        let available = sys.available_memory() as f64 / GB;
        let pct = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        let swap_total = sys.total_swap() as f64 / GB;
        let swap_used = sys.used_swap() as f64 / GB;

        format!(
            "RAM: {total:.1} GB total\n  Used: {used:.1} GB ({pct:.1}%)\n  Available: {available:.1} GB\nSwap: {swap_total:.1} GB total, {swap_used:.1} GB used"
        )
    }

    fn disk_status() -> String {
        let disks = Disks::new_with_refreshed_list();
        let mut lines = Vec::new();
        for disk in disks.list() {
            let total = disk.total_space() as f64 / GB;
            if total < 0.1 {
                continue;
            }
            let free = disk.available_space() as f64 / GB;
            let used = total - free;
            let pct = used / total * 100.0;
            lines.push(format!(
                "{}: {total:.1} GB total, {used:.1} GB used ({pct:.1}%), {free:.1} GB free",
                disk.mount_point().display()
            ));
        }
        if lines.is_empty() {
            "No disk info available.".to_string()
        } else {
            lines.join("\n")
        }
    }

    async fn gpu_status() -> String {
        let result = run_command(
            "nvidia-smi",
            &[
                "--query-gpu=name,memory.total,memory.used,memory.free,temperature.gpu,utilization.gpu",
                "--format=csv,noheader",
            ],
            5,
        )
        .await;
        match result {
            Ok(output) if output.trim().is_empty() => "No GPUs detected.".to_string(),
            Ok(output) if output.contains("Failed to execute") => {
                "nvidia-smi not found, no NVIDIA GPUs available.".to_string()
            }
            Ok(output) => {
                let mut lines = vec!["GPU Status:".to_string()];
                for (i, line) in output.trim().lines().enumerate() {
                    let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
                    if parts.len() >= 6 {
                        lines.push(format!(
                            "  GPU {i}: {}\n    Memory: {} / {} ({} free)\n    Temp: {}C, Utilization: {}",
                            parts[0], parts[2], parts[1], parts[3], parts[4], parts[5]
                        ));
                    }
                }
                lines.join("\n")
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    fn top_processes(count: usize) -> String {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory = sys.total_memory().max(1) as f64;
        let mut processes: Vec<_> = sys.processes().values().collect();
        processes.sort_by(|a, b| {
            b.cpu_usage()
                .partial_cmp(&a.cpu_usage())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut lines = vec![
            format!("{:<8} {:<8} {:<8} NAME", "PID", "CPU%", "MEM%"),
            "-".repeat(50),
        ];
        for process in processes.iter().take(count) {
            let mem_pct = process.memory() as f64 / total_memory * 100.0;
            lines.push(format!(
                "{:<8} {:<8.1} {:<8.1} {}",
                process.pid(),
                process.cpu_usage(),
                mem_pct,
                process.name()
            ));
        }
        lines.join("\n")
    }

    async fn full_status() -> String {
        let cpu = tokio::task::spawn_blocking(Self::cpu_status)
            .await
            .unwrap_or_else(|e| format!("Error: {e}"));
        let memory = Self::memory_status();
        let disk = Self::disk_status();
        let gpu = Self::gpu_status().await;
        format!("{cpu}\n\n{memory}\n\n{disk}\n\n{gpu}")
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for SystemExecutor {
    fn skill_id(&self) -> &'static str {
        "system-status"
    }

    async fn execute(&self, action: &str, params: &Value, _write_enabled: bool) -> Result<String> {
        match action {
            // CPU sampling blocks briefly; keep it off the async workers.
            "cpu" => Ok(tokio::task::spawn_blocking(Self::cpu_status).await?),
            "memory" => Ok(Self::memory_status()),
            "disk" => Ok(Self::disk_status()),
            "gpu" => Ok(Self::gpu_status().await),
            "processes" => {
                let count = opt_u64(params, "count", 10) as usize;
                Ok(tokio::task::spawn_blocking(move || Self::top_processes(count)).await?)
            }
            "full_status" => Ok(Self::full_status().await),
            other => Ok(format!("Unknown skill action: system-status__{other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_status_reports_totals() {
        let exec = SystemExecutor::new();
        let out = exec.execute("memory", &json!({}), false).await.unwrap();
        assert!(out.contains("RAM:"));
        assert!(out.contains("Swap:"));
    }

    #[tokio::test]
    async fn top_processes_honors_count() {
        let exec = SystemExecutor::new();
        let out = exec
            .execute("processes", &json!({"count": 3}), false)
            .await
            .unwrap();
        // Header + separator + at most 3 rows.
        assert!(out.lines().count() <= 5);
    }
}
