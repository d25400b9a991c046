use prometheus::{
    Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_int_gauge_with_registry,
};
use std::collections::HashMap;
use std::sync::Mutex;
use sysinfo::System;

use crate::models::EntrySnapshot;

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,
    /// 上一次导出的 PID，用于移除过期的 pid 标签
    exported: Mutex<HashMap<String, Option<u32>>>,

    pub entries_total: IntGauge,
    pub entry_up: GaugeVec,
    pub entry_pid_info: GaugeVec,
    pub entry_cpu_usage: GaugeVec,
    pub entry_resident_memory_bytes: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // 定义通用的标签
        let common_labels = &["name", "hostname"];

        let entries_total = register_int_gauge_with_registry!(
            Opts::new("supervisor_entries", "Number of configured entries"),
            registry
        )?;

        let entry_up = register_gauge_vec_with_registry!(
            Opts::new("entry_up", "Entry process is running (1) or stopped (0)"),
            common_labels,
            registry
        )?;

        let entry_pid_info = register_gauge_vec_with_registry!(
            Opts::new("entry_pid_info", "PID of the running entry process"),
            &["name", "pid", "hostname"],
            registry
        )?;

        let entry_cpu_usage = register_gauge_vec_with_registry!(
            Opts::new("entry_cpu_usage_percent", "Entry process CPU usage percentage"),
            common_labels,
            registry
        )?;

        let entry_resident_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("entry_resident_memory_bytes", "Entry process resident memory in bytes"),
            common_labels,
            registry
        )?;

        Ok(Self {
            registry,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            exported: Mutex::new(HashMap::new()),
            entries_total,
            entry_up,
            entry_pid_info,
            entry_cpu_usage,
            entry_resident_memory_bytes,
        })
    }

    /// 用最新快照刷新所有指标；已删除的条目会被移除
    pub fn update(&self, snapshots: &[EntrySnapshot]) {
        let mut exported = self.exported.lock().unwrap_or_else(|e| e.into_inner());

        let stale: Vec<String> = exported
            .keys()
            .filter(|name| !snapshots.iter().any(|s| &s.name == *name))
            .cloned()
            .collect();
        for name in stale {
            let pid = exported.remove(&name).flatten();
            self.remove_entry(&name, pid);
        }

        self.entries_total.set(snapshots.len() as i64);

        for snapshot in snapshots {
            let name = snapshot.name.as_str();
            let labels = &[name, self.hostname.as_str()];

            self.entry_up
                .with_label_values(labels)
                .set(if snapshot.running { 1.0 } else { 0.0 });

            let previous_pid = exported.insert(snapshot.name.clone(), snapshot.pid).flatten();
            if previous_pid != snapshot.pid {
                if let Some(old) = previous_pid {
                    let _ = self
                        .entry_pid_info
                        .remove_label_values(&[name, &old.to_string(), &self.hostname]);
                }
            }
            if let Some(pid) = snapshot.pid {
                self.entry_pid_info
                    .with_label_values(&[name, &pid.to_string(), &self.hostname])
                    .set(1.0);
            }

            // 只有读数可用时才输出资源指标
            match (snapshot.cpu_percent, snapshot.resident_bytes) {
                (Some(cpu), Some(resident)) if snapshot.running => {
                    self.entry_cpu_usage.with_label_values(labels).set(cpu as f64);
                    self.entry_resident_memory_bytes
                        .with_label_values(labels)
                        .set(resident as f64);
                }
                _ => {
                    let _ = self.entry_cpu_usage.remove_label_values(labels);
                    let _ = self.entry_resident_memory_bytes.remove_label_values(labels);
                }
            }
        }
    }

    fn remove_entry(&self, name: &str, pid: Option<u32>) {
        let labels = &[name, self.hostname.as_str()];
        let _ = self.entry_up.remove_label_values(labels);
        let _ = self.entry_cpu_usage.remove_label_values(labels);
        let _ = self.entry_resident_memory_bytes.remove_label_values(labels);
        if let Some(pid) = pid {
            let _ = self
                .entry_pid_info
                .remove_label_values(&[name, &pid.to_string(), &self.hostname]);
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
