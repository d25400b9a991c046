use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

use crate::config::Capabilities;
use crate::models::ResourceReading;

/// 探针对某个进程的非拥有引用，每次读取前重新校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeAttachment {
    #[default]
    Unattached,
    /// `start_time` 用于识别 PID 复用
    Attached { pid: u32, start_time: u64 },
    /// 被附加的进程已消失或 PID 已被复用
    Lost { pid: u32 },
}

pub struct ResourceProbe {
    system: Mutex<System>,
    capabilities: Capabilities,
}

impl ResourceProbe {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            system: Mutex::new(System::new()),
            capabilities,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capabilities.resource_probe
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 附加到进程并进行一次预热采样（结果丢弃）
    pub fn attach(&self, pid: u32) -> ProbeAttachment {
        if !self.is_enabled() {
            return ProbeAttachment::Unattached;
        }

        let mut sys = self.lock();
        match refresh_one(&mut sys, pid) {
            Some(process) => ProbeAttachment::Attached {
                pid,
                start_time: process.start_time(),
            },
            None => {
                log::debug!("Could not attach resource probe to PID {}", pid);
                ProbeAttachment::Lost { pid }
            }
        }
    }

    /// 采样 CPU 与内存；进程消失时返回 `Unavailable` 并把附加状态置为 `Lost`
    pub fn sample(&self, attachment: &mut ProbeAttachment, pid: u32) -> ResourceReading {
        if !self.is_enabled() {
            return ResourceReading::Unavailable;
        }

        let current = *attachment;
        match current {
            ProbeAttachment::Unattached => {
                *attachment = self.attach(pid);
                ResourceReading::Unavailable
            }
            ProbeAttachment::Lost { .. } => ResourceReading::Unavailable,
            ProbeAttachment::Attached {
                pid: attached_pid,
                start_time,
            } => {
                if attached_pid != pid {
                    *attachment = ProbeAttachment::Lost { pid: attached_pid };
                    return ResourceReading::Unavailable;
                }

                let mut sys = self.lock();
                match refresh_one(&mut sys, pid) {
                    Some(process) if process.start_time() == start_time => ResourceReading::Available {
                        cpu_percent: process.cpu_usage(),
                        resident_bytes: process.memory(),
                    },
                    _ => {
                        *attachment = ProbeAttachment::Lost { pid };
                        ResourceReading::Unavailable
                    }
                }
            }
        }
    }

    /// 枚举所有后代进程（广度优先）；进程表不可用时为空
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        if !self.capabilities.process_tree {
            return Vec::new();
        }

        let mut sys = self.lock();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        // 线程也会出现在进程表中，跳过
        for (child_pid, process) in sys.processes() {
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(child_pid.as_u32());
            }
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            if let Some(kids) = children.get(&current) {
                for kid in kids {
                    if *kid != pid && !found.contains(kid) {
                        found.push(*kid);
                        queue.push_back(*kid);
                    }
                }
            }
        }
        found
    }

    /// 进程是否仍然存活（僵尸进程视为已退出）
    pub fn is_alive(&self, pid: u32) -> bool {
        if !self.capabilities.process_tree {
            return crate::services::signal::process_exists(pid);
        }
        let mut sys = self.lock();
        refresh_one(&mut sys, pid).is_some()
    }

    /// 向进程发送终止信号；`force` 为真时强制结束。进程不存在时返回 false。
    pub fn signal(&self, pid: u32, force: bool) -> bool {
        if !self.capabilities.process_tree {
            return false;
        }
        let mut sys = self.lock();
        match refresh_one(&mut sys, pid) {
            Some(process) if force => process.kill(),
            Some(process) => process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill()),
            None => false,
        }
    }
}

fn refresh_one(sys: &mut System, pid: u32) -> Option<&Process> {
    let sysinfo_pid = Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
    );
    sys.process(sysinfo_pid)
        .filter(|process| process.status() != ProcessStatus::Zombie)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_PID: u32 = 2_000_000_000;

    fn probe() -> ResourceProbe {
        ResourceProbe::new(Capabilities::detect(true))
    }

    #[test]
    fn disabled_probe_reports_unavailable() {
        let probe = ResourceProbe::new(Capabilities {
            resource_probe: false,
            process_tree: false,
        });
        let mut attachment = ProbeAttachment::Unattached;

        let reading = probe.sample(&mut attachment, std::process::id());
        assert_eq!(reading, ResourceReading::Unavailable);
        assert_eq!(attachment, ProbeAttachment::Unattached);
        assert!(probe.descendants(std::process::id()).is_empty());
    }

    #[test]
    fn first_sample_primes_the_attachment() {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return;
        }
        let probe = probe();
        let pid = std::process::id();
        let mut attachment = ProbeAttachment::Unattached;

        assert_eq!(probe.sample(&mut attachment, pid), ResourceReading::Unavailable);
        assert!(matches!(attachment, ProbeAttachment::Attached { .. }));

        let reading = probe.sample(&mut attachment, pid);
        assert!(reading.resident_bytes().unwrap() > 0);
        assert!(reading.cpu_percent().is_some());
    }

    #[test]
    fn vanished_process_marks_attachment_lost() {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return;
        }
        let probe = probe();
        let mut attachment = probe.attach(MISSING_PID);
        assert_eq!(attachment, ProbeAttachment::Lost { pid: MISSING_PID });
        assert_eq!(
            probe.sample(&mut attachment, MISSING_PID),
            ResourceReading::Unavailable
        );
    }

    #[test]
    fn pid_mismatch_is_treated_as_lost() {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return;
        }
        let probe = probe();
        let pid = std::process::id();
        let mut attachment = probe.attach(pid);

        assert_eq!(probe.sample(&mut attachment, pid + 1), ResourceReading::Unavailable);
        assert_eq!(attachment, ProbeAttachment::Lost { pid });
    }

    #[test]
    fn missing_process_is_not_alive() {
        let probe = probe();
        assert!(!probe.is_alive(MISSING_PID));
        assert!(probe.is_alive(std::process::id()));
        assert!(!probe.signal(MISSING_PID, false));
    }
}
