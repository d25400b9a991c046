//! 对主进程发送协作式终止请求

use crate::error::{Result, SupervisorError};

/// 终止请求的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// 当前平台没有协作式终止信号，调用方应直接强制结束
    Unsupported,
}

/// 发送 SIGTERM；进程已不存在时返回 `ProcessVanished`
#[cfg(unix)]
pub fn request_termination(pid: u32) -> Result<Delivery> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(Delivery::Sent),
        Err(Errno::ESRCH) => Err(SupervisorError::ProcessVanished(pid)),
        Err(Errno::EPERM) => Err(SupervisorError::PermissionDenied(format!(
            "not allowed to signal PID {}",
            pid
        ))),
        Err(e) => Err(SupervisorError::Io(std::io::Error::from(e))),
    }
}

#[cfg(not(unix))]
pub fn request_termination(_pid: u32) -> Result<Delivery> {
    Ok(Delivery::Unsupported)
}

/// 不发送信号地检查进程是否存在
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_exists(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let sysinfo_pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    sys.process(sysinfo_pid).is_some()
}
