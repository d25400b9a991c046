//! 测试用的模板脚本与配置

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::{Capabilities, StopPolicy, SupervisorConfig};
use crate::services::{EventLog, Supervisor};
use crate::state::{new_state, AppState};

/// 写入一个 `/bin/sh` 模板脚本并设为可执行
pub fn write_template(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// 测试用配置：较短的等待时间，模板内容为 `body`
pub fn config_with_template(base_dir: &Path, body: &str) -> SupervisorConfig {
    let mut config = SupervisorConfig::for_base_dir(base_dir);
    config.log_path = None;
    config.poll_interval = Duration::from_millis(100);
    config.poll_backoff = Duration::from_millis(200);
    config.settle_delay = Duration::from_millis(200);
    config.stop = StopPolicy {
        grace_period: Duration::from_millis(1500),
        force_period: Duration::from_secs(1),
        child_grace: Duration::from_millis(300),
    };
    config.capabilities = Capabilities::detect(true);
    config.ensure_managed_dir().unwrap();
    write_template(&config.template_path, body);
    config
}

/// 基于临时目录的完整应用状态
pub fn test_state(body: &str) -> (TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_template(dir.path(), body);
    let supervisor = Arc::new(Supervisor::new(Arc::new(config), EventLog::in_memory()));
    (dir, new_state(supervisor).unwrap())
}

/// 进程是否仍可被操作系统观察到（僵尸进程视为已退出）
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // 形如 "1234 (sh) Z ..."
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}
