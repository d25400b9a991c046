use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CommandArgs;
use crate::error::{Result, SupervisorError};

pub const TEMPLATE_EXE_NAME: &str = "_template_dummy";
pub const MANAGED_DIR_NAME: &str = "managed_exes";
pub const CONFIG_FILE_NAME: &str = "process_config.json";
pub const LOG_FILE_NAME: &str = "process_manager_log.txt";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1800);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);
pub const POLLER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 启动时确定一次的可选能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// CPU/内存采样是否可用
    pub resource_probe: bool,
    /// 是否能枚举进程表（用于终止子进程）
    pub process_tree: bool,
}

impl Capabilities {
    pub fn detect(probe_requested: bool) -> Self {
        let supported = sysinfo::IS_SUPPORTED_SYSTEM;
        Self {
            resource_probe: probe_requested && supported,
            process_tree: supported,
        }
    }
}

/// 两级终止策略的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub grace_period: Duration,
    pub force_period: Duration,
    pub child_grace: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            force_period: Duration::from_secs(1),
            child_grace: Duration::from_millis(500),
        }
    }
}

/// 进程级配置，启动时构建一次并显式传递
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub base_dir: PathBuf,
    pub template_path: PathBuf,
    pub managed_dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub poll_backoff: Duration,
    pub settle_delay: Duration,
    pub stop: StopPolicy,
    pub capabilities: Capabilities,
}

impl SupervisorConfig {
    /// 以 `base_dir` 为根的默认布局
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            template_path: base_dir.join(executable_file_name(TEMPLATE_EXE_NAME)),
            managed_dir: base_dir.join(MANAGED_DIR_NAME),
            snapshot_path: base_dir.join(CONFIG_FILE_NAME),
            log_path: Some(base_dir.join(LOG_FILE_NAME)),
            base_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_backoff: DEFAULT_POLL_BACKOFF,
            settle_delay: DEFAULT_SETTLE_DELAY,
            stop: StopPolicy::default(),
            capabilities: Capabilities::detect(true),
        }
    }

    pub fn from_args(args: &CommandArgs) -> anyhow::Result<Self> {
        let base_dir = match &args.base_dir {
            Some(dir) => dir.clone(),
            None => program_dir()?,
        };

        let mut config = Self::for_base_dir(base_dir);
        if let Some(template) = &args.template {
            config.template_path = template.clone();
        }
        if let Some(path) = &args.config_file {
            config.snapshot_path = path.clone();
        }
        if let Some(path) = &args.log_file {
            config.log_path = Some(path.clone());
        }
        config.poll_interval = Duration::from_millis(args.poll_interval_ms.max(1));
        config.settle_delay = Duration::from_millis(args.settle_delay_ms);
        config.stop.grace_period = Duration::from_millis(args.grace_period_ms);
        config.stop.force_period = Duration::from_millis(args.force_period_ms);
        config.capabilities = Capabilities::detect(!args.no_probe);

        Ok(config)
    }

    /// 创建受管目录（已存在时无操作）
    pub fn ensure_managed_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.managed_dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => SupervisorError::PermissionDenied(format!(
                "cannot create managed directory '{}'",
                self.managed_dir.display()
            )),
            _ => SupervisorError::Io(e),
        })
    }
}

/// 附加平台可执行文件后缀（若缺失）
pub fn executable_file_name(logical_name: &str) -> String {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || logical_name.to_lowercase().ends_with(suffix) {
        logical_name.to_string()
    } else {
        format!("{}{}", logical_name, suffix)
    }
}

fn program_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}
