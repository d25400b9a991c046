use clap::Parser;
use std::path::PathBuf;

/// Process Supervisor - 基于模板可执行文件的动态进程管理器
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// 基础目录（默认为可执行文件所在目录）
    #[arg(short = 'b', long, env = "BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// 模板可执行文件路径
    #[arg(short, long, env = "TEMPLATE")]
    pub template: Option<PathBuf>,

    /// 配置快照文件
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// 日志文件
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// 启动时导入的 TXT 文件（每行一个名称）
    #[arg(short, long)]
    pub import: Option<PathBuf>,

    /// 后台轮询间隔（毫秒）
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1800)]
    pub poll_interval_ms: u64,

    /// 启动后检查立即退出的延迟（毫秒）
    #[arg(long, env = "SETTLE_DELAY_MS", default_value_t = 200)]
    pub settle_delay_ms: u64,

    /// 优雅终止等待时间（毫秒）
    #[arg(long, env = "GRACE_PERIOD_MS", default_value_t = 3000)]
    pub grace_period_ms: u64,

    /// 强制终止等待时间（毫秒）
    #[arg(long, env = "FORCE_PERIOD_MS", default_value_t = 1000)]
    pub force_period_ms: u64,

    /// 禁用 CPU/内存采样
    #[arg(long, env = "NO_PROBE")]
    pub no_probe: bool,
}
