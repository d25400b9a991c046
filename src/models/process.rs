use serde::{Deserialize, Serialize};

use crate::models::stats::ResourceReading;

/// 持久化的条目配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfig {
    /// 条目名称（唯一标识符，同时决定产物文件名）
    pub name: String,
    /// 隐藏启动（保留字段）
    #[serde(default)]
    pub minimized: bool,
}

impl EntryConfig {
    pub fn new(name: impl Into<String>, minimized: bool) -> Self {
        Self {
            name: name.into(),
            minimized,
        }
    }
}

/// 提供给展示层的只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub name: String,
    pub minimized: bool,
    /// 是否正在运行
    pub running: bool,
    /// 句柄状态描述
    pub state: String,
    /// 进程 ID
    pub pid: Option<u32>,
    /// CPU 使用率，不可用时为 null
    pub cpu_percent: Option<f32>,
    /// 常驻内存字节数，不可用时为 null
    pub resident_bytes: Option<u64>,
}

impl EntrySnapshot {
    /// 尚未启动的条目
    pub fn idle(name: impl Into<String>, minimized: bool) -> Self {
        Self {
            name: name.into(),
            minimized,
            running: false,
            state: "stopped".to_string(),
            pid: None,
            cpu_percent: None,
            resident_bytes: None,
        }
    }

    pub fn with_reading(mut self, reading: ResourceReading) -> Self {
        self.cpu_percent = reading.cpu_percent();
        self.resident_bytes = reading.resident_bytes();
        self
    }
}
