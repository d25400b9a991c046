use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const HISTORY_CAPACITY: usize = 1000;
const CHANNEL_CAPACITY: usize = 256;

/// 生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    EntryAdded { entry: String },
    EntryRemoved { entry: String },
    ArtifactStaged { entry: String, path: PathBuf },
    ArtifactRemoved { path: PathBuf },
    ArtifactRemovalFailed { path: PathBuf, error: String },
    Launched { entry: String, pid: u32 },
    LaunchFailed { entry: String, error: String },
    ExitedEarly { entry: String, pid: u32, code: Option<i32> },
    Exited { entry: String, pid: u32, code: Option<i32> },
    Vanished { entry: String, pid: u32 },
    AlreadyRunning { entry: String, pid: u32 },
    StopRequested { entry: String, pid: u32 },
    Stopped { entry: String, pid: u32 },
    StopFailed { entry: String, pid: u32 },
    CleanupRequested { entry: String },
    Note { message: String },
}

impl LifecycleEvent {
    pub fn note(message: impl Into<String>) -> Self {
        Self::Note {
            message: message.into(),
        }
    }

    pub fn level(&self) -> log::Level {
        match self {
            Self::ArtifactRemovalFailed { .. } | Self::LaunchFailed { .. } | Self::StopFailed { .. } => {
                log::Level::Warn
            }
            Self::Vanished { .. } | Self::ExitedEarly { .. } => log::Level::Warn,
            _ => log::Level::Info,
        }
    }
}

fn code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryAdded { entry } => write!(f, "entry '{}' added", entry),
            Self::EntryRemoved { entry } => write!(f, "entry '{}' removed", entry),
            Self::ArtifactStaged { entry, path } => {
                write!(f, "staged artifact for '{}' at '{}'", entry, path.display())
            }
            Self::ArtifactRemoved { path } => write!(f, "removed artifact '{}'", path.display()),
            Self::ArtifactRemovalFailed { path, error } => {
                write!(f, "failed to remove artifact '{}': {}", path.display(), error)
            }
            Self::Launched { entry, pid } => write!(f, "launched '{}' (PID: {})", entry, pid),
            Self::LaunchFailed { entry, error } => write!(f, "failed to launch '{}': {}", entry, error),
            Self::ExitedEarly { entry, pid, code } => write!(
                f,
                "'{}' (PID: {}) exited right after launch, exit code: {}",
                entry,
                pid,
                code_text(code)
            ),
            Self::Exited { entry, pid, code } => write!(
                f,
                "'{}' (PID: {}) exited, exit code: {}",
                entry,
                pid,
                code_text(code)
            ),
            Self::Vanished { entry, pid } => {
                write!(f, "'{}' (PID: {}) vanished without an exit status", entry, pid)
            }
            Self::AlreadyRunning { entry, pid } => {
                write!(f, "'{}' is already running (PID: {})", entry, pid)
            }
            Self::StopRequested { entry, pid } => write!(f, "stopping '{}' (PID: {})", entry, pid),
            Self::Stopped { entry, pid } => write!(f, "'{}' (PID: {}) stopped", entry, pid),
            Self::StopFailed { entry, pid } => write!(
                f,
                "'{}' (PID: {}) still appears to be running after termination",
                entry, pid
            ),
            Self::CleanupRequested { entry } => write!(f, "cleaning up '{}'", entry),
            Self::Note { message } => f.write_str(message),
        }
    }
}

/// 带时间戳的日志记录
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub event: LifecycleEvent,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.event)
    }
}

struct EventLogInner {
    file: Option<PathBuf>,
    history: Mutex<VecDeque<LogRecord>>,
    sender: broadcast::Sender<LogRecord>,
}

/// 行式日志存储：写入文件、`log` 门面、内存历史，并广播给订阅者
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

impl EventLog {
    pub fn new(file: Option<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EventLogInner {
                file,
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                sender,
            }),
        }
    }

    /// 仅内存记录（测试及无文件模式）
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn file(&self) -> Option<&Path> {
        self.inner.file.as_deref()
    }

    pub fn record(&self, event: LifecycleEvent) {
        let record = LogRecord {
            timestamp: Local::now(),
            event,
        };
        log::log!(record.event.level(), "{}", record.event);

        if let Some(path) = &self.inner.file {
            if let Err(e) = append_line(path, &record.to_string()) {
                log::warn!("Failed to write log file '{}': {}", path.display(), e);
            }
        }

        {
            let mut history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        // 没有订阅者时发送失败是正常的
        let _ = self.inner.sender.send(record);
    }

    pub fn history(&self) -> Vec<LogRecord> {
        let history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().cloned().collect()
    }

    pub fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        let history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().filter(|record| predicate(&record.event)).count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.inner.sender.subscribe()
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
