use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// 监管器错误分类
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("template executable not found at '{}'", .0.display())]
    TemplateMissing(PathBuf),

    #[error("failed to copy template to '{}': {source}", .path.display())]
    ArtifactCopyFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("artifact '{}' does not exist", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to launch '{name}': {reason}")]
    LaunchFailed { name: String, reason: String },

    #[error("'{0}' is already running")]
    AlreadyRunning(String),

    /// 进程在操作完成前消失
    #[error("process {0} vanished")]
    ProcessVanished(u32),

    #[error("process {0} survived termination")]
    TerminationTimedOut(u32),

    #[error("entry name must not be empty")]
    EmptyName,

    #[error("entry name '{0}' contains characters that are not allowed in file names")]
    InvalidName(String),

    #[error("an entry named '{0}' already exists")]
    DuplicateName(String),

    #[error("no entry named '{0}'")]
    NotFound(String),

    #[error("failed to access snapshot '{}': {source}", .path.display())]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed snapshot '{}': {source}", .path.display())]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SupervisorError {
    /// 面向用户的修正提示
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TemplateMissing(_) => {
                Some("place the template executable next to the supervisor binary or pass --template")
            }
            Self::ArtifactCopyFailed { .. } => {
                Some("check free disk space and that the managed directory is writable")
            }
            Self::ArtifactMissing(_) => Some("the staged copy was removed externally; start the entry again"),
            Self::PermissionDenied(_) => {
                Some("check file permissions of the managed directory and the template")
            }
            Self::LaunchFailed { .. } => Some("verify that the template is a valid executable for this platform"),
            Self::EmptyName | Self::InvalidName(_) => {
                Some("use a name without path separators or reserved file name characters")
            }
            Self::DuplicateName(_) => Some("pick a name that is not already registered"),
            Self::SnapshotFormat { .. } => Some("fix or delete the configuration file, then load again"),
            _ => None,
        }
    }

    /// 该错误是否仅表示进程已不存在
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::ProcessVanished(_))
    }
}
