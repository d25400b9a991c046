use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{executable_file_name, SupervisorConfig};
use crate::error::{Result, SupervisorError};
use crate::services::event_log::{EventLog, LifecycleEvent};

lazy_static! {
    // 常见平台上文件名中不允许出现的字符
    static ref FORBIDDEN_NAME_CHARS: Regex = Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).unwrap();
}

/// 校验条目名称，返回去除首尾空白后的名称
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SupervisorError::EmptyName);
    }
    if name == "." || name == ".." || FORBIDDEN_NAME_CHARS.is_match(name) {
        return Err(SupervisorError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

/// 负责从模板复制一次性可执行文件以及删除它们
#[derive(Clone)]
pub struct ArtifactManager {
    template_path: PathBuf,
    managed_dir: PathBuf,
    events: EventLog,
}

impl ArtifactManager {
    pub fn new(config: &SupervisorConfig, events: EventLog) -> Self {
        Self {
            template_path: config.template_path.clone(),
            managed_dir: config.managed_dir.clone(),
            events,
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn managed_dir(&self) -> &Path {
        &self.managed_dir
    }

    pub fn template_exists(&self) -> bool {
        self.template_path.is_file()
    }

    /// 条目对应的产物路径（不检查是否存在）
    pub fn artifact_path(&self, logical_name: &str) -> PathBuf {
        self.managed_dir.join(executable_file_name(logical_name))
    }

    /// 把模板复制为 `logical_name` 的专属可执行文件
    pub fn stage(&self, logical_name: &str) -> Result<PathBuf> {
        // 模板缺失时在复制之前失败
        if !self.template_exists() {
            return Err(SupervisorError::TemplateMissing(self.template_path.clone()));
        }

        let name = validate_name(logical_name)?;
        let dest = self.artifact_path(&name);

        if let Err(e) = std::fs::copy(&self.template_path, &dest) {
            return Err(match e.kind() {
                io::ErrorKind::PermissionDenied => SupervisorError::PermissionDenied(format!(
                    "cannot write artifact '{}'",
                    dest.display()
                )),
                io::ErrorKind::NotFound if !self.template_exists() => {
                    SupervisorError::TemplateMissing(self.template_path.clone())
                }
                _ => SupervisorError::ArtifactCopyFailed { path: dest, source: e },
            });
        }

        self.events.record(LifecycleEvent::ArtifactStaged {
            entry: name,
            path: dest.clone(),
        });
        Ok(dest)
    }

    /// 删除产物文件；路径不存在时视为成功。返回是否真的删除了文件。
    pub fn remove(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => {
                self.events.record(LifecycleEvent::ArtifactRemoved {
                    path: path.to_path_buf(),
                });
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Artifact '{}' already absent", path.display());
                false
            }
            Err(e) => {
                self.events.record(LifecycleEvent::ArtifactRemovalFailed {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}
