use std::io;
use std::path::Path;

use crate::error::{Result, SupervisorError};
use crate::models::EntryConfig;

/// 读取配置快照。文件不存在时返回 `None`。
pub fn load_snapshot_file(path: &Path) -> Result<Option<Vec<EntryConfig>>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SupervisorError::SnapshotIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let entries = serde_json::from_str(&contents).map_err(|source| SupervisorError::SnapshotFormat {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(entries))
}

/// 以缩进 JSON 写入快照，先写临时文件再重命名
pub fn save_snapshot_file(path: &Path, entries: &[EntryConfig]) -> Result<()> {
    let io_error = |source| SupervisorError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    };

    let body = serde_json::to_string_pretty(entries).map_err(|source| SupervisorError::SnapshotFormat {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(io_error)?;
    std::fs::rename(&tmp, path).map_err(io_error)?;
    Ok(())
}

/// 读取名称列表文件（UTF-8 文本，每行一个名称）
pub fn read_import_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| SupervisorError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    })
}
