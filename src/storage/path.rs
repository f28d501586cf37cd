//! 存储路径规范化
//!
//! 所有适配器收到的路径都视为相对存储根目录。`..` 会弹出上一级，
//! 一旦弹出到根目录之外即返回 [`SyncError::PathEscape`]。

use crate::error::{Result, SyncError};

/// 规范化为以 `/` 分隔的根相对路径（根目录本身为空串）
pub fn normalize(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(SyncError::path_escape(path));
                }
            }
            p => parts.push(p),
        }
    }

    Ok(parts.join("/"))
}

/// 拼接并规范化
pub fn join(base: &str, name: &str) -> Result<String> {
    if base.is_empty() {
        normalize(name)
    } else {
        normalize(&format!("{}/{}", base, name))
    }
}

/// 父目录（根目录下的文件返回 None）
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}
