//! 持久化与同步错误类型

use thiserror::Error;

/// 同步 / 持久化错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 远程服务或网络失败，计入失败预算，下一轮重试
    #[error("transport error: {0}")]
    Transport(String),

    /// 路径越出存储根目录，上游 bug，立即终止
    #[error("path escapes storage root: {path}")]
    PathEscape { path: String },

    /// 写入时对象已被删除
    #[error("object no longer exists: {0}")]
    MissingObject(String),

    /// 远程索引 / 设置 / 文档格式错误
    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// 是否为不可重试的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::PathEscape { .. })
    }

    pub fn path_escape(path: impl Into<String>) -> Self {
        SyncError::PathEscape { path: path.into() }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Parse(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
