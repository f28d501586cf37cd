pub mod local;
pub mod path;
pub mod remote;

use crate::core::checksum::ChecksumIndex;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalStorage;
pub use remote::{RemoteSettings, RemoteStorage, SettingsSource};

/// 文件元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub is_dir: bool,
}

/// 目录条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    /// 根相对路径
    pub path: String,
    #[serde(rename = "isDirectory")]
    pub is_dir: bool,
}

/// 存储抽象接口
///
/// 所有路径都是相对存储根目录的路径，越出根目录时返回 `PathEscape`。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 推送文件，远端可返回一份权威内容
    async fn push(&self, path: &str, data: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.write(path, data).await?;
        Ok(None)
    }

    /// 创建目录（递归，已存在不报错）
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 递归删除文件或目录
    async fn delete(&self, path: &str) -> Result<()>;

    /// 重命名文件或目录
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// 获取文件元数据，不存在返回 None
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 列出目录的直接子项
    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// 整个存储的校验和索引
    async fn checksum_index(&self) -> Result<ChecksumIndex>;

    /// 索引比较时忽略的路径（写入中的临时文件）
    fn is_ignored(&self, path: &str) -> bool {
        crate::core::checksum::is_partial_write(path)
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
