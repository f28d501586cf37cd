//! 内存对象表
//!
//! 对象状态只在内存中修改，持久化由 [`WriteCoalescer`](super::writer::WriteCoalescer) 负责。

use crate::error::Result;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// 对象身份目录名
pub const IDENTITY_FOLDER: &str = ".identity";
/// 对象状态文档名
pub const OBJECT_FILE: &str = "object.json";

/// 对象状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(default)]
    pub frames: BTreeMap<String, serde_json::Value>,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObjectRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            world_id: None,
            frames: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// 状态文档的根相对路径
    pub fn document_path(&self) -> String {
        document_path(&self.name)
    }

    /// 序列化为制表符缩进的 JSON
    pub fn to_document(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        Ok(out)
    }
}

pub fn document_path(object_name: &str) -> String {
    format!("{}/{}/{}", object_name, IDENTITY_FOLDER, OBJECT_FILE)
}

/// 对象表：id -> 对象状态
#[derive(Default)]
pub struct ObjectTable {
    records: RwLock<HashMap<String, ObjectRecord>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ObjectRecord) -> Option<ObjectRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id.clone(), record)
    }

    /// 原地修改对象，对象不存在返回 false
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ObjectRecord),
    {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<ObjectRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(id)
    }

    /// 当前状态快照
    pub fn get(&self, id: &str) -> Option<ObjectRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从存储根目录加载所有对象
    ///
    /// 每个非隐藏子目录是一个对象，读取其 `.identity/object.json`。
    /// 缺失或损坏的文档只记录警告。
    pub async fn load_from(&self, storage: &dyn Storage) -> Result<usize> {
        let mut loaded = 0;

        for entry in storage.read_dir("").await? {
            if !entry.is_dir || entry.name.starts_with('.') {
                continue;
            }

            let doc_path = document_path(&entry.name);
            let data = match storage.read(&doc_path).await {
                Ok(d) => d,
                Err(e) => {
                    debug!("对象目录没有状态文档: {} ({})", entry.name, e);
                    continue;
                }
            };

            match serde_json::from_slice::<ObjectRecord>(&data) {
                Ok(record) => {
                    self.insert(record);
                    loaded += 1;
                }
                Err(e) => warn!("无法解析对象文档 {}: {}", doc_path, e),
            }
        }

        info!("从 {} 加载了 {} 个对象", storage.name(), loaded);
        Ok(loaded)
    }
}
