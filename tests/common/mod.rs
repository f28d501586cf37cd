#![allow(dead_code)]

use async_trait::async_trait;
use objsync_lib::core::checksum::{fingerprint, ChecksumIndex};
use objsync_lib::error::{Result, SyncError};
use objsync_lib::storage::{path, DirEntry, FileMeta, Storage};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Callback = Box<dyn Fn() + Send + Sync>;

/// 内存存储，用于测试同步与写入行为
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    writes: Mutex<Vec<String>>,
    index_calls: AtomicUsize,
    /// 剩余失败的索引请求次数
    index_failures: AtomicUsize,
    /// 推送后服务端保存并返回的文档
    push_reply: Mutex<Option<Vec<u8>>>,
    after_write: Mutex<Option<Callback>>,
    before_index: Mutex<Option<Callback>>,
    /// 下一次写入会失败的路径
    failing_writes: Mutex<BTreeSet<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let storage = Self::new();
        for (path, data) in files {
            storage.put(path, data);
        }
        storage
    }

    /// 直接放入文件，不计入写入次数
    pub fn put(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn fail_index(&self, times: usize) {
        self.index_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_push_reply(&self, reply: &[u8]) {
        *self.push_reply.lock().unwrap() = Some(reply.to_vec());
    }

    pub fn set_after_write(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.after_write.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn set_before_index(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.before_index.lock().unwrap() = Some(Box::new(callback));
    }

    /// 让该路径的下一次写入失败
    pub fn fail_write(&self, path: &str) {
        self.failing_writes.lock().unwrap().insert(path.to_string());
    }

    fn check_write(&self, path: &str) -> Result<()> {
        if self.failing_writes.lock().unwrap().remove(path) {
            return Err(SyncError::Transport(format!("write rejected: {}", path)));
        }
        Ok(())
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    fn record_write(&self, path: String, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.clone(), data);
        self.writes.lock().unwrap().push(path);
        if let Some(callback) = self.after_write.lock().unwrap().as_ref() {
            callback();
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = path::normalize(path)?;
        self.get(&path).ok_or_else(|| {
            SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", path),
            ))
        })
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = path::normalize(path)?;
        self.check_write(&path)?;
        self.record_write(path, data);
        Ok(())
    }

    async fn push(&self, path: &str, data: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let path = path::normalize(path)?;
        self.check_write(&path)?;
        let reply = self.push_reply.lock().unwrap().clone();
        match reply {
            Some(document) => {
                self.record_write(path, document.clone());
                Ok(Some(document))
            }
            None => {
                self.record_write(path, data);
                Ok(None)
            }
        }
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        self.dirs.lock().unwrap().insert(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        let prefix = format!("{}/", path);
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| p != &path && !p.starts_with(&prefix));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        let mut files = self.files.lock().unwrap();
        match files.remove(&from) {
            Some(data) => {
                files.insert(to, data);
                Ok(())
            }
            None => Err(SyncError::Transport(format!("rename source missing: {}", from))),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        let path = path::normalize(path)?;
        Ok(self.get(&path).map(|data| FileMeta {
            size: data.len() as u64,
            is_dir: false,
        }))
    }

    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let base = path::normalize(dir)?;
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };

        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for p in self.files.lock().unwrap().keys() {
            if let Some(rest) = p.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((name, _)) => children.insert(name.to_string(), true),
                    None => children.insert(rest.to_string(), false),
                };
            }
        }

        children
            .into_iter()
            .map(|(name, is_dir)| {
                Ok(DirEntry {
                    path: path::join(&base, &name)?,
                    name,
                    is_dir,
                })
            })
            .collect()
    }

    async fn checksum_index(&self) -> Result<ChecksumIndex> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(callback) = self.before_index.lock().unwrap().as_ref() {
            callback();
        }
        let remaining = self.index_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.index_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Transport("checksums unavailable".to_string()));
        }

        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, data)| (path.clone(), fingerprint(data)))
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
