//! 对象状态写入合并队列
//!
//! 同一对象的多次写入请求只保留一个待写标记；单个后台任务依次写出，
//! 写出时读取对象的最新状态，而不是请求时的快照。

use super::objects::ObjectTable;
use crate::error::{Result, SyncError};
use crate::storage::Storage;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct Shared {
    objects: Arc<ObjectTable>,
    storage: Arc<dyn Storage>,
    /// 待写对象 id（每个 id 至多一个）
    pending: Mutex<HashSet<String>>,
    wake: Notify,
    /// 队列为空且没有正在进行的写入
    idle: watch::Sender<bool>,
}

impl Shared {
    /// 取出一个待写 id；队列为空时标记空闲
    fn take_next(&self) -> Option<String> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let next = pending.iter().next().cloned();
        match next {
            Some(id) => {
                pending.remove(&id);
                Some(id)
            }
            None => {
                self.idle.send_replace(true);
                None
            }
        }
    }

    async fn write_object(&self, id: &str) -> Result<()> {
        let record = self
            .objects
            .get(id)
            .ok_or_else(|| SyncError::MissingObject(id.to_string()))?;
        let document = record.to_document()?;
        self.storage.write(&record.document_path(), document).await
    }

    async fn run(self: Arc<Self>) {
        loop {
            while let Some(id) = self.take_next() {
                match self.write_object(&id).await {
                    Ok(()) => debug!("对象已写入: {}", id),
                    Err(SyncError::MissingObject(_)) => {
                        debug!("对象在写入前已删除，跳过: {}", id)
                    }
                    Err(e) => error!("写入对象失败: {} - {}", id, e),
                }
            }
            self.wake.notified().await;
        }
    }
}

/// 写入合并器
pub struct WriteCoalescer {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl WriteCoalescer {
    /// 创建并启动后台写入任务（需要在 tokio runtime 中调用）
    pub fn spawn(objects: Arc<ObjectTable>, storage: Arc<dyn Storage>) -> Self {
        let (idle, _) = watch::channel(true);
        let shared = Arc::new(Shared {
            objects,
            storage,
            pending: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            idle,
        });
        let worker = tokio::spawn(shared.clone().run());
        Self { shared, worker }
    }

    /// 请求写出对象，已在队列中的同一对象只保留一个标记
    pub fn request_write(&self, object_id: &str) {
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.insert(object_id.to_string());
            self.shared.idle.send_replace(false);
        }
        self.shared.wake.notify_one();
    }

    /// 删除对象并丢弃它的待写标记
    pub fn remove_object(&self, object_id: &str) {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.remove(object_id);
        self.shared.objects.remove(object_id);
    }

    /// 当前待写数量
    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 等待所有待写对象落盘
    pub async fn flush(&self) {
        let mut idle = self.shared.idle.subscribe();
        // 发送端由自身持有，不会关闭
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// 写完剩余对象后停止后台任务
    pub async fn shutdown(self) {
        self.flush().await;
        self.worker.abort();
        info!("写入队列已停止");
    }
}

impl Drop for WriteCoalescer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
