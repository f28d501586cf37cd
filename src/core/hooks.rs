//! 同步完成回调

use super::engine::SyncStatus;
use reqwest::Client;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// 同步结束时触发的回调
#[derive(Debug)]
pub enum CompletionHook {
    /// POST 状态快照到该地址
    Webhook(String),
    /// 进程内等待者
    Notify(oneshot::Sender<SyncStatus>),
}

impl CompletionHook {
    pub fn webhook(url: impl Into<String>) -> Self {
        CompletionHook::Webhook(url.into())
    }

    /// 返回回调及其接收端
    pub fn channel() -> (Self, oneshot::Receiver<SyncStatus>) {
        let (tx, rx) = oneshot::channel();
        (CompletionHook::Notify(tx), rx)
    }

    /// 触发回调，失败只记录日志
    pub async fn fire(self, client: &Client, bearer: Option<&str>, status: &SyncStatus) {
        match self {
            CompletionHook::Webhook(url) => {
                let mut request = client.post(&url).json(status);
                if let Some(token) = bearer {
                    request = request.bearer_auth(token);
                }
                match request.send().await {
                    Ok(res) if res.status().is_success() => debug!("已通知同步完成: {}", url),
                    Ok(res) => warn!("同步完成回调返回 {}: {}", res.status(), url),
                    Err(e) => warn!("同步完成回调失败: {} - {}", url, e),
                }
            }
            CompletionHook::Notify(tx) => {
                // 接收端已放弃等待
                let _ = tx.send(status.clone());
            }
        }
    }
}
