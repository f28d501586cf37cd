use crate::core::comparator::{classify, SyncLists, WorldStatus};
use crate::core::hooks::CompletionHook;
use crate::error::Result;
use crate::storage::{path, SettingsSource, Storage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 连续失败轮次上限，超过后停止同步
pub const MAX_FAILED_PASSES: u32 = 5;

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 拉取只存在于远程的文件
    pub enable_pulling: bool,
    /// 推送后用远端返回的文档覆盖本地（可能丢失本地修改）
    pub merge_remote_changes: bool,
    /// 失败轮次之间的等待（毫秒）
    pub retry_delay_ms: u64,
    /// webhook 回调复用远程存储的令牌
    pub hook_auth: Option<SettingsSource>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_pulling: false,
            merge_remote_changes: false,
            retry_delay_ms: 2000,
            hook_auth: None,
        }
    }
}

/// 同步状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub syncing: bool,
    pub enable_syncing: bool,
    pub worlds: BTreeMap<String, WorldStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// 没有差异
    Settled,
    /// 收到停止请求
    Stopped,
    /// 连续失败超过上限
    Exhausted,
    /// 不可重试的错误
    Fatal,
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    Diffs,
    PullOnly,
    PushOnly,
}

impl ListKind {
    fn of(self, lists: &mut SyncLists) -> &mut Vec<String> {
        match self {
            ListKind::Diffs => &mut lists.diffs,
            ListKind::PullOnly => &mut lists.pull_only,
            ListKind::PushOnly => &mut lists.push_only,
        }
    }
}

#[derive(Default)]
struct Control {
    hooks: Vec<CompletionHook>,
    loop_active: bool,
}

struct Inner {
    local: Arc<dyn Storage>,
    remote: Arc<dyn Storage>,
    config: SyncConfig,
    enable_syncing: AtomicBool,
    syncing: AtomicBool,
    lists: RwLock<SyncLists>,
    control: Mutex<Control>,
    client: reqwest::Client,
}

/// 本地与远程存储之间的同步会话
///
/// 克隆得到的是同一会话的句柄。
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl Synchronizer {
    pub fn new(local: Arc<dyn Storage>, remote: Arc<dyn Storage>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                config,
                enable_syncing: AtomicBool::new(false),
                syncing: AtomicBool::new(false),
                lists: RwLock::new(SyncLists::default()),
                control: Mutex::new(Control::default()),
                client: reqwest::Client::new(),
            }),
        }
    }

    /// 启动同步
    ///
    /// 已在运行时只登记回调，不会启动第二个循环。
    pub fn start(&self, hook: Option<CompletionHook>) {
        let mut control = self.inner.control();
        if let Some(hook) = hook {
            control.hooks.push(hook);
        }
        self.inner.enable_syncing.store(true, Ordering::SeqCst);

        if control.loop_active {
            debug!("同步已在运行，登记回调 ({} 个)", control.hooks.len());
            return;
        }
        control.loop_active = true;
        drop(control);

        info!(
            "开始同步: {} <-> {}",
            self.inner.local.name(),
            self.inner.remote.name()
        );
        tokio::spawn(self.inner.clone().run());
    }

    /// 请求停止，正在进行的单个文件传输会完成
    pub fn stop(&self) {
        info!("请求停止同步");
        self.inner.enable_syncing.store(false, Ordering::SeqCst);
    }

    /// 最近一轮比较的状态
    pub fn status(&self) -> SyncStatus {
        self.inner.status()
    }

    /// 当前差异列表快照
    pub fn lists(&self) -> SyncLists {
        self.inner
            .lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 同步循环是否仍在运行
    pub fn is_active(&self) -> bool {
        self.inner.control().loop_active
    }

    /// 空闲时执行一次比较（不传输）
    ///
    /// 同步循环运行时差异列表只由循环更新，此时直接返回。
    pub async fn reconcile(&self) -> Result<()> {
        if self.is_active() {
            debug!("同步循环运行中，跳过单独比较");
            return Ok(());
        }
        self.inner.reconcile().await
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lists_mut(&self) -> RwLockWriteGuard<'_, SyncLists> {
        self.lists.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_enabled(&self) -> bool {
        self.enable_syncing.load(Ordering::SeqCst)
    }

    fn status(&self) -> SyncStatus {
        let worlds = self
            .lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .world_counts();
        SyncStatus {
            syncing: self.syncing.load(Ordering::SeqCst),
            enable_syncing: self.is_enabled(),
            worlds,
        }
    }

    async fn run(self: Arc<Self>) {
        let mut failed_passes = 0u32;
        loop {
            let exit = self.sync_until_exit(&mut failed_passes).await;
            if self.settle(exit).await {
                break;
            }
        }
    }

    async fn sync_until_exit(&self, failed_passes: &mut u32) -> LoopExit {
        loop {
            if !self.is_enabled() {
                return LoopExit::Stopped;
            }

            match self.run_pass().await {
                Ok(true) => return LoopExit::Settled,
                Ok(false) => *failed_passes = 0,
                Err(e) if e.is_fatal() => {
                    error!("同步遇到不可恢复的错误: {}", e);
                    return LoopExit::Fatal;
                }
                Err(e) => {
                    *failed_passes += 1;
                    warn!(
                        "同步失败 ({}/{}): {}",
                        failed_passes, MAX_FAILED_PASSES, e
                    );
                    if *failed_passes > MAX_FAILED_PASSES {
                        error!("同步失败次数过多，停止同步");
                        return LoopExit::Exhausted;
                    }
                    if self.config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms))
                            .await;
                    }
                }
            }
        }
    }

    /// 一轮比较 + 传输，返回 true 表示已无差异
    async fn run_pass(&self) -> Result<bool> {
        self.reconcile().await?;

        let pending = {
            let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
            if lists.is_settled() {
                return Ok(true);
            }
            (lists.diffs.len(), lists.pull_only.len(), lists.push_only.len())
        };
        debug!(
            "待同步: {} 个差异, {} 个拉取, {} 个新增",
            pending.0, pending.1, pending.2
        );

        self.transfer().await?;
        Ok(false)
    }

    async fn reconcile(&self) -> Result<()> {
        if self.syncing.load(Ordering::SeqCst) {
            debug!("传输进行中，跳过比较");
            return Ok(());
        }

        let mut remote = self.remote.checksum_index().await?;
        let mut local = self.local.checksum_index().await?;

        // 任一侧忽略的路径（写入中的临时文件）两侧都不参与比较
        let ignored = |path: &String| self.local.is_ignored(path) || self.remote.is_ignored(path);
        remote.retain(|path, _| !ignored(path));
        local.retain(|path, _| !ignored(path));

        let lists = classify(&local, &remote, self.config.enable_pulling);

        debug!(
            "比较完成: 本地 {} 个, 远程 {} 个, 一致 {} 个",
            local.len(),
            remote.len(),
            lists.matching.len()
        );
        *self.lists_mut() = lists;
        Ok(())
    }

    async fn transfer(&self) -> Result<()> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _busy = scopeguard::guard(&self.syncing, |s| s.store(false, Ordering::SeqCst));

        self.transfer_list(ListKind::Diffs).await?;
        self.transfer_list(ListKind::PullOnly).await?;
        self.transfer_list(ListKind::PushOnly).await?;
        Ok(())
    }

    async fn transfer_list(&self, kind: ListKind) -> Result<()> {
        loop {
            if !self.is_enabled() {
                debug!("同步已停止，中止传输");
                return Ok(());
            }

            // 传输完成前路径保留在原列表中，状态统计不会漏算
            let next = kind.of(&mut self.lists_mut()).last().cloned();
            let Some(file) = next else {
                return Ok(());
            };

            let result = match kind {
                ListKind::Diffs => self.push_changed(&file).await,
                ListKind::PullOnly => self.pull(&file).await,
                ListKind::PushOnly => self.push_new(&file).await,
            };

            if let Err(e) = result {
                warn!("传输失败: {} - {}", file, e);
                return Err(e);
            }

            let mut lists = self.lists_mut();
            let pending = kind.of(&mut lists);
            if let Some(pos) = pending.iter().rposition(|p| p == &file) {
                pending.remove(pos);
            }
            lists.matching.push(file);
        }
    }

    async fn push_changed(&self, file: &str) -> Result<()> {
        debug!("推送修改: {}", file);
        let data = self.local.read(file).await?;
        let authoritative = self.remote.push(file, data).await?;

        if self.config.merge_remote_changes {
            if let Some(document) = authoritative {
                debug!("以远端文档覆盖本地: {}", file);
                self.local.write(file, document).await?;
            }
        }
        Ok(())
    }

    async fn pull(&self, file: &str) -> Result<()> {
        debug!("拉取: {}", file);
        let data = self.remote.read(file).await?;
        if let Some(parent) = path::parent(file) {
            self.local.create_dir(parent).await?;
        }
        self.local.write(file, data).await
    }

    async fn push_new(&self, file: &str) -> Result<()> {
        debug!("上传新文件: {}", file);
        let data = self.local.read(file).await?;
        self.remote.write(file, data).await
    }

    /// 结束循环并触发回调，返回 false 表示停止期间被重新启动，需继续同步
    async fn settle(&self, exit: LoopExit) -> bool {
        let (hooks, status) = {
            let mut control = self.control();
            if exit == LoopExit::Stopped && self.is_enabled() {
                debug!("停止过程中被重新启动，继续同步");
                return false;
            }
            let status = self.status();
            control.loop_active = false;
            self.enable_syncing.store(false, Ordering::SeqCst);
            (std::mem::take(&mut control.hooks), status)
        };

        if matches!(exit, LoopExit::Exhausted | LoopExit::Fatal) {
            if !hooks.is_empty() {
                warn!("同步已中止，丢弃 {} 个完成回调", hooks.len());
            }
            return true;
        }

        let bearer = match &self.config.hook_auth {
            Some(source) => source.load().await.ok().and_then(|s| s.id_token),
            None => None,
        };
        let client = &self.client;
        let status_ref = &status;
        let bearer_ref = bearer.as_deref();
        futures::future::join_all(
            hooks
                .into_iter()
                .map(|hook| hook.fire(client, bearer_ref, status_ref)),
        )
        .await;

        info!(
            "同步结束 ({:?}): {} 个世界",
            exit,
            status.worlds.len()
        );
        true
    }
}
