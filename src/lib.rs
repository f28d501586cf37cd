use std::path::PathBuf;
use std::sync::Arc;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::AppConfig;
pub use core::{CompletionHook, ObjectTable, SyncConfig, SyncStatus, Synchronizer, WriteCoalescer};
pub use error::{Result, SyncError};
pub use storage::{LocalStorage, RemoteStorage, Storage};

/// 应用状态，进程内共享
pub struct AppState {
    pub config_dir: PathBuf,
    pub config: AppConfig,
    pub local: Arc<LocalStorage>,
    pub remote: Arc<RemoteStorage>,
    pub objects: Arc<ObjectTable>,
    pub writer: WriteCoalescer,
    pub synchronizer: Synchronizer,
}

impl AppState {
    pub async fn new(config_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config_dir)?;
        let config = AppConfig::load(&config_dir);
        tracing::debug!("对象目录: {:?}", config.storage.objects_path);

        let local = Arc::new(LocalStorage::new(&config.storage.objects_path)?);
        let remote_source = config.remote.source();
        let remote = Arc::new(RemoteStorage::new(remote_source.clone()));

        let objects = Arc::new(ObjectTable::new());
        let loaded = objects.load_from(local.as_ref()).await?;
        tracing::info!("已加载 {} 个对象", loaded);

        let writer = WriteCoalescer::spawn(objects.clone(), local.clone());
        let synchronizer = Synchronizer::new(
            local.clone(),
            remote.clone(),
            config.sync.to_sync_config(Some(remote_source)),
        );

        Ok(Self {
            config_dir,
            config,
            local,
            remote,
            objects,
            writer,
            synchronizer,
        })
    }

    /// 清理资源（进程退出前调用）
    pub async fn cleanup(self) {
        tracing::info!("正在清理应用资源...");

        // 1. 停止同步循环
        self.synchronizer.stop();

        // 2. 写出所有待写对象
        self.writer.shutdown().await;

        tracing::info!("资源清理完成");
    }
}

pub mod dirs {
    use std::path::PathBuf;

    /// 覆盖配置目录的环境变量
    pub const CONFIG_DIR_ENV: &str = "OBJSYNC_CONFIG_DIR";

    pub fn home_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        } else {
            std::env::var("HOME").ok().map(PathBuf::from)
        }
    }

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else {
            home_dir().map(|h| h.join(".config"))
        }
    }

    /// 应用配置目录
    pub fn app_config_dir() -> PathBuf {
        std::env::var_os(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| config_dir().map(|p| p.join("objsync")))
            .unwrap_or_else(|| PathBuf::from(".objsync"))
    }
}
