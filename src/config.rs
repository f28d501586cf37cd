//! 应用配置模块
//!
//! 所有配置保存在 `<config_dir>/config.json` 中，按节读取；
//! 文件缺失或某一节损坏时使用默认值。

use crate::core::engine::SyncConfig;
use crate::storage::{RemoteSettings, SettingsSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// 读取配置文件中的某一节
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    fs::read_to_string(config_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(key).cloned())
        .and_then(|section| serde_json::from_value::<T>(section).ok())
        .unwrap_or_default()
}

/// 写回配置文件中的某一节，保留其他节
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = match fs::read_to_string(&config_file) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({})),
        Err(e) if e.kind() == io::ErrorKind::NotFound => serde_json::json!({}),
        Err(e) => return Err(e),
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value)?;

    fs::create_dir_all(config_dir)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// 对象根目录
    #[serde(default = "default_objects_path")]
    pub objects_path: PathBuf,
}

fn default_objects_path() -> PathBuf {
    crate::dirs::home_dir()
        .map(|h| h.join("Documents").join("spatialToolbox"))
        .unwrap_or_else(|| PathBuf::from("spatialToolbox"))
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            objects_path: default_objects_path(),
        }
    }
}

/// 远程存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// 设置文件路径，配置后每次请求都重新读取
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    #[serde(flatten)]
    pub settings: RemoteSettings,
}

impl RemoteConfig {
    pub fn source(&self) -> SettingsSource {
        match &self.settings_file {
            Some(path) => SettingsSource::File(path.clone()),
            None => SettingsSource::Static(self.settings.clone()),
        }
    }
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub enable_pulling: bool,
    /// 实验性：推送后采用远端返回的文档
    #[serde(default)]
    pub merge_remote_changes: bool,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enable_pulling: false,
            merge_remote_changes: false,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl SyncSettings {
    pub fn to_sync_config(&self, hook_auth: Option<SettingsSource>) -> SyncConfig {
        SyncConfig {
            enable_pulling: self.enable_pulling,
            merge_remote_changes: self.merge_remote_changes,
            retry_delay_ms: self.retry_delay_ms,
            hook_auth,
        }
    }
}

/// 完整应用配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Self {
        Self {
            storage: load_section(config_dir, "storage"),
            remote: load_section(config_dir, "remote"),
            sync: load_section(config_dir, "sync"),
        }
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "storage", &self.storage)?;
        save_section(config_dir, "remote", &self.remote)?;
        save_section(config_dir, "sync", &self.sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.sync.retry_delay_ms, 2000);
        assert!(!config.sync.enable_pulling);
    }

    #[test]
    fn test_load_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{
                "storage": { "objectsPath": "/srv/objects" },
                "remote": { "networkUUID": "u", "networkSecret": "s", "idToken": "t" },
                "sync": { "enablePulling": true },
                "log": { "level": "debug" }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(dir.path());
        assert_eq!(config.storage.objects_path, PathBuf::from("/srv/objects"));
        assert_eq!(config.remote.settings.network_uuid.as_deref(), Some("u"));
        assert!(matches!(config.remote.source(), SettingsSource::Static(_)));
        assert!(config.sync.enable_pulling);
        assert!(!config.sync.merge_remote_changes);
        assert_eq!(config.sync.retry_delay_ms, 2000);
    }

    #[test]
    fn test_corrupt_section_falls_back() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "sync": { "enablePulling": "yes" } }"#,
        )
        .unwrap();
        assert_eq!(AppConfig::load(dir.path()).sync, SyncSettings::default());
    }

    #[test]
    fn test_save_preserves_other_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "log": { "level": "warn" } }"#).unwrap();

        let mut config = AppConfig::default();
        config.remote.settings_file = Some(PathBuf::from("/etc/edge-agent.json"));
        config.save(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(raw["log"]["level"], "warn");
        assert_eq!(AppConfig::load(dir.path()), config);
        assert!(matches!(
            AppConfig::load(dir.path()).remote.source(),
            SettingsSource::File(_)
        ));
    }
}
