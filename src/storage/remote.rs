//! 云端代理存储
//!
//! 通过文件 API 访问远程存储：每个请求都带有 `X-Files-Args` 参数描述头，
//! 有令牌时附带 `Authorization: Bearer`。

use super::{path, DirEntry, FileMeta, Storage};
use crate::core::checksum::{self, ChecksumIndex};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const FILES_ARGS_HEADER: &str = "X-Files-Args";
pub const DEFAULT_SERVER_URL: &str = "stable.platform.datatime.space";

/// 远程连接设置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, rename = "networkUUID", skip_serializing_if = "Option::is_none")]
    pub network_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl RemoteSettings {
    /// 文件 API 根地址
    pub fn api_base(&self) -> Result<String> {
        let (uuid, secret) = match (
            self.network_uuid.as_deref().filter(|s| !s.is_empty()),
            self.network_secret.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(u), Some(s)) => (u, s),
            _ => {
                return Err(SyncError::Parse(
                    "remote settings require networkUUID and networkSecret".to_string(),
                ))
            }
        };

        let server = self
            .server_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER_URL)
            .trim_end_matches('/');
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{}", server)
        };

        Ok(format!("{}/n/{}/s/{}/files/", server, uuid, secret))
    }

    pub fn bearer(&self) -> Option<&str> {
        self.id_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// 设置来源：固定值，或每次请求都重新读取的设置文件（令牌可能被轮换）
#[derive(Debug, Clone)]
pub enum SettingsSource {
    Static(RemoteSettings),
    File(PathBuf),
}

impl SettingsSource {
    pub async fn load(&self) -> Result<RemoteSettings> {
        match self {
            SettingsSource::Static(settings) => Ok(settings.clone()),
            SettingsSource::File(path) => {
                let data = tokio::fs::read(path).await?;
                Ok(serde_json::from_slice(&data)?)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDirEntry {
    name: String,
    #[serde(default)]
    is_directory: bool,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStat {
    #[serde(default)]
    is_directory: bool,
    #[serde(default)]
    size: u64,
}

pub struct RemoteStorage {
    client: Client,
    settings: SettingsSource,
    name: String,
}

impl RemoteStorage {
    pub fn new(settings: SettingsSource) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(client: Client, settings: SettingsSource) -> Self {
        let name = match &settings {
            SettingsSource::Static(s) => format!(
                "remote:{}",
                s.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
            ),
            SettingsSource::File(p) => format!("remote:{}", p.display()),
        };
        Self {
            client,
            settings,
            name,
        }
    }

    /// 当前设置（供 webhook 复用认证）
    pub async fn settings(&self) -> Result<RemoteSettings> {
        self.settings.load().await
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        args: serde_json::Value,
    ) -> Result<RequestBuilder> {
        let settings = self.settings.load().await?;
        let url = format!("{}{}", settings.api_base()?, endpoint);

        let mut builder = self
            .client
            .request(method, url)
            .header(FILES_ARGS_HEADER, args.to_string());
        if let Some(token) = settings.bearer() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(builder: RequestBuilder, what: &str) -> Result<Response> {
        let res = builder.send().await?;
        if !res.status().is_success() {
            return Err(SyncError::Transport(format!(
                "{} failed: {} {}",
                what,
                res.status(),
                res.url()
            )));
        }
        Ok(res)
    }

    async fn post_path(&self, endpoint: &str, path: &str) -> Result<()> {
        let builder = self
            .request(Method::POST, endpoint, json!({}))
            .await?
            .json(&json!({ "path": path }));
        Self::send(builder, endpoint).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn read(&self, file: &str) -> Result<Vec<u8>> {
        let file = path::normalize(file)?;
        let builder = self
            .request(Method::GET, "read_file", json!({ "path": file }))
            .await?;
        let res = Self::send(builder, "read_file").await?;
        Ok(res.bytes().await?.to_vec())
    }

    async fn write(&self, file: &str, data: Vec<u8>) -> Result<()> {
        self.push(file, data).await.map(|_| ())
    }

    async fn push(&self, file: &str, data: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let file = path::normalize(file)?;
        let file_name = file.rsplit('/').next().unwrap_or(&file).to_string();

        let part = reqwest::multipart::Part::stream(Bytes::from(data)).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let builder = self
            .request(Method::POST, "write_file", json!({ "path": file }))
            .await?
            .multipart(form);
        let res = Self::send(builder, "write_file").await?;
        let body = res.bytes().await?;

        // 远端可在响应中给出合并后的权威文档
        let document = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("document").cloned());
        match document {
            Some(doc) if !doc.is_null() => {
                debug!("远端返回了权威文档: {}", file);
                Ok(Some(serde_json::to_vec_pretty(&doc)?))
            }
            _ => Ok(None),
        }
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        let dir = path::normalize(dir)?;
        self.post_path("mkdir", &dir).await
    }

    async fn delete(&self, target: &str) -> Result<()> {
        let target = path::normalize(target)?;
        match self.stat(&target).await? {
            Some(meta) if meta.is_dir => self.post_path("rmdir", &target).await,
            Some(_) => self.post_path("unlink", &target).await,
            None => Ok(()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        let builder = self
            .request(Method::POST, "rename", json!({}))
            .await?
            .json(&json!({ "path": from, "destPath": to }));
        let res = Self::send(builder, "rename").await?;
        let body = res.bytes().await?;
        if body.is_empty() {
            return Ok(());
        }

        let data: serde_json::Value = serde_json::from_slice(&body)?;
        if let Some(err) = data.get("error").filter(|e| !e.is_null()) {
            warn!("远程重命名失败: {} -> {}: {}", from, to, err);
            return Err(SyncError::Transport(format!("rename failed: {}", err)));
        }
        Ok(())
    }

    async fn stat(&self, target: &str) -> Result<Option<FileMeta>> {
        let target = path::normalize(target)?;
        let builder = self
            .request(Method::GET, "stat", json!({ "path": target }))
            .await?;
        let res = builder.send().await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(SyncError::Transport(format!("stat failed: {}", res.status())));
        }

        // 旧版服务只返回空对象
        let body = res.bytes().await?;
        let stat: RemoteStat = serde_json::from_slice(&body).unwrap_or_default();
        Ok(Some(FileMeta {
            size: stat.size,
            is_dir: stat.is_directory,
        }))
    }

    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let dir = path::normalize(dir)?;
        let builder = self
            .request(Method::GET, "readdir", json!({ "path": dir }))
            .await?;
        let res = Self::send(builder, "readdir").await?;
        let body = res.bytes().await?;
        let raw: Vec<RemoteDirEntry> = serde_json::from_slice(&body)?;

        raw.into_iter()
            .map(|e| {
                let entry_path = match e.path {
                    Some(p) => path::normalize(&p)?,
                    None => path::join(&dir, &e.name)?,
                };
                Ok(DirEntry {
                    name: e.name,
                    path: entry_path,
                    is_dir: e.is_directory,
                })
            })
            .collect()
    }

    async fn checksum_index(&self) -> Result<ChecksumIndex> {
        let builder = self.request(Method::GET, "checksums", json!({})).await?;
        let res = Self::send(builder, "checksums").await?;
        let body = res.bytes().await?;
        checksum::parse_index(&body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
