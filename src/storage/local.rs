use super::{path, DirEntry, FileMeta, Storage};
use crate::core::checksum::{self, ChecksumIndex, ScanConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

/// 临时文件序号，保证并发写入同一路径时各自使用独立的临时文件
static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct LocalStorage {
    base_path: PathBuf,
    scan_config: ScanConfig,
    name: String,
}

impl LocalStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self {
            base_path,
            scan_config: ScanConfig::default(),
            name,
        })
    }

    pub fn with_scan_config(mut self, scan_config: ScanConfig) -> Self {
        self.scan_config = scan_config;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let relative = path::normalize(path)?;
        if relative.is_empty() {
            Ok(self.base_path.clone())
        } else {
            Ok(self.base_path.join(relative))
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve_path(path)?).await?)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = full_path.with_file_name(format!(
            "{}{}.{}.{}{}",
            checksum::PARTIAL_PREFIX,
            file_name,
            std::process::id(),
            PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed),
            checksum::PARTIAL_SUFFIX
        ));
        fs::write(&temp_path, data).await?;
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve_path(path)?).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path)?;

        match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full_path).await?,
            Ok(_) => fs::remove_file(&full_path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = self.resolve_path(from)?;
        let to = self.resolve_path(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(from, to).await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match fs::metadata(self.resolve_path(path)?).await {
            Ok(metadata) => Ok(Some(FileMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let base = path::normalize(dir)?;
        let mut reader = fs::read_dir(self.resolve_path(&base)?).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = match entry.file_type().await {
                Ok(t) => t.is_dir(),
                // 条目在列出过程中被删除
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(DirEntry {
                path: path::join(&base, &name)?,
                name,
                is_dir,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn checksum_index(&self) -> Result<ChecksumIndex> {
        checksum::build_index(&self.base_path, &self.scan_config).await
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.scan_config.should_exclude(path)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_and_index() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage
            .write("obj/.identity/object.json", b"123456789".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.read("obj/.identity/object.json").await.unwrap(),
            b"123456789"
        );
        // 临时文件不会残留
        let index = storage.checksum_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["obj/.identity/object.json"], "3Jzrme");
    }

    #[tokio::test]
    async fn test_stat_read_dir_rename_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage.create_dir("a/b").await.unwrap();
        storage.create_dir("a/b").await.unwrap();
        storage.write("a/file.txt", b"hi".to_vec()).await.unwrap();

        let meta = storage.stat("a/file.txt").await.unwrap().unwrap();
        assert_eq!(meta, FileMeta { size: 2, is_dir: false });
        assert!(storage.stat("a/b").await.unwrap().unwrap().is_dir);
        assert!(storage.stat("missing").await.unwrap().is_none());

        let entries = storage.read_dir("a").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a/b", "a/file.txt"]);

        storage.rename("a/file.txt", "c/moved.txt").await.unwrap();
        assert!(storage.exists("c/moved.txt").await.unwrap());
        assert!(!storage.exists("a/file.txt").await.unwrap());

        storage.delete("a").await.unwrap();
        storage.delete("a").await.unwrap();
        assert!(!storage.exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_path() {
        let dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(LocalStorage::new(dir.path()).unwrap());

        let writes = (0..8).map(|i| {
            let storage = storage.clone();
            tokio::spawn(async move {
                storage
                    .write("obj/.identity/object.json", format!("{{\"x\":{}}}", i).into_bytes())
                    .await
            })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path().join("obj/.identity"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["object.json"]);
    }

    #[tokio::test]
    async fn test_user_tmp_files_are_indexed() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.write("notes.tmp", b"hello".to_vec()).await.unwrap();

        let index = storage.checksum_index().await.unwrap();
        assert_eq!(index["notes.tmp"], "ZnVY2");
        assert!(!storage.is_ignored("notes.tmp"));
        assert!(storage.is_ignored(".objsync-notes.tmp.1.2.partial"));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("root")).unwrap();

        let result = storage.write("../outside.txt", b"x".to_vec()).await;
        assert!(matches!(result, Err(SyncError::PathEscape { .. })));
        assert!(!dir.path().join("outside.txt").exists());

        assert!(matches!(
            storage.read("a/../../etc/passwd").await,
            Err(SyncError::PathEscape { .. })
        ));
        assert!(matches!(
            storage.rename("ok.txt", "../../nope").await,
            Err(SyncError::PathEscape { .. })
        ));
    }
}
