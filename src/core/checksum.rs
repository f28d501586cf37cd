//! 校验和索引 - 遍历存储目录，生成 路径 -> 指纹 映射
//!
//! 指纹为 CRC-32（反射多项式 0xEDB88320，初值全 1，结果取反）的 base-62 编码。
//! 32 位空间存在碰撞可能，碰撞时文件会被误判为一致，这是已知风险。

use crate::error::{Result, SyncError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 路径 -> 指纹
pub type ChecksumIndex = BTreeMap<String, String>;

const CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// 计算整段数据的 CRC-32
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize];
    }
    crc ^ 0xFFFF_FFFF
}

const B62_DIGITS: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// base-62 编码，高位在前，不补零
pub fn to_base62(value: u32) -> String {
    let mut u = value;
    let mut out = Vec::with_capacity(6);
    loop {
        out.push(B62_DIGITS[(u % 62) as usize]);
        u /= 62;
        if u == 0 {
            break;
        }
    }
    out.reverse();
    // 字符表全为 ASCII
    String::from_utf8_lossy(&out).into_owned()
}

/// 文件内容指纹
pub fn fingerprint(data: &[u8]) -> String {
    to_base62(crc32(data))
}

/// 本地原子写入的临时文件名前缀
pub const PARTIAL_PREFIX: &str = ".objsync-";
/// 本地原子写入的临时文件名后缀
pub const PARTIAL_SUFFIX: &str = ".partial";

/// 是否为写入中的临时文件（两侧索引都不包含这类路径）
pub fn is_partial_write(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

/// 索引扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 额外的排除规则（glob patterns），写入中的临时文件总是排除
    pub exclude_patterns: Vec<String>,
}

impl ScanConfig {
    pub fn should_exclude(&self, path: &str) -> bool {
        is_partial_write(path)
            || self
                .exclude_patterns
                .iter()
                .any(|pattern| matches_pattern(path, pattern))
    }
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        return (prefix.is_empty() || path.starts_with(prefix))
            && (suffix.is_empty() || path.ends_with(suffix));
    }

    // 处理 * 通配符，只匹配文件名部分
    if pattern.contains('*') {
        let file_name = path.rsplit('/').next().unwrap_or(&path);
        let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
        return regex::Regex::new(&format!("^{}$", regex_pattern))
            .map(|re| re.is_match(file_name))
            .unwrap_or(false);
    }

    path == pattern || path.ends_with(&format!("/{}", pattern))
}

/// 遍历 `root` 生成校验和索引
///
/// 根目录不可读时整体失败；单个文件读取失败只跳过并记录日志，
/// 遍历过程中消失的文件静默忽略。
pub async fn build_index(root: &Path, config: &ScanConfig) -> Result<ChecksumIndex> {
    let root = root.to_path_buf();
    let config = config.clone();

    // 使用 spawn_blocking 避免阻塞 async runtime
    tokio::task::spawn_blocking(move || build_index_blocking(&root, &config)).await?
}

fn build_index_blocking(root: &Path, config: &ScanConfig) -> Result<ChecksumIndex> {
    // 根目录必须可读
    std::fs::read_dir(root)?;

    let mut index = ChecksumIndex::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk root failed"))
                    .into());
            }
            Err(e) => {
                // 目录在遍历中被删除等情况
                debug!("跳过无法遍历的条目: {}", e);
                skipped += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        if config.should_exclude(&relative) {
            debug!("排除文件: {}", relative);
            continue;
        }

        match std::fs::read(entry.path()) {
            Ok(data) => {
                index.insert(relative, fingerprint(&data));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("文件已在扫描中删除: {}", relative);
            }
            Err(e) => {
                warn!("无法读取文件，跳过: {} - {}", relative, e);
                skipped += 1;
            }
        }
    }

    info!(
        "校验和索引完成: {} 个文件, {} 个跳过 ({})",
        index.len(),
        skipped,
        root.display()
    );

    Ok(index)
}

/// 解析远程返回的索引（JSON 对象：路径 -> 指纹）
pub fn parse_index(body: &[u8]) -> Result<ChecksumIndex> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(body)?;
    let mut index = ChecksumIndex::new();
    for (path, value) in raw {
        let sum = match value {
            serde_json::Value::String(s) => s,
            other => {
                return Err(SyncError::Parse(format!(
                    "invalid checksum for {}: {}",
                    path, other
                )))
            }
        };
        index.insert(crate::storage::path::normalize(&path)?, sum);
    }
    Ok(index)
}
