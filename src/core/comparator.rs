use super::checksum::ChecksumIndex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// 没有世界标识的路径归入此桶
pub const OTHER_WORLD: &str = "other";

static WORLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_WORLD_[^/]+").expect("valid world regex"));

/// 从路径中提取世界标识
pub fn world_of(path: &str) -> Option<&str> {
    WORLD_RE.find(path).map(|m| m.as_str())
}

/// 一次比较的结果：本地与远程索引键的并集被划分为四个互不相交的集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncLists {
    /// 两边都有但指纹不同
    pub diffs: Vec<String>,
    /// 只有本地有
    pub push_only: Vec<String>,
    /// 只有远程有（仅在启用拉取时填充）
    pub pull_only: Vec<String>,
    /// 两边一致
    pub matching: Vec<String>,
}

impl SyncLists {
    /// 没有需要传输的文件
    pub fn is_settled(&self) -> bool {
        self.diffs.is_empty() && self.push_only.is_empty() && self.pull_only.is_empty()
    }

    /// 待传输文件数
    pub fn pending(&self) -> usize {
        self.diffs.len() + self.push_only.len() + self.pull_only.len()
    }

    /// 按世界统计
    pub fn world_counts(&self) -> BTreeMap<String, WorldStatus> {
        let mut worlds: BTreeMap<String, WorldStatus> = BTreeMap::new();

        let unmatching = self
            .diffs
            .iter()
            .chain(&self.push_only)
            .chain(&self.pull_only);
        for path in unmatching {
            let world = world_of(path).unwrap_or(OTHER_WORLD);
            worlds.entry(world.to_string()).or_default().total += 1;
        }

        for path in &self.matching {
            let world = world_of(path).unwrap_or(OTHER_WORLD);
            let status = worlds.entry(world.to_string()).or_default();
            status.matching += 1;
            status.total += 1;
        }

        worlds
    }
}

/// 单个世界的同步计数（total 包含 matching）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStatus {
    pub matching: usize,
    pub total: usize,
}

/// 比较本地与远程索引
///
/// `pull_enabled` 为 false 时，只存在于远程的路径完全忽略。
pub fn classify(local: &ChecksumIndex, remote: &ChecksumIndex, pull_enabled: bool) -> SyncLists {
    let mut lists = SyncLists::default();

    for (path, local_sum) in local {
        match remote.get(path) {
            Some(remote_sum) if remote_sum == local_sum => lists.matching.push(path.clone()),
            Some(_) => lists.diffs.push(path.clone()),
            None => lists.push_only.push(path.clone()),
        }
    }

    if pull_enabled {
        lists.pull_only = remote
            .keys()
            .filter(|path| !local.contains_key(*path))
            .cloned()
            .collect();
    }

    lists
}
