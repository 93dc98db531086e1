//! 挖矿工作模型
//!
//! [`Job`] 保存矿池 `mining.notify` 下发的原始十六进制字段，接收后不再修改。
//! 快照文件中的 `job` 字段沿用通知参数的数组格式，便于直接重放矿池数据。

use crate::error::ConfigError;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// 一个挖矿工作单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NotifyParams", into = "NotifyParams")]
pub struct Job {
    /// 工作ID
    pub job_id: String,
    /// 前一区块哈希 (32字节十六进制)
    pub prev_hash: String,
    /// coinbase前半部分 (extranonce之前)
    pub coinb1: String,
    /// coinbase后半部分 (extranonce之后)
    pub coinb2: String,
    /// Merkle分支，顺序必须与矿池下发的完全一致
    pub merkle_branch: Vec<String>,
    /// 区块版本 (4字节十六进制)
    pub version: String,
    /// 压缩难度目标 (4字节十六进制)
    pub nbits: String,
    /// 时间戳 (4字节十六进制)
    pub ntime: String,
    /// 是否丢弃之前的所有工作
    pub clean_jobs: bool,
}

/// `mining.notify` 参数数组的序列化形式
#[derive(Serialize, Deserialize)]
struct NotifyParams(
    String,
    String,
    String,
    String,
    Vec<String>,
    String,
    String,
    String,
    bool,
);

impl From<NotifyParams> for Job {
    fn from(p: NotifyParams) -> Self {
        Self {
            job_id: p.0,
            prev_hash: p.1,
            coinb1: p.2,
            coinb2: p.3,
            merkle_branch: p.4,
            version: p.5,
            nbits: p.6,
            ntime: p.7,
            clean_jobs: p.8,
        }
    }
}

impl From<Job> for NotifyParams {
    fn from(job: Job) -> Self {
        NotifyParams(
            job.job_id,
            job.prev_hash,
            job.coinb1,
            job.coinb2,
            job.merkle_branch,
            job.version,
            job.nbits,
            job.ntime,
            job.clean_jobs,
        )
    }
}

impl Job {
    /// 从 `mining.notify` 的参数数组解析
    pub fn from_notify_params(params: &[Value]) -> Result<Self, String> {
        if params.len() < 9 {
            return Err(format!("mining.notify 参数数量不足: {}", params.len()));
        }

        let text = |index: usize, name: &str| -> Result<String, String> {
            params[index]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("{} 不是字符串", name))
        };

        let merkle_branch = params[4]
            .as_array()
            .ok_or("merkle_branch 不是数组")?
            .iter()
            .map(|branch| {
                branch
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "merkle分支不是字符串".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            job_id: text(0, "job_id")?,
            prev_hash: text(1, "prev_hash")?,
            coinb1: text(2, "coinb1")?,
            coinb2: text(3, "coinb2")?,
            merkle_branch,
            version: text(5, "version")?,
            nbits: text(6, "nbits")?,
            ntime: text(7, "ntime")?,
            clean_jobs: params[8].as_bool().ok_or("clean_jobs 不是布尔值")?,
        })
    }
}

/// 工作线程本地的extranonce2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extranonce2(Vec<u8>);

impl Extranonce2 {
    /// 按小端序编码计数器，截断或补零到矿池要求的长度
    pub fn new(counter: u64, size: usize) -> Self {
        let mut bytes = counter.to_le_bytes().to_vec();
        bytes.resize(size, 0);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// 可重放的工作快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub target: Target,
    /// 会话级extranonce1 (十六进制)
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

impl JobSnapshot {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
