//! 区块头组装
//!
//! 由工作描述、extranonce1 与 extranonce2 重建coinbase交易，沿Merkle分支折叠出
//! Merkle根，再拼接出不含nonce的区块头前缀。
//!
//! 两种拼接形式：
//!
//! [`assemble_header`] 把十六进制字段解码成字节再拼接，得到76字节前缀，用于份额搜索与提交：
//! ```text
//! coinbase = coinb1 ++ extranonce1 ++ extranonce2 ++ coinb2
//! root     = sha256d(coinbase)
//! root     = sha256d(root ++ branch[i])        (按下发顺序)
//! preimage = version ++ prev_hash ++ reverse(root) ++ ntime ++ nbits
//! ```
//!
//! [`assemble_text_header`] 直接拼接十六进制文本本身（ASCII字节），得到152字节前缀。
//! 基准测试测量的就是这个形式：每次尝试的输入长度决定了SHA-256压缩次数，
//! 换成76字节前缀会让测得的算力失去可比性。

use crate::error::HeaderError;
use crate::hash::{double_sha256, try_nonce};
use crate::job::Job;

/// 文本形式区块头前缀长度 (8 + 64 + 64 + 8 + 8 个十六进制字符)
pub const TEXT_HEADER_PREIMAGE_LEN: usize = 152;

/// 组装完成的区块头模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplate {
    /// coinbase交易的双重哈希
    pub coinbase_hash: [u8; 32],
    /// Merkle根（自然字节序，未反转）
    pub merkle_root: [u8; 32],
    preimage: Vec<u8>,
}

impl HeaderTemplate {
    /// 区块头前缀（不含nonce）
    pub fn preimage(&self) -> &[u8] {
        &self.preimage
    }

    /// 反转后的Merkle根十六进制（协议展示格式）
    pub fn merkle_root_hex(&self) -> String {
        let mut reversed = self.merkle_root;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// 计算指定nonce的区块头哈希
    pub fn hash_with_nonce(&self, nonce: u32) -> [u8; 32] {
        try_nonce(&self.preimage, nonce)
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, HeaderError> {
    hex::decode(value).map_err(|source| HeaderError::Hex { field, source })
}

/// 拼接coinbase交易字节
pub fn build_coinbase(
    job: &Job,
    extranonce1: &[u8],
    extranonce2: &[u8],
) -> Result<Vec<u8>, HeaderError> {
    let coinb1 = decode_field("coinb1", &job.coinb1)?;
    let coinb2 = decode_field("coinb2", &job.coinb2)?;

    let mut coinbase =
        Vec::with_capacity(coinb1.len() + extranonce1.len() + extranonce2.len() + coinb2.len());
    coinbase.extend_from_slice(&coinb1);
    coinbase.extend_from_slice(extranonce1);
    coinbase.extend_from_slice(extranonce2);
    coinbase.extend_from_slice(&coinb2);
    Ok(coinbase)
}

/// 沿Merkle分支折叠，返回自然字节序的Merkle根
pub fn fold_merkle_branch(
    coinbase_hash: [u8; 32],
    branch: &[String],
) -> Result<[u8; 32], HeaderError> {
    let mut root = coinbase_hash;
    let mut concat = Vec::with_capacity(64);
    for sibling in branch {
        let sibling = decode_field("merkle_branch", sibling)?;
        concat.clear();
        concat.extend_from_slice(&root);
        concat.extend_from_slice(&sibling);
        root = double_sha256(&concat);
    }
    Ok(root)
}

/// 组装区块头前缀
pub fn assemble_header(
    job: &Job,
    extranonce1: &[u8],
    extranonce2: &[u8],
) -> Result<HeaderTemplate, HeaderError> {
    let coinbase = build_coinbase(job, extranonce1, extranonce2)?;
    let coinbase_hash = double_sha256(&coinbase);
    let merkle_root = fold_merkle_branch(coinbase_hash, &job.merkle_branch)?;

    let mut reversed_root = merkle_root;
    reversed_root.reverse();

    let version = decode_field("version", &job.version)?;
    let prev_hash = decode_field("prev_hash", &job.prev_hash)?;
    let ntime = decode_field("ntime", &job.ntime)?;
    let nbits = decode_field("nbits", &job.nbits)?;

    let mut preimage = Vec::with_capacity(
        version.len() + prev_hash.len() + reversed_root.len() + ntime.len() + nbits.len(),
    );
    preimage.extend_from_slice(&version);
    preimage.extend_from_slice(&prev_hash);
    preimage.extend_from_slice(&reversed_root);
    preimage.extend_from_slice(&ntime);
    preimage.extend_from_slice(&nbits);

    Ok(HeaderTemplate {
        coinbase_hash,
        merkle_root,
        preimage,
    })
}

/// 按十六进制文本拼接区块头前缀（基准测试形式）
///
/// coinbase 是 `coinb1 + extranonce1 + extranonce2 + coinb2` 的ASCII文本；
/// Merkle分支仍按字节折叠，前缀为 `version + prev_hash + hex(reverse(root)) + ntime + nbits` 的ASCII文本。
/// 所有字段仍会校验是否为合法十六进制。
pub fn assemble_text_header(
    job: &Job,
    extranonce1_hex: &str,
    extranonce2: &[u8],
) -> Result<HeaderTemplate, HeaderError> {
    for (field, value) in [
        ("coinb1", job.coinb1.as_str()),
        ("coinb2", job.coinb2.as_str()),
        ("extranonce1", extranonce1_hex),
        ("version", job.version.as_str()),
        ("prev_hash", job.prev_hash.as_str()),
        ("ntime", job.ntime.as_str()),
        ("nbits", job.nbits.as_str()),
    ] {
        decode_field(field, value)?;
    }

    let coinbase = format!(
        "{}{}{}{}",
        job.coinb1,
        extranonce1_hex,
        hex::encode(extranonce2),
        job.coinb2
    );
    let coinbase_hash = double_sha256(coinbase.as_bytes());
    let merkle_root = fold_merkle_branch(coinbase_hash, &job.merkle_branch)?;

    let mut reversed_root = merkle_root;
    reversed_root.reverse();

    let preimage = format!(
        "{}{}{}{}{}",
        job.version,
        job.prev_hash,
        hex::encode(reversed_root),
        job.ntime,
        job.nbits
    )
    .into_bytes();

    Ok(HeaderTemplate {
        coinbase_hash,
        merkle_root,
        preimage,
    })
}
