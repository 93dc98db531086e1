//! SHA256双重哈希计算
//!
//! 基准测试的内层操作：对 "区块头前缀 + nonce" 做两次SHA256。

use sha2::{Digest, Sha256};

/// 区块头前缀长度 (version + prev_hash + merkle_root + ntime + nbits)
pub const HEADER_PREIMAGE_LEN: usize = 76;

/// 完整区块头长度 (前缀 + 4字节nonce)
pub const HEADER_LEN: usize = HEADER_PREIMAGE_LEN + 4;

/// SHA256双重哈希
#[inline(always)]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    second_hash.into()
}

/// 将nonce按小端序追加到区块头前缀后计算双重哈希
pub fn try_nonce(preimage: &[u8], nonce: u32) -> [u8; 32] {
    let mut data = Vec::with_capacity(preimage.len() + 4);
    data.extend_from_slice(preimage);
    data.extend_from_slice(&nonce.to_le_bytes());
    double_sha256(&data)
}

/// 热循环专用哈希器
///
/// 区块头前缀只写入一次，每次尝试只覆盖末尾4字节nonce，避免重复分配。
/// 结果与 [`try_nonce`] 完全一致。
#[derive(Clone)]
pub struct NonceHasher {
    buffer: Vec<u8>,
    nonce_offset: usize,
}

impl NonceHasher {
    pub fn new(preimage: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(preimage.len() + 4);
        buffer.extend_from_slice(preimage);
        buffer.extend_from_slice(&[0u8; 4]);
        Self {
            buffer,
            nonce_offset: preimage.len(),
        }
    }

    #[inline(always)]
    pub fn hash(&mut self, nonce: u32) -> [u8; 32] {
        self.buffer[self.nonce_offset..].copy_from_slice(&nonce.to_le_bytes());
        double_sha256(&self.buffer)
    }

    /// 当前缓冲区内容（含最后一次写入的nonce）
    pub fn header(&self) -> &[u8] {
        &self.buffer
    }
}
