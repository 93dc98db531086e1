//! 目标值与难度计算
//!
//! 哈希结果在协议中以字节反序的形式比较：摘要字节反转后按大端解释为256位整数。

use crate::error::HeaderError;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 难度1对应的最大目标值 `0xffff << 208`
pub fn max_target() -> BigUint {
    BigUint::from(0xffffu32) << 208u32
}

/// 将摘要字节反转后解释为无符号大整数
pub fn digest_to_uint(digest: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_le(digest)
}

/// 计算摘要对应的份额难度
///
/// 摘要值越大难度越低；全零摘要返回正无穷。
pub fn difficulty_of(digest: &[u8; 32]) -> f64 {
    let value = digest_to_uint(digest);
    if value.is_zero() {
        return f64::INFINITY;
    }
    ratio_to_f64(&max_target(), &value)
}

/// 大整数相除并转换为f64，保留足够的有效位
fn ratio_to_f64(numerator: &BigUint, denominator: &BigUint) -> f64 {
    // 先放大2^64再做整数除法，避免商过小时精度丢失
    let scaled = (numerator << 64u32) / denominator;
    let quotient = scaled.to_f64().unwrap_or(f64::INFINITY);
    quotient / 2f64.powi(64)
}

/// 256位目标值
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target(BigUint);

impl Target {
    /// 从大端十六进制字符串解析（允许省略前导零）
    pub fn from_hex(hex_str: &str) -> Result<Self, HeaderError> {
        let trimmed = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(HeaderError::InvalidTarget(hex_str.to_string()));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 16)
            .map(Target)
            .ok_or_else(|| HeaderError::InvalidTarget(hex_str.to_string()))
    }

    /// 由矿池难度推导目标值: `max_target / difficulty`
    pub fn from_difficulty(difficulty: f64) -> Self {
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Target(max_target());
        }
        // 难度可能带小数，按2^32定点放大后再做整数运算
        let scale = 1u64 << 32;
        let scaled = (difficulty * scale as f64).round().max(1.0) as u128;
        let value = (max_target() * BigUint::from(scale)) / BigUint::from(scaled);
        let ceiling = (BigUint::from(1u8) << 256u32) - 1u8;
        Target(value.min(ceiling))
    }

    /// 64位大端十六进制表示
    pub fn to_hex(&self) -> String {
        format!("{:064x}", self.0)
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.0
    }

    /// 目标值对应的难度
    pub fn difficulty(&self) -> f64 {
        if self.0.is_zero() {
            return f64::INFINITY;
        }
        ratio_to_f64(&max_target(), &self.0)
    }

    /// 摘要是否满足目标（反序整数值 <= 目标值）
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        digest_to_uint(digest) <= self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Target::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
