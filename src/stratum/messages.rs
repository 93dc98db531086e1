//! Stratum v1 消息类型
//!
//! 矿池协议是按行分隔的JSON-RPC：请求、响应和通知（id为null的请求）。

use crate::error::{StratumError, StratumResult};
use crate::job::Extranonce2;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 订阅请求的固定id
pub const SUBSCRIBE_ID: u64 = 1;
/// 授权请求的固定id
pub const AUTHORIZE_ID: u64 = 2;
/// 份额提交请求的固定id
pub const SUBMIT_ID: u64 = 4;

/// 份额难度过低的错误码
pub const LOW_DIFFICULTY_CODE: i64 = 23;

/// JSON-RPC 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// 请求或通知（通知的id为null）
    Request {
        id: Option<u64>,
        method: String,
        params: Value,
    },

    /// 对某个请求的响应
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcMessage::Request { id, .. } => *id,
            JsonRpcMessage::Response { id, .. } => Some(*id),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }
}

/// 矿池返回的错误
///
/// 兼容两种格式：`{"code": 23, "message": "..."}` 与 `[23, "...", null]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolError {
    pub code: i64,
    pub message: String,
}

impl PoolError {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                code: map.get("code").and_then(Value::as_i64)?,
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            Value::Array(items) => Some(Self {
                code: items.first().and_then(Value::as_i64)?,
                message: items
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => None,
        }
    }

    pub fn is_low_difficulty(&self) -> bool {
        self.code == LOW_DIFFICULTY_CODE
    }
}

/// 订阅结果：`[[subscriptions...], extranonce1, extranonce2_size]`
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
    /// 原始订阅结果
    pub raw: Value,
}

impl Subscription {
    pub fn from_result(result: &Value) -> StratumResult<Self> {
        let items = result
            .as_array()
            .filter(|items| items.len() >= 3)
            .ok_or_else(|| StratumError::Protocol(format!("订阅结果格式错误: {}", result)))?;

        let extranonce1 = items[1]
            .as_str()
            .and_then(|s| hex::decode(s).ok())
            .ok_or_else(|| StratumError::Protocol(format!("extranonce1 无效: {}", items[1])))?;

        let extranonce2_size = items[2]
            .as_u64()
            .ok_or_else(|| {
                StratumError::Protocol(format!("extranonce2_size 无效: {}", items[2]))
            })? as usize;

        Ok(Self {
            extranonce1,
            extranonce2_size,
            raw: result.clone(),
        })
    }

    pub fn extranonce1_hex(&self) -> String {
        hex::encode(&self.extranonce1)
    }
}

/// 份额提交参数
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub user_name: String,
    pub job_id: String,
    pub extranonce2: Extranonce2,
    /// 原样回传工作中的ntime
    pub ntime: String,
    pub nonce: u32,
}

impl SubmitParams {
    /// `[user_name, job_id, extranonce2, ntime, nonce]`，nonce按小端序字节编码
    pub fn to_params(&self) -> Value {
        json!([
            self.user_name,
            self.job_id,
            self.extranonce2.to_hex(),
            self.ntime,
            hex::encode(self.nonce.to_le_bytes()),
        ])
    }
}

/// 份额提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// 错误码23：份额难度低于矿池要求
    LowDifficulty { message: String },
    Rejected { code: Option<i64>, message: String },
}

impl SubmitOutcome {
    pub fn from_response(result: Option<&Value>, error: Option<&Value>) -> Self {
        if let Some(Value::Bool(true)) = result {
            return SubmitOutcome::Accepted;
        }

        match error.and_then(PoolError::from_value) {
            Some(err) if err.is_low_difficulty() => SubmitOutcome::LowDifficulty {
                message: err.message,
            },
            Some(err) => SubmitOutcome::Rejected {
                code: Some(err.code),
                message: err.message,
            },
            None => SubmitOutcome::Rejected {
                code: None,
                message: error.map(Value::to_string).unwrap_or_default(),
            },
        }
    }
}

/// 解析 `mining.set_difficulty` 参数
pub fn parse_difficulty(params: &Value) -> Option<f64> {
    params
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_f64)
        .filter(|difficulty| *difficulty > 0.0)
}
