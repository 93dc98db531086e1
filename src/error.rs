//! 错误类型定义
//!
//! 按关注点划分错误类型：矿池协议、区块头组装、基准测试与配置。
//! 库内部统一使用 `thiserror`，命令行入口使用 `anyhow` 汇总。

use std::path::PathBuf;
use thiserror::Error;

/// 矿池会话错误
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("网络IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("消息帧超过最大长度 {max} 字节")]
    FrameTooLong { max: usize },

    #[error("连接矿池失败，已尝试 {attempts} 次")]
    ConnectFailed { attempts: u32 },

    #[error("等待响应 id={id} 超时 ({timeouts} 次读取超时)")]
    ResponseTimeout { id: u64, timeouts: u32 },

    #[error("矿池已断开连接")]
    Disconnected,

    #[error("会话状态错误: 需要 {expected}，当前 {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    #[error("矿池响应格式错误: {0}")]
    Protocol(String),
}

/// 区块头组装错误
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("字段 {field} 不是合法的十六进制: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("目标值不是合法的256位十六进制数: {0}")]
    InvalidTarget(String),
}

/// 基准测试错误
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("工作线程数量必须大于0，当前 {0}")]
    InvalidWorkerCount(usize),

    #[error("区块头组装失败: {0}")]
    Header(#[from] HeaderError),

    #[error("无法启动工作线程 {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("写入基准报告 {path:?} 失败: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("基准报告序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("写入配置文件 {path:?} 失败: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件 {path:?} 格式错误: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("环境变量 {name} 的值无效: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("配置校验失败: {0}")]
    Validation(String),
}

pub type StratumResult<T> = Result<T, StratumError>;
