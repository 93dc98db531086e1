//! Stratum-Bench - 矿池客户端与多核哈希算力基准测试
//!
//! 连接Stratum v1矿池获取真实工作，重建区块头，然后在不同工作线程数下测量
//! 双重SHA-256的可达算力，用于刻画算力随核心数的扩展情况。
//!
//! ## 模块划分
//!
//! ### 矿池协议
//! - [`stratum`]: 按行分帧的JSON-RPC编解码与会话状态机
//! - [`job`]: 工作描述、extranonce2与可重放的工作快照
//!
//! ### 哈希计算
//! - [`header`]: coinbase拼接、Merkle折叠与区块头前缀
//! - [`hash`]: 双重SHA-256与nonce哈希器
//! - [`target`]: 目标值与份额难度
//!
//! ### 基准测试
//! - [`benchmark`]: nonce空间切分、工作线程调度与报告
//! - [`worker`]: 单个工作线程的限时哈希循环
//! - [`cpu_affinity`]: 工作线程的CPU核心绑定
//!
//! ### 其他
//! - [`retarget`]: 难度调整模拟
//! - [`config`]: 矿池凭据与调优参数

pub mod benchmark;
pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod hash;
pub mod header;
pub mod job;
pub mod retarget;
pub mod stratum;
pub mod target;
pub mod worker;

// 重新导出主要类型
pub use benchmark::{partition_nonce_space, BenchmarkHarness, BenchmarkReport};
pub use config::{BenchmarkConfig, PoolConfig, SessionConfig};
pub use error::{BenchError, ConfigError, HeaderError, StratumError};
pub use header::{assemble_header, HeaderTemplate};
pub use job::{Job, JobSnapshot};
pub use stratum::{PoolSession, SubmitOutcome};
pub use target::{difficulty_of, Target};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
