//! 配置管理
//!
//! - [`PoolConfig`]: 矿池凭据，对应磁盘上的 `config.json`，启动时读取一次，之后只读
//! - [`SessionConfig`]: 连接重试、读取超时等会话调优参数
//! - [`BenchmarkConfig`]: 基准测试时长、工作线程数、输出目录等参数
//!
//! 优先级：环境变量 > 配置文件/命令行 > 默认值

use crate::cpu_affinity::CpuAffinityConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// 覆盖基准测试工作线程数列表的环境变量，例如 `1,4,16`
pub const WORKERS_ENV: &str = "STRATUM_BENCH_WORKERS";

/// 矿池凭据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_address: String,
    pub pool_port: u16,
    pub user_name: String,
    pub password: String,
    /// 矿池未下发难度时使用的最低难度
    pub min_diff: f64,
}

impl PoolConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
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

    /// 配置文件存在则读取，否则交互式采集并写入一次
    pub fn load_or_prompt(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.is_file() {
            info!("找到配置文件 {:?}", path);
            return Self::load(path);
        }

        info!("配置文件 {:?} 不存在，开始交互式配置", path);
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let config = Self::prompt(&mut stdin.lock(), &mut stdout.lock())?;
        config.save(path)?;
        info!("配置已写入 {:?}", path);
        Ok(config)
    }

    /// 从输入流逐项读取配置，格式错误时重新提示
    pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Self, ConfigError> {
        let config = Self {
            pool_address: ask(input, output, "矿池地址: ")?,
            pool_port: ask(input, output, "矿池端口: ")?,
            user_name: ask(input, output, "用户名: ")?,
            password: ask(input, output, "密码: ")?,
            min_diff: ask(input, output, "最低难度: ")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_address.trim().is_empty() {
            return Err(ConfigError::Validation("pool_address 不能为空".to_string()));
        }
        if self.pool_port == 0 {
            return Err(ConfigError::Validation("pool_port 不能为0".to_string()));
        }
        if !self.min_diff.is_finite() || self.min_diff <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "min_diff 必须大于0，当前 {}",
                self.min_diff
            )));
        }
        Ok(())
    }
}

fn ask<T, R, W>(input: &mut R, output: &mut W, prompt: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    R: BufRead,
    W: Write,
{
    let io_err = |source| ConfigError::Read {
        path: PathBuf::from("<stdin>"),
        source,
    };
    loop {
        write!(output, "{}", prompt).map_err(io_err)?;
        output.flush().map_err(io_err)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(io_err)? == 0 {
            return Err(ConfigError::Validation("输入已结束，配置未完成".to_string()));
        }
        match line.trim().parse() {
            Ok(value) => return Ok(value),
            Err(_) => {
                writeln!(output, "输入无效，请重新输入 ({})", std::any::type_name::<T>())
                    .map_err(io_err)?;
            }
        }
    }
}

/// 矿池会话调优参数
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 单次TCP连接超时
    pub connect_timeout: Duration,
    /// 连接失败后的最大尝试次数
    pub connect_retries: u32,
    /// 两次连接尝试之间的固定等待
    pub retry_delay: Duration,
    /// 每次阻塞读取的超时
    pub read_timeout: Duration,
    /// 连续读取超时的上限，`None` 表示无限等待（交互使用）
    pub max_read_timeouts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            connect_retries: 5,
            retry_delay: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            max_read_timeouts: None,
        }
    }
}

impl SessionConfig {
    /// 自动化/测试场景：快速重试、有界等待
    pub fn bounded(read_timeout: Duration, max_read_timeouts: u32) -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connect_retries: 3,
            retry_delay: Duration::from_millis(100),
            read_timeout,
            max_read_timeouts: Some(max_read_timeouts),
        }
    }
}

/// 基准测试参数
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// 每轮测试的时长
    pub duration: Duration,
    /// 工作线程数量
    pub num_workers: usize,
    /// 工作线程超出时长后的额外等待
    pub join_grace: Duration,
    /// 每批次哈希次数，批次之间检查时钟与取消信号
    pub batch_size: u32,
    /// 报告输出目录
    pub output_dir: PathBuf,
    /// CPU绑定配置
    pub cpu_affinity: CpuAffinityConfig,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            num_workers: 1,
            join_grace: Duration::from_secs(5),
            batch_size: 10_000,
            output_dir: PathBuf::from("."),
            cpu_affinity: CpuAffinityConfig::default(),
        }
    }
}

impl BenchmarkConfig {
    pub fn with_workers(&self, num_workers: usize) -> Self {
        Self {
            num_workers,
            ..self.clone()
        }
    }
}

/// 解析逗号分隔的工作线程数列表
pub fn parse_worker_counts(value: &str) -> Option<Vec<usize>> {
    let counts: Option<Vec<usize>> = value
        .split(',')
        .map(|part| part.trim().parse::<usize>().ok().filter(|&n| n > 0))
        .collect();
    counts.filter(|list| !list.is_empty())
}

/// 读取工作线程数列表的环境变量覆盖
pub fn worker_counts_from_env() -> Result<Option<Vec<usize>>, ConfigError> {
    match std::env::var(WORKERS_ENV) {
        Ok(value) => match parse_worker_counts(&value) {
            Some(counts) => {
                info!("从环境变量读取工作线程数列表: {:?}", counts);
                Ok(Some(counts))
            }
            None => Err(ConfigError::InvalidEnv {
                name: WORKERS_ENV,
                value,
            }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stratum-bench-{}-{}", std::process::id(), name))
    }

    fn sample() -> PoolConfig {
        PoolConfig {
            pool_address: "stratum.example.org".to_string(),
            pool_port: 3333,
            user_name: "worker.1".to_string(),
            password: "x".to_string(),
            min_diff: 0.001,
        }
    }

    #[test]
    fn test_pool_config_file_roundtrip() {
        let path = temp_path("config.json");
        sample().save(&path).unwrap();
        let loaded = PoolConfig::load(&path).unwrap();
        assert_eq!(loaded, sample());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_pool_config_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        for key in ["pool_address", "pool_port", "user_name", "password", "min_diff"] {
            assert!(value.get(key).is_some(), "缺少字段 {}", key);
        }
    }

    #[test]
    fn test_load_or_prompt_prefers_existing_file() {
        let path = temp_path("existing.json");
        sample().save(&path).unwrap();
        assert_eq!(PoolConfig::load_or_prompt(&path).unwrap(), sample());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_prompt_retries_invalid_input() {
        let mut input = Cursor::new("pool.example.org\nabc\n4444\nalice\nsecret\n0.5\n");
        let mut output = Vec::new();
        let config = PoolConfig::prompt(&mut input, &mut output).unwrap();
        assert_eq!(config.pool_port, 4444);
        assert_eq!(config.min_diff, 0.5);
        assert!(String::from_utf8(output).unwrap().contains("输入无效"));
    }

    #[test]
    fn test_prompt_fails_on_eof() {
        let mut input = Cursor::new("pool.example.org\n");
        let mut output = Vec::new();
        assert!(PoolConfig::prompt(&mut input, &mut output).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = sample();
        config.min_diff = 0.0;
        assert!(config.validate().is_err());
        let mut config = sample();
        config.pool_address = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_worker_counts() {
        assert_eq!(parse_worker_counts("1, 4,16"), Some(vec![1, 4, 16]));
        assert_eq!(parse_worker_counts("0,2"), None);
        assert_eq!(parse_worker_counts("x"), None);
    }

    #[test]
    fn test_with_workers_keeps_other_fields() {
        let base = BenchmarkConfig {
            duration: Duration::from_secs(3),
            ..Default::default()
        };
        let derived = base.with_workers(8);
        assert_eq!(derived.num_workers, 8);
        assert_eq!(derived.duration, Duration::from_secs(3));
    }
}
