//! 矿池会话
//!
//! ```text
//! Disconnected → Connecting → Connected → Subscribed → Authorized
//! ```
//!
//! 每个请求发出后持续读取，直到收到相同id的响应；期间收到的通知照常处理
//! （难度更新、新工作入队），其他id的响应被丢弃。

use super::codec::StratumCodec;
use super::messages::{
    parse_difficulty, JsonRpcMessage, PoolError, SubmitOutcome, SubmitParams, Subscription,
    AUTHORIZE_ID, SUBMIT_ID, SUBSCRIBE_ID,
};
use crate::config::{PoolConfig, SessionConfig};
use crate::error::{StratumError, StratumResult};
use crate::job::{Extranonce2, Job, JobSnapshot};
use crate::target::Target;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// 等待通知（而非某个请求的响应）时在超时错误中使用的id
const NOTIFY_WAIT_ID: u64 = 0;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Authorized,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Subscribed => "Subscribed",
            SessionState::Authorized => "Authorized",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 与单个矿池的TCP会话
pub struct PoolSession {
    pool: PoolConfig,
    config: SessionConfig,
    framed: Option<Framed<TcpStream, StratumCodec>>,
    state: SessionState,
    subscription: Option<Subscription>,
    difficulty: Option<f64>,
    jobs: VecDeque<Job>,
}

impl PoolSession {
    /// 连接矿池，失败时按固定间隔重试
    pub async fn connect(pool: PoolConfig, config: SessionConfig) -> StratumResult<Self> {
        let mut session = Self {
            pool,
            config,
            framed: None,
            state: SessionState::Disconnected,
            subscription: None,
            difficulty: None,
            jobs: VecDeque::new(),
        };
        session.open().await?;
        Ok(session)
    }

    async fn open(&mut self) -> StratumResult<()> {
        self.state = SessionState::Connecting;
        let address = format!("{}:{}", self.pool.pool_address, self.pool.pool_port);
        let attempts = self.config.connect_retries.max(1);

        for attempt in 1..=attempts {
            info!("🔗 连接矿池 {} (第 {}/{} 次)", address, attempt, attempts);

            match timeout(self.config.connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("设置TCP_NODELAY失败: {}", e);
                    }
                    self.framed = Some(Framed::new(stream, StratumCodec::new()));
                    self.state = SessionState::Connected;
                    info!("✅ 已连接矿池 {}", address);
                    return Ok(());
                }
                Ok(Err(e)) => warn!("连接矿池 {} 失败: {}", address, e),
                Err(_) => warn!(
                    "连接矿池 {} 超时 ({:.1}s)",
                    address,
                    self.config.connect_timeout.as_secs_f64()
                ),
            }

            if attempt < attempts {
                sleep(self.config.retry_delay).await;
            }
        }

        self.state = SessionState::Disconnected;
        Err(StratumError::ConnectFailed { attempts })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// 矿池最近下发的难度
    pub fn difficulty(&self) -> Option<f64> {
        self.difficulty
    }

    /// 当前份额目标；矿池从未下发难度时使用配置中的最低难度
    pub fn current_target(&self) -> Target {
        Target::from_difficulty(self.difficulty.unwrap_or(self.pool.min_diff))
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    fn expect_state(&self, expected: SessionState) -> StratumResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StratumError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    /// 订阅，获取extranonce1与extranonce2长度
    pub async fn subscribe(&mut self) -> StratumResult<Subscription> {
        self.expect_state(SessionState::Connected)?;

        let (result, error) = self
            .request(SUBSCRIBE_ID, "mining.subscribe", json!([]))
            .await?;
        if let Some(error) = error {
            return Err(StratumError::Protocol(format!("订阅被拒绝: {}", error)));
        }
        let result = result.ok_or_else(|| StratumError::Protocol("订阅响应缺少result".to_string()))?;

        let subscription = Subscription::from_result(&result)?;
        info!(
            "📋 订阅成功: extranonce1={}, extranonce2_size={}",
            subscription.extranonce1_hex(),
            subscription.extranonce2_size
        );
        self.subscription = Some(subscription.clone());
        self.state = SessionState::Subscribed;
        Ok(subscription)
    }

    /// 授权矿工账户，返回矿池的布尔结果
    pub async fn authorize(&mut self) -> StratumResult<bool> {
        self.expect_state(SessionState::Subscribed)?;

        let params = json!([self.pool.user_name, self.pool.password]);
        let (result, error) = self.request(AUTHORIZE_ID, "mining.authorize", params).await?;

        let authorized = matches!(result, Some(Value::Bool(true)));
        if authorized {
            self.state = SessionState::Authorized;
            info!("🔑 授权成功: {}", self.pool.user_name);
        } else {
            let reason = error
                .as_ref()
                .and_then(PoolError::from_value)
                .map(|e| format!("[{}] {}", e.code, e.message))
                .unwrap_or_else(|| "无错误信息".to_string());
            warn!("授权失败: {} ({})", self.pool.user_name, reason);
        }
        Ok(authorized)
    }

    /// 提交份额
    ///
    /// 难度过低（错误码23）作为 [`SubmitOutcome::LowDifficulty`] 返回，不视为错误，也不重试。
    pub async fn submit(
        &mut self,
        job_id: &str,
        extranonce2: &Extranonce2,
        ntime: &str,
        nonce: u32,
    ) -> StratumResult<SubmitOutcome> {
        self.expect_state(SessionState::Authorized)?;

        let params = SubmitParams {
            user_name: self.pool.user_name.clone(),
            job_id: job_id.to_string(),
            extranonce2: extranonce2.clone(),
            ntime: ntime.to_string(),
            nonce,
        };
        let (result, error) = self
            .request(SUBMIT_ID, "mining.submit", params.to_params())
            .await?;

        let outcome = SubmitOutcome::from_response(result.as_ref(), error.as_ref());
        match &outcome {
            SubmitOutcome::Accepted => info!("🎉 份额已接受: job={}, nonce={:08x}", job_id, nonce),
            SubmitOutcome::LowDifficulty { message } => {
                info!("份额难度过低: job={}, {}", job_id, message)
            }
            SubmitOutcome::Rejected { code, message } => {
                warn!("份额被拒绝: job={}, code={:?}, {}", job_id, code, message)
            }
        }
        Ok(outcome)
    }

    /// 等待下一个工作
    ///
    /// 请求期间已经收到的工作会先返回。
    pub async fn next_job(&mut self) -> StratumResult<Job> {
        if self.subscription.is_none() {
            return Err(StratumError::InvalidState {
                expected: SessionState::Subscribed.as_str(),
                actual: self.state.as_str(),
            });
        }

        loop {
            if let Some(job) = self.jobs.pop_front() {
                return Ok(job);
            }
            let message = self.read_message(NOTIFY_WAIT_ID).await?;
            self.dispatch(message);
        }
    }

    /// 由工作和订阅信息生成可重放的快照
    pub fn snapshot(&self, job: Job) -> StratumResult<JobSnapshot> {
        let subscription = self.subscription.as_ref().ok_or(StratumError::InvalidState {
            expected: SessionState::Subscribed.as_str(),
            actual: self.state.as_str(),
        })?;
        Ok(JobSnapshot {
            job,
            target: self.current_target(),
            extranonce1: subscription.extranonce1_hex(),
            extranonce2_size: subscription.extranonce2_size,
        })
    }

    /// 关闭连接
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = framed.close().await {
                debug!("关闭连接时出错: {}", e);
            }
        }
        self.state = SessionState::Disconnected;
        info!("矿池连接已关闭");
    }

    async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: Value,
    ) -> StratumResult<(Option<Value>, Option<Value>)> {
        self.send(JsonRpcMessage::request(id, method, params)).await?;

        loop {
            match self.read_message(id).await? {
                JsonRpcMessage::Response {
                    id: response_id,
                    result,
                    error,
                } if response_id == id => {
                    info!("{} 响应: result={:?}, error={:?}", method, result, error);
                    return Ok((result, error));
                }
                JsonRpcMessage::Response { id: other, .. } => {
                    warn!("丢弃非预期的响应 id={} (等待 id={})", other, id);
                }
                request => self.dispatch(request),
            }
        }
    }

    async fn send(&mut self, message: JsonRpcMessage) -> StratumResult<()> {
        let framed = self.framed.as_mut().ok_or(StratumError::Disconnected)?;
        debug!("→ {:?}", message);
        framed.send(message).await
    }

    /// 读取一条消息，每次读取受 `read_timeout` 约束
    async fn read_message(&mut self, waiting_for: u64) -> StratumResult<JsonRpcMessage> {
        let read_timeout = self.config.read_timeout;
        let max_timeouts = self.config.max_read_timeouts;
        let framed = self.framed.as_mut().ok_or(StratumError::Disconnected)?;
        let mut timeouts = 0u32;

        let result = loop {
            match timeout(read_timeout, framed.next()).await {
                Ok(Some(Ok(message))) => {
                    debug!("← {:?}", message);
                    break Ok(message);
                }
                Ok(Some(Err(e))) => {
                    // 解码错误后帧流已结束，连接不可再用
                    warn!("矿池消息解码失败: {}", e);
                    self.state = SessionState::Disconnected;
                    break Err(e);
                }
                Ok(None) => {
                    warn!("矿池关闭了连接");
                    self.state = SessionState::Disconnected;
                    break Err(StratumError::Disconnected);
                }
                Err(_) => {
                    timeouts += 1;
                    warn!(
                        "读取矿池消息超时 ({:.1}s, 第 {} 次)，继续等待",
                        read_timeout.as_secs_f64(),
                        timeouts
                    );
                    if max_timeouts.is_some_and(|max| timeouts >= max) {
                        break Err(StratumError::ResponseTimeout {
                            id: waiting_for,
                            timeouts,
                        });
                    }
                }
            }
        };

        if self.state == SessionState::Disconnected {
            self.framed = None;
        }
        result
    }

    /// 处理矿池主动下发的消息
    fn dispatch(&mut self, message: JsonRpcMessage) {
        let JsonRpcMessage::Request { id, method, params } = message else {
            return;
        };

        match method.as_str() {
            "mining.set_difficulty" => match parse_difficulty(&params) {
                Some(difficulty) => {
                    info!("🎯 矿池难度更新: {}", difficulty);
                    self.difficulty = Some(difficulty);
                }
                None => warn!("无效的难度参数: {}", params),
            },
            "mining.notify" => {
                let parsed = params
                    .as_array()
                    .ok_or_else(|| "参数不是数组".to_string())
                    .and_then(|items| Job::from_notify_params(items));
                match parsed {
                    Ok(job) => {
                        if job.clean_jobs {
                            self.jobs.clear();
                        }
                        info!("📦 收到新工作: {} (clean={})", job.job_id, job.clean_jobs);
                        self.jobs.push_back(job);
                    }
                    Err(e) => warn!("无法解析 mining.notify: {}", e),
                }
            }
            other => debug!("忽略矿池消息 {} (id={:?})", other, id),
        }
    }
}
