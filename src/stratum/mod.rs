//! Stratum v1 矿池客户端

pub mod codec;
pub mod messages;
pub mod session;

pub use codec::StratumCodec;
pub use messages::{JsonRpcMessage, PoolError, SubmitOutcome, SubmitParams, Subscription};
pub use session::{PoolSession, SessionState};
