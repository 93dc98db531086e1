//! 难度调整模拟
//!
//! 用正态分布的出块间隔生成时间戳，按每个调整周期的实际耗时缩放目标值。
//! 目标值是相对值（初始1.0），越大表示难度越低。

use tracing::debug;

/// 比特币每个调整周期的区块数
pub const DEFAULT_INTERVAL: usize = 2016;
/// 目标出块间隔（秒）
pub const DEFAULT_BASE_INTERVAL: f64 = 600.0;
/// 出块间隔标准差（秒）
pub const DEFAULT_VARIANCE: f64 = 120.0;

const INITIAL_TARGET: f64 = 1.0;

/// 一次调整点：调整前的区块高度与目标值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetargetPoint {
    pub height: usize,
    pub target: f64,
}

/// Box-Muller 正态采样
fn sample_gaussian(rng: &mut fastrand::Rng, mean: f64, std_dev: f64) -> f64 {
    // u1 取 (0, 1]，避免 ln(0)
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// 生成累计时间戳，每个间隔至少1秒
pub fn generate_timestamps(
    rng: &mut fastrand::Rng,
    num_blocks: usize,
    base_interval: f64,
    variance: f64,
) -> Vec<f64> {
    let mut current = 0.0;
    (0..num_blocks)
        .map(|_| {
            current += sample_gaussian(rng, base_interval, variance).max(1.0);
            current
        })
        .collect()
}

/// 计算一个周期结束后的新目标值
///
/// 实际耗时被限制在 `[target_timespan / 4, target_timespan * 4]`，结果不超过 `pow_limit`。
pub fn calculate_new_target(
    old_target: f64,
    period_timestamps: &[f64],
    target_timespan: f64,
    pow_limit: f64,
) -> f64 {
    let actual = match (period_timestamps.first(), period_timestamps.last()) {
        (Some(first), Some(last)) => last - first,
        _ => target_timespan,
    };
    let actual = actual.clamp(target_timespan / 4.0, target_timespan * 4.0);
    (old_target * actual / target_timespan).min(pow_limit)
}

/// 运行完整模拟，不完整的最后一个周期被跳过
pub fn simulate_difficulty(
    rng: &mut fastrand::Rng,
    total_blocks: usize,
    interval: usize,
    base_interval: f64,
    variance: f64,
) -> Vec<RetargetPoint> {
    if interval == 0 {
        return Vec::new();
    }

    let pow_limit = INITIAL_TARGET * 4.0;
    let timestamps = generate_timestamps(rng, total_blocks, base_interval, variance);
    let target_timespan = interval as f64 * base_interval;

    let mut history = Vec::with_capacity(total_blocks / interval);
    let mut current = INITIAL_TARGET;
    for period in timestamps.chunks_exact(interval) {
        let height = (history.len() + 1) * interval;
        history.push(RetargetPoint {
            height,
            target: current,
        });
        current = calculate_new_target(current, period, target_timespan, pow_limit);
        debug!("高度 {} 调整后目标值 {:.6}", height, current);
    }
    history
}
