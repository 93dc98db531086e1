//! # 多核哈希基准测试
//!
//! 把2^32的nonce空间平均切分给N个工作线程，每个线程绑定到一个CPU核心，
//! 在固定时长内尽可能多地计算双重SHA-256，最后汇总每个线程的尝试次数。
//!
//! ```text
//! span     = 2^32 / N
//! worker i = [i·span, (i+1)·span)
//! ```
//!
//! 余数 `2^32 mod N` 个nonce不会被分配。协调线程只通过一个结果通道收集数据，
//! 工作线程之间不共享任何可变状态。

use crate::config::BenchmarkConfig;
use crate::cpu_affinity::CpuAffinityManager;
use crate::error::BenchError;
use crate::job::JobSnapshot;
use crate::worker::{benchmark_header, run_worker, NonceRange, WorkerReport, WorkerTask};
use chrono::{DateTime, Local};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// nonce空间大小
pub const NONCE_SPACE: u64 = 1 << 32;

/// 将nonce空间切分为 `num_workers` 个互不重叠的等长区间
pub fn partition_nonce_space(num_workers: usize) -> Result<Vec<NonceRange>, BenchError> {
    if num_workers == 0 || num_workers as u64 > NONCE_SPACE {
        return Err(BenchError::InvalidWorkerCount(num_workers));
    }

    let span = NONCE_SPACE / num_workers as u64;
    Ok((0..num_workers as u64)
        .map(|i| NonceRange {
            start: i * span,
            end: (i + 1) * span,
        })
        .collect())
}

/// 一轮基准测试的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub num_processes: usize,
    /// 配置的测试时长（整秒）
    pub duration_sec: u64,
    /// 按工作线程序号排列的尝试次数，未上报的线程记为0
    pub per_process: Vec<u64>,
    pub total: u64,
    /// 总算力 (H/s)，按实际配置时长计算
    pub hashrate: f64,
    pub finished_at: DateTime<Local>,
}

impl BenchmarkReport {
    fn from_counts(per_process: Vec<u64>, duration: Duration) -> Self {
        let total = per_process.iter().sum();
        let seconds = duration.as_secs_f64();
        let hashrate = if seconds > 0.0 {
            total as f64 / seconds
        } else {
            0.0
        };
        Self {
            num_processes: per_process.len(),
            duration_sec: duration.as_secs(),
            per_process,
            total,
            hashrate,
            finished_at: Local::now(),
        }
    }

    /// 写入 `nonce_stats_{N}proc.json`，同名文件会被覆盖
    pub fn persist(&self, output_dir: &Path) -> Result<PathBuf, BenchError> {
        let path = report_path(output_dir, self.num_processes);
        std::fs::create_dir_all(output_dir).map_err(|source| BenchError::Persist {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content).map_err(|source| BenchError::Persist {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// 报告文件路径
pub fn report_path(output_dir: &Path, num_workers: usize) -> PathBuf {
    output_dir.join(format!("nonce_stats_{}proc.json", num_workers))
}

/// 基准测试协调器
pub struct BenchmarkHarness {
    config: BenchmarkConfig,
    cancel: CancellationToken,
}

impl BenchmarkHarness {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// 使用外部取消信号（例如Ctrl-C）
    pub fn with_cancellation(config: BenchmarkConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行一轮基准测试并持久化报告
    pub fn run(&self, snapshot: &JobSnapshot) -> Result<BenchmarkReport, BenchError> {
        let report = self.measure(snapshot)?;
        let path = report.persist(&self.config.output_dir)?;
        info!("基准报告已写入 {:?}", path);
        Ok(report)
    }

    /// 依次运行多个工作线程数
    pub fn sweep(
        &self,
        snapshot: &JobSnapshot,
        worker_counts: &[usize],
    ) -> Result<Vec<BenchmarkReport>, BenchError> {
        let mut reports = Vec::with_capacity(worker_counts.len());
        for &num_workers in worker_counts {
            if self.cancel.is_cancelled() {
                warn!("基准测试已取消，跳过剩余的 {} 组", worker_counts.len() - reports.len());
                break;
            }
            let harness = Self::with_cancellation(self.config.with_workers(num_workers), self.cancel.clone());
            reports.push(harness.run(snapshot)?);
        }
        Ok(reports)
    }

    /// 运行一轮基准测试，不写文件
    pub fn measure(&self, snapshot: &JobSnapshot) -> Result<BenchmarkReport, BenchError> {
        let num_workers = self.config.num_workers;
        let ranges = partition_nonce_space(num_workers)?;

        // 在启动任何线程之前暴露工作数据的格式错误
        let header = benchmark_header(snapshot)?;
        debug!("基准区块头Merkle根: {}", header.merkle_root_hex());

        let mut affinity = CpuAffinityManager::new(&self.config.cpu_affinity);
        let cancel = self.cancel.child_token();
        let (tx, rx) = unbounded::<WorkerReport>();

        info!(
            "🚀 启动基准测试: {} 个工作线程, 时长 {:.1}s",
            num_workers,
            self.config.duration.as_secs_f64()
        );

        let mut handles: Vec<Option<JoinHandle<()>>> = Vec::with_capacity(num_workers);
        for (worker_index, range) in ranges.into_iter().enumerate() {
            let task = WorkerTask {
                worker_index,
                snapshot: snapshot.clone(),
                range,
                duration: self.config.duration,
                batch_size: self.config.batch_size,
                core: affinity.assign_cpu_core(worker_index),
                cancel: cancel.clone(),
                results: tx.clone(),
            };

            let spawned = std::thread::Builder::new()
                .name(format!("bench-worker-{}", worker_index))
                .spawn(move || run_worker(task));

            match spawned {
                Ok(handle) => handles.push(Some(handle)),
                Err(source) => {
                    error!("无法启动工作线程 {}: {}", worker_index, source);
                    cancel.cancel();
                    for handle in handles.into_iter().flatten() {
                        let _ = handle.join();
                    }
                    return Err(BenchError::Spawn {
                        index: worker_index,
                        source,
                    });
                }
            }
        }
        drop(tx);

        let stats = affinity.get_affinity_stats();
        debug!(
            "CPU绑定: 启用={}, 可用核心={}, 已分配={}",
            stats.enabled, stats.available_cores, stats.bound_workers
        );

        let deadline = Instant::now() + self.config.duration + self.config.join_grace;
        let (per_process, reported) = collect_reports(&rx, num_workers, deadline, &cancel);

        for (worker_index, handle) in handles.iter_mut().enumerate() {
            if reported[worker_index] {
                if let Some(handle) = handle.take() {
                    if handle.join().is_err() {
                        error!("工作线程 {} 异常退出", worker_index);
                    }
                }
            } else {
                warn!("工作线程 {} 未按时上报，放弃等待 (计为0)", worker_index);
            }
        }

        let report = BenchmarkReport::from_counts(per_process, self.config.duration);
        info!(
            "✅ 基准测试完成: {} 个工作线程, 总计 {} 次哈希, 算力 {:.2} MH/s",
            report.num_processes,
            report.total,
            report.hashrate / 1_000_000.0
        );
        Ok(report)
    }
}

/// 在截止时间前收集工作线程的结果
///
/// 有线程未上报时取消令牌，未上报的线程会在下一个批次边界退出，不再占用核心。
fn collect_reports(
    rx: &Receiver<WorkerReport>,
    num_workers: usize,
    deadline: Instant,
    cancel: &CancellationToken,
) -> (Vec<u64>, Vec<bool>) {
    let mut per_process = vec![0u64; num_workers];
    let mut reported = vec![false; num_workers];
    let mut received = 0;

    while received < num_workers {
        match rx.recv_deadline(deadline) {
            Ok(report) => {
                debug!(
                    "工作线程 {} 上报 {} 次哈希 (绑定={})",
                    report.worker_index, report.attempts, report.pinned
                );
                per_process[report.worker_index] = report.attempts;
                reported[report.worker_index] = true;
                received += 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("等待工作线程超时，已收到 {}/{}", received, num_workers);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("结果通道已关闭，已收到 {}/{}", received, num_workers);
                break;
            }
        }
    }

    if received < num_workers {
        cancel.cancel();
    }
    (per_process, reported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_affinity::CpuAffinityConfig;
    use crate::job::Job;
    use crate::target::Target;

    fn snapshot() -> JobSnapshot {
        JobSnapshot {
            job: Job {
                job_id: "1a".to_string(),
                prev_hash: "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000"
                    .to_string(),
                coinb1: "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020862062f503253482f04b8864e5008".to_string(),
                coinb2: "072f736c7573682f000000000100f2052a010000001976a914d23fcdf86f7e756a64a7a9688ef9903327048ed988ac00000000".to_string(),
                merkle_branch: vec![
                    "57351e8569cb9d036187a79fd1844fd930c1309efcd16c46af9bb9713b6ee734".to_string(),
                ],
                version: "00000002".to_string(),
                nbits: "1b44dfdb".to_string(),
                ntime: "4fc1b4c5".to_string(),
                clean_jobs: true,
            },
            target: Target::from_difficulty(1.0),
            extranonce1: "f8002c90".to_string(),
            extranonce2_size: 4,
        }
    }

    fn test_config(num_workers: usize, duration: Duration) -> BenchmarkConfig {
        BenchmarkConfig {
            duration,
            num_workers,
            join_grace: Duration::from_secs(5),
            batch_size: 1_000,
            output_dir: std::env::temp_dir()
                .join(format!("stratum-bench-reports-{}", std::process::id())),
            cpu_affinity: CpuAffinityConfig::disabled(),
        }
    }

    #[test]
    fn test_partition_covers_space_without_overlap() {
        for n in [1usize, 2, 3, 4, 7, 16, 31, 64, 1000] {
            let ranges = partition_nonce_space(n).unwrap();
            assert_eq!(ranges.len(), n);
            assert_eq!(ranges[0].start, 0);

            let span = NONCE_SPACE / n as u64;
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start, "区间必须首尾相接 (n={})", n);
            }
            for range in &ranges {
                assert_eq!(range.end - range.start, span);
            }
            let last = ranges.last().unwrap();
            assert_eq!(NONCE_SPACE - last.end, NONCE_SPACE % n as u64);
        }
    }

    #[test]
    fn test_partition_rejects_zero() {
        assert!(matches!(
            partition_nonce_space(0),
            Err(BenchError::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn test_single_worker_one_second() {
        let harness = BenchmarkHarness::new(test_config(1, Duration::from_secs(1)));
        let report = harness.measure(&snapshot()).unwrap();

        assert_eq!(report.num_processes, 1);
        assert_eq!(report.per_process.len(), 1);
        assert!(report.per_process[0] > 0);
        assert_eq!(report.total, report.per_process[0]);
        assert_eq!(report.duration_sec, 1);
        assert!(report.hashrate > 0.0);
    }

    #[test]
    fn test_four_workers_all_report() {
        let mut config = test_config(4, Duration::from_millis(500));
        config.cpu_affinity = CpuAffinityConfig::round_robin();
        let report = BenchmarkHarness::new(config).measure(&snapshot()).unwrap();

        assert_eq!(report.per_process.len(), 4);
        assert!(report.per_process.iter().all(|&n| n > 0));
        assert_eq!(report.total, report.per_process.iter().sum::<u64>());
    }

    #[test]
    fn test_two_workers_outpace_one() {
        if num_cpus::get() < 2 {
            return;
        }
        let one = BenchmarkHarness::new(test_config(1, Duration::from_millis(500)))
            .measure(&snapshot())
            .unwrap();
        let two = BenchmarkHarness::new(test_config(2, Duration::from_millis(500)))
            .measure(&snapshot())
            .unwrap();
        assert!(
            two.total > one.total,
            "2个工作线程 {} 次, 1个工作线程 {} 次",
            two.total,
            one.total
        );
    }

    #[test]
    fn test_missing_reports_cancel_stragglers() {
        let (tx, rx) = unbounded::<WorkerReport>();
        tx.send(WorkerReport {
            worker_index: 1,
            attempts: 42,
            pinned: false,
            elapsed: Duration::from_millis(10),
        })
        .unwrap();

        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        let (per_process, reported) = collect_reports(&rx, 2, deadline, &cancel);

        assert_eq!(per_process, vec![0, 42]);
        assert_eq!(reported, vec![false, true]);
        assert!(cancel.is_cancelled());
        drop(tx);
    }

    #[test]
    fn test_complete_reports_leave_token_alone() {
        let (tx, rx) = unbounded::<WorkerReport>();
        for worker_index in 0..2 {
            tx.send(WorkerReport {
                worker_index,
                attempts: 7,
                pinned: false,
                elapsed: Duration::from_millis(10),
            })
            .unwrap();
        }

        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        let (per_process, _) = collect_reports(&rx, 2, deadline, &cancel);

        assert_eq!(per_process, vec![7, 7]);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    #[ignore = "耗时较长，且依赖宿主机有空闲的物理核心"]
    fn test_hashrate_scales_with_workers() {
        let one = BenchmarkHarness::new(test_config(1, Duration::from_secs(5)))
            .measure(&snapshot())
            .unwrap();
        let cores = num_cpus::get_physical().min(4);
        let many = BenchmarkHarness::new(test_config(cores, Duration::from_secs(5)))
            .measure(&snapshot())
            .unwrap();
        assert!(many.total as f64 >= one.total as f64 * cores as f64 * 0.5);
    }

    #[test]
    fn test_cancelled_harness_returns_quickly() {
        let harness = BenchmarkHarness::new(test_config(2, Duration::from_secs(30)));
        harness.cancel_token().cancel();
        let started = Instant::now();
        let report = harness.measure(&snapshot()).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.per_process.len(), 2);
    }

    #[test]
    fn test_invalid_job_fails_before_spawning() {
        let mut bad = snapshot();
        bad.job.coinb1 = "zz".to_string();
        let harness = BenchmarkHarness::new(test_config(2, Duration::from_secs(30)));
        assert!(matches!(harness.measure(&bad), Err(BenchError::Header(_))));
    }

    #[test]
    fn test_report_persisted_under_worker_count_name() {
        let config = test_config(2, Duration::from_millis(100));
        let dir = config.output_dir.join("persist");
        let config = BenchmarkConfig {
            output_dir: dir.clone(),
            ..config
        };
        let report = BenchmarkHarness::new(config).run(&snapshot()).unwrap();

        let path = report_path(&dir, 2);
        assert!(path.ends_with("nonce_stats_2proc.json"));
        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["num_processes"], 2);
        assert_eq!(stored["total"], report.total);
        assert_eq!(stored["per_process"].as_array().unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sweep_runs_each_count() {
        let config = test_config(1, Duration::from_millis(100));
        let dir = config.output_dir.join("sweep");
        let config = BenchmarkConfig {
            output_dir: dir.clone(),
            ..config
        };
        let reports = BenchmarkHarness::new(config).sweep(&snapshot(), &[1, 3]).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].num_processes, 1);
        assert_eq!(reports[1].num_processes, 3);
        assert!(report_path(&dir, 3).is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
