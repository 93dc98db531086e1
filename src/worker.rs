//! 基准测试工作线程
//!
//! 每个工作线程独立持有工作快照的副本、自己的nonce区间和结果发送端，
//! 哈希循环期间不与其他线程共享任何可变状态。

use crate::cpu_affinity::{bind_current_thread, CoreSlot};
use crate::error::HeaderError;
use crate::header::{assemble_text_header, HeaderTemplate};
use crate::hash::NonceHasher;
use crate::job::{Extranonce2, JobSnapshot};
use crate::target::{difficulty_of, Target};
use crossbeam::channel::Sender;
use std::hint::black_box;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// 单个工作线程负责的nonce区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u64,
    pub end: u64,
}

/// 工作线程结束后上报的结果
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker_index: usize,
    /// 完成的哈希尝试次数
    pub attempts: u64,
    /// 是否成功绑定CPU核心
    pub pinned: bool,
    pub elapsed: Duration,
}

/// 启动一个工作线程所需的全部输入
pub struct WorkerTask {
    pub worker_index: usize,
    pub snapshot: JobSnapshot,
    pub range: NonceRange,
    pub duration: Duration,
    pub batch_size: u32,
    pub core: Option<CoreSlot>,
    pub cancel: CancellationToken,
    pub results: Sender<WorkerReport>,
}

/// 用固定的extranonce2=0组装文本形式的区块头（基准测试路径）
pub fn benchmark_header(snapshot: &JobSnapshot) -> Result<HeaderTemplate, HeaderError> {
    let extranonce2 = Extranonce2::new(0, snapshot.extranonce2_size);
    assemble_text_header(&snapshot.job, &snapshot.extranonce1, extranonce2.as_bytes())
}

/// 工作线程入口：绑定核心、组装区块头、限时哈希、上报计数
pub fn run_worker(task: WorkerTask) {
    let WorkerTask {
        worker_index,
        snapshot,
        range,
        duration,
        batch_size,
        core,
        cancel,
        results,
    } = task;

    let pinned = bind_current_thread(worker_index, core);

    let started = Instant::now();
    let attempts = match benchmark_header(&snapshot) {
        Ok(header) => hash_loop(&header, range, duration, batch_size, &cancel),
        Err(e) => {
            error!("工作线程 {} 区块头组装失败: {}", worker_index, e);
            0
        }
    };

    let report = WorkerReport {
        worker_index,
        attempts,
        pinned,
        elapsed: started.elapsed(),
    };

    debug!(
        "工作线程 {} 结束: {} 次哈希, 用时 {:.2}s",
        worker_index,
        attempts,
        report.elapsed.as_secs_f64()
    );

    if results.send(report).is_err() {
        debug!("工作线程 {} 结果通道已关闭", worker_index);
    }
}

/// 限时哈希循环
///
/// nonce 从区间起点开始递增并按2^32回绕；不与目标值比较，也不会因满足目标而提前退出。
/// 时钟和取消信号只在每批次之间检查。
pub fn hash_loop(
    header: &HeaderTemplate,
    range: NonceRange,
    duration: Duration,
    batch_size: u32,
    cancel: &CancellationToken,
) -> u64 {
    let mut hasher = NonceHasher::new(header.preimage());
    let start_nonce = range.start as u32;
    let deadline = Instant::now() + duration;
    let mut counter: u64 = 0;

    while Instant::now() < deadline && !cancel.is_cancelled() {
        for _ in 0..batch_size {
            let nonce = start_nonce.wrapping_add(counter as u32);
            black_box(hasher.hash(nonce));
            counter += 1;
        }

        #[cfg(feature = "debug-logging")]
        tracing::trace!("批次完成, 累计 {} 次哈希", counter);
    }

    counter
}

/// 找到的满足目标的份额
#[derive(Debug, Clone)]
pub struct FoundShare {
    pub nonce: u32,
    pub hash: [u8; 32],
    pub difficulty: f64,
}

/// 带目标比较的nonce搜索，仅用于份额提交流程
pub fn search_range(
    header: &HeaderTemplate,
    range: NonceRange,
    target: &Target,
    cancel: &CancellationToken,
) -> Option<FoundShare> {
    let mut hasher = NonceHasher::new(header.preimage());
    for nonce in range.start..range.end.min(1u64 << 32) {
        if nonce % 10_000 == 0 && cancel.is_cancelled() {
            return None;
        }
        let nonce = nonce as u32;
        let hash = hasher.hash(nonce);
        if target.is_met_by(&hash) {
            return Some(FoundShare {
                nonce,
                hash,
                difficulty: difficulty_of(&hash),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::double_sha256;
    use crate::header::{assemble_header, TEXT_HEADER_PREIMAGE_LEN};
    use crate::job::Job;
    use crossbeam::channel::unbounded;

    fn sample_snapshot() -> JobSnapshot {
        JobSnapshot {
            job: Job {
                job_id: "bench".to_string(),
                prev_hash: "00".repeat(32),
                coinb1: "01000000".to_string(),
                coinb2: "ffffffff".to_string(),
                merkle_branch: vec!["aa".repeat(32)],
                version: "20000000".to_string(),
                nbits: "1d00ffff".to_string(),
                ntime: "504e86b9".to_string(),
                clean_jobs: true,
            },
            target: Target::from_difficulty(1.0),
            extranonce1: "abcd".to_string(),
            extranonce2_size: 4,
        }
    }

    /// 提交流程使用的解码字节形式
    fn submit_header() -> HeaderTemplate {
        let snapshot = sample_snapshot();
        assemble_header(&snapshot.job, &[0xab, 0xcd], &[0; 4]).unwrap()
    }

    #[test]
    fn test_benchmark_header_hashes_hex_text() {
        let header = benchmark_header(&sample_snapshot()).unwrap();
        let preimage = header.preimage();

        assert_eq!(preimage.len(), TEXT_HEADER_PREIMAGE_LEN);
        let expected_prefix = format!("20000000{}", "00".repeat(32));
        assert!(preimage.starts_with(expected_prefix.as_bytes()));
        assert!(preimage.ends_with(b"504e86b91d00ffff"));
        assert!(preimage.iter().all(|b| b.is_ascii_hexdigit()));

        // extranonce2 固定为 size 个零字节
        let coinbase = double_sha256(b"01000000abcd00000000ffffffff");
        let mut pair = coinbase.to_vec();
        pair.extend_from_slice(&[0xaa; 32]);
        let mut root = double_sha256(&pair);
        root.reverse();
        let expected = format!("{}{}504e86b91d00ffff", expected_prefix, hex::encode(root));
        assert_eq!(preimage, expected.as_bytes());
    }

    #[test]
    fn test_hash_loop_counts_attempts() {
        let header = benchmark_header(&sample_snapshot()).unwrap();
        let range = NonceRange { start: 0, end: 1 << 32 };
        let attempts = hash_loop(
            &header,
            range,
            Duration::from_millis(50),
            1_000,
            &CancellationToken::new(),
        );
        assert!(attempts > 0);
        assert_eq!(attempts % 1_000, 0, "计数应为整批次");
    }

    #[test]
    fn test_hash_loop_stops_when_cancelled() {
        let header = benchmark_header(&sample_snapshot()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        let attempts = hash_loop(
            &header,
            NonceRange { start: 0, end: 1 << 32 },
            Duration::from_secs(30),
            1_000,
            &cancel,
        );
        assert_eq!(attempts, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_run_worker_reports_once() {
        let (tx, rx) = unbounded();
        run_worker(WorkerTask {
            worker_index: 3,
            snapshot: sample_snapshot(),
            range: NonceRange { start: 0, end: 1 << 30 },
            duration: Duration::from_millis(20),
            batch_size: 100,
            core: None,
            cancel: CancellationToken::new(),
            results: tx,
        });

        let report = rx.recv().unwrap();
        assert_eq!(report.worker_index, 3);
        assert!(report.attempts > 0);
        assert!(!report.pinned);
        // 发送端已随工作线程结束而释放
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_search_range_finds_share_under_easy_target() {
        let header = submit_header();
        // 最大目标值：任何哈希都满足
        let target = Target::from_hex(&"f".repeat(64)).unwrap();
        let share = search_range(
            &header,
            NonceRange { start: 5, end: 10 },
            &target,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(share.nonce, 5);
        assert_eq!(share.hash, header.hash_with_nonce(5));
    }

    #[test]
    fn test_search_range_exhausts_without_share() {
        let header = submit_header();
        let target = Target::from_hex("1").unwrap();
        let share = search_range(
            &header,
            NonceRange { start: 0, end: 1_000 },
            &target,
            &CancellationToken::new(),
        );
        assert!(share.is_none());
    }
}
