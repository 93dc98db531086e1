use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stratum_bench::benchmark::BenchmarkHarness;
use stratum_bench::config::{worker_counts_from_env, BenchmarkConfig, PoolConfig, SessionConfig};
use stratum_bench::cpu_affinity::{CpuAffinityConfig, CpuAffinityManager};
use stratum_bench::job::{Extranonce2, JobSnapshot};
use stratum_bench::retarget;
use stratum_bench::stratum::{PoolSession, SubmitOutcome};
use stratum_bench::worker::{search_range, NonceRange};
use stratum_bench::{assemble_header, VERSION};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::{format, time::ChronoLocal};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stratum-bench", about = "Stratum矿池客户端与多核哈希算力基准测试", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 连接矿池，获取一个工作并保存为快照
    FetchJob {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "sample_job.json")]
        out: PathBuf,
    },

    /// 使用工作快照测量不同工作线程数下的算力
    Bench {
        #[arg(long, default_value = "sample_job.json")]
        job: PathBuf,
        /// 每轮测试时长（秒）
        #[arg(long, default_value_t = 60)]
        duration: u64,
        /// 工作线程数，可重复指定
        #[arg(long, num_args = 1.., default_values_t = [1usize, 16])]
        workers: Vec<usize>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// 不绑定CPU核心
        #[arg(long)]
        no_affinity: bool,
    },

    /// 搜索一个满足矿池目标的份额并提交
    Submit {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        /// 搜索的nonce数量
        #[arg(long, default_value_t = 1 << 24)]
        span: u64,
    },

    /// 难度调整模拟
    Retarget {
        #[arg(long, default_value_t = 10)]
        cycles: usize,
        #[arg(long, default_value_t = retarget::DEFAULT_INTERVAL)]
        interval: usize,
        #[arg(long, default_value_t = retarget::DEFAULT_BASE_INTERVAL)]
        base_interval: f64,
        #[arg(long, default_value_t = retarget::DEFAULT_VARIANCE)]
        variance: f64,
    },
}

fn init_log() {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_thread_names(true)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(format)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_log();
    let args = Args::parse();
    info!("stratum-bench v{}", VERSION);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在停止...");
            ctrl_c.cancel();
        }
    });

    match args.command {
        Command::FetchJob { config, out } => fetch_job(config, out).await,
        Command::Bench {
            job,
            duration,
            workers,
            out_dir,
            no_affinity,
        } => {
            let config = BenchmarkConfig {
                duration: Duration::from_secs(duration),
                output_dir: out_dir,
                cpu_affinity: if no_affinity {
                    CpuAffinityConfig::disabled()
                } else {
                    CpuAffinityConfig::round_robin()
                },
                ..Default::default()
            };
            bench(job, config, workers, cancel).await
        }
        Command::Submit { config, span } => submit(config, span, cancel).await,
        Command::Retarget {
            cycles,
            interval,
            base_interval,
            variance,
        } => {
            run_retarget(cycles, interval, base_interval, variance);
            Ok(())
        }
    }
}

async fn connect_and_subscribe(config_path: &Path) -> Result<PoolSession> {
    let pool = PoolConfig::load_or_prompt(config_path).context("加载矿池配置失败")?;
    let mut session = PoolSession::connect(pool, SessionConfig::default())
        .await
        .context("连接矿池失败")?;
    session.subscribe().await.context("订阅失败")?;
    if !session.authorize().await.context("授权失败")? {
        bail!("矿池拒绝授权");
    }
    Ok(session)
}

async fn fetch_job(config_path: PathBuf, out: PathBuf) -> Result<()> {
    let mut session = connect_and_subscribe(&config_path).await?;
    let job = session.next_job().await.context("等待工作失败")?;
    let snapshot = session.snapshot(job)?;
    snapshot
        .save(&out)
        .with_context(|| format!("保存工作快照 {:?} 失败", out))?;
    info!("工作 {} 已保存到 {:?} (目标 {})", snapshot.job.job_id, out, snapshot.target);
    session.close().await;
    Ok(())
}

async fn bench(
    job_path: PathBuf,
    config: BenchmarkConfig,
    workers: Vec<usize>,
    cancel: CancellationToken,
) -> Result<()> {
    let snapshot = JobSnapshot::load(&job_path)
        .with_context(|| format!("读取工作快照 {:?} 失败", job_path))?;
    let worker_counts = worker_counts_from_env()?.unwrap_or(workers);

    info!(
        "系统CPU: {} 逻辑核心, {} 物理核心",
        CpuAffinityManager::get_cpu_count(),
        CpuAffinityManager::get_physical_cpu_count()
    );

    let reports = tokio::task::spawn_blocking(move || {
        BenchmarkHarness::with_cancellation(config, cancel).sweep(&snapshot, &worker_counts)
    })
    .await
    .context("基准测试线程异常退出")??;

    for report in &reports {
        info!(
            "{:>3} 个工作线程: 总计 {:>12} 次哈希, {:>10.2} MH/s",
            report.num_processes,
            report.total,
            report.hashrate / 1_000_000.0
        );
    }
    Ok(())
}

async fn submit(config_path: PathBuf, span: u64, cancel: CancellationToken) -> Result<()> {
    let mut session = connect_and_subscribe(&config_path).await?;
    let job = session.next_job().await.context("等待工作失败")?;
    let subscription = session
        .subscription()
        .cloned()
        .context("会话缺少订阅信息")?;

    let extranonce2 = Extranonce2::new(0, subscription.extranonce2_size);
    let header = assemble_header(&job, &subscription.extranonce1, extranonce2.as_bytes())?;
    let target = session.current_target();
    info!("在 {} 个nonce中搜索份额, 目标 {}", span, target);

    let range = NonceRange {
        start: 0,
        end: span.min(1 << 32),
    };
    let search_cancel = cancel.clone();
    let found = tokio::task::spawn_blocking(move || {
        search_range(&header, range, &target, &search_cancel)
    })
    .await
    .context("搜索线程异常退出")?;

    match found {
        Some(share) => {
            info!(
                "找到份额: nonce={:08x}, 难度 {:.4}",
                share.nonce, share.difficulty
            );
            let outcome = session
                .submit(&job.job_id, &extranonce2, &job.ntime, share.nonce)
                .await?;
            if let SubmitOutcome::Rejected { code, message } = outcome {
                warn!("份额未被接受: code={:?}, {}", code, message);
            }
        }
        None if cancel.is_cancelled() => warn!("搜索已取消"),
        None => info!("搜索范围内没有满足目标的份额"),
    }

    session.close().await;
    Ok(())
}

fn run_retarget(cycles: usize, interval: usize, base_interval: f64, variance: f64) {
    let mut rng = fastrand::Rng::new();
    let history =
        retarget::simulate_difficulty(&mut rng, cycles * interval, interval, base_interval, variance);

    println!("{:>10}  {:>12}", "height", "target");
    for point in history {
        println!("{:>10}  {:>12.6}", point.height, point.target);
    }
}
