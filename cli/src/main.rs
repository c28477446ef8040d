use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use timeslice_core::{ReplayConfig, SliceConfig};
use timeslice_fhir::{run_batch, SnapshotWriter};
use timeslice_live::{replay, PredictionClient, Scheduler, MAX_WORKERS};
use uuid::Uuid;

mod config;
mod logging;

#[derive(Parser, Debug)]
#[command(
    name = "timeslice",
    about = "Cắt bundle FHIR thành snapshot theo từng thời điểm quan sát và phát lại chúng."
)]
struct Args {
    /// Ghi log dạng JSON.
    #[arg(long, global = true, env = "TIMESLICE_JSON_LOGS")]
    json_logs: bool,

    /// File cấu hình JSON, chỉ cần khai báo các trường muốn ghi đè.
    #[arg(long, global = true, env = "TIMESLICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cắt mọi bundle trong thư mục đầu vào thành các thư mục snapshot.
    Partition {
        /// Thư mục chứa các file bundle JSON.
        #[arg(short, long)]
        input: PathBuf,

        /// Thư mục gốc để ghi snapshot. Mặc định là một thư mục tạm mới.
        #[arg(short, long, env = "TIMESLICE_OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Gửi từng thư mục snapshot tới endpoint dự đoán đúng thời điểm của nó.
    Live {
        /// Thư mục gốc do lệnh `partition` tạo ra.
        #[arg(short, long)]
        root: PathBuf,

        /// URL endpoint dự đoán.
        #[arg(long, env = "TIMESLICE_ENDPOINT")]
        endpoint: Option<String>,

        /// Số worker chạy song song.
        #[arg(
            long,
            env = "TIMESLICE_WORKERS",
            value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_WORKERS as u64)
        )]
        workers: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.json_logs)?;

    let mut config = config::load(args.config.as_deref())?;

    match args.command {
        Command::Partition { input, output } => run_partition(&input, output, &config),
        Command::Live {
            root,
            endpoint,
            workers,
        } => {
            if let Some(endpoint) = endpoint {
                config.replay.endpoint = endpoint;
            }
            if let Some(workers) = workers {
                config.replay.workers = workers;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Không khởi tạo được tokio runtime")?;
            runtime.block_on(run_live(&root, &config.replay))
        }
    }
}

fn run_partition(input: &Path, output: Option<PathBuf>, config: &SliceConfig) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(default_output_root);
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Không tạo được thư mục {:?}", output))?;

    let writer = SnapshotWriter::new(&output);
    let summary = run_batch(input, &writer, &config.input)
        .with_context(|| format!("Không cắt được bundle trong {:?}", input))?;

    let root = std::fs::canonicalize(&output).unwrap_or(output);
    println!(
        "Wrote per-observation folders to: {}\nFiles seen: {}\nBundles sliced: {}\nFiles skipped: {}\nSnapshots written: {}",
        root.display(),
        summary.files_seen,
        summary.bundles_sliced,
        summary.files_skipped,
        summary.snapshots_written
    );

    Ok(())
}

fn default_output_root() -> PathBuf {
    std::env::temp_dir().join(format!("synthea_simulator{}", Uuid::new_v4().simple()))
}

async fn run_live(root: &Path, config: &ReplayConfig) -> anyhow::Result<()> {
    let client = PredictionClient::new(config).context("Không tạo được HTTP client")?;
    let scheduler = Scheduler::new(config.workers);

    let summary = tokio::select! {
        result = replay(root, Arc::new(client), &scheduler) => {
            result.with_context(|| format!("Phát lại thất bại cho {:?}", root))?
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, waiting for running slices to finish");
            scheduler.shutdown().await;
            anyhow::bail!("Live replay interrupted");
        }
    };
    scheduler.shutdown().await;

    println!(
        "Slices: {}\nCompleted: {}\nCancelled: {}\nPredictions stored: {}\nSkipped: {}",
        summary.slices, summary.completed, summary.cancelled, summary.stored, summary.skipped
    );

    Ok(())
}
