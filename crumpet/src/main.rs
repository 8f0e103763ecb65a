use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context};
use clap::Parser;
use futures_util::StreamExt;
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};
use uuid::Uuid;

/// Fetch agent run on worker hosts: downloads one remote file into local
/// scratch, optionally decompresses it, then lands it at the DFS
/// destination. Exit status is the only contract with the scheduler.
#[derive(Parser, Debug)]
#[command(version, about = "Fetch one remote file and land it on the DFS", long_about = None)]
struct Args {
    /// Source URL, handed to curl.
    #[clap(long)]
    url: String,

    /// Destination URL (hdfs:, s3a:, or file:).
    #[clap(long)]
    dest: String,

    /// Local scratch directory on this worker.
    #[clap(long)]
    work_path: PathBuf,

    /// Decompress the payload before landing it.
    #[clap(long)]
    gunzip: bool,
}

fn needs_hadoop(dest: &str) -> bool {
    !dest.starts_with("file:")
}

fn hadoop_bin() -> String {
    match std::env::var("HADOOP_HOME") {
        Ok(home) => format!("{home}/bin/hadoop"),
        Err(_) => "hadoop".to_string(),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    which::which("curl").context("curl not found on this worker")?;
    if args.gunzip {
        which::which("gunzip").context("gunzip not found on this worker")?;
    }
    if needs_hadoop(&args.dest) && std::env::var("HADOOP_HOME").is_err() {
        which::which("hadoop").context("hadoop not found and HADOOP_HOME not set")?;
    }

    run(args)
}

#[tokio::main(flavor = "current_thread")]
async fn run(args: Args) -> anyhow::Result<()> {
    let scratch = args.work_path.join(format!("crumpet-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&scratch)
        .await
        .with_context(|| format!("creating scratch dir {}", scratch.display()))?;

    log::info!("fetching {} -> {}", args.url, args.dest);
    let result = fetch(&args, &scratch).await;

    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        log::warn!("could not clean up {}: {e}", scratch.display());
    }
    result
}

async fn fetch(args: &Args, scratch: &Path) -> anyhow::Result<()> {
    let payload = scratch.join("payload");
    let mut curl = Command::new("curl");
    curl.arg("-sS").arg("-L").arg("-o").arg(&payload).arg(&args.url);
    run_streaming(curl, "curl").await?;

    if args.gunzip {
        // gunzip insists on the suffix and drops it again on output, so the
        // decompressed result lands back at the payload path.
        let gz = scratch.join("payload.gz");
        tokio::fs::rename(&payload, &gz).await?;
        let mut gunzip = Command::new("gunzip");
        gunzip.arg(&gz);
        run_streaming(gunzip, "gunzip").await?;
    }

    deliver(&args.dest, &payload).await
}

/// Stage-then-move: the payload is first written under a hidden temp name
/// next to the destination, then renamed into place. A crash mid-upload
/// leaves only temp data; the final path either exists complete or not at
/// all.
async fn deliver(dest: &str, payload: &Path) -> anyhow::Result<()> {
    let stage_name = format!(".crumpet-{}.tmp", Uuid::new_v4());

    if let Some(rest) = dest.strip_prefix("file://").or_else(|| dest.strip_prefix("file:")) {
        let target = PathBuf::from(rest);
        let parent = target
            .parent()
            .ok_or_else(|| anyhow!("destination {dest} has no parent directory"))?;
        tokio::fs::create_dir_all(parent).await?;
        let stage = parent.join(&stage_name);
        // Scratch may live on a different filesystem than the target, so
        // copy into the target directory first; the final rename is local.
        if tokio::fs::rename(payload, &stage).await.is_err() {
            tokio::fs::copy(payload, &stage).await?;
        }
        tokio::fs::rename(&stage, &target).await?;
        return Ok(());
    }

    let hadoop = hadoop_bin();
    let (parent, _) = dest
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("destination {dest} has no parent directory"))?;
    let stage = format!("{parent}/{stage_name}");

    let mut mkdir = Command::new(&hadoop);
    mkdir.args(["fs", "-mkdir", "-p", parent]);
    run_streaming(mkdir, "hadoop").await?;

    let mut put = Command::new(&hadoop);
    put.args(["fs", "-put"]).arg(payload).arg(&stage);
    run_streaming(put, "hadoop").await?;

    let mut mv = Command::new(&hadoop);
    mv.args(["fs", "-mv", &stage, dest]);
    run_streaming(mv, "hadoop").await
}

async fn run_streaming(mut command: Command, label: &'static str) -> anyhow::Result<()> {
    let mut child = command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {label}"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
        let mut lines = futures_util::stream::select(
            FramedRead::new(stdout, LinesCodec::new()),
            FramedRead::new(stderr, LinesCodec::new()),
        );
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => log::info!("[{label}] {line}"),
                Err(_) => break,
            }
        }
    }

    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("{label} exited with {status}"))
    }
}
