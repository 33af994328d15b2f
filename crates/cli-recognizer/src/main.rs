use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recognizer::{cleanup, ImageType, JobController, JobError, RecognitionConfig, RunOutcome, RunReport};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use log::{error, info, warn};
use tokio::task::JoinHandle;

/// Batch line recognition runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per page (overrides config)
    #[arg(long)]
    page_dir: Option<PathBuf>,

    /// Line images to recognize: binary or gray (overrides config)
    #[arg(long)]
    image_type: Option<ImageType>,

    /// Recognizer executable (overrides config)
    #[arg(long)]
    recognizer: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List pages eligible for recognition
    Pages,
    /// Report whether recognition output already exists for the pages
    Check {
        #[arg(required = true)]
        pages: Vec<String>,
    },
    /// Delete recognition output of earlier runs
    Clean {
        #[arg(required = true)]
        pages: Vec<String>,
    },
    /// Recognize all line images of the pages
    Run {
        /// Recognize every eligible page
        #[arg(long)]
        all: bool,
        /// Overwrite existing recognition output
        #[arg(long)]
        force: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        pages: Vec<String>,
        /// Arguments passed to the recognizer after the line images
        #[arg(last = true)]
        tool_args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    let mut cfg = RecognitionConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(page_dir) = args.page_dir {
        cfg.page_dir = page_dir;
    }
    if let Some(image_type) = args.image_type {
        cfg.image_type = image_type;
    }
    if let Some(recognizer) = args.recognizer {
        cfg.recognizer_bin = recognizer;
    }

    let ctrl = Arc::new(JobController::new(cfg));

    match args.command {
        Command::Pages => {
            for page_id in ctrl.valid_page_ids() {
                println!("{}", page_id);
            }
            Ok(())
        }
        Command::Check { pages } => {
            if ctrl.outputs_exist(&pages) {
                println!("Recognition output exists for at least one of {} page(s)", pages.len());
            } else {
                println!("No recognition output for {} page(s)", pages.len());
            }
            Ok(())
        }
        Command::Clean { pages } => {
            let deleted = cleanup::delete_old_outputs(ctrl.layout(), &pages);
            println!("Deleted {} recognition output file(s)", deleted);
            Ok(())
        }
        Command::Run { all, force, json, pages, tool_args } => {
            let pages = if all { ctrl.valid_page_ids() } else { pages };
            run(ctrl, pages, tool_args, force, json).await
        }
    }
}

async fn run(
    ctrl: Arc<JobController>,
    pages: Vec<String>,
    tool_args: Vec<String>,
    force: bool,
    json: bool,
) -> Result<()> {
    if pages.is_empty() {
        bail!("No pages selected (pass page ids or --all)");
    }

    if ctrl.outputs_exist(&pages) {
        if !force {
            bail!("Recognition output already exists for the selected pages, use --force to overwrite it");
        }
        warn!("Overwriting existing recognition output");
    }

    let config = ctrl.config();
    info!("Recognizer: {}", config.recognizer_bin.display());
    info!("  Page dir: {}", config.page_dir.display());
    info!("  Image type: {} ({})", config.image_type, config.image_ext());
    info!("  Pages: {}", pages.join(","));

    let runner = Arc::clone(&ctrl);
    let task = tokio::spawn(async move { runner.start(&pages, &tool_args).await });

    let result = supervise(&ctrl, task, tokio::signal::ctrl_c()).await?;

    match result {
        Ok(report) => {
            print_report(&report, json)?;
            if report.outcome == RunOutcome::Cancelled {
                bail!("Recognition was cancelled");
            }
            Ok(())
        }
        Err(JobError::RecognitionFailed { exit_code }) => {
            let console = ctrl.console_output();
            for line in console.stderr.lines().rev().take(20).collect::<Vec<_>>().into_iter().rev() {
                error!("recognizer: {}", line);
            }
            if let Some(report) = ctrl.last_run() {
                print_report(&report, json)?;
            }
            bail!("Recognizer failed (exit code {:?})", exit_code);
        }
        Err(e) => {
            ctrl.reset_progress();
            Err(e).context("Recognition did not complete")
        }
    }
}

/// Wait for the run to finish, logging progress on every poll tick.
///
/// The run is cancelled once `interrupt` resolves; it is polled across ticks so
/// a signal arriving mid-tick is not lost.
async fn supervise<F: Future>(
    ctrl: &JobController,
    mut task: JoinHandle<std::result::Result<RunReport, JobError>>,
    interrupt: F,
) -> Result<std::result::Result<RunReport, JobError>> {
    let poll_interval = Duration::from_millis(ctrl.config().poll_interval_ms.max(100));
    let mut ticker = tokio::time::interval(poll_interval);
    let mut last_progress = None;
    let mut interrupted = false;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            joined = &mut task => return joined.context("Recognition task failed"),
            _ = ticker.tick() => {
                let progress = ctrl.progress();
                if ctrl.is_running() && last_progress != Some(progress) {
                    let snapshot = ctrl.snapshot();
                    info!("Progress: {}% ({}/{} lines)", progress, snapshot.units_done, snapshot.units_total);
                    last_progress = Some(progress);
                }
            }
            _ = &mut interrupt, if !interrupted => {
                warn!("Interrupted, cancelling recognition");
                interrupted = true;
                ctrl.cancel();
            }
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
        println!("{}", out);
    } else {
        let elapsed = report.finished_at - report.started_at;
        println!(
            "Run {}: {:?} after {}s, {} line segment(s) on {} page(s)",
            report.run_id,
            report.outcome,
            elapsed.num_seconds(),
            report.unit_count,
            report.page_ids.len()
        );
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn slow_project(dir: &TempDir) -> JobController {
        let segment = dir.path().join("Pages").join("0001").join("0001__000__paragraph");
        fs::create_dir_all(&segment).unwrap();
        fs::write(segment.join("0001__000__paragraph__000.bin.png"), b"png").unwrap();

        let recognizer = dir.path().join("slow.sh");
        fs::write(&recognizer, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&recognizer, fs::Permissions::from_mode(0o755)).unwrap();

        JobController::new(RecognitionConfig {
            page_dir: dir.path().join("Pages"),
            recognizer_bin: recognizer,
            poll_interval_ms: 100,
            ..Default::default()
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_cancels_run() {
        let dir = TempDir::new().unwrap();
        let ctrl = Arc::new(slow_project(&dir));

        let runner = Arc::clone(&ctrl);
        let task = tokio::spawn(async move { runner.start(&["0001"], &[]).await });

        let (tx, rx) = oneshot::channel::<()>();
        let watcher = Arc::clone(&ctrl);
        tokio::spawn(async move {
            while !watcher.is_running() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            // Let a few ticks pass so the interrupt lands between them
            tokio::time::sleep(Duration::from_millis(250)).await;
            let _ = tx.send(());
        });

        let result = tokio::time::timeout(Duration::from_secs(10), supervise(&ctrl, task, rx))
            .await
            .expect("interrupt should end the run")
            .unwrap();
        assert_eq!(result.unwrap().outcome, RunOutcome::Cancelled);
        assert!(!ctrl.is_running());
    }

    #[tokio::test]
    async fn test_run_finishing_without_interrupt() {
        let dir = TempDir::new().unwrap();
        let segment = dir.path().join("Pages").join("0001").join("0001__000__paragraph");
        fs::create_dir_all(&segment).unwrap();
        let recognizer = dir.path().join("ok.sh");
        fs::write(&recognizer, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&recognizer, fs::Permissions::from_mode(0o755)).unwrap();
        let ctrl = Arc::new(JobController::new(RecognitionConfig {
            page_dir: dir.path().join("Pages"),
            recognizer_bin: recognizer,
            ..Default::default()
        }));

        let runner = Arc::clone(&ctrl);
        let task = tokio::spawn(async move { runner.start(&["0001"], &[]).await });

        let report = supervise(&ctrl, task, std::future::pending::<()>()).await.unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
    }
}
