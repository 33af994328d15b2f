use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;
use crate::cleanup;
use crate::config::RecognitionConfig;
use crate::error::{JobError, Result};
use crate::inventory;
use crate::layout::PageLayout;
use crate::process::{ConsoleOutput, ProcessExit, ProcessHandle};
use crate::progress::{PageProgress, ProgressTracker, PROGRESS_DONE, PROGRESS_UNSET};

/// Lifecycle phase of the recognition job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// No run started yet, or progress was reset
    Idle,
    Running,
    /// Recognizer exited successfully
    Completed,
    Cancelled,
    /// Recognizer exited with a failure status
    Failed,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Summary of one recognizer run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub page_ids: Vec<String>,
    pub unit_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
}

/// Point-in-time view of the job; never touches the filesystem
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub phase: JobPhase,
    pub progress: i32,
    pub units_done: usize,
    pub units_total: usize,
    pub pages: Vec<PageProgress>,
}

#[derive(Debug)]
struct JobState {
    phase: JobPhase,
    progress: i32,
    run_id: Option<Uuid>,
    tracker: ProgressTracker,
    /// Tracker was built for the current run
    tracker_current: bool,
    handle: Option<ProcessHandle>,
    last_run: Option<RunReport>,
}

/// Drives recognizer runs for one project.
///
/// One run at a time: [`start`](Self::start) blocks until the recognizer exits,
/// so callers that want to poll [`progress`](Self::progress) or
/// [`cancel`](Self::cancel) meanwhile run `start` on their own task and share
/// the controller (e.g. behind an `Arc`). All state sits behind one mutex that
/// is never held across an await.
#[derive(Debug)]
pub struct JobController {
    config: RecognitionConfig,
    layout: PageLayout,
    state: Mutex<JobState>,
}

impl JobController {
    pub fn new(config: RecognitionConfig) -> Self {
        let layout = PageLayout::new(&config);
        Self {
            config,
            layout,
            state: Mutex::new(JobState {
                phase: JobPhase::Idle,
                progress: PROGRESS_UNSET,
                run_id: None,
                tracker: ProgressTracker::default(),
                tracker_current: false,
                handle: None,
                last_run: None,
            }),
        }
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pages that can be recognized, sorted
    pub fn valid_page_ids(&self) -> Vec<String> {
        self.layout.list_page_ids()
    }

    /// Whether recognizer output from an earlier run exists for any of the pages
    pub fn outputs_exist<S: AsRef<str>>(&self, page_ids: &[S]) -> bool {
        cleanup::outputs_exist(&self.layout, page_ids)
    }

    /// Run the recognizer over every line image of `page_ids`.
    ///
    /// Old outputs of those pages are deleted first, then the inventory is rebuilt
    /// and the recognizer is invoked once with the line image paths followed by
    /// `tool_args`. Returns when the recognizer exits or is cancelled.
    ///
    /// Fails with [`JobError::AlreadyRunning`] while another run is live. On scan
    /// or launch failure the job is reset to idle before the error is returned.
    /// A non-zero recognizer exit yields [`JobError::RecognitionFailed`].
    pub async fn start<S: AsRef<str>>(&self, page_ids: &[S], tool_args: &[String]) -> Result<RunReport> {
        let page_ids: Vec<String> = page_ids.iter().map(|p| p.as_ref().to_string()).collect();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let handle = ProcessHandle::new();
        let _live = {
            let mut state = self.state();
            let previous_live = state.handle.as_ref().map(ProcessHandle::is_live).unwrap_or(false);
            if state.phase == JobPhase::Running || previous_live {
                return Err(JobError::AlreadyRunning);
            }
            state.phase = JobPhase::Running;
            state.progress = 0;
            state.run_id = Some(run_id);
            state.tracker_current = false;
            state.handle = Some(handle.clone());
            handle.claim()
        };

        info!("Run {}: starting recognition of {} page(s)", run_id, page_ids.len());

        cleanup::delete_old_outputs(&self.layout, &page_ids);

        let process_state = match inventory::initialize(&self.layout, &page_ids) {
            Ok(s) => s,
            Err(e) => {
                error!("Run {}: inventory failed: {}", run_id, e);
                self.abandon(run_id);
                return Err(e);
            }
        };

        let inputs = inventory::flatten_to_input_paths(&self.layout, &process_state);
        let unit_count = inputs.len();
        {
            let mut state = self.state();
            if state.run_id == Some(run_id) {
                state.tracker = ProgressTracker::new(process_state);
                state.tracker_current = true;
            }
        }

        let mut args: Vec<OsString> = inputs.into_iter().map(OsString::from).collect();
        args.extend(tool_args.iter().map(OsString::from));

        info!(
            "Run {}: launching {} on {} line segment(s)",
            run_id,
            self.config.recognizer_bin.display(),
            unit_count
        );

        let exit = match handle
            .run(&self.config.recognizer_bin, &args, self.config.capture_output)
            .await
        {
            Ok(exit) => exit,
            Err(e) => {
                error!("Run {}: {}", run_id, e);
                self.abandon(run_id);
                return Err(e);
            }
        };

        let mut state = self.state();
        // Phase and progress belong to this run only until a cancel or reset
        let current = state.run_id == Some(run_id) && state.phase == JobPhase::Running;

        let (outcome, exit_code) = match exit {
            ProcessExit::Exited(status) if !current && handle.is_stopped() => {
                (RunOutcome::Cancelled, status.code())
            }
            ProcessExit::Exited(status) if status.success() => {
                if current {
                    state.phase = JobPhase::Completed;
                    state.progress = PROGRESS_DONE;
                }
                (RunOutcome::Completed, status.code())
            }
            ProcessExit::Exited(status) => {
                if current {
                    state.phase = JobPhase::Failed;
                    let progress = state.tracker.poll(&self.layout);
                    state.progress = progress;
                }
                (RunOutcome::Failed, status.code())
            }
            ProcessExit::Stopped => {
                if current {
                    state.phase = JobPhase::Cancelled;
                }
                (RunOutcome::Cancelled, None)
            }
        };

        let report = RunReport {
            run_id,
            page_ids,
            unit_count,
            started_at,
            finished_at: Utc::now(),
            outcome,
            exit_code,
        };

        if state.run_id == Some(run_id) {
            state.last_run = Some(report.clone());
        }
        drop(state);

        match outcome {
            RunOutcome::Completed => {
                info!("✅ Run {}: recognition completed ({} line segment(s))", run_id, unit_count);
                Ok(report)
            }
            RunOutcome::Cancelled => {
                info!("Run {}: cancelled", run_id);
                Ok(report)
            }
            RunOutcome::Failed => {
                error!("❌ Run {}: recognizer exited with code {:?}", run_id, exit_code);
                Err(JobError::RecognitionFailed { exit_code })
            }
        }
    }

    /// Request the running recognizer to stop and mark the job not running.
    ///
    /// Returns immediately; the process may still be shutting down.
    pub fn cancel(&self) {
        let mut state = self.state();
        if let Some(handle) = &state.handle {
            handle.stop();
        }
        if state.phase == JobPhase::Running {
            info!("Cancelling recognition run");
            state.phase = JobPhase::Cancelled;
        }
    }

    /// Mark the job not running and progress as never started
    pub fn reset_progress(&self) {
        let mut state = self.state();
        state.phase = JobPhase::Idle;
        state.progress = PROGRESS_UNSET;
    }

    pub fn is_running(&self) -> bool {
        self.state().phase == JobPhase::Running
    }

    pub fn phase(&self) -> JobPhase {
        self.state().phase
    }

    /// Percentage of recognized line segments.
    ///
    /// Only recomputed while running; otherwise the last value is returned
    /// (-1 before the first run or after a reset). 100 is final for a run.
    pub fn progress(&self) -> i32 {
        let mut state = self.state();
        if state.phase != JobPhase::Running
            || state.progress == PROGRESS_DONE
            || !state.tracker_current
        {
            return state.progress;
        }

        let progress = state.tracker.poll(&self.layout).max(state.progress);
        state.progress = progress;
        progress
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        let (units_done, units_total) = state.tracker.counts();
        JobSnapshot {
            phase: state.phase,
            progress: state.progress,
            units_done,
            units_total,
            pages: state.tracker.page_progress(),
        }
    }

    pub fn last_run(&self) -> Option<RunReport> {
        self.state().last_run.clone()
    }

    /// Console output of the latest recognizer process
    pub fn console_output(&self) -> ConsoleOutput {
        self.state()
            .handle
            .as_ref()
            .map(ProcessHandle::console)
            .unwrap_or_default()
    }

    /// Reset after a failed start, unless another run took over meanwhile
    fn abandon(&self, run_id: Uuid) {
        let mut state = self.state();
        if state.run_id == Some(run_id) {
            warn!("Run {}: resetting progress after failure", run_id);
            state.phase = JobPhase::Idle;
            state.progress = PROGRESS_UNSET;
        }
    }
}
