use log::debug;
use serde::Serialize;
use crate::inventory::ProcessState;
use crate::layout::PageLayout;

/// Progress value before any run started, or after an explicit reset
pub const PROGRESS_UNSET: i32 = -1;

/// Progress value of a finished run
pub const PROGRESS_DONE: i32 = 100;

/// Recognized/total line counts of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageProgress {
    pub page_id: String,
    pub done: usize,
    pub total: usize,
}

/// Tracks which line segments of a run have been recognized.
///
/// A line counts as recognized once its output file has been seen on disk.
/// The observation is cached in the [`ProcessState`], so recognized lines are
/// never checked again and stay recognized even if the file disappears.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    state: ProcessState,
}

impl ProgressTracker {
    pub fn new(state: ProcessState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Check unrecognized lines against the filesystem and return the percentage done
    pub fn poll(&mut self, layout: &PageLayout) -> i32 {
        let mut total = 0;
        let mut done = 0;

        self.state.for_each_flag_mut(|unit, recognized| {
            total += 1;
            if !*recognized && layout.output_path(unit).exists() {
                debug!("Line segment {} recognized", unit.line_segment_id);
                *recognized = true;
            }
            if *recognized {
                done += 1;
            }
        });

        percent(done, total)
    }

    /// Counts from cached observations only
    pub fn counts(&self) -> (usize, usize) {
        (self.state.done_count(), self.state.unit_count())
    }

    pub fn page_progress(&self) -> Vec<PageProgress> {
        self.state
            .pages()
            .map(|(page_id, segments)| {
                let lines = segments.values().flat_map(|lines| lines.values());
                let (done, total) = lines.fold((0, 0), |(done, total), recognized| {
                    (done + usize::from(*recognized), total + 1)
                });
                PageProgress {
                    page_id: page_id.to_string(),
                    done,
                    total,
                }
            })
            .collect()
    }
}

/// Whole percentage of `done` out of `total`, rounded down so that 100 means
/// every line is recognized. A run without lines is trivially complete.
pub fn percent(done: usize, total: usize) -> i32 {
    if total == 0 {
        return PROGRESS_DONE;
    }
    // Floor, not round: 199/200 must read 99, since 100 is final for a run
    (done.min(total) * 100 / total) as i32
}
