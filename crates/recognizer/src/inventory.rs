use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use log::{debug, info};
use serde::Serialize;
use crate::error::Result;
use crate::layout::{line_segment_id, LineSegmentUnit, PageLayout};

/// line_segment_id -> recognized
pub type LineSegments = BTreeMap<String, bool>;

/// segment_id -> line segments
pub type Segments = BTreeMap<String, LineSegments>;

/// Completion state of one run: page_id -> segment_id -> line_segment_id -> recognized.
///
/// ```text
/// {
///     "0002": {
///         "0002__000__paragraph": {
///             "0002__000__paragraph__000": true,
///             "0002__000__paragraph__001": false,
///         },
///     },
/// }
/// ```
///
/// Keys are only ever added by [`initialize`]; afterwards a flag may flip from
/// `false` to `true` and never back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessState {
    pages: BTreeMap<String, Segments>,
}

impl ProcessState {
    pub fn page(&self, page_id: &str) -> Option<&Segments> {
        self.pages.get(page_id)
    }

    pub fn pages(&self) -> impl Iterator<Item = (&str, &Segments)> {
        self.pages.iter().map(|(id, segments)| (id.as_str(), segments))
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    /// Every unit with its recognized flag, in key order
    pub fn units(&self) -> impl Iterator<Item = (LineSegmentUnit<'_>, bool)> {
        self.pages.iter().flat_map(|(page_id, segments)| {
            segments.iter().flat_map(move |(segment_id, lines)| {
                lines.iter().map(move |(line_segment_id, done)| {
                    (
                        LineSegmentUnit {
                            page_id: page_id.as_str(),
                            segment_id: segment_id.as_str(),
                            line_segment_id: line_segment_id.as_str(),
                        },
                        *done,
                    )
                })
            })
        })
    }

    pub fn unit_count(&self) -> usize {
        self.units().count()
    }

    pub fn done_count(&self) -> usize {
        self.units().filter(|(_, done)| *done).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Mutable walk over every flag; used by the progress tracker to flip flags
    pub(crate) fn for_each_flag_mut(&mut self, mut f: impl FnMut(LineSegmentUnit<'_>, &mut bool)) {
        for (page_id, segments) in self.pages.iter_mut() {
            for (segment_id, lines) in segments.iter_mut() {
                for (line_segment_id, done) in lines.iter_mut() {
                    let unit = LineSegmentUnit {
                        page_id: page_id.as_str(),
                        segment_id: segment_id.as_str(),
                        line_segment_id: line_segment_id.as_str(),
                    };
                    f(unit, done);
                }
            }
        }
    }
}

/// Build the completion state for the given pages from the line images on disk.
///
/// Every segment directory of a page becomes an entry, even when it holds no
/// matching line images. A page without segment directories gets an empty map.
/// Fails with [`JobError::Io`](crate::error::JobError::Io) if any page or segment
/// directory cannot be listed; nothing is returned in that case.
pub fn initialize<S: AsRef<str>>(layout: &PageLayout, page_ids: &[S]) -> Result<ProcessState> {
    let mut state = ProcessState::default();
    let unique: BTreeSet<&str> = page_ids.iter().map(AsRef::<str>::as_ref).collect();

    for page_id in unique {
        let mut segments = Segments::new();

        for segment_dir in layout.segment_dirs(page_id)? {
            let Some(segment_id) = segment_dir.file_name().to_str() else {
                debug!("Skipping non UTF-8 segment directory: {}", segment_dir.path().display());
                continue;
            };

            let mut lines = LineSegments::new();
            for image in layout.files_in(segment_dir.path(), |name| layout.is_input_image(name))? {
                let Some(name) = image.file_name().to_str() else {
                    debug!("Skipping non UTF-8 line image: {}", image.path().display());
                    continue;
                };
                match line_segment_id(name) {
                    Some(id) => {
                        lines.insert(id, false);
                    }
                    None => debug!("Skipping line image without an id: {}", image.path().display()),
                }
            }

            debug!("Page {}: segment {} has {} line image(s)", page_id, segment_id, lines.len());
            segments.insert(segment_id.to_string(), lines);
        }

        state.pages.insert(page_id.to_string(), segments);
    }

    info!(
        "Inventory built: {} page(s), {} line segment(s)",
        state.pages.len(),
        state.unit_count()
    );
    Ok(state)
}

/// Absolute input paths of every unit, in key order
pub fn flatten_to_input_paths(layout: &PageLayout, state: &ProcessState) -> Vec<PathBuf> {
    state.units().map(|(unit, _)| layout.input_path(unit)).collect()
}
