//! Filesystem layout of a recognition project.
//!
//! ```text
//! <page_dir>/<page_id>/<segment_id>/<line_segment_id><image_ext>        input line image
//! <page_dir>/<page_id>/<segment_id>/<line_segment_id><recognition_ext>  recognizer output
//! ```
//!
//! Output existence is the only completion signal, so every path here must be
//! derived the same way the recognizer derives them.

use std::io;
use std::path::{Path, PathBuf};
use log::warn;
use walkdir::{DirEntry, WalkDir};
use crate::config::RecognitionConfig;
use crate::error::{JobError, Result};

/// One line image, the smallest unit of recognition work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegmentUnit<'a> {
    pub page_id: &'a str,
    pub segment_id: &'a str,
    pub line_segment_id: &'a str,
}

/// Resolves page, segment and line paths for one project
#[derive(Debug, Clone)]
pub struct PageLayout {
    page_dir: PathBuf,
    image_ext: String,
    recognition_ext: String,
}

impl PageLayout {
    pub fn new(cfg: &RecognitionConfig) -> Self {
        Self {
            page_dir: cfg.page_dir.clone(),
            image_ext: cfg.image_ext().to_string(),
            recognition_ext: cfg.recognition_ext.clone(),
        }
    }

    pub fn page_dir(&self) -> &Path {
        &self.page_dir
    }

    pub fn image_ext(&self) -> &str {
        &self.image_ext
    }

    pub fn recognition_ext(&self) -> &str {
        &self.recognition_ext
    }

    pub fn page_path(&self, page_id: &str) -> PathBuf {
        self.page_dir.join(page_id)
    }

    pub fn segment_path(&self, page_id: &str, segment_id: &str) -> PathBuf {
        self.page_path(page_id).join(segment_id)
    }

    /// Line image handed to the recognizer
    pub fn input_path(&self, unit: LineSegmentUnit<'_>) -> PathBuf {
        self.segment_path(unit.page_id, unit.segment_id)
            .join(format!("{}{}", unit.line_segment_id, self.image_ext))
    }

    /// Text file the recognizer writes for a line image
    pub fn output_path(&self, unit: LineSegmentUnit<'_>) -> PathBuf {
        self.segment_path(unit.page_id, unit.segment_id)
            .join(format!("{}{}", unit.line_segment_id, self.recognition_ext))
    }

    pub fn is_input_image(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.image_ext)
    }

    pub fn is_output(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.recognition_ext)
    }

    /// Page ids eligible for recognition: every directory directly below the page root, sorted
    pub fn list_page_ids(&self) -> Vec<String> {
        if !self.page_dir.is_dir() {
            return Vec::new();
        }

        let mut page_ids = Vec::new();
        for entry in WalkDir::new(&self.page_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading page directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                page_ids.push(name.to_string());
            }
        }
        page_ids.sort();
        page_ids
    }

    /// Segment directories of a page (depth 1, sorted by name)
    pub fn segment_dirs(&self, page_id: &str) -> Result<Vec<DirEntry>> {
        let page_path = self.page_path(page_id);
        let entries = list_dir(&page_path)?;
        Ok(entries.into_iter().filter(|e| e.file_type().is_dir()).collect())
    }

    /// Regular files directly inside `dir` whose name satisfies `keep`
    pub fn files_in(&self, dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<DirEntry>> {
        let entries = list_dir(dir)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_str().map(&keep).unwrap_or(false))
            .collect())
    }
}

/// Immediate children of a directory, sorted by file name
fn list_dir(dir: &Path) -> Result<Vec<DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, walkdir::Error>>()
        .map_err(|e| JobError::io(dir, io::Error::from(e)))
}

/// Derive the line segment id from a line image file name.
///
/// Line images carry two suffixes (`.bin.png`, `.nrm.png`), both are removed:
/// `0002__000__paragraph__000.bin.png` -> `0002__000__paragraph__000`.
pub fn line_segment_id(file_name: &str) -> Option<String> {
    let id = strip_extension(strip_extension(file_name));
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}
