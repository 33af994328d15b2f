use std::fs;
use log::{debug, info, warn};
use crate::layout::PageLayout;

/// Delete recognizer output left over from a previous run.
///
/// Best effort: pages whose directory is missing are skipped, and listing or
/// delete failures are logged without stopping the pass.
/// Returns the number of files deleted.
pub fn delete_old_outputs<S: AsRef<str>>(layout: &PageLayout, page_ids: &[S]) -> usize {
    let mut deleted = 0;

    for page_id in page_ids.iter().map(AsRef::<str>::as_ref) {
        let page_path = layout.page_path(page_id);
        if !page_path.is_dir() {
            debug!("Page {}: no directory at {}, nothing to clean", page_id, page_path.display());
            continue;
        }

        let segment_dirs = match layout.segment_dirs(page_id) {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Page {}: {}", page_id, e);
                continue;
            }
        };

        for segment_dir in segment_dirs {
            let outputs = match layout.files_in(segment_dir.path(), |name| layout.is_output(name)) {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!("Page {}: {}", page_id, e);
                    continue;
                }
            };

            for output in outputs {
                match fs::remove_file(output.path()) {
                    Ok(()) => {
                        debug!("Deleted old output: {}", output.path().display());
                        deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete old output {}: {}", output.path().display(), e),
                }
            }
        }
    }

    if deleted > 0 {
        info!("🗑️  Deleted {} old recognition output(s)", deleted);
    }
    deleted
}

/// Whether any of the given pages already has recognizer output.
///
/// Used to warn before a run overwrites earlier results. Missing or unreadable
/// page directories count as "no output" for that page.
pub fn outputs_exist<S: AsRef<str>>(layout: &PageLayout, page_ids: &[S]) -> bool {
    for page_id in page_ids.iter().map(AsRef::<str>::as_ref) {
        if !layout.page_path(page_id).is_dir() {
            continue;
        }

        let segment_dirs = match layout.segment_dirs(page_id) {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Page {}: {}", page_id, e);
                continue;
            }
        };

        for segment_dir in segment_dirs {
            match layout.files_in(segment_dir.path(), |name| layout.is_output(name)) {
                Ok(outputs) if !outputs.is_empty() => return true,
                Ok(_) => {}
                Err(e) => warn!("Page {}: {}", page_id, e),
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::{add_segment, test_layout};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_output(page_dir: &Path, page: &str, segment: &str, line: usize) {
        let path = page_dir.join(page).join(segment).join(format!("{}__{:03}.txt", segment, line));
        fs::write(path, b"text").unwrap();
    }

    #[test]
    fn test_deletes_only_outputs() {
        let dir = TempDir::new().unwrap();
        let segment = "0002__000__paragraph";
        add_segment(dir.path(), "0002", segment, 3);
        write_output(dir.path(), "0002", segment, 0);
        write_output(dir.path(), "0002", segment, 2);
        let keep = dir.path().join("0002").join(segment).join("notes.md");
        fs::write(&keep, b"").unwrap();

        let layout = test_layout(dir.path());
        assert!(outputs_exist(&layout, &["0002"]));
        assert_eq!(delete_old_outputs(&layout, &["0002"]), 2);
        assert!(!outputs_exist(&layout, &["0002"]));

        let seg = dir.path().join("0002").join(segment);
        assert!(seg.join(format!("{}__000.bin.png", segment)).exists());
        assert!(keep.exists());
    }

    #[test]
    fn test_missing_page_does_not_stop_delete() {
        let dir = TempDir::new().unwrap();
        add_segment(dir.path(), "0003", "0003__000__paragraph", 1);
        write_output(dir.path(), "0003", "0003__000__paragraph", 0);

        let layout = test_layout(dir.path());
        assert_eq!(delete_old_outputs(&layout, &["0001", "0003"]), 1);
        assert!(!outputs_exist(&layout, &["0003"]));
    }

    #[test]
    fn test_missing_page_does_not_stop_check() {
        let dir = TempDir::new().unwrap();
        add_segment(dir.path(), "0003", "0003__000__paragraph", 1);
        write_output(dir.path(), "0003", "0003__000__paragraph", 0);

        let layout = test_layout(dir.path());
        assert!(outputs_exist(&layout, &["0001", "0003"]));
        assert!(!outputs_exist(&layout, &["0001"]));
    }

    #[test]
    fn test_only_requested_pages_are_touched() {
        let dir = TempDir::new().unwrap();
        add_segment(dir.path(), "0002", "0002__000__paragraph", 1);
        add_segment(dir.path(), "0003", "0003__000__paragraph", 1);
        write_output(dir.path(), "0002", "0002__000__paragraph", 0);
        write_output(dir.path(), "0003", "0003__000__paragraph", 0);

        let layout = test_layout(dir.path());
        assert_eq!(delete_old_outputs(&layout, &["0002"]), 1);
        assert!(outputs_exist(&layout, &["0003"]));
        assert!(!outputs_exist(&layout, &["0002"]));
    }
}
