//! Work discovery under the import directory
//!
//! Walks the tree in a stable (file name sorted) order and keeps regular
//! files only. Traversal errors are logged and the offending path skipped.

use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::logging::{LogRecord, StructuredSink};

/// One regular file found during traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Walk `root` and return every regular file, in traversal order
pub fn discover(root: &Path, sink: &dyn StructuredSink) -> Vec<DiscoveredFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).display().to_string();
                sink.emit(
                    LogRecord::error("Error walking directory")
                        .field("path", path)
                        .field("error", e.to_string()),
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                sink.emit(
                    LogRecord::error("Error walking directory")
                        .field("path", entry.path().display().to_string())
                        .field("error", e.to_string()),
                );
                continue;
            }
        };

        files.push(DiscoveredFile {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.into_path(),
            size,
        });
    }

    files
}

/// Paths of every regular file under `root`
pub fn discover_work(root: &Path, sink: &dyn StructuredSink) -> Vec<PathBuf> {
    discover(root, sink).into_iter().map(|f| f.path).collect()
}

/// Emit one `File found` record per file on `info_sink`; traversal errors go
/// to `sink`. Returns the number of files reported.
pub fn report_inventory(
    root: &Path,
    sink: &dyn StructuredSink,
    info_sink: &dyn StructuredSink,
) -> usize {
    let files = discover(root, sink);
    for file in &files {
        info_sink.emit(
            LogRecord::info("File found")
                .field("file", file.name.clone())
                .field("size", file.size),
        );
    }
    files.len()
}
