use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Value, json};

use crate::worker::{Execute, TaskContext};

/// Create one link per file inside a target directory.
///
/// Reports progress after every file. On cancellation the links created so
/// far are removed and the task returns 0.
pub struct ShortcutCreationTask {
    target_dir: PathBuf,
    files: Vec<PathBuf>,
    created: Vec<PathBuf>,
}

impl ShortcutCreationTask {
    pub fn new(target_dir: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            target_dir: absolute(target_dir.into()),
            files: files.into_iter().map(absolute).collect(),
            created: Vec::new(),
        }
    }
}

fn remove_links(links: &mut Vec<PathBuf>) {
    for path in links.drain(..) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove shortcut");
        }
    }
}

impl Execute for ShortcutCreationTask {
    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<Value> {
        let total = self.files.len();
        for (i, file) in self.files.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(
                    created = self.created.len(),
                    "Shortcut creation cancelled, cleaning up"
                );
                remove_links(&mut self.created);
                return Ok(json!(0));
            }

            let link = unique_link_path(&self.target_dir, file);
            create_link(file, &link)
                .with_context(|| format!("Failed to create shortcut for {}", file.display()))?;
            self.created.push(link);
            ctx.report_progress(((i + 1) * 100 / total) as u32);
        }
        Ok(json!(total))
    }
}

/// `<stem>.lnk`, or `<stem>_N.lnk` with the smallest free N.
pub fn unique_link_path(dir: &Path, target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shortcut".to_string());

    let mut candidate = dir.join(format!("{stem}.lnk"));
    let mut counter = 1;
    while candidate.symlink_metadata().is_ok() {
        candidate = dir.join(format!("{stem}_{counter}.lnk"));
        counter += 1;
    }
    candidate
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_link(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "links are not supported on this platform",
    ))
}
