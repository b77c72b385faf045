use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

static WHITESPACE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").unwrap());

/// Where a finished result can be fetched from. Derived from the file name
/// only, so it is stable across job ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRef {
    pub filename: String,
    pub download_url: String,
}

/// Result file stem for an input: extension dropped, whitespace runs
/// collapsed, remaining whitespace replaced by `_`.
pub fn output_stem(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let collapsed = WHITESPACE_RUN_RE.replace_all(&stem, " ");
    WHITESPACE_RE.replace_all(&collapsed, "_").into_owned()
}

pub struct CleanupReport {
    pub uploads_ok: bool,
    pub results_ok: bool,
}

impl CleanupReport {
    pub fn all_ok(&self) -> bool {
        self.uploads_ok && self.results_ok
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    upload_dir: PathBuf,
    json_dir: PathBuf,
}

impl ResultStore {
    pub fn new(data_dir: &Path) -> Self {
        ResultStore {
            upload_dir: data_dir.join("uploads"),
            json_dir: data_dir.join("json_files"),
        }
    }

    /// Same store, results written to `dir` instead of `<data_dir>/json_files`.
    pub fn with_json_dir(mut self, dir: PathBuf) -> Self {
        self.json_dir = dir;
        self
    }

    pub fn json_dir(&self) -> &Path {
        &self.json_dir
    }

    /// Copy an input document into the upload directory and return the copy.
    pub fn stage_upload(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .with_context(|| format!("not a file: {}", source.display()))?;
        self.ensure_dirs()?;
        let dest = self.upload_dir.join(name);
        fs::copy(source, &dest).with_context(|| {
            format!("failed to copy {} to {}", source.display(), dest.display())
        })?;
        Ok(dest)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.json_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Write `<json_dir>/<file_name>` as pretty JSON.
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        self.ensure_dirs()?;
        let path = self.json_dir.join(file_name);
        let mut data = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize json: {}", path.display()))?;
        data.push(b'\n');
        fs::write(&path, data)
            .with_context(|| format!("failed to write json file: {}", path.display()))?;
        Ok(path)
    }

    pub fn save<T: Serialize>(&self, stem: &str, value: &T) -> Result<DownloadRef> {
        let file_name = format!("{}.json", stem);
        self.write_json(&file_name, value)?;
        Ok(DownloadRef {
            filename: stem.to_string(),
            download_url: format!("/download/{}", file_name),
        })
    }

    /// Delete a stored result. A file that is already gone is not an error.
    pub fn remove(&self, file_name: &str) -> Result<()> {
        let path = self.json_dir.join(file_name);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("failed to delete {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    /// Path of a stored result, if `file_name` names an existing file directly
    /// inside the result directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let name = file_name.strip_prefix("/download/").unwrap_or(file_name);
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return None;
        }
        let path = self.json_dir.join(name);
        path.is_file().then_some(path)
    }

    /// Remove everything under the upload and result directories.
    pub fn cleanup(&self) -> CleanupReport {
        CleanupReport {
            uploads_ok: clear_directory(&self.upload_dir),
            results_ok: clear_directory(&self.json_dir),
        }
    }
}

fn clear_directory(dir: &Path) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            warn!("Directory {} does not exist", dir.display());
            return false;
        }
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("failed to delete {}: {}", path.display(), e),
        }
    }
    info!("Removed {} entries from {}", removed, dir.display());
    true
}
