use anyhow::{Context, Result};
use tracing::{info, warn};

use super::JobRecord;
use crate::parser::{self, Extraction, PipelineOptions};
use crate::storage::{DownloadRef, ResultStore};

/// The work a queue worker does for one job. Called on a blocking thread.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job: &JobRecord) -> Result<DownloadRef>;
}

/// Runs the extraction pipeline on the job's source file and stores the
/// structured result under the job's output stem.
pub struct DocumentRunner {
    pub results: ResultStore,
    pub options: PipelineOptions,
    pub write_raw: bool,
}

impl DocumentRunner {
    pub fn new(results: ResultStore, options: PipelineOptions) -> Self {
        DocumentRunner {
            results,
            options,
            write_raw: false,
        }
    }

    pub fn with_raw(mut self, write_raw: bool) -> Self {
        self.write_raw = write_raw;
        self
    }
}

impl JobRunner for DocumentRunner {
    fn run(&self, job: &JobRecord) -> Result<DownloadRef> {
        let extraction = parser::extract_file(&job.source, &self.options)?;
        let download = save_extraction(&self.results, &job.output_stem, &extraction, self.write_raw)
            .with_context(|| format!("failed to save result for job {}", job.id))?;

        info!(
            "{}: {} sections -> {}",
            job.id,
            extraction.processed.sections.len(),
            download.download_url
        );
        Ok(download)
    }
}

/// Store the structured result, then the raw dump if asked for. If the raw
/// dump cannot be written the structured result is removed again, so a
/// failed run leaves nothing behind.
pub fn save_extraction(
    results: &ResultStore,
    stem: &str,
    extraction: &Extraction,
    write_raw: bool,
) -> Result<DownloadRef> {
    let download = results.save(stem, &extraction.processed)?;
    if write_raw {
        if let Err(e) = results.write_json(&format!("{}.raw.json", stem), &extraction.raw) {
            if let Err(cleanup) = results.remove(&format!("{}.json", stem)) {
                warn!("{:#}", cleanup);
            }
            return Err(e.context("failed to save raw output"));
        }
    }
    Ok(download)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn writes_result_under_output_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let runner = DocumentRunner::new(store.clone(), PipelineOptions::default()).with_raw(true);

        let job = JobRecord::new(PathBuf::from("tests/fixtures/intro.json"));
        let download = runner.run(&job).unwrap();
        assert_eq!(download.filename, "intro");
        assert_eq!(download.download_url, "/download/intro.json");

        let saved = store.resolve(&download.download_url).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
        assert_eq!(v["document_name"], "intro.pdf");
        assert_eq!(v["sections"][0]["title"], "Intro");
        assert!(store.resolve("intro.raw.json").is_some());
    }

    #[test]
    fn raw_write_failure_removes_structured_result() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        store.ensure_dirs().unwrap();
        // a directory where the raw file should go makes that write fail
        std::fs::create_dir(store.json_dir().join("intro.raw.json")).unwrap();

        let runner = DocumentRunner::new(store.clone(), PipelineOptions::default()).with_raw(true);
        let job = JobRecord::new(PathBuf::from("tests/fixtures/intro.json"));
        assert!(runner.run(&job).is_err());
        assert!(store.resolve("intro.json").is_none());
    }

    #[test]
    fn missing_source_fails_without_output() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path());
        let runner = DocumentRunner::new(store.clone(), PipelineOptions::default());

        let job = JobRecord::new(tmp.path().join("nope.json"));
        assert!(runner.run(&job).is_err());
        assert!(store.resolve("nope.json").is_none());
    }
}
