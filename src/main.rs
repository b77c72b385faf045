mod db;
mod error;
mod jobs;
mod parser;
mod settings;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use jobs::queue::JobQueue;
use jobs::runner::DocumentRunner;
use jobs::runner::save_extraction;
use jobs::store::{lookup, JobStore, MemoryJobStore, SqliteJobStore};
use jobs::{JobStatus, StatusLookup};
use settings::Settings;
use storage::{output_stem, ResultStore};

#[derive(Parser)]
#[command(name = "docstruct", about = "Rebuild sections, TOC and tables from decoded document blocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Structure one decoded document and save the result JSON
    Extract {
        input: PathBuf,
        /// Write results here instead of <data_dir>/json_files
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Also write the per-block cluster dump (<stem>.raw.json)
        #[arg(long)]
        raw: bool,
        /// Skip table extraction
        #[arg(long)]
        no_tables: bool,
        /// Group by page instead of by heading
        #[arg(long)]
        no_headings: bool,
    },
    /// Structure every *.json document in a directory in parallel
    Batch {
        dir: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Submit documents to the worker pool and wait for the queue to drain
    Queue {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Worker pool size (default: DOCSTRUCT_WORKERS or CPU count)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Also write each job's per-block cluster dump
        #[arg(long)]
        raw: bool,
        /// Group by page instead of by heading
        #[arg(long)]
        no_headings: bool,
        /// Keep job statuses in memory instead of the SQLite store
        #[arg(long)]
        ephemeral: bool,
    },
    /// Show the status of a queued job
    Status { job_id: String },
    /// Show job counts by status
    Stats,
    /// Print a stored result by file name or download url
    Download { file_name: String },
    /// Delete uploaded inputs and stored results
    Cleanup,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let t0 = Instant::now();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;
    let results = ResultStore::new(&settings.data_dir);

    match cli.command {
        Commands::Extract {
            input,
            out_dir,
            raw,
            no_tables,
            no_headings,
        } => {
            let results = with_out_dir(results, out_dir);
            let mut opts = settings.pipeline_options();
            opts.extract_tables &= !no_tables;
            opts.process_headings &= !no_headings;

            let extraction = parser::extract_file(&input, &opts)?;
            let download = save_extraction(&results, &output_stem(&input), &extraction, raw)?;
            println!("{}", serde_json::to_string_pretty(&download)?);
            Ok(())
        }
        Commands::Batch { dir, out_dir } => {
            let results = with_out_dir(results, out_dir);
            let inputs = list_inputs(&dir)?;
            if inputs.is_empty() {
                println!("No *.json documents in {}", dir.display());
                return Ok(());
            }
            println!("Processing {} documents...", inputs.len());
            let counts = process_batch(&inputs, &results, &settings)?;
            println!(
                "Saved {} results to {} ({} failed).",
                counts.ok,
                results.json_dir().display(),
                counts.failed
            );
            Ok(())
        }
        Commands::Queue {
            inputs,
            workers,
            raw,
            no_headings,
            ephemeral,
        } => {
            let store: Arc<dyn JobStore> = if ephemeral {
                Arc::new(MemoryJobStore::new())
            } else {
                Arc::new(SqliteJobStore::open(&settings.db_path())?)
            };
            let mut opts = settings.pipeline_options();
            opts.process_headings &= !no_headings;
            let runner = Arc::new(DocumentRunner::new(results.clone(), opts).with_raw(raw));
            let queue = JobQueue::start(workers.unwrap_or(settings.workers), Arc::clone(&store), runner);

            let mut ids = Vec::with_capacity(inputs.len());
            for input in inputs {
                let staged = match results.stage_upload(&input) {
                    Ok(staged) => staged,
                    Err(e) => {
                        warn!("Skipping {}: {:#}", input.display(), e);
                        continue;
                    }
                };
                let id = queue.submit(staged)?;
                println!("{}  {}  {}", id, input.display(), queue.status(&id.to_string()).to_json());
                ids.push(id);
            }

            // shutdown drains the queue, so every job is terminal afterwards
            queue.shutdown().await;

            let (mut completed, mut failed) = (0usize, 0usize);
            for id in &ids {
                let status = lookup(store.as_ref(), &id.to_string());
                if let StatusLookup::Found(snap) = &status {
                    match snap.status {
                        JobStatus::Completed => completed += 1,
                        JobStatus::Failed => failed += 1,
                        _ => {}
                    }
                    if !snap.status.is_terminal() {
                        warn!("Job {} did not finish: {}", id, snap.status);
                    }
                }
                println!("{}  {}", id, status.to_json());
            }
            println!("Completed: {}  Failed: {}", completed, failed);
            Ok(())
        }
        Commands::Status { job_id } => {
            let store = SqliteJobStore::open(&settings.db_path())?;
            let status = lookup(&store, &job_id);
            println!("{}", serde_json::to_string_pretty(&status.to_json())?);
            Ok(())
        }
        Commands::Stats => {
            let counts = SqliteJobStore::open(&settings.db_path())?.counts()?;
            println!("Pending:    {}", counts.pending);
            println!("Processing: {}", counts.processing);
            println!("Completed:  {}", counts.completed);
            println!("Failed:     {}", counts.failed);
            Ok(())
        }
        Commands::Download { file_name } => {
            let Some(path) = results.resolve(&file_name) else {
                bail!("File not found: {}", file_name);
            };
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            print!("{}", data);
            Ok(())
        }
        Commands::Cleanup => {
            let report = results.cleanup();
            if !report.all_ok() {
                bail!(
                    "cleanup incomplete (uploads ok: {}, results ok: {})",
                    report.uploads_ok,
                    report.results_ok
                );
            }
            println!("Files deleted successfully");
            Ok(())
        }
    }
}

fn with_out_dir(results: ResultStore, out_dir: Option<PathBuf>) -> ResultStore {
    match out_dir {
        Some(dir) => results.with_json_dir(dir),
        None => results,
    }
}

fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;
    let mut inputs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    inputs.sort();
    Ok(inputs)
}

// ── Batch ──

struct BatchCounts {
    ok: usize,
    failed: usize,
}

fn process_batch(inputs: &[PathBuf], results: &ResultStore, settings: &Settings) -> Result<BatchCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let opts = settings.pipeline_options();
    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let outcomes: Vec<bool> = inputs
        .par_iter()
        .map(|input| {
            let outcome = parser::extract_file(input, &opts)
                .map_err(anyhow::Error::from)
                .and_then(|ex| results.save(&output_stem(input), &ex.processed));
            pb.inc(1);
            match outcome {
                Ok(_) => true,
                Err(e) => {
                    warn!("Skipping {}: {:#}", input.display(), e);
                    false
                }
            }
        })
        .collect();

    pb.finish_and_clear();
    let ok = outcomes.iter().filter(|ok| **ok).count();
    Ok(BatchCounts {
        ok,
        failed: outcomes.len() - ok,
    })
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
