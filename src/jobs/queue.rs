use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::runner::JobRunner;
use super::store::{lookup, JobStore};
use super::{JobRecord, StatusLookup};

/// FIFO job queue drained by a bounded pool of blocking workers.
///
/// Each job is written `pending` on submit, `processing` when a worker slot
/// is free, then `completed` or `failed` by the worker that ran it. A failing
/// or panicking job never affects the others. If a status write is lost, the
/// job is written `failed` with the store error instead.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    sender: Option<mpsc::UnboundedSender<JobRecord>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl JobQueue {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(workers: usize, store: Arc<dyn JobStore>, runner: Arc<dyn JobRunner>) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(rx, workers, Arc::clone(&store), runner));
        info!("Job queue started with {} workers", workers);

        JobQueue {
            store,
            sender: Some(tx),
            dispatcher: Some(dispatcher),
        }
    }

    pub fn submit(&self, source: PathBuf) -> Result<Uuid> {
        let sender = self.sender.as_ref().context("job queue is shut down")?;
        let job = JobRecord::new(source);
        self.store
            .upsert(&job)
            .with_context(|| format!("failed to record job {}", job.id))?;

        let id = job.id;
        info!("Queued job {} for {}", id, job.source.display());
        sender
            .send(job)
            .map_err(|_| anyhow!("job queue dispatcher has stopped"))?;
        Ok(id)
    }

    pub fn status(&self, raw_id: &str) -> StatusLookup {
        lookup(self.store.as_ref(), raw_id)
    }

    /// Stop accepting jobs, run everything already queued, wait for the
    /// workers to finish.
    pub async fn shutdown(mut self) {
        self.sender.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                error!("job dispatcher crashed: {}", e);
            }
        }
    }
}

// ── Dispatcher ──

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<JobRecord>,
    workers: usize,
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
) {
    let slots = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    while let Some(job) = rx.recv().await {
        while let Some(done) = running.try_join_next() {
            reap(done);
        }

        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let processing = job.processing();
        if let Err(e) = transition(store.as_ref(), &job, &processing) {
            error!("Job {}: {:#}", job.id, e);
            record_store_failure(store.as_ref(), &processing, &e);
            continue;
        }

        let store = Arc::clone(&store);
        let runner = Arc::clone(&runner);
        running.spawn(async move {
            let _permit = permit;
            run_job(store.as_ref(), runner, processing).await;
        });
    }

    while let Some(done) = running.join_next().await {
        reap(done);
    }
}

fn reap(done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!("job task aborted: {}", e);
    }
}

async fn run_job(store: &dyn JobStore, runner: Arc<dyn JobRunner>, job: JobRecord) {
    let worker_job = job.clone();
    let outcome = tokio::task::spawn_blocking(move || runner.run(&worker_job)).await;

    let finished = match outcome {
        Ok(Ok(download)) => {
            info!("Job {} completed: {}", job.id, download.download_url);
            job.completed(download)
        }
        Ok(Err(e)) => {
            warn!("Job {} failed: {:#}", job.id, e);
            job.failed(format!("{:#}", e))
        }
        Err(e) => {
            let msg = format!("worker panicked: {}", join_error_message(e));
            error!("Job {} {}", job.id, msg);
            job.failed(msg)
        }
    };
    if let Err(e) = transition(store, &job, &finished) {
        error!("Job {}: {:#}", job.id, e);
        record_store_failure(store, &job, &e);
    }
}

/// Write `next` if `current → next` is a legal move.
fn transition(store: &dyn JobStore, current: &JobRecord, next: &JobRecord) -> Result<()> {
    if !current.status.can_transition_to(next.status) {
        bail!("refusing transition {} -> {}", current.status, next.status);
    }
    store
        .upsert(next)
        .with_context(|| format!("failed to record {}", next.status))
}

/// Last attempt to leave a job terminal after a status write was lost.
/// `running` is the job as a worker holds it (`processing`).
fn record_store_failure(store: &dyn JobStore, running: &JobRecord, cause: &anyhow::Error) {
    let failed = running.failed(format!("status store error: {:#}", cause));
    if let Err(e) = store.upsert(&failed) {
        error!("Job {}: could not record failure either: {:#}", running.id, e);
    }
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    panic_text(e.into_panic())
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::MemoryJobStore;
    use crate::jobs::{JobStatus, JobSnapshot};
    use crate::storage::DownloadRef;
    use std::collections::HashMap;
    use std::sync::{Barrier, Mutex};

    /// Memory store that also keeps every status written per job.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryJobStore,
        history: Mutex<HashMap<Uuid, Vec<JobStatus>>>,
    }

    impl RecordingStore {
        fn history(&self, id: &Uuid) -> Vec<JobStatus> {
            self.history.lock().unwrap().get(id).cloned().unwrap_or_default()
        }
    }

    impl JobStore for RecordingStore {
        fn upsert(&self, record: &JobRecord) -> Result<()> {
            self.history
                .lock()
                .unwrap()
                .entry(record.id)
                .or_default()
                .push(record.status);
            self.inner.upsert(record)
        }

        fn get(&self, id: &Uuid) -> Result<Option<JobRecord>> {
            self.inner.get(id)
        }
    }

    /// Succeeds unless the source is named `bad` (error) or `panic`.
    #[derive(Default)]
    struct ScriptedRunner {
        order: Mutex<Vec<String>>,
    }

    impl JobRunner for ScriptedRunner {
        fn run(&self, job: &JobRecord) -> Result<DownloadRef> {
            self.order.lock().unwrap().push(job.output_stem.clone());
            match job.output_stem.as_str() {
                "bad" => Err(anyhow!("unreadable document")),
                "panic" => panic!("decoder exploded"),
                stem => Ok(DownloadRef {
                    filename: stem.to_string(),
                    download_url: format!("/download/{}.json", stem),
                }),
            }
        }
    }

    fn snapshot(queue: &JobQueue, id: &Uuid) -> JobSnapshot {
        match queue.status(&id.to_string()) {
            StatusLookup::Found(s) => s,
            other => panic!("job {} not found: {:?}", id, other),
        }
    }

    #[tokio::test]
    async fn job_walks_through_every_status() {
        let store = Arc::new(RecordingStore::default());
        let queue = JobQueue::start(2, store.clone(), Arc::new(ScriptedRunner::default()));

        let id = queue.submit(PathBuf::from("in/report.json")).unwrap();
        queue.shutdown().await;

        assert_eq!(
            store.history(&id),
            vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = JobQueue::start(2, store, Arc::new(ScriptedRunner::default()));

        let ok = queue.submit(PathBuf::from("good.json")).unwrap();
        let bad = queue.submit(PathBuf::from("bad.json")).unwrap();
        let boom = queue.submit(PathBuf::from("panic.json")).unwrap();
        let after = queue.submit(PathBuf::from("later.json")).unwrap();

        for _ in 0..500 {
            if [ok, bad, boom, after]
                .iter()
                .all(|id| snapshot(&queue, id).status.is_terminal())
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let status = |id: &Uuid| snapshot(&queue, id);

        let good = status(&ok);
        assert_eq!(good.status, JobStatus::Completed);
        assert_eq!(good.download_ref.unwrap().download_url, "/download/good.json");

        let failed = status(&bad);
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("unreadable document"));

        let panicked = status(&boom);
        assert_eq!(panicked.status, JobStatus::Failed);
        assert_eq!(panicked.error.as_deref(), Some("worker panicked: decoder exploded"));

        assert_eq!(status(&after).status, JobStatus::Completed);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn single_worker_runs_in_submission_order() {
        let runner = Arc::new(ScriptedRunner::default());
        let queue = JobQueue::start(1, Arc::new(MemoryJobStore::new()), runner.clone());
        for name in ["a", "b", "c", "d"] {
            queue.submit(PathBuf::from(format!("{}.json", name))).unwrap();
        }
        queue.shutdown().await;

        assert_eq!(*runner.order.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    /// Blocks until two jobs are inside `run` at the same time.
    struct RendezvousRunner {
        barrier: Barrier,
    }

    impl JobRunner for RendezvousRunner {
        fn run(&self, job: &JobRecord) -> Result<DownloadRef> {
            self.barrier.wait();
            Ok(DownloadRef {
                filename: job.output_stem.clone(),
                download_url: format!("/download/{}.json", job.output_stem),
            })
        }
    }

    #[tokio::test]
    async fn pool_runs_jobs_concurrently() {
        let store = Arc::new(MemoryJobStore::new());
        let runner = Arc::new(RendezvousRunner {
            barrier: Barrier::new(2),
        });
        let queue = JobQueue::start(2, store.clone(), runner);
        let a = queue.submit(PathBuf::from("a.json")).unwrap();
        let b = queue.submit(PathBuf::from("b.json")).unwrap();
        queue.shutdown().await;

        for id in [a, b] {
            assert_eq!(store.get(&id).unwrap().unwrap().status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn lookup_outcomes() {
        let queue = JobQueue::start(1, Arc::new(MemoryJobStore::new()), Arc::new(ScriptedRunner::default()));
        assert_eq!(queue.status(&Uuid::new_v4().to_string()), StatusLookup::NotFound);
        assert_eq!(queue.status("definitely-not-a-uuid"), StatusLookup::InvalidId);
        queue.shutdown().await;
    }

    #[test]
    fn refuses_illegal_transition() {
        let store = MemoryJobStore::new();
        let job = JobRecord::new(PathBuf::from("x.json"));
        let done = job.processing().completed(DownloadRef {
            filename: "x".into(),
            download_url: "/download/x.json".into(),
        });
        assert!(transition(&store, &job, &done).is_err());
        assert!(store.get(&job.id).unwrap().is_none());
        assert!(transition(&store, &job, &job.processing()).is_ok());
    }

    /// Rejects every write of one status; everything else goes through.
    struct RejectingStore {
        inner: MemoryJobStore,
        reject: JobStatus,
    }

    impl JobStore for RejectingStore {
        fn upsert(&self, record: &JobRecord) -> Result<()> {
            if record.status == self.reject {
                bail!("disk full");
            }
            self.inner.upsert(record)
        }

        fn get(&self, id: &Uuid) -> Result<Option<JobRecord>> {
            self.inner.get(id)
        }
    }

    #[tokio::test]
    async fn lost_processing_write_ends_failed() {
        let store = Arc::new(RejectingStore {
            inner: MemoryJobStore::new(),
            reject: JobStatus::Processing,
        });
        let runner = Arc::new(ScriptedRunner::default());
        let queue = JobQueue::start(1, store.clone(), runner.clone());
        let id = queue.submit(PathBuf::from("a.json")).unwrap();
        queue.shutdown().await;

        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("disk full"));
        assert!(runner.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_completion_write_ends_failed() {
        let store = Arc::new(RejectingStore {
            inner: MemoryJobStore::new(),
            reject: JobStatus::Completed,
        });
        let queue = JobQueue::start(2, store.clone(), Arc::new(ScriptedRunner::default()));
        let id = queue.submit(PathBuf::from("a.json")).unwrap();
        queue.shutdown().await;

        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("status store error"));
    }
}
