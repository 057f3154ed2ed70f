use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::error::{MapviewError, MapviewResult};
use crate::scheduler::{Dispatch, FetchCompletion, FetchJob, FetchOutcome};
use crate::source::TileSource;

/// Fixed pool of fetch threads. Jobs go out round-robin, completions come
/// back on a single channel drained by the owning thread.
pub struct TileFetcher {
    senders: Vec<Sender<FetchJob>>,
    next: usize,
}

impl TileFetcher {
    pub fn new(
        source: Arc<dyn TileSource>,
        worker_count: usize,
    ) -> MapviewResult<(Self, Receiver<FetchCompletion>)> {
        let worker_count = worker_count.max(1);
        let (result_tx, result_rx) = mpsc::channel();
        let mut senders = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (job_tx, job_rx) = mpsc::channel();
            senders.push(job_tx);
            spawn_worker(index, job_rx, result_tx.clone(), Arc::clone(&source))?;
        }
        tracing::debug!(worker_count, "tile fetch workers started");
        Ok((Self { senders, next: 0 }, result_rx))
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }
}

impl Dispatch for TileFetcher {
    fn dispatch(&mut self, job: FetchJob) -> bool {
        if self.senders.is_empty() {
            return false;
        }
        let idx = self.next % self.senders.len();
        self.next = self.next.wrapping_add(1);
        self.senders[idx].send(job).is_ok()
    }
}

fn spawn_worker(
    index: usize,
    receiver: Receiver<FetchJob>,
    sender: Sender<FetchCompletion>,
    source: Arc<dyn TileSource>,
) -> MapviewResult<()> {
    thread::Builder::new()
        .name(format!("tile-fetch-{index}"))
        .spawn(move || {
            while let Ok(job) = receiver.recv() {
                let outcome = run_job(&job, source.as_ref());
                if sender.send(job.complete(outcome)).is_err() {
                    break;
                }
            }
        })
        .map(|_| ())
        .map_err(|err| MapviewError::internal(format!("failed to spawn fetch worker: {err}")))
}

pub(crate) fn run_job(job: &FetchJob, source: &dyn TileSource) -> FetchOutcome {
    if job.cancel.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    let bytes = match source.fetch(&job.query, &job.cancel) {
        Ok(bytes) => bytes,
        Err(_) if job.cancel.is_cancelled() => return FetchOutcome::Cancelled,
        Err(err) => return FetchOutcome::Failed(err),
    };
    if job.cancel.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    let image = match image::load_from_memory(&bytes) {
        Ok(image) => image.to_rgba8(),
        Err(err) => return FetchOutcome::Failed(err.into()),
    };
    if job.cancel.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    FetchOutcome::Loaded(image)
}
