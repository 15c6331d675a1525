//! Background build worker
//!
//! One thread runs every build (file reads, resampling, partitioning) and
//! frees the states the audio thread retires, so neither allocation nor
//! deallocation of a convolution state ever happens in the audio callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dsp::partitioned::ConvolutionState;
use crate::engine::controller::{BuildEvent, BuildFailure, BuildRequest, EventQueue, Shared};
use crate::error::{ConvolverError, Result};

/// One scheduled build
pub(crate) struct BuildJob {
    convolver: String,
    generation: u64,
    request: BuildRequest,
    shared: Arc<Shared>,
    events: EventQueue,
}

impl BuildJob {
    pub(crate) fn new(
        convolver: String,
        generation: u64,
        request: BuildRequest,
        shared: Arc<Shared>,
        events: EventQueue,
    ) -> Self {
        Self {
            convolver,
            generation,
            request,
            shared,
            events,
        }
    }

    /// Mark the controller failed and notify, if this job is still current
    pub(crate) fn report_failure(&self, error: &ConvolverError) -> bool {
        let failure = BuildFailure::new(self.generation, &self.request, error);
        if !self.shared.fail(failure.clone()) {
            return false;
        }
        self.events.push(BuildEvent::Failed(failure));
        true
    }

    fn run(self, stats: &WorkerStats) {
        let generation = self.generation;
        if !self.shared.is_current(generation) {
            debug!(convolver = %self.convolver, generation, "skipping superseded build");
            stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let started = Instant::now();
        match self.request.build() {
            Ok(state) => {
                let block_size = state.block_size();
                let partitions = state.partition_count();
                match self.shared.publish(generation, Box::new(state)) {
                    Ok(()) => {
                        stats.built.fetch_add(1, Ordering::Relaxed);
                        info!(
                            convolver = %self.convolver,
                            generation,
                            block_size,
                            partitions,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "convolution state published"
                        );
                        self.events.push(BuildEvent::Published {
                            generation,
                            block_size,
                            partitions,
                        });
                    }
                    Err(_stale) => {
                        stats.discarded.fetch_add(1, Ordering::Relaxed);
                        debug!(convolver = %self.convolver, generation, "discarding superseded build");
                    }
                }
            }
            Err(error) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    convolver = %self.convolver,
                    generation,
                    source = %self.request.source,
                    error = %error,
                    "convolution build failed"
                );
                if !self.report_failure(&error) {
                    debug!(convolver = %self.convolver, generation, "failure of superseded build ignored");
                }
            }
        }
    }
}

/// Counters of the worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    built: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    retired: AtomicU64,
}

impl WorkerStats {
    /// Builds that were published
    pub fn built(&self) -> u64 {
        self.built.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Builds skipped or thrown away because a newer request arrived
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// States freed after the audio thread let go of them
    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }
}

/// Cloneable access to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: Sender<Box<BuildJob>>,
    retire: Sender<Box<ConvolutionState>>,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("queued_jobs", &self.jobs.len())
            .field("queued_retirements", &self.retire.len())
            .finish()
    }
}

impl WorkerHandle {
    /// Queue a build; gives the job back if the worker has shut down
    pub(crate) fn submit(&self, job: BuildJob) -> std::result::Result<(), BuildJob> {
        self.jobs
            .send(Box::new(job))
            .map_err(|e| *e.into_inner())
    }

    pub(crate) fn retire_sender(&self) -> Sender<Box<ConvolutionState>> {
        self.retire.clone()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

/// The background thread shared by all convolvers of an engine
pub struct BuildWorker {
    handle: WorkerHandle,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BuildWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildWorker")
            .field("handle", &self.handle)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl BuildWorker {
    /// Start the worker thread
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        let (jobs_tx, jobs_rx) = unbounded();
        let (retire_tx, retire_rx) = bounded(config.retire_queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let stats = Arc::new(WorkerStats::default());

        let thread_stats = Arc::clone(&stats);
        let thread = thread::Builder::new()
            .name("ampconv-build".to_string())
            .spawn(move || worker_loop(jobs_rx, retire_rx, shutdown_rx, &thread_stats))?;

        debug!(retire_queue_depth = config.retire_queue_depth, "build worker started");
        Ok(Self {
            handle: WorkerHandle {
                jobs: jobs_tx,
                retire: retire_tx,
                stats,
            },
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> &WorkerStats {
        self.handle.stats()
    }

    /// Stop the thread; builds still queued are dropped unrun
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.shutdown.send(());
            if thread.join().is_err() {
                warn!("build worker panicked");
            }
            debug!("build worker stopped");
        }
    }
}

impl Drop for BuildWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut jobs: Receiver<Box<BuildJob>>,
    mut retired: Receiver<Box<ConvolutionState>>,
    shutdown: Receiver<()>,
    stats: &WorkerStats,
) {
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(jobs) -> job => match job {
                Ok(job) => (*job).run(stats),
                Err(_) => jobs = never(),
            },
            recv(retired) -> state => match state {
                Ok(state) => {
                    drop(state);
                    stats.retired.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => retired = never(),
            },
        }
    }

    while let Ok(state) = retired.try_recv() {
        drop(state);
        stats.retired.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_frees_retired_states() {
        let worker = BuildWorker::spawn(&EngineConfig::default()).unwrap();
        let retire = worker.handle().retire_sender();
        for _ in 0..3 {
            let state = ConvolutionState::build(&[1.0, 0.5], 48000, 32).unwrap();
            retire.send(Box::new(state)).unwrap();
        }

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while worker.stats().retired() < 3 && Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(worker.stats().retired(), 3);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut worker = BuildWorker::spawn(&EngineConfig::default()).unwrap();
        worker.shutdown();
        worker.shutdown();
    }
}
