//! Worker pool that resolves glyphs off the render thread.
//!
//! Jobs go through one bounded queue shared by every worker, so a caller that
//! submits faster than the workers drain blocks instead of growing memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::config::WorkerConfig;
use crate::engine::{GlyphEngine, GlyphReference};
use crate::error::{EngineError, Result};
use crate::glyph::GlyphIdentity;
use crate::gpu::RenderDevice;

/// Outcome of one warmed glyph.
#[derive(Debug)]
pub struct WarmResult {
    pub identity: GlyphIdentity,
    pub result: Result<GlyphReference>,
}

struct Job {
    identity: GlyphIdentity,
    reply: Sender<WarmResult>,
}

/// Fixed set of threads resolving glyphs against one engine.
pub struct GlyphWorkers {
    jobs: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    completed: Arc<AtomicU64>,
}

impl GlyphWorkers {
    pub fn spawn<D: RenderDevice + 'static>(engine: Arc<GlyphEngine<D>>, config: WorkerConfig) -> Self {
        let threads = config.threads.max(1);
        let (jobs, queue) = crossbeam_channel::bounded::<Job>(config.queue_capacity.max(1));
        let completed = Arc::new(AtomicU64::new(0));

        let handles = (0..threads)
            .map(|index| {
                let engine = engine.clone();
                let queue = queue.clone();
                let completed = completed.clone();
                thread::Builder::new()
                    .name(format!("glyph-worker-{index}"))
                    .spawn(move || worker_loop(&engine, &queue, &completed))
            })
            .filter_map(|spawned| {
                spawned
                    .inspect_err(|e| tracing::warn!(error = %e, "failed to spawn glyph worker"))
                    .ok()
            })
            .collect::<Vec<_>>();

        tracing::info!(threads = handles.len(), capacity = config.queue_capacity, "started glyph workers");
        Self {
            jobs: Some(jobs),
            handles,
            completed,
        }
    }

    /// Queue `identities` for resolution.
    ///
    /// Each identity produces one [`WarmResult`] on the returned receiver, in
    /// completion order. Blocks while the queue is full.
    pub fn warm(&self, identities: impl IntoIterator<Item = GlyphIdentity>) -> Result<Receiver<WarmResult>> {
        let jobs = match &self.jobs {
            Some(jobs) if !self.handles.is_empty() => jobs,
            _ => return Err(EngineError::WorkersStopped),
        };

        let (reply, results) = crossbeam_channel::unbounded();
        for identity in identities {
            jobs.send(Job {
                identity,
                reply: reply.clone(),
            })
            .map_err(|_| EngineError::WorkersStopped)?;
        }
        Ok(results)
    }

    /// Number of running worker threads.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Jobs finished since the pool started.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Let the workers drain the queue, then join them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Workers exit once the queue is empty and every sender is gone.
        self.jobs.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("glyph worker panicked");
            }
        }
    }
}

impl Drop for GlyphWorkers {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<D: RenderDevice>(engine: &GlyphEngine<D>, queue: &Receiver<Job>, completed: &AtomicU64) {
    for Job { identity, reply } in queue.iter() {
        let result = engine.resolve(&identity);
        completed.fetch_add(1, Ordering::Relaxed);
        // The caller may have dropped its receiver; the glyph is cached either way.
        let _ = reply.send(WarmResult { identity, result });
    }
    tracing::debug!("glyph worker stopped");
}
