use std::{sync::Arc, time::Duration};

use shared::domain::CourseId;
use tokio::{
    sync::{mpsc, Mutex},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    navigation::{LoadOrigin, LoadOutcome},
    LearningEngine, Phase,
};

/// Fixed-interval pacing shared by the background and navigation load paths:
/// a request may start no sooner than `interval` after the last mark.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    last_mark: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_mark: Mutex::new(None),
        }
    }

    /// Waits out the interval. A mark made while sleeping extends the wait.
    pub async fn ready(&self) {
        loop {
            let deadline = match *self.last_mark.lock().await {
                Some(last) => last + self.interval,
                None => return,
            };
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }

    pub async fn mark(&self) {
        *self.last_mark.lock().await = Some(Instant::now());
    }
}

#[derive(Debug)]
pub(crate) struct PrefetchJob {
    course_id: CourseId,
}

impl LearningEngine {
    /// Queues background generation of every module after the first.
    pub(crate) async fn enqueue_prefetch(self: &Arc<Self>, course_id: CourseId) {
        let mut sender = self.prefetch_tx.lock().await;
        if let Some(tx) = sender.as_ref() {
            if tx.send(PrefetchJob { course_id }).is_ok() {
                return;
            }
            warn!("prefetch: worker gone, restarting");
        }
        let tx = self.spawn_prefetch_worker();
        if tx.send(PrefetchJob { course_id }).is_err() {
            warn!(course_id = %course_id, "prefetch: failed to queue job");
        }
        *sender = Some(tx);
    }

    fn spawn_prefetch_worker(self: &Arc<Self>) -> mpsc::UnboundedSender<PrefetchJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PrefetchJob>();
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_prefetch_job(job).await;
            }
            debug!("prefetch: worker stopped");
        });
        tx
    }

    async fn run_prefetch_job(self: &Arc<Self>, job: PrefetchJob) {
        let course_id = job.course_id;
        let Some(module_count) = self.module_count(course_id).await else {
            return;
        };
        info!(course_id = %course_id, module_count, "prefetch: starting");

        for module_index in 1..module_count {
            match self.module_loaded(course_id, module_index).await {
                None => {
                    info!(course_id = %course_id, "prefetch: course replaced, stopping");
                    return;
                }
                Some(true) => {
                    debug!(module_index, "prefetch: already loaded, skipping");
                    // A skipped slot still spaces out the next call.
                    self.pacer.mark().await;
                    continue;
                }
                Some(false) => {}
            }

            self.pacer.ready().await;
            match self
                .load_module(course_id, module_index, LoadOrigin::Prefetch)
                .await
            {
                Ok(LoadOutcome::Loaded) => {
                    info!(course_id = %course_id, module_index, "prefetch: module ready");
                    self.enrich_if_viewing(course_id, module_index).await;
                }
                Ok(LoadOutcome::AlreadyLoaded) => {
                    debug!(module_index, "prefetch: loaded by another path, skipping");
                }
                Ok(LoadOutcome::Stale) => {
                    info!(course_id = %course_id, "prefetch: course replaced, stopping");
                    return;
                }
                Err(err) => {
                    warn!(
                        course_id = %course_id,
                        module_index,
                        error = %err,
                        "prefetch: module generation failed, continuing"
                    );
                }
            }
        }
        info!(course_id = %course_id, "prefetch: finished");
    }

    async fn module_count(&self, course_id: CourseId) -> Option<usize> {
        let state = self.inner.lock().await;
        state
            .active_course(course_id)
            .map(|course| course.modules.len())
    }

    async fn module_loaded(&self, course_id: CourseId, module_index: usize) -> Option<bool> {
        let state = self.inner.lock().await;
        state
            .active_course(course_id)
            .and_then(|course| course.modules.get(module_index))
            .map(|module| module.loaded)
    }

    async fn enrich_if_viewing(self: &Arc<Self>, course_id: CourseId, module_index: usize) {
        let viewing = {
            let state = self.inner.lock().await;
            state.phase == Phase::Learning
                && state.position.module_index == module_index
                && state.active_course(course_id).is_some()
        };
        if viewing {
            self.spawn_enrichment(course_id, module_index);
        }
    }
}

#[cfg(test)]
#[path = "tests/prefetch_tests.rs"]
mod tests;
