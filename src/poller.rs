//! Task poller: tracks one backend job until it finishes, fails or times out

use crate::backend::AnalysisBackend;
use crate::config::PollerConfig;
use crate::error::JobError;
use crate::types::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress reported to the owner of the poller
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Phase { task_id: String, phase: JobPhase },
    Done { task_id: String, result: RawAnalysisResult },
    Failed { task_id: String, error: JobError },
}

impl PollUpdate {
    pub fn task_id(&self) -> &str {
        match self {
            PollUpdate::Phase { task_id, .. }
            | PollUpdate::Done { task_id, .. }
            | PollUpdate::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollUpdate::Phase { .. })
    }
}

#[derive(Debug)]
enum PollEvent {
    Phase(JobPhase),
    Done(RawAnalysisResult),
    Failed(JobError),
}

/// Event from a poll loop, tagged with the start() call that spawned it
#[derive(Debug)]
struct PollMessage {
    generation: u64,
    event: PollEvent,
}

struct ActivePoll {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the lifecycle of at most one polling loop.
///
/// Every exit path (done, failed, timeout, `stop()`, restart, drop)
/// cancels the loop. Updates from a cancelled loop are dropped because
/// their generation no longer matches.
pub struct TaskPoller {
    backend: Arc<dyn AnalysisBackend>,
    config: PollerConfig,
    job: Option<JobState>,
    active: Option<ActivePoll>,
    generation: u64,
    tx: mpsc::UnboundedSender<PollMessage>,
    rx: mpsc::UnboundedReceiver<PollMessage>,
}

impl TaskPoller {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: PollerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            backend,
            config,
            job: None,
            active: None,
            generation: 0,
            tx,
            rx,
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Begin tracking `task_id`, cancelling any loop already running.
    ///
    /// The wait ceiling counts from this call. Must be called from within a
    /// tokio runtime.
    pub fn start(&mut self, task_id: impl Into<String>) -> Result<(), JobError> {
        self.stop();
        self.config.validate().map_err(JobError::Polling)?;

        let task_id = task_id.into();
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let job = JobState::new(task_id.clone());

        info!("Polling task {} every {:?}", task_id, self.config.interval);

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.backend),
            task_id,
            generation,
            job.started_at,
            self.config,
            cancel.clone(),
            self.tx.clone(),
        ));

        self.job = Some(job);
        self.active = Some(ActivePoll {
            generation,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Cancel the live loop, if any, and forget the tracked job
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.handle.abort();
            if let Some(job) = &self.job {
                debug!("Stopped polling task {}", job.task_id);
            }
        }
        self.job = None;
    }

    pub fn is_polling(&self) -> bool {
        self.active.is_some()
    }

    pub fn job(&self) -> Option<&JobState> {
        self.job.as_ref()
    }

    pub fn task_id(&self) -> Option<&str> {
        self.job.as_ref().map(|j| j.task_id.as_str())
    }

    /// Wait for the next update of the tracked job.
    ///
    /// Returns `None` immediately when no job is being tracked. A loop that
    /// ends without reporting an outcome (a panicking backend, say) fails
    /// the job.
    pub async fn next_update(&mut self) -> Option<PollUpdate> {
        loop {
            let woke = {
                let active = self.active.as_mut()?;
                tokio::select! {
                    biased;
                    message = self.rx.recv() => Ok(message),
                    joined = &mut active.handle => Err(joined),
                }
            };
            match woke {
                Ok(Some(message)) => {
                    if let Some(update) = self.apply(message) {
                        return Some(update);
                    }
                }
                Ok(None) => return None,
                Err(joined) => return self.loop_exited(exit_reason(joined)),
            }
        }
    }

    /// Non-blocking variant of [`next_update`](Self::next_update)
    pub fn try_next_update(&mut self) -> Option<PollUpdate> {
        while let Ok(message) = self.rx.try_recv() {
            if let Some(update) = self.apply(message) {
                return Some(update);
            }
        }
        let finished = self.active.as_ref().is_some_and(|a| a.handle.is_finished());
        if finished {
            return self.loop_exited("status polling stopped unexpectedly".to_string());
        }
        None
    }

    /// The live loop's task has ended: report what it queued, or fail the job
    fn loop_exited(&mut self, reason: String) -> Option<PollUpdate> {
        while let Ok(message) = self.rx.try_recv() {
            if let Some(update) = self.apply(message) {
                if update.is_terminal() {
                    return Some(update);
                }
            }
        }

        let task_id = self.task_id().map(str::to_string);
        self.finish();
        let task_id = task_id?;
        warn!("Task {} lost its poll loop: {}", task_id, reason);
        Some(PollUpdate::Failed {
            task_id,
            error: JobError::Polling(reason),
        })
    }

    fn apply(&mut self, message: PollMessage) -> Option<PollUpdate> {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(message.generation) {
            debug!("Dropping stale poll update from generation {}", message.generation);
            return None;
        }
        let job = self.job.as_mut()?;
        let task_id = job.task_id.clone();

        match message.event {
            PollEvent::Phase(phase) => {
                info!("Task {} is {}", task_id, phase);
                job.phase = phase;
                Some(PollUpdate::Phase { task_id, phase })
            }
            PollEvent::Done(result) => {
                job.phase = JobPhase::Done;
                job.result = Some(result);
                info!("Task {} finished", task_id);
                let result = self.finish().and_then(|j| j.result).unwrap_or_default();
                Some(PollUpdate::Done { task_id, result })
            }
            PollEvent::Failed(error) => {
                job.phase = JobPhase::Failed;
                job.error = Some(error.message());
                warn!("Task {} failed: {}", task_id, error);
                self.finish();
                Some(PollUpdate::Failed { task_id, error })
            }
        }
    }

    /// Terminal transition: release the loop and clear the job
    fn finish(&mut self) -> Option<JobState> {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.job.take()
    }
}

impl Drop for TaskPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn exit_reason(joined: Result<(), JoinError>) -> String {
    match joined {
        Err(e) if e.is_panic() => "status polling crashed".to_string(),
        Err(e) => format!("status polling stopped: {}", e),
        Ok(()) => "status polling stopped unexpectedly".to_string(),
    }
}

async fn poll_loop(
    backend: Arc<dyn AnalysisBackend>,
    task_id: String,
    generation: u64,
    started: Instant,
    config: PollerConfig,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<PollMessage>,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_phase: Option<JobPhase> = None;

    let send = |event| {
        // The receiver only goes away with the poller, which cancels us first
        let _ = tx.send(PollMessage { generation, event });
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if started.elapsed() >= config.max_wait {
            warn!("Task {} exceeded {:?}, giving up", task_id, config.max_wait);
            send(PollEvent::Failed(JobError::Timeout {
                waited: config.max_wait,
            }));
            return;
        }

        debug!("Checking status of task {}", task_id);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            response = backend.get_job_status(&task_id) => response,
        };

        let event = match response {
            Ok(status) => match status.status {
                JobPhase::Done => PollEvent::Done(status.result.unwrap_or_default()),
                JobPhase::Failed => PollEvent::Failed(JobError::from_failed_status(status.error)),
                phase => {
                    if last_phase != Some(phase) {
                        last_phase = Some(phase);
                        send(PollEvent::Phase(phase));
                    }
                    continue;
                }
            },
            // No retry: any status-check error ends the job
            Err(e) => PollEvent::Failed(JobError::from_status_check(&task_id, e)),
        };

        send(event);
        return;
    }
}
