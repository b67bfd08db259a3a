//! Background work queue for generation, continuation and prompt evolution.
//!
//! Callers submit a [`Job`] and get a [`JobHandle`] back immediately. One
//! dispatcher task drains the channel and runs every job in its own tokio
//! task, so sessions interleave while each session's batches stay
//! sequential inside the orchestrator.
//!
//! Each job runs behind an error boundary. A panic is caught through the
//! task's `JoinHandle`; it and any `Err` raised after the run started are
//! turned into a terminal session status so nothing stays in PROCESSING.

use crate::config::PageSelection;
use crate::error::ForgeError;
use crate::evolution::PromptEvolutionAdvisor;
use crate::generate::Generator;
use crate::model::SessionStatus;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of background work.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Generate {
        session_id: i64,
    },
    Continue {
        session_id: i64,
        focus: Option<String>,
        pages: Option<PageSelection>,
    },
    Evolve {
        session_id: i64,
    },
}

impl Job {
    pub fn session_id(&self) -> i64 {
        match self {
            Job::Generate { session_id }
            | Job::Continue { session_id, .. }
            | Job::Evolve { session_id } => *session_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Job::Generate { .. } => "generate",
            Job::Continue { .. } => "continue",
            Job::Evolve { .. } => "evolve",
        }
    }
}

/// Final result of a job as seen by whoever submitted it.
pub type JobResult = Result<(), String>;

/// Resolves once the submitted job has finished.
#[derive(Debug)]
pub struct JobHandle {
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    /// Wait for the job. A dropped queue counts as a failure.
    pub async fn wait(self) -> JobResult {
        self.rx
            .await
            .unwrap_or_else(|_| Err("task queue shut down before the job finished".to_string()))
    }
}

struct Envelope {
    job: Job,
    done: oneshot::Sender<JobResult>,
}

/// Sender side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl TaskQueue {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    ///
    /// The dispatcher exits once every `TaskQueue` clone is dropped.
    pub fn start(generator: Generator, advisor: PromptEvolutionAdvisor) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let dispatcher = tokio::spawn(async move {
            info!("Task queue started");
            while let Some(Envelope { job, done }) = rx.recv().await {
                debug!(job = job.label(), session_id = job.session_id(), "Dispatching job");
                let generator = generator.clone();
                let advisor = advisor.clone();
                tokio::spawn(async move {
                    let result = run_guarded(job, generator, advisor).await;
                    let _ = done.send(result);
                });
            }
            info!("Task queue stopped");
        });
        (Self { tx }, dispatcher)
    }

    pub fn submit(&self, job: Job) -> Result<JobHandle, ForgeError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Envelope { job, done })
            .map_err(|_| ForgeError::Internal("task queue is not running".to_string()))?;
        Ok(JobHandle { rx })
    }
}

/// Run one job in its own task and contain any failure.
async fn run_guarded(job: Job, generator: Generator, advisor: PromptEvolutionAdvisor) -> JobResult {
    let label = job.label();
    let session_id = job.session_id();
    let worker = {
        let job = job.clone();
        let generator = generator.clone();
        tokio::spawn(async move { run_job(job, &generator, &advisor).await })
    };

    match worker.await {
        Ok(Ok(())) => {
            info!(job = label, session_id, "Job finished");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(job = label, session_id, "Job failed: {}", e);
            // A refused start leaves the session to whoever owns it.
            if !matches!(e, ForgeError::InvalidTransition { .. } | ForgeError::NotFound { .. }) {
                if let Err(settle) = settle_after_crash(&job, &generator, &e.to_string()) {
                    error!(session_id, "Could not settle session after failure: {}", settle);
                }
            }
            Err(e.to_string())
        }
        Err(join) => {
            let detail = if join.is_panic() {
                "job panicked".to_string()
            } else {
                format!("job was cancelled: {join}")
            };
            error!(job = label, session_id, "{}", detail);
            if let Err(e) = settle_after_crash(&job, &generator, &detail) {
                error!(session_id, "Could not settle session after crash: {}", e);
            }
            Err(detail)
        }
    }
}

async fn run_job(job: Job, generator: &Generator, advisor: &PromptEvolutionAdvisor) -> Result<(), ForgeError> {
    match job {
        Job::Generate { session_id } => {
            let session = generator.run_initial_generation(session_id).await?;
            if session.status == SessionStatus::Failed {
                warn!(
                    session_id,
                    "Generation failed: {}",
                    session.metadata.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Job::Continue {
            session_id,
            focus,
            pages,
        } => {
            generator
                .run_continuation(session_id, focus.as_deref(), pages)
                .await?;
            Ok(())
        }
        Job::Evolve { session_id } => {
            advisor.analyze_session(session_id).await?;
            Ok(())
        }
    }
}

/// Move a session left in PROCESSING by a crashed job to its terminal state.
fn settle_after_crash(job: &Job, generator: &Generator, detail: &str) -> Result<(), ForgeError> {
    let target = match job {
        Job::Generate { .. } => SessionStatus::Failed,
        Job::Continue { .. } => SessionStatus::Ready,
        Job::Evolve { .. } => return Ok(()),
    };
    let store = generator.store();
    let session = store.require_session(job.session_id())?;
    if session.status != SessionStatus::Processing {
        return Ok(());
    }
    let mut metadata = session.metadata.clone();
    metadata.errors.push(detail.to_string());
    if target == SessionStatus::Failed {
        metadata.error = Some(detail.to_string());
    }
    store.finish_run(session.id, target, &metadata, Utc::now())
}
