//! Startup wiring.
//!
//! [`App::open`] is the one place that touches the outside world before work
//! is accepted: it creates the data directories, opens the store, seeds the
//! built-in prompts, forces stale PROCESSING sessions to FAILED and starts
//! the background queue. Everything after that goes through the components
//! it exposes.

use crate::config::{ForgeConfig, PageSelection};
use crate::error::ForgeError;
use crate::evolution::PromptEvolutionAdvisor;
use crate::generate::Generator;
use crate::model::Session;
use crate::pipeline::pdf::PdfEngine;
use crate::prompts::default_prompt_seeds;
use crate::review::ReviewWorkflow;
use crate::store::Store;
use crate::tasks::{Job, JobHandle, TaskQueue};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug)]
pub struct App {
    config: Arc<ForgeConfig>,
    store: Store,
    generator: Generator,
    review: ReviewWorkflow,
    advisor: PromptEvolutionAdvisor,
    tasks: TaskQueue,
    dispatcher: JoinHandle<()>,
}

impl App {
    /// Open the store under `config.data_dir` and start the task queue.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: ForgeConfig) -> Result<Self, ForgeError> {
        config.ensure_dirs()?;
        let store = Store::open(&config.database_path())?;
        Self::with_store(config, store, None)
    }

    /// Like [`App::open`] with an existing store and an optional PDF backend.
    pub fn with_store(
        config: ForgeConfig,
        store: Store,
        pdf: Option<Arc<dyn PdfEngine>>,
    ) -> Result<Self, ForgeError> {
        let seeded = store.seed_prompts(&default_prompt_seeds())?;
        if seeded > 0 {
            info!("Seeded {} built-in prompt version(s)", seeded);
        }
        let recovered = store.recover_stuck_sessions()?;
        if recovered > 0 {
            warn!("Marked {} interrupted session(s) as failed", recovered);
        }

        let config = Arc::new(config);
        let mut generator = Generator::new(store.clone(), Arc::clone(&config));
        if let Some(engine) = pdf {
            generator = generator.with_pdf_engine(engine);
        }
        let review = ReviewWorkflow::new(store.clone(), Arc::clone(&config));
        let advisor = PromptEvolutionAdvisor::new(store.clone(), Arc::clone(&config));
        let (tasks, dispatcher) = TaskQueue::start(generator.clone(), advisor.clone());

        Ok(Self {
            config,
            store,
            generator,
            review,
            advisor,
            tasks,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn review(&self) -> &ReviewWorkflow {
        &self.review
    }

    pub fn advisor(&self) -> &PromptEvolutionAdvisor {
        &self.advisor
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Queue initial generation for a registered session.
    pub fn start_generation(&self, session_id: i64) -> Result<JobHandle, ForgeError> {
        self.store.require_session(session_id)?;
        self.tasks.submit(Job::Generate { session_id })
    }

    /// Queue a continuation pass.
    pub fn continue_generation(
        &self,
        session_id: i64,
        focus: Option<String>,
        pages: Option<PageSelection>,
    ) -> Result<JobHandle, ForgeError> {
        self.store.require_session(session_id)?;
        self.tasks.submit(Job::Continue {
            session_id,
            focus,
            pages,
        })
    }

    /// Finalize a session and queue prompt evolution for it.
    pub fn finalize(&self, session_id: i64) -> Result<(Session, JobHandle), ForgeError> {
        let session = self.generator.finalize_session(session_id)?;
        let handle = self.tasks.submit(Job::Evolve { session_id })?;
        Ok((session, handle))
    }

    /// Stop accepting work and wait for the dispatcher to drain.
    ///
    /// Jobs already dispatched keep running on the runtime.
    pub async fn shutdown(self) {
        let App {
            tasks, dispatcher, ..
        } = self;
        drop(tasks);
        if let Err(e) = dispatcher.await {
            warn!("Task dispatcher ended abnormally: {}", e);
        }
    }
}
