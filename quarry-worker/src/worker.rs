//! The worker lifecycle engine
//!
//! A worker prunes dead registrations from its host, registers itself, then
//! repeatedly reserves one job from its resolved queues and runs it in an
//! isolated context until shutdown. Shutdown and pause requests arrive
//! through a [`ShutdownCoordinator`] and are observed between jobs and while
//! a job is supervised.

use chrono::{DateTime, Utc};
use quarry_config::{Validatable, WorkerConfig};
use quarry_core::{
    CancelFlag, FailureRecord, IsolationMode, Job, JobError, JobRegistry, Payload, WorkerId,
};
use quarry_execution::{
    spawn_isolated, supervise, ExecutionOutcome, ExecutionState, Launch, StateTracker, Supervision,
    TermPolicy,
};
use quarry_resilience::{ProcessProbe, ShutdownCoordinator, ShutdownHandle, ShutdownSignal, SystemProbe};
use quarry_store::{Store, StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::error::WorkerResult;
use crate::failure::FailureTracker;
use crate::hooks::{run_failure_hooks, Hooks};
use crate::queues::QueueResolver;
use crate::registry::{WorkerInfo, WorkerRegistry};

/// Run-time flags of a worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub isolation: IsolationMode,
    /// Forward SIGTERM to the running job on an immediate shutdown
    pub term_child: bool,
    pub term_timeout: Duration,
    pub verbose: bool,
    pub very_verbose: bool,
    /// Listen for QUIT/TERM/INT/USR1/USR2/CONT while working
    pub install_signal_handlers: bool,
    /// How often a running job is checked for exit
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            isolation: config.isolation,
            term_child: config.term_child,
            term_timeout: config.term_timeout,
            verbose: config.verbose,
            very_verbose: config.very_verbose,
            install_signal_handlers: config.install_signal_handlers,
            poll_interval: TermPolicy::default().poll_interval,
        }
    }
}

pub struct Worker {
    id: WorkerId,
    name: String,
    resolver: QueueResolver,
    store: Arc<dyn Store>,
    jobs: Arc<JobRegistry>,
    hooks: Arc<Hooks>,
    options: WorkerOptions,
    probe: Arc<dyn ProcessProbe>,
    coordinator: Arc<ShutdownCoordinator>,
    state: StateTracker,
    registry: WorkerRegistry,
    failures: FailureTracker,
}

impl Worker {
    /// Create a worker for `queues`. Blank entries are dropped; an empty
    /// list fails before the store is touched.
    pub fn new<I, S>(queues: I, store: Arc<dyn Store>, jobs: Arc<JobRegistry>) -> WorkerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolver = QueueResolver::new(queues)?;
        let id = WorkerId::current(resolver.configured().to_vec());

        Ok(Self {
            name: id.to_string(),
            id,
            resolver,
            registry: WorkerRegistry::new(Arc::clone(&store)),
            failures: FailureTracker::new(Arc::clone(&store)),
            store,
            jobs,
            hooks: Arc::new(Hooks::default()),
            options: WorkerOptions::default(),
            probe: Arc::new(SystemProbe),
            coordinator: Arc::new(ShutdownCoordinator::new()),
            state: StateTracker::new(),
        })
    }

    pub fn from_config(
        config: &WorkerConfig,
        store: Arc<dyn Store>,
        jobs: Arc<JobRegistry>,
    ) -> WorkerResult<Self> {
        config.validate()?;
        Ok(Self::new(&config.queues, store, jobs)?.with_options(WorkerOptions::from(config)))
    }

    pub fn with_hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Override the identity, for embedding several workers in one process
    pub fn with_id(mut self, id: WorkerId) -> Self {
        self.name = id.to_string();
        self.id = id;
        self
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn state(&self) -> ExecutionState {
        self.state.get()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.coordinator.handle()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Queues in the order the next reservation pass will poll them
    pub async fn queues(&self) -> StoreResult<Vec<String>> {
        self.resolver.resolve(self.store.as_ref()).await
    }

    /// Pop the first available job from the resolved queues
    ///
    /// A queue whose pop fails is skipped for this pass. An item that was
    /// popped but could not be decoded becomes a failure record.
    pub async fn reserve(&self) -> WorkerResult<Option<Job>> {
        for queue in self.queues().await? {
            debug!(worker = %self.name, queue = %queue, "Checking queue");
            match self.store.pop(&queue).await {
                Ok(Some(payload)) => {
                    debug!(worker = %self.name, queue = %queue, class = %payload.class, "Found job");
                    return Ok(Some(Job::new(queue, payload)));
                }
                Ok(None) => {}
                Err(StoreError::MalformedPayload { queue, raw, message }) => {
                    warn!(worker = %self.name, queue = %queue, error = %message, "Discarding malformed payload");
                    let record = FailureRecord::new(
                        &JobError::malformed_payload(message),
                        Payload::malformed(raw),
                        queue,
                        self.name.clone(),
                    );
                    self.failures.create(&record).await;
                }
                Err(e) => {
                    warn!(worker = %self.name, queue = %queue, error = %e, "Failed to reserve from queue");
                }
            }
        }
        Ok(None)
    }

    /// Reserve one job and run it on the calling task without isolation or
    /// fork hooks. Returns the job if one ran.
    pub async fn process(&self) -> WorkerResult<Option<Job>> {
        self.state.set(ExecutionState::Reserving);
        let Some(job) = self.reserve().await? else {
            self.state.set(ExecutionState::Idle);
            return Ok(None);
        };

        self.state.set(ExecutionState::Dispatching);
        self.registry.set_working(&self.name, &job).await?;
        self.state.set(ExecutionState::Running);
        let outcome = Launch::new(&self.jobs, &job, self.name.clone()).run(CancelFlag::new());
        self.report(&job, outcome).await?;
        Ok(Some(job))
    }

    /// Work until shutdown. With a zero `interval` the worker stops at the
    /// first pass that finds no job.
    pub async fn work(&self, interval: Duration) -> WorkerResult<()> {
        self.work_with(interval, |_job| {}).await
    }

    /// Like [`Worker::work`], calling `callback` after each job has been
    /// reported.
    pub async fn work_with<F>(&self, interval: Duration, mut callback: F) -> WorkerResult<()>
    where
        F: FnMut(&Job) + Send,
    {
        let mut events = self.coordinator.subscribe();
        let listener = if self.options.install_signal_handlers {
            Some(quarry_resilience::listen(Arc::clone(&self.coordinator))?)
        } else {
            None
        };

        let result = match self.startup().await {
            Ok(()) => {
                let worked = self.run(interval, &mut events, &mut callback).await;
                match (worked, self.registry.unregister(&self.name).await) {
                    (Ok(()), unregistered) => unregistered.map_err(Into::into),
                    (Err(e), Ok(())) => Err(e),
                    (Err(e), Err(unregister_error)) => {
                        warn!(worker = %self.name, error = %unregister_error, "Failed to unregister worker");
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };

        if let Some(listener) = listener {
            listener.abort();
        }
        self.state.set(ExecutionState::Idle);
        info!(worker = %self.name, "Worker exiting");
        result
    }

    async fn startup(&self) -> WorkerResult<()> {
        let pruned = self
            .registry
            .prune_dead_workers(&self.id, self.probe.as_ref())
            .await?;
        if !pruned.is_empty() {
            info!(worker = %self.name, pruned = pruned.len(), "Pruned dead workers");
        }
        self.registry.register(&self.name).await?;
        Ok(())
    }

    async fn run<F>(
        &self,
        interval: Duration,
        events: &mut broadcast::Receiver<ShutdownSignal>,
        callback: &mut F,
    ) -> WorkerResult<()>
    where
        F: FnMut(&Job) + Send,
    {
        info!(
            worker = %self.name,
            queues = %self.resolver.configured().join(","),
            interval = ?interval,
            isolation = %self.options.isolation,
            term_child = self.options.term_child,
            verbose = self.options.verbose,
            very_verbose = self.options.very_verbose,
            "Starting worker"
        );

        loop {
            if self.coordinator.is_shutting_down() {
                break;
            }

            if self.coordinator.is_paused() {
                self.state.set(ExecutionState::Idle);
                debug!(worker = %self.name, "Paused, waiting for CONT");
                wait_for_event(events, None).await;
                continue;
            }

            self.state.set(ExecutionState::Reserving);
            match self.reserve().await? {
                Some(job) => {
                    if !self.perform(&job, events).await? {
                        break;
                    }
                    callback(&job);
                }
                None if interval.is_zero() => {
                    self.state.set(ExecutionState::Idle);
                    break;
                }
                None => {
                    self.state.set(ExecutionState::Idle);
                    debug!(worker = %self.name, interval = ?interval, "No job found, sleeping");
                    wait_for_event(events, Some(interval)).await;
                }
            }
        }
        Ok(())
    }

    /// Run one reserved job in the configured isolation mode. Returns
    /// `false` when the job was abandoned by an immediate shutdown.
    async fn perform(
        &self,
        job: &Job,
        events: &mut broadcast::Receiver<ShutdownSignal>,
    ) -> WorkerResult<bool> {
        self.state.set(ExecutionState::Dispatching);
        info!(worker = %self.name, queue = %job.queue, class = %job.class(), "Processing job");
        self.registry.set_working(&self.name, job).await?;

        let mode = self.options.isolation;
        let mut launch = Launch::new(&self.jobs, job, self.name.clone());
        if mode.is_isolated() {
            self.hooks.run_before_fork(job);
            launch = launch.with_after_fork(self.hooks.after_fork_hook());
        }

        let mut running = spawn_isolated(mode, launch)?;
        let supervision = supervise(
            running.as_mut(),
            events,
            &self.coordinator,
            &self.term_policy(),
            &self.state,
        )
        .await?;

        match supervision {
            Supervision::Finished(outcome) => {
                self.report(job, outcome).await?;
                Ok(true)
            }
            Supervision::Abandoned => {
                warn!(
                    worker = %self.name,
                    pid = running.pid(),
                    class = %job.class(),
                    "Stopped supervising job"
                );
                Ok(false)
            }
        }
    }

    async fn report(&self, job: &Job, outcome: ExecutionOutcome) -> WorkerResult<()> {
        self.state.set(ExecutionState::Reporting);
        match outcome {
            ExecutionOutcome::Success => {
                info!(worker = %self.name, queue = %job.queue, class = %job.class(), "Job succeeded");
            }
            ExecutionOutcome::Failure(error) => self.fail(job, &error).await?,
        }
        self.registry.record_processed(&self.name).await?;
        self.registry.clear_working(&self.name).await?;
        self.state.set(ExecutionState::Idle);
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &JobError) -> WorkerResult<()> {
        warn!(
            worker = %self.name,
            queue = %job.queue,
            class = %job.class(),
            kind = %error.kind,
            error = %error.message,
            "Job failed"
        );
        let record = FailureRecord::new(error, job.payload.clone(), &job.queue, &self.name);
        self.failures.create(&record).await;

        let observers = self.jobs.failure_observers(job.class());
        run_failure_hooks(job.class(), &observers, error, job.args());

        self.registry.record_failed(&self.name).await?;
        Ok(())
    }

    fn term_policy(&self) -> TermPolicy {
        TermPolicy {
            term_child: self.options.term_child,
            term_timeout: self.options.term_timeout,
            poll_interval: self.options.poll_interval,
        }
    }

    fn info(&self) -> WorkerInfo {
        self.registry.view(&self.name)
    }

    pub async fn is_working(&self) -> StoreResult<bool> {
        self.info().is_working().await
    }

    pub async fn is_idle(&self) -> StoreResult<bool> {
        self.info().is_idle().await
    }

    /// The job this worker is running, as recorded in the store
    pub async fn job(&self) -> StoreResult<Option<Job>> {
        self.info().job().await
    }

    pub async fn processed(&self) -> StoreResult<u64> {
        self.info().processed().await
    }

    pub async fn failed(&self) -> StoreResult<u64> {
        self.info().failed().await
    }

    pub async fn started(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.info().started().await
    }

    pub async fn exists(store: Arc<dyn Store>, id: &str) -> StoreResult<bool> {
        WorkerRegistry::new(store).exists(id).await
    }

    pub async fn find(store: Arc<dyn Store>, id: &str) -> StoreResult<Option<WorkerInfo>> {
        WorkerRegistry::new(store).find(id).await
    }

    pub async fn all(store: Arc<dyn Store>) -> StoreResult<Vec<WorkerInfo>> {
        WorkerRegistry::new(store).all().await
    }

    pub async fn working(store: Arc<dyn Store>) -> StoreResult<Vec<WorkerInfo>> {
        WorkerRegistry::new(store).working().await
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.name)
            .field("queues", &self.resolver.configured())
            .field("options", &self.options)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Block until a lifecycle event arrives or `timeout` elapses.
async fn wait_for_event(events: &mut broadcast::Receiver<ShutdownSignal>, timeout: Option<Duration>) {
    let sleep = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = sleep => {}
        event = events.recv() => match event {
            Ok(signal) => debug!(event = %signal, "Woken by lifecycle event"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Lifecycle events lagged"),
            Err(RecvError::Closed) => {}
        },
    }
}
