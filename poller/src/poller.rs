use crate::client::{self, RpcClient};
use crate::context::AppContext;
use crate::error::PollerError;
use crate::metrics::MetricsCollector;
use common::{
    unique_name, DatastoreId, JobKind, JobSummary, LaunchOptions, TaskReport, TaskStatus,
    TASK_ERROR_LOG_TARGET,
};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Where the polling session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    PollingRound,
    Scheduled,
}

/// Counts from one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub checked: usize,
    pub skipped: usize,
    pub in_flight: usize,
}

struct Session {
    id: u64,
    cancel: CancellationToken,
}

struct Shared {
    jobs: Mutex<Vec<JobSummary>>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    state: watch::Sender<PollState>,
    // Held for the whole of a round, and by rename, so the two never interleave.
    round_gate: tokio::sync::Mutex<()>,
}

/// Tracks the server-side tasks of one job collection (the optimizations,
/// scenarios or calibrations of a project) and polls their status while any
/// of them is queued or running and the user is on the owning page.
///
/// Cloning is cheap; clones share the same collection and session.
#[derive(Clone)]
pub struct TaskPoller {
    client: Arc<dyn RpcClient>,
    ctx: AppContext,
    kind: JobKind,
    interval: Duration,
    metrics: Arc<MetricsCollector>,
    shared: Arc<Shared>,
}

impl TaskPoller {
    pub fn new(client: Arc<dyn RpcClient>, ctx: AppContext, kind: JobKind) -> Self {
        let (state, _rx) = watch::channel(PollState::Idle);
        Self {
            client,
            ctx,
            kind,
            interval: Duration::from_millis(common::DEFAULT_POLL_INTERVAL_MS),
            metrics: Arc::new(MetricsCollector::new()),
            shared: Arc::new(Shared {
                jobs: Mutex::new(Vec::new()),
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
                state,
                round_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn state(&self) -> PollState {
        *self.shared.state.borrow()
    }

    pub fn jobs(&self) -> Vec<JobSummary> {
        self.shared.jobs.lock().unwrap().clone()
    }

    pub fn job(&self, name: &str) -> Option<JobSummary> {
        self.shared
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.name == name)
            .cloned()
    }

    fn project_id(&self) -> &str {
        self.ctx.project_id()
    }

    fn datastore_id_of(&self, name: &str) -> Result<DatastoreId, PollerError> {
        self.job(name)
            .map(|j| j.datastore_id)
            .ok_or_else(|| PollerError::UnknownJob(name.to_string()))
    }

    /// On the owning page with at least one job queued or started.
    pub fn need_to_poll(&self) -> bool {
        self.ctx.is_on(self.kind.page())
            && self
                .shared
                .jobs
                .lock()
                .unwrap()
                .iter()
                .any(|j| j.status.is_in_flight())
    }

    /// Fetches the collection from the server and checks every job once.
    pub async fn load(&self) -> Result<usize, PollerError> {
        self.load_with(true).await
    }

    /// Like [`load`](Self::load). Without `check_all` the stored statuses are
    /// trusted and only jobs stored as queued or started are checked.
    pub async fn load_with(&self, check_all: bool) -> Result<usize, PollerError> {
        let kind = self.kind;
        let mut jobs = client::get_info(&*self.client, kind, self.project_id())
            .await
            .map_err(|source| PollerError::Load { kind, source })?;

        for job in jobs.iter_mut() {
            job.datastore_id = DatastoreId::derive(self.project_id(), kind, &job.name);
            job.polled = false;
            if check_all {
                job.reset();
            }
        }
        let count = jobs.len();
        *self.shared.jobs.lock().unwrap() = jobs;
        log::info!("Loaded {} {} jobs for project {}", count, kind, self.project_id());

        self.refresh(check_all).await;
        Ok(count)
    }

    /// Runs one round now and keeps polling afterwards if anything is in
    /// flight.
    pub async fn refresh(&self, check_all: bool) -> RoundSummary {
        let summary = self.poll_all_task_states(check_all).await;
        if self.need_to_poll() {
            self.start_session(false);
        }
        summary
    }

    /// Saves the whole collection on the server.
    pub async fn persist(&self) -> Result<(), PollerError> {
        let kind = self.kind;
        let jobs = self.jobs();
        client::set_info(&*self.client, kind, self.project_id(), &jobs)
            .await
            .map_err(|source| PollerError::Persist { kind, source })
    }

    /// Adds a job under a unique variant of `name` and saves the collection.
    /// Returns the name actually used.
    pub async fn add_job(&self, name: &str, extra: Map<String, Value>) -> Result<String, PollerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PollerError::EmptyName);
        }
        let name = {
            let mut jobs = self.shared.jobs.lock().unwrap();
            let name = unique_name(name, jobs.iter().map(|j| j.name.as_str()));
            jobs.push(JobSummary::new(self.project_id(), self.kind, &name).with_extra(extra));
            name
        };

        if let Err(e) = self.persist().await {
            self.remove_local(&name);
            return Err(e);
        }
        log::info!("Added {} job {}", self.kind, name);
        Ok(name)
    }

    /// Copies a job's parameters into a new, not-started job.
    pub async fn copy_job(&self, name: &str) -> Result<String, PollerError> {
        let source = self
            .job(name)
            .ok_or_else(|| PollerError::UnknownJob(name.to_string()))?;
        self.add_job(&source.name, source.extra).await
    }

    /// Clears the job's task, removes it and saves the collection.
    pub async fn delete_job(&self, name: &str) -> Result<(), PollerError> {
        let id = self.datastore_id_of(name)?;
        if let Err(e) = self.clear_datastore_id(&id).await {
            log::warn!("Deleting {} without clearing its task: {}", name, e);
        }

        let removed = self.remove_local(name);
        if let Err(e) = self.persist().await {
            if let Some((index, job)) = removed {
                let mut jobs = self.shared.jobs.lock().unwrap();
                let index = index.min(jobs.len());
                jobs.insert(index, job);
            }
            return Err(e);
        }
        log::info!("Deleted {} job {}", self.kind, name);
        Ok(())
    }

    fn remove_local(&self, name: &str) -> Option<(usize, JobSummary)> {
        let mut jobs = self.shared.jobs.lock().unwrap();
        let index = jobs.iter().position(|j| j.name == name)?;
        Some((index, jobs.remove(index)))
    }

    /// Renames a job. The task under the old id is cleared before the new id
    /// is adopted, and never while a polling round is in flight.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), PollerError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(PollerError::EmptyName);
        }
        if new == old {
            return Ok(());
        }

        let old_id = {
            let _gate = self.shared.round_gate.lock().await;
            let old_id = self.datastore_id_of(old)?;
            if self.job(new).is_some() {
                return Err(PollerError::DuplicateName(new.to_string()));
            }

            self.clear_datastore_id(&old_id).await?;

            let mut jobs = self.shared.jobs.lock().unwrap();
            let job = jobs
                .iter_mut()
                .find(|j| j.name == old)
                .ok_or_else(|| PollerError::UnknownJob(old.to_string()))?;
            let old_id = job.rename(self.project_id(), self.kind, new);
            job.reset();
            log::info!("Renamed {} job {} to {} ({})", self.kind, old, new, job.datastore_id);
            old_id
        };

        if let Err(e) = self.persist().await {
            // The old task is already gone, so the job stays not started.
            let mut jobs = self.shared.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.name == new) {
                job.name = old.to_string();
                job.datastore_id = old_id;
            }
            log::warn!("Could not save rename of {} to {}, reverted", old, new);
            return Err(e);
        }
        Ok(())
    }

    /// Saves the collection, then launches the job's task on the server.
    pub async fn launch(&self, name: &str, options: &LaunchOptions) -> Result<(), PollerError> {
        let id = self.datastore_id_of(name)?;
        let kwargs = options.to_kwargs()?;

        self.persist().await?;

        let args = vec![json!(self.project_id()), json!(id.0), json!(name)];
        client::launch_task(&*self.client, &id, self.kind.task_function(), args, kwargs)
            .await
            .map_err(|source| PollerError::Launch {
                name: name.to_string(),
                source,
            })?;
        self.metrics.record_launch(id.as_str());
        log::info!("Launched {} job {} ({})", self.kind, name, id);

        self.check_and_apply(&id).await;
        self.ensure_polling();
        Ok(())
    }

    /// Deletes the job's cached result and its task, then re-checks it. Waits
    /// for any polling round in flight so none of its answers land afterwards.
    pub async fn clear_task(&self, name: &str) -> Result<(), PollerError> {
        {
            let _gate = self.shared.round_gate.lock().await;
            let id = self.datastore_id_of(name)?;
            self.clear_datastore_id(&id).await?;
            self.check_and_apply(&id).await;
        }
        self.ensure_polling();
        Ok(())
    }

    // Either deletion succeeding is enough; only a double failure is reported.
    async fn clear_datastore_id(&self, id: &DatastoreId) -> Result<(), PollerError> {
        let rpc = &*self.client;
        let result = client::del_result(rpc, id, self.project_id()).await;
        if let Err(e) = &result {
            log::warn!("Could not delete cached result for {}: {}", id, e);
        }
        let task = client::delete_task(rpc, id).await;
        if let Err(e) = &task {
            log::warn!("Could not delete task {}: {}", id, e);
        }
        match (result, task) {
            (Err(_), Err(source)) => Err(PollerError::Clear {
                id: id.clone(),
                source,
            }),
            _ => {
                self.metrics.record_clear(id.as_str());
                log::info!("Cleared task {}", id);
                Ok(())
            }
        }
    }

    /// Status of one task. A task the server does not know about, or a check
    /// that failed outright, reads as "not started".
    pub async fn check_task_status(&self, id: &DatastoreId) -> TaskReport {
        match client::check_task(&*self.client, id).await {
            Ok(report) => {
                self.metrics.record_check(id.as_str());
                if report.status == TaskStatus::Error {
                    log::error!(
                        target: TASK_ERROR_LOG_TARGET,
                        "Task {} failed: {}",
                        id,
                        report.error_text.as_deref().unwrap_or("no error text")
                    );
                }
                report
            }
            Err(e) => {
                self.metrics.record_check_failure(id.as_str());
                log::debug!("No task state for {}: {}", id, e);
                TaskReport::not_started()
            }
        }
    }

    // The check is tagged with the id it was issued against; a job whose id
    // changed meanwhile keeps its state.
    async fn check_and_apply(&self, id: &DatastoreId) {
        let report = self.check_task_status(id).await;
        let mut jobs = self.shared.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| &j.datastore_id == id) {
            Some(job) => {
                let was = job.status;
                job.apply_report(&report);
                job.polled = true;
                if was != job.status {
                    log::info!("{} {} -> {}", id, was, job.status);
                    if let (TaskStatus::Completed, Some(s)) =
                        (job.status, job.execution_time.seconds())
                    {
                        self.metrics.record_completion(id.as_str(), s);
                    }
                }
            }
            None => {
                log::debug!("Discarding status for {}: no job holds that id any more", id);
            }
        }
    }

    /// One polling round. Jobs that are queued or started (every job when
    /// `check_all` is set) are checked concurrently; the round ends once all
    /// of them have answered. Never fails.
    pub async fn poll_all_task_states(&self, check_all: bool) -> RoundSummary {
        let _gate = self.shared.round_gate.lock().await;

        let targets: Vec<DatastoreId> = {
            let mut jobs = self.shared.jobs.lock().unwrap();
            for job in jobs.iter_mut() {
                job.polled = false;
            }
            let mut targets = Vec::new();
            for job in jobs.iter_mut() {
                if check_all || job.status.is_in_flight() {
                    targets.push(job.datastore_id.clone());
                } else {
                    job.polled = true;
                }
            }
            targets
        };

        let checked = targets.len();
        join_all(targets.iter().map(|id| self.check_and_apply(id))).await;

        let (skipped, in_flight) = {
            let mut jobs = self.shared.jobs.lock().unwrap();
            // Jobs added while the round ran have nothing to report yet.
            for job in jobs.iter_mut().filter(|j| !j.polled) {
                job.polled = true;
            }
            let in_flight = jobs.iter().filter(|j| j.status.is_in_flight()).count();
            (jobs.len().saturating_sub(checked), in_flight)
        };

        self.metrics.record_round(in_flight as u64);
        log::debug!(
            "Polled {} {} jobs ({} skipped, {} in flight)",
            checked,
            self.kind,
            skipped,
            in_flight
        );
        RoundSummary {
            checked,
            skipped,
            in_flight,
        }
    }

    /// Starts a polling session unless one is already running. The session
    /// begins with an immediate round.
    pub fn ensure_polling(&self) {
        self.start_session(true);
    }

    fn start_session(&self, immediate: bool) {
        let mut slot = self.shared.session.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(Session {
            id,
            cancel: cancel.clone(),
        });
        self.shared.state.send_replace(if immediate {
            PollState::PollingRound
        } else {
            PollState::Scheduled
        });
        log::debug!("Starting {} polling session {}", self.kind, id);

        let poller = self.clone();
        tokio::spawn(async move { poller.run_session(id, cancel, immediate).await });
    }

    /// Stops the polling session, if any. A round already in flight still
    /// completes, but nothing is scheduled after it.
    pub fn stop(&self) {
        let mut slot = self.shared.session.lock().unwrap();
        if let Some(session) = slot.take() {
            session.cancel.cancel();
            self.shared.state.send_replace(PollState::Idle);
            log::debug!("Stopped {} polling session {}", self.kind, session.id);
        }
    }

    /// Resolves once no polling session is active.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == PollState::Idle).await;
    }

    fn set_state(&self, session: u64, state: PollState) {
        let slot = self.shared.session.lock().unwrap();
        if slot.as_ref().map(|s| s.id) == Some(session) {
            self.shared.state.send_replace(state);
        }
    }

    // Ends the session if nothing is left to poll. Decided under the session
    // lock so a concurrent ensure_polling either sees this session or none.
    fn finish_if_done(&self, session: u64, cancel: &CancellationToken) -> bool {
        let mut slot = self.shared.session.lock().unwrap();
        let ours = slot.as_ref().map(|s| s.id) == Some(session);
        if !ours {
            return true;
        }
        if cancel.is_cancelled() || !self.need_to_poll() {
            slot.take();
            self.shared.state.send_replace(PollState::Idle);
            log::debug!("{} polling session {} finished", self.kind, session);
            return true;
        }
        self.shared.state.send_replace(PollState::Scheduled);
        false
    }

    async fn run_session(self, session: u64, cancel: CancellationToken, immediate: bool) {
        let mut route = self.ctx.subscribe();
        let page = self.kind.page();
        let mut poll_now = immediate;

        loop {
            if poll_now {
                self.set_state(session, PollState::PollingRound);
                self.poll_all_task_states(false).await;
            }
            poll_now = true;

            if self.finish_if_done(session, &cancel) {
                return;
            }

            let sleep = tokio::time::sleep(self.interval);
            tokio::pin!(sleep);
            let keep_going = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break false,
                    _ = &mut sleep => break true,
                    changed = route.changed() => {
                        if changed.is_err() || *route.borrow_and_update() != page {
                            break false;
                        }
                    }
                }
            };

            if !keep_going {
                log::debug!("{} polling session {} left {}", self.kind, session, page);
                let mut slot = self.shared.session.lock().unwrap();
                if slot.as_ref().map(|s| s.id) == Some(session) {
                    slot.take();
                    self.shared.state.send_replace(PollState::Idle);
                }
                return;
            }
        }
    }
}
