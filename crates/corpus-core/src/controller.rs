// corpus-core/src/controller.rs
//! 查询运行控制器
//!
//! One controller drives one run: it asks the scheduler for a shard, hands
//! the scan to the job queue, merges completions into the result bundle and
//! publishes progress after every merge. Completions arrive on a channel
//! owned by the controller, so the run state is never shared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use rpc::{ProgressMessage, ProgressStatus, QueryRequest, ResumeRequest, RunScope};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::aggregator::{add_results, enumerable_rows, union_results, AddContext, CallbackKind};
use crate::bundle::{RawRow, ResultBundle};
use crate::catalog::{Shard, ShardCatalog};
use crate::config::RunConfig;
use crate::engine::{DataEngine, Translator};
use crate::error::{RunError, SchedulerError};
use crate::estimator::{estimate, RunStatus};
use crate::jobs::{Completion, JobError, JobId, JobQueue, JobRequest, Work};
use crate::publish::Publisher;
use crate::registry::{RunRegistry, StopSignal};
use crate::scheduler::{decide_batch, SchedulerView};
use crate::state::{PersistedRun, QueryState};
use crate::store::RunStore;

/// Everything a run needs from the outside world
pub struct Services {
    pub catalog: Arc<ShardCatalog>,
    pub translator: Arc<dyn Translator>,
    pub engine: Arc<dyn DataEngine>,
    pub queue: Arc<dyn JobQueue>,
    pub publisher: Arc<dyn Publisher>,
    pub registry: RunRegistry,
    pub store: Option<Arc<RunStore>>,
    pub config: RunConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Scheduling,
    Executing,
    Aggregating,
    Satisfied,
    Finished,
    Cancelled,
    Failed,
    TimedOut,
}

impl Phase {
    /// Status published when the run ends in this phase
    pub fn terminal_status(self) -> Option<ProgressStatus> {
        match self {
            Phase::Satisfied => Some(ProgressStatus::Satisfied),
            Phase::Finished => Some(ProgressStatus::Finished),
            Phase::Cancelled => Some(ProgressStatus::Stopped),
            Phase::Failed => Some(ProgressStatus::Failed),
            Phase::TimedOut => Some(ProgressStatus::Timeout),
            Phase::New | Phase::Scheduling | Phase::Executing | Phase::Aggregating => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.terminal_status().is_some()
    }
}

/// Outcome of a run once it has stopped
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: Uuid,
    pub status: ProgressStatus,
    pub bundle: ResultBundle,
    pub results_so_far: u64,
    pub hit_limit_at: Option<u64>,
    /// Names of scanned shards, in merge order
    pub done_shards: Vec<String>,
    pub error: Option<String>,
    pub persisted: PersistedRun,
}

/// A dispatched job the controller still waits for
struct Pending {
    shard: Shard,
    kind: CallbackKind,
    restart_at: u64,
    results_before: u64,
    offset: u64,
    batch_matches: u64,
}

enum Wake {
    Stop,
    Elapsed,
    Closed,
    Done(Completion),
}

pub struct IterationController {
    services: Arc<Services>,
    state: QueryState,
    statement: String,
    scope: RunScope,
    phase: Phase,
    applied: HashSet<JobId>,
    /// Jobs stopped by cancellation or timeout; anything they still report is dropped
    discarded: HashSet<JobId>,
    in_flight: HashMap<JobId, Pending>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    stop: StopSignal,
    last_batch: u64,
    error: Option<String>,
}

impl IterationController {
    /// Translate the query and plan a fresh run over the requested corpora
    pub fn start(services: Arc<Services>, request: &QueryRequest) -> Result<Self, RunError> {
        let translation = services.translator.translate(&request.query)?;
        let shards = services.catalog.shards_for(&request.corpora, &request.languages)?;
        if shards.is_empty() {
            return Err(RunError::NoShards);
        }

        let job_id = Uuid::new_v4();
        let scope = if request.simultaneous {
            RunScope::Group { base: job_id }
        } else {
            RunScope::room(request.user.clone(), request.room.as_deref())
        };
        let mut state = QueryState::fresh(
            job_id,
            shards,
            request.requested(),
            request.page_size,
            request.offset,
            request.simultaneous,
        );
        state.result_bundle = ResultBundle::with_meta(translation.meta);

        Ok(Self::new(services, state, translation.statement, scope))
    }

    /// Continue a persisted run, typically to deliver its next page
    pub fn resume(services: Arc<Services>, request: &ResumeRequest, run: PersistedRun) -> Result<Self, RunError> {
        if run.job_id != request.job {
            return Err(RunError::InvalidResume(format!(
                "persisted run {} does not match requested job {}",
                run.job_id, request.job
            )));
        }
        let translation = services.translator.translate(&request.query)?;
        let mut state = QueryState::resume(
            run,
            &services.catalog,
            request.requested(),
            request.page_size,
            request.offset,
        )?;
        if state.result_bundle.meta.is_none() {
            state.result_bundle.meta = Some(translation.meta);
        }
        let scope = RunScope::room(request.user.clone(), request.room.as_deref());

        Ok(Self::new(services, state, translation.statement, scope))
    }

    /// Like [`resume`](Self::resume), reading the run from the configured store
    pub fn resume_from_store(services: Arc<Services>, request: &ResumeRequest) -> Result<Self, RunError> {
        let store = services
            .store
            .clone()
            .ok_or_else(|| RunError::InvalidResume("no run store configured".into()))?;
        let run = store
            .load(request.job)?
            .ok_or_else(|| RunError::InvalidResume(format!("no persisted run {}", request.job)))?;
        Self::resume(services, request, run)
    }

    fn new(services: Arc<Services>, state: QueryState, statement: String, scope: RunScope) -> Self {
        // a new query in a room supersedes whatever was still running there
        if matches!(scope, RunScope::Room { .. }) {
            services.registry.cancel(&scope);
        }
        let stop = services.registry.register(&scope, state.job_id);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            services,
            state,
            statement,
            scope,
            phase: Phase::New,
            applied: HashSet::new(),
            discarded: HashSet::new(),
            in_flight: HashMap::new(),
            completions_tx,
            completions_rx,
            stop,
            last_batch: 0,
            error: None,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.state.job_id
    }

    pub fn scope(&self) -> &RunScope {
        &self.scope
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Drive the run until it is satisfied, finished, stopped, failed or timed out
    pub async fn run(mut self) -> RunReport {
        tracing::info!(
            "[Controller] run {} on {} over {} shards, requested {}",
            self.state.job_id,
            self.scope.channel(),
            self.state.all_shards.len(),
            self.state.total_requested
        );
        self.publish(ProgressStatus::Started, 0);

        if self.state.simultaneous {
            self.run_simultaneous().await;
        } else {
            self.run_sequential().await;
        }

        self.services.registry.finish(&self.scope, self.state.job_id);
        let status = match self.phase.terminal_status() {
            Some(status) => status,
            None => {
                self.error.get_or_insert_with(|| format!("run ended in phase {:?}", self.phase));
                ProgressStatus::Failed
            }
        };
        self.publish(status, self.last_batch);
        self.persist();
        tracing::info!(
            "[Controller] run {} {} with {} results",
            self.state.job_id,
            status,
            self.state.results_so_far
        );

        RunReport {
            job: self.state.job_id,
            status,
            results_so_far: self.state.results_so_far,
            hit_limit_at: self.state.hit_limit_at,
            done_shards: self.state.done_shards.iter().map(|s| s.name.clone()).collect(),
            error: self.error.clone(),
            persisted: self.state.to_persisted(),
            bundle: self.state.result_bundle,
        }
    }

    async fn run_sequential(&mut self) {
        loop {
            if self.stop.is_cancelled() {
                self.cancel();
                return;
            }

            self.phase = Phase::Scheduling;
            let shard = match decide_batch(&self.state.view(), &self.services.config.scheduler) {
                Ok(shard) => shard.clone(),
                Err(SchedulerError::NoShardAvailable | SchedulerError::ShardAlreadyDone(_)) => {
                    self.exhausted();
                    return;
                }
            };
            tracing::debug!("[Controller] {} scanning {}", self.state.job_id, shard.name);

            self.state.current_shard = Some(shard.clone());
            let restart_at = self.state.restart_at;
            if let Err(e) = self.dispatch_query(&shard, restart_at, None) {
                self.fail(e.to_string());
                return;
            }
            self.drain().await;
            if self.phase.is_terminal() {
                return;
            }
        }
    }

    async fn run_simultaneous(&mut self) {
        self.phase = Phase::Scheduling;
        let plan = match self.plan_fan_out() {
            Ok(plan) => plan,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        if plan.is_empty() {
            self.exhausted();
            return;
        }

        let max_in_flight = self.services.config.max_in_flight.max(1);
        let mut query_jobs: Vec<JobId> = Vec::with_capacity(plan.len());
        for (i, shard) in plan.iter().enumerate() {
            let depends_on = i.checked_sub(max_in_flight).and_then(|j| query_jobs.get(j).copied());
            match self.dispatch_query(shard, 0, depends_on) {
                Ok(id) => query_jobs.push(id),
                Err(e) => {
                    self.fail(e.to_string());
                    return;
                }
            }
        }
        tracing::debug!(
            "[Controller] {} fanned out {} shards, {} at a time",
            self.state.job_id,
            query_jobs.len(),
            max_in_flight
        );

        self.drain().await;
        if !self.phase.is_terminal() {
            self.exhausted();
        }
    }

    /// Shard order for a fan-out, asking the scheduler once per shard
    fn plan_fan_out(&self) -> Result<Vec<Shard>, SchedulerError> {
        let mut planned = self.state.done_shards.clone();
        let mut order = Vec::new();
        loop {
            let view = SchedulerView {
                done_shards: &planned,
                current_shard: None,
                hit_limit_at: None,
                unlimited: true,
                single_shard: false,
                ..self.state.view()
            };
            match decide_batch(&view, &self.services.config.scheduler).cloned() {
                Ok(shard) => {
                    planned.push(shard.clone());
                    order.push(shard);
                }
                Err(SchedulerError::NoShardAvailable) => return Ok(order),
                Err(e) => return Err(e),
            }
        }
    }

    /// Handle wake-ups until nothing is in flight or the run has ended
    async fn drain(&mut self) {
        self.phase = Phase::Executing;
        while !self.in_flight.is_empty() && !self.phase.is_terminal() {
            match self.next_wake().await {
                Wake::Stop => self.cancel(),
                Wake::Elapsed => self.time_out(),
                Wake::Closed => self.fail("completion channel closed".into()),
                Wake::Done(completion) => self.on_completion(completion),
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let timeout = self.services.config.job_timeout();
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Wake::Stop,
            received = tokio::time::timeout(timeout, self.completions_rx.recv()) => match received {
                Err(_) => Wake::Elapsed,
                Ok(None) => Wake::Closed,
                Ok(Some(completion)) => Wake::Done(completion),
            },
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        let job = completion.job;
        if self.discarded.contains(&job) {
            tracing::debug!("[Controller] dropping result of stopped job {}", job);
            return;
        }
        if !self.applied.insert(job) {
            tracing::debug!("[Controller] duplicate delivery of {}", job);
            return;
        }
        let Some(pending) = self.in_flight.remove(&job) else {
            tracing::debug!("[Controller] result of unknown job {}", job);
            return;
        };

        self.phase = Phase::Aggregating;
        let rows = match completion.outcome {
            Ok(rows) => rows,
            Err(JobError::Stopped) => {
                self.cancel();
                return;
            }
            Err(JobError::Failed(message)) => {
                tracing::warn!("[Controller] {} failed on {}: {}", self.state.job_id, pending.shard.name, message);
                self.fail(message);
                return;
            }
        };

        let merged = match pending.kind {
            CallbackKind::Query => self.merge_query(job, pending, rows),
            CallbackKind::Sentences => self.merge_sentences(pending, rows),
        };
        if let Err(e) = merged {
            self.fail(e.to_string());
        }
    }

    fn merge_query(&mut self, job: JobId, pending: Pending, rows: Vec<RawRow>) -> Result<(), RunError> {
        let before = self.state.results_so_far;
        let offset = self.state.offset.saturating_sub(before);
        let ctx = AddContext {
            results_so_far_before: before,
            unlimited: self.state.unlimited(),
            offset,
            restart_at: pending.restart_at,
            total_requested: self.state.total_requested,
            kind: CallbackKind::Query,
        };
        let policy = &self.services.config.aggregation;
        let merged = add_results(&rows, &ctx, self.state.result_bundle.meta.as_ref(), policy)?;
        union_results(&mut self.state.result_bundle, merged.delta);

        if self.state.mark_done(&pending.shard) {
            self.state.matches_seen += merged.match_count;
        }

        let accepted = match self.state.cap() {
            Some(total) => {
                let needed = total.saturating_sub(before);
                if merged.match_count > needed {
                    self.state.hit_limit_at = Some(pending.restart_at + needed);
                    self.state.results_so_far = total.max(before);
                    needed
                } else {
                    self.state.hit_limit_at = None;
                    self.state.results_so_far = before + merged.match_count;
                    merged.match_count
                }
            }
            None => {
                self.state.results_so_far = before + merged.match_count;
                merged.match_count
            }
        };
        tracing::debug!(
            "[Controller] {} merged {}: {} matches, {} accepted",
            self.state.job_id,
            pending.shard.name,
            merged.match_count,
            accepted
        );

        let meta = self.state.result_bundle.meta.as_ref();
        if let (true, Some(meta)) = (accepted > 0, meta) {
            let matches = enumerable_rows(&rows, meta, policy);
            let wanted = page_rows(&matches, pending.restart_at + offset, accepted.saturating_sub(offset));
            let follow_up = Pending {
                shard: pending.shard,
                kind: CallbackKind::Sentences,
                restart_at: pending.restart_at,
                results_before: before,
                offset,
                batch_matches: merged.match_count,
            };
            self.dispatch_sentences(follow_up, matches, wanted, job)?;
            return Ok(());
        }

        self.settle(&pending.shard, merged.match_count);
        Ok(())
    }

    fn merge_sentences(&mut self, pending: Pending, rows: Vec<RawRow>) -> Result<(), RunError> {
        let ctx = AddContext {
            results_so_far_before: pending.results_before,
            unlimited: self.state.unlimited(),
            offset: pending.offset,
            restart_at: pending.restart_at,
            total_requested: self.state.total_requested,
            kind: CallbackKind::Sentences,
        };
        let policy = &self.services.config.aggregation;
        let merged = add_results(&rows, &ctx, self.state.result_bundle.meta.as_ref(), policy)?;
        union_results(&mut self.state.result_bundle, merged.delta);
        if let Some(total) = self.state.cap() {
            let page = total.saturating_sub(self.state.offset);
            self.state.result_bundle.truncate_enumerable(page, policy);
        }

        self.settle(&pending.shard, pending.batch_matches);
        Ok(())
    }

    /// Estimate, publish and persist after a shard is fully merged
    fn settle(&mut self, shard: &Shard, batch_matches: u64) {
        if self.state.current_shard.as_ref() == Some(shard) {
            self.state.current_shard = None;
            self.state.restart_at = 0;
        }
        self.last_batch = batch_matches;

        let progress = estimate(&self.state.progress_input());
        // a hit limit means the cap was reached, even a cap of zero;
        // the capped shard is not exhausted, the next page continues it
        let status = if self.state.hit_limit_at.is_some() {
            RunStatus::Satisfied
        } else {
            progress.status
        };

        match status {
            RunStatus::Partial => {}
            _ if !self.in_flight.is_empty() => {}
            RunStatus::Satisfied => {
                self.phase = Phase::Satisfied;
                return;
            }
            RunStatus::Finished => {
                self.phase = Phase::Finished;
                return;
            }
        }

        self.phase = Phase::Scheduling;
        self.publish(ProgressStatus::Partial, batch_matches);
        self.persist();
    }

    /// The scheduler has nothing left to scan
    fn exhausted(&mut self) {
        self.phase = if self.state.hit_limit_at.is_some() {
            Phase::Satisfied
        } else {
            Phase::Finished
        };
    }

    fn cancel(&mut self) {
        tracing::info!("[Controller] run {} stopped", self.state.job_id);
        self.state.cancelled = true;
        self.abandon_in_flight();
        self.phase = Phase::Cancelled;
    }

    fn time_out(&mut self) {
        tracing::warn!(
            "[Controller] run {} timed out with {} job(s) in flight",
            self.state.job_id,
            self.in_flight.len()
        );
        self.abandon_in_flight();
        self.phase = Phase::TimedOut;
    }

    fn fail(&mut self, message: String) {
        self.abandon_in_flight();
        self.error = Some(message);
        self.phase = Phase::Failed;
    }

    fn abandon_in_flight(&mut self) {
        for (job, _) in self.in_flight.drain() {
            self.services.queue.stop(job);
            self.discarded.insert(job);
        }
    }

    fn dispatch_query(&mut self, shard: &Shard, restart_at: u64, depends_on: Option<JobId>) -> Result<JobId, RunError> {
        let engine = Arc::clone(&self.services.engine);
        let statement = self.statement.clone();
        let target = shard.clone();
        let work: Work = async move { engine.execute(&statement, &target).await }.boxed();

        let pending = Pending {
            shard: shard.clone(),
            kind: CallbackKind::Query,
            restart_at,
            results_before: 0,
            offset: 0,
            batch_matches: 0,
        };
        self.dispatch(pending, depends_on, work)
    }

    /// Fetch sentences for `wanted`; the merge re-applies the cap to all `matches`
    fn dispatch_sentences(
        &mut self,
        pending: Pending,
        matches: Vec<RawRow>,
        wanted: Vec<RawRow>,
        query_job: JobId,
    ) -> Result<JobId, RunError> {
        let engine = Arc::clone(&self.services.engine);
        let target = pending.shard.clone();
        let work: Work = async move {
            let mut rows = engine.sentences(&target, &wanted).await?;
            rows.extend(matches);
            Ok(rows)
        }
        .boxed();
        self.dispatch(pending, Some(query_job), work)
    }

    fn dispatch(&mut self, pending: Pending, depends_on: Option<JobId>, work: Work) -> Result<JobId, RunError> {
        let id = Uuid::new_v4();
        self.services.queue.enqueue(JobRequest {
            id,
            kind: pending.kind,
            shard: pending.shard.clone(),
            depends_on,
            work,
            reply: self.completions_tx.clone(),
        })?;
        self.in_flight.insert(id, pending);
        self.phase = Phase::Executing;
        Ok(id)
    }

    fn message(&self, status: ProgressStatus, batch_matches: u64) -> ProgressMessage {
        let progress = estimate(&self.state.progress_input());
        ProgressMessage {
            status,
            job: self.state.job_id,
            batch_matches,
            total_results_so_far: self.state.results_so_far,
            percentage_done: round2(progress.percent_matches_done),
            percentage_words_done: round2(progress.percent_words_done),
            hit_limit: self.state.hit_limit_at,
            projected_results: progress.projected_results,
            done_batches: self.state.done_shards.iter().map(|s| s.name.clone()).collect(),
            total_batch_count: self.state.all_shards.len(),
            error: self.error.clone(),
        }
    }

    fn publish(&self, status: ProgressStatus, batch_matches: u64) {
        let message = self.message(status, batch_matches);
        self.services.publisher.publish(&self.scope.channel(), &message);
    }

    fn persist(&self) {
        let Some(store) = &self.services.store else {
            return;
        };
        if let Err(e) = store.save(&self.state.to_persisted()) {
            tracing::warn!("[Controller] could not persist run {}: {}", self.state.job_id, e);
        }
    }
}

/// Per result set, the matches from `skip` on, at most `take` of them
fn page_rows(matches: &[RawRow], skip: u64, take: u64) -> Vec<RawRow> {
    let mut positions: HashMap<i64, u64> = HashMap::new();
    matches
        .iter()
        .filter(|(set, _)| {
            let position = positions.entry(*set).or_default();
            let current = *position;
            *position += 1;
            current >= skip && current - skip < take
        })
        .cloned()
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{QueryMeta, ResultSetMeta};
    use crate::engine::Translation;
    use crate::error::{QueueError, TranslateError};
    use crate::jobs::{JobHandle, JobStatus, TokioJobQueue};
    use crate::publish::{BroadcastPublisher, Published};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct FakeTranslator;

    impl Translator for FakeTranslator {
        fn translate(&self, query: &str) -> Result<Translation, TranslateError> {
            if query.is_empty() {
                return Err(TranslateError::Invalid("empty query".into()));
            }
            Ok(Translation {
                statement: format!("-- {query}"),
                meta: QueryMeta::new(vec![ResultSetMeta::new("plain"), ResultSetMeta::new("analysis")]),
            })
        }
    }

    /// Set 1 carries `matches[shard]` plain hits, set 2 one aggregate row per shard
    #[derive(Default)]
    struct FakeEngine {
        matches: HashMap<String, u64>,
        fail_on: Option<String>,
        hang: bool,
        delay: Option<Duration>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl FakeEngine {
        fn with_matches(matches: &[(&str, u64)]) -> Self {
            Self {
                matches: matches.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DataEngine for FakeEngine {
        async fn execute(&self, _statement: &str, shard: &Shard) -> Result<Vec<RawRow>, String> {
            if self.hang {
                futures::future::pending::<()>().await;
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.as_deref() == Some(shard.name.as_str()) {
                return Err("relation does not exist".into());
            }
            let count = self.matches.get(&shard.name).copied().unwrap_or(0);
            let mut rows: Vec<RawRow> = (0..count).map(|i| (1, json!([format!("{}-{}", shard.name, i), i]))).collect();
            rows.push((2, json!({"shard": shard.name, "count": count})));
            Ok(rows)
        }

        async fn sentences(&self, _shard: &Shard, matches: &[RawRow]) -> Result<Vec<RawRow>, String> {
            Ok(matches
                .iter()
                .filter_map(|(_, payload)| payload.get(0).and_then(Value::as_str))
                .map(|id| (-1, json!([id, "some sentence"])))
                .collect())
        }
    }

    /// Reports every completion twice
    struct DoublingQueue {
        inner: TokioJobQueue,
    }

    impl JobQueue for DoublingQueue {
        fn enqueue(&self, request: JobRequest) -> Result<JobHandle, QueueError> {
            let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
            let reply = request.reply.clone();
            tokio::spawn(async move {
                while let Some(completion) = rx.recv().await {
                    let _ = reply.send(completion.clone());
                    let _ = reply.send(completion);
                }
            });
            self.inner.enqueue(JobRequest { reply: tx, ..request })
        }

        fn stop(&self, job: JobId) {
            self.inner.stop(job)
        }

        fn status(&self, job: JobId) -> JobStatus {
            self.inner.status(job)
        }
    }

    fn catalog() -> ShardCatalog {
        ShardCatalog::new(vec![
            Shard::new(1, "c1", "C", 700),
            Shard::new(1, "c1", "A", 100),
            Shard::new(1, "c1", "B", 200),
        ])
    }

    struct Harness {
        services: Arc<Services>,
        publisher: Arc<BroadcastPublisher>,
        queue: Arc<TokioJobQueue>,
    }

    fn harness(engine: FakeEngine, config: RunConfig) -> Harness {
        harness_with(catalog(), engine, config)
    }

    fn harness_with(catalog: ShardCatalog, engine: FakeEngine, config: RunConfig) -> Harness {
        let publisher = Arc::new(BroadcastPublisher::new(64));
        let queue = Arc::new(TokioJobQueue::new());
        let services = Arc::new(Services {
            catalog: Arc::new(catalog),
            translator: Arc::new(FakeTranslator),
            engine: Arc::new(engine),
            queue: queue.clone(),
            publisher: publisher.clone(),
            registry: RunRegistry::new(),
            store: Some(Arc::new(RunStore::temporary().unwrap())),
            config,
        });
        Harness { services, publisher, queue }
    }

    fn request(total: Option<i64>, simultaneous: bool) -> QueryRequest {
        QueryRequest {
            user: "alice".into(),
            room: Some("r1".into()),
            query: "[word=\"test\"]".into(),
            corpora: vec![1],
            languages: vec![],
            total_requested: total,
            page_size: 10,
            offset: 0,
            simultaneous,
        }
    }

    fn statuses(rx: &mut broadcast::Receiver<Published>) -> Vec<ProgressStatus> {
        let mut seen = Vec::new();
        while let Ok(published) = rx.try_recv() {
            seen.push(published.message.status);
        }
        seen
    }

    fn standard_engine() -> FakeEngine {
        FakeEngine::with_matches(&[("A", 4), ("B", 8), ("C", 30)])
    }

    #[test]
    fn test_page_rows_per_set() {
        let matches: Vec<RawRow> = vec![(1, json!(0)), (3, json!(0)), (1, json!(1)), (1, json!(2)), (3, json!(1))];
        assert_eq!(page_rows(&matches, 1, 1), vec![(1, json!(1)), (3, json!(1))]);
        assert!(page_rows(&matches, 0, 0).is_empty());
    }

    #[tokio::test]
    async fn test_sequential_run_is_satisfied_by_cap() {
        let h = harness(standard_engine(), RunConfig::default());
        let mut rx = h.publisher.subscribe();
        let controller = IterationController::start(h.services.clone(), &request(Some(10), false)).unwrap();
        let report = controller.run().await;

        assert_eq!(report.status, ProgressStatus::Satisfied);
        assert_eq!(report.results_so_far, 10);
        assert_eq!(report.hit_limit_at, Some(6));
        assert_eq!(report.done_shards, vec!["A", "B"]);
        assert_eq!(report.bundle.set(1).len(), 10);
        assert_eq!(report.bundle.set(2).len(), 2);
        assert_eq!(report.bundle.sentences.len(), 10);
        assert_eq!(
            statuses(&mut rx),
            vec![ProgressStatus::Started, ProgressStatus::Partial, ProgressStatus::Satisfied]
        );
        assert_eq!(h.queue.active(), 0);
    }

    #[tokio::test]
    async fn test_next_page_resumes_after_hit_limit() {
        let h = harness(standard_engine(), RunConfig::default());
        let first = IterationController::start(h.services.clone(), &request(Some(10), false))
            .unwrap()
            .run()
            .await;

        let resume = ResumeRequest {
            job: first.job,
            user: "alice".into(),
            room: Some("r1".into()),
            query: "[word=\"test\"]".into(),
            total_requested: Some(20),
            page_size: 10,
            offset: 10,
        };
        let controller = IterationController::resume_from_store(h.services.clone(), &resume).unwrap();
        assert_eq!(controller.state().restart_at, 6);
        let second = controller.run().await;

        assert_eq!(second.status, ProgressStatus::Satisfied);
        assert_eq!(second.results_so_far, 20);
        assert_eq!(second.hit_limit_at, Some(8));
        assert_eq!(second.done_shards, vec!["A", "B", "C"]);
        // remaining two matches of B, then eight of C
        let page = second.bundle.set(1);
        assert_eq!(page.len(), 10);
        assert_eq!(page[0], json!(["B-6", 6]));
        assert_eq!(page[2], json!(["C-0", 0]));
    }

    #[tokio::test]
    async fn test_unlimited_run_finishes() {
        let h = harness(standard_engine(), RunConfig::default());
        let report = IterationController::start(h.services.clone(), &request(None, false))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, ProgressStatus::Finished);
        assert_eq!(report.results_so_far, 42);
        assert_eq!(report.bundle.set(1).len(), 42);
        assert_eq!(report.persisted.matches_seen, 42);
    }

    #[tokio::test]
    async fn test_simultaneous_run_scans_every_shard() {
        let config = RunConfig {
            max_in_flight: 2,
            ..RunConfig::default()
        };
        let h = harness(standard_engine(), config);
        let mut rx = h.publisher.subscribe();
        let controller = IterationController::start(h.services.clone(), &request(Some(5), true)).unwrap();
        assert!(matches!(controller.scope(), RunScope::Group { .. }));
        let report = controller.run().await;

        assert_eq!(report.status, ProgressStatus::Finished);
        assert_eq!(report.results_so_far, 42);
        assert_eq!(report.done_shards.len(), 3);
        assert_eq!(report.bundle.set(1).len(), 42);
        assert_eq!(report.bundle.sentences.len(), 42);
        assert_eq!(statuses(&mut rx).last(), Some(&ProgressStatus::Finished));
    }

    #[tokio::test]
    async fn test_fan_out_bounds_concurrent_scans() {
        let sizes = [("S1", 10), ("S2", 20), ("S3", 30), ("S4", 40), ("S5", 50), ("S6", 60)];
        let catalog = ShardCatalog::new(sizes.iter().map(|(name, size)| Shard::new(1, "c1", *name, *size)));
        let engine = FakeEngine {
            delay: Some(Duration::from_millis(30)),
            ..FakeEngine::with_matches(&[("S1", 1), ("S3", 2), ("S6", 3)])
        };
        let peak = Arc::clone(&engine.peak);
        let config = RunConfig {
            max_in_flight: 2,
            ..RunConfig::default()
        };
        let h = harness_with(catalog, engine, config);
        let report = IterationController::start(h.services.clone(), &request(Some(5), true))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, ProgressStatus::Finished);
        assert_eq!(report.done_shards.len(), 6);
        assert_eq!(report.results_so_far, 6);
        // two chains of three scans, never more than two at once
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(h.queue.active(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_is_satisfied_immediately() {
        let h = harness(standard_engine(), RunConfig::default());
        let mut rx = h.publisher.subscribe();
        let controller = IterationController::start(h.services.clone(), &request(Some(0), false)).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), controller.run())
            .await
            .expect("run with a zero limit must end");

        assert_eq!(report.status, ProgressStatus::Satisfied);
        assert_eq!(report.results_so_far, 0);
        assert_eq!(report.hit_limit_at, Some(0));
        assert_eq!(report.done_shards, vec!["A"]);
        assert!(report.bundle.set(1).is_empty());
        assert!(report.bundle.sentences.is_empty());
        assert_eq!(statuses(&mut rx), vec![ProgressStatus::Started, ProgressStatus::Satisfied]);
    }

    #[tokio::test]
    async fn test_late_result_of_stopped_job_is_dropped() {
        let engine = FakeEngine {
            hang: true,
            ..standard_engine()
        };
        let h = harness(engine, RunConfig::default());
        let mut controller = IterationController::start(h.services.clone(), &request(Some(10), false)).unwrap();
        let shard = h.services.catalog.shards_for(&[1], &[]).unwrap()[0].clone();
        let job = controller.dispatch_query(&shard, 0, None).unwrap();

        controller.cancel();
        assert_eq!(controller.phase(), Phase::Cancelled);
        assert!(controller.in_flight.is_empty());

        let rows: Vec<RawRow> = (0..4).map(|i| (1, json!([format!("A-{i}"), i]))).collect();
        controller.on_completion(Completion {
            job,
            kind: CallbackKind::Query,
            shard,
            outcome: Ok(rows),
        });

        assert_eq!(controller.phase(), Phase::Cancelled);
        assert!(!controller.applied.contains(&job));
        assert!(controller.state().done_shards.is_empty());
        assert_eq!(controller.state().results_so_far, 0);
        assert!(controller.state().result_bundle.set(1).is_empty());
        assert_eq!(h.queue.active(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_applied_once() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let services = Arc::new(Services {
            catalog: Arc::new(catalog()),
            translator: Arc::new(FakeTranslator),
            engine: Arc::new(standard_engine()),
            queue: Arc::new(DoublingQueue { inner: TokioJobQueue::new() }),
            publisher,
            registry: RunRegistry::new(),
            store: None,
            config: RunConfig::default(),
        });
        let report = IterationController::start(services, &request(Some(100), false))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, ProgressStatus::Finished);
        assert_eq!(report.results_so_far, 42);
        assert_eq!(report.bundle.set(1).len(), 42);
        assert_eq!(report.bundle.set(2).len(), 3);
        assert_eq!(report.persisted.matches_seen, 42);
    }

    #[tokio::test]
    async fn test_job_failure_fails_run() {
        let engine = FakeEngine {
            fail_on: Some("B".into()),
            ..standard_engine()
        };
        let h = harness(engine, RunConfig::default());
        let mut rx = h.publisher.subscribe();
        let report = IterationController::start(h.services.clone(), &request(Some(10), false))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, ProgressStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("relation does not exist"));
        assert_eq!(report.done_shards, vec!["A"]);
        assert_eq!(statuses(&mut rx).last(), Some(&ProgressStatus::Failed));
    }

    #[tokio::test]
    async fn test_silent_jobs_time_out() {
        let engine = FakeEngine {
            hang: true,
            ..standard_engine()
        };
        let config = RunConfig {
            job_timeout_secs: 1,
            ..RunConfig::default()
        };
        let h = harness(engine, config);
        let report = IterationController::start(h.services.clone(), &request(Some(10), false))
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, ProgressStatus::Timeout);
        assert_eq!(report.persisted.current_shard.map(|s| s.name), Some("A".to_string()));
        let stored = h.services.store.as_ref().unwrap().load(report.job).unwrap();
        assert!(stored.is_some());
        assert_eq!(h.queue.active(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let engine = FakeEngine {
            hang: true,
            ..standard_engine()
        };
        let h = harness(engine, RunConfig::default());
        let mut rx = h.publisher.subscribe();
        let controller = IterationController::start(h.services.clone(), &request(Some(10), false)).unwrap();
        let scope = controller.scope().clone();
        let running = tokio::spawn(controller.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.services.registry.cancel(&scope), 1);
        let report = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();

        assert_eq!(report.status, ProgressStatus::Stopped);
        assert!(h.services.registry.active(&scope).is_empty());
        assert_eq!(h.queue.active(), 0);
        assert_eq!(statuses(&mut rx).last(), Some(&ProgressStatus::Stopped));
        // cancelling again is harmless
        assert_eq!(h.services.registry.cancel(&scope), 0);
    }

    #[tokio::test]
    async fn test_new_query_supersedes_room() {
        let engine = FakeEngine {
            hang: true,
            ..standard_engine()
        };
        let h = harness(engine, RunConfig::default());
        let first = IterationController::start(h.services.clone(), &request(Some(10), false)).unwrap();
        let running = tokio::spawn(first.run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _second = IterationController::start(h.services.clone(), &request(Some(10), false)).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert_eq!(report.status, ProgressStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_errors() {
        let h = harness(standard_engine(), RunConfig::default());

        let mut nothing = request(Some(10), false);
        nothing.corpora.clear();
        assert!(matches!(
            IterationController::start(h.services.clone(), &nothing),
            Err(RunError::NoShards)
        ));

        let mut unknown = request(Some(10), false);
        unknown.corpora = vec![9];
        assert!(matches!(
            IterationController::start(h.services.clone(), &unknown),
            Err(RunError::Catalog(_))
        ));

        let mut empty = request(Some(10), false);
        empty.query.clear();
        assert!(matches!(
            IterationController::start(h.services.clone(), &empty),
            Err(RunError::Translate(_))
        ));

        let resume = ResumeRequest {
            job: Uuid::new_v4(),
            user: "alice".into(),
            room: None,
            query: "x".into(),
            total_requested: Some(10),
            page_size: 10,
            offset: 0,
        };
        assert!(matches!(
            IterationController::resume_from_store(h.services.clone(), &resume),
            Err(RunError::InvalidResume(_))
        ));
    }
}
