use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use applytrack_core::{Clock, PersistencePolicy, SchedulerConfig, SnapshotStore};
use chrono::{DateTime, FixedOffset, Utc};
use futures_util::future::join_all;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{ExecutionError, Result, SchedulerError},
    executor::JobExecutor,
    schedule::{calculate_next_run, first_run},
    types::{JobKind, NewJob, ScheduledJob, TickReport},
};

pub type JobStore = Arc<dyn SnapshotStore<Vec<ScheduledJob>>>;

/// Rebuild the queue once stale entries outnumber live jobs by this much.
const QUEUE_SLACK: usize = 64;

struct SchedulerState {
    jobs: HashMap<String, ScheduledJob>,
    /// Min-heap of `(next_run, id)`. Entries are not removed when a job is
    /// cancelled or rescheduled; they are discarded when they surface.
    queue: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
    in_flight: HashSet<String>,
}

impl SchedulerState {
    fn is_current(&self, at: DateTime<Utc>, id: &str) -> bool {
        !self.in_flight.contains(id)
            && self
                .jobs
                .get(id)
                .is_some_and(|job| job.active && job.next_run == Some(at))
    }

    fn enqueue(&mut self, job: &ScheduledJob) {
        if let (true, Some(at)) = (job.active, job.next_run) {
            self.queue.push(Reverse((at, job.id.clone())));
        }
    }

    fn compact(&mut self) {
        if self.queue.len() <= self.jobs.len() * 2 + QUEUE_SLACK {
            return;
        }
        let live: Vec<ScheduledJob> = self.jobs.values().cloned().collect();
        self.queue.clear();
        for job in &live {
            self.enqueue(job);
        }
    }

    /// All jobs, oldest first.
    fn snapshot(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

/// Single-process job scheduler: owns the job set, runs due jobs through a
/// [`JobExecutor`] and snapshots the full set to a [`SnapshotStore`].
///
/// All methods take `&self`; share it behind an `Arc` between the run loop
/// and callers that add or cancel jobs.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    executor: Arc<dyn JobExecutor>,
    store: JobStore,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    tz: FixedOffset,
    wake: Notify,
}

impl JobScheduler {
    /// Build a scheduler and resume whatever `store` last saved.
    ///
    /// Jobs that fell due while the process was down are kept as-is and run
    /// on the first tick.
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn JobExecutor>,
        store: JobStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.poll_interval_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "poll interval must be positive".to_string(),
            ));
        }
        if config.executor_timeout_secs == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "executor timeout must be positive when set".to_string(),
            ));
        }
        let tz = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60)).ok_or_else(
            || {
                SchedulerError::InvalidConfig(format!(
                    "utc offset out of range: {} minutes",
                    config.utc_offset_minutes
                ))
            },
        )?;

        let saved = match store.load() {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) if config.persistence == PersistencePolicy::Fatal => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "scheduled job snapshot unreadable, starting empty");
                Vec::new()
            }
        };

        let mut state = SchedulerState {
            jobs: HashMap::with_capacity(saved.len()),
            queue: BinaryHeap::with_capacity(saved.len()),
            in_flight: HashSet::new(),
        };
        let now = clock.now();
        let mut overdue = 0usize;
        for job in saved {
            if job.is_due(now) {
                overdue += 1;
            }
            state.enqueue(&job);
            state.jobs.insert(job.id.clone(), job);
        }
        info!(count = state.jobs.len(), "scheduler state restored");
        if overdue > 0 {
            warn!(count = overdue, "jobs overdue on startup, running on first tick");
        }

        Ok(Self {
            state: Mutex::new(state),
            executor,
            store,
            clock,
            config,
            tz,
            wake: Notify::new(),
        })
    }

    /// Add a job and persist the job set. Returns the new job's id.
    pub fn schedule_job(&self, new: NewJob) -> Result<String> {
        let next_run = match &new.recurring {
            None => new.scheduled_for,
            Some(rule) => {
                rule.validate()?;
                first_run(new.scheduled_for, rule, &self.tz).ok_or_else(|| {
                    SchedulerError::InvalidRecurrence(format!(
                        "no run can be computed from {}",
                        new.scheduled_for
                    ))
                })?
            }
        };

        let job = ScheduledJob {
            id: Uuid::new_v4().to_string(),
            kind: new.kind,
            data: new.data,
            scheduled_for: new.scheduled_for,
            recurring: new.recurring,
            last_run: None,
            next_run: Some(next_run),
            active: true,
            consecutive_failures: 0,
            created_at: self.clock.now(),
        };
        let id = job.id.clone();

        {
            let mut state = self.lock();
            state.enqueue(&job);
            state.jobs.insert(id.clone(), job);
            if let Err(e) = self.persist(&state) {
                state.jobs.remove(&id);
                return Err(e);
            }
        }

        info!(job_id = %id, %next_run, "job scheduled");
        self.wake.notify_one();
        Ok(id)
    }

    /// Remove a job. Returns `false` when `id` is unknown.
    ///
    /// A run already in progress is allowed to finish but the job is not
    /// brought back afterwards.
    pub fn cancel_job(&self, id: &str) -> Result<bool> {
        let mut state = self.lock();
        let Some(job) = state.jobs.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&state) {
            state.jobs.insert(job.id.clone(), job);
            return Err(e);
        }
        state.compact();
        info!(job_id = %id, "job cancelled");
        Ok(true)
    }

    /// Pause or resume a job. Resuming clears its failure streak.
    /// Returns `false` when `id` is unknown.
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(false);
        };
        let before = (job.active, job.consecutive_failures);
        job.active = active;
        if active {
            job.consecutive_failures = 0;
        }
        let job = job.clone();

        if let Err(e) = self.persist(state) {
            if let Some(job) = state.jobs.get_mut(id) {
                (job.active, job.consecutive_failures) = before;
            }
            return Err(e);
        }
        // an already-active job has a live queue entry
        if active && !before.0 {
            state.enqueue(&job);
        }
        drop(guard);

        info!(job_id = %id, active, "job activity changed");
        if active {
            self.wake.notify_one();
        }
        Ok(true)
    }

    /// Every known job, oldest first.
    pub fn get_jobs(&self) -> Vec<ScheduledJob> {
        self.lock().snapshot()
    }

    pub fn get_job(&self, id: &str) -> Option<ScheduledJob> {
        self.lock().jobs.get(id).cloned()
    }

    /// Earliest `next_run` among active jobs that are not currently running.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        while let Some(Reverse((at, id))) = state.queue.peek() {
            if state.is_current(*at, id) {
                return Some(*at);
            }
            state.queue.pop();
        }
        None
    }

    /// Run every due job once, concurrently, then persist the job set.
    ///
    /// Only a persistence failure under the `fatal` policy is returned;
    /// executor failures are counted in the report.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let due = self.take_due(now);
        if due.is_empty() {
            return Ok(TickReport::default());
        }
        debug!(count = due.len(), "dispatching due jobs");

        let timeout = self.config.executor_timeout_secs;
        let runs = due.into_iter().map(|job| {
            let executor = Arc::clone(&self.executor);
            async move {
                let id = job.id.clone();
                let kind = job.kind;
                (id, kind, execute(executor, job, timeout).await)
            }
        });
        let outcomes = join_all(runs).await;

        self.apply(now, outcomes)
    }

    /// Tick until `shutdown` flips to `true`.
    ///
    /// Between ticks the loop sleeps until the earliest `next_run` or the poll
    /// interval, whichever comes first, and wakes early when a job is added.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "scheduler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler stopping after tick failure");
                return Err(e);
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("scheduler shutting down");
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &SchedulerState) -> Result<()> {
        match self.store.save(&state.snapshot()) {
            Ok(()) => Ok(()),
            Err(e) if self.config.persistence == PersistencePolicy::Fatal => {
                error!(error = %e, "failed to persist scheduled jobs");
                Err(e.into())
            }
            Err(e) => {
                warn!(error = %e, "failed to persist scheduled jobs, keeping in-memory state");
                Ok(())
            }
        }
    }

    /// Pop due entries off the queue and mark their jobs as running.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = state.queue.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, id))) = state.queue.pop() else {
                break;
            };
            if !state.is_current(at, &id) {
                continue;
            }
            if let Some(job) = state.jobs.get(&id) {
                due.push(job.clone());
                state.in_flight.insert(id);
            }
        }
        due
    }

    fn apply(
        &self,
        now: DateTime<Utc>,
        outcomes: Vec<(String, JobKind, std::result::Result<(), ExecutionError>)>,
    ) -> Result<TickReport> {
        let mut report = TickReport {
            executed: outcomes.len(),
            ..TickReport::default()
        };
        let mut guard = self.lock();
        let state = &mut *guard;

        for (id, kind, outcome) in outcomes {
            state.in_flight.remove(&id);
            let Some(job) = state.jobs.get_mut(&id) else {
                debug!(job_id = %id, %kind, "job cancelled while running, dropping result");
                continue;
            };

            match outcome {
                Ok(()) => {
                    job.last_run = Some(now);
                    job.consecutive_failures = 0;
                    let Some(rule) = job.recurring.clone() else {
                        state.jobs.remove(&id);
                        report.removed += 1;
                        info!(job_id = %id, %kind, "one-shot job completed");
                        continue;
                    };
                    job.next_run = calculate_next_run(now, &rule, &self.tz);
                    match job.next_run {
                        Some(next_run) => {
                            report.rescheduled += 1;
                            info!(job_id = %id, %kind, %next_run, "job rescheduled");
                        }
                        None => {
                            job.active = false;
                            report.deactivated += 1;
                            warn!(job_id = %id, %kind, "no further run representable, job deactivated");
                        }
                    }
                    let job = job.clone();
                    state.enqueue(&job);
                }
                Err(e) => {
                    report.failed += 1;
                    job.consecutive_failures = job.consecutive_failures.saturating_add(1);
                    error!(
                        job_id = %id,
                        %kind,
                        failures = job.consecutive_failures,
                        error = %e,
                        "job execution failed"
                    );
                    if self
                        .config
                        .max_consecutive_failures
                        .is_some_and(|max| job.consecutive_failures >= max)
                    {
                        job.active = false;
                        report.deactivated += 1;
                        warn!(
                            job_id = %id,
                            %kind,
                            failures = job.consecutive_failures,
                            "job deactivated after repeated failures"
                        );
                    }
                    // next_run is left alone so the job is retried on a later tick.
                    let job = job.clone();
                    state.enqueue(&job);
                }
            }
        }

        self.persist(state)?;
        Ok(report)
    }

    fn next_delay(&self) -> Duration {
        let poll = Duration::from_secs(self.config.poll_interval_secs);
        let now = self.clock.now();
        match self.next_wake() {
            Some(at) if at > now => (at - now).to_std().map_or(poll, |d| d.min(poll)),
            // Overdue entries are retried jobs; they wait for the next poll.
            _ => poll,
        }
    }
}

async fn execute(
    executor: Arc<dyn JobExecutor>,
    job: ScheduledJob,
    timeout_secs: Option<u64>,
) -> std::result::Result<(), ExecutionError> {
    let handle = tokio::spawn(async move {
        match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), executor.execute(&job))
                .await
                .unwrap_or(Err(ExecutionError::Timeout { secs })),
            None => executor.execute(&job).await,
        }
    });
    handle
        .await
        .unwrap_or_else(|e| Err(ExecutionError::Aborted(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interval, Recurrence};
    use applytrack_core::{ManualClock, MemoryStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl JobExecutor for Noop {
        async fn execute(&self, _job: &ScheduledJob) -> std::result::Result<(), ExecutionError> {
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl JobExecutor for Panics {
        async fn execute(&self, _job: &ScheduledJob) -> std::result::Result<(), ExecutionError> {
            panic!("executor blew up");
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn memory() -> JobStore {
        Arc::new(MemoryStore::<Vec<ScheduledJob>>::new())
    }

    fn scheduler(executor: Arc<dyn JobExecutor>, clock: &ManualClock) -> JobScheduler {
        JobScheduler::new(
            SchedulerConfig::default(),
            executor,
            memory(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_config() {
        let clock = ManualClock::new(start());
        let zero_poll = SchedulerConfig {
            poll_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        let res = JobScheduler::new(
            zero_poll,
            Arc::new(Noop),
            memory(),
            Arc::new(clock.clone()),
        );
        assert!(matches!(res, Err(SchedulerError::InvalidConfig(_))));

        let huge_offset = SchedulerConfig {
            utc_offset_minutes: 24 * 60,
            ..SchedulerConfig::default()
        };
        let res = JobScheduler::new(
            huge_offset,
            Arc::new(Noop),
            memory(),
            Arc::new(clock),
        );
        assert!(matches!(res, Err(SchedulerError::InvalidConfig(_))));
    }

    fn cleanup_in(delay: chrono::Duration) -> NewJob {
        NewJob::once(JobKind::Cleanup, json!({}), start() + delay)
    }

    #[test]
    fn next_wake_skips_cancelled_and_paused_jobs() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Noop), &clock);
        let five_min = chrono::Duration::minutes(5);
        let one_hour = chrono::Duration::hours(1);
        let two_hours = chrono::Duration::hours(2);
        let soon = s.schedule_job(cleanup_in(five_min)).unwrap();
        let later = s.schedule_job(cleanup_in(one_hour)).unwrap();
        let latest = s.schedule_job(cleanup_in(two_hours)).unwrap();

        assert_eq!(s.next_wake(), Some(start() + five_min));
        assert!(s.cancel_job(&soon).unwrap());
        assert_eq!(s.next_wake(), Some(start() + one_hour));
        assert!(s.set_active(&later, false).unwrap());
        assert_eq!(s.next_wake(), Some(start() + two_hours));
        assert!(s.set_active(&later, true).unwrap());
        assert_eq!(s.next_wake(), Some(start() + one_hour));
        assert!(s.cancel_job(&latest).unwrap());
        assert!(!s.set_active("missing", true).unwrap());
    }

    #[test]
    fn recurring_job_gets_first_run_from_rule() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Noop), &clock);
        let rule = Recurrence::new(Interval::Daily).at("18:30".parse().unwrap());
        let id = s
            .schedule_job(NewJob::recurring(JobKind::WeeklyDigest, json!({}), start(), rule))
            .unwrap();
        let job = s.get_job(&id).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap();
        assert_eq!(job.next_run, Some(expected));
        assert_eq!(job.scheduled_for, start());
        assert!(job.active);
        assert_eq!(job.created_at, start());
    }

    #[test]
    fn empty_days_of_week_is_rejected() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Noop), &clock);
        let mut rule = Recurrence::new(Interval::Weekly);
        rule.days_of_week = Some(Default::default());
        let err = s
            .schedule_job(NewJob::recurring(JobKind::WeeklyDigest, json!({}), start(), rule))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRecurrence(_)));
        assert!(s.get_jobs().is_empty());
    }

    #[tokio::test]
    async fn panicking_executor_counts_as_failure() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Panics), &clock);
        let id = s
            .schedule_job(NewJob::once(JobKind::Cleanup, json!({}), start()))
            .unwrap();
        let report = s.tick().await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(report.failed, 1);
        let job = s.get_job(&id).unwrap();
        assert_eq!(job.next_run, Some(start()));
        assert_eq!(job.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn tick_with_nothing_due_is_empty() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Noop), &clock);
        s.schedule_job(cleanup_in(chrono::Duration::seconds(1)))
            .unwrap();
        assert_eq!(s.tick().await.unwrap(), TickReport::default());
    }

    #[test]
    fn resuming_an_active_job_does_not_grow_the_queue() {
        let clock = ManualClock::new(start());
        let s = scheduler(Arc::new(Noop), &clock);
        let id = s.schedule_job(cleanup_in(chrono::Duration::hours(1))).unwrap();
        for _ in 0..10 {
            assert!(s.set_active(&id, true).unwrap());
        }
        assert_eq!(s.lock().queue.len(), 1);

        assert!(s.set_active(&id, false).unwrap());
        assert!(s.set_active(&id, true).unwrap());
        assert_eq!(s.next_wake(), Some(start() + chrono::Duration::hours(1)));
    }
}
