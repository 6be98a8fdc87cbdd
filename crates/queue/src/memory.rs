//! In-process broker.
//!
//! All state lives behind one mutex; critical sections never await, so the
//! broker can be shared by workers running on separate runtimes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::JobQueue;
use crate::error::QueueError;
use crate::events::QueueEvent;
use crate::flow::{FlowJob, JobNode};
use crate::job::{ActiveJob, ChildValue, Job, JobId, JobKind, JobOptions, JobOutcome, JobState};
use crate::metrics::QueueMetrics;
use crate::settings::BrokerSettings;

pub const STALLED_REASON: &str = "job stalled more than allowable limit";

struct Entry {
    job: Job,
    children: Vec<JobId>,
    pending_children: HashSet<JobId>,
    token: Option<Uuid>,
    lock_expires: Option<Instant>,
    started: Option<Instant>,
}

/// Concurrency slot still held by the worker of a stalled job.
struct StaleLock {
    job: JobId,
    kind: JobKind,
    release_at: Instant,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Entry>,
    waiting: VecDeque<JobId>,
    /// Finished jobs per kind and outcome (`true` = failed), oldest first.
    finished: HashMap<(JobKind, bool), VecDeque<JobId>>,
    /// Keyed by the token the stalled holder still carries.
    stale_locks: HashMap<Uuid, StaleLock>,
    metrics: QueueMetrics,
    closed: bool,
}

impl State {
    fn record_finished(&mut self, id: JobId, kind: JobKind, failed: bool) {
        self.finished.entry((kind, failed)).or_default().push_back(id);
    }

    /// Give back the slot of a stalled holder.
    fn release_stale(&mut self, token: Uuid) -> bool {
        let Some(lock) = self.stale_locks.remove(&token) else {
            return false;
        };
        self.metrics.record_inactive(lock.kind);
        tracing::debug!(job = %lock.job, kind = %lock.kind, "stalled holder released its slot");
        true
    }
}

pub struct MemoryQueue {
    settings: BrokerSettings,
    state: Mutex<State>,
    events: broadcast::Sender<QueueEvent>,
    available: Notify,
    shutdown: Notify,
}

impl MemoryQueue {
    pub fn new(settings: BrokerSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            settings,
            state: Mutex::new(State::default()),
            events,
            available: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn emit(&self, events: Vec<QueueEvent>) {
        for event in events {
            tracing::debug!(job = %event.id(), kind = %event.kind(), ?event, "queue event");
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        self.available.notify_waiters();
    }

    /// Requeue or fail every active job whose lock expired. Returns how many stalled.
    pub fn check_stalled(&self) -> usize {
        let mut events = Vec::new();
        let stalled = {
            let mut state = self.state();
            self.sweep_stalled(&mut state, &mut events)
        };
        if stalled > 0 {
            self.emit(events);
        }
        stalled
    }

    /// Run [`check_stalled`](Self::check_stalled) periodically until the queue is closed.
    pub fn spawn_stall_checker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let period = Duration::from_millis(self.settings.stall_check_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if queue.is_closed() {
                            break;
                        }
                        let n = queue.check_stalled();
                        if n > 0 {
                            tracing::warn!(stalled = n, "stalled jobs detected");
                        }
                    }
                    _ = queue.shutdown.notified() => break,
                }
            }
            tracing::debug!("stall checker stopped");
        })
    }

    fn sweep_stalled(&self, state: &mut State, events: &mut Vec<QueueEvent>) -> usize {
        let now = Instant::now();

        // Holders of stalled jobs that went silent for a whole lock window
        let lapsed: Vec<Uuid> = state
            .stale_locks
            .iter()
            .filter(|(_, lock)| lock.release_at <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in lapsed {
            if let Some(lock) = state.stale_locks.get(&token) {
                tracing::warn!(job = %lock.job, kind = %lock.kind, "stalled holder never reported, slot released");
            }
            state.release_stale(token);
            self.available.notify_waiters();
        }

        let expired: Vec<JobId> = state
            .jobs
            .iter()
            .filter(|(_, e)| e.job.state == JobState::Active && e.lock_expires.map_or(false, |t| t <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            let Some(entry) = state.jobs.get_mut(id) else { continue };
            let kind = entry.job.kind;
            let settings = self.settings.queue(kind);

            entry.job.stalled_count += 1;
            entry.lock_expires = None;
            entry.started = None;
            let exhausted = entry.job.stalled_count > settings.max_stalled_count;

            // The holder may still be running: its slot stays taken until it
            // reports in or stays silent for another lock window
            if let Some(token) = entry.token.take() {
                let release_at = now + settings.lock_duration();
                state.stale_locks.insert(token, StaleLock { job: *id, kind, release_at });
            }
            state.metrics.record_stall(kind);

            if exhausted {
                entry.job.state = JobState::Failed;
                entry.job.failed_reason = Some(STALLED_REASON.to_string());
                entry.job.finished_at = Some(Utc::now());
                state.metrics.record_failure(kind);
                state.record_finished(*id, kind, true);
                events.push(QueueEvent::Failed { id: *id, kind, reason: STALLED_REASON.to_string() });
                propagate(state, *id, Some(STALLED_REASON), events);
            } else {
                entry.job.state = JobState::Waiting;
                state.waiting.push_front(*id);
                events.push(QueueEvent::Stalled { id: *id, kind });
            }
        }

        if !expired.is_empty() {
            self.evict_finished(state, events);
        }
        expired.len()
    }

    /// Validate that `token` holds the lock of active job `id`. A stalled
    /// holder reporting in with its old token gives its slot back.
    fn locked_entry<'a>(&self, state: &'a mut State, id: JobId, token: Uuid) -> Result<&'a mut Entry, QueueError> {
        let holds = state
            .jobs
            .get(&id)
            .map(|e| e.job.state == JobState::Active && e.token == Some(token));
        if holds != Some(true) && state.release_stale(token) {
            self.available.notify_waiters();
        }
        match holds {
            None => Err(QueueError::NotFound(id)),
            Some(false) => Err(QueueError::LockMismatch(id)),
            Some(true) => state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id)),
        }
    }

    /// Drop the oldest finished jobs of every kind beyond its retention limit.
    /// A child stays while its parent is unfinished, so the parent can still
    /// read its value.
    fn evict_finished(&self, state: &mut State, events: &mut Vec<QueueEvent>) {
        let buckets: Vec<(JobKind, bool)> = state.finished.keys().copied().collect();
        for (kind, failed) in buckets {
            let keep = self.settings.queue(kind).retention(failed);
            loop {
                let Some(ledger) = state.finished.get(&(kind, failed)) else { break };
                if ledger.len() <= keep {
                    break;
                }
                let Some(pos) = ledger.iter().position(|id| evictable(state, *id)) else { break };
                let Some(id) = state.finished.get_mut(&(kind, failed)).and_then(|l| l.remove(pos)) else {
                    break;
                };
                if let Some(entry) = state.jobs.remove(&id) {
                    if let Some(parent) = entry.job.parent.and_then(|p| state.jobs.get_mut(&p)) {
                        parent.children.retain(|c| *c != id);
                    }
                    events.push(QueueEvent::Removed { id, kind });
                }
            }
        }
    }
}

/// A finished job may go unless its parent still needs its value. Ids of
/// jobs removed by hand are always evictable.
fn evictable(state: &State, id: JobId) -> bool {
    let Some(entry) = state.jobs.get(&id) else { return true };
    match entry.job.parent.and_then(|p| state.jobs.get(&p)) {
        Some(parent) => matches!(parent.job.state, JobState::Completed | JobState::Failed),
        None => true,
    }
}

fn insert_flow(state: &mut State, flow: FlowJob, parent: Option<JobId>, events: &mut Vec<QueueEvent>) -> JobNode {
    let id = Uuid::new_v4();
    let kind = flow.kind;

    let children: Vec<JobNode> = flow
        .children
        .into_iter()
        .map(|child| insert_flow(state, child, Some(id), events))
        .collect();
    let child_ids: Vec<JobId> = children.iter().map(|c| c.id).collect();

    let job_state = if child_ids.is_empty() {
        state.waiting.push_back(id);
        JobState::Waiting
    } else {
        JobState::WaitingChildren
    };

    state.jobs.insert(
        id,
        Entry {
            job: Job {
                id,
                kind,
                data: flow.data,
                opts: flow.opts,
                parent,
                state: job_state,
                attempts_started: 0,
                stalled_count: 0,
                return_value: None,
                failed_reason: None,
                created_at: Utc::now(),
                finished_at: None,
            },
            pending_children: child_ids.iter().copied().collect(),
            children: child_ids,
            token: None,
            lock_expires: None,
            started: None,
        },
    );
    events.push(QueueEvent::Added { id, kind });

    JobNode { id, kind, children }
}

/// Settle `child` in its parent: fail the parent when the child failed and
/// was marked critical, otherwise count the child as resolved.
fn propagate(state: &mut State, child: JobId, failure: Option<&str>, events: &mut Vec<QueueEvent>) {
    let Some((parent_id, opts, child_kind)) = state
        .jobs
        .get(&child)
        .and_then(|e| e.job.parent.map(|p| (p, e.job.opts, e.job.kind)))
    else {
        return;
    };
    resolve_in_parent(state, parent_id, child, child_kind, opts, failure, events);
}

fn resolve_in_parent(
    state: &mut State,
    parent_id: JobId,
    child: JobId,
    child_kind: JobKind,
    opts: JobOptions,
    failure: Option<&str>,
    events: &mut Vec<QueueEvent>,
) {
    let Some(parent) = state.jobs.get_mut(&parent_id) else { return };
    if parent.job.state != JobState::WaitingChildren {
        return;
    }
    parent.pending_children.remove(&child);
    let parent_kind = parent.job.kind;

    match failure {
        Some(reason) if opts.fail_parent_on_failure => {
            let reason = format!("child {} ({}) failed: {}", child, child_kind, reason);
            parent.job.state = JobState::Failed;
            parent.job.failed_reason = Some(reason.clone());
            parent.job.finished_at = Some(Utc::now());
            state.metrics.record_failure(parent_kind);
            state.record_finished(parent_id, parent_kind, true);
            events.push(QueueEvent::Failed { id: parent_id, kind: parent_kind, reason: reason.clone() });
            propagate(state, parent_id, Some(&reason), events);
        }
        _ => {
            if parent.pending_children.is_empty() {
                parent.job.state = JobState::Waiting;
                state.waiting.push_back(parent_id);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add_flow(&self, flow: FlowJob) -> Result<JobNode, QueueError> {
        let mut events = Vec::new();
        let node = {
            let mut state = self.state();
            if state.closed {
                return Err(QueueError::Closed);
            }
            insert_flow(&mut state, flow, None, &mut events)
        };
        self.emit(events);
        Ok(node)
    }

    async fn next_job(&self, kinds: &[JobKind], worker: &str) -> Result<Option<ActiveJob>, QueueError> {
        let mut events = Vec::new();
        let claimed = {
            let mut state = self.state();
            if state.closed {
                return Ok(None);
            }
            self.sweep_stalled(&mut state, &mut events);

            let position = state.waiting.iter().position(|id| {
                state.jobs.get(id).map_or(false, |e| {
                    let kind = e.job.kind;
                    kinds.contains(&kind)
                        && self
                            .settings
                            .queue(kind)
                            .concurrency
                            .map_or(true, |limit| state.metrics.active_count(kind) < limit)
                })
            });

            match position.and_then(|pos| state.waiting.remove(pos)) {
                None => None,
                Some(id) => {
                    let now = Instant::now();
                    let token = Uuid::new_v4();
                    let state = &mut *state;
                    let entry = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
                    let kind = entry.job.kind;
                    entry.job.state = JobState::Active;
                    entry.job.attempts_started += 1;
                    entry.token = Some(token);
                    entry.lock_expires = Some(now + self.settings.queue(kind).lock_duration());
                    entry.started = Some(now);
                    state.metrics.record_active(kind);
                    events.push(QueueEvent::Active { id, kind, worker: worker.to_string() });

                    Some(ActiveJob {
                        id,
                        kind,
                        data: entry.job.data.clone(),
                        token,
                        attempt: entry.job.attempts_started,
                    })
                }
            }
        };

        if !events.is_empty() {
            self.emit(events);
        }
        Ok(claimed)
    }

    async fn wait_for_job(
        &self,
        kinds: &[JobKind],
        worker: &str,
        timeout: Duration,
    ) -> Result<Option<ActiveJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        let recheck = Duration::from_millis(self.settings.stall_check_ms.max(1));

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.next_job(kinds, worker).await? {
                return Ok(Some(job));
            }
            if self.is_closed() || Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), QueueError> {
        let mut state = self.state();
        // A stalled holder still renewing is alive: keep its slot taken
        if let Some(lock) = state.stale_locks.get_mut(&token) {
            lock.release_at = Instant::now() + self.settings.queue(lock.kind).lock_duration();
            return Err(QueueError::LockMismatch(id));
        }
        let entry = self.locked_entry(&mut state, id, token)?;
        let lock = self.settings.queue(entry.job.kind).lock_duration();
        entry.lock_expires = Some(Instant::now() + lock);
        Ok(())
    }

    async fn complete(&self, id: JobId, token: Uuid, value: serde_json::Value) -> Result<(), QueueError> {
        let mut events = Vec::new();
        {
            let mut state = self.state();
            let entry = self.locked_entry(&mut state, id, token)?;
            let kind = entry.job.kind;
            let elapsed = entry.started.map(|s| s.elapsed()).unwrap_or_default();
            entry.job.state = JobState::Completed;
            entry.job.return_value = Some(value);
            entry.job.finished_at = Some(Utc::now());
            entry.token = None;
            entry.lock_expires = None;

            state.metrics.record_inactive(kind);
            state.metrics.record_completion(kind, elapsed);
            state.record_finished(id, kind, false);
            events.push(QueueEvent::Completed { id, kind });
            propagate(&mut state, id, None, &mut events);
            self.evict_finished(&mut state, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    async fn fail(&self, id: JobId, token: Uuid, reason: String) -> Result<(), QueueError> {
        let mut events = Vec::new();
        {
            let mut state = self.state();
            let entry = self.locked_entry(&mut state, id, token)?;
            let kind = entry.job.kind;
            entry.job.state = JobState::Failed;
            entry.job.failed_reason = Some(reason.clone());
            entry.job.finished_at = Some(Utc::now());
            entry.token = None;
            entry.lock_expires = None;

            state.metrics.record_inactive(kind);
            state.metrics.record_failure(kind);
            state.record_finished(id, kind, true);
            events.push(QueueEvent::Failed { id, kind, reason: reason.clone() });
            propagate(&mut state, id, Some(&reason), &mut events);
            self.evict_finished(&mut state, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    async fn children_values(&self, id: JobId) -> Result<Vec<ChildValue>, QueueError> {
        let state = self.state();
        let entry = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?;
        Ok(entry
            .children
            .iter()
            .filter_map(|child| state.jobs.get(child))
            .filter(|c| c.job.state == JobState::Completed)
            .filter_map(|c| {
                c.job.return_value.as_ref().map(|value| ChildValue {
                    id: c.job.id,
                    kind: c.job.kind,
                    value: value.clone(),
                })
            })
            .collect())
    }

    async fn job(&self, id: JobId) -> Result<Job, QueueError> {
        self.state()
            .jobs
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or(QueueError::NotFound(id))
    }

    async fn remove_job(&self, id: JobId) -> Result<(), QueueError> {
        let mut events = Vec::new();
        {
            let mut state = self.state();
            if !state.jobs.contains_key(&id) {
                return Err(QueueError::NotFound(id));
            }

            // The job and its descendants, none of which may be running
            let mut doomed = vec![id];
            let mut i = 0;
            while i < doomed.len() {
                let current = doomed[i];
                if let Some(entry) = state.jobs.get(&current) {
                    if entry.job.state == JobState::Active {
                        return Err(QueueError::Locked(current));
                    }
                    doomed.extend(entry.children.iter().copied());
                }
                i += 1;
            }

            // Detach from the parent; a pending child counts as resolved
            let parent = state.jobs.get(&id).and_then(|e| e.job.parent.map(|p| (p, e.job.kind)));
            if let Some((parent_id, kind)) = parent {
                if let Some(p) = state.jobs.get_mut(&parent_id) {
                    p.children.retain(|c| *c != id);
                }
                resolve_in_parent(&mut state, parent_id, id, kind, JobOptions::default(), None, &mut events);
            }

            let doomed: HashSet<JobId> = doomed.into_iter().collect();
            state.waiting.retain(|w| !doomed.contains(w));
            for job_id in &doomed {
                if let Some(entry) = state.jobs.remove(job_id) {
                    events.push(QueueEvent::Removed { id: *job_id, kind: entry.job.kind });
                }
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn wait_until_finished(&self, id: JobId, timeout: Duration) -> Result<JobOutcome, QueueError> {
        let mut rx = self.events.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            let job = self.job(id).await?;
            match job.state {
                JobState::Completed => {
                    return Ok(JobOutcome::Completed(job.return_value.unwrap_or_default()));
                }
                JobState::Failed => {
                    return Ok(JobOutcome::Failed(job.failed_reason.unwrap_or_default()));
                }
                _ => {}
            }

            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => return Err(QueueError::Timeout(timeout.as_millis() as u64)),
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(QueueError::Closed),
                // Any event or a lag: re-read the job state
                Ok(_) => {}
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn metrics(&self) -> QueueMetrics {
        self.state().metrics.clone()
    }

    fn close(&self) {
        self.state().closed = true;
        self.available.notify_waiters();
        self.shutdown.notify_waiters();
        tracing::info!("queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobContract;
    use crate::settings::QueueSettings;

    struct Leaf;

    impl JobContract for Leaf {
        const KIND: JobKind = JobKind::ComputeFpOta;
        type Input = u32;
        type Output = u32;
    }

    struct Root;

    impl JobContract for Root {
        const KIND: JobKind = JobKind::Compute;
        type Input = String;
        type Output = String;
    }

    struct Nsr;

    impl JobContract for Nsr {
        const KIND: JobKind = JobKind::ComputeNsr;
        type Input = f64;
        type Output = usize;
    }

    fn queue() -> MemoryQueue {
        MemoryQueue::new(BrokerSettings::default())
    }

    fn flow(critical: bool) -> FlowJob {
        FlowJob::new::<Root>(&"root".to_string())
            .unwrap()
            .with_child(FlowJob::new::<Leaf>(&1).unwrap().fail_parent_on_failure(critical))
            .with_child(FlowJob::new::<Leaf>(&2).unwrap().fail_parent_on_failure(critical))
    }

    #[tokio::test]
    async fn parent_waits_for_children_then_sees_their_values() {
        let q = queue();
        let node = q.add_flow(flow(true)).await.unwrap();
        assert_eq!(q.job(node.id).await.unwrap().state, JobState::WaitingChildren);

        // Parent is not claimable yet
        assert!(q.next_job(&[JobKind::Compute], "w").await.unwrap().is_none());

        for _ in 0..2 {
            let child = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
            let input = child.input::<Leaf>().unwrap();
            q.complete(child.id, child.token, serde_json::json!(input * 10)).await.unwrap();
        }

        let parent = q.next_job(&[JobKind::Compute], "w").await.unwrap().unwrap();
        assert_eq!(parent.id, node.id);

        let mut values: Vec<u32> = q
            .children_values(parent.id)
            .await
            .unwrap()
            .iter()
            .filter_map(|c| c.decode::<Leaf>())
            .map(Result::unwrap)
            .collect();
        values.sort();
        assert_eq!(values, vec![10, 20]);

        q.complete(parent.id, parent.token, serde_json::json!("done")).await.unwrap();
        let outcome = q.wait_until_finished(parent.id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed(serde_json::json!("done")));
    }

    #[tokio::test]
    async fn critical_child_failure_fails_parent() {
        let q = queue();
        let node = q.add_flow(flow(true)).await.unwrap();

        let child = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        q.fail(child.id, child.token, "no edge".into()).await.unwrap();

        match q.wait_until_finished(node.id, Duration::from_secs(1)).await.unwrap() {
            JobOutcome::Failed(reason) => assert!(reason.contains("no edge"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn best_effort_child_failure_resolves_parent() {
        let q = queue();
        let node = q.add_flow(flow(false)).await.unwrap();

        let first = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        q.fail(first.id, first.token, "boom".into()).await.unwrap();
        let second = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        q.complete(second.id, second.token, serde_json::json!(5)).await.unwrap();

        let parent = q.next_job(&[JobKind::Compute], "w").await.unwrap().unwrap();
        assert_eq!(parent.id, node.id);
        assert_eq!(q.children_values(node.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removing_pending_child_unblocks_parent_without_value() {
        let q = queue();
        let node = q.add_flow(flow(true)).await.unwrap();

        for child in &node.children {
            q.remove_job(child.id).await.unwrap();
        }
        assert!(matches!(q.job(node.children[0].id).await, Err(QueueError::NotFound(_))));

        let parent = q.next_job(&[JobKind::Compute], "w").await.unwrap().unwrap();
        assert_eq!(parent.id, node.id);
        assert!(q.children_values(node.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_job_cannot_be_removed() {
        let q = queue();
        let node = q.add_flow(FlowJob::new::<Leaf>(&1).unwrap()).await.unwrap();
        let job = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        assert!(matches!(q.remove_job(node.id).await, Err(QueueError::Locked(_))));
        q.complete(job.id, job.token, serde_json::json!(1)).await.unwrap();
        q.remove_job(node.id).await.unwrap();
    }

    #[tokio::test]
    async fn nsr_queue_runs_one_at_a_time() {
        let q = queue();
        for _ in 0..3 {
            q.add_flow(FlowJob::new::<Nsr>(&500.0).unwrap()).await.unwrap();
        }

        let first = q.next_job(&[JobKind::ComputeNsr], "a").await.unwrap().unwrap();
        assert!(q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().is_none());

        q.complete(first.id, first.token, serde_json::json!(0)).await.unwrap();
        assert!(q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nsr_ceiling_holds_under_concurrent_workers() {
        let q = Arc::new(queue());
        for _ in 0..12 {
            q.add_flow(FlowJob::new::<Nsr>(&500.0).unwrap()).await.unwrap();
        }

        let workers: Vec<_> = (0..6)
            .map(|w| {
                let q = Arc::clone(&q);
                tokio::spawn(async move {
                    let name = format!("w{}", w);
                    while let Some(job) = q
                        .wait_for_job(&[JobKind::ComputeNsr], &name, Duration::from_millis(200))
                        .await
                        .unwrap()
                    {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        q.complete(job.id, job.token, serde_json::json!(0)).await.unwrap();
                    }
                })
            })
            .collect();
        futures::future::join_all(workers).await;

        let metrics = q.metrics();
        assert_eq!(metrics.completed[&JobKind::ComputeNsr], 12);
        assert_eq!(metrics.peak_active[&JobKind::ComputeNsr], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_requeues_then_fails() {
        let mut settings = BrokerSettings::default();
        settings.queues.insert(
            JobKind::ComputeFpOta,
            QueueSettings { lock_duration_ms: 1_000, max_stalled_count: 1, ..QueueSettings::default() },
        );
        let q = MemoryQueue::new(settings);
        let node = q.add_flow(FlowJob::new::<Leaf>(&1).unwrap()).await.unwrap();
        let mut events = q.subscribe();

        let first = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(q.check_stalled(), 1);
        assert_eq!(q.job(node.id).await.unwrap().state, JobState::Waiting);

        // The stale holder can no longer complete
        assert!(matches!(
            q.complete(first.id, first.token, serde_json::json!(1)).await,
            Err(QueueError::LockMismatch(_))
        ));

        let second = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(q.check_stalled(), 1);

        let job = q.job(node.id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some(STALLED_REASON));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| matches!(e, QueueEvent::Stalled { .. })));
        assert!(seen.iter().any(|e| matches!(e, QueueEvent::Failed { .. })));
    }

    fn nsr_queue_with_short_lock() -> MemoryQueue {
        let mut settings = BrokerSettings::default();
        settings.queues.insert(
            JobKind::ComputeNsr,
            QueueSettings {
                concurrency: Some(1),
                lock_duration_ms: 1_000,
                max_stalled_count: 1,
                ..QueueSettings::default()
            },
        );
        MemoryQueue::new(settings)
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_holder_keeps_its_slot_until_it_reports() {
        let q = nsr_queue_with_short_lock();
        q.add_flow(FlowJob::new::<Nsr>(&500.0).unwrap()).await.unwrap();

        let first = q.next_job(&[JobKind::ComputeNsr], "a").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(q.check_stalled(), 1);

        // Requeued, but the first worker may still be writing
        assert!(q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().is_none());
        assert_eq!(q.metrics().active_count(JobKind::ComputeNsr), 1);

        // Still renewing: the slot stays taken past the first lock window
        tokio::time::advance(Duration::from_millis(800)).await;
        assert!(matches!(q.extend_lock(first.id, first.token).await, Err(QueueError::LockMismatch(_))));
        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(q.check_stalled(), 0);
        assert!(q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().is_none());

        // Reporting in, even too late, frees it
        assert!(matches!(
            q.complete(first.id, first.token, serde_json::json!(0)).await,
            Err(QueueError::LockMismatch(_))
        ));
        let second = q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(q.metrics().peak_active[&JobKind::ComputeNsr], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stalled_holder_frees_its_slot_after_a_lock_window() {
        let q = nsr_queue_with_short_lock();
        q.add_flow(FlowJob::new::<Nsr>(&500.0).unwrap()).await.unwrap();

        q.next_job(&[JobKind::ComputeNsr], "a").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(q.check_stalled(), 1);
        assert!(q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(1_100)).await;
        let second = q.next_job(&[JobKind::ComputeNsr], "b").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
    }

    fn queue_keeping(completed: usize, failed: usize) -> MemoryQueue {
        let mut settings = BrokerSettings::default();
        settings.queues.insert(
            JobKind::ComputeFpOta,
            QueueSettings { keep_completed: completed, keep_failed: failed, ..QueueSettings::default() },
        );
        MemoryQueue::new(settings)
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_dropped_beyond_retention() {
        let q = queue_keeping(2, 1);
        let mut events = q.subscribe();

        let mut done = Vec::new();
        for i in 0..3 {
            q.add_flow(FlowJob::new::<Leaf>(&i).unwrap()).await.unwrap();
            let job = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
            q.complete(job.id, job.token, serde_json::json!(i)).await.unwrap();
            done.push(job.id);
        }
        assert!(matches!(q.job(done[0]).await, Err(QueueError::NotFound(_))));
        assert_eq!(q.job(done[2]).await.unwrap().return_value, Some(serde_json::json!(2)));

        let mut failed = Vec::new();
        for i in 0..2 {
            q.add_flow(FlowJob::new::<Leaf>(&i).unwrap()).await.unwrap();
            let job = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
            q.fail(job.id, job.token, "no edge".into()).await.unwrap();
            failed.push(job.id);
        }
        assert!(matches!(q.job(failed[0]).await, Err(QueueError::NotFound(_))));
        assert_eq!(q.job(failed[1]).await.unwrap().state, JobState::Failed);
        // Failures do not count against the completed limit
        assert!(q.job(done[1]).await.is_ok());

        let mut removed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::Removed { id, .. } = event {
                removed.push(id);
            }
        }
        assert_eq!(removed, vec![done[0], failed[0]]);
    }

    #[tokio::test]
    async fn finished_children_are_kept_until_their_parent_finishes() {
        let q = queue_keeping(0, 0);
        let node = q.add_flow(flow(true)).await.unwrap();

        for _ in 0..2 {
            let child = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
            q.complete(child.id, child.token, serde_json::json!(1)).await.unwrap();
        }
        let parent = q.next_job(&[JobKind::Compute], "w").await.unwrap().unwrap();
        assert_eq!(q.children_values(parent.id).await.unwrap().len(), 2);

        q.complete(parent.id, parent.token, serde_json::json!("done")).await.unwrap();
        for child in &node.children {
            assert!(matches!(q.job(child.id).await, Err(QueueError::NotFound(_))));
        }
        assert!(q.job(node.id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn extended_lock_does_not_stall() {
        let mut settings = BrokerSettings::default();
        settings.queues.insert(
            JobKind::ComputeFpOta,
            QueueSettings { lock_duration_ms: 1_000, max_stalled_count: 0, ..QueueSettings::default() },
        );
        let q = MemoryQueue::new(settings);
        q.add_flow(FlowJob::new::<Leaf>(&1).unwrap()).await.unwrap();

        let job = q.next_job(&[JobKind::ComputeFpOta], "w").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(800)).await;
        q.extend_lock(job.id, job.token).await.unwrap();
        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(q.check_stalled(), 0);
        q.complete(job.id, job.token, serde_json::json!(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_times_out_and_close_releases_waiters() {
        let q = Arc::new(queue());
        let none = q
            .wait_for_job(&[JobKind::Compute], "w", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(none.is_none());

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move {
                q.wait_for_job(&[JobKind::Compute], "w", Duration::from_secs(3600)).await
            })
        };
        tokio::task::yield_now().await;
        q.close();
        assert!(waiter.await.unwrap().unwrap().is_none());
        assert!(matches!(
            q.add_flow(FlowJob::new::<Root>(&"x".to_string()).unwrap()).await,
            Err(QueueError::Closed)
        ));
    }
}
