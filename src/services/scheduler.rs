use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{LockStore, RedisKey};
use crate::error::AppResult;
use crate::models::UserId;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Backstop expiry of the per-user lock
    pub lock_ttl: Duration,
    /// Requests within this window of the last stored update are skipped
    pub recency_window: Duration,
    /// How long a finished task stays queryable before it is evicted
    pub task_retention: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30 * 60),
            recency_window: Duration::from_secs(24 * 3600),
            task_retention: Duration::from_secs(3600),
        }
    }
}

/// When a user's recommendations were last written
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationHistory: Send + Sync {
    async fn last_update(&self, user_id: &UserId) -> AppResult<Option<DateTime<Utc>>>;
}

/// Produces and stores fresh recommendations for one user
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait GenerationRunner: Send + Sync {
    async fn generate_for_user(&self, user_id: &UserId) -> AppResult<()>;
}

/// Answer to a generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationTrigger {
    Started { task_id: Uuid },
    AlreadyProcessing,
    AlreadyRecent,
}

/// Lifecycle of one generation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationState {
    NotStarted,
    LockHeld,
    Running,
    Completed,
    Failed { reason: String },
    Cancelled,
}

impl GenerationState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Failed { .. } | GenerationState::Cancelled
        )
    }
}

/// Ownership of a per-user lock
///
/// Call `release` on every exit path. A guard dropped without it schedules
/// the release on the current runtime; the lock TTL covers a crashed process.
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    /// Takes the lock, `None` when somebody else holds it
    pub async fn acquire(store: Arc<dyn LockStore>, key: String, ttl: Duration) -> AppResult<Option<Self>> {
        let token = Uuid::new_v4().to_string();
        if !store.try_acquire(&key, &token, ttl).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            store,
            key,
            token,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> AppResult<bool> {
        self.released = true;
        let released = self.store.release(&self.key, &self.token).await?;
        tracing::info!(key = %self.key, "Lock released");
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&key, &token).await {
                        tracing::error!(key = %key, error = %e, "Failed to release dropped lock");
                    }
                });
            }
            Err(_) => tracing::warn!(key = %key, "Lock dropped outside a runtime, left to expire"),
        }
    }
}

/// Handle on a spawned generation
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub task_id: Uuid,
    pub user_id: UserId,
    state: watch::Receiver<GenerationState>,
    cancel: CancellationToken,
}

impl GenerationTask {
    pub fn state(&self) -> GenerationState {
        self.state.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until the task reaches a terminal state
    pub async fn finished(&self) -> GenerationState {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            if current.is_finished() {
                return current;
            }
            if state.changed().await.is_err() {
                return state.borrow().clone();
            }
        }
    }
}

/// Status of the most recent task for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub task_id: Option<Uuid>,
    #[serde(flatten)]
    pub state: GenerationState,
}

type TaskMap = Arc<RwLock<HashMap<UserId, GenerationTask>>>;

/// Single-flight scheduler for per-user generation runs
pub struct GenerationScheduler {
    locks: Arc<dyn LockStore>,
    history: Arc<dyn RecommendationHistory>,
    runner: Arc<dyn GenerationRunner>,
    settings: SchedulerSettings,
    tasks: TaskMap,
}

impl GenerationScheduler {
    pub fn new(
        locks: Arc<dyn LockStore>,
        history: Arc<dyn RecommendationHistory>,
        runner: Arc<dyn GenerationRunner>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            locks,
            history,
            runner,
            settings,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Starts a background generation unless one is running or finished recently
    pub async fn request(&self, user_id: UserId) -> AppResult<GenerationTrigger> {
        if let Some(last) = self.history.last_update(&user_id).await? {
            let age = Utc::now().signed_duration_since(last);
            if age.to_std().map(|age| age < self.settings.recency_window).unwrap_or(true) {
                tracing::info!(user_id = %user_id, last_update = %last, "Recommendations already generated recently");
                return Ok(GenerationTrigger::AlreadyRecent);
            }
        }

        let key = RedisKey::GenerationLock(user_id.clone()).to_string();
        let guard = match LockGuard::acquire(Arc::clone(&self.locks), key, self.settings.lock_ttl).await? {
            Some(guard) => guard,
            None => {
                tracing::info!(user_id = %user_id, "Generation already in progress");
                return Ok(GenerationTrigger::AlreadyProcessing);
            }
        };

        let task_id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(GenerationState::LockHeld);
        let cancel = CancellationToken::new();

        let task = GenerationTask {
            task_id,
            user_id: user_id.clone(),
            state: state_rx,
            cancel: cancel.clone(),
        };
        self.tasks.write().await.insert(user_id.clone(), task);

        tracing::info!(user_id = %user_id, task_id = %task_id, "Generation started");
        let tasks = Arc::clone(&self.tasks);
        let retention = self.settings.task_retention;
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            run_generation(runner, user_id.clone(), guard, state_tx, cancel).await;
            tokio::time::sleep(retention).await;
            evict_task(&tasks, &user_id, task_id).await;
        });

        Ok(GenerationTrigger::Started { task_id })
    }

    pub async fn task(&self, user_id: &UserId) -> Option<GenerationTask> {
        self.tasks.read().await.get(user_id).cloned()
    }

    /// Number of tasks still tracked, running or within retention
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn status(&self, user_id: &UserId) -> TaskStatus {
        match self.task(user_id).await {
            Some(task) => TaskStatus {
                task_id: Some(task.task_id),
                state: task.state(),
            },
            None => TaskStatus {
                task_id: None,
                state: GenerationState::NotStarted,
            },
        }
    }

    /// Cancels the user's running task, `false` if there is nothing to cancel
    pub async fn cancel(&self, user_id: &UserId) -> bool {
        match self.task(user_id).await {
            Some(task) if !task.state().is_finished() => {
                task.cancel();
                tracing::info!(user_id = %user_id, task_id = %task.task_id, "Generation cancellation requested");
                true
            }
            _ => false,
        }
    }
}

/// Drops a finished task unless a newer one has replaced it
async fn evict_task(tasks: &TaskMap, user_id: &UserId, task_id: Uuid) {
    let mut tasks = tasks.write().await;
    if tasks.get(user_id).map(|t| t.task_id) == Some(task_id) {
        tasks.remove(user_id);
        tracing::debug!(user_id = %user_id, task_id = %task_id, "Finished generation task evicted");
    }
}

/// Runs the generation as a nested task so panics surface as `Failed`
async fn run_generation(
    runner: Arc<dyn GenerationRunner>,
    user_id: UserId,
    guard: LockGuard,
    state: watch::Sender<GenerationState>,
    cancel: CancellationToken,
) {
    let _ = state.send(GenerationState::Running);
    let start = std::time::Instant::now();

    let work_user = user_id.clone();
    let mut work = tokio::spawn(async move { runner.generate_for_user(&work_user).await });

    let outcome = tokio::select! {
        joined = &mut work => match joined {
            Ok(Ok(())) => GenerationState::Completed,
            Ok(Err(e)) => GenerationState::Failed { reason: e.to_string() },
            Err(e) if e.is_panic() => GenerationState::Failed { reason: "generation panicked".to_string() },
            Err(e) => GenerationState::Failed { reason: e.to_string() },
        },
        _ = cancel.cancelled() => {
            work.abort();
            GenerationState::Cancelled
        }
    };

    if let Err(e) = guard.release().await {
        tracing::error!(user_id = %user_id, error = %e, "Failed to release generation lock");
    }

    match &outcome {
        GenerationState::Failed { reason } => {
            tracing::error!(user_id = %user_id, reason = %reason, "Generation failed")
        }
        other => tracing::info!(
            user_id = %user_id,
            state = ?other,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generation finished"
        ),
    }
    let _ = state.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockLockStore;
    use crate::error::AppError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Lock store with real exclusivity semantics
    #[derive(Default)]
    struct MemoryLocks {
        held: Mutex<HashMap<String, String>>,
        releases: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl LockStore for MemoryLocks {
        async fn try_acquire(&self, key: &str, token: &str, _ttl: Duration) -> AppResult<bool> {
            let mut held = self.held.lock().unwrap();
            if held.contains_key(key) {
                return Ok(false);
            }
            held.insert(key.to_string(), token.to_string());
            Ok(true)
        }

        async fn release(&self, key: &str, token: &str) -> AppResult<bool> {
            self.releases.lock().unwrap().push(key.to_string());
            let mut held = self.held.lock().unwrap();
            if held.get(key).map(String::as_str) == Some(token) {
                held.remove(key);
                return Ok(true);
            }
            Ok(false)
        }
    }

    struct NeverUpdated;

    #[async_trait::async_trait]
    impl RecommendationHistory for NeverUpdated {
        async fn last_update(&self, _user_id: &UserId) -> AppResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    /// Runner that waits for a signal, then succeeds, fails or panics
    struct GatedRunner {
        gate: tokio::sync::Notify,
        behaviour: &'static str,
    }

    impl GatedRunner {
        fn new(behaviour: &'static str) -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Notify::new(),
                behaviour,
            })
        }
    }

    #[async_trait::async_trait]
    impl GenerationRunner for GatedRunner {
        async fn generate_for_user(&self, _user_id: &UserId) -> AppResult<()> {
            self.gate.notified().await;
            match self.behaviour {
                "fail" => Err(AppError::Model("singular".to_string())),
                "panic" => panic!("boom"),
                _ => Ok(()),
            }
        }
    }

    fn scheduler(locks: Arc<MemoryLocks>, runner: Arc<GatedRunner>) -> GenerationScheduler {
        GenerationScheduler::new(locks, Arc::new(NeverUpdated), runner, SchedulerSettings::default())
    }

    #[tokio::test]
    async fn test_second_request_is_already_processing() {
        let locks = Arc::new(MemoryLocks::default());
        let runner = GatedRunner::new("ok");
        let scheduler = scheduler(Arc::clone(&locks), Arc::clone(&runner));
        let user = UserId::Internal(1);

        let first = scheduler.request(user.clone()).await.unwrap();
        let second = scheduler.request(user.clone()).await.unwrap();

        assert!(matches!(first, GenerationTrigger::Started { .. }));
        assert_eq!(second, GenerationTrigger::AlreadyProcessing);

        runner.gate.notify_one();
        let task = scheduler.task(&user).await.unwrap();
        assert_eq!(task.finished().await, GenerationState::Completed);
        assert!(locks.held.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_start_exactly_once() {
        let locks = Arc::new(MemoryLocks::default());
        let runner = GatedRunner::new("ok");
        let scheduler = Arc::new(scheduler(Arc::clone(&locks), Arc::clone(&runner)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move { scheduler.request(UserId::Internal(5)).await }));
        }
        let mut started = 0;
        for handle in handles {
            if let GenerationTrigger::Started { .. } = handle.await.unwrap().unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        runner.gate.notify_one();
    }

    #[tokio::test]
    async fn test_lock_released_after_failure() {
        let locks = Arc::new(MemoryLocks::default());
        let runner = GatedRunner::new("fail");
        let scheduler = scheduler(Arc::clone(&locks), Arc::clone(&runner));
        let user = UserId::external("ana");

        scheduler.request(user.clone()).await.unwrap();
        runner.gate.notify_one();
        let state = scheduler.task(&user).await.unwrap().finished().await;

        assert_eq!(
            state,
            GenerationState::Failed {
                reason: "Model error: singular".to_string()
            }
        );
        assert!(locks.held.lock().unwrap().is_empty());
        assert_eq!(
            *locks.releases.lock().unwrap(),
            vec!["user:lb_ana:recommendation_lock".to_string()]
        );
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let locks = Arc::new(MemoryLocks::default());
        let runner = GatedRunner::new("panic");
        let scheduler = scheduler(Arc::clone(&locks), Arc::clone(&runner));
        let user = UserId::Internal(2);

        scheduler.request(user.clone()).await.unwrap();
        runner.gate.notify_one();
        let state = scheduler.task(&user).await.unwrap().finished().await;

        assert!(matches!(state, GenerationState::Failed { .. }));
        assert!(locks.held.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_releases_lock() {
        let locks = Arc::new(MemoryLocks::default());
        let runner = GatedRunner::new("ok");
        let scheduler = scheduler(Arc::clone(&locks), runner);
        let user = UserId::Internal(3);

        scheduler.request(user.clone()).await.unwrap();
        assert!(scheduler.cancel(&user).await);

        let state = scheduler.task(&user).await.unwrap().finished().await;
        assert_eq!(state, GenerationState::Cancelled);
        assert!(locks.held.lock().unwrap().is_empty());
        assert!(!scheduler.cancel(&user).await);
    }

    #[tokio::test]
    async fn test_recent_update_short_circuits() {
        let mut history = MockRecommendationHistory::new();
        history
            .expect_last_update()
            .returning(|_| Ok(Some(Utc::now() - chrono::Duration::hours(2))));
        let mut locks = MockLockStore::new();
        locks.expect_try_acquire().times(0);

        let scheduler = GenerationScheduler::new(
            Arc::new(locks),
            Arc::new(history),
            Arc::new(MockGenerationRunner::new()),
            SchedulerSettings::default(),
        );

        let trigger = scheduler.request(UserId::Internal(9)).await.unwrap();
        assert_eq!(trigger, GenerationTrigger::AlreadyRecent);
        assert_eq!(scheduler.status(&UserId::Internal(9)).await.state, GenerationState::NotStarted);
    }

    #[tokio::test]
    async fn test_stale_update_starts_generation() {
        let mut history = MockRecommendationHistory::new();
        history
            .expect_last_update()
            .returning(|_| Ok(Some(Utc::now() - chrono::Duration::hours(25))));
        let mut runner = MockGenerationRunner::new();
        runner.expect_generate_for_user().returning(|_| Ok(()));

        let locks = Arc::new(MemoryLocks::default());
        let scheduler = GenerationScheduler::new(
            Arc::clone(&locks) as Arc<dyn LockStore>,
            Arc::new(history),
            Arc::new(runner),
            SchedulerSettings::default(),
        );
        let user = UserId::Internal(9);

        let trigger = scheduler.request(user.clone()).await.unwrap();
        assert!(matches!(trigger, GenerationTrigger::Started { .. }));
        assert_eq!(
            scheduler.task(&user).await.unwrap().finished().await,
            GenerationState::Completed
        );
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_lock() {
        let locks = Arc::new(MemoryLocks::default());
        let guard = LockGuard::acquire(Arc::clone(&locks) as Arc<dyn LockStore>, "k".to_string(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(guard.key(), "k");

        drop(guard);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let held: HashSet<String> = locks.held.lock().unwrap().keys().cloned().collect();
        assert!(held.is_empty());
    }

    #[tokio::test]
    async fn test_finished_tasks_are_evicted_after_retention() {
        let mut runner = MockGenerationRunner::new();
        runner.expect_generate_for_user().returning(|_| Ok(()));
        let scheduler = GenerationScheduler::new(
            Arc::new(MemoryLocks::default()),
            Arc::new(NeverUpdated),
            Arc::new(runner),
            SchedulerSettings {
                task_retention: Duration::from_millis(5),
                ..SchedulerSettings::default()
            },
        );

        for id in 0..20 {
            let trigger = scheduler.request(UserId::Internal(id)).await.unwrap();
            assert!(matches!(trigger, GenerationTrigger::Started { .. }));
        }
        for _ in 0..200 {
            if scheduler.task_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(scheduler.task_count().await, 0);
        assert_eq!(scheduler.status(&UserId::Internal(3)).await.state, GenerationState::NotStarted);
    }

    #[tokio::test]
    async fn test_eviction_keeps_newer_task() {
        let tasks: TaskMap = Arc::new(RwLock::new(HashMap::new()));
        let user = UserId::Internal(4);
        let (_tx, rx) = watch::channel(GenerationState::Running);
        let newer = GenerationTask {
            task_id: Uuid::new_v4(),
            user_id: user.clone(),
            state: rx,
            cancel: CancellationToken::new(),
        };
        tasks.write().await.insert(user.clone(), newer.clone());

        evict_task(&tasks, &user, Uuid::new_v4()).await;
        assert_eq!(tasks.read().await.get(&user).map(|t| t.task_id), Some(newer.task_id));

        evict_task(&tasks, &user, newer.task_id).await;
        assert!(tasks.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_completed_task_stays_queryable_within_retention() {
        let mut runner = MockGenerationRunner::new();
        runner.expect_generate_for_user().returning(|_| Ok(()));
        let scheduler = GenerationScheduler::new(
            Arc::new(MemoryLocks::default()),
            Arc::new(NeverUpdated),
            Arc::new(runner),
            SchedulerSettings::default(),
        );
        let user = UserId::Internal(8);

        scheduler.request(user.clone()).await.unwrap();
        scheduler.task(&user).await.unwrap().finished().await;

        assert_eq!(scheduler.status(&user).await.state, GenerationState::Completed);
        assert_eq!(scheduler.task_count().await, 1);
    }

    #[test]
    fn test_trigger_serialization() {
        assert_eq!(
            serde_json::to_value(GenerationTrigger::AlreadyProcessing).unwrap(),
            serde_json::json!({"status": "already_processing"})
        );
        assert_eq!(
            serde_json::to_value(GenerationTrigger::AlreadyRecent).unwrap(),
            serde_json::json!({"status": "already_recent"})
        );
    }
}
