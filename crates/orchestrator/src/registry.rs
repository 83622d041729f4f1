//! Background task registry.
//!
//! A shared ledger of in-flight and recently-finished jobs, independent of
//! which screen is visible. The rendering layer subscribes to the event
//! stream and never writes; the poller and engine mirror transitions in.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use providers::{JobKind, JobState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Registry entry: the cross-screen view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundTask {
    /// Correlation id until the provider answers, provider job id after.
    pub id: String,
    pub kind: JobKind,
    pub show_id: String,
    pub character_id: Option<String>,
    pub state: JobState,
    /// Pipeline position, for ordering a progress display.
    pub step_number: u32,
    /// Free-form display data (attempt count, adjustment flag, labels).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackgroundTask {
    pub fn new(
        id: String,
        kind: JobKind,
        show_id: String,
        character_id: Option<String>,
        step_number: u32,
    ) -> Self {
        Self {
            id,
            kind,
            show_id,
            character_id,
            state: JobState::Starting,
            step_number,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Change notifications for read-only subscribers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Registered(BackgroundTask),
    Updated(BackgroundTask),
    /// The caller-generated id was replaced by the provider's job id.
    Rekeyed { old_id: String, task: BackgroundTask },
    Removed { id: String },
}

#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tasks: Mutex<HashMap<String, BackgroundTask>>,
    events: broadcast::Sender<TaskEvent>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RegistryInner {
                tasks: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.inner.events.send(event);
    }

    pub fn register(&self, task: BackgroundTask) {
        self.inner
            .tasks
            .lock()
            .insert(task.id.clone(), task.clone());
        self.emit(TaskEvent::Registered(task));
    }

    /// Apply a partial update to one entry. Returns false for unknown ids.
    pub fn update(&self, id: &str, apply: impl FnOnce(&mut BackgroundTask)) -> bool {
        let updated = {
            let mut tasks = self.inner.tasks.lock();
            match tasks.get_mut(id) {
                Some(task) => {
                    apply(task);
                    Some(task.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(task) => {
                self.emit(TaskEvent::Updated(task));
                true
            }
            None => false,
        }
    }

    /// Replace an entry's id, as one logical operation: subscribers see a
    /// single `Rekeyed` event, never a window with the entry missing.
    pub fn rekey(&self, old_id: &str, new_id: &str) -> bool {
        let rekeyed = {
            let mut tasks = self.inner.tasks.lock();
            match tasks.remove(old_id) {
                Some(mut task) => {
                    task.id = new_id.to_string();
                    tasks.insert(new_id.to_string(), task.clone());
                    Some(task)
                }
                None => None,
            }
        };
        match rekeyed {
            Some(task) => {
                self.emit(TaskEvent::Rekeyed {
                    old_id: old_id.to_string(),
                    task,
                });
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.inner.tasks.lock().remove(id).is_some();
        if removed {
            self.emit(TaskEvent::Removed { id: id.to_string() });
        }
        removed
    }

    /// Remove an entry after a grace period, so a finished job stays
    /// visible briefly. The entry may already be gone by then.
    pub fn remove_after(&self, id: &str, delay: Duration) {
        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.remove(&id);
        });
    }

    pub fn get(&self, id: &str) -> Option<BackgroundTask> {
        self.inner.tasks.lock().get(id).cloned()
    }

    pub fn list_for_show(&self, show_id: &str) -> Vec<BackgroundTask> {
        let mut tasks: Vec<BackgroundTask> = self
            .inner
            .tasks
            .lock()
            .values()
            .filter(|task| task.show_id == show_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.step_number);
        tasks
    }

    /// Drop non-terminal entries older than `ttl`. Poll loops for such
    /// entries are gone (ungracefully closed session); run at startup.
    pub fn prune_abandoned(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let pruned: Vec<String> = {
            let mut tasks = self.inner.tasks.lock();
            let ids: Vec<String> = tasks
                .values()
                .filter(|task| !task.state.is_terminal() && task.created_at < cutoff)
                .map(|task| task.id.clone())
                .collect();
            for id in &ids {
                tasks.remove(id);
            }
            ids
        };
        for id in &pruned {
            self.emit(TaskEvent::Removed { id: id.clone() });
        }
        pruned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, show: &str, step: u32) -> BackgroundTask {
        BackgroundTask::new(id.to_string(), JobKind::Portrait, show.to_string(), None, step)
    }

    #[test]
    fn test_register_update_remove() {
        let registry = TaskRegistry::new();
        registry.register(task("corr-1", "show-1", 1));

        assert!(registry.update("corr-1", |t| t.state = JobState::Processing));
        assert_eq!(
            registry.get("corr-1").unwrap().state,
            JobState::Processing
        );

        assert!(registry.remove("corr-1"));
        assert!(registry.get("corr-1").is_none());
        assert!(!registry.update("corr-1", |t| t.state = JobState::Failed));
    }

    #[test]
    fn test_rekey_keeps_entry_visible() {
        let registry = TaskRegistry::new();
        let mut rx = registry.subscribe();
        registry.register(task("corr-1", "show-1", 1));

        assert!(registry.rekey("corr-1", "job-9"));
        assert!(registry.get("corr-1").is_none());
        assert_eq!(registry.get("job-9").unwrap().show_id, "show-1");

        // Subscribers observe exactly one event for the swap
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Registered(_))));
        match rx.try_recv() {
            Ok(TaskEvent::Rekeyed { old_id, task }) => {
                assert_eq!(old_id, "corr-1");
                assert_eq!(task.id, "job-9");
            }
            other => panic!("expected rekey event, got {:?}", other),
        }
    }

    #[test]
    fn test_list_for_show_is_ordered_by_step() {
        let registry = TaskRegistry::new();
        registry.register(task("b", "show-1", 3));
        registry.register(task("a", "show-1", 1));
        registry.register(task("c", "show-2", 2));

        let listed = registry.list_for_show("show-1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "a");
        assert_eq!(listed[1].id, "b");
    }

    #[test]
    fn test_prune_abandoned_skips_fresh_and_terminal_entries() {
        let registry = TaskRegistry::new();

        let mut stale = task("stale", "show-1", 1);
        stale.created_at = Utc::now() - chrono::Duration::hours(2);
        registry.register(stale);

        let mut finished = task("finished", "show-1", 2);
        finished.created_at = Utc::now() - chrono::Duration::hours(2);
        finished.state = JobState::Succeeded;
        registry.register(finished);

        registry.register(task("fresh", "show-1", 3));

        let pruned = registry.prune_abandoned(Duration::from_secs(30 * 60));
        assert_eq!(pruned, 1);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("finished").is_some());
        assert!(registry.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_after_waits_for_grace_period() {
        let registry = TaskRegistry::new();
        registry.register(task("corr-1", "show-1", 1));
        registry.remove_after("corr-1", Duration::from_secs(6));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(registry.get("corr-1").is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get("corr-1").is_none());
    }
}
