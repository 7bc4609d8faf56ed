//! In-process notification surface backed by tokio timers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{NotificationSurface, Permission, Reminder, TriggerId};
use crate::clock::Clock;
use crate::error::Result;

type Tasks = Arc<Mutex<HashMap<TriggerId, JoinHandle<()>>>>;

/// Fires reminders by sleeping on the tokio runtime and delivering them to
/// a channel. Cancelling a trigger aborts its task.
pub struct TimerNotifier {
    clock: Arc<dyn Clock>,
    permission: Mutex<Permission>,
    grant_on_request: bool,
    next_id: AtomicU64,
    tasks: Tasks,
    fired: mpsc::UnboundedSender<Reminder>,
}

impl TimerNotifier {
    /// Create a notifier and the receiver its reminders are delivered to
    pub fn new(
        clock: Arc<dyn Clock>,
        permission: Permission,
    ) -> (Self, mpsc::UnboundedReceiver<Reminder>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            clock,
            permission: Mutex::new(permission),
            grant_on_request: true,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            fired,
        };
        (notifier, rx)
    }

    /// Answer permission prompts with a denial instead of a grant
    pub fn deny_on_request(mut self) -> Self {
        self.grant_on_request = false;
        self
    }

    pub fn set_permission(&self, permission: Permission) {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = permission;
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl NotificationSurface for TimerNotifier {
    async fn permission_state(&self) -> Permission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request_permission(&self) -> Result<Permission> {
        let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
        if *permission == Permission::Undetermined {
            *permission = if self.grant_on_request {
                Permission::Granted
            } else {
                Permission::Denied
            };
        }
        Ok(*permission)
    }

    async fn schedule_at(&self, when: DateTime<Utc>, reminder: Reminder) -> Result<TriggerId> {
        let id = TriggerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let delay = (when - self.clock.now()).to_std().unwrap_or_default();
        let fired = self.fired.clone();

        // Hold the lock while spawning so the task cannot finish and remove
        // itself before it is registered.
        let mut registry = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn({
            let tasks = self.tasks.clone();
            async move {
                tokio::time::sleep(delay).await;
                tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                info!("{}", reminder.title);
                let _ = fired.send(reminder);
            }
        });
        registry.insert(id, handle);
        debug!("Timer {:?} set for {:?}", id, delay);
        Ok(id)
    }

    async fn cancel(&self, trigger: TriggerId) -> Result<()> {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&trigger);
        if let Some(handle) = handle {
            handle.abort();
            debug!("Timer {:?} cancelled", trigger);
        }
        Ok(())
    }
}

impl Drop for TimerNotifier {
    fn drop(&mut self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for (_, handle) in tasks {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::Starter;
    use crate::reminder::{ReminderScheduler, ScheduleOutcome};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn starter(last_fed: DateTime<Utc>) -> Starter {
        Starter {
            id: 7,
            name: "Levain".to_string(),
            created: last_fed,
            last_fed: Some(last_fed),
            feeding_schedule: 24,
            is_favorite: false,
            feeding_history: Vec::new(),
            notes: Vec::new(),
            recipe: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_fires_when_due() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (notifier, mut fired) = TimerNotifier::new(clock.clone(), Permission::Granted);
        let notifier = Arc::new(notifier);
        let scheduler = ReminderScheduler::new(notifier.clone(), clock);

        let s = starter(Utc::now());
        let outcome = scheduler.schedule_for(&s).await;
        assert!(matches!(outcome, ScheduleOutcome::Armed(due) if due == s.last_fed.unwrap() + Duration::hours(24)));
        assert_eq!(notifier.pending(), 1);

        tokio::time::advance(StdDuration::from_secs(23 * 3600)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::advance(StdDuration::from_secs(3600 + 1)).await;
        let reminder = fired.recv().await.unwrap();
        assert_eq!(reminder.title, "Time to feed Levain!");
        assert_eq!(reminder.tag, "feeding-7");
        assert_eq!(notifier.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_aborts_the_previous_timer() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (notifier, mut fired) = TimerNotifier::new(clock.clone(), Permission::Granted);
        let notifier = Arc::new(notifier);
        let scheduler = ReminderScheduler::new(notifier.clone(), clock);

        let s = starter(Utc::now());
        scheduler.schedule_for(&s).await;
        scheduler.schedule_for(&s).await;
        assert_eq!(notifier.pending(), 1);

        tokio::time::advance(StdDuration::from_secs(25 * 3600)).await;
        assert!(fired.recv().await.is_some());
        tokio::task::yield_now().await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_of_unknown_trigger_is_ok() {
        let (notifier, _fired) = TimerNotifier::new(Arc::new(SystemClock), Permission::Granted);
        notifier.cancel(TriggerId(99)).await.unwrap();
    }

    #[tokio::test]
    async fn prompt_resolves_undetermined_only() {
        let (notifier, _fired) = TimerNotifier::new(Arc::new(SystemClock), Permission::Undetermined);
        let notifier = notifier.deny_on_request();
        assert_eq!(notifier.request_permission().await.unwrap(), Permission::Denied);

        notifier.set_permission(Permission::Granted);
        assert_eq!(notifier.request_permission().await.unwrap(), Permission::Granted);
    }
}
