//! Feeding reminders derived from each starter's schedule

mod timer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{Starter, StarterId};

pub use timer::TimerNotifier;

/// Local notification permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Undetermined,
    Granted,
    Denied,
}

/// Handle of one deferred notification on a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(pub u64);

/// Payload of a feeding reminder
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub starter_id: StarterId,
    pub title: String,
    pub body: String,
    /// Replaces an older notification with the same tag
    pub tag: String,
    pub due: DateTime<Utc>,
}

impl Reminder {
    pub fn for_starter(starter: &Starter, due: DateTime<Utc>) -> Self {
        Self {
            starter_id: starter.id,
            title: format!("Time to feed {}!", starter.name),
            body: "Your sourdough starter is ready for feeding".to_string(),
            tag: format!("feeding-{}", starter.id),
            due,
        }
    }
}

/// Where notifications are shown
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn permission_state(&self) -> Permission;
    async fn request_permission(&self) -> Result<Permission>;
    async fn schedule_at(&self, when: DateTime<Utc>, reminder: Reminder) -> Result<TriggerId>;
    async fn cancel(&self, trigger: TriggerId) -> Result<()>;
}

/// What `schedule_for` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Armed(DateTime<Utc>),
    /// Due time already passed; nothing armed
    Overdue,
    /// Never fed or no positive interval
    Unknown,
    PermissionMissing,
    /// The surface refused the trigger
    Unavailable,
}

impl ScheduleOutcome {
    pub fn is_armed(&self) -> bool {
        matches!(self, ScheduleOutcome::Armed(_))
    }
}

/// Lifecycle of the trigger for one starter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Unarmed,
    Armed,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Armed { trigger: TriggerId, due: DateTime<Utc> },
    Cancelled,
}

/// Keeps at most one pending trigger per starter.
///
/// Failures never reach the caller: reminders are best effort and the view
/// can always compute overdue state itself.
pub struct ReminderScheduler {
    surface: Arc<dyn NotificationSurface>,
    clock: Arc<dyn Clock>,
    triggers: Mutex<HashMap<StarterId, Slot>>,
    prompted: AtomicBool,
}

impl ReminderScheduler {
    pub fn new(surface: Arc<dyn NotificationSurface>, clock: Arc<dyn Clock>) -> Self {
        Self {
            surface,
            clock,
            triggers: Mutex::new(HashMap::new()),
            prompted: AtomicBool::new(false),
        }
    }

    /// Ask for permission once per process, and only if the user has not
    /// answered yet.
    pub async fn request_permission_on_startup(&self) -> Permission {
        let state = self.surface.permission_state().await;
        if state != Permission::Undetermined || self.prompted.swap(true, Ordering::SeqCst) {
            return state;
        }
        match self.surface.request_permission().await {
            Ok(state) => {
                info!("Notification permission: {:?}", state);
                state
            }
            Err(e) => {
                warn!("Notification permission request failed: {}", e);
                Permission::Undetermined
            }
        }
    }

    /// Replace whatever trigger the starter has with one for its next due
    /// time.
    pub async fn schedule_for(&self, starter: &Starter) -> ScheduleOutcome {
        let mut triggers = self.triggers.lock().await;
        if let Some(Slot::Armed { trigger, .. }) = triggers.get(&starter.id).copied() {
            self.cancel_trigger(starter.id, trigger).await;
            triggers.insert(starter.id, Slot::Cancelled);
        }

        let Some(due) = starter.next_due() else {
            debug!("No due time for starter {}", starter.id);
            return ScheduleOutcome::Unknown;
        };
        if due <= self.clock.now() {
            debug!("Starter {} is overdue, nothing to arm", starter.id);
            return ScheduleOutcome::Overdue;
        }
        if self.surface.permission_state().await != Permission::Granted {
            return ScheduleOutcome::PermissionMissing;
        }

        match self
            .surface
            .schedule_at(due, Reminder::for_starter(starter, due))
            .await
        {
            Ok(trigger) => {
                debug!("Armed reminder for starter {} at {}", starter.id, due);
                triggers.insert(starter.id, Slot::Armed { trigger, due });
                ScheduleOutcome::Armed(due)
            }
            Err(e) => {
                warn!("Could not arm reminder for starter {}: {}", starter.id, e);
                ScheduleOutcome::Unavailable
            }
        }
    }

    /// Re-arm every starter and drop triggers for starters no longer listed
    pub async fn reschedule_all(&self, starters: &[Starter]) -> usize {
        let stale: Vec<StarterId> = {
            let triggers = self.triggers.lock().await;
            triggers
                .keys()
                .filter(|id| !starters.iter().any(|s| s.id == **id))
                .copied()
                .collect()
        };
        for id in stale {
            self.cancel(id).await;
        }

        let mut armed = 0;
        for starter in starters {
            if self.schedule_for(starter).await.is_armed() {
                armed += 1;
            }
        }
        info!("Armed {} of {} feeding reminders", armed, starters.len());
        armed
    }

    pub async fn cancel(&self, id: StarterId) {
        let mut triggers = self.triggers.lock().await;
        if let Some(Slot::Armed { trigger, .. }) = triggers.get(&id).copied() {
            self.cancel_trigger(id, trigger).await;
            triggers.insert(id, Slot::Cancelled);
        }
    }

    /// Cancel everything and forget all starters, e.g. on logout
    pub async fn cancel_all(&self) {
        let mut triggers = self.triggers.lock().await;
        for (id, slot) in triggers.drain() {
            if let Slot::Armed { trigger, .. } = slot {
                self.cancel_trigger(id, trigger).await;
            }
        }
    }

    async fn cancel_trigger(&self, id: StarterId, trigger: TriggerId) {
        if let Err(e) = self.surface.cancel(trigger).await {
            warn!("Failed to cancel reminder for starter {}: {}", id, e);
        }
    }

    pub async fn trigger_state(&self, id: StarterId) -> TriggerState {
        match self.triggers.lock().await.get(&id) {
            None => TriggerState::Unarmed,
            Some(Slot::Cancelled) => TriggerState::Cancelled,
            Some(Slot::Armed { due, .. }) if *due <= self.clock.now() => TriggerState::Fired,
            Some(Slot::Armed { .. }) => TriggerState::Armed,
        }
    }

    /// Number of starters with a pending trigger
    pub async fn armed_count(&self) -> usize {
        let now = self.clock.now();
        self.triggers
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Armed { due, .. } if *due > now))
            .count()
    }
}
