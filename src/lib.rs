//! Bread Lab Client Library
//!
//! Client-side core of the Bread Lab sourdough tracker: an in-memory replica
//! of the user's starters kept in sync with the REST API, and feeding
//! reminders derived from each starter's schedule.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod models;
pub mod reminder;
pub mod remote;
pub mod replica;
pub mod session;

use chrono::SecondsFormat;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

use crate::clock::{Clock, SystemClock};
use crate::config::{ApiConfig, ClientOptions};
use crate::coordinator::{DeleteOutcome, MutationCoordinator};
use crate::error::{Error, Result};
use crate::models::{
    filter_bakings, Baking, BakingId, FeedingId, NoteId, Recipe, RecipeId, Starter, StarterId, User,
};
use crate::reminder::{
    NotificationSurface, Permission, Reminder, ReminderScheduler, TimerNotifier, TriggerState,
};
use crate::remote::{
    BakingPatch, FeedingDraft, FeedingPatch, HttpRemoteClient, NewBaking, RecipeDraft,
    RemoteDataClient, StarterIntent,
};
use crate::replica::{ReplicaStore, StoreEvent, StoreStatus};
use crate::session::{FileTokenStore, MemoryTokenStore, SessionManager, TokenStore};

/// Name written into exported backups
pub const APP_NAME: &str = "Chimi's Bread Lab";

/// Version of the export document format
pub const EXPORT_VERSION: &str = "1.0";

/// The main entry point for the Bread Lab client
pub struct BreadLab {
    /// The base URL of the API
    pub url: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Client options
    pub options: ClientOptions,
    session: Arc<SessionManager>,
    store: Arc<ReplicaStore>,
    reminders: Arc<ReminderScheduler>,
    coordinator: MutationCoordinator,
    clock: Arc<dyn Clock>,
    fired: Mutex<Option<mpsc::UnboundedReceiver<Reminder>>>,
}

impl BreadLab {
    /// Create a new client for the API at `api_url`
    ///
    /// # Example
    ///
    /// ```
    /// use bread_lab_client::BreadLab;
    ///
    /// let lab = BreadLab::new("https://api.example.com").unwrap();
    /// assert!(lab.starters().is_empty());
    /// ```
    pub fn new(api_url: &str) -> Result<Self> {
        Self::new_with_options(api_url, ClientOptions::default())
    }

    /// Create a new client with custom options. Reminders fire on the tokio
    /// runtime; take them with [`BreadLab::take_fired_reminders`].
    ///
    /// # Example
    ///
    /// ```
    /// use bread_lab_client::{BreadLab, config::ClientOptions};
    ///
    /// let options = ClientOptions::default()
    ///     .with_persist_session(false)
    ///     .with_default_feeding_schedule(12);
    /// let lab = BreadLab::new_with_options("https://api.example.com", options).unwrap();
    /// ```
    pub fn new_with_options(api_url: &str, options: ClientOptions) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (notifier, fired) = TimerNotifier::new(clock.clone(), Permission::Undetermined);
        let mut lab = Self::with_surface(api_url, options, Arc::new(notifier), clock)?;
        lab.fired = Mutex::new(Some(fired));
        Ok(lab)
    }

    /// Create a client for the API named by the `BREAD_LAB_API_URL`
    /// environment variable
    pub fn from_env(options: ClientOptions) -> Result<Self> {
        let config = ApiConfig::from_env()?;
        Self::new_with_options(&config.base(), options)
    }

    /// Create a client that shows reminders on a custom surface
    pub fn with_surface(
        api_url: &str,
        options: ClientOptions,
        surface: Arc<dyn NotificationSurface>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = ApiConfig::new(api_url)?;
        let url = config.base();

        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let token_store: Arc<dyn TokenStore> = match options.session_file() {
            Some(path) => Arc::new(FileTokenStore::new(path)),
            None => {
                if options.persist_session {
                    warn!("persist_session is set without a session_path; the session is kept in memory only");
                }
                Arc::new(MemoryTokenStore::new())
            }
        };
        let session = Arc::new(SessionManager::new(
            &url,
            http_client.clone(),
            token_store,
            options.persist_session,
        ));
        let remote = Arc::new(HttpRemoteClient::new(
            &url,
            http_client.clone(),
            session.on_token_change(),
        ));

        Ok(Self::from_parts(url, http_client, options, session, remote, surface, clock))
    }

    /// Assemble a client from already built parts
    pub fn from_parts(
        url: String,
        http_client: Client,
        options: ClientOptions,
        session: Arc<SessionManager>,
        remote: Arc<dyn RemoteDataClient>,
        surface: Arc<dyn NotificationSurface>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(ReplicaStore::new(remote.clone()));
        let reminders = Arc::new(ReminderScheduler::new(surface, clock.clone()));
        let coordinator = MutationCoordinator::new(
            remote,
            store.clone(),
            reminders.clone(),
            session.clone(),
            clock.clone(),
            options.clone(),
        );
        Self {
            url,
            http_client,
            options,
            session,
            store,
            reminders,
            coordinator,
            clock,
            fired: Mutex::new(None),
        }
    }

    /// Receiver of reminders fired by the built-in timer surface. Returns
    /// `None` after the first call or when a custom surface is in use.
    pub fn take_fired_reminders(&self) -> Option<mpsc::UnboundedReceiver<Reminder>> {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Get a reference to the session manager
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Restore a persisted session, ask for notification permission once,
    /// and load the replica if signed in. Returns whether a session is
    /// active.
    pub async fn start(&self) -> Result<bool> {
        let restored = self.session.restore()?;
        if self.options.auto_request_permission {
            self.reminders.request_permission_on_startup().await;
        }
        if restored {
            // The first list call re-validates a restored token
            if let Err(e) = self.coordinator.load_all().await {
                warn!("Initial load failed: {}", e);
            }
        }
        Ok(self.session.is_authenticated())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let session = self.session.login(email, password).await?;
        self.load_after_sign_in().await;
        Ok(session.user)
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let session = self.session.register(email, password, name).await?;
        self.load_after_sign_in().await;
        Ok(session.user)
    }

    async fn load_after_sign_in(&self) {
        self.store.clear();
        if let Err(e) = self.coordinator.load_all().await {
            warn!("Load after sign in failed: {}", e);
        }
    }

    /// Sign out, dropping the replica and every pending reminder
    pub async fn logout(&self) -> Result<()> {
        self.session.logout()?;
        self.store.clear();
        self.reminders.cancel_all().await;
        info!("Signed out");
        Ok(())
    }

    /// Refetch everything; the retry path after a failed load
    pub async fn reload(&self) -> Result<()> {
        self.coordinator.load_all().await
    }

    pub fn starters(&self) -> Arc<Vec<Starter>> {
        self.store.starters()
    }

    pub fn starter(&self, id: StarterId) -> Option<Starter> {
        self.store.get(id)
    }

    pub fn active_starter(&self) -> Option<Starter> {
        self.store.active_starter()
    }

    pub fn recipes(&self) -> Arc<Vec<Recipe>> {
        self.store.recipes()
    }

    pub fn status(&self) -> StoreStatus {
        self.store.status()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.status().error
    }

    pub fn clear_error(&self) {
        self.store.clear_error()
    }

    /// Receive a [`StoreEvent`] for every change of the replica
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub async fn reminder_state(&self, id: StarterId) -> TriggerState {
        self.reminders.trigger_state(id).await
    }

    /// Overdue starters at the current time
    pub fn overdue_starters(&self) -> Vec<Starter> {
        let now = self.clock.now();
        self.store
            .starters()
            .iter()
            .filter(|s| s.is_overdue_at(now))
            .cloned()
            .collect()
    }

    fn target(&self, starter: Option<StarterId>) -> Result<StarterId> {
        starter
            .or_else(|| self.store.active_id())
            .ok_or_else(|| Error::validation("no starter selected"))
    }

    pub fn select_active_starter(&self, id: Option<StarterId>) -> bool {
        self.store.select_active(id)
    }

    pub async fn create_starter(&self, name: Option<&str>) -> Result<Starter> {
        self.coordinator.create_starter(name).await
    }

    pub async fn duplicate_starter(&self, id: StarterId) -> Result<Starter> {
        self.coordinator.duplicate_starter(id).await
    }

    pub async fn delete_starters(&self, ids: &[StarterId]) -> Result<DeleteOutcome> {
        self.coordinator.delete_starters(ids).await
    }

    pub async fn toggle_favorite(&self, id: StarterId) -> Result<()> {
        self.coordinator.toggle_favorite(id).await
    }

    pub async fn rename_starter(&self, name: &str, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator
            .update_starter(id, StarterIntent::Rename(name.to_string()))
            .await
    }

    pub async fn reschedule_feeding(&self, hours: i64, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator
            .update_starter(id, StarterIntent::Reschedule(hours))
            .await
    }

    pub async fn attach_recipe(&self, recipe: RecipeId, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.attach_recipe(id, recipe).await
    }

    pub async fn detach_recipe(&self, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.detach_recipe(id).await
    }

    pub async fn add_feeding(&self, draft: FeedingDraft, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.add_feeding(id, draft).await
    }

    pub async fn edit_feeding(
        &self,
        feeding: FeedingId,
        patch: FeedingPatch,
        starter: Option<StarterId>,
    ) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.edit_feeding(id, feeding, patch).await
    }

    pub async fn delete_feeding(&self, feeding: FeedingId, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.delete_feeding(id, feeding).await
    }

    pub async fn add_note(&self, text: &str, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.add_note(id, text).await
    }

    pub async fn edit_note(&self, note: NoteId, text: &str, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.edit_note(id, note, text).await
    }

    pub async fn delete_note(&self, note: NoteId, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.delete_note(id, note).await
    }

    pub async fn create_recipe(&self, draft: RecipeDraft) -> Result<Recipe> {
        self.coordinator.create_recipe(draft).await
    }

    pub async fn update_recipe(&self, recipe: RecipeId, draft: RecipeDraft) -> Result<()> {
        self.coordinator.update_recipe(recipe, draft).await
    }

    pub async fn delete_recipe(&self, recipe: RecipeId) -> Result<()> {
        self.coordinator.delete_recipe(recipe).await
    }

    pub async fn record_baking(&self, baking: NewBaking, starter: Option<StarterId>) -> Result<Baking> {
        let id = self.target(starter)?;
        self.coordinator.record_baking(id, baking).await
    }

    pub async fn update_baking(
        &self,
        baking: BakingId,
        patch: BakingPatch,
        starter: Option<StarterId>,
    ) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.update_baking(id, baking, patch).await
    }

    pub async fn delete_baking(&self, baking: BakingId, starter: Option<StarterId>) -> Result<()> {
        let id = self.target(starter)?;
        self.coordinator.delete_baking(id, baking).await
    }

    /// Bakings of one starter, or of every starter when `starter` is `None`
    pub async fn list_bakings(&self, starter: Option<StarterId>) -> Result<Vec<Baking>> {
        match starter {
            Some(id) => self.coordinator.list_bakings(id).await,
            None => self.coordinator.list_all_bakings().await,
        }
    }

    /// Bakings filtered by starter and by a case-insensitive search over
    /// result and notes
    pub async fn search_bakings(&self, starter: Option<StarterId>, query: &str) -> Result<Vec<Baking>> {
        let all = self.coordinator.list_all_bakings().await?;
        Ok(filter_bakings(&all, starter, query).into_iter().cloned().collect())
    }

    /// Backup document of the current replica
    pub fn export_snapshot(&self) -> Result<Value> {
        Ok(json!({
            "starters": serde_json::to_value(&*self.store.starters())?,
            "recipes": serde_json::to_value(&*self.store.recipes())?,
            "exportDate": self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "version": EXPORT_VERSION,
            "appName": APP_NAME,
        }))
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::BreadLab;
    pub use crate::config::ClientOptions;
    pub use crate::coordinator::DeleteOutcome;
    pub use crate::error::{Error, Result};
    pub use crate::models::{Baking, Feeding, Note, Recipe, Starter, StarterId, User};
    pub use crate::reminder::{Permission, Reminder, ScheduleOutcome, TriggerState};
    pub use crate::remote::{BakingPatch, FeedingDraft, FeedingPatch, NewBaking, RecipeDraft};
    pub use crate::replica::{StoreEvent, StoreStatus};
}
