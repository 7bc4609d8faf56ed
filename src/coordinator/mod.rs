//! Runs user intents against the remote store and reconciles the replica

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::Clock;
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::models::{
    Baking, BakingId, FeedingId, NoteId, Recipe, RecipeId, Starter, StarterId,
};
use crate::reminder::ReminderScheduler;
use crate::remote::{
    BakingPatch, FeedingDraft, FeedingPatch, NewBaking, NewFeeding, NewStarter, RecipeDraft,
    RemoteDataClient, StarterIntent,
};
use crate::replica::ReplicaStore;
use crate::session::SessionManager;

type ReminderKey = (Option<DateTime<Utc>>, i64);

/// Result of a bulk starter deletion. Every id is attempted independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    pub deleted: Vec<StarterId>,
    pub failed: Vec<(StarterId, String)>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Message naming only the ids that could not be deleted
    pub fn error_message(&self) -> Option<String> {
        match self.failed.as_slice() {
            [] => None,
            [(id, reason)] => Some(format!("Failed to delete starter {}: {}", id, reason)),
            failed => {
                let ids: Vec<String> = failed.iter().map(|(id, _)| id.to_string()).collect();
                Some(format!(
                    "Failed to delete starters {}: {}",
                    ids.join(", "),
                    failed[0].1
                ))
            }
        }
    }

    pub fn into_result(self) -> Result<Vec<StarterId>> {
        match self.error_message() {
            Some(message) => Err(Error::PartialFailure(message)),
            None => Ok(self.deleted),
        }
    }
}

/// Turns each intent into one remote call followed by one refetch of the
/// affected starter.
///
/// Mutations on the same starter are serialized; mutations on different
/// starters run independently. A failure is reported once through the
/// replica status and returned to the caller.
pub struct MutationCoordinator {
    remote: Arc<dyn RemoteDataClient>,
    store: Arc<ReplicaStore>,
    reminders: Arc<ReminderScheduler>,
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    options: ClientOptions,
    locks: Mutex<HashMap<StarterId, Arc<tokio::sync::Mutex<()>>>>,
}

impl MutationCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteDataClient>,
        store: Arc<ReplicaStore>,
        reminders: Arc<ReminderScheduler>,
        session: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
        options: ClientOptions,
    ) -> Self {
        Self {
            remote,
            store,
            reminders,
            session,
            clock,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: StarterId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    fn forget_lock(&self, id: StarterId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn ensure_authenticated(&self) -> Result<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(Error::unauthenticated("not logged in"))
        }
    }

    fn require(&self, id: StarterId) -> Result<Starter> {
        self.store
            .get(id)
            .ok_or_else(|| Error::not_found(format!("starter {}", id)))
    }

    /// Forced logout after the server rejected the token
    pub async fn handle_unauthenticated(&self, reason: &str) {
        self.session.invalidate(reason);
        self.store.clear();
        self.reminders.cancel_all().await;
        self.store.report_error("Session expired, please log in again");
    }

    /// Convert a remote failure into the single message shown to the user
    async fn surface(&self, action: &str, e: Error) -> Error {
        if e.is_unauthenticated() {
            self.handle_unauthenticated(&e.to_string()).await;
        } else {
            let message = format!("Failed to {}: {}", action, e);
            error!("{}", message);
            self.store.report_error(message);
        }
        e
    }

    /// Refetch one starter and re-arm its reminder if the due time moved
    async fn reconcile(&self, id: StarterId, before: ReminderKey, action: &str) -> Result<()> {
        if let Err(e) = self.store.refresh_one(id).await {
            if e.is_not_found() {
                self.reminders.cancel(id).await;
            }
            return Err(self.surface(action, e).await);
        }
        match self.store.get(id) {
            Some(after) if after.reminder_key() != before => {
                self.reminders.schedule_for(&after).await;
            }
            Some(_) => {}
            None => self.reminders.cancel(id).await,
        }
        Ok(())
    }

    /// One remote write scoped to `id`, then a refetch of `id`
    async fn mutate<T, F, Fut>(&self, id: StarterId, action: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.mutate_with(id, action, |_| call()).await
    }

    /// Like [`mutate`](Self::mutate), but the call is built from the
    /// starter as it stands once the per-id lock is held
    async fn mutate_with<T, F, Fut>(&self, id: StarterId, action: &str, call: F) -> Result<T>
    where
        F: FnOnce(&Starter) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_authenticated()?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let current = self.require(id)?;
        let before = current.reminder_key();

        let value = match call(&current).await {
            Ok(value) => value,
            Err(e) => return Err(self.surface(action, e).await),
        };
        self.reconcile(id, before, action).await?;
        Ok(value)
    }

    /// Fetch everything and re-arm every reminder
    pub async fn load_all(&self) -> Result<()> {
        self.ensure_authenticated()?;
        if let Err(e) = self.store.load().await {
            if e.is_unauthenticated() {
                self.handle_unauthenticated(&e.to_string()).await;
            }
            return Err(e);
        }
        if let Err(e) = self.store.load_recipes().await {
            if e.is_unauthenticated() {
                self.handle_unauthenticated(&e.to_string()).await;
                return Err(e);
            }
            warn!("Failed to load recipes: {}", e);
        }
        self.reminders.reschedule_all(&self.store.starters()).await;
        Ok(())
    }

    async fn create(&self, fields: NewStarter, action: &str) -> Result<Starter> {
        self.ensure_authenticated()?;
        fields.validate()?;
        let seq = self.store.stamp();
        let starter = match self.remote.create_starter(&fields).await {
            Ok(starter) => starter,
            Err(e) => return Err(self.surface(action, e).await),
        };
        info!("Created starter {} ({})", starter.id, starter.name);
        // The session may have ended while the create was in flight
        if self.store.insert(starter.clone(), seq) {
            self.store.select_active(Some(starter.id));
            self.reminders.schedule_for(&starter).await;
        }
        Ok(starter)
    }

    /// Create a starter; the name defaults to `Starter #n`
    pub async fn create_starter(&self, name: Option<&str>) -> Result<Starter> {
        let name = match name {
            Some(name) => name.trim().to_string(),
            None => format!("Starter #{}", self.store.starters().len() + 1),
        };
        let now = self.clock.now();
        let fields = NewStarter {
            name,
            feeding_schedule: self.options.default_feeding_schedule,
            created: Some(now),
            last_fed: Some(now),
        };
        self.create(fields, "create starter").await
    }

    /// New starter with the source's name and interval and a fresh history
    pub async fn duplicate_starter(&self, id: StarterId) -> Result<Starter> {
        let source = self.require(id)?;
        let now = self.clock.now();
        let fields = NewStarter {
            name: format!("{} (Copy)", source.name),
            feeding_schedule: source.feeding_schedule,
            created: Some(now),
            last_fed: Some(now),
        };
        self.create(fields, "duplicate starter").await
    }

    /// Delete each id independently. One failure does not stop the others.
    pub async fn delete_starters(&self, ids: &[StarterId]) -> Result<DeleteOutcome> {
        self.ensure_authenticated()?;
        let mut outcome = DeleteOutcome::default();

        for (i, &id) in ids.iter().enumerate() {
            let lock = self.lock_for(id);
            let guard = lock.lock().await;
            match self.remote.delete_starter(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!("Starter {} was already gone", id),
                Err(e) if e.is_unauthenticated() => {
                    drop(guard);
                    outcome.failed.extend(ids[i..].iter().map(|&id| (id, e.to_string())));
                    self.handle_unauthenticated(&e.to_string()).await;
                    return Ok(outcome);
                }
                Err(e) => {
                    error!("Failed to delete starter {}: {}", id, e);
                    outcome.failed.push((id, e.to_string()));
                    continue;
                }
            }
            self.store.remove(id);
            self.reminders.cancel(id).await;
            drop(guard);
            self.forget_lock(id);
            outcome.deleted.push(id);
        }

        if let Some(message) = outcome.error_message() {
            self.store.report_error(message);
        }
        info!("Deleted {} of {} starters", outcome.deleted.len(), ids.len());
        Ok(outcome)
    }

    /// Apply a single-field update to one starter
    pub async fn update_starter(&self, id: StarterId, intent: StarterIntent) -> Result<()> {
        intent.validate()?;
        self.mutate(id, "update starter", || self.remote.update_starter(id, &intent))
            .await
    }

    pub async fn toggle_favorite(&self, id: StarterId) -> Result<()> {
        self.mutate_with(id, "update starter", |current| {
            let intent = StarterIntent::SetFavorite(!current.is_favorite);
            async move { self.remote.update_starter(id, &intent).await }
        })
        .await
    }

    /// Point the starter at a recipe from the global listing
    pub async fn attach_recipe(&self, id: StarterId, recipe: RecipeId) -> Result<()> {
        self.ensure_authenticated()?;
        let listed = self.store.recipes().iter().find(|r| r.id == recipe).cloned();
        let recipe = match listed {
            Some(recipe) => recipe,
            None => match self.remote.get_recipe(recipe).await {
                Ok(recipe) => recipe,
                Err(e) => return Err(self.surface("attach recipe", e).await),
            },
        };
        self.update_starter(id, StarterIntent::AttachRecipe(recipe))
            .await
    }

    /// Clear the starter's recipe reference. The recipe itself stays.
    pub async fn detach_recipe(&self, id: StarterId) -> Result<()> {
        self.update_starter(id, StarterIntent::DetachRecipe).await
    }

    fn new_feeding(&self, draft: FeedingDraft) -> NewFeeding {
        let options = &self.options;
        NewFeeding {
            flour: draft.flour.unwrap_or(options.default_flour_grams),
            water: draft.water.unwrap_or(options.default_water_grams),
            flour_type: draft
                .flour_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| options.default_flour_type.clone()),
            temp: draft.temp.unwrap_or(options.default_temperature),
            notes: draft.note.unwrap_or_default().trim().to_string(),
            timestamp: draft.timestamp,
        }
    }

    /// Log a feeding; unset fields take the configured defaults
    pub async fn add_feeding(&self, id: StarterId, draft: FeedingDraft) -> Result<()> {
        let feeding = self.new_feeding(draft);
        feeding.validate()?;
        self.mutate(id, "add feeding", || self.remote.add_feeding(id, &feeding))
            .await
    }

    pub async fn edit_feeding(
        &self,
        id: StarterId,
        feeding: FeedingId,
        patch: FeedingPatch,
    ) -> Result<()> {
        patch.validate()?;
        self.mutate(id, "update feeding", || {
            self.remote.update_feeding(id, feeding, &patch)
        })
        .await
    }

    pub async fn delete_feeding(&self, id: StarterId, feeding: FeedingId) -> Result<()> {
        self.mutate(id, "delete feeding", || self.remote.delete_feeding(id, feeding))
            .await
    }

    pub async fn add_note(&self, id: StarterId, text: &str) -> Result<()> {
        let text = validate_note(text)?;
        self.mutate(id, "add note", || self.remote.add_note(id, text))
            .await
    }

    pub async fn edit_note(&self, id: StarterId, note: NoteId, text: &str) -> Result<()> {
        let text = validate_note(text)?;
        self.mutate(id, "update note", || self.remote.update_note(id, note, text))
            .await
    }

    pub async fn delete_note(&self, id: StarterId, note: NoteId) -> Result<()> {
        self.mutate(id, "delete note", || self.remote.delete_note(id, note))
            .await
    }

    pub async fn create_recipe(&self, draft: RecipeDraft) -> Result<Recipe> {
        self.ensure_authenticated()?;
        draft.validate()?;
        let seq = self.store.stamp();
        match self.remote.create_recipe(&draft).await {
            Ok(recipe) => {
                self.store.upsert_recipe(recipe.clone(), seq);
                Ok(recipe)
            }
            Err(e) => Err(self.surface("create recipe", e).await),
        }
    }

    pub async fn update_recipe(&self, recipe: RecipeId, draft: RecipeDraft) -> Result<()> {
        self.ensure_authenticated()?;
        draft.validate()?;
        let seq = self.store.stamp();
        let result = match self.remote.update_recipe(recipe, &draft).await {
            Ok(()) => self.remote.get_recipe(recipe).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(updated) => {
                self.store.upsert_recipe(updated, seq);
            }
            Err(e) => return Err(self.surface("update recipe", e).await),
        }
        self.refresh_referencing(recipe, "update recipe").await
    }

    /// Delete a recipe everywhere. A recipe that is already gone counts as
    /// deleted.
    pub async fn delete_recipe(&self, recipe: RecipeId) -> Result<()> {
        self.ensure_authenticated()?;
        match self.remote.delete_recipe(recipe).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Recipe {} was already gone", recipe),
            Err(e) => return Err(self.surface("delete recipe", e).await),
        }
        self.store.remove_recipe(recipe);
        self.refresh_referencing(recipe, "delete recipe").await
    }

    async fn refresh_referencing(&self, recipe: RecipeId, action: &str) -> Result<()> {
        let mut first_error = None;
        for id in self.store.referencing(recipe) {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let Some(before) = self.store.get(id).map(|s| s.reminder_key()) else {
                continue;
            };
            if let Err(e) = self.reconcile(id, before, action).await {
                if e.is_unauthenticated() {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn record_baking(&self, id: StarterId, baking: NewBaking) -> Result<Baking> {
        self.mutate(id, "record baking", || self.remote.add_baking(id, &baking))
            .await
    }

    pub async fn update_baking(
        &self,
        id: StarterId,
        baking: BakingId,
        patch: BakingPatch,
    ) -> Result<()> {
        patch.validate()?;
        self.mutate(id, "update baking", || {
            self.remote.update_baking(id, baking, &patch)
        })
        .await
    }

    pub async fn delete_baking(&self, id: StarterId, baking: BakingId) -> Result<()> {
        self.mutate(id, "delete baking", || self.remote.delete_baking(id, baking))
            .await
    }

    pub async fn list_bakings(&self, id: StarterId) -> Result<Vec<Baking>> {
        self.ensure_authenticated()?;
        match self.remote.list_bakings(id).await {
            Ok(bakings) => Ok(bakings),
            Err(e) => Err(self.surface("load bakings", e).await),
        }
    }

    pub async fn list_all_bakings(&self) -> Result<Vec<Baking>> {
        self.ensure_authenticated()?;
        match self.remote.list_all_bakings().await {
            Ok(bakings) => Ok(bakings),
            Err(e) => Err(self.surface("load bakings", e).await),
        }
    }
}

fn validate_note(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::validation("note must not be empty"));
    }
    Ok(text)
}
