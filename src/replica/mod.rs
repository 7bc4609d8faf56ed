//! In-memory replica of the signed-in user's starters

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{Recipe, RecipeId, Starter, StarterId};
use crate::remote::RemoteDataClient;

/// Notification sent to subscribers whenever the replica changes
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The whole collection was replaced
    Loaded,
    /// A single starter was replaced by a fresh copy
    Refreshed(StarterId),
    Inserted(StarterId),
    Removed(StarterId),
    ActiveChanged(Option<StarterId>),
    RecipesChanged,
    /// A load or refresh failed; the last good data is still in place
    Failed(String),
    Cleared,
}

/// Coarse loading/error flags for the view layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatus {
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct Inner {
    starters: Arc<Vec<Starter>>,
    recipes: Arc<Vec<Recipe>>,
    active: Option<StarterId>,
    status: StoreStatus,
    /// Sequence stamp of the last write applied to each id
    applied: HashMap<StarterId, u64>,
    /// Results stamped before this value belong to an earlier session
    cleared_at: u64,
    last_load: u64,
}

impl Inner {
    fn stale(&self, seq: u64) -> bool {
        seq < self.cleared_at
    }

    fn position(&self, id: StarterId) -> Option<usize> {
        self.starters.iter().position(|s| s.id == id)
    }

    /// Keep the active selection valid: stay on an existing choice, else
    /// fall back to the first starter (or none).
    fn reselect(&mut self) -> Option<Option<StarterId>> {
        if let Some(id) = self.active {
            if self.position(id).is_some() {
                return None;
            }
        }
        let next = self.starters.first().map(|s| s.id);
        if next == self.active {
            return None;
        }
        self.active = next;
        Some(next)
    }
}

/// Observable snapshot of the user's starters.
///
/// Readers get cheap `Arc` snapshots and never see a partially applied
/// change. Every fetch is stamped with a monotonic sequence number and a
/// result older than what is already applied for that id is dropped.
pub struct ReplicaStore {
    remote: Arc<dyn RemoteDataClient>,
    inner: RwLock<Inner>,
    seq: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl ReplicaStore {
    pub fn new(remote: Arc<dyn RemoteDataClient>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            remote,
            inner: RwLock::new(Inner::default()),
            seq: AtomicU64::new(1),
            events,
        }
    }

    /// Receive a [`StoreEvent`] for every change
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Stamp a write before its remote call is issued. Pass the stamp to
    /// [`insert`](Self::insert) or [`upsert_recipe`](Self::upsert_recipe)
    /// so that a result arriving after [`clear`](Self::clear) is dropped.
    pub fn stamp(&self) -> u64 {
        self.next_seq()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Fetch the whole collection and replace the replica in one step.
    ///
    /// On failure the previous snapshot stays and the error is recorded in
    /// [`StoreStatus`].
    pub async fn load(&self) -> Result<()> {
        let seq = self.next_seq();
        self.write().status.loading = true;

        let result = self.remote.list_starters().await;

        let mut inner = self.write();
        if inner.stale(seq) || seq < inner.last_load {
            debug!("Discarding superseded load #{}", seq);
            return Ok(());
        }
        inner.status.loading = false;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Failed to load starters: {}", e);
                let message = e.to_string();
                inner.status.error = Some(message.clone());
                drop(inner);
                self.emit(StoreEvent::Failed(message));
                return Err(e);
            }
        };

        // Entries written after this load was issued win over its results
        let mut next = Vec::with_capacity(fetched.len());
        for starter in fetched {
            match inner.applied.get(&starter.id) {
                Some(&applied) if applied > seq => {
                    if let Some(pos) = inner.position(starter.id) {
                        next.push(inner.starters[pos].clone());
                    }
                }
                _ => next.push(starter),
            }
        }
        for kept in inner.starters.iter() {
            let newer = inner.applied.get(&kept.id).map_or(false, |&a| a > seq);
            if newer && !next.iter().any(|s| s.id == kept.id) {
                next.push(kept.clone());
            }
        }
        for starter in &next {
            let stamp = inner.applied.entry(starter.id).or_insert(seq);
            *stamp = (*stamp).max(seq);
        }

        info!("Loaded {} starters", next.len());
        inner.starters = Arc::new(next);
        inner.last_load = seq;
        inner.status.error = None;
        let active = inner.reselect();
        drop(inner);

        self.emit(StoreEvent::Loaded);
        if let Some(active) = active {
            self.emit(StoreEvent::ActiveChanged(active));
        }
        Ok(())
    }

    /// Refetch one starter and replace only that entry.
    ///
    /// An id that is not in the replica is never inserted. A starter the
    /// server no longer has is removed and the `NotFound` error returned.
    pub async fn refresh_one(&self, id: StarterId) -> Result<()> {
        let seq = self.next_seq();
        let result = self.remote.get_starter(id).await;

        let mut inner = self.write();
        if inner.stale(seq) {
            return Ok(());
        }
        if inner.applied.get(&id).map_or(false, |&a| a > seq) {
            debug!("Discarding out-of-order refresh #{} of starter {}", seq, id);
            return Ok(());
        }

        match result {
            Ok(starter) => {
                let Some(pos) = inner.position(id) else {
                    debug!("Starter {} left the replica before its refresh landed", id);
                    return Ok(());
                };
                Arc::make_mut(&mut inner.starters)[pos] = starter;
                inner.applied.insert(id, seq);
                drop(inner);
                self.emit(StoreEvent::Refreshed(id));
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!("Starter {} no longer exists on the server", id);
                let present = inner.position(id).is_some();
                let active = Self::remove_locked(&mut inner, id, seq);
                drop(inner);
                if present {
                    self.emit(StoreEvent::Removed(id));
                }
                if let Some(active) = active {
                    self.emit(StoreEvent::ActiveChanged(active));
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Add a starter returned by a successful create. Returns `false` and
    /// leaves the replica alone when `seq` predates the last clear.
    pub fn insert(&self, starter: Starter, seq: u64) -> bool {
        let id = starter.id;
        let mut inner = self.write();
        if inner.stale(seq) {
            debug!("Dropping starter {} created before the replica was cleared", id);
            return false;
        }
        let starters = Arc::make_mut(&mut inner.starters);
        match starters.iter().position(|s| s.id == id) {
            Some(pos) => starters[pos] = starter,
            None => starters.push(starter),
        }
        let applied = inner.applied.entry(id).or_default();
        *applied = (*applied).max(seq);
        let active = inner.reselect();
        drop(inner);

        self.emit(StoreEvent::Inserted(id));
        if let Some(active) = active {
            self.emit(StoreEvent::ActiveChanged(active));
        }
        true
    }

    /// Drop a starter after a successful delete
    pub fn remove(&self, id: StarterId) -> bool {
        let seq = self.next_seq();
        let mut inner = self.write();
        let present = inner.position(id).is_some();
        let active = Self::remove_locked(&mut inner, id, seq);
        drop(inner);

        if present {
            self.emit(StoreEvent::Removed(id));
        }
        if let Some(active) = active {
            self.emit(StoreEvent::ActiveChanged(active));
        }
        present
    }

    fn remove_locked(inner: &mut Inner, id: StarterId, seq: u64) -> Option<Option<StarterId>> {
        if inner.position(id).is_some() {
            Arc::make_mut(&mut inner.starters).retain(|s| s.id != id);
        }
        // The tombstone keeps an in-flight load from resurrecting the id
        inner.applied.insert(id, seq);
        inner.reselect()
    }

    /// Empty the replica, e.g. after the session ended. Fetches still in
    /// flight are ignored when they complete.
    pub fn clear(&self) {
        let seq = self.next_seq();
        {
            let mut inner = self.write();
            *inner = Inner {
                cleared_at: seq,
                ..Inner::default()
            };
        }
        info!("Replica cleared");
        self.emit(StoreEvent::Cleared);
    }

    /// Select the active starter. Fails when the id is not in the replica.
    pub fn select_active(&self, id: Option<StarterId>) -> bool {
        let mut inner = self.write();
        if let Some(id) = id {
            if inner.position(id).is_none() {
                return false;
            }
        }
        if inner.active == id {
            return true;
        }
        inner.active = id;
        drop(inner);
        self.emit(StoreEvent::ActiveChanged(id));
        true
    }

    pub fn active_id(&self) -> Option<StarterId> {
        self.read(|inner| inner.active)
    }

    pub fn active_starter(&self) -> Option<Starter> {
        self.read(|inner| {
            let id = inner.active?;
            inner.starters.iter().find(|s| s.id == id).cloned()
        })
    }

    /// Snapshot of every starter in display order
    pub fn starters(&self) -> Arc<Vec<Starter>> {
        self.read(|inner| inner.starters.clone())
    }

    pub fn get(&self, id: StarterId) -> Option<Starter> {
        self.read(|inner| inner.starters.iter().find(|s| s.id == id).cloned())
    }

    pub fn contains(&self, id: StarterId) -> bool {
        self.read(|inner| inner.position(id).is_some())
    }

    /// Ids of the starters whose recipe reference is `recipe`
    pub fn referencing(&self, recipe: RecipeId) -> Vec<StarterId> {
        self.read(|inner| {
            inner
                .starters
                .iter()
                .filter(|s| s.recipe.as_ref().map(|r| r.id) == Some(recipe))
                .map(|s| s.id)
                .collect()
        })
    }

    pub fn status(&self) -> StoreStatus {
        self.read(|inner| inner.status.clone())
    }

    /// Record a failure for the view layer without touching the data
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.write().status.error = Some(message.clone());
        self.emit(StoreEvent::Failed(message));
    }

    /// Dismiss the current error message
    pub fn clear_error(&self) {
        self.write().status.error = None;
    }

    /// Global recipe listing, independent of any starter's recipe
    pub fn recipes(&self) -> Arc<Vec<Recipe>> {
        self.read(|inner| inner.recipes.clone())
    }

    pub async fn load_recipes(&self) -> Result<()> {
        let seq = self.next_seq();
        let recipes = self.remote.list_all_recipes().await?;
        let mut inner = self.write();
        if inner.stale(seq) {
            return Ok(());
        }
        inner.recipes = Arc::new(recipes);
        drop(inner);
        self.emit(StoreEvent::RecipesChanged);
        Ok(())
    }

    /// Insert or replace one recipe in the listing, unless `seq` predates
    /// the last clear
    pub fn upsert_recipe(&self, recipe: Recipe, seq: u64) -> bool {
        let mut inner = self.write();
        if inner.stale(seq) {
            return false;
        }
        let recipes = Arc::make_mut(&mut inner.recipes);
        match recipes.iter().position(|r| r.id == recipe.id) {
            Some(pos) => recipes[pos] = recipe,
            None => recipes.push(recipe),
        }
        drop(inner);
        self.emit(StoreEvent::RecipesChanged);
        true
    }

    pub fn remove_recipe(&self, id: RecipeId) {
        let mut inner = self.write();
        Arc::make_mut(&mut inner.recipes).retain(|r| r.id != id);
        drop(inner);
        self.emit(StoreEvent::RecipesChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::{starter, Failure, FakeRemote};

    fn recipe(id: RecipeId, name: &str) -> Recipe {
        Recipe {
            id,
            name: name.to_string(),
            ingredients: String::new(),
            instructions: String::new(),
            baking_history: Vec::new(),
        }
    }

    fn store_with(starters: Vec<Starter>) -> (ReplicaStore, Arc<FakeRemote>) {
        let remote = Arc::new(FakeRemote::with_starters(starters));
        (ReplicaStore::new(remote.clone()), remote)
    }

    #[tokio::test]
    async fn load_replaces_and_selects_first() {
        let (store, _remote) = store_with(vec![starter(1, "Rye"), starter(2, "Wheat")]);
        let mut events = store.subscribe();

        store.load().await.unwrap();

        assert_eq!(store.starters().len(), 2);
        assert_eq!(store.active_id(), Some(1));
        assert_eq!(store.status(), StoreStatus::default());
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Loaded);
        assert_eq!(events.recv().await.unwrap(), StoreEvent::ActiveChanged(Some(1)));
    }

    #[tokio::test]
    async fn failed_load_keeps_last_snapshot() {
        let (store, remote) = store_with(vec![starter(1, "Rye")]);
        store.load().await.unwrap();

        remote.fail_next("list_starters", Failure::Server);
        assert!(store.load().await.is_err());

        assert_eq!(store.starters().len(), 1);
        let status = store.status();
        assert!(!status.loading);
        assert!(status.error.unwrap().contains("503"));

        store.load().await.unwrap();
        assert_eq!(store.status().error, None);
    }

    #[tokio::test]
    async fn reload_keeps_explicit_selection() {
        let (store, _remote) = store_with(vec![starter(1, "Rye"), starter(2, "Wheat")]);
        store.load().await.unwrap();
        assert!(store.select_active(Some(2)));

        store.load().await.unwrap();
        assert_eq!(store.active_id(), Some(2));
        assert!(!store.select_active(Some(99)));
        assert_eq!(store.active_id(), Some(2));
    }

    #[tokio::test]
    async fn refresh_replaces_only_that_entry() {
        let (store, remote) = store_with(vec![starter(1, "Rye"), starter(2, "Wheat")]);
        store.load().await.unwrap();

        let mut renamed = remote.starter(2).unwrap();
        renamed.name = "Spelt".to_string();
        remote.put_starter(renamed);
        let mut changed = remote.starter(1).unwrap();
        changed.name = "not yet visible".to_string();
        remote.put_starter(changed);

        store.refresh_one(2).await.unwrap();
        assert_eq!(store.get(2).unwrap().name, "Spelt");
        assert_eq!(store.get(1).unwrap().name, "Rye");
    }

    #[tokio::test]
    async fn refresh_never_inserts() {
        let (store, remote) = store_with(vec![starter(1, "Rye")]);
        store.load().await.unwrap();
        remote.put_starter(starter(5, "Stranger"));

        store.refresh_one(5).await.unwrap();
        assert!(!store.contains(5));
    }

    #[tokio::test]
    async fn refresh_of_vanished_starter_removes_it() {
        let (store, remote) = store_with(vec![starter(1, "Rye"), starter(2, "Wheat")]);
        store.load().await.unwrap();
        remote.fail_next("get_starter", Failure::NotFound);

        let err = store.refresh_one(1).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.contains(1));
        assert_eq!(store.active_id(), Some(2));
    }

    #[tokio::test]
    async fn failed_refresh_leaves_entry_untouched() {
        let (store, remote) = store_with(vec![starter(1, "Rye")]);
        store.load().await.unwrap();
        let before = store.get(1).unwrap();

        let mut changed = before.clone();
        changed.name = "Rye 2".to_string();
        remote.put_starter(changed);
        remote.fail_next("get_starter", Failure::Server);

        assert!(store.refresh_one(1).await.is_err());
        assert_eq!(store.get(1).unwrap(), before);

        store.refresh_one(1).await.unwrap();
        assert_eq!(store.get(1).unwrap().name, "Rye 2");
    }

    #[tokio::test]
    async fn remove_reselects_first_remaining() {
        let (store, _remote) = store_with(vec![starter(1, "Rye"), starter(2, "Wheat")]);
        store.load().await.unwrap();

        assert!(store.remove(1));
        assert_eq!(store.active_id(), Some(2));
        assert!(store.remove(2));
        assert_eq!(store.active_id(), None);
        assert!(!store.remove(2));
    }

    #[tokio::test]
    async fn insert_keeps_server_identity() {
        let (store, _remote) = store_with(vec![]);
        store.load().await.unwrap();
        assert_eq!(store.active_id(), None);

        let seq = store.stamp();
        assert!(store.insert(starter(42, "Fresh"), seq));
        assert_eq!(store.starters()[0].id, 42);
        assert_eq!(store.active_id(), Some(42));
    }

    #[tokio::test]
    async fn writes_stamped_before_clear_are_dropped() {
        let (store, _remote) = store_with(vec![]);
        store.load().await.unwrap();

        let seq = store.stamp();
        store.clear();
        assert!(!store.insert(starter(42, "Fresh"), seq));
        assert!(!store.upsert_recipe(recipe(5, "Country loaf"), seq));

        assert!(store.starters().is_empty());
        assert!(store.recipes().is_empty());
        assert_eq!(store.active_id(), None);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let (store, _remote) = store_with(vec![starter(1, "Rye")]);
        store.load().await.unwrap();
        store.report_error("boom");

        store.clear();
        assert!(store.starters().is_empty());
        assert_eq!(store.active_id(), None);
        assert_eq!(store.status(), StoreStatus::default());
    }

    #[tokio::test]
    async fn recipe_listing_is_separate_from_starters() {
        let (store, remote) = store_with(vec![starter(1, "Rye")]);
        remote.put_recipe(recipe(9, "Country loaf"));

        store.load_recipes().await.unwrap();
        assert_eq!(store.recipes().len(), 1);
        store.remove_recipe(9);
        assert!(store.recipes().is_empty());
        assert_eq!(store.starters().len(), 0);
    }
}
