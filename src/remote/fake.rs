//! In-memory remote used by unit tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::*;
use super::RemoteDataClient;
use crate::error::{Error, Result};
use crate::models::*;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Unauthorized,
    NotFound,
    Server,
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Failure::Unauthorized => Error::unauthenticated("token expired"),
            Failure::NotFound => Error::not_found("no such record"),
            Failure::Server => Error::Api {
                status: 503,
                message: "Service Unavailable".to_string(),
            },
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    starters: Mutex<BTreeMap<StarterId, Starter>>,
    recipes: Mutex<BTreeMap<RecipeId, Recipe>>,
    bakings: Mutex<Vec<Baking>>,
    failures: Mutex<HashMap<String, VecDeque<Failure>>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<HashMap<String, Duration>>,
    next_id: AtomicI64,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Default::default()
        }
    }

    pub(crate) fn with_starters(starters: Vec<Starter>) -> Self {
        let fake = Self::new();
        for starter in starters {
            fake.put_starter(starter);
        }
        fake
    }

    pub(crate) fn put_starter(&self, starter: Starter) {
        self.starters.lock().unwrap().insert(starter.id, starter);
    }

    pub(crate) fn put_recipe(&self, recipe: Recipe) {
        self.recipes.lock().unwrap().insert(recipe.id, recipe);
    }

    pub(crate) fn starter(&self, id: StarterId) -> Option<Starter> {
        self.starters.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn has_recipe(&self, id: RecipeId) -> bool {
        self.recipes.lock().unwrap().contains_key(&id)
    }

    /// Queue a failure for an upcoming call of `op`
    pub(crate) fn fail_next(&self, op: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .entry(op.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Make every later call of `op` sleep before answering
    pub(crate) fn delay(&self, op: &str, latency: Duration) {
        self.latency.lock().unwrap().insert(op.to_string(), latency);
    }

    async fn respond_after(&self, op: &str) {
        let latency = self.latency.lock().unwrap().get(op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    fn enter(&self, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    /// Like `enter`, but a failure queued as `op:id` only hits that id
    fn enter_id(&self, op: &str, id: i64) -> Result<()> {
        let keyed = format!("{}:{}", op, id);
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&keyed)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(failure) => {
                self.calls.lock().unwrap().push(op.to_string());
                Err(failure.into_error())
            }
            None => self.enter(op),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn with_starter<T>(&self, id: StarterId, f: impl FnOnce(&mut Starter) -> Result<T>) -> Result<T> {
        let mut starters = self.starters.lock().unwrap();
        let starter = starters
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("starter {}", id)))?;
        f(starter)
    }
}

#[async_trait]
impl RemoteDataClient for FakeRemote {
    async fn list_starters(&self) -> Result<Vec<Starter>> {
        self.enter("list_starters")?;
        Ok(self.starters.lock().unwrap().values().cloned().collect())
    }

    async fn get_starter(&self, id: StarterId) -> Result<Starter> {
        self.enter_id("get_starter", id)?;
        self.with_starter(id, |s| Ok(s.clone()))
    }

    async fn create_starter(&self, fields: &NewStarter) -> Result<Starter> {
        self.respond_after("create_starter").await;
        self.enter("create_starter")?;
        let starter = Starter {
            id: self.next_id(),
            name: fields.name.clone(),
            created: fields.created.unwrap_or_else(Utc::now),
            last_fed: fields.last_fed,
            feeding_schedule: fields.feeding_schedule,
            is_favorite: false,
            feeding_history: Vec::new(),
            notes: Vec::new(),
            recipe: None,
        };
        self.put_starter(starter.clone());
        Ok(starter)
    }

    async fn update_starter(&self, id: StarterId, intent: &StarterIntent) -> Result<()> {
        self.respond_after("update_starter").await;
        self.enter("update_starter")?;
        self.with_starter(id, |s| {
            match intent {
                StarterIntent::Rename(name) => s.name = name.trim().to_string(),
                StarterIntent::Reschedule(hours) => s.feeding_schedule = *hours,
                StarterIntent::SetFavorite(favorite) => s.is_favorite = *favorite,
                StarterIntent::AttachRecipe(recipe) => s.recipe = Some(recipe.clone()),
                StarterIntent::DetachRecipe => s.recipe = None,
            }
            Ok(())
        })
    }

    async fn delete_starter(&self, id: StarterId) -> Result<()> {
        self.enter_id("delete_starter", id)?;
        self.starters
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("starter {}", id)))
    }

    async fn add_feeding(&self, starter: StarterId, feeding: &NewFeeding) -> Result<()> {
        self.enter("add_feeding")?;
        let id = self.next_id();
        self.with_starter(starter, |s| {
            let timestamp = feeding.timestamp.unwrap_or_else(Utc::now);
            s.feeding_history.insert(
                0,
                Feeding {
                    id,
                    timestamp,
                    flour: feeding.flour,
                    flour_type: feeding.flour_type.clone(),
                    water: feeding.water,
                    temp: feeding.temp,
                    note: Some(feeding.notes.clone()).filter(|n| !n.is_empty()),
                },
            );
            s.last_fed = Some(timestamp);
            Ok(())
        })
    }

    async fn update_feeding(
        &self,
        starter: StarterId,
        feeding: FeedingId,
        patch: &FeedingPatch,
    ) -> Result<()> {
        self.enter("update_feeding")?;
        self.with_starter(starter, |s| {
            let f = s
                .feeding_history
                .iter_mut()
                .find(|f| f.id == feeding)
                .ok_or_else(|| Error::not_found(format!("feeding {}", feeding)))?;
            if let Some(flour) = patch.flour {
                f.flour = flour;
            }
            if let Some(water) = patch.water {
                f.water = water;
            }
            if let Some(flour_type) = &patch.flour_type {
                f.flour_type = flour_type.clone();
            }
            if let Some(temp) = patch.temp {
                f.temp = temp;
            }
            if let Some(note) = &patch.note {
                f.note = Some(note.clone());
            }
            Ok(())
        })
    }

    async fn delete_feeding(&self, starter: StarterId, feeding: FeedingId) -> Result<()> {
        self.enter("delete_feeding")?;
        self.with_starter(starter, |s| {
            s.feeding_history.retain(|f| f.id != feeding);
            Ok(())
        })
    }

    async fn add_note(&self, starter: StarterId, text: &str) -> Result<()> {
        self.enter("add_note")?;
        let id = self.next_id();
        self.with_starter(starter, |s| {
            s.notes.insert(
                0,
                Note {
                    id,
                    timestamp: Utc::now(),
                    text: text.to_string(),
                },
            );
            Ok(())
        })
    }

    async fn update_note(&self, starter: StarterId, note: NoteId, text: &str) -> Result<()> {
        self.enter("update_note")?;
        self.with_starter(starter, |s| {
            let n = s
                .notes
                .iter_mut()
                .find(|n| n.id == note)
                .ok_or_else(|| Error::not_found(format!("note {}", note)))?;
            n.text = text.to_string();
            Ok(())
        })
    }

    async fn delete_note(&self, starter: StarterId, note: NoteId) -> Result<()> {
        self.enter("delete_note")?;
        self.with_starter(starter, |s| {
            s.notes.retain(|n| n.id != note);
            Ok(())
        })
    }

    async fn list_all_recipes(&self) -> Result<Vec<Recipe>> {
        self.enter("list_all_recipes")?;
        Ok(self.recipes.lock().unwrap().values().cloned().collect())
    }

    async fn get_recipe(&self, id: RecipeId) -> Result<Recipe> {
        self.enter("get_recipe")?;
        self.recipes
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("recipe {}", id)))
    }

    async fn create_recipe(&self, draft: &RecipeDraft) -> Result<Recipe> {
        self.respond_after("create_recipe").await;
        self.enter("create_recipe")?;
        let recipe = Recipe {
            id: self.next_id(),
            name: draft.name.clone(),
            ingredients: draft.ingredients.clone(),
            instructions: draft.instructions.clone(),
            baking_history: Vec::new(),
        };
        self.put_recipe(recipe.clone());
        Ok(recipe)
    }

    async fn update_recipe(&self, id: RecipeId, draft: &RecipeDraft) -> Result<()> {
        self.enter("update_recipe")?;
        let mut recipes = self.recipes.lock().unwrap();
        let recipe = recipes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("recipe {}", id)))?;
        recipe.name = draft.name.clone();
        recipe.ingredients = draft.ingredients.clone();
        recipe.instructions = draft.instructions.clone();
        Ok(())
    }

    async fn delete_recipe(&self, id: RecipeId) -> Result<()> {
        self.enter("delete_recipe")?;
        self.recipes
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("recipe {}", id)))?;
        for starter in self.starters.lock().unwrap().values_mut() {
            if starter.recipe.as_ref().map(|r| r.id) == Some(id) {
                starter.recipe = None;
            }
        }
        Ok(())
    }

    async fn add_baking(&self, starter: StarterId, baking: &NewBaking) -> Result<Baking> {
        self.enter("add_baking")?;
        let starter_name = self.with_starter(starter, |s| Ok(s.name.clone()))?;
        let record = Baking {
            id: self.next_id(),
            date: baking.date,
            starter_id: starter,
            starter_name,
            notes: baking.notes.clone(),
            result: baking.result.clone(),
        };
        self.bakings.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_baking(
        &self,
        _starter: StarterId,
        baking: BakingId,
        patch: &BakingPatch,
    ) -> Result<()> {
        self.enter("update_baking")?;
        let mut bakings = self.bakings.lock().unwrap();
        let b = bakings
            .iter_mut()
            .find(|b| b.id == baking)
            .ok_or_else(|| Error::not_found(format!("baking {}", baking)))?;
        if let Some(date) = patch.date {
            b.date = date;
        }
        if let Some(result) = &patch.result {
            b.result = result.clone();
        }
        if let Some(notes) = &patch.notes {
            b.notes = notes.clone();
        }
        Ok(())
    }

    async fn delete_baking(&self, _starter: StarterId, baking: BakingId) -> Result<()> {
        self.enter("delete_baking")?;
        self.bakings.lock().unwrap().retain(|b| b.id != baking);
        Ok(())
    }

    async fn list_bakings(&self, starter: StarterId) -> Result<Vec<Baking>> {
        self.enter("list_bakings")?;
        Ok(self
            .bakings
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.starter_id == starter)
            .cloned()
            .collect())
    }

    async fn list_all_bakings(&self) -> Result<Vec<Baking>> {
        self.enter("list_all_bakings")?;
        Ok(self.bakings.lock().unwrap().clone())
    }
}

/// Starter fixture fed at `last_fed` on a 24 hour schedule
pub(crate) fn starter(id: StarterId, name: &str) -> Starter {
    Starter {
        id,
        name: name.to_string(),
        created: Utc::now(),
        last_fed: Some(Utc::now()),
        feeding_schedule: 24,
        is_favorite: false,
        feeding_history: Vec::new(),
        notes: Vec::new(),
        recipe: None,
    }
}
