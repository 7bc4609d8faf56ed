//! Capability-typed access to the authoritative store

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Baking, BakingId, FeedingId, NoteId, Recipe, RecipeId, Starter, StarterId,
};

pub use http::HttpRemoteClient;
pub use types::*;

/// Operations the core needs from the remote store.
///
/// Every call fails with [`crate::Error::Unauthenticated`] when the token is
/// rejected, [`crate::Error::NotFound`] for a missing entity, and another
/// variant for everything else.
#[async_trait]
pub trait RemoteDataClient: Send + Sync {
    async fn list_starters(&self) -> Result<Vec<Starter>>;
    async fn get_starter(&self, id: StarterId) -> Result<Starter>;
    async fn create_starter(&self, fields: &NewStarter) -> Result<Starter>;
    async fn update_starter(&self, id: StarterId, intent: &StarterIntent) -> Result<()>;
    async fn delete_starter(&self, id: StarterId) -> Result<()>;

    async fn add_feeding(&self, starter: StarterId, feeding: &NewFeeding) -> Result<()>;
    async fn update_feeding(
        &self,
        starter: StarterId,
        feeding: FeedingId,
        patch: &FeedingPatch,
    ) -> Result<()>;
    async fn delete_feeding(&self, starter: StarterId, feeding: FeedingId) -> Result<()>;

    async fn add_note(&self, starter: StarterId, text: &str) -> Result<()>;
    async fn update_note(&self, starter: StarterId, note: NoteId, text: &str) -> Result<()>;
    async fn delete_note(&self, starter: StarterId, note: NoteId) -> Result<()>;

    async fn list_all_recipes(&self) -> Result<Vec<Recipe>>;
    async fn get_recipe(&self, id: RecipeId) -> Result<Recipe>;
    async fn create_recipe(&self, draft: &RecipeDraft) -> Result<Recipe>;
    async fn update_recipe(&self, id: RecipeId, draft: &RecipeDraft) -> Result<()>;
    async fn delete_recipe(&self, id: RecipeId) -> Result<()>;

    async fn add_baking(&self, starter: StarterId, baking: &NewBaking) -> Result<Baking>;
    async fn update_baking(
        &self,
        starter: StarterId,
        baking: BakingId,
        patch: &BakingPatch,
    ) -> Result<()>;
    async fn delete_baking(&self, starter: StarterId, baking: BakingId) -> Result<()>;
    async fn list_bakings(&self, starter: StarterId) -> Result<Vec<Baking>>;
    async fn list_all_bakings(&self) -> Result<Vec<Baking>>;
}
