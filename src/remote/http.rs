//! REST implementation of the remote data client

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::watch;

use super::types::*;
use super::RemoteDataClient;
use crate::error::Result;
use crate::fetch::{Fetch, FetchBuilder};
use crate::models::{
    Baking, BakingId, FeedingId, NoteId, Recipe, RecipeId, Starter, StarterId,
};

/// Client for the Bread Lab REST API
pub struct HttpRemoteClient {
    /// The base URL of the API
    url: String,

    /// HTTP client used for requests
    client: Client,

    /// Token published by the session manager
    token: watch::Receiver<Option<String>>,
}

impl HttpRemoteClient {
    /// Create a new client. `token` comes from
    /// [`crate::session::SessionManager::on_token_change`].
    pub fn new(url: &str, client: Client, token: watch::Receiver<Option<String>>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    fn authorized<'a>(&self, builder: FetchBuilder<'a>) -> FetchBuilder<'a> {
        let token = self.token.borrow().clone();
        builder.bearer_auth(token.as_deref())
    }

    fn get(&self, path: &str) -> FetchBuilder<'_> {
        self.authorized(Fetch::get(&self.client, &self.endpoint(path)))
    }

    fn post(&self, path: &str) -> FetchBuilder<'_> {
        self.authorized(Fetch::post(&self.client, &self.endpoint(path)))
    }

    fn put(&self, path: &str) -> FetchBuilder<'_> {
        self.authorized(Fetch::put(&self.client, &self.endpoint(path)))
    }

    fn delete(&self, path: &str) -> FetchBuilder<'_> {
        self.authorized(Fetch::delete(&self.client, &self.endpoint(path)))
    }
}

#[async_trait]
impl RemoteDataClient for HttpRemoteClient {
    async fn list_starters(&self) -> Result<Vec<Starter>> {
        self.get("/starters").execute().await
    }

    async fn get_starter(&self, id: StarterId) -> Result<Starter> {
        self.get(&format!("/starters/{}", id)).execute().await
    }

    async fn create_starter(&self, fields: &NewStarter) -> Result<Starter> {
        self.post("/starters").json(fields)?.execute().await
    }

    async fn update_starter(&self, id: StarterId, intent: &StarterIntent) -> Result<()> {
        self.put(&format!("/starters/{}", id))
            .json(&intent.to_patch()?)?
            .execute_empty()
            .await
    }

    async fn delete_starter(&self, id: StarterId) -> Result<()> {
        self.delete(&format!("/starters/{}", id))
            .execute_empty()
            .await
    }

    async fn add_feeding(&self, starter: StarterId, feeding: &NewFeeding) -> Result<()> {
        self.post(&format!("/starters/{}/feedings", starter))
            .json(feeding)?
            .execute_empty()
            .await
    }

    async fn update_feeding(
        &self,
        starter: StarterId,
        feeding: FeedingId,
        patch: &FeedingPatch,
    ) -> Result<()> {
        self.put(&format!("/starters/{}/feedings/{}", starter, feeding))
            .json(patch)?
            .execute_empty()
            .await
    }

    async fn delete_feeding(&self, starter: StarterId, feeding: FeedingId) -> Result<()> {
        self.delete(&format!("/starters/{}/feedings/{}", starter, feeding))
            .execute_empty()
            .await
    }

    async fn add_note(&self, starter: StarterId, text: &str) -> Result<()> {
        self.post(&format!("/starters/{}/notes", starter))
            .json(&json!({ "text": text }))?
            .execute_empty()
            .await
    }

    async fn update_note(&self, starter: StarterId, note: NoteId, text: &str) -> Result<()> {
        self.put(&format!("/starters/{}/notes/{}", starter, note))
            .json(&json!({ "text": text }))?
            .execute_empty()
            .await
    }

    async fn delete_note(&self, starter: StarterId, note: NoteId) -> Result<()> {
        self.delete(&format!("/starters/{}/notes/{}", starter, note))
            .execute_empty()
            .await
    }

    async fn list_all_recipes(&self) -> Result<Vec<Recipe>> {
        self.get("/recipes").execute().await
    }

    async fn get_recipe(&self, id: RecipeId) -> Result<Recipe> {
        self.get(&format!("/recipes/{}", id)).execute().await
    }

    async fn create_recipe(&self, draft: &RecipeDraft) -> Result<Recipe> {
        self.post("/recipes").json(draft)?.execute().await
    }

    async fn update_recipe(&self, id: RecipeId, draft: &RecipeDraft) -> Result<()> {
        self.put(&format!("/recipes/{}", id))
            .json(draft)?
            .execute_empty()
            .await
    }

    async fn delete_recipe(&self, id: RecipeId) -> Result<()> {
        self.delete(&format!("/recipes/{}", id))
            .execute_empty()
            .await
    }

    async fn add_baking(&self, starter: StarterId, baking: &NewBaking) -> Result<Baking> {
        self.post(&format!("/starters/{}/bakings", starter))
            .json(baking)?
            .execute()
            .await
    }

    async fn update_baking(
        &self,
        starter: StarterId,
        baking: BakingId,
        patch: &BakingPatch,
    ) -> Result<()> {
        self.put(&format!("/starters/{}/bakings/{}", starter, baking))
            .json(patch)?
            .execute_empty()
            .await
    }

    async fn delete_baking(&self, starter: StarterId, baking: BakingId) -> Result<()> {
        self.delete(&format!("/starters/{}/bakings/{}", starter, baking))
            .execute_empty()
            .await
    }

    async fn list_bakings(&self, starter: StarterId) -> Result<Vec<Baking>> {
        self.get(&format!("/starters/{}/bakings", starter))
            .execute()
            .await
    }

    async fn list_all_bakings(&self) -> Result<Vec<Baking>> {
        self.get("/bakings").execute().await
    }
}
