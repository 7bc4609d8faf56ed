//! Request payloads for the remote data client

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{timestamp, Recipe, RecipeId};

/// Longest feeding interval accepted, in hours (one year)
pub const MAX_FEEDING_SCHEDULE: i64 = 24 * 365;

/// Fields of a starter to be created
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStarter {
    pub name: String,
    pub feeding_schedule: i64,
    #[serde(
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<DateTime<Utc>>,
    #[serde(
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_fed: Option<DateTime<Utc>>,
}

impl NewStarter {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_schedule(self.feeding_schedule)
    }
}

/// A single-field update of one starter. Each kind of edit is its own
/// variant so every caller states exactly what it changes.
#[derive(Debug, Clone, PartialEq)]
pub enum StarterIntent {
    Rename(String),
    Reschedule(i64),
    SetFavorite(bool),
    AttachRecipe(Recipe),
    DetachRecipe,
}

impl StarterIntent {
    pub fn validate(&self) -> Result<()> {
        match self {
            StarterIntent::Rename(name) => validate_name(name),
            StarterIntent::Reschedule(hours) => validate_schedule(*hours),
            StarterIntent::SetFavorite(_)
            | StarterIntent::AttachRecipe(_)
            | StarterIntent::DetachRecipe => Ok(()),
        }
    }

    /// Sparse JSON patch sent to the server
    pub fn to_patch(&self) -> Result<Value> {
        Ok(match self {
            StarterIntent::Rename(name) => json!({ "name": name.trim() }),
            StarterIntent::Reschedule(hours) => json!({ "feedingSchedule": hours }),
            StarterIntent::SetFavorite(favorite) => json!({ "isFavorite": favorite }),
            StarterIntent::AttachRecipe(recipe) => json!({ "recipe": serde_json::to_value(recipe)? }),
            StarterIntent::DetachRecipe => json!({ "recipe": Value::Null }),
        })
    }
}

/// Feeding input as typed by the user; missing fields take configured defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedingDraft {
    pub flour: Option<f64>,
    pub water: Option<f64>,
    pub flour_type: Option<String>,
    pub temp: Option<f64>,
    pub note: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A feeding ready to be sent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeeding {
    pub flour: f64,
    pub water: f64,
    pub flour_type: String,
    pub temp: f64,
    pub notes: String,
    #[serde(
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewFeeding {
    pub fn validate(&self) -> Result<()> {
        validate_mass("flour", self.flour)?;
        validate_mass("water", self.water)?;
        if !self.temp.is_finite() {
            return Err(Error::validation("temperature must be a number"));
        }
        if self.flour_type.trim().is_empty() {
            return Err(Error::validation("flour type must not be empty"));
        }
        Ok(())
    }
}

/// Partial edit of an existing feeding
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flour: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flour_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FeedingPatch {
    pub fn is_empty(&self) -> bool {
        self.flour.is_none()
            && self.water.is_none()
            && self.flour_type.is_none()
            && self.temp.is_none()
            && self.note.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::validation("nothing to update"));
        }
        if let Some(flour) = self.flour {
            validate_mass("flour", flour)?;
        }
        if let Some(water) = self.water {
            validate_mass("water", water)?;
        }
        if matches!(self.temp, Some(t) if !t.is_finite()) {
            return Err(Error::validation("temperature must be a number"));
        }
        Ok(())
    }
}

/// Name and text of a recipe, used for both create and update
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipeDraft {
    pub name: String,
    pub ingredients: String,
    pub instructions: String,
}

impl RecipeDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("recipe name must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBaking {
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    pub result: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<RecipeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BakingPatch {
    #[serde(
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BakingPatch {
    pub fn validate(&self) -> Result<()> {
        if self.date.is_none() && self.result.is_none() && self.notes.is_none() {
            return Err(Error::validation("nothing to update"));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("starter name must not be empty"));
    }
    Ok(())
}

fn validate_schedule(hours: i64) -> Result<()> {
    if hours <= 0 {
        return Err(Error::validation("feeding schedule must be a positive number of hours"));
    }
    if hours > MAX_FEEDING_SCHEDULE {
        return Err(Error::validation(format!(
            "feeding schedule must be at most {} hours",
            MAX_FEEDING_SCHEDULE
        )));
    }
    Ok(())
}

fn validate_mass(field: &str, grams: f64) -> Result<()> {
    if !grams.is_finite() || grams < 0.0 {
        return Err(Error::validation(format!(
            "{} must be a non-negative number of grams",
            field
        )));
    }
    Ok(())
}
