//! Domain types for starters and everything a starter owns

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type StarterId = i64;
pub type FeedingId = i64;
pub type NoteId = i64;
pub type RecipeId = i64;
pub type BakingId = i64;

/// A sourdough starter and everything it owns. The unit of refetch and of
/// reminder scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Starter {
    pub id: StarterId,
    pub name: String,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    #[serde(with = "timestamp::option", default)]
    pub last_fed: Option<DateTime<Utc>>,
    /// Feeding interval in hours
    #[serde(default)]
    pub feeding_schedule: i64,
    #[serde(default)]
    pub is_favorite: bool,
    /// Most recent first
    #[serde(default)]
    pub feeding_history: Vec<Feeding>,
    /// Most recent first
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub recipe: Option<Recipe>,
}

impl Starter {
    /// When the next feeding is due, or `None` when it cannot be known
    /// (never fed, or a non-positive interval).
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let last_fed = self.last_fed?;
        if self.feeding_schedule <= 0 {
            return None;
        }
        let interval = Duration::try_hours(self.feeding_schedule)?;
        last_fed.checked_add_signed(interval)
    }

    /// An unknown due time is never overdue.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.next_due().map_or(false, |due| now > due)
    }

    /// Human readable countdown: `"{h}h {m}m"`, `"Overdue!"` or `"Unknown"`
    pub fn time_until_next_feeding(&self, now: DateTime<Utc>) -> String {
        let Some(due) = self.next_due() else {
            return "Unknown".to_string();
        };
        let remaining = due - now;
        if remaining <= Duration::zero() {
            return "Overdue!".to_string();
        }
        format!(
            "{}h {}m",
            remaining.num_hours(),
            remaining.num_minutes() % 60
        )
    }

    /// Age in whole days, rounded up
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        let secs = (now - self.created).num_seconds().abs();
        (secs + 86_399) / 86_400
    }

    /// The fields a reminder is derived from
    pub(crate) fn reminder_key(&self) -> (Option<DateTime<Utc>>, i64) {
        (self.last_fed, self.feeding_schedule)
    }

    pub fn feeding(&self, id: FeedingId) -> Option<&Feeding> {
        self.feeding_history.iter().find(|f| f.id == id)
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }
}

/// A timestamped record of flour, water and temperature added to a starter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feeding {
    pub id: FeedingId,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub flour: f64,
    #[serde(default)]
    pub flour_type: String,
    pub water: f64,
    #[serde(default)]
    pub temp: f64,
    #[serde(default, alias = "notes")]
    pub note: Option<String>,
}

impl Feeding {
    /// Water to flour ratio as a rounded percentage; 0 without flour
    pub fn hydration_percent(&self) -> i64 {
        if self.flour <= 0.0 {
            return 0;
        }
        (self.water / self.flour * 100.0).round() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    #[serde(rename = "date", alias = "timestamp", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    #[serde(default)]
    pub ingredients: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub baking_history: Vec<Baking>,
}

/// A bake made with a starter, optionally following a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baking {
    pub id: BakingId,
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    pub starter_id: StarterId,
    #[serde(default)]
    pub starter_name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub result: String,
}

/// Filter a baking listing by starter (`None` keeps all) and by a
/// case-insensitive search over result and notes.
pub fn filter_bakings<'a>(
    bakings: &'a [Baking],
    starter: Option<StarterId>,
    query: &str,
) -> Vec<&'a Baking> {
    let query = query.trim().to_lowercase();
    bakings
        .iter()
        .filter(|b| starter.map_or(true, |id| b.starter_id == id))
        .filter(|b| {
            query.is_empty()
                || b.result.to_lowercase().contains(&query)
                || b.notes.to_lowercase().contains(&query)
        })
        .collect()
}

/// Authenticated user identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Timestamps arrive either as RFC 3339 or as a bare `YYYY-MM-DD` date.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
            }
        }
    }
}
