//! Configuration options for the Bread Lab client

use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Environment variable holding the API base URL
pub const API_URL_ENV: &str = "BREAD_LAB_API_URL";

/// Location of the Bread Lab REST API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub url: Url,
}

impl ApiConfig {
    /// Creates a new configuration, validating the URL.
    pub fn new(url_str: &str) -> Result<Self> {
        let url = Url::parse(url_str)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        Ok(Self { url })
    }

    /// Attempts to create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let url_str = std::env::var(API_URL_ENV)
            .map_err(|_| Error::config(format!("{} environment variable not found", API_URL_ENV)))?;
        Self::new(&url_str)
    }

    /// Base URL without a trailing slash, ready for path concatenation
    pub fn base(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

/// Configuration options for the Bread Lab client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Whether the session survives a process restart
    pub persist_session: bool,

    /// Where the persisted session is written
    pub session_path: Option<PathBuf>,

    /// Feeding interval in hours given to new starters
    pub default_feeding_schedule: i64,

    /// Flour type used when a feeding does not name one
    pub default_flour_type: String,

    /// Flour mass in grams used when a feeding does not give one
    pub default_flour_grams: f64,

    /// Water mass in grams used when a feeding does not give one
    pub default_water_grams: f64,

    /// Temperature used when a feeding does not give one
    pub default_temperature: f64,

    /// Whether `start` asks for notification permission when undetermined
    pub auto_request_permission: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            persist_session: true,
            session_path: None,
            default_feeding_schedule: 24,
            default_flour_type: "AP".to_string(),
            default_flour_grams: 100.0,
            default_water_grams: 100.0,
            default_temperature: 75.0,
            auto_request_permission: true,
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the file the session is persisted to
    pub fn with_session_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.session_path = Some(path.into());
        self
    }

    /// File the session is written to, or `None` when it only lives in
    /// memory. Persisting without a `session_path` also stays in memory.
    pub fn session_file(&self) -> Option<&Path> {
        match (&self.session_path, self.persist_session) {
            (Some(path), true) => Some(path),
            _ => None,
        }
    }

    /// Set the feeding interval for new starters
    pub fn with_default_feeding_schedule(mut self, hours: i64) -> Self {
        self.default_feeding_schedule = hours;
        self
    }

    /// Set the default flour type
    pub fn with_default_flour_type(mut self, value: &str) -> Self {
        self.default_flour_type = value.to_string();
        self
    }

    /// Set whether notification permission is requested on start
    pub fn with_auto_request_permission(mut self, value: bool) -> Self {
        self.auto_request_permission = value;
        self
    }
}
