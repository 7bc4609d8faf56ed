//! Login/logout lifecycle and the process-wide auth token

mod store;
mod types;

use log::{info, warn};
use reqwest::Client;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::models::User;

pub use store::*;
pub use types::*;

/// Owner of the auth token.
///
/// Only `login`, `register`, `restore`, `logout` and `invalidate` write the
/// token. Every write is published on a `watch` channel before the method
/// returns, so a client holding a receiver sees it on its next request.
pub struct SessionManager {
    /// The base URL of the API
    url: String,

    /// HTTP client used for the auth endpoints
    client: Client,

    state: RwLock<SessionState>,

    token: watch::Sender<Option<String>>,

    store: Arc<dyn TokenStore>,

    persist: bool,
}

impl SessionManager {
    /// Create a new, logged out session manager
    pub fn new(url: &str, client: Client, store: Arc<dyn TokenStore>, persist: bool) -> Self {
        let (token, _) = watch::channel(None);
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            state: RwLock::new(SessionState::LoggedOut),
            token,
            store,
            persist,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth{}", self.url, path)
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        validate_credentials(email, password)?;
        let url = self.get_auth_url("/login");
        let body = Credentials {
            email,
            password,
            name: None,
        };

        let response = Fetch::post(&self.client, &url)
            .json(&body)?
            .execute::<AuthResponse>()
            .await?;

        let session = Session::from(response);
        self.set_session(session.clone());
        info!("Logged in as {}", session.user.email);
        Ok(session)
    }

    /// Create an account and sign in with it
    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<Session> {
        validate_credentials(email, password)?;
        if name.trim().is_empty() {
            return Err(Error::validation("name must not be empty"));
        }
        let url = self.get_auth_url("/register");
        let body = Credentials {
            email,
            password,
            name: Some(name),
        };

        let response = Fetch::post(&self.client, &url)
            .json(&body)?
            .execute::<AuthResponse>()
            .await?;

        let session = Session::from(response);
        self.set_session(session.clone());
        info!("Registered and logged in as {}", session.user.email);
        Ok(session)
    }

    /// Reinstate a persisted session. The token is not checked here; the
    /// first remote call re-validates it.
    pub fn restore(&self) -> Result<bool> {
        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                self.store.clear()?;
                None
            }
        };

        match persisted {
            Some(session) => {
                info!("Restored session for {}", session.user.email);
                self.publish(SessionState::Authenticated(session));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sign out and forget the persisted session
    pub fn logout(&self) -> Result<()> {
        info!("Logging out");
        self.publish(SessionState::LoggedOut);
        self.store.clear()
    }

    /// Forced logout after the server rejected the token
    pub fn invalidate(&self, reason: &str) {
        if !self.is_authenticated() {
            return;
        }
        warn!("Session invalidated: {}", reason);
        self.publish(SessionState::LoggedOut);
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
    }

    /// Install a session obtained elsewhere
    pub fn set_session(&self, session: Session) {
        if self.persist {
            if let Err(e) = self.store.save(&session) {
                warn!("Failed to persist session: {}", e);
            }
        }
        self.publish(SessionState::Authenticated(session));
    }

    fn publish(&self, state: SessionState) {
        let token = match &state {
            SessionState::Authenticated(session) => Some(session.token.clone()),
            SessionState::LoggedOut => None,
        };
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        self.token.send_replace(token);
    }

    pub fn current_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Receiver that always holds the current token
    pub fn on_token_change(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            SessionState::Authenticated(session) => Some(session.user.clone()),
            SessionState::LoggedOut => None,
        }
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(Error::validation("a valid email is required"));
    }
    if password.is_empty() {
        return Err(Error::validation("password must not be empty"));
    }
    Ok(())
}
