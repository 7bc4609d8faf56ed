//! Types for the session lifecycle

use serde::{Deserialize, Serialize};

use crate::models::User;

/// Session data: the bearer token and who it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    #[serde(rename = "auth_token")]
    pub token: String,

    /// The authenticated user
    #[serde(rename = "auth_user")]
    pub user: User,
}

/// Where the session currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    LoggedOut,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Response of the login and register endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

impl From<AuthResponse> for Session {
    fn from(response: AuthResponse) -> Self {
        Session {
            token: response.token,
            user: response.user,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}
