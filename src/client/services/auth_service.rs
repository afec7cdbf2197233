use log::{debug, info};
use reqwest::Method;

use crate::client::services::api_client::ApiClient;
use crate::client::utils::session_store::Session;
use crate::common::{AuthResponse, ClientError, ClientResult, LoginRequest, RegisterRequest, Role, User};
use crate::utils::logger::redact;

/// Login, registration and logout. Owns the only writes to the session store.
#[derive(Debug, Clone)]
pub struct AuthService {
    api: ApiClient,
}

impl AuthService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Session> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("username and password are required"));
        }
        let request = LoginRequest { username: username.trim().to_string(), password: password.to_string() };
        let builder = self.api.request(Method::POST, &self.api.auth_url("/auth/login"))?.json(&request);
        let auth: AuthResponse = self.api.send_json(builder).await?;
        self.establish(auth).await
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> ClientResult<Session> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("username, email and password are required"));
        }
        if !email.contains('@') {
            return Err(ClientError::validation("email address is not valid"));
        }
        let request = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let builder = self.api.request(Method::POST, &self.api.auth_url("/auth/register"))?.json(&request);
        let auth: AuthResponse = self.api.send_json(builder).await?;
        self.establish(auth).await
    }

    /// Stores the token, then resolves the full user record so the session
    /// carries the canonical user id.
    async fn establish(&self, auth: AuthResponse) -> ClientResult<Session> {
        debug!("[AUTH] Received token {}", redact(&auth.token));
        let role = auth.role.parse::<Role>().unwrap_or_default();
        let provisional = Session {
            token: auth.token.clone(),
            user_id: auth.user.id.clone(),
            username: auth.user.username.clone(),
            role,
        };
        self.api.session().set_session(provisional.clone())?;

        let session = match self.me().await {
            Ok(user) => Session {
                token: auth.token,
                user_id: user.user_id,
                username: user.username,
                role: user.role,
            },
            // older backends lack /users/me, the auth payload is enough
            Err(ClientError::Http { status: 404, .. }) => provisional,
            Err(e) => {
                self.api.session().discard();
                return Err(e);
            }
        };
        self.api.session().set_session(session.clone())?;
        info!("[AUTH] Logged in as {} ({})", session.username, session.role);
        Ok(session)
    }

    pub async fn me(&self) -> ClientResult<User> {
        self.api.get("/users/me").await
    }

    pub fn logout(&self) -> ClientResult<()> {
        if let Some(session) = self.api.session().get_session() {
            info!("[AUTH] Logging out {}", session.username);
        }
        self.api.session().clear_session()
    }

    pub fn current(&self) -> Option<Session> {
        self.api.session().get_session()
    }
}
