use crate::client::services::api_client::ApiClient;
use crate::common::{ClientError, ClientResult, User, UserUpdate};

#[derive(Debug, Clone)]
pub struct UsersService {
    api: ApiClient,
}

impl UsersService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// List all users (admin only on the backend).
    pub async fn list_all(&self) -> ClientResult<Vec<User>> {
        self.api.get("/users").await
    }

    pub async fn get(&self, user_id: &str) -> ClientResult<User> {
        self.api.get(&format!("/users/{}", user_id)).await
    }

    pub async fn update(&self, user_id: &str, update: &UserUpdate) -> ClientResult<User> {
        if update.username.is_none() && update.email.is_none() && update.role.is_none() {
            return Err(ClientError::validation("nothing to update"));
        }
        self.api.put(&format!("/users/{}", user_id), update).await
    }

    pub async fn delete(&self, user_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/users/{}", user_id)).await
    }

    /// Case-insensitive filter over username and email, as the admin table does.
    pub fn filter<'a>(users: &'a [User], query: &str) -> Vec<&'a User> {
        let q = query.trim().to_lowercase();
        users
            .iter()
            .filter(|u| q.is_empty() || u.username.to_lowercase().contains(&q) || u.email.to_lowercase().contains(&q))
            .collect()
    }
}
