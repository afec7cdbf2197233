use async_trait::async_trait;

use crate::client::services::api_client::ApiClient;
use crate::common::{
    ChatMessage, ChecklistItem, ClientError, ClientResult, CreatePollRequest, CreateTripGroupPayload, Poll,
    TripGroup, UpdatePollRequest, UserVote,
};

/// The slice of the backend a mounted group view talks to.
#[async_trait]
pub trait GroupBackend: Send + Sync {
    async fn fetch_group(&self, group_id: &str) -> ClientResult<TripGroup>;

    async fn fetch_polls(&self, group_id: &str) -> ClientResult<Vec<Poll>>;
    async fn create_poll(&self, group_id: &str, request: &CreatePollRequest) -> ClientResult<()>;
    async fn update_poll(&self, group_id: &str, poll_id: &str, request: &UpdatePollRequest) -> ClientResult<()>;
    async fn delete_poll(&self, group_id: &str, poll_id: &str) -> ClientResult<()>;
    async fn vote(&self, group_id: &str, poll_id: &str, option_id: &str, user_id: &str) -> ClientResult<()>;
    async fn user_votes(&self, user_id: &str) -> ClientResult<Vec<UserVote>>;

    async fn fetch_checklist(&self, group_id: &str) -> ClientResult<Vec<ChecklistItem>>;
    async fn add_checklist_item(&self, group_id: &str, item: &ChecklistItem) -> ClientResult<ChecklistItem>;
    async fn update_checklist_item(&self, group_id: &str, item_id: i64, item: &ChecklistItem) -> ClientResult<ChecklistItem>;
    async fn toggle_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()>;
    async fn delete_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()>;

    /// Page 0 is the most recent page; messages within a page are oldest first.
    async fn chat_history(&self, group_id: &str, page: u32, size: usize) -> ClientResult<Vec<ChatMessage>>;
}

/// REST implementation of the trip-group endpoints.
#[derive(Debug, Clone)]
pub struct GroupsService {
    api: ApiClient,
}

impl GroupsService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list_all(&self) -> ClientResult<Vec<TripGroup>> {
        self.api.get("/trip-groups").await
    }

    pub async fn list_for_user(&self, user_id: &str) -> ClientResult<Vec<TripGroup>> {
        self.api.get(&format!("/trip-groups/user/{}", user_id)).await
    }

    pub async fn create(&self, owner_id: &str, payload: &CreateTripGroupPayload) -> ClientResult<TripGroup> {
        if payload.trip_name.trim().is_empty() {
            return Err(ClientError::validation("trip name is required"));
        }
        if !payload.trip_start_date.is_empty()
            && !payload.trip_end_date.is_empty()
            && payload.trip_end_date < payload.trip_start_date
        {
            return Err(ClientError::validation("trip cannot end before it starts"));
        }
        let builder = self
            .api
            .request(reqwest::Method::POST, &self.api.api_url("/trip-groups"))?
            .query(&[("userId", owner_id)])
            .json(payload);
        self.api.send_json(builder).await
    }

    pub async fn update(&self, group: &TripGroup) -> ClientResult<TripGroup> {
        if group.trip_name.trim().is_empty() {
            return Err(ClientError::validation("trip name is required"));
        }
        self.api.put(&format!("/trip-groups/{}", group.trip_group_id), group).await
    }

    pub async fn delete(&self, group_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/trip-groups/{}", group_id)).await
    }

    pub async fn add_member(&self, group_id: &str, user_id: &str) -> ClientResult<()> {
        if user_id.trim().is_empty() {
            return Err(ClientError::validation("Please select a user"));
        }
        let builder = self
            .api
            .request(reqwest::Method::POST, &self.api.api_url(&format!("/trip-groups/{}/members", group_id)))?
            .query(&[("userId", user_id)]);
        self.api.send_empty(builder).await
    }
}

#[async_trait]
impl GroupBackend for GroupsService {
    async fn fetch_group(&self, group_id: &str) -> ClientResult<TripGroup> {
        self.api.get(&format!("/trip-groups/{}", group_id)).await
    }

    async fn fetch_polls(&self, group_id: &str) -> ClientResult<Vec<Poll>> {
        self.api.get(&format!("/trip-groups/{}/polls", group_id)).await
    }

    async fn create_poll(&self, group_id: &str, request: &CreatePollRequest) -> ClientResult<()> {
        self.api.post_empty(&format!("/trip-groups/{}/polls", group_id), request).await
    }

    async fn update_poll(&self, group_id: &str, poll_id: &str, request: &UpdatePollRequest) -> ClientResult<()> {
        self.api.put_empty(&format!("/trip-groups/{}/polls/{}", group_id, poll_id), request).await
    }

    async fn delete_poll(&self, group_id: &str, poll_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/trip-groups/{}/polls/{}", group_id, poll_id)).await
    }

    async fn vote(&self, group_id: &str, poll_id: &str, option_id: &str, user_id: &str) -> ClientResult<()> {
        let path = format!("/trip-groups/{}/polls/{}/vote/{}", group_id, poll_id, option_id);
        let builder = self
            .api
            .request(reqwest::Method::POST, &self.api.api_url(&path))?
            .query(&[("userId", user_id)]);
        self.api.send_empty(builder).await
    }

    async fn user_votes(&self, user_id: &str) -> ClientResult<Vec<UserVote>> {
        self.api.get(&format!("/user-vote/{}/votes", user_id)).await
    }

    async fn fetch_checklist(&self, group_id: &str) -> ClientResult<Vec<ChecklistItem>> {
        self.api.get(&format!("/trip-groups/{}/checklist", group_id)).await
    }

    async fn add_checklist_item(&self, group_id: &str, item: &ChecklistItem) -> ClientResult<ChecklistItem> {
        self.api.post(&format!("/trip-groups/{}/checklist", group_id), item).await
    }

    async fn update_checklist_item(&self, group_id: &str, item_id: i64, item: &ChecklistItem) -> ClientResult<ChecklistItem> {
        self.api.put(&format!("/trip-groups/{}/checklist/{}", group_id, item_id), item).await
    }

    async fn toggle_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()> {
        self.api.patch_empty(&format!("/trip-groups/{}/checklist/toggle/{}", group_id, item_id)).await
    }

    async fn delete_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()> {
        self.api.delete(&format!("/trip-groups/{}/checklist/{}", group_id, item_id)).await
    }

    async fn chat_history(&self, group_id: &str, page: u32, size: usize) -> ClientResult<Vec<ChatMessage>> {
        self.api
            .get_query(
                &format!("/trip-groups/{}/messages", group_id),
                &[("page", page.to_string()), ("size", size.to_string())],
            )
            .await
    }
}
