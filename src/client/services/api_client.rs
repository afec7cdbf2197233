use log::{debug, warn};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::config::ClientConfig;
use crate::client::utils::session_store::SessionStore;
use crate::common::{ClientError, ClientResult};

/// Thin REST wrapper shared by every service. Attaches the bearer token of the
/// current session to each request and maps failures to `ClientError`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_base: String,
    auth_base: String,
    session: SessionStore,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: SessionStore) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            auth_base: config.auth_base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}{}", self.auth_base, path)
    }

    /// Builds a request with the bearer token attached. An expired token logs
    /// the user out before anything is sent.
    pub fn request(&self, method: Method, url: &str) -> ClientResult<RequestBuilder> {
        if self.session.expire_if_needed() {
            return Err(ClientError::Unauthorized);
        }
        debug!("[API] {} {}", method, url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn check(&self, response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("[API] Backend rejected the session token, logging out");
            self.session.discard();
            return Err(ClientError::Unauthorized);
        }
        let text = response.text().await.unwrap_or_default();
        let message = if text.trim().is_empty() { "Something went wrong".to_string() } else { text };
        Err(ClientError::Http { status: status.as_u16(), message })
    }

    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = self.check(builder.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// For endpoints whose response body is irrelevant or empty.
    pub async fn send_empty(&self, builder: RequestBuilder) -> ClientResult<()> {
        self.check(builder.send().await?).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let builder = self.request(Method::GET, &self.api_url(path))?;
        self.send_json(builder).await
    }

    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> ClientResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let builder = self.request(Method::GET, &self.api_url(path))?.query(query);
        self.send_json(builder).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::POST, &self.api_url(path))?.json(body);
        self.send_json(builder).await
    }

    pub async fn post_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<()> {
        let builder = self.request(Method::POST, &self.api_url(path))?.json(body);
        self.send_empty(builder).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::PUT, &self.api_url(path))?.json(body);
        self.send_json(builder).await
    }

    pub async fn put_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<()> {
        let builder = self.request(Method::PUT, &self.api_url(path))?.json(body);
        self.send_empty(builder).await
    }

    pub async fn patch_empty(&self, path: &str) -> ClientResult<()> {
        let builder = self.request(Method::PATCH, &self.api_url(path))?;
        self.send_empty(builder).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<()> {
        let builder = self.request(Method::DELETE, &self.api_url(path))?;
        self.send_empty(builder).await
    }
}
