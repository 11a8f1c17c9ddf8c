// REST resource client: the store's contract with the chat server's HTTP API,
// plus a reqwest implementation of it.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::ApiError;
use crate::models::{
    Conversation, ConversationId, Message, NewMessage, OutgoingFile, UserId,
    UserSummary,
};

#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// One page of history, newest first. Page numbers start at 1.
    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
    ) -> Result<Vec<Message>, ApiError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> Result<Message, ApiError>;

    async fn upload_file(
        &self,
        conversation_id: ConversationId,
        file: &OutgoingFile,
    ) -> Result<Message, ApiError>;

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError>;

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError>;

    async fn create_private_chat(&self, user_id: UserId) -> Result<Conversation, ApiError>;
}

/// List endpoints answer either with a bare array or with a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Paged { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Paged { results } => results,
            Listing::Plain(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    users: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
struct ReadReceipt {
    #[serde(default)]
    status: Option<String>,
}

pub struct HttpResourceClient {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpResourceClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chatwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        HttpResourceClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Request failed with {}: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let request = self.http_client.get(self.url("/chat/rooms/"));
        let listing: Listing<Conversation> = self.execute(request).await?;
        Ok(listing.into_items())
    }

    async fn get_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
    ) -> Result<Vec<Message>, ApiError> {
        if page == 0 {
            return Err(ApiError::Invalid("page numbers start at 1".to_string()));
        }
        let request = self
            .http_client
            .get(self.url(&format!("/chat/rooms/{}/messages/", conversation_id)))
            .query(&[("page", page)]);
        let listing: Listing<Message> = self.execute(request).await?;
        Ok(listing.into_items())
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> Result<Message, ApiError> {
        let request = self
            .http_client
            .post(self.url(&format!("/chat/rooms/{}/messages/", conversation_id)))
            .json(message);
        self.execute(request).await
    }

    async fn upload_file(
        &self,
        conversation_id: ConversationId,
        file: &OutgoingFile,
    ) -> Result<Message, ApiError> {
        let part = multipart::Part::bytes(file.data.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = multipart::Form::new().part("file", part);

        debug!("Uploading {} ({} bytes)", file.name, file.size());
        let request = self
            .http_client
            .post(self.url(&format!("/chat/rooms/{}/upload/", conversation_id)))
            .multipart(form);
        self.execute(request).await
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        let request = self
            .http_client
            .post(self.url(&format!("/chat/rooms/{}/messages/read/", conversation_id)));
        let receipt: ReadReceipt = self.execute(request).await?;
        debug!(
            "Marked conversation {} read: {}",
            conversation_id,
            receipt.status.as_deref().unwrap_or("ok")
        );
        Ok(())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        let request = self
            .http_client
            .get(self.url("/chat/users/search/"))
            .query(&[("q", query)]);
        let response: SearchResponse = self.execute(request).await?;
        Ok(response.users)
    }

    async fn create_private_chat(&self, user_id: UserId) -> Result<Conversation, ApiError> {
        let request = self
            .http_client
            .post(self.url("/chat/rooms/private/"))
            .json(&json!({ "user_id": user_id }));
        self.execute(request).await
    }
}
