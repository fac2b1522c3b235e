//! Relay access.
//!
//! [`RelayApi`] is the surface the client core needs from the relay;
//! [`HttpRelay`] implements it over HTTP with bearer-token auth. Tests
//! implement the trait in-process.

use async_trait::async_trait;
use parking_lot::Mutex;

use cl_proto::api::*;

use crate::error::ClientError;

#[async_trait]
pub trait RelayApi: Send + Sync {
    async fn fetch_public_key(&self, user_id: &str) -> Result<PublicKeyResponse, ClientError>;

    async fn initiate_exchange(&self, req: &InitiateRequest)
        -> Result<InitiateResponse, ClientError>;
    async fn respond_exchange(
        &self,
        req: &ExchangeResponseRequest,
    ) -> Result<ExchangeResponseAck, ClientError>;
    async fn confirm_exchange(&self, req: &ConfirmRequest) -> Result<ConfirmResponse, ClientError>;
    async fn pending_exchanges(&self, peer_id: &str)
        -> Result<PendingExchangesResponse, ClientError>;
    async fn exchange_responses(
        &self,
        peer_id: &str,
    ) -> Result<ExchangeResponsesResponse, ClientError>;

    async fn send_message(&self, req: &SendMessageRequest)
        -> Result<SendMessageResponse, ClientError>;
    async fn fetch_conversation(&self, peer_id: &str) -> Result<ConversationResponse, ClientError>;

    async fn upload_file(&self, req: &UploadFileRequest) -> Result<UploadFileResponse, ClientError>;
    async fn fetch_file(&self, file_id: &str) -> Result<StoredFile, ClientError>;
    async fn conversation_files(&self, peer_id: &str) -> Result<FileListResponse, ClientError>;
}

/// HTTP relay client.
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
}

impl HttpRelay {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("cipherlink-client/0.3")
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.lock().clone()
    }

    /// Register a new account; stores the returned token for later calls.
    pub async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        let auth: AuthResponse = self
            .post_json(&format!("{}/auth/register", self.base_url), req)
            .await?;
        *self.token.lock() = Some(auth.token.clone());
        Ok(auth)
    }

    /// Log in; stores the returned token for later calls.
    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse, ClientError> {
        let auth: AuthResponse = self
            .post_json(&format!("{}/auth/login", self.base_url), req)
            .await?;
        *self.token.lock() = Some(auth.token.clone());
        Ok(auth)
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ClientError>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let mut builder = self.client.post(url).json(body);
        if let Some(token) = self.bearer() {
            builder = builder.bearer_auth(token);
        }
        Self::read_response(builder.send().await?).await
    }

    async fn get_json<T>(&self, url: &str) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut builder = self.client.get(url);
        if let Some(token) = self.bearer() {
            builder = builder.bearer_auth(token);
        }
        Self::read_response(builder.send().await?).await
    }

    async fn read_response<T>(res: reqwest::Response) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }
        if status.is_server_error() {
            return Err(ClientError::Transport(format!("relay returned {status}")));
        }
        // 4xx carries a machine-readable error body.
        let body: ErrorResponse = res.json().await.unwrap_or(ErrorResponse {
            error: format!("http-{}", status.as_u16()),
            details: None,
        });
        Err(ClientError::Rejected(body.error))
    }
}

#[async_trait]
impl RelayApi for HttpRelay {
    async fn fetch_public_key(&self, user_id: &str) -> Result<PublicKeyResponse, ClientError> {
        self.get_json(&format!("{}/users/{user_id}/public-key", self.base_url))
            .await
            .map_err(|e| match e {
                ClientError::Rejected(code) if code == "not-found" => ClientError::NoPeerIdentity,
                other => other,
            })
    }

    async fn initiate_exchange(
        &self,
        req: &InitiateRequest,
    ) -> Result<InitiateResponse, ClientError> {
        self.post_json(&format!("{}/key-exchange/initiate", self.base_url), req)
            .await
    }

    async fn respond_exchange(
        &self,
        req: &ExchangeResponseRequest,
    ) -> Result<ExchangeResponseAck, ClientError> {
        self.post_json(&format!("{}/key-exchange/response", self.base_url), req)
            .await
    }

    async fn confirm_exchange(&self, req: &ConfirmRequest) -> Result<ConfirmResponse, ClientError> {
        self.post_json(&format!("{}/key-exchange/confirm", self.base_url), req)
            .await
    }

    async fn pending_exchanges(
        &self,
        peer_id: &str,
    ) -> Result<PendingExchangesResponse, ClientError> {
        self.get_json(&format!("{}/key-exchange/pending/{peer_id}", self.base_url))
            .await
    }

    async fn exchange_responses(
        &self,
        peer_id: &str,
    ) -> Result<ExchangeResponsesResponse, ClientError> {
        self.get_json(&format!("{}/key-exchange/responses/{peer_id}", self.base_url))
            .await
    }

    async fn send_message(
        &self,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ClientError> {
        self.post_json(&format!("{}/messages/send", self.base_url), req)
            .await
    }

    async fn fetch_conversation(&self, peer_id: &str) -> Result<ConversationResponse, ClientError> {
        self.get_json(&format!("{}/messages/conversation/{peer_id}", self.base_url))
            .await
    }

    async fn upload_file(&self, req: &UploadFileRequest) -> Result<UploadFileResponse, ClientError> {
        self.post_json(&format!("{}/files/upload", self.base_url), req)
            .await
    }

    async fn fetch_file(&self, file_id: &str) -> Result<StoredFile, ClientError> {
        self.get_json(&format!("{}/files/{file_id}", self.base_url))
            .await
    }

    async fn conversation_files(&self, peer_id: &str) -> Result<FileListResponse, ClientError> {
        self.get_json(&format!("{}/files/conversation/{peer_id}", self.base_url))
            .await
    }
}
