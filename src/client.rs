//! JSON-over-HTTP client for the oastrix API, used by the CLI.

use crate::api::{
    CreateTokenRequest, CreateTokenResponse, DeleteTokenResponse, ErrorResponse,
    GetInteractionsResponse, ListTokensResponse,
};
use crate::error::Error;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Client {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Client {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub async fn create_token(
        &self,
        label: Option<String>,
    ) -> Result<CreateTokenResponse, Error> {
        let response = self
            .http
            .post(format!("{}/v1/tokens", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CreateTokenRequest { label })
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn list_tokens(&self) -> Result<ListTokensResponse, Error> {
        let response = self
            .http
            .get(format!("{}/v1/tokens", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn get_interactions(&self, token: &str) -> Result<GetInteractionsResponse, Error> {
        let response = self
            .http
            .get(format!("{}/v1/tokens/{token}/interactions", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn delete_token(&self, token: &str) -> Result<DeleteTokenResponse, Error> {
        let response = self
            .http
            .delete(format!("{}/v1/tokens/{token}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) if !err.error.is_empty() => Err(Error::Api(err.error)),
            _ => Err(Error::Api(format!(
                "request failed with status {}",
                status.as_u16()
            ))),
        }
    }
}
