//! HTTP client for the armada surfaces.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Problem envelope returned by both services.
#[derive(Debug, Deserialize)]
struct ProblemDetails {
    #[serde(default)]
    code: String,
    #[serde(default)]
    detail: String,
}

/// Client bound to one service's base URL.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn decode_error(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        match response.json::<ProblemDetails>().await {
            Ok(problem) => anyhow!("{} ({}): {}", status, problem.code, problem.detail),
            Err(_) => anyhow!("request failed with {status}"),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await.context("sending request")?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        response.json().await.context("decoding response")
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("sending request")?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        response.json().await.context("decoding response")
    }

    /// POST with no response body expected.
    pub async fn post_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("sending request")?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        Ok(())
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .context("sending request")?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        response.json().await.context("decoding response")
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.delete(&url).send().await.context("sending request")?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        Ok(())
    }
}
