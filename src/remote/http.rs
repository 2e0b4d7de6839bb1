use super::RemoteSource;
use super::envelope::{into_list, parse_failure, parse_success};
use crate::core::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// `RemoteSource` over the REST API.
///
/// `GET {base}/{collection}` lists, `POST` creates, `PUT {base}/{collection}/{id}`
/// updates and `DELETE {base}/{collection}/{id}` deletes.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    /// Sends `request` and returns the raw body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "remote response");

        if !status.is_success() {
            return Err(parse_failure(status.as_u16(), &body));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn list(&self, collection: &str) -> Result<Vec<JsonValue>> {
        let body = self.send(self.client.get(self.endpoint(collection))).await?;
        into_list(parse_success(&body)?)
    }

    async fn create(&self, collection: &str, body: JsonValue) -> Result<JsonValue> {
        let body = self
            .send(self.client.post(self.endpoint(collection)).json(&body))
            .await?;
        parse_success(&body)
    }

    async fn update(&self, collection: &str, id: &str, body: JsonValue) -> Result<JsonValue> {
        let body = self
            .send(self.client.put(self.record_url(collection, id)).json(&body))
            .await?;
        parse_success(&body)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.send(self.client.delete(self.record_url(collection, id)))
            .await
            .map(|_| ())
    }

    fn endpoint(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }
}
