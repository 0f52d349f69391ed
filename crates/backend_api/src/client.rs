//! Storefront backend REST API client.

use async_trait::async_trait;
use codec::FeedEvent;
use common::error::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for every call. The backend answers collection
/// fetches in tens of milliseconds; anything slower than this is treated
/// as a failed tick.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A source of the full current event collection.
///
/// The poller is generic over this so tests can substitute a fake backend.
#[async_trait]
pub trait CollectionSource: Send + Sync + 'static {
    /// Fetch the full current event collection, in server order.
    async fn fetch_collection(&self) -> Result<Vec<FeedEvent>>;
}

/// Storefront backend REST API client.
#[derive(Debug, Clone)]
pub struct FeedApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    author: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendReactionRequest<'a> {
    author: &'a str,
    reaction_glyph: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderRequest<'a> {
    product_id: &'a str,
    quantity: u32,
}

impl FeedApiClient {
    /// Create a new client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(response)
    }

    /// Fetch the full current event collection.
    pub async fn fetch_events(&self) -> Result<Vec<FeedEvent>> {
        let url = self.url("/live/events");
        debug!("Fetching event collection from: {}", url);

        let response = Self::check(self.http.get(&url).send().await?).await?;
        let events: Vec<FeedEvent> = response.json().await?;
        Ok(events)
    }

    /// Post a chat message. Fire-and-forget: the message comes back to
    /// this client through the feed, not through this response.
    pub async fn post_message(&self, author: &str, body: &str) -> Result<()> {
        let url = self.url("/live/messages");
        let response = self
            .http
            .post(&url)
            .json(&SendMessageRequest { author, body })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Post a reaction to the broadcast.
    pub async fn post_reaction(&self, author: &str, reaction_glyph: &str) -> Result<()> {
        let url = self.url("/live/reactions");
        let response = self
            .http
            .post(&url)
            .json(&SendReactionRequest {
                author,
                reaction_glyph,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Place an order for a product shown in the broadcast.
    pub async fn post_order(&self, product_id: &str, quantity: u32) -> Result<()> {
        let url = self.url("/live/orders");
        let response = self
            .http
            .post(&url)
            .json(&PlaceOrderRequest {
                product_id,
                quantity,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CollectionSource for FeedApiClient {
    async fn fetch_collection(&self) -> Result<Vec<FeedEvent>> {
        self.fetch_events().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = FeedApiClient::new("https://shop.example.com/api").unwrap();
        assert_eq!(client.base_url, "https://shop.example.com/api");
    }

    #[test]
    fn test_url_joining_strips_trailing_slash() {
        let client = FeedApiClient::new("https://shop.example.com/api/").unwrap();
        assert_eq!(
            client.url("/live/events"),
            "https://shop.example.com/api/live/events"
        );
    }
}
