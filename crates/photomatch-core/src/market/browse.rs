//! eBay Browse API backend.
//!
//! Token exchange via the OAuth client-credentials grant, `search_by_image`
//! for visual search and `item/{id}` for listing details.

use super::api::{ClientCredentials, ItemDetail, MarketplaceApi, TokenGrant};
use crate::config::{LimitsConfig, MarketplaceConfig};
use crate::error::{AuthError, ConfigError, DescriptionError, MatchError, SearchError};
use crate::preprocess::EncodedImage;
use crate::types::Hit;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MARKETPLACE_HEADER: &str = "X-EBAY-C-MARKETPLACE-ID";

/// Browse API client sharing one connection pool across all requests.
pub struct BrowseClient {
    base_url: Url,
    marketplace_id: String,
    timeout_ms: u64,
    client: reqwest::Client,
}

impl BrowseClient {
    pub fn new(
        marketplace: &MarketplaceConfig,
        limits: &LimitsConfig,
    ) -> Result<Self, MatchError> {
        let base_url = Url::parse(&marketplace.base_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "marketplace.base_url is not a valid URL: {e}"
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(limits.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url,
            marketplace_id: marketplace.marketplace_id.clone(),
            timeout_ms: limits.request_timeout_ms,
            client,
        })
    }

    /// Build an endpoint URL from path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(segments);
        Some(url)
    }
}

// --- Request types ---

#[derive(Serialize)]
struct SearchByImageRequest {
    image: String,
}

// --- Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Option<Vec<ItemSummary>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    item_id: String,
    title: String,
    price: Option<Price>,
    item_web_url: Option<String>,
    image: Option<ImageRef>,
}

#[derive(Deserialize)]
struct Price {
    value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRef {
    image_url: Option<String>,
}

impl From<ItemSummary> for Hit {
    fn from(item: ItemSummary) -> Self {
        Hit {
            item_id: item.item_id,
            title: item.title,
            price: item.price.and_then(|p| p.value).unwrap_or_default(),
            web_url: item.item_web_url.unwrap_or_default(),
            image_url: item.image.and_then(|i| i.image_url).unwrap_or_default(),
        }
    }
}

/// Parse a search response body into at most `limit` hits.
///
/// A missing `itemSummaries` means zero hits. An item without `itemId` or
/// `title` makes the whole response malformed.
pub(crate) fn parse_search_response(body: &str, limit: usize) -> Result<Vec<Hit>, SearchError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(response
        .item_summaries
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .map(Hit::from)
        .collect())
}

#[async_trait]
impl MarketplaceApi for BrowseClient {
    fn name(&self) -> &str {
        "ebay-browse"
    }

    async fn exchange_token(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<TokenGrant, AuthError> {
        let url = self
            .endpoint(&["identity", "v1", "oauth2", "token"])
            .ok_or_else(|| AuthError::Transport("base URL cannot hold a path".to_string()))?;

        let resp = self
            .client
            .post(url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", credentials.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        resp.json::<TokenGrant>()
            .await
            .map_err(|e| AuthError::MalformedGrant(e.to_string()))
    }

    async fn search_by_image(
        &self,
        token: &str,
        image: &EncodedImage,
        limit: usize,
    ) -> Result<Vec<Hit>, SearchError> {
        let mut url = self
            .endpoint(&["buy", "browse", "v1", "item_summary", "search_by_image"])
            .ok_or_else(|| SearchError::Transport("base URL cannot hold a path".to_string()))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let body = SearchByImageRequest {
            image: image.to_base64(),
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(MARKETPLACE_HEADER, &self.marketplace_id)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    SearchError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        parse_search_response(&text, limit)
    }

    async fn item_detail(
        &self,
        token: &str,
        item_id: &str,
    ) -> Result<ItemDetail, DescriptionError> {
        let url = self
            .endpoint(&["buy", "browse", "v1", "item", item_id])
            .ok_or_else(|| DescriptionError::Transport("base URL cannot hold a path".to_string()))?;

        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(MARKETPLACE_HEADER, &self.marketplace_id)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DescriptionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DescriptionError::Http {
                status: status.as_u16(),
            });
        }

        resp.json::<ItemDetail>()
            .await
            .map_err(|e| DescriptionError::Malformed(e.to_string()))
    }
}
