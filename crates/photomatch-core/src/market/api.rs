//! Marketplace API trait and request/response types.
//!
//! Defines the interface over the three upstream endpoints the core talks to:
//! token exchange, image search and item detail.

use crate::config::{resolve_env_var, CredentialsConfig};
use crate::error::{AuthError, DescriptionError, SearchError};
use crate::preprocess::EncodedImage;
use crate::types::Hit;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

/// Resolved client id/secret pair plus the fixed scope.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl ClientCredentials {
    /// Resolve credentials from config, expanding `${ENV_VAR}` references.
    pub fn from_config(config: &CredentialsConfig) -> Result<Self, AuthError> {
        let client_id = resolve_env_var(&config.client_id).ok_or(AuthError::MissingCredentials)?;
        let client_secret =
            resolve_env_var(&config.client_secret).ok_or(AuthError::MissingCredentials)?;
        Ok(Self {
            client_id,
            client_secret,
            scope: config.scope.clone(),
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds, if reported
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Item-detail response fields used for descriptions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub item_specifics: Vec<ItemSpecific>,
}

/// One name/values pair from an item's specifics list.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSpecific {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Vec<String>>,
}

impl ItemDetail {
    /// Short description when present and non-blank, otherwise the item
    /// specifics flattened as `"name: v1, v2; "` pairs.
    pub fn description_text(&self) -> String {
        if let Some(short) = self.short_description.as_deref() {
            if !short.trim().is_empty() {
                return short.to_string();
            }
        }

        self.item_specifics
            .iter()
            .filter_map(|spec| Some((spec.name.as_deref()?, spec.value.as_ref()?)))
            .map(|(name, values)| format!("{name}: {}; ", values.join(", ")))
            .collect()
    }
}

/// Trait that every marketplace backend implements.
///
/// Uses `async_trait` because the core holds the backend as
/// `Arc<dyn MarketplaceApi>` and shares it across spawned tasks.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Exchange client credentials for a bearer token.
    async fn exchange_token(&self, credentials: &ClientCredentials)
        -> Result<TokenGrant, AuthError>;

    /// Search listings visually similar to `image`, returning at most `limit` hits.
    async fn search_by_image(
        &self,
        token: &str,
        image: &EncodedImage,
        limit: usize,
    ) -> Result<Vec<Hit>, SearchError>;

    /// Fetch one item's details.
    async fn item_detail(&self, token: &str, item_id: &str)
        -> Result<ItemDetail, DescriptionError>;
}
