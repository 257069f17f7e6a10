//! Shared bearer credential with expiry tracking and single-flight refresh.
//!
//! One token is live per process. Callers that find it fresh get it without
//! any network call; callers that arrive during a refresh join that refresh
//! and observe the same token or the same error.

use futures_util::FutureExt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CredentialsConfig;
use crate::error::AuthError;
use crate::flight::SingleFlight;
use crate::market::{ClientCredentials, MarketplaceApi};

/// A bearer token and the instant after which it must not be reused.
///
/// `expires_at` already has the refresh buffer subtracted.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Instant,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// True while `now` is before the buffered expiry.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type TokenSlot = Arc<Mutex<Option<Token>>>;

/// Acquires and caches the process-wide bearer credential.
pub struct CredentialBroker {
    api: Arc<dyn MarketplaceApi>,
    config: CredentialsConfig,
    cached: TokenSlot,
    refresh: SingleFlight<(), Result<Token, AuthError>>,
}

impl CredentialBroker {
    pub fn new(api: Arc<dyn MarketplaceApi>, config: CredentialsConfig) -> Self {
        Self {
            api,
            config,
            cached: Arc::new(Mutex::new(None)),
            refresh: SingleFlight::new(),
        }
    }

    /// Return the cached token if fresh, otherwise exchange client credentials.
    ///
    /// A failed exchange leaves any previous token in place and is not
    /// remembered; the next call starts a new exchange.
    pub async fn acquire(&self) -> Result<Token, AuthError> {
        if let Some(token) = fresh_token(&self.cached) {
            tracing::trace!("Reusing cached token");
            return Ok(token);
        }

        let api = self.api.clone();
        let config = self.config.clone();
        let cached = self.cached.clone();
        self.refresh
            .run((), move || {
                async move {
                    // A refresh that finished just before this one was started
                    if let Some(token) = fresh_token(&cached) {
                        return Ok(token);
                    }
                    let token = exchange(api.as_ref(), &config).await?;
                    *lock(&cached) = Some(token.clone());
                    Ok(token)
                }
                .boxed()
            })
            .await
    }

    /// Drop the cached token so the next `acquire` refreshes.
    pub fn invalidate(&self) {
        *lock(&self.cached) = None;
    }

    /// Currently cached token, fresh or not.
    pub fn cached(&self) -> Option<Token> {
        lock(&self.cached).clone()
    }
}

async fn exchange(api: &dyn MarketplaceApi, config: &CredentialsConfig) -> Result<Token, AuthError> {
    let credentials = ClientCredentials::from_config(config)?;
    tracing::debug!("Exchanging client credentials with {}", api.name());

    let requested_at = Instant::now();
    let grant = match api.exchange_token(&credentials).await {
        Ok(grant) => grant,
        Err(e) => {
            tracing::warn!("Token exchange failed: {e}");
            return Err(e);
        }
    };

    let lifetime = grant.expires_in.unwrap_or(config.default_expires_in_secs);
    if lifetime <= config.expiry_buffer_secs {
        tracing::warn!(
            "Token lifetime {lifetime}s is within the {}s refresh buffer; it will be refreshed on every use",
            config.expiry_buffer_secs
        );
    }
    let usable = Duration::from_secs(lifetime.saturating_sub(config.expiry_buffer_secs));
    tracing::debug!("Token acquired, usable for {usable:?}");
    Ok(Token::new(grant.access_token, requested_at + usable))
}

fn fresh_token(slot: &TokenSlot) -> Option<Token> {
    lock(slot)
        .as_ref()
        .filter(|token| token.is_fresh_at(Instant::now()))
        .cloned()
}

fn lock(slot: &TokenSlot) -> MutexGuard<'_, Option<Token>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}
