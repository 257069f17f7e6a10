//! Test doubles shared by the unit tests of the core modules.

use crate::error::{AuthError, DescriptionError, SearchError};
use crate::market::{ClientCredentials, ItemDetail, MarketplaceApi, TokenGrant};
use crate::preprocess::EncodedImage;
use crate::types::Hit;
use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

type TokenFn = Box<dyn Fn(u32) -> Result<TokenGrant, AuthError> + Send + Sync>;
type SearchFn = Box<dyn Fn(&EncodedImage) -> Result<Vec<Hit>, SearchError> + Send + Sync>;
type DetailFn = Box<dyn Fn(&str) -> Result<ItemDetail, DescriptionError> + Send + Sync>;

/// A configurable in-memory marketplace.
///
/// Each endpoint is driven by a closure; call counters and an in-flight gauge
/// for searches are exposed for assertions.
pub(crate) struct MockMarket {
    pub token_calls: AtomicU32,
    pub search_calls: AtomicU32,
    pub detail_calls: AtomicU32,
    /// Searches currently executing
    pub searches_in_flight: AtomicU32,
    /// Highest value `searches_in_flight` reached
    pub max_searches_in_flight: AtomicU32,
    token_fn: TokenFn,
    search_fn: SearchFn,
    detail_fn: DetailFn,
    token_delay: Option<Duration>,
    search_delay: Option<Duration>,
    detail_delay: Option<Duration>,
}

impl MockMarket {
    /// Tokens named `token-{n}` valid for two hours, empty searches, empty details.
    pub fn new() -> Self {
        Self {
            token_calls: AtomicU32::new(0),
            search_calls: AtomicU32::new(0),
            detail_calls: AtomicU32::new(0),
            searches_in_flight: AtomicU32::new(0),
            max_searches_in_flight: AtomicU32::new(0),
            token_fn: Box::new(|n| {
                Ok(TokenGrant {
                    access_token: format!("token-{n}"),
                    expires_in: Some(7200),
                })
            }),
            search_fn: Box::new(|_| Ok(vec![])),
            detail_fn: Box::new(|_| Ok(ItemDetail::default())),
            token_delay: None,
            search_delay: None,
            detail_delay: None,
        }
    }

    pub fn with_token(
        mut self,
        f: impl Fn(u32) -> Result<TokenGrant, AuthError> + Send + Sync + 'static,
    ) -> Self {
        self.token_fn = Box::new(f);
        self
    }

    pub fn with_search(
        mut self,
        f: impl Fn(&EncodedImage) -> Result<Vec<Hit>, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.search_fn = Box::new(f);
        self
    }

    pub fn with_detail(
        mut self,
        f: impl Fn(&str) -> Result<ItemDetail, DescriptionError> + Send + Sync + 'static,
    ) -> Self {
        self.detail_fn = Box::new(f);
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = Some(delay);
        self
    }
}

#[async_trait]
impl MarketplaceApi for MockMarket {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exchange_token(
        &self,
        _credentials: &ClientCredentials,
    ) -> Result<TokenGrant, AuthError> {
        let n = self.token_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.token_delay {
            tokio::time::sleep(delay).await;
        }
        (self.token_fn)(n)
    }

    async fn search_by_image(
        &self,
        _token: &str,
        image: &EncodedImage,
        limit: usize,
    ) -> Result<Vec<Hit>, SearchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.searches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_searches_in_flight
            .fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.search_fn)(image).map(|hits| hits.into_iter().take(limit).collect());
        self.searches_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn item_detail(
        &self,
        _token: &str,
        item_id: &str,
    ) -> Result<ItemDetail, DescriptionError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.detail_delay {
            tokio::time::sleep(delay).await;
        }
        (self.detail_fn)(item_id)
    }
}

/// A hit with a predictable title and price.
pub(crate) fn hit(item_id: &str) -> Hit {
    Hit {
        item_id: item_id.to_string(),
        title: format!("Listing {item_id}"),
        price: "9.99".to_string(),
        web_url: format!("https://www.ebay.com/itm/{item_id}"),
        image_url: String::new(),
    }
}

/// Write a solid PNG of the given width. Mocks key their responses on the
/// width of the uploaded image, so distinct widths identify distinct slots.
pub(crate) fn write_fixture(dir: &Path, width: u32) -> PathBuf {
    let path = dir.join(format!("photo_{width}.png"));
    RgbImage::from_pixel(width, 40, image::Rgb([200, 30, 30]))
        .save_with_format(&path, ImageFormat::Png)
        .expect("write fixture image");
    path
}

pub(crate) fn item_detail(short_description: &str) -> ItemDetail {
    ItemDetail {
        short_description: Some(short_description.to_string()),
        item_specifics: vec![],
    }
}
