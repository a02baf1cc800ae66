pub mod browser;
pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::{AppConfig, ChallengeConfig, InvalidRowPolicy};
use crate::models::SaleListingRow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use self::browser::acquire_session_cookies;
use self::http_client::RelayClient;
use self::parsers::extract_rows;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Where the ingestion run gets its rows from.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing_rows(&self) -> Result<Vec<SaleListingRow>>;
}

// ── steamdb.info scraper ──────────────────────────────────────────────────────

pub struct SteamDbScraper {
    client: RelayClient,
    challenge: ChallengeConfig,
    listing_url: String,
    policy: InvalidRowPolicy,
}

impl SteamDbScraper {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            client: RelayClient::new(&config.scraper, &config.relay)?,
            challenge: config.challenge.clone(),
            listing_url: config.scraper.listing_url.clone(),
            policy: config.pipeline.on_invalid_row,
        })
    }
}

#[async_trait]
impl ListingSource for SteamDbScraper {
    async fn fetch_listing_rows(&self) -> Result<Vec<SaleListingRow>> {
        let cookies = acquire_session_cookies(&self.challenge).await?;

        let html = self
            .client
            .fetch_listing_html(&self.listing_url, &cookies)
            .await
            .context("Failed to fetch sales listing")?;

        let rows = extract_rows(&html, self.policy)?;
        info!("Extracted {} listing rows", rows.len());
        Ok(rows)
    }
}
