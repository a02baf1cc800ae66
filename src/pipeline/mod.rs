//! Ingestion run: scraper → snapshot → warehouse.
//!
//! 1. Acquire anti-bot cookies, fetch the listing through the relay, extract rows.
//! 2. Write the local CSV snapshot.
//! 3. Replace the destination table with the new batch (an empty batch leaves it alone).
//!
//! A failed cookie acquisition or fetch ends the run before anything is written.

use crate::config::AppConfig;
use crate::loader::write_snapshot;
use crate::scraper::{ListingSource, SteamDbScraper};
use crate::storage::{PublishOutcome, Repository};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{error, info};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<PipelineStats> {
        let table = self.config.warehouse.table_ref()?;
        let db_path = self.config.warehouse.db_path()?;
        let repo = Repository::open(&db_path, table).context("Failed to open warehouse")?;
        repo.run_migrations()?;

        let scraper = SteamDbScraper::new(&self.config).context("Failed to build scraper")?;

        run_ingest(&scraper, &repo, &self.config.pipeline.snapshot_path).await
    }
}

/// Body of an ingestion run against any listing source.
pub async fn run_ingest(
    source: &dyn ListingSource,
    repo: &Repository,
    snapshot_path: &Path,
) -> Result<PipelineStats> {
    let run_id = repo.begin_ingest_run()?;

    let result = ingest_once(source, repo, snapshot_path).await;

    match &result {
        Ok(stats) => {
            repo.finish_ingest_run(run_id, stats.rows_published, None)?;
            info!(
                "=== Done: {} rows extracted | {} published | {} replaced ===",
                stats.rows_extracted, stats.rows_published, stats.rows_replaced
            );
        }
        Err(e) => {
            error!("Ingestion failed: {:#}", e);
            repo.finish_ingest_run(run_id, 0, Some(&format!("{:#}", e))).ok();
        }
    }
    result
}

async fn ingest_once(
    source: &dyn ListingSource,
    repo: &Repository,
    snapshot_path: &Path,
) -> Result<PipelineStats> {
    info!("=== Step 1: Scraping sales listing ===");
    let rows = source
        .fetch_listing_rows()
        .await
        .context("Sales listing scrape failed")?;

    info!("=== Step 2: Writing snapshot ===");
    write_snapshot(snapshot_path, &rows)?;

    info!("=== Step 3: Publishing to {} ===", repo.table());
    let outcome = repo.publish(&rows)?;

    let (published, replaced) = match outcome {
        PublishOutcome::Skipped => (0, 0),
        PublishOutcome::Replaced { deleted, inserted } => (inserted, deleted),
    };

    Ok(PipelineStats {
        rows_extracted: rows.len(),
        rows_published: published,
        rows_replaced: replaced,
        outcome,
    })
}

#[derive(Debug)]
pub struct PipelineStats {
    pub rows_extracted: usize,
    pub rows_published: usize,
    pub rows_replaced: usize,
    pub outcome: PublishOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableRef;
    use crate::errors::IngestError;
    use crate::models::SaleListingRow;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedSource(Vec<SaleListingRow>);

    #[async_trait]
    impl ListingSource for FixedSource {
        async fn fetch_listing_rows(&self) -> Result<Vec<SaleListingRow>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ListingSource for FailingSource {
        async fn fetch_listing_rows(&self) -> Result<Vec<SaleListingRow>> {
            Err(IngestError::Fetch { status: 403 }.into())
        }
    }

    fn row(id: &str) -> SaleListingRow {
        SaleListingRow {
            name: format!("Game {id}"),
            app_id: id.into(),
            ..Default::default()
        }
    }

    fn setup(name: &str) -> (Repository, PathBuf) {
        let repo = Repository::open_in_memory(TableRef::new("test", "sales", "steamdb_sales")).unwrap();
        repo.run_migrations().unwrap();
        let snapshot = std::env::temp_dir().join(format!(
            "steam_sales_pipeline_{}_{}.csv",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&snapshot);
        (repo, snapshot)
    }

    #[tokio::test]
    async fn full_run_snapshots_and_replaces() {
        let (repo, snapshot) = setup("full");
        repo.publish(&[row("old-1"), row("old-2"), row("old-3")]).unwrap();

        let stats = run_ingest(&FixedSource(vec![row("1"), row("2")]), &repo, &snapshot)
            .await
            .unwrap();

        assert_eq!(stats.rows_extracted, 2);
        assert_eq!(stats.outcome, PublishOutcome::Replaced { deleted: 3, inserted: 2 });
        assert_eq!(repo.row_count().unwrap(), 2);
        assert!(snapshot.exists());

        let runs = repo.recent_ingest_runs(1).unwrap();
        assert_eq!(runs[0].status, "success");
        assert_eq!(runs[0].rows_published, 2);
        std::fs::remove_file(snapshot).ok();
    }

    #[tokio::test]
    async fn empty_scrape_keeps_previous_table() {
        let (repo, snapshot) = setup("empty");
        repo.publish(&[row("1")]).unwrap();

        let stats = run_ingest(&FixedSource(vec![]), &repo, &snapshot).await.unwrap();

        assert_eq!(stats.outcome, PublishOutcome::Skipped);
        assert_eq!(repo.row_count().unwrap(), 1);
        std::fs::remove_file(snapshot).ok();
    }

    #[test]
    fn failed_fetch_writes_nothing() {
        let (repo, snapshot) = setup("failed");
        repo.publish(&[row("1")]).unwrap();

        let err = tokio_test::block_on(run_ingest(&FailingSource, &repo, &snapshot)).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Fetch { status: 403 })
        ));
        assert!(!snapshot.exists());
        assert_eq!(repo.row_count().unwrap(), 1);
        assert_eq!(repo.recent_ingest_runs(1).unwrap()[0].status, "error");
    }
}
