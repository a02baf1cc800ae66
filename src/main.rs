mod config;
mod dashboard;
mod errors;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::dashboard::ListingTable;
use crate::dashboard::render::{RenderOptions, render_page};
use crate::dashboard::server::{DashboardState, serve};
use crate::loader::read_snapshot;
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "steam-sales", about = "SteamDB sales scraper and dashboard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the sales listing, snapshot it and replace the warehouse table
    Ingest,

    /// Republish a CSV snapshot without scraping (default: configured snapshot path)
    PublishSnapshot {
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Serve the dashboard over HTTP
    Dashboard {
        /// Address to listen on (default: dashboard.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Render the dashboard once to an HTML file
    Report {
        #[arg(short, long, default_value = "steam_sales_report.html")]
        out: PathBuf,
    },

    /// Show destination table statistics and recent ingest runs
    Stats,

    /// Create the run log and destination table without loading data
    Migrate,
}

fn render_options(config: &AppConfig) -> RenderOptions {
    RenderOptions {
        currency: config.dashboard.currency.clone(),
        affordable_price: config.dashboard.affordable_price,
        ..RenderOptions::default()
    }
}

/// Targets are module paths of this binary, so the directive uses the
/// crate name the compiler sees, not the package name.
fn log_filter(verbose: u8) -> String {
    let krate = env!("CARGO_CRATE_NAME");
    match verbose {
        0 => format!("{krate}=info,warn"),
        1 => format!("{krate}=debug,info"),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(log_filter(cli.verbose)))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Ingest => {
            config.validate_ingest()?;
            let _t = utils::Timer::start("Sales ingest");
            let stats = Pipeline::new(config).run().await?;
            info!(
                "Done: {} rows extracted, {} published",
                stats.rows_extracted, stats.rows_published
            );
        }

        Command::PublishSnapshot { path } => {
            let table = config.warehouse.table_ref()?;
            let path = path.unwrap_or_else(|| config.pipeline.snapshot_path.clone());
            let _t = utils::Timer::start("Snapshot publish");

            let rows = read_snapshot(&path)?;
            let repo = Repository::open(&config.warehouse.db_path()?, table)?;
            repo.run_migrations()?;
            let outcome = repo.publish(&rows)?;
            info!("Publish of {:?}: {:?}", path, outcome);
        }

        Command::Dashboard { bind } => {
            if let Some(bind) = bind {
                config.dashboard.bind = bind;
            }
            config.validate_dashboard()?;

            let state = DashboardState::new(
                config.warehouse.db_path()?,
                config.warehouse.table_ref()?,
                render_options(&config),
            );
            serve(&config.dashboard.bind, state).await?;
        }

        Command::Report { out } => {
            let table = config.warehouse.table_ref()?;
            let repo = Repository::open_read_only(&config.warehouse.db_path()?, table)?;
            let listings = ListingTable::from_rows(&repo.load_listings()?);

            std::fs::write(&out, render_page(&listings, &render_options(&config)))
                .with_context(|| format!("Failed to write report {:?}", out))?;
            info!("Report for {} games written to {:?}", listings.len(), out);
        }

        Command::Stats => {
            let table = config.warehouse.table_ref()?;
            let db_path = config.warehouse.db_path()?;
            if !db_path.exists() {
                println!("No warehouse at {:?}. Run `steam-sales migrate` or `ingest` first.", db_path);
                return Ok(());
            }
            let repo = Repository::open_read_only(&db_path, table)?;
            let rows = repo.row_count()?;
            let runs = repo.recent_ingest_runs(5)?;

            println!("─────────────────────────────────");
            println!("  Steam Sales · Warehouse Stats");
            println!("─────────────────────────────────");
            println!("  Table    : {}", repo.table());
            println!("  Listings : {}", utils::fmt_count(rows));
            println!("  Recent runs:");
            if runs.is_empty() {
                println!("    none. Run `steam-sales ingest` first.");
            }
            for run in &runs {
                println!(
                    "    #{:<4} {}  {:<8} {:>6} rows{}",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.status,
                    utils::fmt_count(run.rows_published),
                    run.error_msg
                        .as_deref()
                        .map(|e| format!("  ({e})"))
                        .unwrap_or_default()
                );
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            let table = config.warehouse.table_ref()?;
            Repository::open(&config.warehouse.db_path()?, table)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_targets_this_crate() {
        let krate = module_path!().split("::").next().unwrap();
        assert_eq!(log_filter(0), format!("{krate}=info,warn"));
        assert_eq!(log_filter(1), format!("{krate}=debug,info"));
        assert_eq!(log_filter(3), "trace");
    }

    #[test]
    fn info_events_pass_the_default_filter() {
        use tracing::subscriber::with_default;
        use tracing_subscriber::fmt::MakeWriter;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Buf(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Buf {
            fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        impl<'a> MakeWriter<'a> for Buf {
            type Writer = Buf;
            fn make_writer(&'a self) -> Buf {
                self.clone()
            }
        }

        let buf = Buf::default();
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(buf.clone()).with_ansi(false))
            .with(EnvFilter::new(log_filter(0)));
        with_default(subscriber, || info!("listing status 200"));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("listing status 200"));
    }
}
