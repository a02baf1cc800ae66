use super::ListingTable;
use super::render::{RenderOptions, render_page};
use crate::config::TableRef;
use crate::storage::Repository;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Loads the listing table once per process; every request after the first
/// renders from memory.
pub struct DashboardState {
    db_path: PathBuf,
    table: TableRef,
    options: RenderOptions,
    cache: OnceCell<Arc<ListingTable>>,
}

impl DashboardState {
    pub fn new(db_path: PathBuf, table: TableRef, options: RenderOptions) -> Self {
        Self {
            db_path,
            table,
            options,
            cache: OnceCell::new(),
        }
    }

    pub async fn listings(&self) -> Result<Arc<ListingTable>> {
        self.cache
            .get_or_try_init(|| async {
                let path = self.db_path.clone();
                let table = self.table.clone();
                let rows = tokio::task::spawn_blocking(move || {
                    Repository::open_read_only(&path, table)?.load_listings()
                })
                .await
                .context("Listing load task panicked")??;

                info!("Loaded {} listings into the dashboard cache", rows.len());
                Ok(Arc::new(ListingTable::from_rows(&rows)))
            })
            .await
            .cloned()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub struct DashboardError(anyhow::Error);

impl From<anyhow::Error> for DashboardError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        error!("Dashboard error: {:#}", self.0);
        let body = Json(ErrorResponse {
            error: "INTERNAL_SERVER_ERROR".to_string(),
            message: format!("{:#}", self.0),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cached_rows: Option<usize>,
}

async fn index(State(state): State<Arc<DashboardState>>) -> Result<Html<String>, DashboardError> {
    let table = state.listings().await?;
    Ok(Html(render_page(&table, &state.options)))
}

async fn health(State(state): State<Arc<DashboardState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cached_rows: state.cache.get().map(|t| t.len()),
    })
}

pub fn create_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, state: DashboardState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Dashboard running on http://{}", bind);

    axum::serve(listener, create_router(Arc::new(state)))
        .await
        .context("Dashboard server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SaleListingRow;

    fn scratch_db(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("steam_sales_dash_{}_{}.duckdb", name, std::process::id()))
    }

    fn seed(path: &PathBuf, table: &TableRef, ids: &[&str]) {
        let _ = std::fs::remove_file(path);
        let repo = Repository::open(path, table.clone()).unwrap();
        repo.run_migrations().unwrap();
        let rows: Vec<SaleListingRow> = ids
            .iter()
            .map(|id| SaleListingRow {
                name: format!("Game {id}"),
                price: "₪10.00".into(),
                app_id: id.to_string(),
                ..Default::default()
            })
            .collect();
        repo.publish(&rows).unwrap();
    }

    #[tokio::test]
    async fn load_is_memoised_for_the_process() {
        let path = scratch_db("memo");
        let table = TableRef::new("test", "sales", "steamdb_sales");
        seed(&path, &table, &["1", "2"]);

        let state = DashboardState::new(path.clone(), table.clone(), RenderOptions::default());
        assert_eq!(state.listings().await.unwrap().len(), 2);

        // a later ingest does not reach this process's cached snapshot
        seed(&path, &table, &["3", "4", "5"]);
        assert_eq!(state.listings().await.unwrap().len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_warehouse_is_an_error_not_a_panic() {
        let state = DashboardState::new(
            scratch_db("missing-does-not-exist"),
            TableRef::new("test", "sales", "steamdb_sales"),
            RenderOptions::default(),
        );
        assert!(state.listings().await.is_err());
        assert!(state.cache.get().is_none());
    }
}
