use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Listing page and plain HTTP settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Anti-bot cookie acquisition through a headless browser
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChallengeConfig {
    #[serde(default = "default_challenge_url")]
    pub url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_settle_min_ms")]
    pub settle_min_ms: u64,

    #[serde(default = "default_settle_max_ms")]
    pub settle_max_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_cookie_timeout_ms")]
    pub cookie_timeout_ms: u64,

    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,

    #[serde(default = "default_verification_selectors")]
    pub verification_selectors: Vec<String>,

    #[serde(default = "default_true")]
    pub headless: bool,
}

/// Third-party relay the listing request goes through
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// Destination table. DuckDB stands in for the warehouse: the project maps
/// to a database file, the dataset to a schema.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub dataset_id: Option<String>,

    #[serde(default)]
    pub table_id: Option<String>,
}

/// What to do with a listing row that has no usable app id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    #[default]
    Skip,
    Abort,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    #[serde(default)]
    pub on_invalid_row: InvalidRowPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_affordable_price")]
    pub affordable_price: f64,
}

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `"dataset"."table"` for use inside SQL.
    pub fn sql_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.dataset), quote_ident(&self.table))
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_listing_url() -> String {
    "https://steamdb.info/sales/".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_challenge_url() -> String {
    "https://steamdb.info/cloudflare".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_settle_min_ms() -> u64 {
    5_000
}
fn default_settle_max_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_cookie_timeout_ms() -> u64 {
    3_000
}
fn default_element_timeout_ms() -> u64 {
    5_000
}
fn default_verification_selectors() -> Vec<String> {
    vec![
        "input[type=checkbox]".to_string(),
        "iframe[src*='challenges.cloudflare.com']".to_string(),
        "#challenge-stage".to_string(),
    ]
}
fn default_relay_url() -> String {
    "https://api.scrape.do".to_string()
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("steam_sales_bq.csv")
}
fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_currency() -> String {
    "₪".to_string()
}
fn default_affordable_price() -> f64 {
    20.0
}
fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            url: default_challenge_url(),
            max_attempts: default_max_attempts(),
            settle_min_ms: default_settle_min_ms(),
            settle_max_ms: default_settle_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cookie_timeout_ms: default_cookie_timeout_ms(),
            element_timeout_ms: default_element_timeout_ms(),
            verification_selectors: default_verification_selectors(),
            headless: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            api_key: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            on_invalid_row: InvalidRowPolicy::default(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            currency: default_currency(),
            affordable_price: default_affordable_price(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            challenge: ChallengeConfig::default(),
            relay: RelayConfig::default(),
            warehouse: WarehouseConfig::default(),
            pipeline: PipelineConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from files, `STEAM_SALES__*` overrides and the flat
    /// deployment variables (`PROJECT_ID`, `DATASET_ID`, ...).
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("STEAM_SALES").separator("__"))
            .set_override_option(
                "warehouse.path",
                env_var("WAREHOUSE_PATH"),
            )?
            .set_override_option("warehouse.project_id", env_var("PROJECT_ID"))?
            .set_override_option("warehouse.dataset_id", env_var("DATASET_ID"))?
            .set_override_option("warehouse.table_id", env_var("TABLE_ID"))?
            .set_override_option("relay.api_key", env_var("SCRAPEDO_API_KEY"))?
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize()?;
        Ok(app_cfg)
    }

    /// Everything `ingest` needs, checked before the browser is launched.
    pub fn validate_ingest(&self) -> Result<(), ConfigError> {
        self.warehouse.table_ref()?;
        self.relay.api_key()?;
        let c = &self.challenge;
        if c.max_attempts == 0 {
            return Err(ConfigError::Invalid("challenge.max_attempts must be at least 1".into()));
        }
        if c.settle_min_ms > c.settle_max_ms {
            return Err(ConfigError::Invalid(format!(
                "challenge.settle_min_ms ({}) exceeds settle_max_ms ({})",
                c.settle_min_ms, c.settle_max_ms
            )));
        }
        if c.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("challenge.poll_interval_ms must be positive".into()));
        }
        url::Url::parse(&self.scraper.listing_url)
            .map_err(|e| ConfigError::Invalid(format!("scraper.listing_url: {e}")))?;
        url::Url::parse(&self.relay.url)
            .map_err(|e| ConfigError::Invalid(format!("relay.url: {e}")))?;
        Ok(())
    }

    pub fn validate_dashboard(&self) -> Result<(), ConfigError> {
        self.warehouse.table_ref()?;
        self.dashboard
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("dashboard.bind: {e}")))?;
        Ok(())
    }
}

impl WarehouseConfig {
    pub fn table_ref(&self) -> Result<TableRef, ConfigError> {
        Ok(TableRef::new(
            required(&self.project_id, "PROJECT_ID")?,
            required(&self.dataset_id, "DATASET_ID")?,
            required(&self.table_id, "TABLE_ID")?,
        ))
    }

    /// Database file: explicit `WAREHOUSE_PATH`, else `data/<project>.duckdb`.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(p) = &self.path {
            return Ok(p.clone());
        }
        let project = required(&self.project_id, "PROJECT_ID")?;
        Ok(PathBuf::from("data").join(format!("{project}.duckdb")))
    }
}

impl RelayConfig {
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        required(&self.api_key, "SCRAPEDO_API_KEY")
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingKey(key))
}
