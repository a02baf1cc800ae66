use thiserror::Error;

/// Configuration problems, raised at startup before any side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key `{0}`")]
    MissingKey(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Failures that end an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("anti-bot bypass failed: clearance cookies not obtained after {attempts} attempts")]
    AntiBotBypass { attempts: u32 },

    #[error("listing fetch failed with HTTP status {status}")]
    Fetch { status: u16 },

    #[error("listing request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("row {index} could not be extracted: {source}")]
    RowExtraction {
        index: usize,
        #[source]
        source: RowError,
    },
}

/// Why a single `tr.app` row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("no detail link")]
    MissingLink,

    #[error("no app id in detail link {0:?}")]
    MissingAppId(String),
}
