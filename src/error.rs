use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Map file name has no 4-digit year prefix: {0}")]
    InvalidFileName(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("No code mappings could be loaded from any map file")]
    NoMaps,

    #[error("Fact source query failed: {0}")]
    FactSource(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CheckerError>;
