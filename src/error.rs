use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid symbol '{0}': expected 1-20 alphanumeric characters")]
    InvalidSymbol(String),

    #[error("unknown market '{0}': expected 'binance_spot' or 'binance_futures'")]
    UnknownMarket(String),

    #[error("invalid tick size {0}: must be a finite positive number")]
    InvalidTickSize(f64),

    #[error("unsupported interval '{0}': expected one of 1m/3m/5m/15m/30m/1h/4h/1d/1w")]
    UnsupportedInterval(String),

    #[error("store error: {0}")]
    Store(#[from] duckdb::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Archive(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
