use thiserror::Error;

/// Error kinds surfaced by the store, the price feed, and the analyzers.
///
/// "Not found" and "already tracked" are ordinary outcomes callers branch
/// on, kept separate from transport and database failures so the HTTP layer
/// can map each to the right status.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("symbol {0} is not tracked")]
    NotFound(String),

    #[error("symbol {0} is already tracked")]
    AlreadyTracked(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("price feed request failed: {0}")]
    Feed(#[from] reqwest::Error),

    #[error("price feed returned unusable data: {0}")]
    FeedData(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
