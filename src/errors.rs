use thiserror::Error;

/// Crate-wide error type for the dispatch engine's own failure modes.
///
/// Transport-level failures (a send/edit/delete call against Telegram)
/// have their own taxonomy in [`crate::transport::SendError`]; this type
/// covers everything above that layer — configuration, persistence,
/// and the engine's internal bookkeeping.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Store(String),

    #[error("source feed error: {0}")]
    SourceFeed(String),

    #[error("pair {0} not found")]
    PairNotFound(i64),

    #[error("bot index {0} out of range")]
    BotIndexOutOfRange(usize),

    #[error("queue is closed")]
    QueueClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
