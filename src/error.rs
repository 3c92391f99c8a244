//! Error types for vgg-blstm-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid encoder configuration.
    #[error("config: {0}")]
    Config(String),

    /// Unrecognized recurrent-cell selector.
    #[error(
        "unknown lstm_impl {name:?}: expected one of \
         \"basic\", \"peephole\", \"block\", \"fused\", \"cudnn\""
    )]
    UnknownCell { name: String },

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
