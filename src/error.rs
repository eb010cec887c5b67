use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raw record on line {line}: {source}")]
    RawInput {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Duplicate cleaned key (geography={geography_code}, sex={sex}, race_or_color={race_or_color}) \
         from raw rows {first_row} and {duplicate_row}"
    )]
    DuplicateKey {
        geography_code: String,
        sex: String,
        race_or_color: String,
        first_row: u64,
        duplicate_row: u64,
    },

    #[error("Cleaned record for geography {geography_code} cannot resolve its {dimension} dimension row")]
    UnresolvedDimension {
        dimension: &'static str,
        geography_code: String,
    },

    #[error("Income total for geography {geography_code} is not finite")]
    NonFiniteTotal { geography_code: String },

    #[error("Referential integrity violated: {0}")]
    ReferentialIntegrity(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
