use thiserror::Error;

/// Per-row failures raised while transforming records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("unparseable date: {0}")]
    UnparseableDate(String),

    // Only ever reported to a SkipObserver, never returned.
    #[error("non-numeric value for {field}: {raw:?}")]
    NonNumericValue { field: String, raw: String },
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("strict mode: {0} row(s) skipped")]
    StrictSkips(usize),
}

pub type Result<T> = std::result::Result<T, EtlError>;
