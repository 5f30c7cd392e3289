use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unknown carrier: {0}")]
    UnknownCarrier(String),

    #[error("Configuration error for {carrier}: {details}")]
    Configuration { carrier: String, details: String },

    #[error("Invalid period month '{0}': expected YYYY-MM")]
    InvalidPeriod(String),

    #[error("Aggregation fetch failed for carrier {carrier_id}, month {month}: {source}")]
    AggregationFetch {
        carrier_id: i64,
        month: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upload already in progress for carrier {carrier_id}, month {month}")]
    UploadInProgress { carrier_id: i64, month: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestError {
    pub fn configuration(carrier: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Configuration {
            carrier: carrier.into(),
            details: details.into(),
        }
    }
}

/// Failure reported by a [`crate::store::RecordStore`] or
/// [`crate::store::AgentDirectory`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A recoverable, per-row problem. Collected into the normalizer's error list
/// instead of aborting the sheet.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowParseError {
    #[error("Row {row}: could not parse agent from '{token}'")]
    MalformedAgent { row: usize, token: String },

    #[error("Row {row}: non-numeric value '{value}' in required column {column}")]
    NonNumericAmount {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Row {row}: detail row without an open agent header")]
    OrphanDetailRow { row: usize },

    #[error("Row {row}: current-period row without a preceding agent row")]
    OrphanCurrentPeriodRow { row: usize },
}

impl RowParseError {
    pub fn row(&self) -> usize {
        match self {
            Self::MalformedAgent { row, .. }
            | Self::NonNumericAmount { row, .. }
            | Self::OrphanDetailRow { row }
            | Self::OrphanCurrentPeriodRow { row } => *row,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
