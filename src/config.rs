use crate::error::{IngestError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Agent name written for an upload that held no data rows. Such rows are
/// never aggregated.
pub const DEFAULT_PLACEHOLDER_AGENT_NAME: &str = "No Data - Empty File";

fn default_batch_size() -> usize {
    1000
}

fn default_placeholder_agent_name() -> String {
    DEFAULT_PLACEHOLDER_AGENT_NAME.to_string()
}

fn default_header_probe_rows() -> usize {
    15
}

/// Runtime switches for normalization and aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    #[schemars(description = "Rows fetched per store call during aggregation.")]
    pub batch_size: usize,

    #[serde(default)]
    #[schemars(
        description = "Reject FALLBACK and AMBIGUOUS mapping selections instead of proceeding with a warning."
    )]
    pub strict_selection: bool,

    #[serde(default)]
    #[schemars(
        description = "Fail a non-January cumulative aggregation that finds no prior months instead of keeping the YTD figure."
    )]
    pub strict_cumulative: bool,

    #[serde(default = "default_placeholder_agent_name")]
    pub placeholder_agent_name: String,

    #[serde(default = "default_header_probe_rows")]
    #[schemars(description = "Leading rows scanned for signature columns when detecting a sheet's layout.")]
    pub header_probe_rows: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            strict_selection: false,
            strict_cumulative: false,
            placeholder_agent_name: default_placeholder_agent_name(),
            header_probe_rows: default_header_probe_rows(),
        }
    }
}

impl IngestConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::configuration(
                "ingest",
                "batch_size must be at least 1",
            ));
        }
        if self.header_probe_rows == 0 {
            return Err(IngestError::configuration(
                "ingest",
                "header_probe_rows must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(IngestConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::generate_json_schema())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = IngestConfig::from_json_str("{}").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.placeholder_agent_name, "No Data - Empty File");
        assert!(!config.strict_selection);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = IngestConfig::from_json_str(r#"{"batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, IngestError::Configuration { .. }));
    }

    #[test]
    fn test_schema_mentions_switches() {
        let schema = IngestConfig::schema_as_json().unwrap();
        assert!(schema.contains("strict_cumulative"));
        assert!(schema.contains("batch_size"));
    }
}
