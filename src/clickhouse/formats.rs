//! Result formats supported for ClickHouse queries.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};

/// The closed set of output formats a query result can be requested in.
///
/// `Json` is the structured-object format: the tool layer reshapes rows into
/// column-name keyed objects. Every other variant passes the backend's own
/// serialization through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    Json,
    JsonCompact,
    Pretty,
    Csv,
    Tsv,
    Parquet,
    Arrow,
    Native,
    Null,
}

impl ResultFormat {
    /// The FORMAT clause keyword ClickHouse expects for this format.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::JsonCompact => "JSONCompact",
            Self::Pretty => "Pretty",
            Self::Csv => "CSV",
            Self::Tsv => "TSV",
            Self::Parquet => "Parquet",
            Self::Arrow => "Arrow",
            Self::Native => "Native",
            Self::Null => "Null",
        }
    }

    /// Parse a format name, case-insensitively. Returns `None` for
    /// unrecognized names so callers can apply their own fallback.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsoncompact" | "json_compact" => Some(Self::JsonCompact),
            "pretty" => Some(Self::Pretty),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "parquet" => Some(Self::Parquet),
            "arrow" => Some(Self::Arrow),
            "native" => Some(Self::Native),
            "null" => Some(Self::Null),
            _ => None,
        }
    }
}

impl Default for ResultFormat {
    fn default() -> Self {
        Self::Json
    }
}

impl std::fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.directive())
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| ServerError::invalid_input(format!("Unknown result format: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(ResultFormat::parse("JSON"), Some(ResultFormat::Json));
        assert_eq!(ResultFormat::parse("pretty"), Some(ResultFormat::Pretty));
        assert_eq!(
            ResultFormat::parse("JSONCompact"),
            Some(ResultFormat::JsonCompact)
        );
        assert_eq!(ResultFormat::parse("tsv"), Some(ResultFormat::Tsv));
        assert_eq!(ResultFormat::parse("bogus"), None);
    }

    #[test]
    fn test_directive_round_trip() {
        for format in [
            ResultFormat::Json,
            ResultFormat::JsonCompact,
            ResultFormat::Pretty,
            ResultFormat::Csv,
            ResultFormat::Tsv,
            ResultFormat::Parquet,
            ResultFormat::Arrow,
            ResultFormat::Native,
            ResultFormat::Null,
        ] {
            assert_eq!(ResultFormat::parse(format.directive()), Some(format));
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("nonsense".parse::<ResultFormat>().is_err());
        assert_eq!("csv".parse::<ResultFormat>().unwrap(), ResultFormat::Csv);
    }
}
