use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ScanError {
    #[error("invalid item identity: {0:?}")]
    InvalidIdentity(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("item API request failed: {0}")]
    ApiHttp(String),

    #[error("item API returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("item API returned an undecodable body: {0}")]
    ApiDecode(String),

    #[error("incomplete data for item {0}: response lacks item or locale section")]
    IncompleteRecord(String),

    #[error("failed to read source file {path}: {message}")]
    SourceRead { path: PathBuf, message: String },

    #[error("failed to parse source file {path}: {message}")]
    SourceParse { path: PathBuf, message: String },

    #[error("cache serialization failed: {0}")]
    Serialize(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("a scan is already running against this cache")]
    ScanActive,

    #[error("no scan is running")]
    NoActiveScan,

    #[error("scan worker failed: {0}")]
    Worker(String),
}

impl ScanError {
    /// Network-level failures that a later attempt may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::ApiHttp(_) | ScanError::ApiStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ScanError::ApiHttp("timeout".to_string()).is_transient());
        assert!(
            ScanError::ApiStatus {
                status: 503,
                message: "busy".to_string()
            }
            .is_transient()
        );
        assert!(!ScanError::ApiDecode("eof".to_string()).is_transient());
        assert!(!ScanError::IncompleteRecord("abc".to_string()).is_transient());
    }
}
