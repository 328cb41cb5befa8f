use thiserror::Error;

/// Main error type for the inventory server
#[derive(Error, Debug)]
pub enum OtInvError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Asset not found in the inventory
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Review flag not found
    #[error("Review flag not found: {0}")]
    FlagNotFound(String),

    /// Parse errors (sample data, enum values)
    #[error("Parse error: {0}")]
    Parse(String),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using OtInvError
pub type Result<T> = std::result::Result<T, OtInvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OtInvError::AssetNotFound("PLC-101".to_string());
        assert!(err.to_string().contains("Asset not found"));
        assert!(err.to_string().contains("PLC-101"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: OtInvError = rusqlite_err.into();
        assert!(matches!(err, OtInvError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OtInvError = io_err.into();
        assert!(matches!(err, OtInvError::Io(_)));
    }
}
