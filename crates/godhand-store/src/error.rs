use godhand_core::HistoryStoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for HistoryStoreError {
    fn from(e: StoreError) -> Self {
        HistoryStoreError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_history_store_error() {
        let err: HistoryStoreError = StoreError::NotFound("export exp_1".into()).into();
        assert_eq!(err.0, "not found: export exp_1");
    }

    #[test]
    fn serde_errors_map_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        assert!(matches!(StoreError::from(json_err), StoreError::Serialization(_)));
    }
}
