use godhand_core::{CompileError, HistoryStoreError, SessionId};

/// Errors reported to the caller of a [`crate::SessionManager`] operation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is busy")]
    SessionBusy(SessionId),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("nothing to confirm in session {0}")]
    NothingToConfirm(SessionId),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("store error: {0}")]
    Store(#[from] HistoryStoreError),

    #[error("no history store configured")]
    StoreUnavailable,
}

impl SessionError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionBusy(_) => "session_busy",
            Self::NotFound(_) => "not_found",
            Self::NothingToConfirm(_) => "nothing_to_confirm",
            Self::Compile(_) => "compile_error",
            Self::Store(_) => "store_error",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_errors_convert() {
        let err: SessionError = CompileError::EmptyInstruction.into();
        assert_eq!(err.error_kind(), "compile_error");
        assert_eq!(err.to_string(), "compile error: empty instruction");
    }

    #[test]
    fn busy_names_the_session() {
        let id = SessionId::from_raw("sess_x");
        assert_eq!(SessionError::SessionBusy(id).to_string(), "session sess_x is busy");
    }
}
