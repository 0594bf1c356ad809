use thiserror::Error;

/// Why an instruction could not be turned into actions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("empty instruction")]
    EmptyInstruction,

    #[error("invalid repeat count: {0}")]
    InvalidRepeatCount(String),

    #[error("could not understand: {0}")]
    Unresolved(String),

    #[error("intent resolver failed: {0}")]
    Resolver(String),
}

impl CompileError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EmptyInstruction => "empty_instruction",
            Self::InvalidRepeatCount(_) => "invalid_repeat_count",
            Self::Unresolved(_) => "unresolved",
            Self::Resolver(_) => "resolver",
        }
    }
}

/// Failure reported by an action backend.
///
/// The backend decides whether the failure is transient (window not yet
/// focused, element not yet rendered) and therefore worth retrying.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub transient: bool,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.transient
    }

    /// Classify a raw driver message. Lookup, timeout, network and state
    /// errors are transient; permission and crash errors are not.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let permanent = ["permission", "denied", "拒绝", "权限", "crash", "崩溃", "invalid param", "malformed"];
        let transient = [
            "not found", "找不到", "未找到", "element", "timeout", "timed out", "超时", "network",
            "connection", "网络", "连接", "not focused", "not ready", "state", "状态",
        ];
        if permanent.iter().any(|p| lower.contains(p)) {
            Self::permanent(message)
        } else if transient.iter().any(|t| lower.contains(t)) {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

/// Failure persisting a session snapshot.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("history store error: {0}")]
pub struct HistoryStoreError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_messages_are_human_readable() {
        assert_eq!(CompileError::EmptyInstruction.to_string(), "empty instruction");
        assert_eq!(
            CompileError::InvalidRepeatCount("0".into()).to_string(),
            "invalid repeat count: 0"
        );
        assert!(CompileError::Unresolved("跳舞".into()).to_string().contains("跳舞"));
    }

    #[test]
    fn compile_error_kinds() {
        assert_eq!(CompileError::EmptyInstruction.error_kind(), "empty_instruction");
        assert_eq!(CompileError::Resolver("x".into()).error_kind(), "resolver");
    }

    #[test]
    fn classify_transient_messages() {
        assert!(BackendError::classify("Element not found: OK button").is_retryable());
        assert!(BackendError::classify("操作超时").is_retryable());
        assert!(BackendError::classify("target window not focused").is_retryable());
    }

    #[test]
    fn classify_permanent_messages() {
        assert!(!BackendError::classify("Permission denied").is_retryable());
        assert!(!BackendError::classify("application crash detected").is_retryable());
        assert!(!BackendError::classify("malformed parameters: x").is_retryable());
        assert!(!BackendError::classify("something odd").is_retryable());
    }

    #[test]
    fn permission_wins_over_transient_words() {
        // "connection" alone would be transient
        assert!(!BackendError::classify("connection permission denied").is_retryable());
    }
}
