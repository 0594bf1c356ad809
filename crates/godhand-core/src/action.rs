use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named arguments of an action. Shape depends on the [`ActionKind`].
pub type Parameters = serde_json::Map<String, Value>;

/// Fixed vocabulary of automation steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenApplication,
    Click,
    TypeText,
    PressKey,
    Hotkey,
    Wait,
    Screenshot,
    FileOp,
    SystemQuery,
    BrowserOp,
    /// Only appears in resolver output; loops are expanded before numbering.
    Loop,
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenApplication => "open_application",
            Self::Click => "click",
            Self::TypeText => "type_text",
            Self::PressKey => "press_key",
            Self::Hotkey => "hotkey",
            Self::Wait => "wait",
            Self::Screenshot => "screenshot",
            Self::FileOp => "file_op",
            Self::SystemQuery => "system_query",
            Self::BrowserOp => "browser_op",
            Self::Loop => "loop",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds that touch the filesystem, the host or the network.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::FileOp | Self::SystemQuery | Self::BrowserOp)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action as produced by an intent resolver, before it has a position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub description: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl ActionSpec {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn unknown(clause: &str) -> Self {
        Self::new(ActionKind::Unknown, format!("无法解析: {clause}")).with_param("raw", clause)
    }
}

/// One executable unit of a compiled instruction. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    kind: ActionKind,
    description: String,
    parameters: Parameters,
    sequence_index: usize,
}

impl Action {
    pub fn new(spec: ActionSpec, sequence_index: usize) -> Self {
        Self {
            kind: spec.kind,
            description: spec.description,
            parameters: spec.parameters,
            sequence_index,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(|v| v.as_i64())
    }
}

/// Outcome of executing one [`Action`], retries included.
///
/// Exactly one of `output` / `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub sequence_index: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    pub fn succeeded(action: &Action, output: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            sequence_index: action.sequence_index(),
            success: true,
            output: Some(output.into()),
            error: None,
            attempt_count,
            screenshot: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(action: &Action, error: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            sequence_index: action.sequence_index(),
            success: false,
            output: None,
            error: Some(error.into()),
            attempt_count,
            screenshot: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
        self.screenshot = screenshot;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(text: &str, index: usize) -> Action {
        Action::new(
            ActionSpec::new(ActionKind::TypeText, format!("输入: {text}")).with_param("text", text),
            index,
        )
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ActionKind::OpenApplication).unwrap();
        assert_eq!(json, "\"open_application\"");
        let back: ActionKind = serde_json::from_str("\"system_query\"").unwrap();
        assert_eq!(back, ActionKind::SystemQuery);
    }

    #[test]
    fn kind_as_str_matches_serde() {
        for kind in [
            ActionKind::OpenApplication,
            ActionKind::Click,
            ActionKind::TypeText,
            ActionKind::PressKey,
            ActionKind::Hotkey,
            ActionKind::Wait,
            ActionKind::Screenshot,
            ActionKind::FileOp,
            ActionKind::SystemQuery,
            ActionKind::BrowserOp,
            ActionKind::Loop,
            ActionKind::Unknown,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.as_str()));
        }
    }

    #[test]
    fn sensitive_kinds() {
        assert!(ActionKind::FileOp.is_sensitive());
        assert!(ActionKind::SystemQuery.is_sensitive());
        assert!(ActionKind::BrowserOp.is_sensitive());
        assert!(!ActionKind::TypeText.is_sensitive());
        assert!(!ActionKind::Screenshot.is_sensitive());
    }

    #[test]
    fn action_keeps_spec_fields() {
        let action = typed("123", 2);
        assert_eq!(action.kind(), ActionKind::TypeText);
        assert_eq!(action.sequence_index(), 2);
        assert_eq!(action.param_str("text"), Some("123"));
        assert_eq!(action.param_f64("text"), None);
    }

    #[test]
    fn unknown_spec_carries_raw_clause() {
        let spec = ActionSpec::unknown("跳个舞");
        assert_eq!(spec.kind, ActionKind::Unknown);
        assert_eq!(spec.parameters["raw"], "跳个舞");
        assert!(spec.description.contains("跳个舞"));
    }

    #[test]
    fn result_output_and_error_are_exclusive() {
        let action = typed("a", 0);
        let ok = ActionResult::succeeded(&action, "typed", 1);
        assert!(ok.success && ok.output.is_some() && ok.error.is_none());

        let err = ActionResult::failed(&action, "window not focused", 2);
        assert!(!err.success && err.output.is_none() && err.error.is_some());
        assert_eq!(err.attempt_count, 2);

        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("output").is_none());
        assert_eq!(json["error"], "window not focused");
    }
}
