use serde::{Deserialize, Serialize};

use crate::action::ActionKind;

/// How a session gates execution of compiled instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dispatch immediately.
    #[default]
    #[serde(alias = "automatic")]
    Auto,
    /// The whole instruction waits for explicit approval before compiling.
    #[serde(alias = "confirm-first", alias = "confirm_first")]
    Confirm,
    /// Run immediately but stop for approval before each sensitive action.
    Cautious,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Confirm => "confirm",
            Self::Cautious => "cautious",
        }
    }

    /// Whether a submitted instruction is held until the user confirms it.
    pub fn confirms_instruction(&self) -> bool {
        matches!(self, Self::Confirm)
    }

    /// Whether the executor must stop and ask before running `kind`.
    pub fn requires_confirmation(&self, kind: ActionKind) -> bool {
        matches!(self, Self::Cautious) && kind.is_sensitive()
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" => Ok(Self::Auto),
            "confirm" | "confirm-first" | "confirm_first" => Ok(Self::Confirm),
            "cautious" => Ok(Self::Cautious),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}
