//! Instruction compiler: raw text in, ordered [`Action`] list out.
//!
//! The text is split on connective markers, loop clauses are expanded
//! inline, and every remaining clause goes through the [`IntentResolver`].
//! Sequence indices are assigned last, after expansion.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use godhand_core::traits::IntentResolver;
use godhand_core::{Action, ActionKind, ActionSpec, CompileError};

/// Largest accepted loop count.
pub const MAX_REPEAT: u64 = 1_000;

pub const DEFAULT_CONNECTIVES: &[&str] = &["然后", "再", "and then", "then", "，", ";"];

static LOOP_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:循环\s*(\S+?)\s*次|(?i:repeat)\s+(\S+)\s+(?i:times?))\s*[:：]?\s*(.*)$")
        .unwrap()
});

pub struct Compiler {
    resolver: Arc<dyn IntentResolver>,
    /// Sorted longest first so `and then` wins over `then`.
    connectives: Vec<String>,
}

impl Compiler {
    pub fn new(resolver: Arc<dyn IntentResolver>) -> Self {
        Self::with_connectives(
            resolver,
            DEFAULT_CONNECTIVES.iter().map(|c| c.to_string()).collect(),
        )
    }

    pub fn with_connectives(resolver: Arc<dyn IntentResolver>, connectives: Vec<String>) -> Self {
        let mut connectives: Vec<String> = connectives
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        connectives.sort_by(|a, b| b.len().cmp(&a.len()));
        connectives.dedup();
        Self {
            resolver,
            connectives,
        }
    }

    /// Split on connective markers. Clauses are trimmed, empty ones dropped.
    pub fn split_clauses(&self, text: &str) -> Vec<String> {
        let mut clauses = Vec::new();
        let mut current = String::new();
        let mut rest = text;

        'scan: while !rest.is_empty() {
            for marker in &self.connectives {
                if marker_at(rest, marker, current.chars().last()) {
                    push_clause(&mut clauses, &current);
                    current.clear();
                    rest = &rest[marker.len()..];
                    continue 'scan;
                }
            }
            let Some(ch) = rest.chars().next() else {
                break;
            };
            current.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        push_clause(&mut clauses, &current);
        clauses
    }

    pub async fn compile(&self, text: &str) -> Result<Vec<Action>, CompileError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CompileError::EmptyInstruction);
        }

        let mut specs = Vec::new();
        let mut resolved_any = false;

        for clause in self.split_clauses(text) {
            let (times, body) = match parse_loop(&clause)? {
                Some((times, body)) => (times, body),
                None => (1, clause.clone()),
            };

            let mut clause_specs = if body.is_empty() {
                Vec::new()
            } else {
                expand_loops(self.resolver.resolve(&body).await?)?
            };
            if clause_specs.is_empty() {
                debug!(clause = %clause, "clause unresolved");
                clause_specs.push(ActionSpec::unknown(&clause));
            } else {
                resolved_any = true;
            }

            for _ in 0..times {
                specs.extend(clause_specs.iter().cloned());
            }
        }

        if !resolved_any {
            return Err(CompileError::Unresolved(text.to_string()));
        }

        Ok(specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Action::new(spec, index))
            .collect())
    }
}

fn push_clause(clauses: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        clauses.push(trimmed.to_string());
    }
}

/// Whether `rest` starts with `marker`. ASCII letters compare
/// case-insensitively, and word markers (`then`) need word boundaries.
fn marker_at(rest: &str, marker: &str, prev: Option<char>) -> bool {
    let len = marker.len();
    if rest.len() < len || !rest.is_char_boundary(len) || !rest[..len].eq_ignore_ascii_case(marker) {
        return false;
    }
    if !marker.chars().any(|c| c.is_ascii_alphabetic()) {
        return true;
    }
    let before_ok = prev.map_or(true, |c| !c.is_alphanumeric());
    let after_ok = rest[len..].chars().next().map_or(true, |c| !c.is_alphanumeric());
    before_ok && after_ok
}

/// `循环 N次 <body>` / `repeat N times: <body>` → `(N, body)`.
fn parse_loop(clause: &str) -> Result<Option<(u64, String)>, CompileError> {
    let Some(caps) = LOOP_CLAUSE.captures(clause) else {
        return Ok(None);
    };
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let times = parse_repeat_count(raw)?;
    let body = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    Ok(Some((times, body.to_string())))
}

fn parse_repeat_count(raw: &str) -> Result<u64, CompileError> {
    match raw.parse::<u64>() {
        Ok(n) if (1..=MAX_REPEAT).contains(&n) => Ok(n),
        _ => Err(CompileError::InvalidRepeatCount(raw.to_string())),
    }
}

/// Inline any `loop` specs a resolver returned. A loop spec carries
/// `times` and the `actions` to repeat.
fn expand_loops(specs: Vec<ActionSpec>) -> Result<Vec<ActionSpec>, CompileError> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.kind != ActionKind::Loop {
            out.push(spec);
            continue;
        }
        let times = match spec.parameters.get("times") {
            Some(Value::Number(n)) => parse_repeat_count(&n.to_string())?,
            Some(Value::String(s)) => parse_repeat_count(s.trim())?,
            other => {
                return Err(CompileError::InvalidRepeatCount(
                    other.map(|v| v.to_string()).unwrap_or_default(),
                ))
            }
        };
        let body: Vec<ActionSpec> = match spec.parameters.get("actions") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| CompileError::Resolver(format!("malformed loop body: {e}")))?,
            None => Vec::new(),
        };
        let body = expand_loops(body)?;
        for _ in 0..times {
            out.extend(body.iter().cloned());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedResolver;
    use crate::resolver::RuleResolver;

    fn rule_compiler() -> Compiler {
        Compiler::new(Arc::new(RuleResolver::new()))
    }

    fn kinds(actions: &[Action]) -> Vec<ActionKind> {
        actions.iter().map(|a| a.kind()).collect()
    }

    #[test]
    fn splits_on_default_connectives() {
        let c = rule_compiler();
        assert_eq!(
            c.split_clauses("打开计算器 然后输入123，按回车; 截图"),
            vec!["打开计算器", "输入123", "按回车", "截图"]
        );
        assert_eq!(
            c.split_clauses("open notepad and then type hi THEN screenshot"),
            vec!["open notepad", "type hi", "screenshot"]
        );
    }

    #[test]
    fn english_markers_need_word_boundaries() {
        let c = rule_compiler();
        assert_eq!(c.split_clauses("search athens"), vec!["search athens"]);
        assert_eq!(c.split_clauses("type thenar"), vec!["type thenar"]);
    }

    #[test]
    fn empty_clauses_are_dropped() {
        let c = rule_compiler();
        assert_eq!(c.split_clauses("  截图 然后 然后 ;"), vec!["截图"]);
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let c = rule_compiler();
        assert_eq!(c.compile("   \t").await, Err(CompileError::EmptyInstruction));
    }

    #[tokio::test]
    async fn calculator_scenario() {
        let c = rule_compiler();
        let actions = c
            .compile("打开计算器 然后输入123 然后按加号 然后输入456 然后按等于")
            .await
            .unwrap();
        assert_eq!(
            kinds(&actions),
            vec![
                ActionKind::OpenApplication,
                ActionKind::TypeText,
                ActionKind::PressKey,
                ActionKind::TypeText,
                ActionKind::PressKey,
            ]
        );
        assert_eq!(actions[1].param_str("text"), Some("123"));
        assert_eq!(actions[2].param_str("key"), Some("plus"));
        assert_eq!(actions[4].param_str("key"), Some("equal"));
        let indices: Vec<usize> = actions.iter().map(|a| a.sequence_index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn loop_scenario() {
        let c = rule_compiler();
        let actions = c.compile("循环 3次 截图").await.unwrap();
        assert_eq!(kinds(&actions), vec![ActionKind::Screenshot; 3]);
        assert_eq!(actions[2].sequence_index(), 2);
    }

    #[tokio::test]
    async fn english_loop_expands_inline() {
        let c = rule_compiler();
        let actions = c.compile("open notepad then repeat 2 times: press enter").await.unwrap();
        assert_eq!(
            kinds(&actions),
            vec![ActionKind::OpenApplication, ActionKind::PressKey, ActionKind::PressKey]
        );
    }

    #[tokio::test]
    async fn invalid_repeat_counts() {
        let c = rule_compiler();
        assert_eq!(
            c.compile("循环 0次 截图").await,
            Err(CompileError::InvalidRepeatCount("0".into()))
        );
        assert_eq!(
            c.compile("循环 abc次 截图").await,
            Err(CompileError::InvalidRepeatCount("abc".into()))
        );
        assert!(matches!(
            c.compile("repeat 5000 times: screenshot").await,
            Err(CompileError::InvalidRepeatCount(_))
        ));
    }

    #[tokio::test]
    async fn unresolved_clause_becomes_unknown_action() {
        let c = rule_compiler();
        let actions = c.compile("截图 然后 跳个舞").await.unwrap();
        assert_eq!(kinds(&actions), vec![ActionKind::Screenshot, ActionKind::Unknown]);
        assert_eq!(actions[1].param_str("raw"), Some("跳个舞"));
    }

    #[tokio::test]
    async fn fully_unresolved_input_is_rejected() {
        let c = rule_compiler();
        assert!(matches!(
            c.compile("跳个舞 然后 唱首歌").await,
            Err(CompileError::Unresolved(_))
        ));
    }

    #[tokio::test]
    async fn resolver_errors_surface() {
        let resolver = ScriptedResolver::new()
            .with_error("爆炸", CompileError::Resolver("classifier offline".into()));
        let c = Compiler::new(Arc::new(resolver));
        assert_eq!(
            c.compile("爆炸").await,
            Err(CompileError::Resolver("classifier offline".into()))
        );
    }

    #[tokio::test]
    async fn resolver_loop_specs_are_expanded() {
        let body = serde_json::to_value(vec![ActionSpec::new(ActionKind::Screenshot, "截图")]).unwrap();
        let resolver = ScriptedResolver::new().with(
            "拍三张",
            vec![ActionSpec::new(ActionKind::Loop, "循环")
                .with_param("times", 3)
                .with_param("actions", body)],
        );
        let c = Compiler::new(Arc::new(resolver));
        let actions = c.compile("拍三张").await.unwrap();
        assert_eq!(kinds(&actions), vec![ActionKind::Screenshot; 3]);
        assert!(actions.iter().all(|a| a.kind() != ActionKind::Loop));
    }

    #[tokio::test]
    async fn compilation_is_associative() {
        let c = rule_compiler();
        let whole = c.compile("打开记事本 然后 输入你好 然后 截图").await.unwrap();
        let mut parts = c.compile("打开记事本 然后 输入你好").await.unwrap();
        parts.extend(c.compile("截图").await.unwrap());
        assert_eq!(kinds(&whole), kinds(&parts));
    }

    #[tokio::test]
    async fn compilation_is_idempotent() {
        let c = rule_compiler();
        let text = "打开计算器 然后 等待 2秒 然后 按回车";
        assert_eq!(c.compile(text).await.unwrap(), c.compile(text).await.unwrap());
    }

    #[tokio::test]
    async fn custom_connectives() {
        let c = Compiler::with_connectives(
            Arc::new(RuleResolver::new()),
            vec![" | ".to_string(), String::new()],
        );
        let actions = c.compile("截图 | 等待 1秒").await.unwrap();
        assert_eq!(kinds(&actions), vec![ActionKind::Screenshot, ActionKind::Wait]);
    }
}
