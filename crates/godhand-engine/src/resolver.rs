//! Rule-based [`IntentResolver`] for the bilingual command grammar.
//!
//! Handles one clause at a time; splitting and loops belong to the compiler.
//! Clauses no rule matches resolve to nothing.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use godhand_core::traits::IntentResolver;
use godhand_core::{ActionKind, ActionSpec, CompileError};

/// App name (lowercase) → launch command.
const APP_COMMANDS: &[(&str, &str)] = &[
    ("计算器", "calc.exe"),
    ("记事本", "notepad.exe"),
    ("画图", "mspaint.exe"),
    ("cmd", "cmd.exe"),
    ("powershell", "powershell.exe"),
    ("浏览器", "msedge"),
    ("edge", "msedge"),
    ("chrome", "chrome"),
    ("word", "winword"),
    ("excel", "excel"),
    ("vscode", "code"),
    ("设置", "ms-settings:"),
    ("任务管理器", "taskmgr.exe"),
    ("文件资源管理器", "explorer.exe"),
];

/// Alias → canonical app name in [`APP_COMMANDS`].
const APP_ALIASES: &[(&str, &str)] = &[
    ("calc", "计算器"),
    ("calculator", "计算器"),
    ("notepad", "记事本"),
    ("txt", "记事本"),
    ("文本编辑器", "记事本"),
    ("mspaint", "画图"),
    ("paint", "画图"),
    ("绘图", "画图"),
    ("browser", "浏览器"),
    ("谷歌浏览器", "chrome"),
    ("命令提示符", "cmd"),
    ("终端", "cmd"),
    ("命令行", "cmd"),
    ("ps", "powershell"),
    ("文档", "word"),
    ("表格", "excel"),
];

const KEY_MAP: &[(&str, &str)] = &[
    ("回车", "enter"),
    ("空格", "space"),
    ("退格", "backspace"),
    ("删除", "delete"),
    ("del", "delete"),
    ("esc", "escape"),
    ("上", "up"),
    ("下", "down"),
    ("左", "left"),
    ("右", "right"),
    ("加号", "plus"),
    ("加", "plus"),
    ("+", "plus"),
    ("减号", "minus"),
    ("减", "minus"),
    ("-", "minus"),
    ("乘号", "multiply"),
    ("乘", "multiply"),
    ("*", "multiply"),
    ("除号", "divide"),
    ("除", "divide"),
    ("/", "divide"),
    ("等于", "equal"),
    ("等号", "equal"),
    ("=", "equal"),
    ("control", "ctrl"),
];

static NAVIGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:打开网址|访问|(?i:go to|visit|navigate to))\s*(\S+)$").unwrap()
});
static OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:打开|启动|运行|(?i:open|launch|start)\s)\s*(.+)$").unwrap());
static TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:输入|键入|写入|填写|(?i:type)\s)\s*(.+)$").unwrap());
static PRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:按键|按下|按|(?i:press)\s)\s*(.+)$").unwrap());
static HOTKEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:快捷键|(?i:hotkey)\s)\s*(.+)$").unwrap());
static COMBO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(?:ctrl|control|alt|shift|win|cmd|super)(?:\s*\+\s*\w+)+$").unwrap()
});
static CLICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:点击|单击|(?i:click))\s*(.*)$").unwrap());
static COORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?\s*(-?\d+)\s*[,，\s]\s*(-?\d+)\s*\)?$").unwrap());
static WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:等待|等|(?i:wait))\s*(\d+(?:\.\d+)?)\s*(?:秒钟?|(?i:s|sec|secs|seconds?))?$")
        .unwrap()
});
static SCREENSHOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:截图|截屏|(?i:screenshot|snapshot))").unwrap());
static SEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:搜索|查找|百度|(?i:search|google)\s)\s*(.+)$").unwrap());
static MKDIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:创建|新建)\s*(?:文件夹|目录)|(?i:mkdir)\s)\s*(\S+)$").unwrap()
});
static CREATE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:创建|新建)\s*文件\s*(\S+)(?:\s+(?:写入|内容)\s*(.+))?$").unwrap()
});
static QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:查看|查询|(?i:show|what))\s*(.*)$").unwrap());

/// Default resolver shipped with the host.
#[derive(Clone, Debug, Default)]
pub struct RuleResolver;

impl RuleResolver {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`IntentResolver::resolve`].
    pub fn resolve_clause(&self, clause: &str) -> Vec<ActionSpec> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Vec::new();
        }

        if let Some(caps) = NAVIGATE.captures(clause) {
            return vec![navigate(&caps[1])];
        }
        if let Some(caps) = MKDIR.captures(clause) {
            let path = &caps[1];
            return vec![ActionSpec::new(ActionKind::FileOp, format!("创建文件夹: {path}"))
                .with_param("operation", "mkdir")
                .with_param("path", path)];
        }
        if let Some(caps) = CREATE_FILE.captures(clause) {
            let path = &caps[1];
            let mut spec = ActionSpec::new(ActionKind::FileOp, format!("创建文件: {path}"))
                .with_param("operation", "create")
                .with_param("path", path);
            if let Some(content) = caps.get(2) {
                spec = spec.with_param("content", content.as_str().trim());
            }
            return vec![spec];
        }
        if let Some(caps) = OPEN.captures(clause) {
            let target = caps[1].trim();
            if looks_like_url(target) {
                return vec![navigate(target)];
            }
            return vec![ActionSpec::new(ActionKind::OpenApplication, format!("打开应用: {target}"))
                .with_param("app_name", target)
                .with_param("command", resolve_app(target))];
        }
        if let Some(caps) = TYPE.captures(clause) {
            let text = caps[1].trim();
            return vec![ActionSpec::new(ActionKind::TypeText, format!("输入: {}", preview(text, 30)))
                .with_param("text", text)];
        }
        if let Some(caps) = HOTKEY.captures(clause) {
            return vec![hotkey(caps[1].trim())];
        }
        if COMBO.is_match(clause) {
            return vec![hotkey(clause)];
        }
        if let Some(caps) = PRESS.captures(clause) {
            let key = caps[1].trim();
            if key.len() > 1 && key.contains('+') {
                return vec![hotkey(key)];
            }
            return vec![ActionSpec::new(ActionKind::PressKey, format!("按键: {key}"))
                .with_param("key", map_key(key))];
        }
        if let Some(caps) = CLICK.captures(clause) {
            return vec![click(caps[1].trim())];
        }
        if let Some(caps) = WAIT.captures(clause) {
            let seconds: f64 = caps[1].parse().unwrap_or(0.0);
            return vec![ActionSpec::new(ActionKind::Wait, format!("等待 {seconds} 秒"))
                .with_param("seconds", seconds)];
        }
        if SCREENSHOT.is_match(clause) {
            return vec![ActionSpec::new(ActionKind::Screenshot, "截取屏幕")];
        }
        if let Some(caps) = SEARCH.captures(clause) {
            let query = caps[1].trim();
            return vec![ActionSpec::new(ActionKind::BrowserOp, format!("搜索: {query}"))
                .with_param("operation", "search")
                .with_param("query", query)
                .with_param("engine", "bing")];
        }
        if let Some(query) = system_query(clause) {
            return vec![query];
        }
        Vec::new()
    }
}

#[async_trait]
impl IntentResolver for RuleResolver {
    async fn resolve(&self, clause: &str) -> Result<Vec<ActionSpec>, CompileError> {
        Ok(self.resolve_clause(clause))
    }
}

/// Launch command for an app name: exact, then alias, then substring match.
/// Unknown names are launched as given.
pub fn resolve_app(app_name: &str) -> String {
    let name = app_name.trim().to_lowercase();
    if let Some((_, cmd)) = APP_COMMANDS.iter().find(|(n, _)| *n == name) {
        return cmd.to_string();
    }
    if let Some((_, canonical)) = APP_ALIASES.iter().find(|(alias, _)| *alias == name) {
        if let Some((_, cmd)) = APP_COMMANDS.iter().find(|(n, _)| n == canonical) {
            return cmd.to_string();
        }
    }
    if let Some((_, cmd)) = APP_COMMANDS
        .iter()
        .find(|(n, _)| name.contains(n) || n.contains(name.as_str()))
    {
        return cmd.to_string();
    }
    app_name.trim().to_string()
}

pub fn map_key(key: &str) -> String {
    let lower = key.trim().to_lowercase();
    KEY_MAP
        .iter()
        .find(|(k, _)| *k == lower)
        .map(|(_, v)| v.to_string())
        .unwrap_or(lower)
}

fn hotkey(combo: &str) -> ActionSpec {
    let keys: Vec<String> = combo
        .split('+')
        .map(map_key)
        .filter(|k| !k.is_empty())
        .collect();
    ActionSpec::new(ActionKind::Hotkey, format!("快捷键: {}", keys.join("+")))
        .with_param("keys", keys)
}

fn click(target: &str) -> ActionSpec {
    if let Some(caps) = COORDS.captures(target) {
        let x: i64 = caps[1].parse().unwrap_or(0);
        let y: i64 = caps[2].parse().unwrap_or(0);
        return ActionSpec::new(ActionKind::Click, format!("点击 ({x}, {y})"))
            .with_param("x", x)
            .with_param("y", y);
    }
    let spec = ActionSpec::new(ActionKind::Click, format!("点击: {target}"));
    if target.is_empty() {
        spec
    } else {
        spec.with_param("selector", target)
    }
}

fn navigate(target: &str) -> ActionSpec {
    let url = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };
    ActionSpec::new(ActionKind::BrowserOp, format!("打开网址: {url}"))
        .with_param("operation", "navigate")
        .with_param("url", url)
}

fn looks_like_url(target: &str) -> bool {
    let lower = target.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
}

fn system_query(clause: &str) -> Option<ActionSpec> {
    let lower = clause.to_lowercase();
    let topic = if ["时间", "几点", "what time", "日期"].iter().any(|k| lower.contains(k)) {
        "time"
    } else if ["系统信息", "system info", "系统"].iter().any(|k| lower.contains(k)) {
        "system"
    } else if ["磁盘", "disk"].iter().any(|k| lower.contains(k)) {
        "disk"
    } else if ["内存", "memory"].iter().any(|k| lower.contains(k)) {
        "memory"
    } else if let Some(caps) = QUERY.captures(clause) {
        let rest = caps[1].trim();
        if rest.is_empty() {
            return None;
        }
        return Some(
            ActionSpec::new(ActionKind::SystemQuery, format!("查询: {rest}")).with_param("query", rest),
        );
    } else {
        return None;
    };
    Some(ActionSpec::new(ActionKind::SystemQuery, format!("查询: {topic}")).with_param("query", topic))
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(clause: &str) -> ActionSpec {
        let mut specs = RuleResolver::new().resolve_clause(clause);
        assert_eq!(specs.len(), 1, "clause {clause:?} gave {specs:?}");
        specs.remove(0)
    }

    #[test]
    fn open_application_resolves_command() {
        let spec = one("打开计算器");
        assert_eq!(spec.kind, ActionKind::OpenApplication);
        assert_eq!(spec.parameters["app_name"], "计算器");
        assert_eq!(spec.parameters["command"], "calc.exe");

        assert_eq!(one("launch Notepad").parameters["command"], "notepad.exe");
        assert_eq!(one("启动 终端").parameters["command"], "cmd.exe");
    }

    #[test]
    fn unknown_apps_launch_as_given() {
        assert_eq!(resolve_app("gimp"), "gimp");
        assert_eq!(resolve_app("Windows 记事本"), "notepad.exe");
    }

    #[test]
    fn type_text_keeps_case() {
        let spec = one("输入Hello World");
        assert_eq!(spec.kind, ActionKind::TypeText);
        assert_eq!(spec.parameters["text"], "Hello World");
        assert_eq!(one("type abc").parameters["text"], "abc");
    }

    #[test]
    fn press_key_uses_key_map() {
        assert_eq!(one("按加号").parameters["key"], "plus");
        assert_eq!(one("按等于").parameters["key"], "equal");
        assert_eq!(one("按下回车").parameters["key"], "enter");
        assert_eq!(one("按键 Tab").parameters["key"], "tab");
        assert_eq!(one("press enter").kind, ActionKind::PressKey);
    }

    #[test]
    fn combos_become_hotkeys() {
        let spec = one("ctrl+c");
        assert_eq!(spec.kind, ActionKind::Hotkey);
        assert_eq!(spec.parameters["keys"], serde_json::json!(["ctrl", "c"]));
        assert_eq!(one("快捷键 alt+f4").parameters["keys"], serde_json::json!(["alt", "f4"]));
        assert_eq!(one("按 ctrl+s").kind, ActionKind::Hotkey);
    }

    #[test]
    fn click_coordinates_or_selector() {
        let spec = one("点击 100,200");
        assert_eq!(spec.kind, ActionKind::Click);
        assert_eq!(spec.parameters["x"], 100);
        assert_eq!(spec.parameters["y"], 200);
        assert_eq!(one("click 确定按钮").parameters["selector"], "确定按钮");
    }

    #[test]
    fn wait_seconds() {
        let spec = one("等待 3秒");
        assert_eq!(spec.kind, ActionKind::Wait);
        assert_eq!(spec.parameters["seconds"], 3.0);
        assert_eq!(one("wait 1.5 s").parameters["seconds"], 1.5);
    }

    #[test]
    fn screenshot_and_search() {
        assert_eq!(one("截图").kind, ActionKind::Screenshot);
        assert_eq!(one("Screenshot").kind, ActionKind::Screenshot);
        let search = one("搜索 Rust 教程");
        assert_eq!(search.kind, ActionKind::BrowserOp);
        assert_eq!(search.parameters["operation"], "search");
        assert_eq!(search.parameters["query"], "Rust 教程");
    }

    #[test]
    fn navigation() {
        let spec = one("访问 example.com");
        assert_eq!(spec.parameters["operation"], "navigate");
        assert_eq!(spec.parameters["url"], "https://example.com");
        assert_eq!(one("打开 https://docs.rs").parameters["url"], "https://docs.rs");
    }

    #[test]
    fn file_operations() {
        let dir = one("创建文件夹 reports");
        assert_eq!(dir.kind, ActionKind::FileOp);
        assert_eq!(dir.parameters["operation"], "mkdir");
        assert_eq!(dir.parameters["path"], "reports");

        let file = one("新建文件 a.txt 写入 你好");
        assert_eq!(file.parameters["operation"], "create");
        assert_eq!(file.parameters["path"], "a.txt");
        assert_eq!(file.parameters["content"], "你好");
    }

    #[test]
    fn system_queries() {
        assert_eq!(one("现在几点").parameters["query"], "time");
        assert_eq!(one("查看系统信息").parameters["query"], "system");
        assert_eq!(one("what time is it").kind, ActionKind::SystemQuery);
    }

    #[test]
    fn gibberish_resolves_to_nothing() {
        assert!(RuleResolver::new().resolve_clause("跳个舞").is_empty());
        assert!(RuleResolver::new().resolve_clause("   ").is_empty());
    }

    #[test]
    fn long_text_preview_is_truncated() {
        let text = "字".repeat(40);
        let spec = one(&format!("输入{text}"));
        assert!(spec.description.ends_with("..."));
        assert_eq!(spec.parameters["text"], text.as_str());
    }
}
