//! Human-readable status lines for tool invocations.
//!
//! The status is a pure function of the tool name and its input. Names are
//! matched case-insensitively so both Claude-style (`Bash`, `Read`) and
//! gateway-style (`exec`, `read`) tool names are covered.

use serde_json::Value;
use std::path::Path;

/// Maximum characters of a shell command shown in a status line.
pub const COMMAND_PREVIEW_MAX: usize = 60;

/// Maximum characters of a subtask description shown in a status line.
pub const DESCRIPTION_PREVIEW_MAX: usize = 40;

const ELLIPSIS: char = '\u{2026}';

/// Derive the status line for a tool call.
pub fn format_tool_status(name: &str, input: &Value) -> String {
    match name.to_ascii_lowercase().as_str() {
        "bash" | "exec" | "shell" | "process" => {
            let command = str_field(input, &["command", "cmd"]).unwrap_or_default();
            format!("Running: {}", truncate(command, COMMAND_PREVIEW_MAX))
        }
        "read" => format!("Reading {}", file_name(input)),
        "edit" | "multiedit" | "apply_patch" => format!("Editing {}", file_name(input)),
        "write" => format!("Writing {}", file_name(input)),
        "glob" => "Searching files".to_string(),
        "grep" => "Searching code".to_string(),
        "webfetch" | "web_fetch" => "Fetching web content".to_string(),
        "websearch" | "web_search" => "Searching the web".to_string(),
        "browser" => "Using the browser".to_string(),
        "task" | "sessions_spawn" => match str_field(input, &["description", "task"]) {
            Some(desc) if !desc.is_empty() => {
                format!("Subtask: {}", truncate(desc, DESCRIPTION_PREVIEW_MAX))
            }
            _ => "Running subtask".to_string(),
        },
        "askuserquestion" => "Waiting for your answer".to_string(),
        "enterplanmode" => "Planning".to_string(),
        "notebookedit" => "Editing notebook".to_string(),
        _ => format!("Using {}", name),
    }
}

/// First non-empty string among `keys`.
fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| input.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn file_name(input: &Value) -> String {
    let path = str_field(input, &["file_path", "path", "notebook_path"]).unwrap_or_default();
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push(ELLIPSIS);
    out
}
