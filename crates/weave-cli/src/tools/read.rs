//! File reading tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs;
use weave_agent::{ToolContext, ToolResult, TypedTool};

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ReadArgs {
    path: String,
    /// 1-indexed first line
    offset: Option<usize>,
    limit: Option<usize>,
}

/// Tool for reading file contents
#[derive(Default)]
pub struct ReadTool;

#[async_trait]
impl TypedTool for ReadTool {
    type Args = ReadArgs;

    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. For large files, use offset and limit parameters."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: ReadArgs, ctx: ToolContext) -> ToolResult {
        let path = expand_home(&args.path);

        if ctx.cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        ctx.progress.send(format!("reading {}", path.display()));
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = args.offset.unwrap_or(1).saturating_sub(1);
        let limit = args.limit.unwrap_or(MAX_LINES);

        if offset >= total_lines {
            return ToolResult::error(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            ));
        }

        let end = (offset + limit).min(total_lines);
        let mut had_truncated = false;
        let formatted: Vec<&str> = lines[offset..end]
            .iter()
            .map(|line| {
                if line.chars().count() > MAX_LINE_LENGTH {
                    had_truncated = true;
                    let cut = line
                        .char_indices()
                        .nth(MAX_LINE_LENGTH)
                        .map(|(i, _)| i)
                        .unwrap_or(line.len());
                    &line[..cut]
                } else {
                    line
                }
            })
            .collect();

        let mut output = formatted.join("\n");

        let mut notices = Vec::new();
        if had_truncated {
            notices.push(format!(
                "Some lines were truncated to {} characters",
                MAX_LINE_LENGTH
            ));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        if !notices.is_empty() {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        ToolResult::text(output).with_details(json!({ "lines": end - offset }))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(stripped) => dirs::home_dir()
            .map(|home| home.join(stripped))
            .unwrap_or_else(|| PathBuf::from(path)),
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: serde_json::Value) -> ReadArgs {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_reads_a_window_of_lines() {
        let dir = std::env::temp_dir().join(format!("weave-read-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("notes.txt");
        std::fs::write(&file, "one\ntwo\nthree\nfour\n").unwrap();

        let result = ReadTool
            .run(
                args(json!({"path": file.to_string_lossy(), "offset": 2, "limit": 2})),
                ToolContext::detached("c1", "read"),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.starts_with("two\nthree"));
        assert!(result.content.contains("Use offset=4"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_result() {
        let result = ReadTool
            .run(
                args(json!({"path": "/definitely/not/here.txt"})),
                ToolContext::detached("c1", "read"),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Failed to read file"));
    }
}
