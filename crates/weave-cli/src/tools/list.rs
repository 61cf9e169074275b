//! Directory listing tool

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs;
use weave_agent::{Tool, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 100;

/// Tool for listing directory contents
#[derive(Default)]
pub struct ListTool;

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (defaults to current directory)"
                },
                "show_hidden": {
                    "type": "boolean",
                    "description": "Whether to show hidden files (default: false)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of entries to return (default: 100)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: ToolContext) -> ToolResult {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let show_hidden = arguments
            .get("show_hidden")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let mut read_dir = match fs::read_dir(&path).await {
            Ok(d) => d,
            Err(e) => {
                return ToolResult::error(format!(
                    "Cannot list {}: {}",
                    path.display(),
                    e
                ));
            }
        };

        let mut entries = Vec::new();
        loop {
            if ctx.cancel.is_cancelled() {
                return ToolResult::error("List cancelled");
            }
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return ToolResult::error(format!("Error reading directory: {}", e)),
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }

        if entries.is_empty() {
            return ToolResult::text("(empty directory)");
        }

        entries.sort();
        let truncated = entries.len() > limit;
        entries.truncate(limit);
        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n\n(showing first {} entries)", limit));
        }
        ToolResult::text(output)
    }
}
