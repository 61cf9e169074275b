//! Tool registry: name lookup, argument validation and dispatch

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use weave_ai::{ToolCall, ToolSchema};

use crate::error::{Error, Result};
use crate::tool::{BoxedTool, ToolContext, ToolResult, to_schema};

/// Default name of the terminal answer tool
pub const FINAL_ANSWER: &str = "final_answer";
/// Default name of the human-in-the-loop tool
pub const ASK_USER_FOR_HELP: &str = "ask_user_for_help";

/// What a registered name stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// An executable handler
    Handler,
    /// Ends the loop with a structured final output
    FinalAnswer,
    /// Suspends the loop until a human replies
    AskUserForHelp,
}

/// Arguments that did not match the tool's declared input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub tool: String,
    pub errors: Vec<String>,
}

impl ValidationError {
    /// Message sent back to the model so it can fix the call
    pub fn correction_message(&self) -> String {
        format!(
            "Tool argument validation failed for '{}':\n{}\nFix the arguments and call the tool again.",
            self.tool,
            self.errors.join("\n")
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.join("; "))
    }
}

struct Entry {
    kind: ToolKind,
    schema: ToolSchema,
    validator: Arc<jsonschema::Validator>,
    handler: Option<BoxedTool>,
}

/// Registry mapping tool names to handlers and input schemas
#[derive(Default)]
pub struct Toolkit {
    entries: HashMap<String, Entry>,
    /// Registration order, used for stable schema listings
    order: Vec<String>,
}

impl Toolkit {
    /// Create an empty toolkit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a toolkit with the default `final_answer` and `ask_user_for_help` tools
    pub fn with_control_tools() -> Result<Self> {
        let mut toolkit = Self::new();
        toolkit.register_final_answer(
            FINAL_ANSWER,
            "Return the final answer to the user. Call this alone once the task is done.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": { "description": "The final answer" }
                },
                "required": ["answer"]
            }),
        )?;
        toolkit.register_help_tool(
            ASK_USER_FOR_HELP,
            "Ask the user a clarifying question when you cannot proceed on your own.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" }
                },
                "required": ["question"]
            }),
        )?;
        Ok(toolkit)
    }

    /// Register an executable tool
    pub fn register(&mut self, tool: BoxedTool) -> Result<()> {
        let schema = to_schema(tool.as_ref());
        self.insert(ToolKind::Handler, schema, Some(tool))
    }

    /// Register the terminal answer tool under `name`
    pub fn register_final_answer(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Result<()> {
        let schema = ToolSchema::new(name, description, parameters);
        self.insert(ToolKind::FinalAnswer, schema, None)
    }

    /// Register the human-in-the-loop tool under `name`
    pub fn register_help_tool(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Result<()> {
        let schema = ToolSchema::new(name, description, parameters);
        self.insert(ToolKind::AskUserForHelp, schema, None)
    }

    fn insert(
        &mut self,
        kind: ToolKind,
        schema: ToolSchema,
        handler: Option<BoxedTool>,
    ) -> Result<()> {
        let name = schema.name.clone();
        if name.is_empty() {
            return Err(Error::Registration {
                name,
                reason: "tool name is empty".into(),
            });
        }
        if self.entries.contains_key(&name) {
            return Err(Error::Registration {
                name,
                reason: "a tool with this name is already registered".into(),
            });
        }
        if kind != ToolKind::Handler && self.entries.values().any(|e| e.kind == kind) {
            return Err(Error::Registration {
                name,
                reason: format!("a {:?} tool is already registered", kind),
            });
        }
        let validator =
            jsonschema::validator_for(&schema.parameters).map_err(|e| Error::Registration {
                name: name.clone(),
                reason: format!("invalid parameter schema: {}", e),
            })?;

        tracing::debug!(tool = %name, ?kind, "registered tool");
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Entry {
                kind,
                schema,
                validator: Arc::new(validator),
                handler,
            },
        );
        Ok(())
    }

    /// Look up what a name stands for
    pub fn kind(&self, name: &str) -> Result<ToolKind> {
        self.entries
            .get(name)
            .map(|e| e.kind)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Schemas for every registered tool, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|n| self.entries.get(n))
            .map(|e| e.schema.clone())
            .collect()
    }

    /// Validate raw arguments against the tool's declared input.
    ///
    /// Returns `Ok(None)` when valid, `Ok(Some(err))` when the arguments are
    /// wrong, and `Err(ToolNotFound)` for an unregistered name.
    pub fn validate(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<Option<ValidationError>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        let mut errors: Vec<String> = entry
            .validator
            .iter_errors(arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            if let Some(handler) = &entry.handler {
                errors = handler.check_arguments(arguments);
            }
        }

        if errors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ValidationError {
                tool: name.to_string(),
                errors,
            }))
        }
    }

    /// Validate and execute a call, returning `(tool_name, result)`.
    pub async fn execute(&self, call: &ToolCall, ctx: ToolContext) -> Result<(String, ToolResult)> {
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| Error::ToolNotFound(call.name.clone()))?;

        let Some(handler) = &entry.handler else {
            return Err(Error::Other(format!(
                "'{}' is a control tool and has no handler",
                call.name
            )));
        };

        if let Some(err) = self.validate(&call.name, &call.arguments)? {
            return Err(Error::InvalidArguments {
                tool: call.name.clone(),
                message: err.to_string(),
            });
        }

        let result = handler.execute(call.arguments.clone(), ctx).await;
        Ok((call.name.clone(), result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct QueryTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for QueryTool {
        fn name(&self) -> &str {
            "run_query"
        }
        fn description(&self) -> &str {
            "Runs an analytics query"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["sql"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value, _ctx: ToolContext) -> ToolResult {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let sql = arguments["sql"].as_str().unwrap_or_default();
            if sql.contains("missing_table") {
                return ToolResult::error("table not found");
            }
            ToolResult::text("3 rows")
        }
    }

    fn toolkit() -> (Toolkit, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut toolkit = Toolkit::with_control_tools().unwrap();
        toolkit
            .register(Arc::new(QueryTool {
                calls: calls.clone(),
            }))
            .unwrap();
        (toolkit, calls)
    }

    #[test]
    fn test_kinds() {
        let (toolkit, _) = toolkit();
        assert_eq!(toolkit.kind("run_query").unwrap(), ToolKind::Handler);
        assert_eq!(toolkit.kind(FINAL_ANSWER).unwrap(), ToolKind::FinalAnswer);
        assert_eq!(
            toolkit.kind(ASK_USER_FOR_HELP).unwrap(),
            ToolKind::AskUserForHelp
        );
        assert!(matches!(
            toolkit.kind("nope"),
            Err(Error::ToolNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_schemas_in_registration_order() {
        let (toolkit, _) = toolkit();
        let names: Vec<String> = toolkit.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![FINAL_ANSWER, ASK_USER_FOR_HELP, "run_query"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (mut toolkit, calls) = toolkit();
        let err = toolkit.register(Arc::new(QueryTool { calls })).unwrap_err();
        assert!(matches!(err, Error::Registration { ref name, .. } if name == "run_query"));
    }

    #[test]
    fn test_second_final_answer_tool_rejected() {
        let (mut toolkit, _) = toolkit();
        let err = toolkit
            .register_final_answer("submit", "another", serde_json::json!({"type": "object"}))
            .unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut toolkit = Toolkit::new();
        let err = toolkit
            .register_final_answer("done", "bad", serde_json::json!({"type": "not_a_real_type"}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid parameter schema"));
        assert!(!toolkit.contains("done"));
    }

    #[test]
    fn test_validate_valid_and_optional_missing() {
        let (toolkit, _) = toolkit();
        let args = serde_json::json!({"sql": "select 1", "limit": 10});
        assert!(toolkit.validate("run_query", &args).unwrap().is_none());
        let args = serde_json::json!({"sql": "select 1"});
        assert!(toolkit.validate("run_query", &args).unwrap().is_none());
    }

    #[test]
    fn test_validate_missing_required() {
        let (toolkit, _) = toolkit();
        let err = toolkit
            .validate("run_query", &serde_json::json!({"limit": 5}))
            .unwrap()
            .unwrap();
        assert_eq!(err.tool, "run_query");
        let msg = err.correction_message();
        assert!(msg.contains("validation failed"), "got: {}", msg);
        assert!(msg.contains("sql"), "should mention missing field, got: {}", msg);
    }

    #[test]
    fn test_validate_wrong_type_reports_path() {
        let (toolkit, _) = toolkit();
        let err = toolkit
            .validate("run_query", &serde_json::json!({"sql": "x", "limit": "ten"}))
            .unwrap()
            .unwrap();
        assert!(err.errors[0].starts_with("/limit"), "got: {:?}", err.errors);
    }

    #[test]
    fn test_validate_unknown_tool() {
        let (toolkit, _) = toolkit();
        assert!(matches!(
            toolkit.validate("drop_tables", &serde_json::json!({})),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_returns_name_and_result() {
        let (toolkit, calls) = toolkit();
        let call = ToolCall::new("c1", "run_query", serde_json::json!({"sql": "select 1"}));
        let (name, result) = toolkit
            .execute(&call, ToolContext::detached("c1", "run_query"))
            .await
            .unwrap();
        assert_eq!(name, "run_query");
        assert_eq!(result.content, "3 rows");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_execute_domain_error_is_a_result() {
        let (toolkit, _) = toolkit();
        let call = ToolCall::new(
            "c1",
            "run_query",
            serde_json::json!({"sql": "select * from missing_table"}),
        );
        let (_, result) = toolkit
            .execute(&call, ToolContext::detached("c1", "run_query"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, "table not found");
    }

    #[tokio::test]
    async fn test_execute_invalid_arguments_skips_handler() {
        let (toolkit, calls) = toolkit();
        let call = ToolCall::new("c1", "run_query", serde_json::json!({}));
        let err = toolkit
            .execute(&call, ToolContext::detached("c1", "run_query"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments { .. }));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_execute_control_tool_fails() {
        let (toolkit, _) = toolkit();
        let call = ToolCall::new("c1", FINAL_ANSWER, serde_json::json!({"answer": 1}));
        assert!(toolkit
            .execute(&call, ToolContext::detached("c1", FINAL_ANSWER))
            .await
            .is_err());
    }
}
