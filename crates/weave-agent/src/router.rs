//! ReAct tool-call router
//!
//! The router is a state machine over [`AgentState`]. Every step is a pure
//! [`Router::transition`] from a state and an event to a new state and a
//! [`Phase`]; [`Router::reason`] and [`Router::dispatch`] produce those events
//! by calling the model and the toolkit, and [`Router::run`] drives the loop
//! until [`route`] says it is over.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use weave_ai::{Message, ModelClient, ModelRequest, ModelResponse, ToolCall};

use crate::compaction::Compactor;
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::executor::{ParallelExecutor, Task, TaskStatus};
use crate::state::{AgentState, IntermediateStep};
use crate::tool::{ProgressSender, ToolContext, ToolResult};
use crate::toolkit::{ToolKind, Toolkit};

/// Tool name recorded in the step that marks iteration exhaustion
pub const MAX_ITERATIONS_SENTINEL: &str = "max_iterations_exceeded";

const EVENT_CHANNEL_CAPACITY: usize = 256;
const TOOL_FAILED_RESULT: &str = "Tool execution failed";
const SKIPPED_RESULT: &str = "Skipped: another call in this response ended the turn";

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Model calls allowed before the loop is cut off
    pub max_iterations: u32,
    /// System prompt sent with every model call
    pub system_prompt: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

/// Where the loop stands after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reasoning,
    ToolCall,
    FinalAnswer,
    Interrupted,
    MaxIterationsExceeded,
}

/// Routing decision after a reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    End,
}

/// Result text for one dispatched call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn new(call: &ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: content.into(),
            is_error,
        }
    }

    fn to_message(&self) -> Message {
        Message::tool_result(&self.call_id, &self.tool_name, &self.content, self.is_error)
    }
}

/// Inputs to the pure transition function
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// The model answered a reasoning call
    ModelResponded(ModelResponse),
    /// The iteration bound was hit before calling the model
    IterationLimitReached,
    /// Pending calls were executed
    ToolsResolved(Vec<ToolOutcome>),
    /// The human answered, either a help request or a new turn
    HumanReplied(String),
}

/// New state plus the phase it landed in
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: AgentState,
    pub phase: Phase,
}

/// Decide whether the loop goes on to dispatch.
///
/// Ends when a final output is set, when the last step is a help request or
/// the iteration sentinel, or when nothing is left unresolved.
pub fn route(state: &AgentState, toolkit: &Toolkit) -> Route {
    if state.final_output.is_some() {
        return Route::End;
    }
    if let Some(last) = state.last_step() {
        if last.call.name == MAX_ITERATIONS_SENTINEL
            || matches!(toolkit.kind(&last.call.name), Ok(ToolKind::AskUserForHelp))
        {
            return Route::End;
        }
    }
    if state.has_unresolved_steps() {
        Route::Continue
    } else {
        Route::End
    }
}

/// Drives the ReAct loop over a toolkit and a model collaborator
pub struct Router {
    config: RouterConfig,
    toolkit: Arc<Toolkit>,
    model: Arc<dyn ModelClient>,
    events: broadcast::Sender<AgentEvent>,
    executor: ParallelExecutor,
    compactor: Option<Compactor>,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(config: RouterConfig, toolkit: Arc<Toolkit>, model: Arc<dyn ModelClient>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let executor = ParallelExecutor::default()
            .with_events(events.clone())
            .with_cancel_token(cancel.child_token());
        Self {
            config,
            toolkit,
            model,
            events,
            executor,
            compactor: None,
            cancel,
        }
    }

    /// Subscribe to router, tool and task events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Publish events on an existing channel
    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        self.executor = self.executor.with_events(tx.clone());
        self.compactor = self.compactor.map(|c| c.with_events(tx.clone()));
        self.events = tx;
        self
    }

    /// Run multi-call dispatches through `executor`
    pub fn with_executor(mut self, executor: ParallelExecutor) -> Self {
        self.executor = executor
            .with_events(self.events.clone())
            .with_cancel_token(self.cancel.child_token());
        self
    }

    /// Compact the history before each reasoning step when it grows too large
    pub fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor.with_events(self.events.clone()));
        self
    }

    /// Cancelling `token` stops the loop and any dispatch in flight
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancel_token(token.child_token());
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn toolkit(&self) -> &Arc<Toolkit> {
        &self.toolkit
    }

    /// Routing decision for `state` against this router's toolkit
    pub fn route(&self, state: &AgentState) -> Route {
        route(state, &self.toolkit)
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    fn kind_of(&self, call: &ToolCall) -> Option<ToolKind> {
        self.toolkit.kind(&call.name).ok()
    }

    /// Apply one event to `state`. Never touches the model or the handlers.
    pub fn transition(&self, state: &AgentState, event: RouterEvent) -> Result<Transition> {
        match event {
            RouterEvent::ModelResponded(response) => self.on_model_response(state, response),
            RouterEvent::IterationLimitReached => Ok(self.on_iteration_limit(state)),
            RouterEvent::ToolsResolved(outcomes) => Ok(on_tools_resolved(state, outcomes)),
            RouterEvent::HumanReplied(reply) => Ok(self.on_human_reply(state, reply)),
        }
    }

    fn on_model_response(&self, state: &AgentState, response: ModelResponse) -> Result<Transition> {
        let ModelResponse::ToolCalls { calls } = response else {
            return Err(Error::NoToolCall);
        };
        if calls.is_empty() {
            return Err(Error::NoToolCall);
        }

        let mut next = state.clone();
        next.iteration += 1;
        next.final_output = None;
        next.messages
            .push(Message::assistant_with_tool_calls("", calls.clone()));

        // A valid final answer wins over anything else in the same response.
        // An invalid one stays pending so dispatch can send the correction.
        let answer = calls
            .iter()
            .find(|c| self.kind_of(c) == Some(ToolKind::FinalAnswer));
        if let Some(answer) = answer {
            if self.toolkit.validate(&answer.name, &answer.arguments)?.is_none() {
                next.final_output = Some(answer.arguments.clone());
                next.intermediate_steps.clear();
                for call in &calls {
                    let message = if call.id == answer.id {
                        Message::tool_result(&call.id, &call.name, "Final answer recorded", false)
                    } else {
                        Message::tool_result(&call.id, &call.name, SKIPPED_RESULT, true)
                    };
                    next.messages.push(message);
                }
                return Ok(Transition {
                    state: next,
                    phase: Phase::FinalAnswer,
                });
            }
        }

        let help = calls
            .iter()
            .find(|c| self.kind_of(c) == Some(ToolKind::AskUserForHelp));
        if let Some(help) = help {
            for call in calls.iter().filter(|c| c.id != help.id) {
                next.messages
                    .push(Message::tool_result(&call.id, &call.name, SKIPPED_RESULT, true));
            }
            next.intermediate_steps = vec![IntermediateStep::pending(help.clone())];
            return Ok(Transition {
                state: next,
                phase: Phase::Interrupted,
            });
        }

        next.intermediate_steps
            .extend(calls.into_iter().map(IntermediateStep::pending));
        Ok(Transition {
            state: next,
            phase: Phase::ToolCall,
        })
    }

    fn on_iteration_limit(&self, state: &AgentState) -> Transition {
        let notice = format!(
            "Stopped after {} iterations without reaching a final answer.",
            state.iteration
        );
        let sentinel = ToolCall::new(
            uuid::Uuid::new_v4().to_string(),
            MAX_ITERATIONS_SENTINEL,
            serde_json::json!({ "iterations": state.iteration }),
        );

        let mut next = state.clone();
        next.intermediate_steps = vec![IntermediateStep::resolved(sentinel, notice.clone())];
        next.messages.push(Message::assistant(notice));
        Transition {
            state: next,
            phase: Phase::MaxIterationsExceeded,
        }
    }

    fn on_human_reply(&self, state: &AgentState, reply: String) -> Transition {
        let mut next = state.clone();
        let pending_help = next
            .last_step()
            .filter(|s| !s.is_resolved() && self.kind_of(&s.call) == Some(ToolKind::AskUserForHelp))
            .map(|s| s.call.clone());

        match pending_help {
            Some(help) => {
                next.messages
                    .push(Message::tool_result(&help.id, &help.name, reply, false));
            }
            None => {
                // A fresh turn gets a fresh iteration budget.
                next.messages.push(Message::human(reply));
                next.iteration = 0;
            }
        }
        next.intermediate_steps.clear();
        next.final_output = None;
        Transition {
            state: next,
            phase: Phase::Reasoning,
        }
    }

    /// One reasoning step: call the model and apply its response.
    ///
    /// At the iteration bound the model is not called and the terminal
    /// `MaxIterationsExceeded` transition is returned instead. A response
    /// without tool calls fails with [`Error::NoToolCall`].
    pub async fn reason(&self, state: &AgentState) -> Result<Transition> {
        if state.iteration >= self.config.max_iterations {
            tracing::warn!(
                iterations = state.iteration,
                max = self.config.max_iterations,
                "iteration bound reached"
            );
            let transition = self.transition(state, RouterEvent::IterationLimitReached)?;
            self.emit(AgentEvent::MaxIterationsExceeded {
                iterations: state.iteration,
            });
            return Ok(transition);
        }

        self.emit(AgentEvent::ReasoningStart {
            iteration: state.iteration + 1,
        });
        let request = ModelRequest {
            system_prompt: self.config.system_prompt.clone(),
            messages: state.live_messages().to_vec(),
            tools: self.toolkit.schemas(),
        };

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.model.call(request) => response?,
        };
        let calls = response.calls().to_vec();
        let transition = self.transition(state, RouterEvent::ModelResponded(response))?;

        tracing::debug!(
            iteration = transition.state.iteration,
            calls = calls.len(),
            phase = ?transition.phase,
            "model responded"
        );
        self.emit(AgentEvent::ToolCallsRequested { calls });
        match transition.phase {
            Phase::FinalAnswer => self.emit(AgentEvent::FinalAnswer {
                output: transition.state.final_output.clone().unwrap_or_default(),
            }),
            Phase::Interrupted => {
                if let Some(step) = transition.state.last_step() {
                    self.emit(AgentEvent::Interrupted {
                        tool_call_id: step.call.id.clone(),
                        request: step.call.arguments.clone(),
                    });
                }
            }
            _ => {}
        }
        Ok(transition)
    }

    /// Execute every unresolved step and apply the results.
    ///
    /// Invalid arguments become corrective tool results instead of errors.
    /// A handler that panics or whose task is dropped yields an error result
    /// for its call, whether it ran alone or in a parallel batch.
    /// An unregistered tool name fails with [`Error::ToolNotFound`].
    pub async fn dispatch(&self, state: &AgentState) -> Result<Transition> {
        let pending = state.unresolved_calls();
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; pending.len()];
        let mut runnable = Vec::new();

        for (idx, call) in pending.iter().enumerate() {
            let kind = self.toolkit.kind(&call.name)?;
            match self.toolkit.validate(&call.name, &call.arguments)? {
                Some(rejected) => {
                    tracing::warn!(
                        tool = %call.name,
                        call_id = %call.id,
                        errors = %rejected,
                        "tool arguments rejected"
                    );
                    let message = rejected.correction_message();
                    self.emit(AgentEvent::ArgumentsRejected {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        message: message.clone(),
                    });
                    outcomes[idx] = Some(ToolOutcome::new(call, message, true));
                }
                None if kind == ToolKind::Handler => runnable.push(idx),
                None => {
                    return Err(Error::Other(format!(
                        "control tool '{}' cannot be dispatched",
                        call.name
                    )));
                }
            }
        }

        match runnable.as_slice() {
            [] => {}
            [idx] => outcomes[*idx] = Some(self.run_single(&pending[*idx]).await?),
            _ => {
                for &idx in &runnable {
                    let call = &pending[idx];
                    self.emit(AgentEvent::ToolExecutionStart {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }
                let tasks = runnable
                    .iter()
                    .map(|&idx| (Task::tool(pending[idx].clone(), self.toolkit.clone()), vec![]))
                    .collect();
                let results = self.executor.execute(tasks, Ok).await?;
                for result in results {
                    if let Some(idx) = pending.iter().position(|c| c.id == result.call_id) {
                        outcomes[idx] = Some(ToolOutcome {
                            call_id: result.call_id,
                            tool_name: result.tool_name,
                            content: result.result,
                            is_error: result.status == TaskStatus::Failed,
                        });
                    }
                }
                // Dropped tasks still owe the model a result.
                for &idx in &runnable {
                    if outcomes[idx].is_none() {
                        outcomes[idx] =
                            Some(ToolOutcome::new(&pending[idx], TOOL_FAILED_RESULT, true));
                    }
                }
                for &idx in &runnable {
                    if let Some(outcome) = &outcomes[idx] {
                        self.emit(AgentEvent::ToolExecutionEnd {
                            tool_call_id: outcome.call_id.clone(),
                            tool_name: outcome.tool_name.clone(),
                            result: outcome.content.clone(),
                            is_error: outcome.is_error,
                        });
                    }
                }
            }
        }

        let outcomes = outcomes.into_iter().flatten().collect();
        self.transition(state, RouterEvent::ToolsResolved(outcomes))
    }

    async fn run_single(&self, call: &ToolCall) -> Result<ToolOutcome> {
        self.emit(AgentEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let ctx = ToolContext {
            call_id: call.id.clone(),
            artifacts: vec![],
            progress: ProgressSender::new(self.events.clone(), &call.id, &call.name),
            cancel: self.cancel.child_token(),
        };
        // Same isolation as a parallel batch: a panicking handler fails its call only.
        let executed = AssertUnwindSafe(self.toolkit.execute(call, ctx))
            .catch_unwind()
            .await;
        let (tool_name, result) = match executed {
            Ok(executed) => executed?,
            Err(_) => {
                tracing::error!(tool = %call.name, call_id = %call.id, "tool panicked");
                (call.name.clone(), ToolResult::error(TOOL_FAILED_RESULT))
            }
        };

        self.emit(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: tool_name.clone(),
            result: result.content.clone(),
            is_error: result.is_error,
        });
        Ok(ToolOutcome {
            call_id: call.id.clone(),
            tool_name,
            content: result.content,
            is_error: result.is_error,
        })
    }

    async fn maybe_compact(&self, state: AgentState) -> AgentState {
        let Some(compactor) = &self.compactor else {
            return state;
        };
        // The turn being answered, or the newest anchor left after an earlier splice.
        let live = state.live_messages();
        let Some(start) = live
            .iter()
            .rev()
            .find(|m| m.is_human())
            .or_else(|| live.iter().rev().find(|m| m.is_anchor()))
            .map(|m| m.id().clone())
        else {
            return state;
        };
        match compactor.compact(&state, &start).await {
            Ok(Some(outcome)) => outcome.state,
            Ok(None) => state,
            Err(e) => {
                tracing::warn!(error = %e, "compaction failed, continuing with full history");
                state
            }
        }
    }

    /// Drive reason -> route -> dispatch until the loop ends.
    ///
    /// Steps left pending in `state` are dispatched before the first model
    /// call. A state still waiting on a help request is returned as-is; feed
    /// the human's reply through [`RouterEvent::HumanReplied`] first.
    pub async fn run(&self, state: AgentState) -> Result<Transition> {
        let result = self.run_loop(state).await;
        if let Err(e) = &result {
            self.emit(AgentEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    async fn run_loop(&self, state: AgentState) -> Result<Transition> {
        let mut state = state;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if let Some(last) = state.last_step() {
                if !last.is_resolved() && self.kind_of(&last.call) == Some(ToolKind::AskUserForHelp) {
                    return Ok(Transition {
                        state,
                        phase: Phase::Interrupted,
                    });
                }
            }

            if self.route(&state) == Route::Continue {
                state = self.dispatch(&state).await?.state;
                continue;
            }

            state = self.maybe_compact(state).await;
            let transition = self.reason(&state).await?;
            if self.route(&transition.state) == Route::End {
                tracing::debug!(
                    phase = ?transition.phase,
                    iterations = transition.state.iteration,
                    "loop finished"
                );
                return Ok(transition);
            }
            state = transition.state;
        }
    }
}

fn on_tools_resolved(state: &AgentState, outcomes: Vec<ToolOutcome>) -> Transition {
    let mut by_id: HashMap<String, ToolOutcome> = outcomes
        .into_iter()
        .map(|o| (o.call_id.clone(), o))
        .collect();

    let mut next = state.clone();
    for step in next.intermediate_steps.iter_mut().filter(|s| !s.is_resolved()) {
        if let Some(outcome) = by_id.remove(&step.call.id) {
            next.messages.push(outcome.to_message());
            step.result = Some(outcome.content);
        }
    }
    for call_id in by_id.keys() {
        tracing::warn!(call_id = %call_id, "result for unknown or resolved call ignored");
    }

    Transition {
        state: next,
        phase: Phase::Reasoning,
    }
}
