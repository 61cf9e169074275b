//! weave - replay and inspect tool-calling conversations

mod config;
mod tools;
mod transcript;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use weave_agent::compaction::{find_window_boundary, should_compact};
use weave_agent::{
    AgentEvent, Compactor, HeuristicCounter, ParallelExecutor, Phase, Router, RouterEvent,
    TokenCounter, Transition,
};
use weave_ai::{ModelResponse, ScriptedModel};

use crate::config::Config;
use crate::transcript::Transcript;
use crate::utils::truncate_chars;

/// weave - tool-calling orchestration core
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the reasoning loop over a recorded model transcript
    Replay {
        /// Transcript JSON file
        transcript: PathBuf,

        /// Override the configured iteration bound
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Cap on tool calls dispatched at once
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// Report whether a saved conversation would be compacted, and where
    Compact {
        /// Conversation JSON file (agent state or message list)
        conversation: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = Config::init().context("failed to create config file")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = Config::load();
    match args.command {
        Some(Command::Replay {
            transcript,
            max_iterations,
            max_concurrency,
        }) => replay(cfg, &transcript, max_iterations, max_concurrency).await,
        Some(Command::Compact { conversation }) => inspect_compaction(&cfg, &conversation),
        None => {
            Args::command().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("weave_ai=debug,weave_agent=debug,weave_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn replay(
    mut cfg: Config,
    path: &Path,
    max_iterations: Option<u32>,
    max_concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let transcript = Transcript::load(path)?;
    if let Some(n) = max_iterations {
        cfg.router.max_iterations = n;
    }
    if let Some(n) = max_concurrency {
        cfg.executor.max_concurrency = Some(n);
    }
    cfg.router.system_prompt = transcript
        .system_prompt
        .clone()
        .or_else(|| cfg.system_prompt());

    let toolkit = Arc::new(tools::default_toolkit()?);
    let model = Arc::new(ScriptedModel::new(transcript.responses.clone()));
    let mut router = Router::new(cfg.router.clone(), toolkit, model.clone())
        .with_executor(ParallelExecutor::new(cfg.executor.clone()));
    if !transcript.summaries.is_empty() {
        let summarizer = Arc::new(ScriptedModel::new(
            transcript.summaries.iter().map(ModelResponse::text),
        ));
        router = router.with_compactor(Compactor::new(cfg.compaction.clone(), summarizer));
    }

    let mut receiver = router.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut state = transcript.initial_state();
    let mut replies = transcript.replies.into_iter();
    let outcome = loop {
        let done = match router.run(state).await {
            Ok(done) => done,
            Err(e) => break Err(e),
        };
        if done.phase == Phase::Interrupted {
            if let Some(reply) = replies.next() {
                println!("you> {}", reply);
                match router.transition(&done.state, RouterEvent::HumanReplied(reply)) {
                    Ok(resumed) => {
                        state = resumed.state;
                        continue;
                    }
                    Err(e) => break Err(e),
                }
            }
        }
        break Ok(done);
    };

    // Dropping the router closes the event channel and stops the printer.
    drop(router);
    let _ = printer.await;

    let done = outcome.context("replay failed")?;
    print_outcome(&done);
    println!(
        "[{} iterations, {} model calls, {} responses unused]",
        done.state.iteration,
        model.call_count(),
        model.remaining()
    );
    Ok(())
}

fn print_outcome(done: &Transition) {
    let last_step = done.state.last_step();
    match done.phase {
        Phase::FinalAnswer => {
            println!("\n{}", done.state.final_answer_text().unwrap_or_default());
        }
        Phase::Interrupted => {
            let question = last_step
                .and_then(|s| s.call.arguments.get("question"))
                .and_then(|q| q.as_str())
                .unwrap_or("(no question)");
            println!("\n[Waiting for input: {}]", question);
        }
        Phase::MaxIterationsExceeded => {
            let notice = last_step.and_then(|s| s.result.clone()).unwrap_or_default();
            println!("\n[{}]", notice);
        }
        other => println!("\n[Stopped in phase {:?}]", other),
    }
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::ReasoningStart { iteration } => {
            println!("[Reasoning, iteration {}]", iteration);
        }
        AgentEvent::ToolCallsRequested { calls } => {
            for call in calls {
                println!(
                    "-> {}({})",
                    call.name,
                    truncate_chars(&call.arguments.to_string(), 120)
                );
            }
        }
        AgentEvent::ToolExecutionStart { tool_name, .. } => {
            println!("[Running {}...]", tool_name);
        }
        AgentEvent::ToolExecutionUpdate {
            tool_name, content, ..
        } => {
            println!("[{}: {}]", tool_name, content);
        }
        AgentEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error,
            ..
        } => {
            if *is_error {
                println!("[{} failed: {}]", tool_name, result);
            } else {
                println!("[{}: {}]", tool_name, truncate_chars(result, 200));
            }
        }
        AgentEvent::ArgumentsRejected {
            tool_name, message, ..
        } => {
            println!("[{} rejected: {}]", tool_name, truncate_chars(message, 200));
        }
        AgentEvent::TaskFailed {
            tool_call_id,
            error,
        } => {
            eprintln!("[Task {} failed: {}]", tool_call_id, error);
        }
        AgentEvent::CompactionStart { tokens_before } => {
            println!("[Compacting context (~{} tokens)]", tokens_before);
        }
        AgentEvent::CompactionEnd {
            tokens_before,
            tokens_after,
        } => {
            println!("[Compacted: ~{} -> ~{} tokens]", tokens_before, tokens_after);
        }
        AgentEvent::MaxIterationsExceeded { iterations } => {
            println!("[Iteration bound reached after {} model calls]", iterations);
        }
        AgentEvent::Error { message } => {
            eprintln!("Error: {}", message);
        }
        AgentEvent::TaskCompleted { .. }
        | AgentEvent::FinalAnswer { .. }
        | AgentEvent::Interrupted { .. } => {}
    }
}

fn inspect_compaction(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let state = transcript::load_conversation(path)?;
    let live = state.live_messages();
    let counter = HeuristicCounter;
    let compaction = &cfg.compaction;

    println!("messages: {} ({} live)", state.messages.len(), live.len());
    println!(
        "human messages: {}",
        live.iter().filter(|m| m.is_human()).count()
    );
    println!(
        "estimated tokens: {} (window {})",
        counter.count(live),
        compaction.window_size
    );
    println!(
        "should compact: {}",
        should_compact(live, &counter, compaction)
    );
    match find_window_boundary(
        live,
        compaction.window_max_messages,
        compaction.window_max_tokens,
    ) {
        Some(id) => {
            let position = state.position(&id).map(|i| i + 1).unwrap_or_default();
            println!(
                "window boundary: {} (message {} of {})",
                id,
                position,
                state.messages.len()
            );
        }
        None => println!("window boundary: none (the newest message exceeds the window budget)"),
    }
    Ok(())
}
