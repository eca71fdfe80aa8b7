//! Interactive prompt optimization from the terminal.
//!
//! Run against a local scripted agent with:
//!   cargo run -p optimize-cli -- --mock "a fox in the snow"
//!
//! or point it at a real service with `--api-url` and `--ws-url`
//! (also read from `OPTIMIZER_API_URL` / `OPTIMIZER_WS_URL`).

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use optimizer_core::{
    AgentEvent, Attachment, InvalidAnswer, OptimizationResult, OptimizeMode, Question,
    SessionUpdate, TaskSpec,
};
use optimizer_session::{ClientConfig, MemoryLibrary, SessionManager, SubmitError};
use optimizer_transport::mock::{MockAgent, RunningMockAgent, Script};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Text,
    Image,
    Video,
}

impl From<Mode> for OptimizeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Text => Self::Text,
            Mode::Image => Self::Image,
            Mode::Video => Self::Video,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "optimize", about = "Optimize a prompt with an interactive agent")]
struct Args {
    /// What the prompt should achieve.
    description: String,

    #[arg(long, value_enum, default_value = "text")]
    mode: Mode,

    /// Prompt to improve instead of writing one from scratch.
    #[arg(long)]
    existing_prompt: Option<String>,

    #[arg(long)]
    aspect_ratio: Option<String>,

    /// Reference file to upload with the task.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,

    #[arg(long, env = "OPTIMIZER_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "OPTIMIZER_WS_URL")]
    ws_url: Option<String>,

    /// Give up on an unanswered question after this many seconds.
    #[arg(long)]
    answer_timeout: Option<u64>,

    /// Run against a local scripted agent.
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = args.api_url.clone() {
        config.api_base_url = url;
    }
    if let Some(url) = args.ws_url.clone() {
        config.ws_base_url = url;
    }
    if args.answer_timeout.is_some() {
        config.answer_timeout_secs = args.answer_timeout;
    }

    // Held for the whole run; dropping it stops the server.
    let _mock: Option<RunningMockAgent> = if args.mock {
        let agent = MockAgent::new(demo_script()).serve().await?;
        config.api_base_url = agent.http_url();
        config.ws_base_url = agent.ws_url();
        Some(agent)
    } else {
        None
    };

    let task = build_task(&args).await?;
    let library = Arc::new(MemoryLibrary::new());
    let manager = SessionManager::from_config(&config)?.with_library(library);

    let handle = manager
        .start_session(&task)
        .await
        .context("could not start session")?;
    println!("Session {}", handle.id());

    let mut updates = handle.updates();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<Question> = None;

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                if let SessionUpdate::Event { event: AgentEvent::Question(question) } = &update {
                    pending = Some(question.clone());
                }
                render(&update);
            }
            line = stdin.next_line(), if pending.is_some() => {
                let Some(question) = pending.clone() else { continue };
                let Some(line) = line? else {
                    println!("No more input, cancelling.");
                    handle.cancel();
                    pending = None;
                    continue;
                };
                let text = pick_option(&question, &line);
                match handle.submit_answer(&question.question_id, &text).await {
                    Ok(()) => pending = None,
                    Err(SubmitError::Invalid(InvalidAnswer::EmptyAnswer)) => {
                        println!("Please type an answer.");
                    }
                    Err(e) => {
                        println!("Could not send answer: {e}");
                        pending = None;
                    }
                }
            }
        }
    }

    let snapshot = handle.snapshot();
    manager.shutdown().await;
    if snapshot.data.result.is_none() {
        bail!(
            "session ended without a result: {}",
            snapshot.data.error.as_deref().unwrap_or("connection closed")
        );
    }
    Ok(())
}

async fn build_task(args: &Args) -> anyhow::Result<TaskSpec> {
    let mut task = TaskSpec::new(args.description.clone()).with_mode(args.mode.into());
    if let Some(prompt) = &args.existing_prompt {
        task = task.with_existing_prompt(prompt.clone());
    }
    task.aspect_ratio.clone_from(&args.aspect_ratio);
    for path in &args.attachments {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned());
        task = task.with_attachment(Attachment::from_bytes(name, mime_for(path), &data));
    }
    Ok(task)
}

fn mime_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("txt" | "md") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// A bare number selects one of the offered options.
fn pick_option(question: &Question, line: &str) -> String {
    let line = line.trim();
    question
        .options
        .as_ref()
        .and_then(|options| {
            let index: usize = line.parse().ok()?;
            options.get(index.checked_sub(1)?).cloned()
        })
        .unwrap_or_else(|| line.to_string())
}

fn render(update: &SessionUpdate) {
    match update {
        SessionUpdate::Event { event } => match event {
            AgentEvent::Progress(p) => println!("[{}] {}", p.step, p.message),
            AgentEvent::ToolCalled(call) => match &call.result_summary {
                Some(summary) => println!("  -> {}: {summary}", call.tool),
                None => println!("  -> {}", call.tool),
            },
            AgentEvent::Question(q) => {
                println!("\n? {}\n  ({})", q.question, q.reason);
                for (i, option) in q.options.iter().flatten().enumerate() {
                    println!("  {}. {option}", i + 1);
                }
                println!("Answer:");
            }
            AgentEvent::Completed { result } => print_result(result),
            AgentEvent::Error { message } => println!("Agent error: {message}"),
        },
        SessionUpdate::Rejected { reason } => tracing::warn!("Ignored: {reason}"),
        SessionUpdate::Closed {
            unexpected: true,
            reason,
        } => match reason {
            Some(reason) => println!("Connection lost: {reason}"),
            None => println!("Connection lost."),
        },
        SessionUpdate::Phase { from, to } => tracing::debug!("{from} -> {to}"),
        SessionUpdate::AnswerSent { .. }
        | SessionUpdate::Closed { .. }
        | SessionUpdate::Finished => {}
    }
}

fn print_result(result: &OptimizationResult) {
    println!(
        "\nScore {:.1} -> {:.1} ({:+.1})",
        result.original_score,
        result.optimized_score,
        result.score_delta()
    );
    println!("\n{}\n", result.optimized_prompt);
    for improvement in &result.improvements {
        println!("  * {improvement}");
    }
    for tip in result.tips.iter().flatten() {
        println!("  tip: {tip}");
    }
}

fn demo_script() -> Script {
    let question = Question {
        question_id: "style".to_string(),
        question: "Which visual style should the prompt aim for?".to_string(),
        reason: "The description does not name one".to_string(),
        options: Some(vec![
            "photorealistic".to_string(),
            "watercolour".to_string(),
            "flat illustration".to_string(),
        ]),
    };
    let mut args = serde_json::Map::new();
    args.insert("criteria".to_string(), "clarity".into());
    Script::new()
        .send(progress(1, "Scoring the current prompt"))
        .send(AgentEvent::ToolCalled(optimizer_core::ToolCallRecord {
            tool: "score_prompt".to_string(),
            args,
            result_summary: Some("4.5 / 10".to_string()),
        }))
        .send(AgentEvent::Question(question))
        .await_answer()
        .send(progress(2, "Rewriting with the chosen style"))
        .pause(Duration::from_millis(300))
        .send(AgentEvent::Completed {
            result: OptimizationResult {
                optimized_prompt: "A red fox leaping through fresh snow at golden hour, \
                                   shallow depth of field"
                    .to_string(),
                original_score: 4.5,
                optimized_score: 8.5,
                improvements: vec![
                    "Named the subject's colour".to_string(),
                    "Added lighting and lens detail".to_string(),
                ],
                tips: Some(vec!["Add an aspect ratio for wide shots".to_string()]),
                parameters: None,
                reasoning: None,
            },
        })
}

fn progress(step: u32, message: &str) -> AgentEvent {
    AgentEvent::Progress(optimizer_core::ProgressUpdate {
        step,
        message: message.to_string(),
    })
}
