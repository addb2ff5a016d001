use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::cli::output::get_formatter;
use crate::models::{Config, ConversationMessage, OutputFormat};
use crate::services::Pipeline;

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "Question about instructors")]
    pub question: String,

    #[arg(long, help = "JSON file with earlier turns: [{\"role\": ..., \"content\": ...}]")]
    pub history: Option<PathBuf>,
}

fn load_history(path: &PathBuf) -> Result<Vec<ConversationMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("history must be a JSON array of messages: {}", path.display()))
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Searching reviews...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Stream an answer to stdout. A failure after partial output is marked on
/// stderr and returned as an error.
pub async fn handle_ask(
    args: AskArgs,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let config = Config::load()?;

    let mut messages = match args.history {
        Some(ref path) => load_history(path)?,
        None => Vec::new(),
    };
    messages.push(ConversationMessage::user(args.question.clone()));

    let mut pipeline = Pipeline::from_config(&config).context("failed to initialise pipeline")?;
    if verbose {
        pipeline = pipeline.with_observer(|state| eprintln!("[{state}]"));
    }

    let pb = (!verbose).then(spinner);
    let result = pipeline.run(messages, &cancel).await;
    let mut answer = match result {
        Ok(answer) => answer,
        Err(e) => {
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            return Err(e).context("failed to answer question");
        }
    };

    let mut collected = String::new();
    let mut stdout = std::io::stdout();
    let mut spinner = pb;
    while let Some(item) = answer.next().await {
        if let Some(pb) = spinner.take() {
            pb.finish_and_clear();
        }
        match item {
            Ok(chunk) => {
                if format == OutputFormat::Json {
                    collected.push_str(&chunk.text);
                } else {
                    print!("{}", chunk.text);
                    stdout.flush()?;
                }
            }
            Err(e) => {
                println!();
                let marker = format!("answer incomplete after {} chunks: {e}", answer.emitted());
                eprint!("{}", get_formatter(format).format_error(&marker));
                return Err(e).context("answer stream failed");
            }
        }
    }
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    if format == OutputFormat::Json {
        let output = serde_json::json!({
            "question": args.question,
            "answer": collected,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
    }
    Ok(())
}
