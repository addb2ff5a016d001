//! Command-line interface for asking about instructors.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Answer questions about professors from student reviews.
#[derive(Debug, Parser)]
#[command(name = "profrag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ask a question and stream the answer
    Ask(commands::AskArgs),

    /// Show the reviews retrieved for a query, without generating an answer
    Search(commands::SearchArgs),

    /// Run the HTTP chat server
    Serve(commands::ServeArgs),

    /// Check embedding, vector store and generation services
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
