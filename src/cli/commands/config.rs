use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Initialize configuration file")]
    Init {
        #[arg(
            long,
            short = 'g',
            help = "Create global config instead of ./.profrag.toml"
        )]
        global: bool,
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show configuration file paths")]
    Path,
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { global, force } => handle_init(global, force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(format),
        ConfigCommand::Path => handle_path(),
    }
}

fn handle_init(global: bool, force: bool, formatter: &dyn Formatter) -> Result<()> {
    let existing = if global {
        Config::global_path().filter(|p| p.exists())
    } else {
        Config::find_project_config()
    };

    if let Some(path) = existing
        && !force
    {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let path = if global {
        Config::init_global().context("failed to create global config")?
    } else {
        Config::init_project().context("failed to create project config")?
    };
    print!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

/// API keys are loaded from the environment and never printed.
fn handle_show(format: OutputFormat) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }

    let keys = [
        ("embedding", config.embedding.api_key.is_some()),
        ("vector_store", config.vector_store.api_key.is_some()),
        ("generation", config.generation.api_key.is_some()),
    ];
    for (section, present) in keys {
        if !present {
            eprintln!("Note: no API key set for [{section}]");
        }
    }
    Ok(())
}

fn handle_path() -> Result<()> {
    println!("Configuration paths:");
    println!();

    match Config::find_project_config() {
        Some(path) => println!("Project config (active): {}", path.display()),
        None => println!("Project config: ./.profrag.toml (not present)"),
    }

    if let Some(path) = Config::global_path() {
        let state = if path.exists() { "active" } else { "not present" };
        println!("Global config ({state}): {}", path.display());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        }
    }
    Ok(())
}
