use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{SearchReport, get_formatter};
use crate::models::{Config, MAX_TOP_K, OutputFormat};
use crate::services::{Retriever, create_backend, create_embedder};
use crate::utils::RetryConfig;

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'n', help = "Maximum number of reviews to return")]
    pub limit: Option<u32>,
}

/// Embed and retrieve only, without generation.
pub async fn handle_search(args: SearchArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let config = Config::load()?;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let limit = args.limit.unwrap_or(config.vector_store.top_k);
    if limit == 0 || limit > MAX_TOP_K {
        anyhow::bail!("limit must be between 1 and {MAX_TOP_K}");
    }

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Limit: {limit}");
        eprintln!(
            "  Index: {} (namespace {})",
            config.vector_store.index, config.vector_store.namespace
        );
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = create_backend(&config.vector_store)?;
    let retriever = Retriever::new(store)
        .with_retry(RetryConfig::with_retries(config.vector_store.max_retries));
    let cancel = CancellationToken::new();

    let embed_start = Instant::now();
    let vector = embedder
        .embed(query, &cancel)
        .await
        .context("failed to generate query embedding")?;
    let embed_ms = embed_start.elapsed().as_millis();

    let search_start = Instant::now();
    let results = retriever
        .retrieve(&vector, limit as usize, &cancel)
        .await
        .context("search failed")?;
    let search_ms = search_start.elapsed().as_millis();

    if verbose {
        eprintln!("Timing:");
        eprintln!("  Embedding: {embed_ms}ms");
        eprintln!("  Search: {search_ms}ms");
        eprintln!();
    }

    let report = SearchReport {
        query: query.to_string(),
        results,
        duration_ms: start_time.elapsed().as_millis() as u64,
    };
    print!("{}", formatter.format_search_results(&report));

    Ok(())
}
