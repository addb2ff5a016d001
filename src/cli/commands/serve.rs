use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::models::Config;
use crate::server;
use crate::services::Pipeline;

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, short = 'b', help = "Address to bind, e.g. 127.0.0.1:3000")]
    pub bind: Option<String>,

    #[arg(long, help = "Per-request deadline in seconds")]
    pub timeout: Option<u64>,
}

/// Run the HTTP server until `shutdown` resolves.
pub async fn handle_serve(
    args: ServeArgs,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.timeout.is_some() {
        config.server.request_timeout_secs = args.timeout;
    }

    let pipeline = Pipeline::from_config(&config).context("failed to initialise pipeline")?;
    eprintln!("Serving on http://{}", config.server.bind);
    eprintln!("  POST /api/chat   GET /health");

    server::serve(Arc::new(pipeline), &config.server, shutdown)
        .await
        .with_context(|| format!("server on {} failed", config.server.bind))?;

    eprintln!("Server stopped");
    Ok(())
}
