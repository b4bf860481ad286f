//! Main module for the Asesor binary.
//!
//! Loads `.env`, initializes tracing, parses the command line and dispatches
//! to the HTTP server, a one-shot question, or config initialization.
//!
//! # Examples
//!
//! ```sh
//! asesor serve --port 8000
//! asesor ask --texto "¿Cuánto es 2+2?"
//! asesor init
//! ```

use asesor::{commands, config, server};
use clap::Parser;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::io;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<ExitCode, Box<dyn Error>> {
    dotenv::dotenv().ok();
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Parse arguments, load configuration and run the chosen subcommand.
async fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli = commands::Cli::parse();

    match cli.command {
        commands::Commands::Serve { credentials, port } => {
            let settings = config::resolve_config(cli.config.as_deref())?;
            debug!("Config loaded: {:?}", settings);
            let router = server::connect(&settings, &credentials.into()).await?;
            server::serve(router, port).await?;
        }
        commands::Commands::Ask {
            credentials,
            question,
        } => {
            let settings = config::resolve_config(cli.config.as_deref())?;
            let router = server::connect(&settings, &credentials.into()).await?;
            let submission = question.into_submission().await?;
            let status =
                commands::ask(&router, &submission, &mut io::stdout(), &mut io::stderr()).await?;
            return Ok(ExitCode::from(status));
        }
        commands::Commands::Init => {
            let path = config::config_path(cli.config.as_deref())?;
            let (config_path, template_path) = config::write_defaults(&path)?;
            println!("Wrote {}", config_path.display());
            println!("Wrote {}", template_path.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}
