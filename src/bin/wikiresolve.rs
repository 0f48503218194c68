//! Command-line wrapper: resolve names (or ids) and print the result as JSON.
//!
//! Configuration comes from ~/.wikiresolve/config.json plus the
//! `WIKIRESOLVE_*` environment overrides. `RUST_LOG` controls logging.

use std::time::Duration;

use clap::Parser;

use wikiresolve::{load_config, BatchOptions, Resolver};

#[derive(Parser)]
#[command(name = "wikiresolve", version, arg_required_else_help = true)]
struct Cli {
    /// Treat inputs as entity ids (Q296) instead of names
    #[arg(long)]
    ids: bool,

    /// Overall budget for a name batch, in seconds
    #[arg(long, value_name = "SECS", conflicts_with = "ids")]
    deadline: Option<u64>,

    /// Names, or ids with --ids
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let resolver = Resolver::from_config(&config)?;

    let result = if cli.ids {
        resolver.resolve_ids(&cli.inputs).await?
    } else {
        let options = BatchOptions {
            deadline: cli.deadline.map(Duration::from_secs),
            ..BatchOptions::default()
        };
        resolver.resolve_batch(&cli.inputs, options).await?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_complete() {
        log::info!("{} names unresolved", result.unresolved.len());
    }
    Ok(())
}
