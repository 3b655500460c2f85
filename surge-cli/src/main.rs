//! Surge binary entry point

use clap::Parser;
use surge_cli::logging::{init_logging, levels};
use surge_cli::{run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !levels::is_valid_level(&args.log_level) {
        anyhow::bail!(
            "Invalid log level '{}', expected one of: {}",
            args.log_level,
            levels::valid_levels().join(", ")
        );
    }
    let _guard = init_logging(&args.logging_config())?;

    if let Err(e) = run(args).await {
        tracing::error!("Load test failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
