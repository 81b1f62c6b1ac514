use anyhow::{Context, Result};
use clap::Parser;
use securefm::{Config, MetadataDb, SandboxBuilder, Shell};
use std::io;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = Config::parse();

    // Logs go to stderr so they never interleave with shell output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("securefm=info")),
        )
        .with_writer(io::stderr)
        .init();

    let sandbox = SandboxBuilder::new(config.sandbox.clone())
        .max_file_size(config.max_file_size)
        .verify_symlinks(!config.no_symlink_check)
        .build()
        .with_context(|| format!("Failed to open sandbox at {}", config.sandbox.display()))?;

    let db = if config.db == ":memory:" {
        MetadataDb::new_in_memory()?
    } else {
        MetadataDb::open(&config.db)?
    };

    let owner = config.owner();
    info!(owner = %owner, db = %config.db, "starting session");

    let mut shell = Shell::new(&sandbox, owner).with_metadata(&db);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shell
        .run(stdin.lock(), &mut stdout)
        .context("Shell terminated unexpectedly")?;

    Ok(())
}
