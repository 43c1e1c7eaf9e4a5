// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // The daemon logs to its own file once it holds the instance lock
    if !matches!(cli.command, Commands::Daemon) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = commands::load_config(cli.config.as_deref(), cli.base_dir, cli.jobs)?;

    match cli.command {
        Commands::Daemon => commands::cmd_daemon(config),
        Commands::CreateRepo { repo } => commands::cmd_create_repo(&config, &repo),
        Commands::DeleteRepo { repo } => commands::cmd_delete_repo(&config, &repo),
        Commands::Include { repo, paths } => commands::cmd_include(&config, &repo, &paths),
        Commands::RemoveSource {
            repo,
            source,
            release,
        } => commands::cmd_remove_source(&config, &repo, &source, release),
        Commands::Copy {
            from,
            to,
            source,
            release,
        } => commands::cmd_copy(&config, &from, &to, &source, release),
        Commands::CherryPick { from, to, package } => {
            commands::cmd_cherry_pick(&config, &from, &to, &package)
        }
        Commands::Delta { repo, package } => {
            commands::cmd_delta(&config, &repo, package.as_deref())
        }
        Commands::Index { repo } => commands::cmd_index(&config, &repo),
        Commands::Jobs { clear_failed } => commands::cmd_jobs(&config, clear_failed),
        Commands::List { repo } => commands::cmd_list(&config, repo.as_deref()),
        Commands::Info { path, files } => commands::cmd_info(&path, files),
    }
}
