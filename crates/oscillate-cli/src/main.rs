//! oscillate - operator CLI for the oscillate audio engine
//!
//! Diagnostics, database maintenance and the container probes.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use oscillate_core::GuildId;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "oscillate")]
#[command(author, version, about = "oscillate audio engine CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OSCILLATE_CLI_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, global = true)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check ffmpeg and libopus
    Diagnose {
        /// ffmpeg executable
        #[arg(long)]
        ffmpeg_path: Option<String>,
    },

    /// Export guild data from the database
    ExportData {
        /// Guild to export
        #[arg(long)]
        guild_id: GuildId,

        /// Database file
        #[arg(long, env = "OSCILLATE_DB_PATH")]
        db_path: Option<PathBuf>,

        /// Output file (default: guild_<id>_export.json)
        #[arg(short = 'o', long = "output-file")]
        output_file: Option<PathBuf>,
    },

    /// Import guild data into the database
    ImportData {
        /// Export file written by export-data
        file: PathBuf,

        /// Database file
        #[arg(long, env = "OSCILLATE_DB_PATH")]
        db_path: Option<PathBuf>,
    },

    /// Delete old play history
    Cleanup {
        /// Database file
        #[arg(long, env = "OSCILLATE_DB_PATH")]
        db_path: Option<PathBuf>,

        /// Days of history to keep
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Show guild statistics
    Stats {
        /// Guild to report on
        #[arg(long)]
        guild_id: GuildId,

        /// Database file
        #[arg(long, env = "OSCILLATE_DB_PATH")]
        db_path: Option<PathBuf>,
    },

    /// Show package information
    Info,

    /// Container health check; prints OK
    Health {
        /// Also check a running daemon (uses the configured server when no
        /// URL is given)
        #[arg(long, num_args = 0..=1)]
        server: Option<Option<String>>,

        /// Database file whose directory must be writable
        #[arg(long, env = "OSCILLATE_DB_PATH")]
        db_path: Option<PathBuf>,
    },

    /// Print the readiness line and exit
    Ready,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Probes never depend on a user config file
    match &cli.command {
        Commands::Ready => {
            commands::ready();
            return Ok(());
        }
        Commands::Health {
            server: None,
            db_path,
        } => return commands::health(None, db_path.as_deref()).await,
        _ => {}
    }

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    match &cli.command {
        Commands::Diagnose { ffmpeg_path } => {
            let merged = config.merge_with_args(None, cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            let ffmpeg_path = ffmpeg_path.as_deref().or(merged.ffmpeg_path.as_deref());
            if !commands::diagnose(ffmpeg_path, &ctx).await? {
                std::process::exit(1);
            }
        }

        Commands::ExportData {
            guild_id,
            db_path,
            output_file,
        } => {
            let merged = config.merge_with_args(db_path.as_deref(), cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            commands::export_data(&merged.db_path, *guild_id, output_file.as_deref(), &ctx)
                .await?;
        }

        Commands::ImportData { file, db_path } => {
            let merged = config.merge_with_args(db_path.as_deref(), cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            commands::import_data(file, &merged.db_path, &ctx).await?;
        }

        Commands::Cleanup { db_path, days } => {
            let merged = config.merge_with_args(db_path.as_deref(), cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            commands::cleanup(&merged.db_path, *days, &ctx).await?;
        }

        Commands::Stats { guild_id, db_path } => {
            let merged = config.merge_with_args(db_path.as_deref(), cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            commands::stats(&merged.db_path, *guild_id, &ctx).await?;
        }

        Commands::Info => {
            let merged = config.merge_with_args(None, cli.output, cli.no_color);
            let ctx = OutputContext::new(merged.output, merged.no_color);
            commands::info(&ctx)?;
        }

        Commands::Health {
            server: Some(server),
            db_path,
        } => {
            let merged = config.merge_with_args(None, cli.output, cli.no_color);
            let server = server.as_deref().unwrap_or(&merged.server);
            commands::health(Some(server), db_path.as_deref()).await?;
        }

        Commands::Ready | Commands::Health { server: None, .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_export_output_file_and_format() {
        let cli = Cli::try_parse_from([
            "oscillate",
            "export-data",
            "--guild-id",
            "42",
            "-o",
            "out.json",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.output, Some(OutputFormat::Json));
        match cli.command {
            Commands::ExportData {
                guild_id,
                output_file,
                ..
            } => {
                assert_eq!(guild_id, 42);
                assert_eq!(output_file, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected export-data"),
        }
    }

    #[test]
    fn test_cleanup_default_days() {
        let cli = Cli::try_parse_from(["oscillate", "cleanup"]).unwrap();
        assert!(matches!(cli.command, Commands::Cleanup { days: 30, .. }));
    }

    #[test]
    fn test_health_server_flag() {
        let cli = Cli::try_parse_from(["oscillate", "health"]).unwrap();
        assert!(matches!(cli.command, Commands::Health { server: None, .. }));

        let cli = Cli::try_parse_from(["oscillate", "health", "--server"]).unwrap();
        assert!(matches!(cli.command, Commands::Health { server: Some(None), .. }));

        let cli =
            Cli::try_parse_from(["oscillate", "health", "--server", "http://daemon:8000"]).unwrap();
        match cli.command {
            Commands::Health {
                server: Some(Some(url)),
                ..
            } => assert_eq!(url, "http://daemon:8000"),
            _ => panic!("expected health --server URL"),
        }
    }

    #[test]
    fn test_stats_requires_guild() {
        assert!(Cli::try_parse_from(["oscillate", "stats"]).is_err());
    }
}
