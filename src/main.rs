//! trisync CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trisync::{
    commands::{
        cmd_delete, cmd_history, cmd_init, cmd_list_datasets, cmd_status, cmd_sync,
        print_datasets, print_deletion, print_history, print_init_report, print_operation,
        DeleteOptions, InitOptions, SyncCommandOptions,
    },
    config::Config,
    delete::DeleteMode,
    error::Result,
    meta::MetaDb,
    progress::LogWriterFactory,
};

#[derive(Parser)]
#[command(name = "trisync")]
#[command(version, about = "Consistent deletion and cloud sync for graph/vector/relational datasets", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the local databases
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// List datasets
    Datasets,

    /// Delete a document and everything derived from it
    Delete {
        /// Data item id
        data_id: String,

        /// Dataset the item is removed from
        #[arg(short, long)]
        dataset: String,

        /// soft keeps shared entities, hard also removes entities left with one edge
        #[arg(short, long, default_value = "soft")]
        mode: DeleteMode,

        /// Acting user id
        #[arg(short, long, env = "TRISYNC_USER", default_value = "default_user")]
        user: String,
    },

    /// Sync a dataset to the cloud and wait for the run to finish
    Sync {
        /// Dataset id or name
        dataset: String,

        /// Acting user id
        #[arg(short, long, env = "TRISYNC_USER", default_value = "default_user")]
        user: String,

        /// Also remove remote items that no longer exist locally
        #[arg(long)]
        prune: bool,
    },

    /// Show a sync run
    Status {
        /// Run id returned by `sync`
        run_id: String,
    },

    /// List sync runs for a dataset, newest first
    History {
        /// Dataset id
        dataset_id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let base_dir = match &cli.config {
            Some(path) if path.extension().is_some_and(|e| e == "toml") => path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir),
            Some(path) => path.clone(),
            None => Config::default_base_dir(),
        };
        let report = cmd_init(InitOptions { base_dir, force }).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_init_report(&report);
        }
        return Ok(());
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "trisync", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration
    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::connect(&config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Datasets => {
            let datasets = cmd_list_datasets(&db).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&datasets)?);
            } else {
                print_datasets(&datasets);
            }
        }

        Commands::Delete {
            data_id,
            dataset,
            mode,
            user,
        } => {
            let options = DeleteOptions {
                data_id,
                dataset_id: dataset,
                mode,
                user_id: user,
            };
            let result = cmd_delete(&config, &db, options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_deletion(&result);
            }
        }

        Commands::Sync {
            dataset,
            user,
            prune,
        } => {
            let options = SyncCommandOptions {
                dataset,
                user_id: user,
                prune,
            };
            let op = cmd_sync(&config, &db, options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&op)?);
            } else {
                print_operation(&op);
            }
        }

        Commands::Status { run_id } => {
            let op = cmd_status(&config, &db, &run_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&op)?);
            } else {
                print_operation(&op);
            }
        }

        Commands::History { dataset_id } => {
            let ops = cmd_history(&config, &db, &dataset_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ops)?);
            } else {
                print_history(&ops);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'trisync init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
