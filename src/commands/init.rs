//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::SqliteGraphStore;
use crate::meta::MetaDb;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
}

/// What init created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub graph_path: String,
    pub overwritten: bool,
}

/// Write the default config and create both local databases
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions { base_dir, force } = options;

    let config_path = base_dir.join("config.toml");
    let existed = config_path.exists();
    if existed && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.paths = Config::paths_for(base_dir.clone(), config_path);
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    SqliteGraphStore::new(&config.paths.graph_file).await?;

    info!("Initialized trisync in {:?}", base_dir);

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        graph_path: config.paths.graph_file.display().to_string(),
        overwritten: existed,
    })
}

pub fn print_init_report(report: &InitReport) {
    if report.overwritten {
        println!("✓ trisync re-initialized (config overwritten)");
    } else {
        println!("✓ trisync initialized successfully");
    }
    println!("  Config: {}", report.config_path);
    println!("  Metadata DB: {}", report.db_path);
    println!("  Graph DB: {}", report.graph_path);
    println!("\nNext steps:");
    println!("  1. Set the cloud URL and API key env var in the config file");
    println!("  2. Start Qdrant: docker run -p 6334:6334 qdrant/qdrant");
    println!("  3. Sync a dataset: trisync sync <DATASET>");
}
