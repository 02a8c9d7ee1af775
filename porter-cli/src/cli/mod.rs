//! CLI module: argument parsing, shared setup and command dispatch

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::metadata::Metadata;
use crate::store::MemoryStore;
use crate::transfer::EntityImportExport;

#[derive(Parser, Debug)]
#[command(name = "porter", version, about = "Import and export entity graphs")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Config file (default: porter/config.toml in the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store snapshot file, overriding the config
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Entity definition file, overriding the config (repeatable)
    #[arg(long = "metadata", short = 'm', global = true)]
    pub metadata: Vec<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a JSON document or ZIP archive into the store
    Import(commands::import::ImportArgs),

    /// Export entities of one class as JSON or ZIP
    Export(commands::export::ExportArgs),

    /// Infer an import view from a JSON document
    View(commands::view::ViewArgs),

    /// List entity classes or describe one
    Entities(commands::entities::EntitiesArgs),
}

/// Configuration and metamodel shared by all commands
pub struct Workspace {
    pub config: Config,
    pub metadata: Arc<Metadata>,
}

impl Workspace {
    /// Apply command-line overrides and load the entity definitions
    pub fn open(mut config: Config, global: &GlobalOpts) -> Result<Self> {
        if let Some(store) = &global.store {
            config.store.path = store.clone();
        }
        if !global.metadata.is_empty() {
            config.metadata.paths = global.metadata.clone();
        }
        if config.metadata.paths.is_empty() {
            bail!("No entity definitions configured. Pass --metadata or set metadata.paths in the config");
        }

        let metadata = Metadata::load_files(&config.metadata.paths)
            .context("Failed to load entity definitions")?;
        log::info!("Loaded {} entity classes", metadata.class_names().len());

        Ok(Workspace {
            config,
            metadata: Arc::new(metadata),
        })
    }

    pub fn open_store(&self) -> Result<MemoryStore> {
        let path = &self.config.store.path;
        MemoryStore::open(self.metadata.clone(), path)
            .with_context(|| format!("Failed to open store {}", path.display()))
    }

    pub fn service(&self) -> Result<EntityImportExport<MemoryStore>> {
        Ok(
            EntityImportExport::new(self.metadata.clone(), self.open_store()?)
                .with_serialize_options(self.config.serialize_options()),
        )
    }
}

/// Run a parsed command line against a loaded configuration
pub fn run(cli: Cli, config: Config) -> Result<()> {
    if cli.global.no_color {
        colored::control::set_override(false);
    }

    let workspace = Workspace::open(config, &cli.global)?;

    match cli.command {
        Commands::Import(args) => commands::import::run(args, &workspace),
        Commands::Export(args) => commands::export::run(args, &workspace),
        Commands::View(args) => commands::view::run(args, &workspace),
        Commands::Entities(args) => commands::entities::run(args, &workspace),
    }
}

/// Workspace over a small Customer/Tag model with its store under `dir`
#[cfg(test)]
pub(crate) fn make_workspace(dir: &std::path::Path) -> Workspace {
    let definitions = dir.join("model.toml");
    std::fs::write(
        &definitions,
        r#"
[[entity]]
name = "Tag"
id_type = "string"

[[entity.property]]
name = "label"
kind = "datatype"
datatype = "string"

[[entity]]
name = "Customer"
id_type = "string"
versioned = true
instance_name = "name"

[[entity.property]]
name = "name"
kind = "datatype"
datatype = "string"
required = true

[[entity.property]]
name = "version"
kind = "datatype"
datatype = "integer"

[[entity.property]]
name = "tags"
kind = "association"
class = "Tag"
cardinality = "many_to_many"
"#,
    )
    .unwrap();

    let global = GlobalOpts {
        store: Some(dir.join("store.json")),
        metadata: vec![definitions],
        ..GlobalOpts::default()
    };
    Workspace::open(Config::default(), &global).unwrap()
}
