//! `porter import` command - merge a JSON document or ZIP archive into the store

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::*;

use crate::cli::Workspace;
use crate::transfer::{ImportView, PropertyAccess};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// JSON document or ZIP archive to import
    pub file: PathBuf,

    /// Import view as JSON; inferred from the document when omitted
    #[arg(long)]
    pub view: Option<PathBuf>,

    /// Skip validation before saving
    #[arg(long)]
    pub no_validate: bool,

    /// Copy version counters from the source
    #[arg(long)]
    pub optimistic_locking: bool,

    /// Import without writing the store snapshot
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the import command
pub fn run(args: ImportArgs, workspace: &Workspace) -> Result<()> {
    if !args.file.exists() {
        bail!("Import file does not exist: {}", args.file.display());
    }

    let view = args.view.as_deref().map(read_view).transpose()?;

    let mut options = workspace.config.import_options();
    if args.no_validate {
        options.validate = false;
    }
    if args.optimistic_locking {
        options.optimistic_locking = true;
    }

    let bytes = fs::read(&args.file)
        .with_context(|| format!("Failed to read import file: {}", args.file.display()))?;

    let mut service = workspace.service()?;
    let saved = if is_zip(&args.file, &bytes) {
        service.import_entities_from_zip(&bytes, view.as_ref(), options)
    } else {
        let text = String::from_utf8(bytes).context("Import file is not valid UTF-8")?;
        service.import_entities_from_json(&text, view.as_ref(), options)
    }
    .with_context(|| format!("Failed to import {}", args.file.display()))?;

    if args.dry_run {
        println!(
            "{} {} entities would be saved",
            "Dry run:".yellow().bold(),
            saved.len()
        );
    } else {
        service
            .store()
            .flush()
            .context("Failed to write store snapshot")?;
        println!("{} {} entities", "Imported".green().bold(), saved.len());
    }

    for entity in &saved {
        let marker = if entity.is_deleted() {
            " (deleted)".dimmed().to_string()
        } else {
            String::new()
        };
        let version = entity
            .get(crate::metadata::VERSION_PROPERTY)
            .and_then(|v| v.as_int())
            .map(|v| format!(" v{}", v))
            .unwrap_or_default();
        println!("  {} {}{}{}", entity.entity_name().cyan(), entity.id(), version, marker);
    }

    Ok(())
}

fn read_view(path: &Path) -> Result<ImportView> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read view file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse view file: {}", path.display()))
}

fn is_zip(path: &Path, bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}
