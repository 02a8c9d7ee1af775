//! `porter export` command - serialize entities of one class

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use colored::*;

use crate::cli::Workspace;
use crate::metadata::EntityMeta;
use crate::store::{DataStore, LoadOptions};
use crate::transfer::{Entity, EntityId, FetchPlan};

#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Entity class to export
    pub entity: String,

    /// Id of an entity to export (repeatable); all entities when omitted
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Fetch plan: `local`, `minimal` or a JSON plan file
    #[arg(long, default_value = "local")]
    pub plan: String,

    /// Output file; JSON goes to stdout when omitted
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Write a ZIP archive with a single entry
    #[arg(long)]
    pub zip: bool,

    /// Include soft-deleted entities when exporting a whole class
    #[arg(long)]
    pub include_deleted: bool,
}

/// Run the export command
pub fn run(args: ExportArgs, workspace: &Workspace) -> Result<()> {
    let meta = workspace
        .metadata
        .class(&args.entity)
        .ok_or_else(|| anyhow!("Unknown entity '{}'", args.entity))?;
    let plan = resolve_plan(&args.plan, meta)?;

    if args.zip && args.output.is_none() {
        bail!("--zip needs an --output file");
    }

    let service = workspace.service()?;
    let entities = if args.ids.is_empty() {
        let options = LoadOptions {
            include_deleted: args.include_deleted,
        };
        service.store().load_list(&meta.name, options)?
    } else {
        args.ids
            .iter()
            .map(|id| parse_id(id, meta).map(|id| Entity::detached(&meta.name, id)))
            .collect::<Result<Vec<_>>>()?
    };

    if entities.is_empty() {
        eprintln!("{}", format!("No {} entities to export", meta.name).yellow());
    }

    match &args.output {
        Some(output) if args.zip => {
            let bytes = service
                .export_entities_to_zip(&entities, Some(&plan))
                .context("Failed to export entities")?;
            write_output(output, &bytes)?;
        }
        Some(output) => {
            let json = service
                .export_entities_to_json(&entities, Some(&plan))
                .context("Failed to export entities")?;
            write_output(output, json.as_bytes())?;
        }
        None => {
            let json = service
                .export_entities_to_json(&entities, Some(&plan))
                .context("Failed to export entities")?;
            println!("{}", json);
            return Ok(());
        }
    }

    if let Some(output) = &args.output {
        eprintln!(
            "{} {} {} entities to {}",
            "Exported".green().bold(),
            entities.len(),
            meta.name.cyan(),
            output.display()
        );
    }
    Ok(())
}

fn resolve_plan(plan: &str, meta: &EntityMeta) -> Result<FetchPlan> {
    match plan {
        "local" => Ok(FetchPlan::local(meta)),
        "minimal" => Ok(FetchPlan::minimal(meta)),
        path => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read plan file: {}", path))?;
            let plan: FetchPlan = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse plan file: {}", path))?;
            if plan.entity != meta.name {
                bail!(
                    "Plan file {} is for entity '{}', not '{}'",
                    path,
                    plan.entity,
                    meta.name
                );
            }
            Ok(plan)
        }
    }
}

fn parse_id(id: &str, meta: &EntityMeta) -> Result<EntityId> {
    EntityId::from_json(&serde_json::Value::String(id.to_string()), meta.id_type)
        .map_err(|e| anyhow!("Invalid id for {}: {}", meta.name, e))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
