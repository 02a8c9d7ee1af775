//! `porter view` command - infer an import view from a JSON document

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::*;

use crate::cli::Workspace;
use crate::transfer::{ImportView, ImportViewJsonBuilder};

#[derive(clap::Args, Debug)]
pub struct ViewArgs {
    /// JSON document to infer the view from
    pub file: PathBuf,

    /// Write the view as JSON to a file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Print the view as an indented tree instead of JSON
    #[arg(long)]
    pub tree: bool,
}

/// Run the view command
pub fn run(args: ViewArgs, workspace: &Workspace) -> Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read document: {}", args.file.display()))?;
    let view = ImportViewJsonBuilder::new(&workspace.metadata)
        .infer_view_from_str(&text)
        .with_context(|| format!("Failed to infer a view from {}", args.file.display()))?;

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&view)?;
        fs::write(output, json)
            .with_context(|| format!("Failed to write view file: {}", output.display()))?;
        eprintln!("{} {}", "Wrote view to".green(), output.display());
    }

    if args.tree {
        println!("{}", view.entity.bright_green().bold());
        for line in render_tree(&view, 1) {
            println!("{}", line);
        }
    } else if args.output.is_none() {
        println!("{}", serde_json::to_string_pretty(&view)?);
    }

    Ok(())
}

/// One line per view property, nested views indented below their property
fn render_tree(view: &ImportView, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();

    for property in &view.properties {
        match &property.view {
            Some(nested) => {
                lines.push(format!(
                    "{}{} {} [{}]",
                    indent,
                    property.name,
                    nested.entity.cyan(),
                    property.collection_import_policy.label().dimmed()
                ));
                lines.extend(render_tree(nested, depth + 1));
            }
            None => lines.push(format!(
                "{}{} [{}]",
                indent,
                property.name,
                property.reference_import_behaviour.label().dimmed()
            )),
        }
    }

    lines
}
