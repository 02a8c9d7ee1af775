//! `porter entities` command - list entity classes or describe one

use anyhow::{Result, anyhow};
use colored::*;

use crate::cli::Workspace;
use crate::metadata::{Cardinality, EntityMeta, PropertyMeta, PropertyRange};
use crate::store::{DataStore, LoadOptions};

#[derive(clap::Args, Debug)]
pub struct EntitiesArgs {
    /// Class to describe; all classes are listed when omitted
    pub entity: Option<String>,

    /// Also count stored records per class
    #[arg(long)]
    pub count: bool,
}

/// Run the entities command
pub fn run(args: EntitiesArgs, workspace: &Workspace) -> Result<()> {
    let store = if args.count {
        Some(workspace.open_store()?)
    } else {
        None
    };
    let count = |name: &str| -> Result<Option<usize>> {
        match &store {
            Some(store) => Ok(Some(
                store
                    .load_list(name, LoadOptions::including_deleted())?
                    .len(),
            )),
            None => Ok(None),
        }
    };

    match &args.entity {
        Some(name) => {
            let meta = workspace
                .metadata
                .class(name)
                .ok_or_else(|| anyhow!("Unknown entity '{}'", name))?;
            println!("{} {}", meta.name.bright_green().bold(), flags(meta).dimmed());
            if let Some(records) = count(&meta.name)? {
                println!("  {} records", records);
            }
            for property in &meta.properties {
                let required = if property.required { " *" } else { "" };
                println!(
                    "  {}{} {}",
                    property.name.cyan(),
                    required.red(),
                    describe(property)
                );
            }
        }
        None => {
            let mut names = workspace.metadata.class_names();
            names.sort_unstable();
            for name in names {
                let Some(meta) = workspace.metadata.class(name) else {
                    continue;
                };
                let records = count(name)?
                    .map(|n| format!(" ({} records)", n))
                    .unwrap_or_default();
                println!(
                    "{}{} {}",
                    meta.name.bright_green(),
                    records,
                    flags(meta).dimmed()
                );
            }
        }
    }

    Ok(())
}

fn flags(meta: &EntityMeta) -> String {
    let mut flags = vec![format!("id: {:?}", meta.id_type).to_lowercase()];
    if meta.versioned {
        flags.push("versioned".to_string());
    }
    if meta.soft_delete {
        flags.push("soft delete".to_string());
    }
    if meta.embeddable {
        flags.push("embeddable".to_string());
    }
    format!("[{}]", flags.join(", "))
}

fn cardinality_label(cardinality: Cardinality) -> &'static str {
    match cardinality {
        Cardinality::ManyToOne => "many-to-one",
        Cardinality::OneToOne => "one-to-one",
        Cardinality::OneToMany => "one-to-many",
        Cardinality::ManyToMany => "many-to-many",
    }
}

/// Short human description of what a property holds
fn describe(property: &PropertyMeta) -> String {
    let mut text = match &property.range {
        PropertyRange::Datatype { datatype } => format!("{:?}", datatype).to_lowercase(),
        PropertyRange::Enum { values } => format!("enum [{}]", values.join(", ")),
        PropertyRange::Embedded { class } => format!("embedded {}", class),
        PropertyRange::Association {
            class,
            cardinality,
            inverse,
        } => reference("association", class, *cardinality, inverse.as_deref()),
        PropertyRange::Composition {
            class,
            cardinality,
            inverse,
        } => reference("composition", class, *cardinality, inverse.as_deref()),
    };
    if let Some(max) = property.max_length {
        text.push_str(&format!(" (max {})", max));
    }
    text
}

fn reference(kind: &str, class: &str, cardinality: Cardinality, inverse: Option<&str>) -> String {
    let mut text = format!("{} {} {}", kind, cardinality_label(cardinality), class);
    if let Some(inverse) = inverse {
        text.push_str(&format!(" (inverse {})", inverse));
    }
    text
}
