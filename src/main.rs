use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lazyorm::{
    EntityRef, MemoryStore, Metamodel, SessionConfig, UnitOfWork, fixtures,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lazyorm")]
#[command(about = "Lazy attribute loading over an in-memory store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a join-fetched inverse one-to-one and count the statements issued
    Walkthrough {
        /// Initialize references eagerly instead of handing out proxies
        #[arg(long)]
        no_proxy: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print entities, fetch groups and attributes of a sample model
    Schema {
        #[arg(long, default_value = "customer")]
        model: String,
    },
}

#[derive(Debug, Serialize)]
struct Step {
    action: String,
    statements: usize,
    state: String,
    association: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    allow_enhancement_as_proxy: bool,
    steps: Vec<Step>,
    sql: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Walkthrough { no_proxy, json } => {
            let report = walkthrough(!no_proxy).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Command::Schema { model } => {
            let metamodel = match model.as_str() {
                "customer" => fixtures::customer_supplemental()?,
                "library" => fixtures::library()?,
                "events" => fixtures::events()?,
                other => anyhow::bail!("unknown model '{}' (customer, library, events)", other),
            };
            print_schema(&metamodel);
            Ok(())
        }
    }
}

async fn walkthrough(allow_proxy: bool) -> Result<Report> {
    let metamodel = Arc::new(fixtures::customer_supplemental()?);
    let store = MemoryStore::new(metamodel);
    fixtures::seed_customer_supplemental(&store)
        .await
        .context("Failed to seed sample data")?;
    store.clear_statements()?;

    let mut uow = store.unit_of_work(
        SessionConfig::new()
            .name("walkthrough")
            .allow_enhancement_as_proxy(allow_proxy),
    )?;
    let mut steps = Vec::new();

    let info = uow.get_reference("SupplementalInfo", 1).await?;
    steps.push(step(&uow, &store, "get_reference(SupplementalInfo, 1)", info)?);

    let id = uow.get(info, "id").await?;
    steps.push(step(&uow, &store, &format!("read id = {}", id), info)?);

    let something = uow.get(info, "something").await?;
    steps.push(step(&uow, &store, &format!("read something = {}", something), info)?);

    let customer = uow
        .get_entity(info, "customer")
        .await?
        .context("SupplementalInfo 1 has no customer")?;
    steps.push(step(&uow, &store, "read customer", info)?);

    let name = uow.get(customer, "name").await?;
    steps.push(step(&uow, &store, &format!("read customer.name = {}", name), info)?);

    uow.commit().await?;

    Ok(Report {
        allow_enhancement_as_proxy: allow_proxy,
        steps,
        sql: store.statements()?,
    })
}

fn step(uow: &UnitOfWork, store: &MemoryStore, action: &str, info: EntityRef) -> Result<Step> {
    Ok(Step {
        action: action.to_string(),
        statements: store.statement_count()?,
        state: uow.proxy_state(info)?.to_string(),
        association: uow
            .association_state(info, "customer")?
            .map(|state| state.to_string()),
    })
}

fn print_report(report: &Report) {
    println!(
        "allow_enhancement_as_proxy = {}",
        report.allow_enhancement_as_proxy
    );
    println!("{:<40} {:>10}  {:<22} {}", "step", "statements", "state", "customer");
    for step in &report.steps {
        println!(
            "{:<40} {:>10}  {:<22} {}",
            step.action,
            step.statements,
            step.state,
            step.association.as_deref().unwrap_or("-")
        );
    }
    println!();
    for (i, sql) in report.sql.iter().enumerate() {
        println!("[{}] {}", i + 1, sql);
    }
}

fn print_schema(metamodel: &Metamodel) {
    for entity in metamodel.entities() {
        println!("{} (table {})", entity.name(), entity.table());
        for group in entity.fetch_groups() {
            let names: Vec<&str> = group
                .attributes()
                .iter()
                .filter_map(|&idx| entity.attribute_at(idx).ok())
                .map(|attr| attr.name())
                .collect();
            println!("  group {:<10} [{}]", group.name(), names.join(", "));
        }
        for attr in entity.attributes() {
            let mut notes = Vec::new();
            if attr.is_identity() {
                notes.push("identity".to_string());
            }
            if attr.is_lazy() {
                notes.push("lazy".to_string());
            }
            if let Some(association) = attr.association() {
                notes.push(format!("-> {} ({:?})", association.target, association.fetch_mode));
                if let Some(mapped_by) = &association.mapped_by {
                    notes.push(format!("mapped by {}", mapped_by));
                }
            }
            if attr.generation().is_some() {
                notes.push("generated".to_string());
            }
            println!("    {:<20} {:<20} {}", attr.name(), attr.column(), notes.join(", "));
        }
    }
}
