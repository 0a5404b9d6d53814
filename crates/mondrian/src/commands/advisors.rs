//! `mondrian advisors`: seed and inspect the advisor catalog.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use mondrian_protocol::Advisor;
use mondrian_store::Store;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct AdvisorsArgs {
    #[command(subcommand)]
    command: AdvisorsCommand,

    /// State store URL
    #[arg(long, global = true, env = "MONDRIAN_STORE")]
    store: Option<String>,
}

#[derive(Subcommand, Debug)]
enum AdvisorsCommand {
    /// Load a JSON catalog (array of advisor objects) into the store
    Seed { file: PathBuf },
    /// Print the configured advisors
    List,
}

pub async fn run(args: AdvisorsArgs) -> Result<()> {
    let store_url = args.store.unwrap_or_else(super::default_store_url);
    let store = Store::open(&store_url).await?;

    match args.command {
        AdvisorsCommand::Seed { file } => {
            let count = seed_from_file(&store, &file).await?;
            println!("Seeded {} advisors from {}", count, file.display());
        }
        AdvisorsCommand::List => {
            let advisors = store.list_advisors().await?;
            if advisors.is_empty() {
                println!("No advisors configured");
            }
            for advisor in advisors {
                let adapter = advisor.adapter.as_deref().unwrap_or("-");
                println!("{:<16} {:<24} adapter: {}", advisor.id, advisor.name, adapter);
            }
        }
    }
    Ok(())
}

/// Load and upsert a JSON advisor catalog. Returns how many were written.
pub async fn seed_from_file(store: &Store, path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let advisors: Vec<Advisor> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for advisor in &advisors {
        store.upsert_advisor(advisor).await?;
    }
    Ok(advisors.len())
}
