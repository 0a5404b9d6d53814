//! `mondrian ingest`: load reference profiles for an advisor from a
//! directory of JSON documents, one per reference image.

use anyhow::{Context, Result};
use clap::Args;
use mondrian_protocol::{Dimension, DimensionScore, DimensionalProfile, ProfileMetadata};
use mondrian_store::Store;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Directory of profile JSON documents
    dir: PathBuf,

    /// Advisor the profiles belong to
    #[arg(long)]
    advisor: String,

    /// State store URL
    #[arg(long, env = "MONDRIAN_STORE")]
    store: Option<String>,
}

/// One profile document on disk: a dimensional profile without the advisor
/// key, which comes from the command line.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileDocument {
    image_ref: String,
    dimensions: BTreeMap<Dimension, DimensionScore>,
    #[serde(default)]
    overall_grade: Option<f64>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    metadata: Option<ProfileMetadata>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    techniques: Option<BTreeMap<String, String>>,
}

impl ProfileDocument {
    fn into_profile(self, advisor_id: &str) -> DimensionalProfile {
        DimensionalProfile {
            advisor_id: advisor_id.to_string(),
            image_ref: self.image_ref,
            dimensions: self.dimensions,
            overall_grade: self.overall_grade,
            caption: self.caption,
            metadata: self.metadata,
            embedding: self.embedding,
            techniques: self.techniques,
        }
    }
}

pub async fn run(args: IngestArgs) -> Result<()> {
    let store_url = args.store.unwrap_or_else(super::default_store_url);
    let store = Store::open(&store_url).await?;

    // Sorted so repeat runs visit files in the same order.
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&args.dir)
        .with_context(|| format!("reading {}", args.dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut ingested = 0usize;
    let mut incomplete = 0usize;
    for path in &paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let document: ProfileDocument = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        let profile = document.into_profile(&args.advisor);
        if !profile.is_complete() {
            warn!(
                "{}: missing dimension scores; stored but excluded from retrieval",
                path.display()
            );
            incomplete += 1;
        }
        store.upsert_profile(&profile).await?;
        ingested += 1;
    }

    info!(
        "Ingested {} profiles for {} ({} incomplete)",
        ingested, args.advisor, incomplete
    );
    println!(
        "Ingested {} profiles for advisor '{}' ({} incomplete)",
        ingested, args.advisor, incomplete
    );
    Ok(())
}
