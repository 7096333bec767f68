//! qmol CLI - build and inspect QM9 molecule stores.
//!
//! # Usage
//!
//! ```bash
//! # Featurize the raw inputs under a dataset root and persist the store
//! qmol process data/qm9
//!
//! # Print table sizes and degree statistics of a persisted store
//! qmol stats data/qm9
//! ```
//!
//! The dataset root must contain `qm9.csv` (name, SMILES, 19 properties)
//! and `qm9_spatial.bin.gz`; `process` writes the artifact under
//! `<root>/processed/`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;

use qmol_data::store::{load_raw, ARTIFACT_PATH};
use qmol_data::FlatMoleculeStore;

#[derive(Parser)]
#[command(name = "qmol")]
#[command(about = "QM9 molecule store CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the flat store from raw inputs and persist it
    Process {
        /// Dataset root containing qm9.csv and qm9_spatial.bin.gz
        root: PathBuf,

        /// Rebuild even if a persisted artifact exists
        #[arg(long)]
        force: bool,
    },

    /// Show statistics about a persisted store
    Stats {
        /// Dataset root
        root: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process { root, force } => cmd_process(&root, force),
        Commands::Stats { root } => cmd_stats(&root),
    }
}

fn cmd_process(root: &PathBuf, force: bool) -> Result<()> {
    let artifact = root.join(ARTIFACT_PATH);
    if artifact.is_file() && !force {
        println!(
            "Artifact already exists at {} (use --force to rebuild)",
            artifact.display()
        );
        return Ok(());
    }

    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Reading raw inputs from {}...", root.display()));
    let rows = load_raw(root)
        .with_context(|| format!("failed to read raw inputs under {}", root.display()))?;
    log::info!("loaded {} raw molecules in {:.2?}", rows.len(), start.elapsed());
    pb.set_message(format!("Featurizing {} molecules...", rows.len()));

    let store = FlatMoleculeStore::build(&rows).context("store build failed")?;
    store
        .save(root)
        .with_context(|| format!("failed to persist the artifact under {}", root.display()))?;

    pb.finish_with_message(format!(
        "Processed {} molecules in {:.2?}",
        store.num_molecules(),
        start.elapsed()
    ));
    Ok(())
}

fn cmd_stats(root: &PathBuf) -> Result<()> {
    let start = Instant::now();
    let store = FlatMoleculeStore::open(root)
        .with_context(|| format!("failed to open a store under {}", root.display()))?;
    log::info!("store opened in {:.2?}", start.elapsed());

    println!("Store: {}", root.join(ARTIFACT_PATH).display());
    println!("  Molecules:       {}", store.num_molecules());
    println!("  Atoms:           {}", store.total_atoms());
    println!("  Directed edges:  {}", store.total_edges());
    println!("  Average degree:  {:.3}", store.avg_degree);
    if let Some(max) = store.n_atoms.iter().max() {
        println!("  Largest molecule: {max} atoms");
    }
    println!("Loaded in {:.2?}", start.elapsed());
    Ok(())
}
