//! yomikae-hazard - Offline hazard dictionary aggregation
//!
//! Folds confirmed patch decisions from one or more audit logs back into
//! the hazard dictionary. A term that keeps getting corrected to the same
//! reading earns a dictionary entry, so future runs catch it before the
//! sources even disagree.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use yomikae::audit::read_decisions;
use yomikae::hazard::HazardDictionary;
use yomikae::types::Decision;

#[derive(Parser, Debug)]
#[command(name = "yomikae-hazard", version, about = "Aggregate audit logs into the hazard dictionary")]
struct Args {
    /// Audit log file(s) to aggregate (JSONL)
    #[arg(long = "log", required = true)]
    logs: Vec<PathBuf>,

    /// Hazard dictionary to update (created if missing)
    #[arg(long = "dict")]
    dict: PathBuf,

    /// Corrections needed before a term earns an entry
    #[arg(long, default_value_t = 2)]
    min_confirmations: usize,

    /// Report what would change without writing the dictionary
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!("yomikae-hazard {}", env!("CARGO_PKG_VERSION"));

    // (surface, applied reading) -> (confirmations, latest sighting)
    let mut counts: BTreeMap<(String, String), (usize, DateTime<Utc>)> = BTreeMap::new();
    let mut decisions_seen = 0usize;

    for log_path in &args.logs {
        let decisions = read_decisions(log_path)
            .with_context(|| format!("reading audit log {}", log_path.display()))?;
        decisions_seen += decisions.len();
        for decision in decisions {
            if decision.decision != Decision::Patch {
                continue;
            }
            let Some(reading) = decision.applied_reading else { continue };
            let entry = counts
                .entry((decision.surface, reading))
                .or_insert((0, decision.timestamp));
            entry.0 += 1;
            if decision.timestamp > entry.1 {
                entry.1 = decision.timestamp;
            }
        }
    }
    info!(
        logs = args.logs.len(),
        decisions = decisions_seen,
        corrections = counts.len(),
        "audit logs read"
    );

    let mut dict = HazardDictionary::load_or_empty(Some(args.dict.as_path()));
    let terms_before = dict.terms.len();

    for ((surface, reading), (confirmations, last_seen)) in counts {
        if confirmations < args.min_confirmations {
            continue;
        }
        info!(%surface, %reading, confirmations, "absorbing correction");
        dict.absorb_confirmations(&surface, &reading, confirmations, last_seen);
    }

    info!(
        terms_before,
        terms_after = dict.terms.len(),
        "aggregation complete"
    );

    if args.dry_run {
        info!("dry run, dictionary not written");
        return Ok(());
    }
    dict.save(&args.dict)
        .with_context(|| format!("writing hazard dictionary {}", args.dict.display()))?;
    info!(path = %args.dict.display(), "hazard dictionary written");
    Ok(())
}
