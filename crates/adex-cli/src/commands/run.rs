//! Run command - process a dataset with cache, oracle and rule learning.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use adex_core::models::load_dataset;
use adex_core::{CacheRegistry, DocumentReport, Pipeline, PipelineOptions, RunSummary};

use super::load_config;
use crate::oracle::OpenAiOracle;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Dataset JSON file
    #[arg(required = true)]
    dataset: PathBuf,

    /// Rule store (overrides cache.path from the config)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Merge rules from another store before starting
    #[arg(long)]
    merge: Option<PathBuf>,

    /// Rule proposals per field (1-10)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Oracle only: skip cached rules and do not learn new ones
    #[arg(long, conflicts_with = "no_oracle")]
    no_cache: bool,

    /// Cache only: never call the oracle
    #[arg(long)]
    no_oracle: bool,

    /// Results file (default: next to the dataset)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a per-document CSV summary
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunResults<'a> {
    summary: &'a RunSummary,
    documents: &'a [DocumentReport],
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let started_at = Utc::now();

    let mut config = load_config(config_path)?;
    if let Some(max_attempts) = args.max_attempts {
        config.extraction.max_attempts = max_attempts;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    if let Some(rules) = &args.rules {
        config.cache.path = Some(rules.clone());
    }
    config.validate()?;

    let documents = load_dataset(&args.dataset, config.pdf.max_pages)?;
    if documents.is_empty() {
        anyhow::bail!("Dataset {} has no documents", args.dataset.display());
    }

    let mut registry = match (&config.cache.path, config.cache.enabled) {
        (Some(path), true) => CacheRegistry::load_or_default(path)?,
        _ => CacheRegistry::new(),
    };

    if let Some(merge) = &args.merge {
        let added = registry.absorb(CacheRegistry::load(merge)?);
        println!(
            "{} Merged {} rule(s) from {}",
            style("ℹ").blue(),
            added,
            merge.display()
        );
    }

    let mut pipeline = Pipeline::new(PipelineOptions::from(&config));
    if args.no_oracle {
        info!("Oracle disabled, running cache-only");
    } else {
        let oracle = OpenAiOracle::from_config(&config.oracle)?;
        pipeline = pipeline.with_oracle(Arc::new(oracle));
    }

    println!(
        "{} Processing {} documents with {} cached rules",
        style("ℹ").blue(),
        documents.len(),
        registry.rule_count()
    );

    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut summary = RunSummary::new(started_at);
    let mut reports = Vec::with_capacity(documents.len());

    for (index, document) in documents.iter().enumerate() {
        pb.set_message(document.name(index));
        let report = pipeline.process(&mut registry, document, index).await;
        summary.record(&report);
        reports.push(report);
        pb.inc(1);
    }

    pb.finish_with_message("Complete");
    summary.rules_in_cache = registry.rule_count();

    if config.cache.enabled {
        if let Some(path) = &config.cache.path {
            registry.save(path)?;
        }
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_results_path(&args.dataset, config.cache.enabled));
    let results = RunResults {
        summary: &summary,
        documents: &reports,
    };
    fs::write(&output, serde_json::to_string_pretty(&results)?)?;

    if let Some(summary_path) = &args.summary {
        write_summary(summary_path, &reports)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} Processed {} documents in {:?}",
        style("✓").green(),
        summary.documents,
        start.elapsed()
    );
    println!(
        "   {} fully from cache ({:.1}%), {} field hits, {} misses",
        style(summary.fast_path_documents).green(),
        summary.fast_path_rate(),
        summary.field_hits,
        style(summary.field_misses).yellow()
    );
    println!(
        "   {} rules learned, {} oracle calls, {} rules in store",
        summary.rules_added,
        summary.oracle_calls(),
        summary.rules_in_cache
    );
    println!(
        "   {} tokens ({} prompt, {} completion), ${:.4}",
        summary.usage.total(),
        summary.usage.prompt_tokens,
        summary.usage.completion_tokens,
        summary.cost_usd
    );
    if let Some(accuracy) = summary.mean_accuracy {
        println!("   mean accuracy {:.2}%", accuracy);
    }
    println!("   results written to {}", output.display());

    Ok(())
}

/// `<dataset>_with_cache_result.json` (or `_without_cache_`) beside the dataset.
fn default_results_path(dataset: &Path, cache_enabled: bool) -> PathBuf {
    let stem = dataset
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    let mode = if cache_enabled { "with_cache" } else { "without_cache" };
    dataset.with_file_name(format!("{stem}_{mode}_result.json"))
}

fn write_summary(path: &Path, reports: &[DocumentReport]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "index",
        "name",
        "label",
        "cache_hits",
        "cache_misses",
        "rules_added",
        "oracle_calls",
        "prompt_tokens",
        "completion_tokens",
        "cost_usd",
        "accuracy",
        "elapsed_ms",
    ])?;

    for report in reports {
        wtr.write_record([
            &report.index.to_string(),
            &report.name,
            &report.label,
            &report.cache_hits.len().to_string(),
            &report.cache_misses.len().to_string(),
            &report.rules_added.to_string(),
            &(report.extractor_calls + report.generator_calls).to_string(),
            &report.usage.prompt_tokens.to_string(),
            &report.usage.completion_tokens.to_string(),
            &format!("{:.6}", report.cost_usd),
            &report.accuracy.map(|a| format!("{a:.2}")).unwrap_or_default(),
            &report.elapsed_ms.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
