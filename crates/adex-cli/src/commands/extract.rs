//! Extract command - answer fields from cached rules only.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use glob::glob;
use tracing::{debug, warn};

use adex_core::{CacheRegistry, Document, DocumentReport, Pipeline, PipelineOptions, Schema};

use super::{load_config, store_path};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input file (.pdf or .txt) or glob pattern
    #[arg(required = true)]
    input: String,

    /// Document label selecting the rule set
    #[arg(short, long)]
    label: String,

    /// Fields to extract (default: every field with cached rules)
    #[arg(short, long = "field")]
    fields: Vec<String>,

    /// Rule store (overrides cache.path from the config)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Write the results here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not write updated rule weights back to the store
    #[arg(long)]
    no_save: bool,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = store_path(args.rules.clone(), &config)?;
    let mut registry = CacheRegistry::load(&store)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            matches!(ext.to_lowercase().as_str(), "pdf" | "txt")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    let schema: Schema = if args.fields.is_empty() {
        registry
            .get(&args.label)
            .map(|cache| cache.fields().map(|f| (f.to_string(), String::new())).collect())
            .unwrap_or_default()
    } else {
        args.fields.iter().map(|f| (f.clone(), String::new())).collect()
    };

    if schema.is_empty() {
        anyhow::bail!("No fields to extract for label '{}'. Pass --field.", args.label);
    }

    // no oracle; the store is written once at the end
    let pipeline = Pipeline::new(PipelineOptions {
        use_cache: true,
        store_path: None,
        ..PipelineOptions::from(&config)
    });

    let mut reports: Vec<DocumentReport> = Vec::with_capacity(files.len());
    for (index, path) in files.iter().enumerate() {
        let text = match read_document(path, config.pdf.max_pages) {
            Ok(text) => text,
            Err(e) if args.continue_on_error => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e.context(format!("Failed to read {}", path.display()))),
        };

        let mut document = Document::new(args.label.clone(), text, schema.clone());
        document.filename = path.file_name().map(|n| n.to_string_lossy().into_owned());

        reports.push(pipeline.process(&mut registry, &document, index).await);
    }

    let json = serde_json::to_string_pretty(&reports)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json)?;
            eprintln!("{} Results written to {}", style("✓").green(), path.display());
        }
        None => println!("{json}"),
    }

    if !args.no_save {
        registry.save(&store)?;
        debug!("Saved updated weights to {}", store.display());
    }

    let misses: usize = reports.iter().map(|r| r.cache_misses.len()).sum();
    if misses > 0 {
        eprintln!(
            "{} {} field(s) had no matching rule",
            style("!").yellow(),
            misses
        );
    }

    Ok(())
}

/// Text of a PDF or plain-text file.
fn read_document(path: &Path, max_pages: usize) -> anyhow::Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "pdf" => Ok(adex_core::pdf::read_text(path, max_pages)?),
        "txt" => Ok(fs::read_to_string(path)?),
        _ => anyhow::bail!("Unsupported file format: {}", extension),
    }
}
