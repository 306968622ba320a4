//! Rules command - inspect and edit the rule store.

use std::fs;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use adex_core::{AdexError, CacheRegistry, Candidate, ExtractionOutcome, Rule};

use super::{load_config, store_path};

/// Arguments for the rules command.
#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List rules in priority order
    List {
        /// Only this label
        #[arg(short, long)]
        label: Option<String>,

        /// Only this field
        #[arg(short, long)]
        field: Option<String>,

        /// Rule store (overrides cache.path from the config)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Add a rule by hand, at the tail of its field's list
    Add {
        #[arg(short, long)]
        label: String,

        #[arg(short, long)]
        field: String,

        /// Rule as JSON, e.g. '{"kind":"regex","pattern":"Nome: (.+)","validator":".+"}'
        #[arg(long = "rule")]
        rule: String,

        /// Rule store (overrides cache.path from the config)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Try a rule against a text file without touching the store
    Check {
        /// Rule as JSON
        #[arg(long = "rule")]
        rule: String,

        /// Plain-text document
        #[arg(short, long)]
        text: PathBuf,
    },

    /// Merge another store into this one
    Merge {
        /// Store to merge from
        other: PathBuf,

        /// Rule store (overrides cache.path from the config)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },
}

pub async fn run(args: RulesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    match args.command {
        RulesCommand::List {
            label,
            field,
            rules,
        } => {
            let config = load_config(config_path)?;
            let registry = CacheRegistry::load(store_path(rules, &config)?)?;
            list_rules(&registry, label.as_deref(), field.as_deref());
            Ok(())
        }
        RulesCommand::Add {
            label,
            field,
            rule,
            rules,
        } => {
            let config = load_config(config_path)?;
            let store = store_path(rules, &config)?;
            let rule = Rule::from_json(&rule).map_err(AdexError::from)?;

            let mut registry = CacheRegistry::load_or_default(&store)?;
            let cache = registry.get_or_create(&label);
            if cache.get(&field).is_some_and(|list| list.contains(&rule)) {
                println!(
                    "{} Rule already present for {}.{}",
                    style("ℹ").blue(),
                    label,
                    field
                );
                return Ok(());
            }
            cache.add_rule(&field, rule);
            registry.save(&store)?;

            println!(
                "{} Added rule for {}.{} ({} rules in store)",
                style("✓").green(),
                label,
                field,
                registry.rule_count()
            );
            Ok(())
        }
        RulesCommand::Check { rule, text } => {
            let rule = Rule::from_json(&rule).map_err(AdexError::from)?;
            let text = fs::read_to_string(&text)?;
            check_rule(&rule, &text);
            Ok(())
        }
        RulesCommand::Merge { other, rules } => {
            let config = load_config(config_path)?;
            let store = store_path(rules, &config)?;

            let mut registry = CacheRegistry::load_or_default(&store)?;
            let added = registry.absorb(CacheRegistry::load(&other)?);
            registry.save(&store)?;

            println!(
                "{} Merged {} rule(s) from {} into {}",
                style("✓").green(),
                added,
                other.display(),
                store.display()
            );
            Ok(())
        }
    }
}

fn list_rules(registry: &CacheRegistry, label: Option<&str>, field: Option<&str>) {
    let mut shown = 0;

    for name in registry.labels().filter(|l| label.is_none_or(|want| want == *l)) {
        let Some(cache) = registry.get(name) else {
            continue;
        };
        println!("{}", style(name).bold());

        for field_name in cache.fields().filter(|f| field.is_none_or(|want| want == *f)) {
            let Some(list) = cache.get(field_name) else {
                continue;
            };
            println!("  {}", style(field_name).cyan());
            for (position, entry) in list.iter().enumerate() {
                println!("    {position}. [w={}] {}", entry.weight(), entry.rule());
                shown += 1;
            }
        }
    }

    if shown == 0 {
        println!("{} No rules found.", style("ℹ").blue());
    }
}

fn check_rule(rule: &Rule, text: &str) {
    println!("Rule:      {rule}");
    match rule.apply(text) {
        Some(Candidate::Text(value)) => println!("Candidate: {value:?}"),
        Some(Candidate::Absent) => println!("Candidate: <absent>"),
        None => {
            println!("{} Rule did not fire", style("✗").red());
            return;
        }
    }

    match rule.extract(text) {
        Some(ExtractionOutcome::Value(value)) => {
            println!("{} Accepted: {value:?}", style("✓").green())
        }
        Some(ExtractionOutcome::ConfirmedAbsent) => {
            println!("{} Accepted: field confirmed absent", style("✓").green())
        }
        _ => println!(
            "{} Rejected by validator {}",
            style("✗").red(),
            rule.validator().as_str()
        ),
    }
}
