//! `nvlp rules` — inspect and administer the rule catalog.

use std::path::{Path, PathBuf};

use nvlp_config::AppConfig;
use nvlp_engine::{Catalog, UpsertOutcome, builtin_rules};

use super::{build_catalog, load_config};

/// List all rules in priority order.
pub fn list(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let catalog = build_catalog(&config)?;

    if catalog.is_empty() {
        println!("No rules configured.");
        println!("\nSeed the built-in neuro rules with:");
        println!("  nvlp rules seed");
        return Ok(());
    }

    println!(
        "Adaptive Rules ({} total, {} active):\n",
        catalog.len(),
        catalog.active_count()
    );
    for (i, rule) in catalog.iter().enumerate() {
        let status = match (rule.is_active, rule.parse_error()) {
            (_, Some(_)) => "ERR",
            (true, None) => "ON ",
            (false, None) => "OFF",
        };
        println!("  {}. [{}] {} → {}", i + 1, status, rule.name, rule.action);
        println!("     trigger: {}", rule.condition());
        if !rule.modifiers.is_empty() {
            let modifiers: Vec<_> = rule
                .modifiers
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            println!("     modifiers: {}", modifiers.join(", "));
        }
        if let Some(err) = rule.parse_error() {
            println!("     error: {err}");
        }
    }
    Ok(())
}

/// Validate a rule file strictly.
pub fn validate(
    config_path: Option<&Path>,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let Some(path) = file.or(config.catalog.rules_file) else {
        println!("No rule file configured; checking built-in rules.");
        report_validity(&Catalog::load(builtin_rules()));
        return Ok(());
    };

    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    match Catalog::load_definitions_json(&text, true) {
        Ok(catalog) => report_validity(&catalog),
        Err(e) => {
            eprintln!("Rule validation failed: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn report_validity(catalog: &Catalog) {
    let invalid: Vec<_> = catalog.invalid_rules().collect();
    if invalid.is_empty() {
        println!(
            "All {} rules are valid. {} active.",
            catalog.len(),
            catalog.active_count()
        );
        return;
    }
    for (rule, err) in &invalid {
        eprintln!("  {}: {err}", rule.name);
    }
    eprintln!("{} of {} rules are invalid.", invalid.len(), catalog.len());
    std::process::exit(1);
}

/// Print the effective catalog as JSON.
pub fn export(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let catalog = build_catalog(&config)?;
    println!("{}", catalog.to_definitions_json()?);
    Ok(())
}

/// Upsert the built-in rules into a rule file, creating it if needed.
pub fn seed(
    config_path: Option<&Path>,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let path = file
        .or(config.catalog.rules_file)
        .unwrap_or_else(|| AppConfig::config_dir().join("rules.json"));

    let (created, updated) = seed_file(&path)?;

    println!("\nNeuro rules loading complete: {created} created, {updated} updated.");
    println!("Written to {}", path.display());
    Ok(())
}

/// Returns the (created, updated) counts.
fn seed_file(path: &Path) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let mut catalog = if path.exists() {
        Catalog::load_definitions_json(&std::fs::read_to_string(path)?, false)?
    } else {
        Catalog::new()
    };

    let (mut created, mut updated) = (0, 0);
    for rule in builtin_rules() {
        let name = rule.name.clone();
        match catalog.upsert(rule) {
            UpsertOutcome::Created => {
                created += 1;
                println!("  Created rule: {name}");
            }
            UpsertOutcome::Updated => {
                updated += 1;
                println!("  Updated existing rule: {name}");
            }
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, catalog.to_definitions_json()?)?;
    Ok((created, updated))
}
