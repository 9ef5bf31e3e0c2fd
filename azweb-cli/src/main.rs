use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{info, warn};

use azweb_core::effect::Effect;
use azweb_core::interpreter::{ApplyResult, EffectOutcome, Interpreter, InterpreterConfig};
use azweb_core::plan::Plan;
use azweb_core::provider::Provider;
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::ResourceSchema;
use azweb_provider_azurerm::resources::{resource_types, validate_resource};
use azweb_provider_azurerm::{AzureRmProvider, ProviderConfig};
use azweb_state::{ResourceState, StateBackend, StateFile, create_backend};

mod manifest;
mod planning;

use manifest::{Manifest, parse_address};

#[derive(Parser)]
#[command(name = "azweb")]
#[command(about = "Reconcile Azure App Service resources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the manifest without contacting Azure
    Validate {
        /// Path to the manifest
        #[arg(default_value = "azweb.json")]
        file: PathBuf,
    },
    /// Show what apply would change
    Plan {
        /// Path to the manifest
        #[arg(default_value = "azweb.json")]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to the manifest
        #[arg(default_value = "azweb.json")]
        file: PathBuf,

        /// Keep applying independent resources after a failure
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Delete every resource recorded in state
    Destroy {
        /// Path to the manifest
        #[arg(default_value = "azweb.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Re-read recorded resources and update state
    Refresh {
        /// Path to the manifest
        #[arg(default_value = "azweb.json")]
        file: PathBuf,
    },
    /// Start managing an existing ARM object
    Import {
        /// Manifest address, e.g. app_service.web
        address: String,

        /// ARM ID of the existing object
        arm_id: String,

        /// Path to the manifest
        #[arg(long, default_value = "azweb.json")]
        file: PathBuf,
    },
    /// Remove a state lock left behind by a crashed run
    ForceUnlock {
        lock_id: String,

        /// Path to the manifest
        #[arg(long, default_value = "azweb.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply {
            file,
            continue_on_error,
        } => run_apply(&file, continue_on_error).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Refresh { file } => run_refresh(&file).await,
        Commands::Import {
            address,
            arm_id,
            file,
        } => run_import(&file, &address, &arm_id).await,
        Commands::ForceUnlock { lock_id, file } => run_force_unlock(&file, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    resource_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

fn validate_resources(resources: &[Resource]) -> Result<(), String> {
    let errors: Vec<String> = resources
        .iter()
        .filter_map(|r| validate_resource(r).err())
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("Validation failed:\n  {}", errors.join("\n  ")))
    }
}

fn load_provider(manifest: &Manifest) -> Result<Arc<AzureRmProvider>, String> {
    let config = ProviderConfig::from_env()
        .and_then(|c| c.with_overrides(&manifest.provider))
        .map_err(|e| format!("Provider configuration: {}", e))?;
    let provider = AzureRmProvider::from_config(&config).map_err(|e| e.to_string())?;
    for (id, timeouts) in &manifest.timeouts {
        provider.set_timeouts(id.clone(), *timeouts);
    }
    println!(
        "{}",
        format!(
            "Using AzureRM provider (subscription: {})",
            config.subscription_id
        )
        .cyan()
    );
    Ok(Arc::new(provider))
}

fn load_backend(manifest: &Manifest) -> Result<Box<dyn StateBackend>, String> {
    create_backend(&manifest.backend).map_err(|e| e.to_string())
}

async fn read_state(backend: &dyn StateBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default())
}

async fn write_state(backend: &dyn StateBackend, state: &mut StateFile) -> Result<(), String> {
    state.increment_serial();
    backend.write_state(state).await.map_err(|e| e.to_string())
}

/// Run `body` while holding the state lock, releasing it even on failure
async fn with_state_lock(
    backend: &dyn StateBackend,
    operation: &str,
    body: impl Future<Output = Result<(), String>>,
) -> Result<(), String> {
    let lock = backend
        .acquire_lock(operation)
        .await
        .map_err(|e| e.to_string())?;
    info!("Acquired state lock {}", lock.id);

    let result = body.await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release state lock {}: {}", lock.id, e);
        if result.is_ok() {
            return Err(format!(
                "Failed to release state lock {} (run `azweb force-unlock {}`): {}",
                lock.id, lock.id, e
            ));
        }
    }
    result
}

// =============================================================================
// Commands
// =============================================================================

fn run_validate(file: &Path) -> Result<(), String> {
    let manifest = Manifest::load(file)?;

    println!("{}", "Validating...".cyan());

    validate_resources(&manifest.resources)?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            manifest.resources.len()
        )
        .green()
        .bold()
    );

    for resource in &manifest.resources {
        println!("  • {}", resource.id);
    }

    Ok(())
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    validate_resources(&manifest.resources)?;

    let provider = load_provider(&manifest)?;
    let backend = load_backend(&manifest)?;
    let mut state = read_state(backend.as_ref()).await?;

    planning::refresh(provider.as_ref(), &mut state).await?;
    let schemas = get_schemas();
    let plan = planning::build_plan(&manifest.resources, &state, &schemas);
    print_plan(&plan, &schemas);
    Ok(())
}

async fn run_apply(file: &Path, continue_on_error: bool) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    validate_resources(&manifest.resources)?;

    let provider = load_provider(&manifest)?;
    let backend = load_backend(&manifest)?;

    with_state_lock(backend.as_ref(), "apply", async {
        let mut state = read_state(backend.as_ref()).await?;
        planning::refresh(provider.as_ref(), &mut state).await?;

        let schemas = get_schemas();
        let plan = planning::build_plan(&manifest.resources, &state, &schemas);
        print_plan(&plan, &schemas);
        if plan.is_empty() {
            // Refresh may still have dropped vanished resources
            return write_state(backend.as_ref(), &mut state).await;
        }

        println!();
        println!("{}", "Applying changes...".cyan().bold());
        println!();

        let result = Interpreter::new(provider.clone())
            .with_config(InterpreterConfig {
                dry_run: false,
                continue_on_error,
            })
            .apply(&plan)
            .await
            .map_err(|e| e.to_string())?;
        print_results(&result);

        planning::record_results(&mut state, &result);
        write_state(backend.as_ref(), &mut state).await?;
        finish(&result, "Apply")
    })
    .await
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    let provider = load_provider(&manifest)?;
    let backend = load_backend(&manifest)?;

    with_state_lock(backend.as_ref(), "destroy", async {
        let mut state = read_state(backend.as_ref()).await?;
        planning::refresh(provider.as_ref(), &mut state).await?;

        if state.resources.is_empty() {
            println!("{}", "No resources to destroy.".green());
            return write_state(backend.as_ref(), &mut state).await;
        }

        println!("{}", "Destroy Plan:".red().bold());
        println!();
        for entry in &state.resources {
            println!(
                "  {} {} ({})",
                "-".red().bold(),
                entry.id(),
                entry.identifier.dimmed()
            );
        }
        println!();
        println!(
            "Plan: {} to destroy.",
            state.resources.len().to_string().red()
        );
        println!();

        if !auto_approve && !confirm_destroy()? {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }

        println!("{}", "Destroying resources...".red().bold());
        println!();

        let plan = planning::destroy_plan(&state, &manifest.resources);
        let result = Interpreter::new(provider.clone())
            .apply(&plan)
            .await
            .map_err(|e| e.to_string())?;
        print_results(&result);

        planning::record_results(&mut state, &result);
        write_state(backend.as_ref(), &mut state).await?;
        finish(&result, "Destroy")
    })
    .await
}

async fn run_refresh(file: &Path) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    let provider = load_provider(&manifest)?;
    let backend = load_backend(&manifest)?;

    with_state_lock(backend.as_ref(), "refresh", async {
        let mut state = read_state(backend.as_ref()).await?;
        let dropped = planning::refresh(provider.as_ref(), &mut state).await?;

        for id in &dropped {
            println!("  {} {} no longer exists", "-".red().bold(), id);
        }
        write_state(backend.as_ref(), &mut state).await?;
        println!(
            "{}",
            format!(
                "✓ Refreshed {} resources ({} removed from state).",
                state.resources.len(),
                dropped.len()
            )
            .green()
            .bold()
        );
        Ok(())
    })
    .await
}

async fn run_import(file: &Path, address: &str, arm_id: &str) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    let id = parse_address(address)?;
    let resource = manifest
        .find(&id)
        .ok_or_else(|| format!("{} is not declared in {}", id, file.display()))?;
    validate_resource(resource).map_err(|e| e.to_string())?;

    let provider = load_provider(&manifest)?;
    let backend = load_backend(&manifest)?;

    if let Ok(expected) = provider.identifier_for(resource)
        && !expected.eq_ignore_ascii_case(arm_id)
    {
        warn!(
            "{} is declared with ID {}, importing {}",
            id, expected, arm_id
        );
    }

    with_state_lock(backend.as_ref(), "import", async {
        let mut state = read_state(backend.as_ref()).await?;
        if let Some(existing) = state.find(&id) {
            return Err(format!(
                "{} is already managed as {}",
                id, existing.identifier
            ));
        }

        let mut current = provider
            .read(&id, arm_id)
            .await
            .map_err(|e| e.to_string())?;
        if !current.exists {
            return Err(format!("Cannot import {}: {} does not exist", id, arm_id));
        }
        if let Some(schema) = provider.schema(&id.resource_type) {
            schema.carry_write_only(&resource.attributes, &mut current.attributes);
        }

        let entry = ResourceState::from_state(&current)
            .unwrap_or_else(|| ResourceState::new(&id, arm_id));
        state.upsert(entry);
        write_state(backend.as_ref(), &mut state).await?;

        println!(
            "{}",
            format!("✓ Imported {} from {}", id, arm_id).green().bold()
        );
        Ok(())
    })
    .await
}

async fn run_force_unlock(file: &Path, lock_id: &str) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    let backend = load_backend(&manifest)?;
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", format!("✓ Lock {} removed.", lock_id).green().bold());
    Ok(())
}

fn confirm_destroy() -> Result<bool, String> {
    println!(
        "{}",
        "Do you really want to destroy all resources?"
            .yellow()
            .bold()
    );
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

// =============================================================================
// Output
// =============================================================================

fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let schema = schemas.get(&effect.resource_id().resource_type);
        let symbol = match effect {
            Effect::Create(_) => "+".green().bold(),
            Effect::Update { .. } => "~".yellow().bold(),
            Effect::Replace { .. } => "-/+".magenta().bold(),
            Effect::Delete { .. } => "-".red().bold(),
        };
        println!("  {} {}", symbol, effect.resource_id().to_string().cyan().bold());

        for line in effect_lines(effect, schema) {
            println!("      {}", line);
        }
    }

    println!();
    println!("{}", plan.summary());
}

/// Attribute lines shown under an effect, with write-only values masked
fn effect_lines(effect: &Effect, schema: Option<&ResourceSchema>) -> Vec<String> {
    let mut lines = Vec::new();
    match effect {
        Effect::Create(resource) => {
            let mut keys: Vec<&String> = resource.attributes.keys().collect();
            keys.sort();
            for key in keys {
                lines.push(format!(
                    "{}: {}",
                    key,
                    display_value(key, &resource.attributes[key], schema)
                ));
            }
        }
        Effect::Update { from, to, .. } | Effect::Replace { from, to, .. } => {
            let forces: Vec<&str> = schema
                .map(ResourceSchema::force_new_attributes)
                .unwrap_or_default();
            let mut keys: Vec<&String> = to.attributes.keys().collect();
            keys.sort();
            for key in keys {
                let new = &to.attributes[key];
                if from.attributes.get(key) == Some(new) {
                    continue;
                }
                let old = from
                    .attributes
                    .get(key)
                    .map(|v| display_value(key, v, schema))
                    .unwrap_or_else(|| "(unset)".to_string());
                let mut line = format!(
                    "{}: {} → {}",
                    key,
                    old.red(),
                    display_value(key, new, schema).green()
                );
                if matches!(effect, Effect::Replace { .. }) && forces.contains(&key.as_str()) {
                    line.push_str(&format!(" {}", "# forces replacement".magenta()));
                }
                lines.push(line);
            }
        }
        Effect::Delete { identifier, .. } => {
            lines.push(format!("id: {}", identifier.dimmed()));
        }
    }
    lines
}

fn display_value(key: &str, value: &Value, schema: Option<&ResourceSchema>) -> String {
    let write_only = schema
        .and_then(|s| s.attributes.get(key))
        .is_some_and(|a| a.write_only);
    if write_only {
        "(sensitive)".to_string()
    } else {
        value.to_json().to_string()
    }
}

fn print_results(result: &ApplyResult) {
    for effect in &result.results {
        let label = format!("{} {}", capitalize(effect.verb), effect.id);
        match &effect.result {
            Ok(EffectOutcome::Skipped { reason }) => {
                println!("  {} {} - {}", "○".yellow(), label, reason)
            }
            Ok(_) => println!("  {} {}", "✓".green(), label),
            Err(e) => println!("  {} {} - {}", "✗".red(), label, e),
        }
    }
}

fn finish(result: &ApplyResult, operation: &str) -> Result<(), String> {
    println!();
    if result.is_success() {
        println!(
            "{}",
            format!(
                "{} complete! {} succeeded, {} skipped.",
                operation, result.success_count, result.skipped_count
            )
            .green()
            .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "{} failed: {} succeeded, {} failed, {} skipped",
            operation, result.success_count, result.failure_count, result.skipped_count
        ))
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
