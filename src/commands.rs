use anyhow::{bail, Context};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::module::{ModuleCategory, ModuleFactoryRegistry};
use crate::process::ExecutionProcess;

/// Static description of a module a factory builds.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSummary {
    pub name: String,
    pub category: ModuleCategory,
    pub priority: f32,
    pub version: f32,
}

/// Run startup against `config` without binding any port and log the outcome.
pub fn run_config_check(config: &Config, factories: &ModuleFactoryRegistry) -> anyhow::Result<()> {
    info!("Checking configuration...");

    crate::config::validate(config).context("configuration is invalid")?;
    info!("✓ Configuration is valid");

    let mut process = ExecutionProcess::from_config(config, factories)
        .context("failed to instantiate configured modules")?;
    let report = process.start().context("startup failed")?;

    info!("Checking {} module(s)...", config.enabled_modules().count());
    for name in &report.active {
        info!("  ✓ {}", name);
    }
    for (port, owner) in &report.bindings {
        info!("  Port {} served by '{}'", port, owner);
    }
    for exclusion in &report.excluded {
        error!("  ✗ {}: {}", exclusion.module, exclusion.error);
    }
    if report.bindings.is_empty() {
        warn!("  ! No module requested a listening port");
    }

    if !report.excluded.is_empty() {
        bail!("{} module(s) failed startup", report.excluded.len());
    }

    info!("✓ All checks passed");
    Ok(())
}

/// Describe every module the registry can build, sorted by name.
pub fn describe_modules(factories: &ModuleFactoryRegistry) -> Vec<ModuleSummary> {
    factories
        .names()
        .filter_map(|name| factories.create(name).ok())
        .map(|module| ModuleSummary {
            name: module.name().to_string(),
            category: module.category(),
            priority: module.priority(),
            version: module.version(),
        })
        .collect()
}

pub fn print_modules(factories: &ModuleFactoryRegistry) {
    println!("{:<16} {:<10} {:>8} {:>8}", "NAME", "CATEGORY", "PRIORITY", "VERSION");
    for summary in describe_modules(factories) {
        println!(
            "{:<16} {:<10} {:>8.1} {:>8.1}",
            summary.name, summary.category, summary.priority, summary.version
        );
    }
}
