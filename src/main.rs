//! pkgbroker - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pkgbroker::bloat::{self, BloatFetcher, BloatMap};
use pkgbroker::catalog::{Catalog, CatalogFilter, Tab};
use pkgbroker::cli::{BloatCommands, Cli, Commands, ConfigCommands, ListArgs, PresetCommands};
use pkgbroker::executor::Executor;
use pkgbroker::preset::Preset;
use pkgbroker::{BrokerConfig, OperationRequest, PackageBroker, ShellBroker, process_guard};

/// How long `authorize` waits for the broker's answer.
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Initialize tracing; `log` records are bridged into the same subscriber.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    info!("pkgbroker starting up");

    // Broker shell children must not outlive us
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns Ok(false) when at least one package operation failed.
fn run(cli: Cli) -> Result<bool> {
    if let Commands::Config { action } = &cli.command {
        return run_config_command(action);
    }

    let mut config = BrokerConfig::load_or_default(cli.config.as_deref())?;
    config.validate().context("Invalid configuration")?;

    let shell = Arc::new(ShellBroker::new(config.broker.clone()));
    let broker = Arc::new(
        PackageBroker::new(
            shell.clone(),
            shell.clone(),
            shell,
            config.installer_package.clone(),
        )
        .with_dry_run(cli.dry_run),
    );
    if cli.dry_run {
        info!("Dry-run mode: privileged calls will be logged, not issued");
    }

    match cli.command {
        Commands::Status => {
            let status = broker.status();
            println!("Broker status: {}", status);
            println!("Authorized:    {}", broker.is_authorized());
            Ok(true)
        }
        Commands::Authorize => authorize(&broker),
        Commands::List(args) => {
            let bloat = load_bloat(&mut config, cli.config.as_deref());
            list(&broker, &bloat, &args)
        }
        Commands::Inspect { package } => {
            let state = broker.inspector().inspect(&package)?;
            println!("{}", state);
            println!("  installed:      {}", state.is_installed);
            println!("  system app:     {}", state.is_system_app);
            println!("  system update:  {}", state.has_system_update);
            println!("  disabled:       {}", state.is_disabled);
            println!("  factory reset:  {}", state.can_reset_to_factory());
            Ok(true)
        }
        Commands::Uninstall {
            packages,
            reset_to_factory,
            preset,
        } => {
            let mut names: BTreeSet<String> = packages.into_iter().collect();
            if let Some(path) = preset {
                let preset = Preset::load(&path)?;
                info!("Preset '{}': {} package(s)", preset.name, preset.apps.len());
                names.extend(preset.apps);
            }
            let cached = bloat::load_cached(&config.bloat_list_path);
            for (name, removal) in bloat::risky_removals(&cached, names.iter().map(String::as_str)) {
                log::warn!("{} is marked {}: {}", name, removal, removal.description());
            }
            let requests = names
                .into_iter()
                .map(|n| OperationRequest::uninstall(n, reset_to_factory))
                .collect();
            run_operations(&broker, requests)
        }
        Commands::Reinstall { packages } => {
            let requests = packages
                .into_iter()
                .map(OperationRequest::reinstall)
                .collect();
            run_operations(&broker, requests)
        }
        Commands::Bloat { action } => run_bloat_command(&action, &mut config, cli.config.as_deref()),
        Commands::Preset { action } => run_preset_command(&broker, &action),
        Commands::Config { .. } => Ok(true),
    }
}

fn authorize(broker: &PackageBroker) -> Result<bool> {
    if broker.is_authorized() {
        println!("✓ Broker already authorized");
        return Ok(true);
    }

    let (tx, rx) = mpsc::channel();
    broker.request_authorization(move |granted| {
        let _ = tx.send(granted);
    });

    match rx.recv_timeout(AUTHORIZATION_TIMEOUT) {
        Ok(true) => {
            println!("✓ Broker authorized");
            Ok(true)
        }
        Ok(false) => {
            eprintln!("✗ Authorization denied (broker is {})", broker.status());
            Ok(false)
        }
        Err(_) => anyhow::bail!("No answer from the broker within {:?}", AUTHORIZATION_TIMEOUT),
    }
}

/// Run requests sequentially on the executor thread.
fn run_operations(broker: &Arc<PackageBroker>, requests: Vec<OperationRequest>) -> Result<bool> {
    let total = requests.len();
    let mut failed = 0usize;
    let dry_run = broker.is_dry_run();

    let mut executor = Executor::spawn(Arc::clone(broker));
    executor.run_sequential(requests, |report| {
        if report.outcome.success {
            let suffix = if dry_run { " (dry run)" } else { "" };
            println!("✓ {}{}", report.request, suffix);
        } else {
            failed += 1;
            eprintln!(
                "✗ {}: {}",
                report.request,
                report.outcome.diagnostic.as_deref().unwrap_or("unknown error")
            );
        }
    });

    info!("{} of {} operation(s) succeeded", total - failed, total);
    Ok(failed == 0)
}

fn list(broker: &PackageBroker, bloat: &BloatMap, args: &ListArgs) -> Result<bool> {
    let inspector = broker.inspector();
    let states = if args.installed {
        inspector.list_installed()?
    } else if args.uninstalled {
        inspector.list_uninstalled()?
    } else {
        inspector.list_all()?
    };
    let catalog = Catalog::build(states, bloat);

    let filter = CatalogFilter {
        tab: if args.installed {
            Some(Tab::Installed)
        } else if args.uninstalled {
            Some(Tab::Uninstalled)
        } else {
            None
        },
        system_only: args.system,
        removal: args.removal,
        query: args.search.clone(),
    };
    let entries: Vec<_> = catalog.filter(&filter).collect();

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize package list")?
        );
        return Ok(true);
    }

    for entry in &entries {
        let removal = entry
            .removal()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<60} {:<11} {:<6} {}",
            entry.package_name(),
            if entry.state.is_installed { "installed" } else { "uninstalled" },
            if entry.state.is_system_app { "system" } else { "user" },
            removal
        );
    }
    println!("{} package(s)", entries.len());
    Ok(true)
}

/// Load the bloat list and persist a changed hash when a config file is in use.
fn load_bloat(config: &mut BrokerConfig, config_path: Option<&Path>) -> BloatMap {
    let previous_hash = config.latest_bloat_hash.clone();
    let map = BloatFetcher::from_config(config).sync(config);
    persist_hash(config, &previous_hash, config_path);
    map
}

fn persist_hash(config: &BrokerConfig, previous_hash: &str, config_path: Option<&Path>) {
    if config.latest_bloat_hash == previous_hash {
        return;
    }
    match config_path {
        Some(path) => {
            if let Err(e) = config.save_to_file(path) {
                error!("Failed to store bloat list hash: {:#}", e);
            }
        }
        None => debug!("No config file, bloat list hash not persisted"),
    }
}

fn run_bloat_command(
    action: &BloatCommands,
    config: &mut BrokerConfig,
    config_path: Option<&Path>,
) -> Result<bool> {
    match action {
        BloatCommands::Update { force } => {
            let previous_hash = config.latest_bloat_hash.clone();
            let fetcher = BloatFetcher::from_config(config);
            let count = if *force {
                let (map, hash) = fetcher.fetch_bloat_list(&config.bloat_list_path)?;
                if !map.is_empty() && !hash.is_empty() {
                    config.latest_bloat_hash = hash;
                }
                map.len()
            } else {
                fetcher.sync(config).len()
            };
            persist_hash(config, &previous_hash, config_path);
            println!("✓ Bloat list: {} entries ({})", count, config.latest_bloat_hash);
            Ok(count > 0)
        }
        BloatCommands::Show { package } => {
            let map = load_bloat(config, config_path);
            match map.get(package) {
                Some(data) => {
                    let removal = data.removal.map(|r| r.to_string());
                    println!("{}", package);
                    println!("  removal:     {}", removal.as_deref().unwrap_or("-"));
                    if let Some(r) = data.removal {
                        println!("               {}", r.description());
                    }
                    println!(
                        "  list:        {}",
                        data.install_list.map(|l| l.to_string()).unwrap_or_else(|| "-".into())
                    );
                    println!("  description: {}", data.description.as_deref().unwrap_or("-"));
                }
                None => println!("{} is not on the bloat list", package),
            }
            Ok(true)
        }
    }
}

fn run_preset_command(broker: &PackageBroker, action: &PresetCommands) -> Result<bool> {
    match action {
        PresetCommands::Create {
            name,
            description,
            packages,
            from_uninstalled,
            output,
        } => {
            let mut apps: BTreeSet<String> = packages.iter().cloned().collect();
            if *from_uninstalled {
                apps.extend(
                    broker
                        .inspector()
                        .list_uninstalled()?
                        .into_iter()
                        .map(|s| s.package_name),
                );
            }
            let preset = Preset::new(name.clone(), description.clone(), apps);
            preset.save(output)?;
            println!("✓ Preset '{}' with {} package(s) written to {:?}", preset.name, preset.apps.len(), output);
            Ok(true)
        }
        PresetCommands::Show { file } => {
            let preset = Preset::load(file)?;
            println!("{} (version {})", preset.name, preset.version);
            if !preset.description.is_empty() {
                println!("  {}", preset.description);
            }
            for app in &preset.apps {
                println!("  - {}", app);
            }
            Ok(true)
        }
    }
}

fn run_config_command(action: &ConfigCommands) -> Result<bool> {
    match action {
        ConfigCommands::Validate { file } => {
            info!("Validating configuration file: {:?}", file);
            let config = BrokerConfig::load_from_file(file)?;
            config.validate()?;
            println!("✓ Configuration file is valid: {:?}", file);
            Ok(true)
        }
        ConfigCommands::Init { file } => {
            BrokerConfig::default().save_to_file(file)?;
            println!("✓ Default configuration written to {:?}", file);
            Ok(true)
        }
    }
}
